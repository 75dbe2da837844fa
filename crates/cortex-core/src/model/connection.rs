use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// A user's link to a third-party SaaS provider. Unique per `(user_id, provider)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Connection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub external_connection_id: String,
    pub enabled: bool,
    pub error_count: i32,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    /// Whether ToolExecutor/Dispatcher should attribute new webhooks to this
    /// connection. Repeated failures disable a connection without deleting it.
    pub fn is_usable(&self) -> bool {
        self.enabled
    }
}
