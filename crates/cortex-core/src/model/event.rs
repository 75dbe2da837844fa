use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// A shaped domain event produced by EventShaper. Immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Event {
    /// Deterministic id, see `cortex_core::dedup` for its derivation.
    pub id: Uuid,
    pub user_id: Uuid,
    /// `email` | `calendar` | `crm`, the closed source mapping (spec.md section 4.2).
    pub source: String,
    /// e.g. `email_received`, `lead_stage_changed`.
    pub event_type: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
    pub dedup_key: String,
}

/// Outcome of `Store::write_event`: a duplicate `dedup_key` is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Duplicate,
}
