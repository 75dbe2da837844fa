// Row structs paired with plain Create/Update input structs, one pair per
// table. Grounded on `everruns-storage/src/models.rs`'s convention: a
// `#[derive(sqlx::FromRow)]` row type per table, decoupled from the
// `cortex_core::model` domain types so a schema migration never forces a
// change to the public domain model.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct ConnectionRow {
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

#[derive(Debug, Clone)]
pub struct CreateConnectionRow {
    pub user_id: Uuid,
    pub provider: String,
    pub external_connection_id: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct UnitRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub raw_prompt: String,
    #[sqlx(json)]
    pub trigger: Value,
    #[sqlx(json)]
    pub conditions: Value,
    #[sqlx(json)]
    pub actions: Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateUnitRow {
    pub user_id: Uuid,
    pub name: String,
    pub raw_prompt: String,
    pub trigger: Value,
    pub conditions: Value,
    pub actions: Value,
}

#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source: String,
    pub event_type: String,
    #[sqlx(json)]
    pub payload: Value,
    pub received_at: DateTime<Utc>,
    pub dedup_key: String,
}

#[derive(Debug, Clone)]
pub struct CreateEventRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source: String,
    pub event_type: String,
    pub payload: Value,
    pub dedup_key: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct RunRow {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RunStepRow {
    pub id: Uuid,
    pub run_id: Uuid,
    pub index: i32,
    pub action_kind: String,
    #[sqlx(json)]
    pub input: Value,
    #[sqlx(json)]
    pub output: Option<Value>,
    pub status: String,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
    pub attempts: i32,
}

#[derive(Debug, Clone)]
pub struct AppendStepRow {
    pub run_id: Uuid,
    pub index: i32,
    pub action_kind: String,
    pub input: Value,
}
