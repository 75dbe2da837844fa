// Postgres-backed Store (spec.md section 4.7). Grounded on
// `everruns-storage/src/repositories.rs`'s `Database { pool: PgPool }`
// wrapper and its `query_as::<_, Row>(sql).bind(...).fetch_one/...`
// pattern; pseudo-signatures are taken directly from spec.md section 4.7.

use chrono::Utc;
use cortex_core::error::{CortexError, Result};
use cortex_core::model::{
    Connection, CreateRunOutcome, Run, RunStatus, RunStep, RunStepStatus, Unit, UnitStatus,
    WriteOutcome,
};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ConnectionRow, EventRow, RunRow, RunStepRow, UnitRow};

pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .map_err(|e| CortexError::internal(format!("failed to connect to store: {e}")))?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CortexError::internal(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ---------------------------------------------------------------
    // Connections
    // ---------------------------------------------------------------

    pub async fn save_connection(
        &self,
        user_id: Uuid,
        provider: &str,
        external_connection_id: &str,
    ) -> Result<Connection> {
        let row = sqlx::query_as::<_, ConnectionRow>(
            r#"
            INSERT INTO connections (user_id, provider, external_connection_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, provider)
            DO UPDATE SET external_connection_id = EXCLUDED.external_connection_id, enabled = TRUE, updated_at = NOW()
            RETURNING id, user_id, provider, external_connection_id, enabled, error_count, last_poll_at, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(external_connection_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row_to_connection(row))
    }

    /// Resolves `connectionId -> userId` for the WebhookFront (spec.md section 4.1).
    /// Returns `None` rather than an error on a missing mapping, since the
    /// caller must still ACK the webhook.
    pub async fn lookup_user_id_by_connection(
        &self,
        external_connection_id: &str,
        provider: &str,
    ) -> Result<Option<Uuid>> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT user_id FROM connections
            WHERE external_connection_id = $1 AND provider = $2 AND enabled = TRUE
            "#,
        )
        .bind(external_connection_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(|(id,)| id))
    }

    pub async fn delete_connection(&self, user_id: Uuid, provider: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM connections WHERE user_id = $1 AND provider = $2")
            .bind(user_id)
            .bind(provider)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_connections(&self, user_id: Uuid) -> Result<Vec<Connection>> {
        let rows = sqlx::query_as::<_, ConnectionRow>(
            r#"
            SELECT id, user_id, provider, external_connection_id, enabled, error_count, last_poll_at, created_at, updated_at
            FROM connections WHERE user_id = $1 ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(rows.into_iter().map(row_to_connection).collect())
    }

    // ---------------------------------------------------------------
    // Units
    // ---------------------------------------------------------------

    pub async fn save_unit(&self, user_id: Uuid, name: &str, raw_prompt: &str, trigger: Value, conditions: Value, actions: Value) -> Result<Unit> {
        let row = sqlx::query_as::<_, UnitRow>(
            r#"
            INSERT INTO units (user_id, name, raw_prompt, trigger, conditions, actions, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'active')
            RETURNING id, user_id, name, raw_prompt, trigger, conditions, actions, status, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(raw_prompt)
        .bind(&trigger)
        .bind(&conditions)
        .bind(&actions)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        row_to_unit(row)
    }

    pub async fn get_unit(&self, id: Uuid) -> Result<Option<Unit>> {
        let row = sqlx::query_as::<_, UnitRow>(
            r#"
            SELECT id, user_id, name, raw_prompt, trigger, conditions, actions, status, created_at, updated_at
            FROM units WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(row_to_unit).transpose()
    }

    pub async fn list_units_for_user(&self, user_id: Uuid) -> Result<Vec<Unit>> {
        let rows = sqlx::query_as::<_, UnitRow>(
            r#"
            SELECT id, user_id, name, raw_prompt, trigger, conditions, actions, status, created_at, updated_at
            FROM units WHERE user_id = $1 ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter().map(row_to_unit).collect()
    }

    /// "Load all active Units for userId with matching trigger.source and
    /// trigger.type (indexed query)" (spec.md section 4.4).
    pub async fn list_active_units(&self, user_id: Uuid, source: &str, event_type: &str) -> Result<Vec<Unit>> {
        let rows = sqlx::query_as::<_, UnitRow>(
            r#"
            SELECT id, user_id, name, raw_prompt, trigger, conditions, actions, status, created_at, updated_at
            FROM units
            WHERE user_id = $1 AND status = 'active'
              AND trigger ->> 'source' = $2 AND trigger ->> 'event_type' = $3
            "#,
        )
        .bind(user_id)
        .bind(source)
        .bind(event_type)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter().map(row_to_unit).collect()
    }

    pub async fn set_unit_status(&self, id: Uuid, status: UnitStatus) -> Result<Option<Unit>> {
        let row = sqlx::query_as::<_, UnitRow>(
            r#"
            UPDATE units SET status = $2, updated_at = NOW() WHERE id = $1
            RETURNING id, user_id, name, raw_prompt, trigger, conditions, actions, status, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(row_to_unit).transpose()
    }

    pub async fn delete_unit(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM units WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected() > 0)
    }

    // ---------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------

    /// Returns `Created`/`Duplicate` using the unique `(user_id, dedup_key)`
    /// constraint; a duplicate is not an error (spec.md section 4.7).
    pub async fn write_event(&self, event: crate::models::CreateEventRow) -> Result<WriteOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO events (id, user_id, source, event_type, payload, dedup_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, dedup_key) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(&event.source)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(&event.dedup_key)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(if result.rows_affected() > 0 {
            WriteOutcome::Created
        } else {
            WriteOutcome::Duplicate
        })
    }

    pub async fn get_event(&self, id: Uuid) -> Result<Option<cortex_core::model::Event>> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"SELECT id, user_id, source, event_type, payload, received_at, dedup_key FROM events WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(row_to_event))
    }

    // ---------------------------------------------------------------
    // Runs
    // ---------------------------------------------------------------

    /// Returns `Duplicate` via the unique `(unit_id, event_id)` constraint
    /// rather than erroring, per spec.md section 4.7 and invariant 2.
    pub async fn create_run(&self, unit_id: Uuid, user_id: Uuid, event_id: Uuid) -> Result<CreateRunOutcome> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            INSERT INTO runs (unit_id, user_id, event_id, status)
            VALUES ($1, $2, $3, 'pending')
            ON CONFLICT (unit_id, event_id) DO NOTHING
            RETURNING id, unit_id, user_id, event_id, status, started_at, completed_at, error, created_at
            "#,
        )
        .bind(unit_id)
        .bind(user_id)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        match row {
            Some(r) => Ok(CreateRunOutcome::Created(row_to_run(r)?)),
            None => Ok(CreateRunOutcome::Duplicate),
        }
    }

    pub async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"SELECT id, unit_id, user_id, event_id, status, started_at, completed_at, error, created_at FROM runs WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(row_to_run).transpose()
    }

    /// Resets a terminal Run back to `pending` and clears its prior steps,
    /// for the Control API's `POST /runs/:id/rerun` (spec.md section 6). The
    /// `(unit_id, event_id)` unique constraint means a rerun replays the
    /// same Run row rather than minting a new one.
    pub async fn reset_run_for_rerun(&self, id: Uuid) -> Result<Option<Run>> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        sqlx::query("DELETE FROM run_steps WHERE run_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

        let row = sqlx::query_as::<_, RunRow>(
            r#"
            UPDATE runs SET status = 'pending', started_at = NULL, completed_at = NULL, error = NULL
            WHERE id = $1
            RETURNING id, unit_id, user_id, event_id, status, started_at, completed_at, error, created_at
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_error)?;

        tx.commit().await.map_err(store_error)?;

        row.map(row_to_run).transpose()
    }

    pub async fn list_runs(&self, user_id: Uuid, limit: i64) -> Result<Vec<Run>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, unit_id, user_id, event_id, status, started_at, completed_at, error, created_at
            FROM runs WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter().map(row_to_run).collect()
    }

    /// Crash recovery is implicit: this surfaces Runs stuck `running` for an
    /// operator query (spec.md section 4.7), with no auto-resume.
    pub async fn list_running_runs(&self) -> Result<Vec<Run>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"SELECT id, unit_id, user_id, event_id, status, started_at, completed_at, error, created_at FROM runs WHERE status = 'running'"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter().map(row_to_run).collect()
    }

    pub async fn start_run(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE runs SET status = 'running', started_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    pub async fn finish_run(&self, id: Uuid, status: RunStatus, error: Option<String>) -> Result<()> {
        sqlx::query("UPDATE runs SET status = $2, completed_at = NOW(), error = $3 WHERE id = $1")
            .bind(id)
            .bind(status.to_string())
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // RunSteps
    // ---------------------------------------------------------------

    pub async fn append_step(&self, run_id: Uuid, index: i32, action_kind: &str, input: Value) -> Result<RunStep> {
        let row = sqlx::query_as::<_, RunStepRow>(
            r#"
            INSERT INTO run_steps (run_id, index, action_kind, input, status, attempts)
            VALUES ($1, $2, $3, $4, 'running', 1)
            RETURNING id, run_id, index, action_kind, input, output, status, error, duration_ms, attempts
            "#,
        )
        .bind(run_id)
        .bind(index)
        .bind(action_kind)
        .bind(&input)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        row_to_run_step(row)
    }

    pub async fn record_attempt(&self, step_id: Uuid, attempts: i32) -> Result<()> {
        sqlx::query("UPDATE run_steps SET attempts = $2 WHERE id = $1")
            .bind(step_id)
            .bind(attempts)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    pub async fn finish_step(
        &self,
        step_id: Uuid,
        status: RunStepStatus,
        output: Option<Value>,
        error: Option<String>,
        duration_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE run_steps SET status = $2, output = $3, error = $4, duration_ms = $5 WHERE id = $1",
        )
        .bind(step_id)
        .bind(status.to_string())
        .bind(output)
        .bind(error)
        .bind(duration_ms)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    pub async fn list_steps(&self, run_id: Uuid) -> Result<Vec<RunStep>> {
        let rows = sqlx::query_as::<_, RunStepRow>(
            r#"
            SELECT id, run_id, index, action_kind, input, output, status, error, duration_ms, attempts
            FROM run_steps WHERE run_id = $1 ORDER BY index ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter().map(row_to_run_step).collect()
    }
}

fn store_error(e: sqlx::Error) -> CortexError {
    CortexError::transient(format!("store error: {e}"))
}

fn row_to_connection(row: ConnectionRow) -> Connection {
    Connection {
        id: row.id,
        user_id: row.user_id,
        provider: row.provider,
        external_connection_id: row.external_connection_id,
        enabled: row.enabled,
        error_count: row.error_count,
        last_poll_at: row.last_poll_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn row_to_unit(row: UnitRow) -> Result<Unit> {
    Ok(Unit {
        id: row.id,
        user_id: row.user_id,
        name: row.name,
        raw_prompt: row.raw_prompt,
        trigger: serde_json::from_value(row.trigger)
            .map_err(|e| CortexError::internal(format!("corrupt unit trigger: {e}")))?,
        conditions: serde_json::from_value(row.conditions)
            .map_err(|e| CortexError::internal(format!("corrupt unit conditions: {e}")))?,
        actions: serde_json::from_value(row.actions)
            .map_err(|e| CortexError::internal(format!("corrupt unit actions: {e}")))?,
        status: row
            .status
            .parse()
            .map_err(|e: String| CortexError::internal(e))?,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn row_to_event(row: EventRow) -> cortex_core::model::Event {
    cortex_core::model::Event {
        id: row.id,
        user_id: row.user_id,
        source: row.source,
        event_type: row.event_type,
        payload: row.payload,
        received_at: row.received_at,
        dedup_key: row.dedup_key,
    }
}

fn row_to_run(row: RunRow) -> Result<Run> {
    Ok(Run {
        id: row.id,
        unit_id: row.unit_id,
        user_id: row.user_id,
        event_id: row.event_id,
        status: row
            .status
            .parse()
            .map_err(|e: String| CortexError::internal(e))?,
        started_at: row.started_at,
        completed_at: row.completed_at,
        error: row.error,
        created_at: row.created_at,
    })
}

fn row_to_run_step(row: RunStepRow) -> Result<RunStep> {
    let action_kind: Value = Value::String(row.action_kind.clone());
    Ok(RunStep {
        id: row.id,
        run_id: row.run_id,
        index: row.index,
        action_kind: serde_json::from_value(action_kind)
            .map_err(|e| CortexError::internal(format!("corrupt action kind: {e}")))?,
        input: row.input,
        output: row.output,
        status: parse_step_status(&row.status)?,
        error: row.error,
        duration_ms: row.duration_ms,
        attempts: row.attempts,
    })
}

fn parse_step_status(s: &str) -> Result<RunStepStatus> {
    match s {
        "pending" => Ok(RunStepStatus::Pending),
        "running" => Ok(RunStepStatus::Running),
        "completed" => Ok(RunStepStatus::Completed),
        "failed" => Ok(RunStepStatus::Failed),
        "skipped" => Ok(RunStepStatus::Skipped),
        other => Err(CortexError::internal(format!("unknown run step status: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_is_transient() {
        let synthetic = sqlx::Error::RowNotFound;
        assert!(store_error(synthetic).is_retryable());
    }
}
