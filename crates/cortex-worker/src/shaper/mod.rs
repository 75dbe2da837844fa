// EventShaper (spec.md section 4.2): turns a webhook task's raw
// `added`/`updated`/`deleted` record lists into a bounded, deduplicated
// stream of semantic domain Events. Rule-based only, no LLM on this path,
// keeping the hot ingestion path free of external latency.

pub mod salience;

use chrono::Utc;
use cortex_core::config::AppConfig;
use cortex_core::dedup::{event_dedup_key, event_id_from_dedup_key};
use cortex_core::error::Result;
use cortex_core::model::Event;
use cortex_storage::cache::{KvCache, ShaperStateError, ShaperSnapshot};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

use salience::RecordKind;

/// One raw record delta task handed to the Shaper by the Dispatcher
/// (spec.md section 4.1's enqueued task shape, minus the HTTP envelope).
#[derive(Debug, Clone)]
pub struct ShapeTask {
    pub user_id: Uuid,
    pub source: String,
    pub model: String,
    pub added: Vec<Value>,
    pub updated: Vec<Value>,
    pub deleted: Vec<Value>,
}

/// A shaped Event plus whatever raw record produced it, before dedup and
/// persistence. `EventShaper::shape` returns these; the Dispatcher is
/// responsible for writing them through `Store::write_event` and handing
/// survivors to the Matcher.
#[derive(Debug, Clone)]
pub struct ShapedEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source: String,
    pub event_type: String,
    pub payload: Value,
    pub dedup_key: String,
}

impl ShapedEvent {
    pub fn into_event(self) -> Event {
        Event {
            id: self.id,
            user_id: self.user_id,
            source: self.source,
            event_type: self.event_type,
            payload: self.payload,
            received_at: Utc::now(),
            dedup_key: self.dedup_key,
        }
    }
}

pub struct EventShaper {
    cache: Arc<KvCache>,
    config: Arc<AppConfig>,
}

impl EventShaper {
    pub fn new(cache: Arc<KvCache>, config: Arc<AppConfig>) -> Self {
        Self { cache, config }
    }

    /// Shapes one task end to end: loads `ShaperState`, walks
    /// added/updated/deleted in that order (spec.md section 5's "creation
    /// -> updates -> deletions" ordering guarantee), writes the updated
    /// state back, and returns deduplicated `ShapedEvent`s ready for the
    /// Matcher. Record kind is resolved per-record from `task.model` since
    /// a single `crm` task batch can mix leads and opportunities.
    pub fn shape(&self, task: &ShapeTask) -> Result<Vec<ShapedEvent>> {
        let mut events = Vec::new();

        loop {
            let snapshot = self.cache.load_shaper_state(task.user_id, &task.source);
            let expected_version = snapshot.version;
            let mut next = snapshot.clone();
            events.clear();

            for record in &task.added {
                self.shape_added(task, record, &mut next, &mut events);
            }
            for record in &task.updated {
                self.shape_updated(task, record, &mut next, &mut events);
            }
            for record in &task.deleted {
                self.shape_deleted(task, record, &mut next, &mut events);
            }

            match self
                .cache
                .save_shaper_state(task.user_id, &task.source, expected_version, next)
            {
                Ok(()) => break,
                Err(ShaperStateError::VersionConflict { .. }) => {
                    // Another worker updated ShaperState for this (user, source)
                    // concurrently; retry the diff against the fresh snapshot
                    // (spec.md section 5: "shared-resource policy... on version
                    // conflict, the worker retries the diff").
                    debug!(user_id = %task.user_id, source = %task.source, "shaper state version conflict, retrying diff");
                    continue;
                }
            }
        }

        Ok(self.dedup(events))
    }

    fn record_id(record: &Value) -> String {
        record
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default()
    }

    fn salient_subset(record: &Value, fields: &[&str]) -> Value {
        let mut map = serde_json::Map::new();
        for field in fields {
            if let Some(v) = record.get(field) {
                map.insert(field.to_string(), v.clone());
            }
        }
        Value::Object(map)
    }

    fn build_payload(&self, record: &Value, salient: &Value) -> Value {
        if self.config.retain_raw_event_payloads {
            json!({ "raw": record, "salient": salient })
        } else {
            salient.clone()
        }
    }

    fn push_event(
        &self,
        task: &ShapeTask,
        event_type: &str,
        record_id: &str,
        payload: Value,
        salient: &Value,
        out: &mut Vec<ShapedEvent>,
    ) {
        let salient_delta = salient.to_string();
        let dedup_key = event_dedup_key(task.user_id, &task.source, event_type, record_id, &salient_delta);
        let id = event_id_from_dedup_key(task.user_id, &dedup_key);
        out.push(ShapedEvent {
            id,
            user_id: task.user_id,
            source: task.source.clone(),
            event_type: event_type.to_string(),
            payload,
            dedup_key,
        });
    }

    fn shape_added(&self, task: &ShapeTask, record: &Value, state: &mut ShaperSnapshot, out: &mut Vec<ShapedEvent>) {
        let Some(kind) = RecordKind::from_source_and_model(&task.source, &task.model) else {
            return;
        };
        if kind == RecordKind::EmailMessage && salience::is_noise_email(record) {
            trace!("skipping noise email record");
            return;
        }

        let record_id = Self::record_id(record);
        let salient = Self::salient_subset(record, kind.salient_fields());
        let payload = self.build_payload(record, &salient);
        self.push_event(task, kind.creation_event(), &record_id, payload, &salient, out);
        state.records.insert(record_id, salient);
    }

    fn shape_updated(&self, task: &ShapeTask, record: &Value, state: &mut ShaperSnapshot, out: &mut Vec<ShapedEvent>) {
        let Some(kind) = RecordKind::from_source_and_model(&task.source, &task.model) else {
            return;
        };

        let record_id = Self::record_id(record);
        let salient = Self::salient_subset(record, kind.salient_fields());

        // "If ShaperState is missing (first observation), an updated record
        // is treated as added" (spec.md section 4.2's guarantee).
        let Some(prior) = state.records.get(&record_id).cloned() else {
            self.shape_added(task, record, state, out);
            return;
        };

        if prior == salient {
            // Incidental churn outside the salient set: no event, no state
            // change (spec.md section 4.2's "diff is field-scoped").
            return;
        }

        let payload = self.build_payload(record, &salient);
        for event_type in Self::update_event_types(kind, &prior, &salient) {
            self.push_event(task, event_type, &record_id, payload.clone(), &salient, out);
        }
        state.records.insert(record_id, salient);
    }

    fn shape_deleted(&self, task: &ShapeTask, record: &Value, state: &mut ShaperSnapshot, out: &mut Vec<ShapedEvent>) {
        let Some(kind) = RecordKind::from_source_and_model(&task.source, &task.model) else {
            return;
        };
        let record_id = Self::record_id(record);
        if let Some(event_type) = kind.deletion_event() {
            let salient = state.records.get(&record_id).cloned().unwrap_or(Value::Null);
            let payload = self.build_payload(record, &salient);
            self.push_event(task, event_type, &record_id, payload, &salient, out);
        }
        state.records.remove(&record_id);
    }

    /// Per-field semantic update events from the closed table (SPEC_FULL.md
    /// section 3). A single update can fire more than one event (e.g. an
    /// opportunity moving to `Closed Won` emits both
    /// `opportunity_stage_changed` and `opportunity_closed_won`, matching
    /// scenario S3 in spec.md section 8).
    fn update_event_types(kind: RecordKind, prior: &Value, current: &Value) -> Vec<&'static str> {
        let changed = |field: &str| prior.get(field) != current.get(field);
        let bool_field = |v: &Value, field: &str| v.get(field).and_then(Value::as_bool).unwrap_or(false);

        match kind {
            RecordKind::EmailMessage => {
                let in_reply_to_now_set = current
                    .get("in_reply_to")
                    .and_then(Value::as_str)
                    .map(|s| !s.is_empty())
                    .unwrap_or(false);
                if changed("in_reply_to") && in_reply_to_now_set {
                    vec!["email_reply_received"]
                } else {
                    vec![]
                }
            }
            RecordKind::CalendarEvent => {
                let mut types = Vec::new();
                let cancelled_now = current
                    .get("status")
                    .and_then(Value::as_str)
                    .map(|s| s.eq_ignore_ascii_case("cancelled"))
                    .unwrap_or(false);
                let cancelled_before = prior
                    .get("status")
                    .and_then(Value::as_str)
                    .map(|s| s.eq_ignore_ascii_case("cancelled"))
                    .unwrap_or(false);
                if cancelled_now && !cancelled_before {
                    types.push("event_cancelled");
                } else if changed("status") || changed("start_time") || changed("end_time")
                    || changed("attendees") || changed("location")
                {
                    types.push("event_updated");
                }
                types
            }
            RecordKind::CrmLead => {
                let mut types = Vec::new();
                if changed("status") {
                    types.push("lead_stage_changed");
                }
                if changed("is_converted") && !bool_field(prior, "is_converted") && bool_field(current, "is_converted") {
                    types.push("lead_converted");
                }
                types
            }
            RecordKind::CrmOpportunity => {
                let mut types = Vec::new();
                if changed("stage_name") {
                    types.push("opportunity_stage_changed");
                }
                if changed("is_won") && !bool_field(prior, "is_won") && bool_field(current, "is_won") {
                    types.push("opportunity_closed_won");
                }
                types
            }
        }
    }

    /// Drops events whose `dedup_key` has already been seen within the
    /// dedup TTL (spec.md section 4.2 step 6). This is the fast-path
    /// short-circuit; the `(user_id, dedup_key)` unique constraint in
    /// `cortex-storage` is the durable backstop.
    fn dedup(&self, events: Vec<ShapedEvent>) -> Vec<ShapedEvent> {
        events
            .into_iter()
            .filter(|e| self.cache.check_and_set_dedup(&e.dedup_key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::config::RuntimeMode;
    use serde_json::json;
    use std::time::Duration;

    fn cfg(retain_raw: bool) -> Arc<AppConfig> {
        Arc::new(AppConfig {
            store_url: "postgres://test".into(),
            cache_url: None,
            saas_secret: None,
            tool_base_url: "https://connectors.internal".into(),
            llm_api_key: None,
            llm_provider: "openai".into(),
            port: 8080,
            runtime_mode: RuntimeMode::Development,
            shaper_pool_size: 1,
            matcher_pool_size: 1,
            runtime_pool_size: 1,
            runtime_wait_max: Duration::from_secs(900),
            retain_raw_event_payloads: retain_raw,
        })
    }

    fn shaper(retain_raw: bool) -> EventShaper {
        EventShaper::new(Arc::new(KvCache::new()), cfg(retain_raw))
    }

    #[test]
    fn new_email_emits_received_event() {
        let s = shaper(false);
        let task = ShapeTask {
            user_id: Uuid::new_v4(),
            source: "email".into(),
            model: "GmailEmail".into(),
            added: vec![json!({"id": "m1", "from": "manager@acme.com", "subject": "Q3"})],
            updated: vec![],
            deleted: vec![],
        };
        let events = s.shape(&task).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "email_received");
    }

    #[test]
    fn noise_email_is_skipped() {
        let s = shaper(false);
        let task = ShapeTask {
            user_id: Uuid::new_v4(),
            source: "email".into(),
            model: "GmailEmail".into(),
            added: vec![json!({"id": "m1", "from": "noreply@acme.com", "subject": "Q3"})],
            updated: vec![],
            deleted: vec![],
        };
        assert!(s.shape(&task).unwrap().is_empty());
    }

    #[test]
    fn opportunity_closed_won_emits_both_events() {
        let s = shaper(false);
        let user_id = Uuid::new_v4();

        let added = ShapeTask {
            user_id,
            source: "crm".into(),
            model: "SalesforceOpportunity".into(),
            added: vec![json!({"id": "opp1", "stage_name": "Negotiation", "is_won": false, "is_closed": false})],
            updated: vec![],
            deleted: vec![],
        };
        s.shape(&added).unwrap();

        let updated = ShapeTask {
            user_id,
            source: "crm".into(),
            model: "SalesforceOpportunity".into(),
            added: vec![],
            updated: vec![json!({"id": "opp1", "stage_name": "Closed Won", "is_won": true, "is_closed": true})],
            deleted: vec![],
        };
        let events = s.shape(&updated).unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert!(types.contains(&"opportunity_stage_changed"));
        assert!(types.contains(&"opportunity_closed_won"));
    }

    #[test]
    fn incidental_field_churn_is_ignored() {
        let s = shaper(false);
        let user_id = Uuid::new_v4();
        let add = ShapeTask {
            user_id,
            source: "calendar".into(),
            model: "GoogleCalendarEvent".into(),
            added: vec![json!({"id": "e1", "status": "confirmed", "etag": "a"})],
            updated: vec![],
            deleted: vec![],
        };
        s.shape(&add).unwrap();

        let update = ShapeTask {
            user_id,
            source: "calendar".into(),
            model: "GoogleCalendarEvent".into(),
            added: vec![],
            updated: vec![json!({"id": "e1", "status": "confirmed", "etag": "b"})],
            deleted: vec![],
        };
        assert!(s.shape(&update).unwrap().is_empty());
    }

    #[test]
    fn duplicate_webhook_delivery_is_idempotent() {
        let s = shaper(false);
        let task = ShapeTask {
            user_id: Uuid::new_v4(),
            source: "email".into(),
            model: "GmailEmail".into(),
            added: vec![json!({"id": "m1", "from": "manager@acme.com", "subject": "Q3"})],
            updated: vec![],
            deleted: vec![],
        };
        let first = s.shape(&task).unwrap();
        let second = s.shape(&task).unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn updated_without_prior_state_is_treated_as_added() {
        let s = shaper(false);
        let task = ShapeTask {
            user_id: Uuid::new_v4(),
            source: "crm".into(),
            model: "SalesforceLead".into(),
            added: vec![],
            updated: vec![json!({"id": "lead1", "status": "new", "is_converted": false})],
            deleted: vec![],
        };
        let events = s.shape(&task).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "lead_created");
    }

    #[test]
    fn calendar_delete_emits_event_but_email_does_not() {
        let s = shaper(false);
        let user_id = Uuid::new_v4();
        let add = ShapeTask {
            user_id,
            source: "calendar".into(),
            model: "GoogleCalendarEvent".into(),
            added: vec![json!({"id": "e1", "status": "confirmed"})],
            updated: vec![],
            deleted: vec![],
        };
        s.shape(&add).unwrap();
        let del = ShapeTask {
            user_id,
            source: "calendar".into(),
            model: "GoogleCalendarEvent".into(),
            added: vec![],
            updated: vec![],
            deleted: vec![json!({"id": "e1"})],
        };
        let events = s.shape(&del).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "event_deleted");
    }

    #[test]
    fn raw_payload_retention_is_off_by_default() {
        let s = shaper(false);
        let task = ShapeTask {
            user_id: Uuid::new_v4(),
            source: "email".into(),
            model: "GmailEmail".into(),
            added: vec![json!({"id": "m1", "from": "manager@acme.com", "subject": "Q3", "secret_header": "x"})],
            updated: vec![],
            deleted: vec![],
        };
        let events = s.shape(&task).unwrap();
        assert!(events[0].payload.get("raw").is_none());

        let s2 = shaper(true);
        let task2 = ShapeTask { user_id: Uuid::new_v4(), ..task };
        let events2 = s2.shape(&task2).unwrap();
        assert!(events2[0].payload.get("raw").is_some());
    }
}
