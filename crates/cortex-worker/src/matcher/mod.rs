// Matcher (spec.md section 4.4): for an incoming Event, enumerates Units
// whose trigger/conditions match and creates pending Runs. Units are
// evaluated in parallel per event over a bounded pool; semantic conditions
// within a single Unit evaluate sequentially so a failing early condition
// short-circuits the (costlier) later ones.

pub mod operators;

use cortex_core::dedup::semantic_condition_cache_key;
use cortex_core::error::Result;
use cortex_core::model::{Condition, ConditionKind, CreateRunOutcome, Event, Run, Unit};
use cortex_core::traits::LlmClient;
use cortex_storage::cache::KvCache;
use cortex_storage::Store;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub struct Matcher {
    store: Arc<Store>,
    llm: Arc<dyn LlmClient>,
    cache: Arc<KvCache>,
    concurrency: Arc<Semaphore>,
}

impl Matcher {
    pub fn new(store: Arc<Store>, llm: Arc<dyn LlmClient>, cache: Arc<KvCache>, pool_size: usize) -> Self {
        Self {
            store,
            llm,
            cache,
            concurrency: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }

    /// Loads candidate Units for `event.user_id` whose trigger matches
    /// `(event.source, event.event_type)`, fans them out over the bounded
    /// pool, and creates a Run for every Unit whose conditions all pass.
    /// Duplicate `(unit_id, event_id)` Runs collapse silently (spec.md
    /// invariant 2 / section 7 Conflict kind), never surfaced as an error.
    pub async fn match_event(&self, event: &Event) -> Result<Vec<Run>> {
        let candidates = self
            .store
            .list_active_units(event.user_id, &event.source, &event.event_type)
            .await?;

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut handles = Vec::with_capacity(candidates.len());
        for unit in candidates {
            let permit = self.concurrency.clone();
            let llm = self.llm.clone();
            let cache = self.cache.clone();
            let store = self.store.clone();
            let event = event.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                let passed = evaluate_unit(&unit, &event, llm.as_ref(), cache.as_ref()).await?;
                if !passed {
                    return Result::<Option<Run>>::Ok(None);
                }

                match store.create_run(unit.id, event.user_id, event.id).await? {
                    CreateRunOutcome::Created(run) => {
                        info!(unit_id = %unit.id, event_id = %event.id, run_id = %run.id, "unit matched, run created");
                        Ok(Some(run))
                    }
                    CreateRunOutcome::Duplicate => {
                        debug!(unit_id = %unit.id, event_id = %event.id, "run already exists, skipping");
                        Ok(None)
                    }
                }
            }));
        }

        let mut runs = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(Some(run))) => runs.push(run),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!("matcher task failed: {e}"),
                Err(e) => warn!("matcher task panicked: {e}"),
            }
        }

        Ok(runs)
    }
}

/// Evaluates every condition on a Unit in declared order, short-circuiting
/// at the first failure (spec.md section 4.4 step 2).
async fn evaluate_unit(unit: &Unit, event: &Event, llm: &dyn LlmClient, cache: &KvCache) -> Result<bool> {
    for (index, condition) in unit.conditions.iter().enumerate() {
        let passed = evaluate_condition(unit, index, condition, event, llm, cache).await?;
        if !passed {
            return Ok(false);
        }
    }
    Ok(true)
}

async fn evaluate_condition(
    unit: &Unit,
    index: usize,
    condition: &Condition,
    event: &Event,
    llm: &dyn LlmClient,
    cache: &KvCache,
) -> Result<bool> {
    match condition.kind {
        ConditionKind::Rule => {
            let operator = condition.operator.ok_or_else(|| {
                cortex_core::error::CortexError::internal(format!(
                    "rule condition at index {index} on unit {} missing operator",
                    unit.id
                ))
            })?;
            Ok(operators::evaluate(&event.payload, &condition.field, operator, condition.value.as_ref()))
        }
        ConditionKind::Semantic => {
            evaluate_semantic_condition(unit, index, condition, event, llm, cache).await
        }
    }
}

/// Semantic condition evaluation: templated prompt over the payload subset
/// named by `condition.field`, plus `condition.prompt`, cached by
/// `hash(unitId, conditionIndex, event.dedupKey)` with a 5-minute TTL
/// (spec.md section 4.4).
async fn evaluate_semantic_condition(
    unit: &Unit,
    index: usize,
    condition: &Condition,
    event: &Event,
    llm: &dyn LlmClient,
    cache: &KvCache,
) -> Result<bool> {
    let cache_key = semantic_condition_cache_key(unit.id, index, &event.dedup_key);
    if let Some(cached) = cache.get_semantic_condition(&cache_key) {
        return Ok(cached);
    }

    let scoped_payload = operators::field_value(&event.payload, &condition.field)
        .cloned()
        .unwrap_or(event.payload.clone());

    let prompt = condition.prompt.clone().unwrap_or_default();
    let messages = vec![
        cortex_core::traits::LlmMessage::system(
            "You evaluate whether an event satisfies a user-defined condition. Respond only via the provided JSON schema.",
        ),
        cortex_core::traits::LlmMessage::user(format!(
            "Condition: {prompt}\n\nRelevant event data:\n{}",
            scoped_payload
        )),
    ];

    let schema = json!({
        "type": "object",
        "properties": { "matches": { "type": "boolean" } },
        "required": ["matches"]
    });

    let response = llm.complete_json(&messages, &schema, 0.0).await?;
    let matches = response
        .get("matches")
        .and_then(Value::as_bool)
        .ok_or_else(|| cortex_core::error::CortexError::permanent("semantic condition response missing boolean 'matches'"))?;

    cache.put_semantic_condition(&cache_key, matches);
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cortex_core::model::{ConditionKind, RuleOperator};
    use cortex_core::traits::LlmMessage;
    use serde_json::json;

    struct FakeLlm;

    #[async_trait]
    impl LlmClient for FakeLlm {
        async fn complete(&self, _messages: &[LlmMessage], _temperature: f32) -> Result<String> {
            Ok("ok".to_string())
        }

        async fn complete_json(&self, _messages: &[LlmMessage], _schema: &Value, _temperature: f32) -> Result<Value> {
            Ok(json!({ "matches": true }))
        }
    }

    fn sample_event() -> Event {
        Event {
            id: uuid::Uuid::new_v4(),
            user_id: uuid::Uuid::new_v4(),
            source: "email".into(),
            event_type: "email_received".into(),
            payload: json!({"from": "manager@acme.com"}),
            received_at: chrono::Utc::now(),
            dedup_key: "dk".into(),
        }
    }

    fn sample_unit(conditions: Vec<Condition>) -> Unit {
        Unit {
            id: uuid::Uuid::new_v4(),
            user_id: uuid::Uuid::new_v4(),
            name: "test".into(),
            raw_prompt: "test".into(),
            trigger: cortex_core::model::Trigger { source: "email".into(), event_type: "email_received".into() },
            conditions,
            actions: vec![],
            status: cortex_core::model::UnitStatus::Active,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn rule_condition_short_circuits_remaining_conditions() {
        let event = sample_event();
        let unit = sample_unit(vec![
            Condition {
                kind: ConditionKind::Rule,
                field: "from".into(),
                operator: Some(RuleOperator::Eq),
                value: Some(json!("other@acme.com")),
                prompt: None,
            },
            Condition {
                kind: ConditionKind::Semantic,
                field: "from".into(),
                operator: None,
                value: None,
                prompt: Some("is this urgent?".into()),
            },
        ]);
        let cache = KvCache::new();
        let llm = FakeLlm;
        let passed = evaluate_unit(&unit, &event, &llm, &cache).await.unwrap();
        assert!(!passed);
    }

    #[tokio::test]
    async fn semantic_condition_is_cached() {
        let event = sample_event();
        let unit = sample_unit(vec![Condition {
            kind: ConditionKind::Semantic,
            field: "from".into(),
            operator: None,
            value: None,
            prompt: Some("is this urgent?".into()),
        }]);
        let cache = KvCache::new();
        let llm = FakeLlm;
        assert!(evaluate_unit(&unit, &event, &llm, &cache).await.unwrap());

        let key = semantic_condition_cache_key(unit.id, 0, &event.dedup_key);
        assert_eq!(cache.get_semantic_condition(&key), Some(true));
    }
}
