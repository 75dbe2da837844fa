// Compiler (spec.md section 4.3): translates a user's natural-language
// prompt into a validated Unit IR via a single low-temperature LLM call,
// or returns a structured clarification request. System prompt sections are
// generated from the same tables the rest of the pipeline consults
// (`ToolRegistry::system_prompt_fragment`, `shaper::salience::
// system_prompt_fragment`) so the compiler's view of the world cannot drift
// from what the Shaper/Runtime will actually do (SPEC_FULL.md section 4).

use cortex_core::config::AppConfig;
use cortex_core::error::{CortexError, Result};
use cortex_core::model::{Action, ActionKind, Condition, ConditionKind, Trigger, Unit, UnitStatus};
use cortex_core::traits::{LlmClient, LlmMessage};
use cortex_core::tools::ToolRegistry;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Structured ambiguity the Compiler surfaces instead of guessing (spec.md
/// section 4.3: "the Compiler surfaces this to the caller rather than
/// guessing").
#[derive(Debug, Clone, serde::Serialize)]
pub struct ClarificationNeeded {
    pub question: String,
    pub ambiguity: String,
}

#[derive(Debug)]
pub enum CompileOutcome {
    Unit(Unit),
    ClarificationNeeded(ClarificationNeeded),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", deny_unknown_fields)]
enum CompilerResponse {
    Unit {
        name: String,
        trigger: Trigger,
        conditions: Vec<Condition>,
        actions: Vec<Action>,
    },
    ClarificationNeeded {
        question: String,
        ambiguity: String,
    },
}

const KNOWN_SOURCES: &[&str] = &["email", "calendar", "crm"];
const KNOWN_EVENT_TYPES: &[&str] = &[
    "email_received",
    "email_reply_received",
    "event_created",
    "event_updated",
    "event_cancelled",
    "event_deleted",
    "lead_created",
    "lead_stage_changed",
    "lead_converted",
    "opportunity_created",
    "opportunity_stage_changed",
    "opportunity_closed_won",
];

pub struct Compiler {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    config: Arc<AppConfig>,
}

impl Compiler {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>, config: Arc<AppConfig>) -> Self {
        Self { llm, tools, config }
    }

    pub async fn compile(&self, user_id: Uuid, raw_prompt: &str) -> Result<CompileOutcome> {
        let messages = vec![
            LlmMessage::system(self.system_prompt()),
            LlmMessage::user(raw_prompt.to_string()),
        ];

        let response = self.llm.complete_json(&messages, &self.response_schema(), 0.2).await?;
        let parsed: CompilerResponse = serde_json::from_value(response)
            .map_err(|e| CortexError::permanent(format!("compiler response failed schema validation: {e}")))?;

        match parsed {
            CompilerResponse::ClarificationNeeded { question, ambiguity } => {
                Ok(CompileOutcome::ClarificationNeeded(ClarificationNeeded { question, ambiguity }))
            }
            CompilerResponse::Unit { name, trigger, conditions, actions } => {
                self.validate(&trigger, &conditions, &actions)?;

                let now = chrono::Utc::now();
                Ok(CompileOutcome::Unit(Unit {
                    id: Uuid::new_v4(),
                    user_id,
                    name,
                    raw_prompt: raw_prompt.to_string(),
                    trigger,
                    conditions,
                    actions,
                    status: UnitStatus::Active,
                    created_at: now,
                    updated_at: now,
                }))
            }
        }
    }

    /// Validation strict enough that nothing reaches Runtime that Runtime
    /// cannot execute (spec.md section 4.3: "missing trigger rejects;
    /// unknown tool/event names rejects"; section 8's compile-time boundary
    /// behavior for over-long `wait` actions).
    fn validate(&self, trigger: &Trigger, conditions: &[Condition], actions: &[Action]) -> Result<()> {
        if !KNOWN_SOURCES.contains(&trigger.source.as_str()) {
            return Err(CortexError::validation(format!("unknown trigger source '{}'", trigger.source)));
        }
        if !KNOWN_EVENT_TYPES.contains(&trigger.event_type.as_str()) {
            return Err(CortexError::validation(format!("unknown trigger event type '{}'", trigger.event_type)));
        }

        for (i, condition) in conditions.iter().enumerate() {
            match condition.kind {
                ConditionKind::Rule if condition.operator.is_none() => {
                    return Err(CortexError::validation(format!("condition {i} is a rule condition but has no operator")));
                }
                ConditionKind::Semantic if condition.prompt.is_none() => {
                    return Err(CortexError::validation(format!("condition {i} is a semantic condition but has no prompt")));
                }
                _ => {}
            }
        }

        if actions.is_empty() {
            return Err(CortexError::validation("unit must have at least one action"));
        }

        for (i, action) in actions.iter().enumerate() {
            match action.kind {
                ActionKind::Tool => self.validate_tool_action(i, action)?,
                ActionKind::Wait => self.validate_wait_action(i, action)?,
                ActionKind::Llm | ActionKind::Check | ActionKind::Notify | ActionKind::Noop => {}
            }
        }

        Ok(())
    }

    fn validate_tool_action(&self, index: usize, action: &Action) -> Result<()> {
        let provider = action.params.get("provider").and_then(Value::as_str).ok_or_else(|| {
            CortexError::validation(format!("action {index} is a tool action but has no 'provider'"))
        })?;
        let tool_name = action.params.get("tool_name").and_then(Value::as_str).ok_or_else(|| {
            CortexError::validation(format!("action {index} is a tool action but has no 'tool_name'"))
        })?;
        if !self.tools.contains(provider, tool_name) {
            return Err(CortexError::validation(format!(
                "action {index} references unknown tool '{provider}.{tool_name}'"
            )));
        }
        Ok(())
    }

    fn validate_wait_action(&self, index: usize, action: &Action) -> Result<()> {
        let ms = action
            .params
            .get("ms")
            .and_then(Value::as_u64)
            .ok_or_else(|| CortexError::validation(format!("action {index} is a wait action but has no numeric 'ms'")))?;
        let max_ms = self.config.runtime_wait_max.as_millis() as u64;
        if ms > max_ms {
            return Err(CortexError::validation(format!(
                "action {index}'s wait duration {ms}ms exceeds the configured maximum of {max_ms}ms"
            )));
        }
        Ok(())
    }

    fn system_prompt(&self) -> String {
        format!(
            "You translate a user's automation request into a Unit definition.\n\n\
             {}\n{}\n\
             Available LLM action kinds: summarize, generate, classify, extract.\n\n\
             Condition grammar: kind is 'rule' or 'semantic'. Rule conditions use one of these \
             operators: eq, neq, in, notIn, contains, startsWith, between, gt, gte, lt, lte, \
             isNull, isNotNull. Semantic conditions carry a free-form 'prompt' evaluated against \
             the event at match time.\n\n\
             Respond with exactly one JSON object matching the provided schema. If the request is \
             ambiguous, respond with status 'clarification_needed' and explain the ambiguity rather \
             than guessing.",
            self.tools.system_prompt_fragment(),
            crate::shaper::salience::system_prompt_fragment(),
        )
    }

    fn response_schema(&self) -> Value {
        json!({
            "oneOf": [
                {
                    "type": "object",
                    "properties": {
                        "status": { "const": "unit" },
                        "name": { "type": "string" },
                        "trigger": {
                            "type": "object",
                            "properties": {
                                "source": { "type": "string" },
                                "event_type": { "type": "string" }
                            },
                            "required": ["source", "event_type"]
                        },
                        "conditions": { "type": "array" },
                        "actions": { "type": "array" }
                    },
                    "required": ["status", "name", "trigger", "conditions", "actions"]
                },
                {
                    "type": "object",
                    "properties": {
                        "status": { "const": "clarification_needed" },
                        "question": { "type": "string" },
                        "ambiguity": { "type": "string" }
                    },
                    "required": ["status", "question", "ambiguity"]
                }
            ]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cortex_core::config::RuntimeMode;
    use cortex_core::tools::{ToolCategory, ToolDefinition, ToolParam};
    use std::time::Duration;

    struct FixedLlm(Value);

    #[async_trait]
    impl LlmClient for FixedLlm {
        async fn complete(&self, _messages: &[LlmMessage], _temperature: f32) -> Result<String> {
            Ok(self.0.to_string())
        }

        async fn complete_json(&self, _messages: &[LlmMessage], _schema: &Value, _temperature: f32) -> Result<Value> {
            Ok(self.0.clone())
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        reg.register(ToolDefinition {
            provider: "gmail".into(),
            name: "send_email".into(),
            category: ToolCategory::Write,
            description: "send an email".into(),
            params: vec![ToolParam {
                name: "to".into(),
                schema_type: "string".into(),
                required: true,
                description: "recipient".into(),
            }],
        });
        Arc::new(reg)
    }

    fn config() -> Arc<AppConfig> {
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
            retain_raw_event_payloads: false,
        })
    }

    #[tokio::test]
    async fn compiles_a_valid_unit() {
        let llm = FixedLlm(json!({
            "status": "unit",
            "name": "notify on big deal",
            "trigger": { "source": "crm", "event_type": "opportunity_closed_won" },
            "conditions": [],
            "actions": [{ "kind": "tool", "params": { "provider": "gmail", "tool_name": "send_email", "inputs": {} }, "continue_on_error": false }]
        }));
        let compiler = Compiler::new(Arc::new(llm), registry(), config());
        match compiler.compile(Uuid::new_v4(), "notify me on big deals").await.unwrap() {
            CompileOutcome::Unit(unit) => assert_eq!(unit.name, "notify on big deal"),
            CompileOutcome::ClarificationNeeded(_) => panic!("expected a unit"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let llm = FixedLlm(json!({
            "status": "unit",
            "name": "bad",
            "trigger": { "source": "crm", "event_type": "opportunity_closed_won" },
            "conditions": [],
            "actions": [{ "kind": "tool", "params": { "provider": "gmail", "tool_name": "delete_everything", "inputs": {} }, "continue_on_error": false }]
        }));
        let compiler = Compiler::new(Arc::new(llm), registry(), config());
        let err = compiler.compile(Uuid::new_v4(), "x").await.unwrap_err();
        assert_eq!(err.kind(), cortex_core::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn over_long_wait_is_rejected_at_compile_time() {
        let llm = FixedLlm(json!({
            "status": "unit",
            "name": "bad wait",
            "trigger": { "source": "email", "event_type": "email_received" },
            "conditions": [],
            "actions": [{ "kind": "wait", "params": { "ms": 99_999_999 }, "continue_on_error": false }]
        }));
        let compiler = Compiler::new(Arc::new(llm), registry(), config());
        let err = compiler.compile(Uuid::new_v4(), "x").await.unwrap_err();
        assert_eq!(err.kind(), cortex_core::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn clarification_is_surfaced_rather_than_guessed() {
        let llm = FixedLlm(json!({
            "status": "clarification_needed",
            "question": "Which calendar should this watch?",
            "ambiguity": "multiple calendar connections exist"
        }));
        let compiler = Compiler::new(Arc::new(llm), registry(), config());
        match compiler.compile(Uuid::new_v4(), "watch my calendar").await.unwrap() {
            CompileOutcome::ClarificationNeeded(c) => assert!(c.question.contains("calendar")),
            CompileOutcome::Unit(_) => panic!("expected clarification"),
        }
    }

    #[tokio::test]
    async fn unknown_trigger_source_is_rejected() {
        let llm = FixedLlm(json!({
            "status": "unit",
            "name": "bad source",
            "trigger": { "source": "slack", "event_type": "message_received" },
            "conditions": [],
            "actions": [{ "kind": "noop", "params": {}, "continue_on_error": false }]
        }));
        let compiler = Compiler::new(Arc::new(llm), registry(), config());
        let err = compiler.compile(Uuid::new_v4(), "x").await.unwrap_err();
        assert_eq!(err.kind(), cortex_core::error::ErrorKind::Validation);
    }
}
