// Tool registry populated at startup (spec.md section 9: "Dynamic
// string-keyed tool dispatch becomes a registry populated at startup...
// unknown tools produce compile-time (Unit compile) errors rather than
// runtime string misses"). The Compiler consults this registry to generate
// its system prompt and to reject unit definitions referencing unknown
// tools; the Runtime consults it to validate a tool action's inputs before
// calling `ToolExecutor::execute`.

use serde_json::Value;
use std::collections::HashMap;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;
use serde::{Deserialize, Serialize};

/// Whether invoking a tool can have side effects. Read tools are safe to
/// suggest speculatively; write tools require the action to be explicit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Read,
    Write,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ToolParam {
    pub name: String,
    /// JSON Schema type name (`string`, `number`, `boolean`, `object`, `array`).
    pub schema_type: String,
    pub required: bool,
    pub description: String,
}

/// A single tool action, scoped to a provider (e.g. `gmail.send_email`,
/// `salesforce.update_lead`). Mirrors the SaaS-connector SDK's
/// `action(provider, name, inputs)` facade referenced in spec.md section 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ToolDefinition {
    pub provider: String,
    pub name: String,
    pub category: ToolCategory,
    pub description: String,
    pub params: Vec<ToolParam>,
}

impl ToolDefinition {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.provider, self.name)
    }

    /// Validates a call's `inputs` against required params. Does not check
    /// types beyond presence; the ToolExecutor remains schemaless at the
    /// transport boundary per spec.md section 9.
    pub fn validate_inputs(&self, inputs: &Value) -> Result<(), String> {
        let obj = inputs
            .as_object()
            .ok_or_else(|| "tool inputs must be a JSON object".to_string())?;
        for param in &self.params {
            if param.required && !obj.contains_key(&param.name) {
                return Err(format!(
                    "missing required param '{}' for tool '{}'",
                    param.name,
                    self.qualified_name()
                ));
            }
        }
        Ok(())
    }
}

/// Registry of all tools known to this process, keyed by `provider.name`.
/// Built once at startup from configuration; never mutated at request time.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: ToolDefinition) {
        self.tools.insert(tool.qualified_name(), tool);
    }

    pub fn get(&self, provider: &str, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(&format!("{provider}.{name}"))
    }

    pub fn contains(&self, provider: &str, name: &str) -> bool {
        self.tools.contains_key(&format!("{provider}.{name}"))
    }

    pub fn all(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Renders the "available tools" section of the Compiler's system
    /// prompt (spec.md section 4.3) so the prompt can never drift from what
    /// the Runtime will actually accept.
    pub fn system_prompt_fragment(&self) -> String {
        let mut tools: Vec<&ToolDefinition> = self.tools.values().collect();
        tools.sort_by(|a, b| a.qualified_name().cmp(&b.qualified_name()));

        let mut out = String::from("Available tools:\n");
        for tool in tools {
            let params = tool
                .params
                .iter()
                .map(|p| {
                    format!(
                        "{}{}: {} ({})",
                        p.name,
                        if p.required { "" } else { "?" },
                        p.schema_type,
                        p.description
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(
                "- {} [{:?}]: {} | params: {}\n",
                tool.qualified_name(),
                tool.category,
                tool.description,
                params
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tool() -> ToolDefinition {
        ToolDefinition {
            provider: "gmail".into(),
            name: "send_email".into(),
            category: ToolCategory::Write,
            description: "send an email".into(),
            params: vec![
                ToolParam {
                    name: "to".into(),
                    schema_type: "string".into(),
                    required: true,
                    description: "recipient".into(),
                },
                ToolParam {
                    name: "cc".into(),
                    schema_type: "string".into(),
                    required: false,
                    description: "cc recipient".into(),
                },
            ],
        }
    }

    #[test]
    fn registry_looks_up_by_provider_and_name() {
        let mut reg = ToolRegistry::new();
        reg.register(sample_tool());
        assert!(reg.contains("gmail", "send_email"));
        assert!(!reg.contains("gmail", "delete_email"));
        assert_eq!(reg.get("gmail", "send_email").unwrap().category, ToolCategory::Write);
    }

    #[test]
    fn validate_inputs_rejects_missing_required_param() {
        let tool = sample_tool();
        let err = tool.validate_inputs(&serde_json::json!({"cc": "x@y.com"})).unwrap_err();
        assert!(err.contains("to"));
        assert!(tool.validate_inputs(&serde_json::json!({"to": "a@b.com"})).is_ok());
    }

    #[test]
    fn validate_inputs_rejects_non_object() {
        let tool = sample_tool();
        assert!(tool.validate_inputs(&serde_json::json!("not an object")).is_err());
    }
}
