// Default `ToolRegistry` contents for this deployment (spec.md section 9:
// "a registry populated at startup from a config file"). A real deployment
// would load this table from `TOOL_BASE_URL`'s own catalog endpoint or a
// static config file shipped alongside the binary; this workspace hardcodes
// a representative set spanning the three SaaS categories spec.md section 1
// names (mail, calendar, CRM) plus a notification channel for the `notify`
// action kind, enough to exercise every scenario in spec.md section 8.

use cortex_core::tools::{ToolCategory, ToolDefinition, ToolParam, ToolRegistry};

pub fn seeded_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for tool in default_tools() {
        registry.register(tool);
    }
    registry
}

fn param(name: &str, schema_type: &str, required: bool, description: &str) -> ToolParam {
    ToolParam {
        name: name.to_string(),
        schema_type: schema_type.to_string(),
        required,
        description: description.to_string(),
    }
}

fn default_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            provider: "gmail".into(),
            name: "send_email".into(),
            category: ToolCategory::Write,
            description: "Send an email from the connected mailbox".into(),
            params: vec![
                param("to", "string", true, "recipient address"),
                param("subject", "string", true, "email subject"),
                param("body", "string", true, "email body"),
            ],
        },
        ToolDefinition {
            provider: "gmail".into(),
            name: "read_thread".into(),
            category: ToolCategory::Read,
            description: "Read the messages in an email thread".into(),
            params: vec![param("thread_id", "string", true, "thread id")],
        },
        ToolDefinition {
            provider: "google_calendar".into(),
            name: "create_event".into(),
            category: ToolCategory::Write,
            description: "Create a calendar event".into(),
            params: vec![
                param("title", "string", true, "event title"),
                param("start_time", "string", true, "ISO-8601 start time"),
                param("end_time", "string", true, "ISO-8601 end time"),
            ],
        },
        ToolDefinition {
            provider: "google_calendar".into(),
            name: "list_events".into(),
            category: ToolCategory::Read,
            description: "List upcoming calendar events".into(),
            params: vec![param("since", "string", false, "ISO-8601 lower bound")],
        },
        ToolDefinition {
            provider: "salesforce".into(),
            name: "update_lead".into(),
            category: ToolCategory::Write,
            description: "Update a lead record".into(),
            params: vec![
                param("lead_id", "string", true, "lead record id"),
                param("fields", "object", true, "fields to update"),
            ],
        },
        ToolDefinition {
            provider: "salesforce".into(),
            name: "update_opportunity".into(),
            category: ToolCategory::Write,
            description: "Update an opportunity record".into(),
            params: vec![
                param("opportunity_id", "string", true, "opportunity record id"),
                param("fields", "object", true, "fields to update"),
            ],
        },
        ToolDefinition {
            provider: "salesforce".into(),
            name: "create_task".into(),
            category: ToolCategory::Write,
            description: "Create a follow-up task against a record".into(),
            params: vec![
                param("related_to", "string", true, "record id the task relates to"),
                param("subject", "string", true, "task subject"),
            ],
        },
        ToolDefinition {
            provider: "slack".into(),
            name: "send_message".into(),
            category: ToolCategory::Write,
            description: "Send a notification message to a channel or user".into(),
            params: vec![
                param("channel", "string", true, "channel or user id"),
                param("text", "string", true, "message text"),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_registry_contains_the_scenario_tools() {
        let registry = seeded_registry();
        assert!(registry.contains("gmail", "send_email"));
        assert!(registry.contains("slack", "send_message"));
        assert!(registry.contains("salesforce", "update_opportunity"));
        assert!(!registry.contains("gmail", "delete_everything"));
    }
}
