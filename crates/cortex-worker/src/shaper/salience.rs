// Centralized salient-field table (spec.md section 9, Open Question:
// "the exact set of salient fields per source is scattered across the
// source; an implementation should centralize this table"). This module is
// the single authority the rest of the shaper, and the Compiler's
// generated system prompt fragment, consult. See SPEC_FULL.md section 3
// for the prose version of this table.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Closed mapping from a Nango-style `providerConfigKey` to one of the three
/// sources the rest of the pipeline understands (spec.md section 4.1/4.2).
pub fn source_for_provider_key(provider_key: &str) -> Option<&'static str> {
    match provider_key {
        "google-mail" | "gmail" | "outlook" | "microsoft-mail" => Some("email"),
        "google-calendar" | "outlook-calendar" => Some("calendar"),
        "salesforce" | "hubspot" | "pipedrive" => Some("crm"),
        _ => None,
    }
}

/// Record kind within a source, derived from the webhook's `model` field.
/// `crm` has two distinct record kinds (`lead`, `opportunity`) with
/// different salience tables; `email` and `calendar` have one each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    EmailMessage,
    CalendarEvent,
    CrmLead,
    CrmOpportunity,
}

impl RecordKind {
    pub fn from_source_and_model(source: &str, model: &str) -> Option<Self> {
        match (source, model.to_ascii_lowercase().as_str()) {
            ("email", _) => Some(RecordKind::EmailMessage),
            ("calendar", _) => Some(RecordKind::CalendarEvent),
            ("crm", m) if m.contains("lead") => Some(RecordKind::CrmLead),
            ("crm", m) if m.contains("opportunity") => Some(RecordKind::CrmOpportunity),
            _ => None,
        }
    }

    /// The fields whose change is meaningful enough to emit an event
    /// (SPEC_FULL.md section 3's table, column "salient fields").
    pub fn salient_fields(&self) -> &'static [&'static str] {
        match self {
            RecordKind::EmailMessage => &["from", "to", "subject", "in_reply_to", "thread_id"],
            RecordKind::CalendarEvent => {
                &["status", "start_time", "end_time", "attendees", "location"]
            }
            RecordKind::CrmLead => &["status", "is_converted", "owner_id"],
            RecordKind::CrmOpportunity => &["stage_name", "is_won", "is_closed", "amount"],
        }
    }

    pub fn creation_event(&self) -> &'static str {
        match self {
            RecordKind::EmailMessage => "email_received",
            RecordKind::CalendarEvent => "event_created",
            RecordKind::CrmLead => "lead_created",
            RecordKind::CrmOpportunity => "opportunity_created",
        }
    }

    /// Whether raw `deleted` records produce a `*_deleted` event for this
    /// kind (SPEC_FULL.md section 3, Open Question 3: deletion handling is
    /// per-source; email does not surface one).
    pub fn deletion_event(&self) -> Option<&'static str> {
        match self {
            RecordKind::EmailMessage => None,
            RecordKind::CalendarEvent => Some("event_deleted"),
            RecordKind::CrmLead => None,
            RecordKind::CrmOpportunity => None,
        }
    }
}

/// Default noreply/automated-sender patterns for the email noise filter
/// (spec.md section 4.2 step 2). Configurable in principle; this is the
/// documented default set from SPEC_FULL.md section 3.
fn noreply_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        ["^noreply@", "^no-reply@", "^notifications@"]
            .iter()
            .map(|p| Regex::new(p).expect("static noreply pattern is valid"))
            .collect()
    })
}

/// Whether an `added` email record should be skipped as automated noise
/// (spec.md section 4.2 step 2: "Skip records matching the source's
/// automated/noise filter").
pub fn is_noise_email(record: &Value) -> bool {
    let from = record
        .get("from")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_ascii_lowercase();
    noreply_patterns().iter().any(|re| re.is_match(&from))
}

const ALL_RECORD_KINDS: [RecordKind; 4] = [
    RecordKind::EmailMessage,
    RecordKind::CalendarEvent,
    RecordKind::CrmLead,
    RecordKind::CrmOpportunity,
];

/// Renders the "available event types" section of the Compiler's system
/// prompt (spec.md section 4.3), generated from this module's table rather
/// than hand-maintained, so it cannot drift from what the Shaper actually
/// emits (SPEC_FULL.md section 4).
pub fn system_prompt_fragment() -> String {
    let mut out = String::from("Available event types:\n");
    for kind in ALL_RECORD_KINDS {
        out.push_str(&format!("- {} (fields: {})\n", kind.creation_event(), kind.salient_fields().join(", ")));
        if let Some(deletion) = kind.deletion_event() {
            out.push_str(&format!("- {deletion}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_known_provider_keys_to_sources() {
        assert_eq!(source_for_provider_key("google-mail"), Some("email"));
        assert_eq!(source_for_provider_key("google-calendar"), Some("calendar"));
        assert_eq!(source_for_provider_key("salesforce"), Some("crm"));
        assert_eq!(source_for_provider_key("unknown-provider"), None);
    }

    #[test]
    fn record_kind_distinguishes_crm_models() {
        assert_eq!(
            RecordKind::from_source_and_model("crm", "SalesforceLead"),
            Some(RecordKind::CrmLead)
        );
        assert_eq!(
            RecordKind::from_source_and_model("crm", "SalesforceOpportunity"),
            Some(RecordKind::CrmOpportunity)
        );
    }

    #[test]
    fn noise_filter_matches_default_patterns() {
        assert!(is_noise_email(&json!({"from": "noreply@acme.com"})));
        assert!(is_noise_email(&json!({"from": "notifications@acme.com"})));
        assert!(!is_noise_email(&json!({"from": "manager@acme.com"})));
    }

    #[test]
    fn only_calendar_and_no_sources_emit_deletion_events() {
        assert_eq!(RecordKind::CalendarEvent.deletion_event(), Some("event_deleted"));
        assert_eq!(RecordKind::EmailMessage.deletion_event(), None);
        assert_eq!(RecordKind::CrmLead.deletion_event(), None);
        assert_eq!(RecordKind::CrmOpportunity.deletion_event(), None);
    }
}
