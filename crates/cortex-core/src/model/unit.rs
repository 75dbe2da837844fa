use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// `active | paused | disabled` (spec.md section 3). Only `Active` units are
/// considered by the Matcher; a status change never cancels in-flight Runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Active,
    Paused,
    Disabled,
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnitStatus::Active => "active",
            UnitStatus::Paused => "paused",
            UnitStatus::Disabled => "disabled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for UnitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UnitStatus::Active),
            "paused" => Ok(UnitStatus::Paused),
            "disabled" => Ok(UnitStatus::Disabled),
            other => Err(format!("unknown unit status: {other}")),
        }
    }
}

/// The `(source, type)` selector of a Unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(deny_unknown_fields)]
pub struct Trigger {
    pub source: String,
    pub event_type: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Rule,
    Semantic,
}

/// Operators available to a rule condition (spec.md section 4.3's condition grammar).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "camelCase")]
pub enum RuleOperator {
    Eq,
    Neq,
    In,
    NotIn,
    Contains,
    StartsWith,
    Between,
    Gt,
    Gte,
    Lt,
    Lte,
    IsNull,
    IsNotNull,
}

/// One predicate over an Event's payload. `Rule` conditions are deterministic
/// and LLM-free; `Semantic` conditions carry a free-form prompt evaluated by
/// the Matcher against a templated payload subset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub kind: ConditionKind,
    /// JSON pointer-style dotted path into the event payload. Required for
    /// `Rule` conditions; for `Semantic` conditions it scopes which fields
    /// are interpolated into the LLM prompt.
    pub field: String,
    pub operator: Option<RuleOperator>,
    pub value: Option<Value>,
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Tool,
    Llm,
    Wait,
    Check,
    Notify,
    Noop,
}

/// One step in a Unit's action chain. `params` carries kind-specific fields
/// (e.g. `provider`/`tool_name`/`inputs` for `Tool`, `ms` for `Wait`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(deny_unknown_fields)]
pub struct Action {
    pub kind: ActionKind,
    pub params: Value,
    #[serde(default)]
    pub continue_on_error: bool,
}

/// A compiled automation rule owned by a user (spec.md section 3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Unit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub raw_prompt: String,
    pub trigger: Trigger,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    pub status: UnitStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Unit {
    pub fn is_active(&self) -> bool {
        self.status == UnitStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_status_round_trips_through_display_and_fromstr() {
        for s in [UnitStatus::Active, UnitStatus::Paused, UnitStatus::Disabled] {
            let rendered = s.to_string();
            let parsed: UnitStatus = rendered.parse().unwrap();
            assert_eq!(s, parsed);
        }
        assert!("bogus".parse::<UnitStatus>().is_err());
    }
}
