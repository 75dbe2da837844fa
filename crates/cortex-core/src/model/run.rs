use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use super::unit::ActionKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "paused" => Ok(RunStatus::Paused),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// One attempted execution of a Unit for a specific Event. At most one Run
/// exists per `(unit_id, event_id)`, enforced by a Store unique constraint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Run {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of `Store::create_run`: a duplicate `(unit_id, event_id)` is not
/// an error, it collapses into a no-op (spec.md section 7, Conflict kind).
#[derive(Debug)]
pub enum CreateRunOutcome {
    Created(Run),
    Duplicate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum RunStepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for RunStepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStepStatus::Pending => "pending",
            RunStepStatus::Running => "running",
            RunStepStatus::Completed => "completed",
            RunStepStatus::Failed => "failed",
            RunStepStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

impl RunStepStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStepStatus::Pending | RunStepStatus::Running)
    }
}

/// One action executed within a Run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct RunStep {
    pub id: Uuid,
    pub run_id: Uuid,
    pub index: i32,
    pub action_kind: ActionKind,
    pub input: Value,
    pub output: Option<Value>,
    pub status: RunStepStatus,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
    pub attempts: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_round_trips() {
        for s in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Paused,
        ] {
            assert_eq!(s, s.to_string().parse().unwrap());
        }
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
    }
}
