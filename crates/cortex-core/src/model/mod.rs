mod connection;
mod event;
mod run;
mod unit;

pub use connection::Connection;
pub use event::{Event, WriteOutcome};
pub use run::{CreateRunOutcome, Run, RunStatus, RunStep, RunStepStatus};
pub use unit::{
    Action, ActionKind, Condition, ConditionKind, RuleOperator, Trigger, Unit, UnitStatus,
};
