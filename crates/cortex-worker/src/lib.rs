//! Execution engine for Cortex: EventShaper, Compiler, Matcher, Runtime,
//! and the Dispatcher bounded worker pools wiring them together. This
//! crate has no HTTP surface of its own; `cortex-api` is the only caller.

pub mod compiler;
pub mod dispatcher;
pub mod matcher;
pub mod runtime;
pub mod shaper;
pub mod tools;

pub use compiler::{ClarificationNeeded, CompileOutcome, Compiler};
pub use dispatcher::{Dispatcher, DispatcherMetrics};
pub use matcher::Matcher;
pub use runtime::Runtime;
pub use shaper::{EventShaper, ShapeTask, ShapedEvent};
pub use tools::HttpToolExecutor;
