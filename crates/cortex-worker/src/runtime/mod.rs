// Runtime (spec.md section 4.5): executes a Run's action chain and durably
// logs each step. Grounded on the teacher's `durable::worker::pool` for the
// bounded-concurrency vocabulary and `cortex_core::retry::RetryPolicy`
// (itself ported from `durable::reliability::retry`) for the jittered
// backoff loop around each step.

pub mod template;

use crate::matcher::operators;
use cortex_core::error::{CortexError, Result};
use cortex_core::model::{Action, ActionKind, Event, Run, RunStatus, RunStep, RunStepStatus};
use cortex_core::retry::RetryPolicy;
use cortex_core::traits::{LlmClient, LlmMessage, ToolExecutor};
use cortex_core::tools::ToolRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use template::TemplateContext;
use tokio::sync::Semaphore;
use tracing::{info, warn};

pub struct Runtime {
    store: Arc<cortex_storage::Store>,
    tools: Arc<ToolRegistry>,
    tool_executor: Arc<dyn ToolExecutor>,
    llm: Arc<dyn LlmClient>,
    concurrency: Arc<Semaphore>,
    retry_policy: RetryPolicy,
    wait_max: Duration,
}

impl Runtime {
    pub fn new(
        store: Arc<cortex_storage::Store>,
        tools: Arc<ToolRegistry>,
        tool_executor: Arc<dyn ToolExecutor>,
        llm: Arc<dyn LlmClient>,
        pool_size: usize,
        wait_max: Duration,
    ) -> Self {
        Self {
            store,
            tools,
            tool_executor,
            llm,
            concurrency: Arc::new(Semaphore::new(pool_size.max(1))),
            retry_policy: RetryPolicy::default(),
            wait_max,
        }
    }

    /// Executes `run`'s Unit-defined action chain end to end: transitions
    /// `pending -> running`, walks each action in declared order, and
    /// transitions to a terminal status on exit (spec.md section 4.5).
    pub async fn execute(&self, run: &Run, event: &Event, actions: &[Action]) -> Result<()> {
        let _permit = self.concurrency.acquire().await;

        self.store.start_run(run.id).await?;
        info!(run_id = %run.id, unit_id = %run.unit_id, "run started");

        let mut step_outputs: Vec<Value> = Vec::with_capacity(actions.len());
        let mut skip_remaining = false;
        let mut failure: Option<String> = None;

        for (index, action) in actions.iter().enumerate() {
            if skip_remaining {
                let step = self.store.append_step(run.id, index as i32, action_kind_str(action.kind), action.params.clone()).await?;
                self.store.finish_step(step.id, RunStepStatus::Skipped, None, None, 0).await?;
                step_outputs.push(Value::Null);
                continue;
            }

            let step = self.store.append_step(run.id, index as i32, action_kind_str(action.kind), action.params.clone()).await?;
            let ctx = TemplateContext { event, steps: &step_outputs };

            match self.execute_action(action, &step, &ctx).await {
                StepOutcome::Completed(output) => {
                    step_outputs.push(json!({ "output": output }));
                }
                StepOutcome::Skipped => {
                    step_outputs.push(Value::Null);
                    skip_remaining = true;
                }
                StepOutcome::Failed(error) => {
                    step_outputs.push(Value::Null);
                    if action.continue_on_error {
                        warn!(run_id = %run.id, step = index, %error, "step failed, continuing (continue_on_error)");
                    } else {
                        failure = Some(error);
                        skip_remaining = true;
                    }
                }
            }
        }

        let final_status = if failure.is_some() { RunStatus::Failed } else { RunStatus::Completed };
        self.store.finish_run(run.id, final_status, failure.clone()).await?;
        info!(run_id = %run.id, status = %final_status, "run finished");

        match failure {
            Some(e) => Err(CortexError::permanent(e)),
            None => Ok(()),
        }
    }

    async fn execute_action(&self, action: &Action, step: &RunStep, ctx: &TemplateContext<'_>) -> StepOutcome {
        match action.kind {
            ActionKind::Noop => {
                self.complete_step(step, Value::Null).await;
                StepOutcome::Completed(Value::Null)
            }
            ActionKind::Wait => self.execute_wait(action, step).await,
            ActionKind::Check => self.execute_check(action, step, ctx).await,
            ActionKind::Tool | ActionKind::Notify => self.execute_tool_like(action, step, ctx).await,
            ActionKind::Llm => self.execute_llm(action, step, ctx).await,
        }
    }

    /// `check`: evaluate a rule condition against the accumulated context
    /// (the triggering event plus every prior step's output). A failing
    /// check marks itself, and every subsequent step, `skipped` rather than
    /// failing the Run (spec.md section 4.5). `field` is rooted the same
    /// way `runtime::template`'s placeholders are: `event.payload.*` or
    /// `steps.<index>.output.*`.
    async fn execute_check(&self, action: &Action, step: &RunStep, ctx: &TemplateContext<'_>) -> StepOutcome {
        let start = Instant::now();
        let field = action.params.get("field").and_then(Value::as_str).unwrap_or("");
        let operator = match action
            .params
            .get("operator")
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_value(json!(s)).ok())
        {
            Some(op) => op,
            None => {
                let error = "check action missing a valid 'operator'".to_string();
                self.finish_step_timed(step, RunStepStatus::Failed, None, Some(error.clone()), start).await;
                return StepOutcome::Failed(error);
            }
        };
        let value = action.params.get("value");

        let context = match serde_json::to_value(ctx.event) {
            Ok(event) => json!({ "event": event, "steps": ctx.steps }),
            Err(e) => {
                let error = format!("failed to build check context: {e}");
                self.finish_step_timed(step, RunStepStatus::Failed, None, Some(error.clone()), start).await;
                return StepOutcome::Failed(error);
            }
        };
        let passed = operators::evaluate(&context, field, operator, value);

        if passed {
            self.finish_step_timed(step, RunStepStatus::Completed, Some(json!({"passed": true})), None, start).await;
            StepOutcome::Completed(json!({"passed": true}))
        } else {
            self.finish_step_timed(step, RunStepStatus::Skipped, Some(json!({"passed": false})), None, start).await;
            StepOutcome::Skipped
        }
    }

    async fn execute_wait(&self, action: &Action, step: &RunStep) -> StepOutcome {
        let start = Instant::now();
        let ms = action.params.get("ms").and_then(Value::as_u64).unwrap_or(0);
        let duration = Duration::from_millis(ms).min(self.wait_max);
        tokio::time::sleep(duration).await;
        self.finish_step_timed(step, RunStepStatus::Completed, Some(json!({"slept_ms": duration.as_millis() as u64})), None, start).await;
        StepOutcome::Completed(json!({"slept_ms": duration.as_millis() as u64}))
    }

    /// `tool` and `notify` share a failure policy (spec.md section 4.5:
    /// "notify: a specialized tool call ... subject to the same failure
    /// policy as tool"): resolve `(provider, toolName)`, template the
    /// inputs, and retry transient failures with jittered backoff.
    async fn execute_tool_like(&self, action: &Action, step: &RunStep, ctx: &TemplateContext<'_>) -> StepOutcome {
        let start = Instant::now();
        let provider = action.params.get("provider").and_then(Value::as_str).unwrap_or("");
        let tool_name = action.params.get("tool_name").and_then(Value::as_str).unwrap_or("");

        let Some(tool) = self.tools.get(provider, tool_name) else {
            let error = format!("unknown tool '{provider}.{tool_name}'");
            self.finish_step_timed(step, RunStepStatus::Failed, None, Some(error.clone()), start).await;
            return StepOutcome::Failed(error);
        };

        let raw_inputs = action.params.get("inputs").cloned().unwrap_or(json!({}));
        let inputs = match template::render(&raw_inputs, ctx) {
            Ok(v) => v,
            Err(e) => {
                let error = format!("template substitution failed: {e}");
                self.finish_step_timed(step, RunStepStatus::Failed, None, Some(error.clone()), start).await;
                return StepOutcome::Failed(error);
            }
        };

        if let Err(e) = tool.validate_inputs(&inputs) {
            self.finish_step_timed(step, RunStepStatus::Failed, None, Some(e.clone()), start).await;
            return StepOutcome::Failed(e);
        }

        let user_id = event_user_id(ctx);
        self.run_with_retry(step, start, || {
            let executor = self.tool_executor.clone();
            let provider = provider.to_string();
            let tool_name = tool_name.to_string();
            let inputs = inputs.clone();
            Box::pin(async move { executor.execute(user_id, &provider, &tool_name, inputs).await.map(|o| o.output) })
        })
        .await
    }

    async fn execute_llm(&self, action: &Action, step: &RunStep, ctx: &TemplateContext<'_>) -> StepOutcome {
        let start = Instant::now();
        let raw_prompt = action.params.get("prompt").and_then(Value::as_str).unwrap_or("");
        let prompt = match template::render(&json!(raw_prompt), ctx) {
            Ok(Value::String(s)) => s,
            Ok(other) => other.to_string(),
            Err(e) => {
                let error = format!("template substitution failed: {e}");
                self.finish_step_timed(step, RunStepStatus::Failed, None, Some(error.clone()), start).await;
                return StepOutcome::Failed(error);
            }
        };

        self.run_with_retry(step, start, || {
            let llm = self.llm.clone();
            let prompt = prompt.clone();
            Box::pin(async move {
                let text = llm.complete(&[LlmMessage::user(prompt)], 0.2).await?;
                Ok(json!({ "text": text }))
            })
        })
        .await
    }

    /// Jittered-backoff retry loop shared by `tool`, `notify`, and `llm`
    /// steps (spec.md section 4.5: "retry with jittered exponential
    /// backoff, maxAttempts=3 by default for transient errors").
    async fn run_with_retry<F>(&self, step: &RunStep, start: Instant, mut attempt_fn: F) -> StepOutcome
    where
        F: FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value>> + Send>>,
    {
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Ok(output) => {
                    let _ = self.store.record_attempt(step.id, attempt as i32).await;
                    self.finish_step_timed(step, RunStepStatus::Completed, Some(output.clone()), None, start).await;
                    return StepOutcome::Completed(output);
                }
                Err(e) if e.is_retryable() && self.retry_policy.has_attempts_remaining(attempt) => {
                    let _ = self.store.record_attempt(step.id, attempt as i32).await;
                    let delay = self.retry_policy.delay_for_attempt(attempt + 1);
                    warn!(step_id = %step.id, attempt, delay_ms = delay.as_millis() as u64, "step failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    let _ = self.store.record_attempt(step.id, attempt as i32).await;
                    let error = e.to_string();
                    self.finish_step_timed(step, RunStepStatus::Failed, None, Some(error.clone()), start).await;
                    return StepOutcome::Failed(error);
                }
            }
        }
    }

    async fn complete_step(&self, step: &RunStep, output: Value) {
        let _ = self.store.finish_step(step.id, RunStepStatus::Completed, Some(output), None, 0).await;
    }

    async fn finish_step_timed(
        &self,
        step: &RunStep,
        status: RunStepStatus,
        output: Option<Value>,
        error: Option<String>,
        start: Instant,
    ) {
        let duration_ms = start.elapsed().as_millis() as i64;
        let _ = self.store.finish_step(step.id, status, output, error, duration_ms).await;
    }
}

enum StepOutcome {
    Completed(Value),
    Skipped,
    Failed(String),
}

fn action_kind_str(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Tool => "tool",
        ActionKind::Llm => "llm",
        ActionKind::Wait => "wait",
        ActionKind::Check => "check",
        ActionKind::Notify => "notify",
        ActionKind::Noop => "noop",
    }
}

fn event_user_id(ctx: &TemplateContext) -> uuid::Uuid {
    ctx.event.user_id
}
