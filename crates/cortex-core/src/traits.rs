// Pluggable-backend seams (spec.md section 2). Concrete implementations
// live in sibling crates (`cortex-openai`, `cortex-anthropic`,
// `cortex-storage`) so this crate stays free of concrete I/O. Shaped after
// the teacher's `everruns_core::traits` module: an `#[async_trait]` with a
// single required method and default methods built on top where the spec
// calls for one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;

/// Role of a message in an LLM conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: LlmRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: LlmRole::User, content: content.into() }
    }
}

/// A thin façade over a single LLM provider (spec.md section 4.6): one
/// method per response shape, both backed by the same underlying call and
/// both eligible for the in-memory response cache applied by the caller
/// (see `cortex-storage::cache::CachingLlmClient`, which wraps an
/// implementation of this trait rather than this trait owning caching
/// itself — callers share one cache across providers).
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Free-form text completion.
    async fn complete(&self, messages: &[LlmMessage], temperature: f32) -> Result<String>;

    /// Completion constrained to a JSON schema. Implementations must return
    /// a `CortexError::Permanent` (not `Transient`) when the model's output
    /// fails schema validation — a malformed completion will not be fixed
    /// by retrying with the same prompt.
    async fn complete_json(
        &self,
        messages: &[LlmMessage],
        schema: &Value,
        temperature: f32,
    ) -> Result<Value>;
}

/// Outcome of a single tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub output: Value,
}

/// One raw record as synced by the SaaS-connector SDK's `records(...)`
/// primitive — schemaless at this boundary (spec.md section 9), shaped by
/// `EventShaper` downstream rather than here.
pub type RawRecord = Value;

/// Provider-agnostic façade over the SaaS-connector SDK's `proxy(...)`,
/// `records(...)`, and `action(...)` primitives (spec.md section 1 and
/// section 4.5's `tool` action kind). `read_records`/`resolve_connection`
/// back the out-of-scope sync/poll path and `ConnectionRegistry` health
/// checks respectively; only `execute` sits on the hot Runtime path.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        user_id: uuid::Uuid,
        provider: &str,
        tool_name: &str,
        inputs: Value,
    ) -> Result<ToolOutput>;

    /// Reads the provider-synced record cache for `model`, optionally
    /// bounded to records changed since `since`. Backs the poll-based
    /// ingestion path, out of scope here beyond this façade method.
    async fn read_records(
        &self,
        user_id: uuid::Uuid,
        provider: &str,
        model: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawRecord>>;

    /// Resolves the external connection id backing `(user_id, provider)`,
    /// independent of `ConnectionRegistry`'s own cached copy — used to
    /// validate a registry entry is still live.
    async fn resolve_connection(&self, user_id: uuid::Uuid, provider: &str) -> Result<String>;
}
