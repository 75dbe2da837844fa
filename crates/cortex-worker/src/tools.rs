// `HttpToolExecutor` (spec.md section 2 item 3 / SPEC_FULL.md section 8):
// the one concrete `ToolExecutor` this workspace ships, backed by
// `reqwest` against whatever SaaS-connector base URL `AppConfig` points at.
// Status-code-to-error-kind mapping mirrors `cortex_anthropic::provider`'s
// `call` method: 429/5xx are `Transient` (retried by Runtime), other 4xx
// are `Permanent`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cortex_core::config::AppConfig;
use cortex_core::error::{CortexError, Result};
use cortex_core::tools::ToolRegistry;
use cortex_core::traits::{RawRecord, ToolExecutor, ToolOutput};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub struct HttpToolExecutor {
    client: reqwest::Client,
    base_url: String,
    saas_secret: Option<String>,
    tools: Arc<ToolRegistry>,
}

impl HttpToolExecutor {
    pub fn new(config: &AppConfig, tools: Arc<ToolRegistry>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.tool_base_url.clone(),
            saas_secret: config.saas_secret.clone(),
            tools,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl ToolExecutor for HttpToolExecutor {
    /// Validates `inputs` against the registered tool's required params
    /// before making the call (spec.md section 9: schema validation against
    /// `ToolRegistry` entries "before the HTTP call is made"; a validation
    /// failure is `Permanent`, never a panic).
    async fn execute(&self, user_id: Uuid, provider: &str, tool_name: &str, inputs: Value) -> Result<ToolOutput> {
        let tool = self
            .tools
            .get(provider, tool_name)
            .ok_or_else(|| CortexError::permanent(format!("unknown tool '{provider}.{tool_name}'")))?;

        tool.validate_inputs(&inputs).map_err(CortexError::permanent)?;

        let mut request = self
            .client
            .post(format!("{}/v1/action", self.base_url))
            .json(&serde_json::json!({
                "user_id": user_id,
                "provider": provider,
                "action": tool_name,
                "inputs": inputs,
            }));

        if let Some(secret) = &self.saas_secret {
            request = request.bearer_auth(secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CortexError::transient(format!("tool call to {provider}.{tool_name} failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(CortexError::transient(format!("{provider}.{tool_name} returned {status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CortexError::permanent(format!("{provider}.{tool_name} returned {status}: {body}")));
        }

        let output: Value = response
            .json()
            .await
            .map_err(|e| CortexError::permanent(format!("malformed response from {provider}.{tool_name}: {e}")))?;

        Ok(ToolOutput { output })
    }

    /// Backs the out-of-scope poll path (SPEC_FULL.md section 8): calls the
    /// SaaS-connector SDK's `records(...)` primitive directly rather than
    /// going through `ToolRegistry`, since this reads a provider's synced
    /// cache rather than invoking a registered write/read tool action.
    async fn read_records(
        &self,
        user_id: Uuid,
        provider: &str,
        model: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawRecord>> {
        let mut request = self.client.get(format!("{}/v1/records", self.base_url)).query(&[
            ("user_id", user_id.to_string()),
            ("provider", provider.to_string()),
            ("model", model.to_string()),
        ]);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }
        if let Some(secret) = &self.saas_secret {
            request = request.bearer_auth(secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CortexError::transient(format!("record read for {provider}.{model} failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(CortexError::transient(format!("{provider}.{model} record read returned {status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CortexError::permanent(format!("{provider}.{model} record read returned {status}: {body}")));
        }

        response
            .json::<Vec<RawRecord>>()
            .await
            .map_err(|e| CortexError::permanent(format!("malformed record response from {provider}.{model}: {e}")))
    }

    /// Backs `ConnectionRegistry` health checks (SPEC_FULL.md section 8):
    /// resolves the connector's own view of `(user_id, provider)`'s
    /// external connection id, independent of the Store's cached copy.
    async fn resolve_connection(&self, user_id: Uuid, provider: &str) -> Result<String> {
        let mut request = self
            .client
            .get(format!("{}/v1/connections/{provider}", self.base_url))
            .query(&[("user_id", user_id.to_string())]);
        if let Some(secret) = &self.saas_secret {
            request = request.bearer_auth(secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CortexError::transient(format!("connection resolve for {provider} failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(CortexError::transient(format!("{provider} connection resolve returned {status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CortexError::permanent(format!("{provider} connection resolve returned {status}: {body}")));
        }

        #[derive(Deserialize)]
        struct ConnectionResponse {
            connection_id: String,
        }
        let parsed: ConnectionResponse = response
            .json()
            .await
            .map_err(|e| CortexError::permanent(format!("malformed connection response for {provider}: {e}")))?;
        Ok(parsed.connection_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::tools::{ToolCategory, ToolDefinition, ToolParam};

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

    #[tokio::test]
    async fn rejects_unknown_tool_without_making_a_call() {
        let executor = HttpToolExecutor {
            client: reqwest::Client::new(),
            base_url: "http://127.0.0.1:1".into(),
            saas_secret: None,
            tools: registry(),
        };
        let err = executor
            .execute(Uuid::new_v4(), "gmail", "delete_everything", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), cortex_core::error::ErrorKind::Permanent);
    }

    #[tokio::test]
    async fn rejects_missing_required_param_without_making_a_call() {
        let executor = HttpToolExecutor {
            client: reqwest::Client::new(),
            base_url: "http://127.0.0.1:1".into(),
            saas_secret: None,
            tools: registry(),
        };
        let err = executor
            .execute(Uuid::new_v4(), "gmail", "send_email", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), cortex_core::error::ErrorKind::Permanent);
    }
}
