// HTTP client for OpenAI's chat completions endpoint. Grounded on
// `everruns-core/src/openai.rs`'s `OpenAIProtocolLlmProvider` (api_url
// constant, `new`/`from_env`/`with_base_url` constructors, message
// conversion helpers) and `everruns-openai/src/provider.rs`'s thin
// `OpenAiDriver` wrapper shape. Reworked from the teacher's streaming
// `chat_completion_stream` design to the spec's non-streaming
// `complete`/`complete_json` façade (spec.md section 4.6).

use async_trait::async_trait;
use cortex_core::error::{CortexError, Result};
use cortex_core::traits::{LlmClient, LlmMessage, LlmRole};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    model: String,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("LLM_API_KEY")
            .map_err(|_| CortexError::internal("LLM_API_KEY not set for OpenAI provider"))?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn convert_role(role: LlmRole) -> &'static str {
        match role {
            LlmRole::System => "system",
            LlmRole::User => "user",
            LlmRole::Assistant => "assistant",
        }
    }

    fn convert_messages(messages: &[LlmMessage]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|m| OpenAiMessage {
                role: Self::convert_role(m.role).to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    async fn call(&self, request: &OpenAiRequest) -> Result<String> {
        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| CortexError::transient(format!("OpenAI request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(CortexError::transient(format!("OpenAI {status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CortexError::permanent(format!("OpenAI {status}: {body}")));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| CortexError::permanent(format!("malformed OpenAI response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CortexError::permanent("OpenAI response contained no choices"))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[LlmMessage], temperature: f32) -> Result<String> {
        let request = OpenAiRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(messages),
            temperature,
            response_format: None,
        };
        self.call(&request).await
    }

    async fn complete_json(
        &self,
        messages: &[LlmMessage],
        schema: &Value,
        temperature: f32,
    ) -> Result<Value> {
        let mut converted = Self::convert_messages(messages);
        converted.push(OpenAiMessage {
            role: "system".to_string(),
            content: format!(
                "Respond with a single JSON object matching this schema, no prose: {schema}"
            ),
        });

        let request = OpenAiRequest {
            model: self.model.clone(),
            messages: converted,
            temperature,
            response_format: Some(OpenAiResponseFormat { r#type: "json_object".to_string() }),
        };

        let raw = self.call(&request).await?;
        serde_json::from_str(&raw)
            .map_err(|e| CortexError::permanent(format!("OpenAI returned non-JSON completion: {e}")))
    }
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAiResponseFormat {
    r#type: String,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAiResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_conversion_matches_openai_wire_names() {
        assert_eq!(OpenAiClient::convert_role(LlmRole::System), "system");
        assert_eq!(OpenAiClient::convert_role(LlmRole::User), "user");
        assert_eq!(OpenAiClient::convert_role(LlmRole::Assistant), "assistant");
    }

    #[test]
    fn builder_overrides_defaults() {
        let client = OpenAiClient::new("sk-test")
            .with_base_url("http://localhost:1234")
            .with_model("gpt-4o");
        assert_eq!(client.api_url, "http://localhost:1234");
        assert_eq!(client.model, "gpt-4o");
    }
}
