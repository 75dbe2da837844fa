// HTTP client for Anthropic's Messages API. Same structural grounding as
// `cortex_openai::provider` (itself grounded on
// `everruns-core/src/openai.rs` / `everruns-openai/src/provider.rs`):
// system prompt is a separate top-level field rather than a message with
// role `system`, and there is no native `response_format` knob, so JSON
// constraint is enforced by appending a system instruction and validating
// the returned text parses as JSON (spec.md section 4.6).

use async_trait::async_trait;
use cortex_core::error::{CortexError, Result};
use cortex_core::traits::{LlmClient, LlmMessage, LlmRole};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    model: String,
    max_tokens: u32,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("LLM_API_KEY")
            .map_err(|_| CortexError::internal("LLM_API_KEY not set for Anthropic provider"))?;
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

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Anthropic takes the system prompt out-of-band from the message
    /// list; fold any `System` messages into one string and pass the rest
    /// through as user/assistant turns.
    fn split_system_prompt(messages: &[LlmMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_parts = Vec::new();
        let mut turns = Vec::new();

        for m in messages {
            match m.role {
                LlmRole::System => system_parts.push(m.content.clone()),
                LlmRole::User => turns.push(AnthropicMessage { role: "user".to_string(), content: m.content.clone() }),
                LlmRole::Assistant => {
                    turns.push(AnthropicMessage { role: "assistant".to_string(), content: m.content.clone() })
                }
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, turns)
    }

    async fn call(&self, request: &AnthropicRequest) -> Result<String> {
        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| CortexError::transient(format!("Anthropic request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(CortexError::transient(format!("Anthropic {status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CortexError::permanent(format!("Anthropic {status}: {body}")));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| CortexError::permanent(format!("malformed Anthropic response: {e}")))?;

        parsed
            .content
            .into_iter()
            .find_map(|block| if block.block_type == "text" { Some(block.text) } else { None })
            .ok_or_else(|| CortexError::permanent("Anthropic response contained no text block"))
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, messages: &[LlmMessage], temperature: f32) -> Result<String> {
        let (system, turns) = Self::split_system_prompt(messages);
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system,
            messages: turns,
            temperature,
        };
        self.call(&request).await
    }

    async fn complete_json(
        &self,
        messages: &[LlmMessage],
        schema: &Value,
        temperature: f32,
    ) -> Result<Value> {
        let (system, turns) = Self::split_system_prompt(messages);
        let schema_instruction = format!(
            "Respond with a single JSON object matching this schema and nothing else, no prose, no markdown fences: {schema}"
        );
        let system = Some(match system {
            Some(existing) => format!("{existing}\n\n{schema_instruction}"),
            None => schema_instruction,
        });

        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system,
            messages: turns,
            temperature,
        };

        let raw = self.call(&request).await?;
        let trimmed = raw.trim().trim_start_matches("```json").trim_start_matches("```").trim_end_matches("```").trim();
        serde_json::from_str(trimmed)
            .map_err(|e| CortexError::permanent(format!("Anthropic returned non-JSON completion: {e}")))
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_are_folded_out_of_band() {
        let messages = vec![
            LlmMessage::system("be terse"),
            LlmMessage::user("hello"),
            LlmMessage { role: LlmRole::Assistant, content: "hi".to_string() },
        ];
        let (system, turns) = AnthropicClient::split_system_prompt(&messages);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, "user");
        assert_eq!(turns[1].role, "assistant");
    }

    #[test]
    fn no_system_messages_yields_none() {
        let messages = vec![LlmMessage::user("hello")];
        let (system, _turns) = AnthropicClient::split_system_prompt(&messages);
        assert!(system.is_none());
    }
}
