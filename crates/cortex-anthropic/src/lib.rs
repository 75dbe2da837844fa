//! Anthropic-backed [`cortex_core::traits::LlmClient`].

mod provider;

pub use provider::AnthropicClient;
