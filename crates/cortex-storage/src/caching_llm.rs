// Decorator adding the response cache from spec.md section 4.6 ("a thin
// façade with an in-memory response cache... Cache is purely a
// cost/latency optimization; functional correctness must not depend on
// cache hits") around any `LlmClient` implementation, so `cortex-openai`
// and `cortex-anthropic` stay cache-free and the cache is shared across
// whichever provider is active.

use async_trait::async_trait;
use cortex_core::dedup::llm_cache_key;
use cortex_core::error::Result;
use cortex_core::traits::{LlmClient, LlmMessage};
use serde_json::Value;
use std::sync::Arc;

use crate::cache::KvCache;

pub struct CachingLlmClient<T: LlmClient> {
    inner: T,
    cache: Arc<KvCache>,
}

impl<T: LlmClient> CachingLlmClient<T> {
    pub fn new(inner: T, cache: Arc<KvCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<T: LlmClient> LlmClient for CachingLlmClient<T> {
    async fn complete(&self, messages: &[LlmMessage], temperature: f32) -> Result<String> {
        let messages_json = serde_json::to_string(messages).unwrap_or_default();
        let key = llm_cache_key(&messages_json, None, temperature, None);

        if let Some(cached) = self.cache.get_llm_response(&key) {
            if let Some(text) = cached.as_str() {
                return Ok(text.to_string());
            }
        }

        let result = self.inner.complete(messages, temperature).await?;
        self.cache.put_llm_response(&key, Value::String(result.clone()));
        Ok(result)
    }

    async fn complete_json(
        &self,
        messages: &[LlmMessage],
        schema: &Value,
        temperature: f32,
    ) -> Result<Value> {
        let messages_json = serde_json::to_string(messages).unwrap_or_default();
        let schema_json = serde_json::to_string(schema).unwrap_or_default();
        let key = llm_cache_key(&messages_json, None, temperature, Some(&schema_json));

        if let Some(cached) = self.cache.get_llm_response(&key) {
            return Ok(cached);
        }

        let result = self.inner.complete_json(messages, schema, temperature).await?;
        self.cache.put_llm_response(&key, result.clone());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for CountingClient {
        async fn complete(&self, _messages: &[LlmMessage], _temperature: f32) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("response".to_string())
        }

        async fn complete_json(&self, _messages: &[LlmMessage], _schema: &Value, _temperature: f32) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({"ok": true}))
        }
    }

    #[tokio::test]
    async fn identical_calls_hit_the_cache() {
        let inner = CountingClient { calls: AtomicUsize::new(0) };
        let cache = Arc::new(KvCache::new());
        let client = CachingLlmClient::new(inner, cache);

        let messages = vec![LlmMessage::user("hello")];
        let first = client.complete(&messages, 0.2).await.unwrap();
        let second = client.complete(&messages, 0.2).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_temperature_misses_the_cache() {
        let inner = CountingClient { calls: AtomicUsize::new(0) };
        let cache = Arc::new(KvCache::new());
        let client = CachingLlmClient::new(inner, cache);

        let messages = vec![LlmMessage::user("hello")];
        client.complete(&messages, 0.1).await.unwrap();
        client.complete(&messages, 0.9).await.unwrap();

        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 2);
    }
}
