//! Persistent Store and in-process fast KV cache tier for Cortex.

pub mod cache;
pub mod caching_llm;
pub mod models;
pub mod store;

pub use cache::{KvCache, SharedKvCache};
pub use caching_llm::CachingLlmClient;
pub use store::Store;
