// Process configuration loaded once at startup from the enumerated
// environment variables (spec.md section 6). Mirrors the teacher's
// `RunnerConfig::from_env` / `EncryptionService::from_env` pattern: parse
// everything up front, fail fast with `anyhow::Context` on missing
// required values, fall back to documented defaults for everything else.

use anyhow::{Context, Result};
use std::time::Duration;

/// Runtime mode, affects log verbosity and default worker-pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeMode {
    #[default]
    Development,
    Production,
}

impl std::str::FromStr for RuntimeMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(RuntimeMode::Production),
            "development" | "dev" | "" => Ok(RuntimeMode::Development),
            other => anyhow::bail!("Unknown RUNTIME_MODE: {other}"),
        }
    }
}

/// Process-wide configuration. Built once in `main` and handed down as
/// `Arc<AppConfig>` to every component that needs it.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Relational store connection string.
    pub store_url: String,
    /// Fast KV cache tier connection string. The in-process `KvCache` is
    /// always available; `cache_url` is reserved for a future networked
    /// tier and is only required to be set, never dialed, by this crate.
    pub cache_url: Option<String>,
    /// SaaS connector credential, used by `ToolExecutor`.
    pub saas_secret: Option<String>,
    /// Base URL of the SaaS-connector HTTP facade `HttpToolExecutor` calls.
    pub tool_base_url: String,
    /// LLM provider credential.
    pub llm_api_key: Option<String>,
    /// Which LLM provider to construct (`openai` default, or `anthropic`).
    pub llm_provider: String,
    /// HTTP port.
    pub port: u16,
    pub runtime_mode: RuntimeMode,

    /// Bounded worker pool sizes (spec.md section 5).
    pub shaper_pool_size: usize,
    pub matcher_pool_size: usize,
    pub runtime_pool_size: usize,

    /// Maximum `wait` action duration (spec.md section 4.5): 15 minutes.
    pub runtime_wait_max: Duration,

    /// Whether to retain the raw pre-shape payload alongside a shaped Event
    /// (spec.md section 9, open question; resolved as off-by-default).
    pub retain_raw_event_payloads: bool,
}

impl AppConfig {
    /// Load configuration from environment variables, applying the
    /// defaults documented in spec.md section 6 / SPEC_FULL.md section 1.
    pub fn from_env() -> Result<Self> {
        let store_url =
            std::env::var("STORE_URL").context("STORE_URL environment variable required")?;
        let cache_url = std::env::var("CACHE_URL").ok();
        let saas_secret = std::env::var("SAAS_SECRET").ok();
        let tool_base_url = std::env::var("TOOL_BASE_URL")
            .unwrap_or_else(|_| "https://connectors.internal".to_string());
        let llm_api_key = std::env::var("LLM_API_KEY").ok();
        let llm_provider =
            std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());

        let port = std::env::var("PORT")
            .ok()
            .map(|p| p.parse::<u16>())
            .transpose()
            .context("PORT must be a valid u16")?
            .unwrap_or(8080);

        let runtime_mode: RuntimeMode = std::env::var("RUNTIME_MODE")
            .unwrap_or_default()
            .parse()?;

        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let shaper_pool_size = env_usize("SHAPER_POOL_SIZE", 4)?;
        let matcher_pool_size = env_usize("MATCHER_POOL_SIZE", cpu_count.max(2) * 2)?;
        let runtime_pool_size = env_usize("RUNTIME_POOL_SIZE", cpu_count.max(1) * 8)?;

        let runtime_wait_max_ms = env_usize("RUNTIME_WAIT_MAX_MS", 15 * 60 * 1000)?;

        let retain_raw_event_payloads = std::env::var("RETAIN_RAW_EVENT_PAYLOADS")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            store_url,
            cache_url,
            saas_secret,
            tool_base_url,
            llm_api_key,
            llm_provider,
            port,
            runtime_mode,
            shaper_pool_size,
            matcher_pool_size,
            runtime_pool_size,
            runtime_wait_max: Duration::from_millis(runtime_wait_max_ms as u64),
            retain_raw_event_payloads,
        })
    }
}

fn env_usize(key: &str, default: usize) -> Result<usize> {
    match std::env::var(key) {
        Ok(v) => v.parse::<usize>().with_context(|| format!("{key} must be a valid usize")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_mode_parses_known_values() {
        assert_eq!("production".parse::<RuntimeMode>().unwrap(), RuntimeMode::Production);
        assert_eq!("dev".parse::<RuntimeMode>().unwrap(), RuntimeMode::Development);
        assert_eq!("".parse::<RuntimeMode>().unwrap(), RuntimeMode::Development);
        assert!("nonsense".parse::<RuntimeMode>().is_err());
    }
}
