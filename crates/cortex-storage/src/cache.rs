// Fast in-process KV tier: ShaperState snapshots, dedup sets, and the LLM
// response cache (spec.md section 4.7 / section 6's KV namespace layout:
// `shaper:<source>:<userId>`, `dedup:event:<hash>`, `llm:cache:<hash>`).
// Grounded on the teacher's own dependency on `dashmap` in
// `crates/durable/Cargo.toml` for concurrent-map needs; TTL/LRU-by-eviction
// policy is original within the corpus (no teacher file implements a TTL
// cache directly) but follows spec.md section 9's explicit instruction to
// replace "ad-hoc in-memory caches" with "explicit TTL/LRU policies" rather
// than relying on GC.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// A single-process, sharded, TTL-expiring, capacity-bounded KV cache.
/// Eviction on overflow is oldest-insertion-first — an approximation of LRU
/// cheap enough to not need its own lock, matching spec.md section 9's
/// "explicit TTL/LRU policies" guidance without requiring a full LRU list.
pub struct TtlCache<V: Clone> {
    entries: DashMap<String, Entry<V>>,
    ttl: Duration,
    capacity: usize,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self { entries: DashMap::new(), ttl, capacity }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: String, value: V) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.evict_oldest();
        }
        self.entries.insert(key, Entry { value, inserted_at: Instant::now() });
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.inserted_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

/// `ShaperState` snapshot for a `(userId, source)` pair: `recordId ->
/// salientFields`, plus a version counter for optimistic concurrency
/// (spec.md section 4.7: "optimistic-concurrency on a monotonically
/// increasing version").
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ShaperSnapshot {
    pub records: std::collections::HashMap<String, Value>,
    pub version: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ShaperStateError {
    #[error("version conflict saving shaper state: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },
}

/// Fast KV tier facade. Shared across the Dispatcher's worker pools; all
/// entries are TTL'd, matching spec.md section 6's KV namespace layout.
pub struct KvCache {
    /// `shaper:<source>:<userId>` — 7-day inactivity TTL (spec.md section 4.2).
    shaper_state: TtlCache<ShaperSnapshot>,
    /// `dedup:event:<hash>` — 24h TTL (spec.md section 6).
    dedup_events: TtlCache<()>,
    /// `llm:cache:<hash>` — 5 minute TTL, 100-entry cap (spec.md section 4.6).
    llm_responses: TtlCache<Value>,
    /// Semantic-condition cache, 5 minute TTL (spec.md section 4.4).
    semantic_conditions: TtlCache<bool>,
}

impl Default for KvCache {
    fn default() -> Self {
        Self::new()
    }
}

impl KvCache {
    pub fn new() -> Self {
        Self {
            shaper_state: TtlCache::new(Duration::from_secs(7 * 24 * 3600), 10_000),
            dedup_events: TtlCache::new(Duration::from_secs(24 * 3600), 50_000),
            llm_responses: TtlCache::new(Duration::from_secs(5 * 60), 100),
            semantic_conditions: TtlCache::new(Duration::from_secs(5 * 60), 10_000),
        }
    }

    fn shaper_key(user_id: uuid::Uuid, source: &str) -> String {
        format!("shaper:{source}:{user_id}")
    }

    pub fn load_shaper_state(&self, user_id: uuid::Uuid, source: &str) -> ShaperSnapshot {
        self.shaper_state
            .get(&Self::shaper_key(user_id, source))
            .unwrap_or_default()
    }

    /// Optimistic-concurrency write: fails if the stored version has moved
    /// since `expected_version` was read, so the caller can retry the diff.
    pub fn save_shaper_state(
        &self,
        user_id: uuid::Uuid,
        source: &str,
        expected_version: u64,
        mut new_state: ShaperSnapshot,
    ) -> Result<(), ShaperStateError> {
        let key = Self::shaper_key(user_id, source);
        let current_version = self.shaper_state.get(&key).map(|s| s.version).unwrap_or(0);
        if current_version != expected_version {
            return Err(ShaperStateError::VersionConflict {
                expected: expected_version,
                found: current_version,
            });
        }
        new_state.version = current_version + 1;
        self.shaper_state.insert(key, new_state);
        Ok(())
    }

    /// Returns `true` if this is the first time `hash` has been seen within
    /// the dedup TTL (i.e. the caller should persist the event); `false` if
    /// it is a duplicate.
    pub fn check_and_set_dedup(&self, hash: &str) -> bool {
        let key = format!("dedup:event:{hash}");
        if self.dedup_events.get(&key).is_some() {
            return false;
        }
        self.dedup_events.insert(key, ());
        true
    }

    pub fn get_llm_response(&self, hash: &str) -> Option<Value> {
        self.llm_responses.get(&format!("llm:cache:{hash}"))
    }

    pub fn put_llm_response(&self, hash: &str, value: Value) {
        self.llm_responses.insert(format!("llm:cache:{hash}"), value);
    }

    pub fn get_semantic_condition(&self, hash: &str) -> Option<bool> {
        self.semantic_conditions.get(hash)
    }

    pub fn put_semantic_condition(&self, hash: &str, result: bool) {
        self.semantic_conditions.insert(hash.to_string(), result);
    }
}

pub type SharedKvCache = Arc<KvCache>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_cache_expires_entries() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_millis(10), 10);
        cache.insert("k".to_string(), 1);
        assert_eq!(cache.get("k"), Some(1));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn ttl_cache_evicts_oldest_at_capacity() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert("a".to_string(), 1);
        std::thread::sleep(Duration::from_millis(5));
        cache.insert("b".to_string(), 2);
        std::thread::sleep(Duration::from_millis(5));
        cache.insert("c".to_string(), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn dedup_check_and_set_is_first_write_wins() {
        let kv = KvCache::new();
        assert!(kv.check_and_set_dedup("h1"));
        assert!(!kv.check_and_set_dedup("h1"));
        assert!(kv.check_and_set_dedup("h2"));
    }

    #[test]
    fn shaper_state_rejects_stale_version() {
        let kv = KvCache::new();
        let uid = uuid::Uuid::nil();
        kv.save_shaper_state(uid, "email", 0, ShaperSnapshot::default()).unwrap();
        let err = kv
            .save_shaper_state(uid, "email", 0, ShaperSnapshot::default())
            .unwrap_err();
        assert!(matches!(err, ShaperStateError::VersionConflict { .. }));

        // the correct next version still succeeds
        kv.save_shaper_state(uid, "email", 1, ShaperSnapshot::default()).unwrap();
    }
}
