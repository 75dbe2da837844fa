// Deterministic key derivation for Events, Runs, and the semantic-condition
// cache. Same hashing approach as the teacher's `api_key::hash_api_key`
// (SHA-256 + hex), applied to a canonical, order-stable input string so
// that identical inputs always collapse to the same key (spec.md section
// 4.2's dedup key and section 4.4's semantic-condition cache key).

use sha2::{Digest, Sha256};
use uuid::Uuid;

fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\x1f"); // unit separator, avoids field-boundary collisions
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// `dedupKey = hash(userId, source, type, recordId, salientDelta)` (spec.md section 4.2).
pub fn event_dedup_key(
    user_id: Uuid,
    source: &str,
    event_type: &str,
    record_id: &str,
    salient_delta: &str,
) -> String {
    hash_parts(&[
        &user_id.to_string(),
        source,
        event_type,
        record_id,
        salient_delta,
    ])
}

/// A deterministic Event id derived from its dedup key, so that redelivering
/// the same webhook payload is naturally idempotent at the storage layer
/// without a separate lookup (spec.md section 3: "id (deterministic, see 4.2)").
pub fn event_id_from_dedup_key(user_id: Uuid, dedup_key: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{user_id}:{dedup_key}").as_bytes())
}

/// Semantic-condition cache key: `hash(unitId, conditionIndex, event.dedupKey)` (spec.md section 4.4).
pub fn semantic_condition_cache_key(unit_id: Uuid, condition_index: usize, event_dedup_key: &str) -> String {
    hash_parts(&[
        &unit_id.to_string(),
        &condition_index.to_string(),
        event_dedup_key,
    ])
}

/// LLM response cache key: SHA-256 over `(messages, systemPrompt, temperature, schema)` (spec.md section 4.6).
pub fn llm_cache_key(
    messages_json: &str,
    system_prompt: Option<&str>,
    temperature: f32,
    schema_json: Option<&str>,
) -> String {
    hash_parts(&[
        messages_json,
        system_prompt.unwrap_or(""),
        &temperature.to_bits().to_string(),
        schema_json.unwrap_or(""),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_dedup_key_is_deterministic() {
        let uid = Uuid::nil();
        let a = event_dedup_key(uid, "email", "email_received", "m1", "");
        let b = event_dedup_key(uid, "email", "email_received", "m1", "");
        assert_eq!(a, b);
    }

    #[test]
    fn event_dedup_key_differs_on_any_field() {
        let uid = Uuid::nil();
        let base = event_dedup_key(uid, "email", "email_received", "m1", "");
        assert_ne!(base, event_dedup_key(uid, "calendar", "email_received", "m1", ""));
        assert_ne!(base, event_dedup_key(uid, "email", "email_reply_received", "m1", ""));
        assert_ne!(base, event_dedup_key(uid, "email", "email_received", "m2", ""));
    }

    #[test]
    fn event_id_is_a_pure_function_of_inputs() {
        let uid = Uuid::nil();
        let key = event_dedup_key(uid, "email", "email_received", "m1", "");
        assert_eq!(event_id_from_dedup_key(uid, &key), event_id_from_dedup_key(uid, &key));
    }

    #[test]
    fn hash_parts_is_not_vulnerable_to_naive_concatenation_collisions() {
        // "ab" + "c" must not collide with "a" + "bc" once a separator is used.
        let x = hash_parts(&["ab", "c"]);
        let y = hash_parts(&["a", "bc"]);
        assert_ne!(x, y);
    }
}
