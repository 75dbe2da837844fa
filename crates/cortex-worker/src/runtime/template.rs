// `{{path.segments}}` template interpreter for Runtime action inputs
// (spec.md section 4.5's "substitute {{path.in.prior.step.output}} and
// {{event.payload.*}} templates"; spec.md section 9's redesign note: "reject
// undefined paths at substitution time rather than silently emitting empty
// strings"). Two roots are recognized: `event` (the triggering Event) and
// `steps.<index>` (a prior RunStep's output). This is a distinct, stricter
// interpreter from `matcher::operators::field_value` — the Matcher's
// accessor is deliberately total (unknown path => false), while here an
// undefined path is a hard compile/runtime error, since a silently-empty
// substitution in a tool call body is a correctness bug, not a false match.

use cortex_core::error::{CortexError, Result};
use cortex_core::model::Event;
use serde_json::Value;

/// One `{{...}}` placeholder's resolved root context for templating a
/// Runtime action. `steps` is indexed by declaration order within the Run.
pub struct TemplateContext<'a> {
    pub event: &'a Event,
    pub steps: &'a [Value],
}

/// Finds every `{{path}}` placeholder in `input` and substitutes its
/// resolved value, returning `CortexError::Internal` if any placeholder
/// names an undefined path. Non-string JSON values are walked recursively;
/// string values have their placeholders substituted in place. A string
/// that is *exactly* one placeholder (e.g. `"{{event.payload.amount}}"`)
/// substitutes the raw JSON value (preserving type); a placeholder embedded
/// in a larger string substitutes its JSON-rendered form.
pub fn render(input: &Value, ctx: &TemplateContext) -> Result<Value> {
    match input {
        Value::String(s) => render_string(s, ctx),
        Value::Array(items) => Ok(Value::Array(
            items.iter().map(|v| render(v, ctx)).collect::<Result<Vec<_>>>()?,
        )),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render(v, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn render_string(s: &str, ctx: &TemplateContext) -> Result<Value> {
    if let Some(path) = whole_placeholder(s) {
        return resolve_path(path, ctx);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start..].find("}}") else {
            return Err(CortexError::internal(format!("unterminated template placeholder in '{s}'")));
        };
        out.push_str(&rest[..start]);
        let path = rest[start + 2..start + end].trim();
        let value = resolve_path(path, ctx)?;
        out.push_str(&value_to_interpolated_string(&value));
        rest = &rest[start + end + 2..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

/// If `s` is exactly one `{{path}}` placeholder with nothing else around
/// it, returns the trimmed path so the caller can preserve the resolved
/// value's native JSON type instead of stringifying it.
fn whole_placeholder(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

fn value_to_interpolated_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn resolve_path(path: &str, ctx: &TemplateContext) -> Result<Value> {
    let mut segments = path.split('.');
    let root = segments
        .next()
        .ok_or_else(|| CortexError::internal("empty template placeholder"))?;

    let mut current = match root {
        "event" => serde_json::to_value(ctx.event)
            .map_err(|e| CortexError::internal(format!("failed to render event for templating: {e}")))?,
        "steps" => {
            let index_segment = segments.next().ok_or_else(|| {
                CortexError::internal(format!("template path '{path}' references 'steps' without an index"))
            })?;
            let index: usize = index_segment
                .parse()
                .map_err(|_| CortexError::internal(format!("non-numeric step index in template path '{path}'")))?;
            ctx.steps
                .get(index)
                .cloned()
                .ok_or_else(|| CortexError::internal(format!("template path '{path}' references undefined step {index}")))?
        }
        other => {
            return Err(CortexError::internal(format!(
                "undefined template root '{other}' in path '{path}', expected 'event' or 'steps'"
            )))
        }
    };

    for segment in segments {
        current = match &current {
            Value::Object(map) => map.get(segment).cloned().ok_or_else(|| {
                CortexError::internal(format!("undefined template path '{path}' (no field '{segment}')"))
            })?,
            Value::Array(items) => {
                let idx: usize = segment
                    .parse()
                    .map_err(|_| CortexError::internal(format!("non-numeric array index in template path '{path}'")))?;
                items.get(idx).cloned().ok_or_else(|| {
                    CortexError::internal(format!("template path '{path}' index {idx} out of bounds"))
                })?
            }
            _ => {
                return Err(CortexError::internal(format!(
                    "cannot descend into scalar while resolving template path '{path}'"
                )))
            }
        };
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn sample_event() -> Event {
        Event {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            source: "email".into(),
            event_type: "email_received".into(),
            payload: json!({"from": "manager@acme.com", "amount": 500}),
            received_at: chrono::Utc::now(),
            dedup_key: "dk".into(),
        }
    }

    #[test]
    fn whole_placeholder_preserves_native_type() {
        let event = sample_event();
        let steps = vec![];
        let ctx = TemplateContext { event: &event, steps: &steps };
        let rendered = render(&json!("{{event.payload.amount}}"), &ctx).unwrap();
        assert_eq!(rendered, json!(500));
    }

    #[test]
    fn embedded_placeholder_interpolates_as_string() {
        let event = sample_event();
        let steps = vec![];
        let ctx = TemplateContext { event: &event, steps: &steps };
        let rendered = render(&json!("From: {{event.payload.from}}"), &ctx).unwrap();
        assert_eq!(rendered, json!("From: manager@acme.com"));
    }

    #[test]
    fn resolves_prior_step_output() {
        let event = sample_event();
        let steps = vec![json!({"output": {"id": "msg-123"}})];
        let ctx = TemplateContext { event: &event, steps: &steps };
        let rendered = render(&json!("{{steps.0.output.id}}"), &ctx).unwrap();
        assert_eq!(rendered, json!("msg-123"));
    }

    #[test]
    fn undefined_path_is_an_error_not_empty_string() {
        let event = sample_event();
        let steps = vec![];
        let ctx = TemplateContext { event: &event, steps: &steps };
        assert!(render(&json!("{{event.payload.nonexistent}}"), &ctx).is_err());
    }

    #[test]
    fn undefined_step_index_is_an_error() {
        let event = sample_event();
        let steps = vec![];
        let ctx = TemplateContext { event: &event, steps: &steps };
        assert!(render(&json!("{{steps.0.output.id}}"), &ctx).is_err());
    }

    #[test]
    fn recurses_into_objects_and_arrays() {
        let event = sample_event();
        let steps = vec![];
        let ctx = TemplateContext { event: &event, steps: &steps };
        let input = json!({"to": "{{event.payload.from}}", "tags": ["{{event.source}}"]});
        let rendered = render(&input, &ctx).unwrap();
        assert_eq!(rendered, json!({"to": "manager@acme.com", "tags": ["email"]}));
    }
}
