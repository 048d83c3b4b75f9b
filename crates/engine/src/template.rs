//! Template resolution against the context store.
//!
//! Templates embed `{{namespace.path}}` expressions inside strings or nested
//! structures. A leaf that is exactly one expression substitutes the typed
//! value, so structured `logic.*` values can flow straight into request
//! bodies; a leaf mixing literal text and expressions renders every value to
//! text and concatenates. Resolution is read-only against the store and
//! fails as a whole on the first reference that misses — no partial
//! substitution is ever emitted.

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value};

use crate::context::{ContextStore, Namespace};
use crate::error::EngineError;

const EXPR_OPEN: &str = "{{";
const EXPR_CLOSE: &str = "}}";

/// Extracts template expressions from a string value.
///
/// Returned expressions do not include the `{{` or `}}` delimiters.
pub fn extract_references(value: &str) -> Vec<String> {
    let mut references = Vec::new();
    let mut remainder = value;

    while let Some(start) = remainder.find(EXPR_OPEN) {
        let after_open = &remainder[start + EXPR_OPEN.len()..];
        let Some(end) = after_open.find(EXPR_CLOSE) else {
            break;
        };
        let expression = after_open[..end].trim();
        if !expression.is_empty() {
            references.push(expression.to_string());
        }
        remainder = &after_open[end + EXPR_CLOSE.len()..];
    }

    references
}

/// Collect template references from an arbitrary JSON value tree.
pub fn collect_references(value: &Value, references: &mut Vec<String>) {
    match value {
        Value::String(raw_text) => references.extend(extract_references(raw_text)),
        Value::Array(items) => {
            for item in items {
                collect_references(item, references);
            }
        }
        Value::Object(map) => {
            for nested in map.values() {
                collect_references(nested, references);
            }
        }
        _ => {}
    }
}

/// Resolve a single `namespace.path` expression to its typed value.
pub fn resolve_expression(store: &ContextStore, expression: &str) -> Result<Value, EngineError> {
    let expression = expression.trim();
    let Some((namespace_name, path)) = expression.split_once('.') else {
        return Err(EngineError::unresolved(expression));
    };
    let Some(namespace) = Namespace::parse(namespace_name) else {
        return Err(EngineError::unresolved(expression));
    };
    store
        .lookup(namespace, path)
        .cloned()
        .ok_or_else(|| EngineError::unresolved(expression))
}

/// Recursively resolve every template expression in a JSON value.
///
/// Containers are rebuilt depth-first, preserving shape and key order;
/// non-string scalars pass through unchanged.
pub fn resolve_value(value: &Value, store: &ContextStore) -> Result<Value, EngineError> {
    match value {
        Value::String(raw_text) => resolve_string(raw_text, store),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, store))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved_map = JsonMap::new();
            for (key, nested) in map {
                resolved_map.insert(key.clone(), resolve_value(nested, store)?);
            }
            Ok(Value::Object(resolved_map))
        }
        _ => Ok(value.clone()),
    }
}

/// Resolve every template in a parameter mapping.
pub fn resolve_params(params: &IndexMap<String, Value>, store: &ContextStore) -> Result<JsonMap<String, Value>, EngineError> {
    let mut resolved = JsonMap::new();
    for (name, template) in params {
        resolved.insert(name.clone(), resolve_value(template, store)?);
    }
    Ok(resolved)
}

/// Canonical text form used when interpolating into a composite string.
///
/// Strings render as-is, numbers and booleans via their display form, null
/// as the empty string, and containers as compact JSON.
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn resolve_string(raw: &str, store: &ContextStore) -> Result<Value, EngineError> {
    if !raw.contains(EXPR_OPEN) {
        return Ok(Value::String(raw.to_string()));
    }

    if let Some(expression) = as_single_expression(raw) {
        return resolve_expression(store, expression);
    }

    let mut output = String::new();
    let mut remainder = raw;
    while let Some(start) = remainder.find(EXPR_OPEN) {
        output.push_str(&remainder[..start]);
        let rest = &remainder[start..];
        let Some(end) = rest[EXPR_OPEN.len()..].find(EXPR_CLOSE) else {
            // Unmatched opener: the rest of the string is literal text.
            output.push_str(rest);
            remainder = "";
            break;
        };
        let expression = &rest[EXPR_OPEN.len()..EXPR_OPEN.len() + end];
        let value = resolve_expression(store, expression)?;
        output.push_str(&render_scalar(&value));
        remainder = &rest[EXPR_OPEN.len() + end + EXPR_CLOSE.len()..];
    }
    output.push_str(remainder);

    Ok(Value::String(output))
}

/// Returns the inner expression when the whole (trimmed) string is exactly
/// one `{{...}}` expression with no surrounding text.
fn as_single_expression(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let inner = trimmed.strip_prefix(EXPR_OPEN)?.strip_suffix(EXPR_CLOSE)?;
    if inner.contains(EXPR_OPEN) || inner.contains(EXPR_CLOSE) {
        return None;
    }
    Some(inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_fixtures() -> ContextStore {
        let initial = json!({
            "db": {
                "customer": {"id": "CUST-1"},
                "invoice": {"number": "INV-1", "total": 120.5}
            },
            "logic": {
                "recommended_credit_amount": 75,
                "adjustment": {"reason": "loyalty", "percent": 10}
            }
        });
        ContextStore::seeded(initial.as_object().unwrap()).expect("seed")
    }

    #[test]
    fn single_expression_preserves_type() {
        let store = store_with_fixtures();
        let resolved = resolve_value(&json!("{{logic.recommended_credit_amount}}"), &store).expect("resolve");
        assert_eq!(resolved, json!(75));

        let resolved = resolve_value(&json!("{{logic.adjustment}}"), &store).expect("resolve");
        assert_eq!(resolved, json!({"reason": "loyalty", "percent": 10}));
    }

    #[test]
    fn composite_strings_interpolate_as_text() {
        let store = store_with_fixtures();
        let resolved = resolve_value(
            &json!("Dispute for invoice {{db.invoice.number}} ({{logic.recommended_credit_amount}} credit)"),
            &store,
        )
        .expect("resolve");
        assert_eq!(resolved, json!("Dispute for invoice INV-1 (75 credit)"));
    }

    #[test]
    fn nested_structures_resolve_depth_first() {
        let store = store_with_fixtures();
        let template = json!({
            "customerId": "{{db.customer.id}}",
            "lines": [{"invoice": "{{db.invoice.number}}", "amount": "{{db.invoice.total}}"}],
            "flags": {"audit": true}
        });
        let resolved = resolve_value(&template, &store).expect("resolve");
        assert_eq!(
            resolved,
            json!({
                "customerId": "CUST-1",
                "lines": [{"invoice": "INV-1", "amount": 120.5}],
                "flags": {"audit": true}
            })
        );
    }

    #[test]
    fn missing_reference_fails_whole_resolution() {
        let store = store_with_fixtures();
        let template = json!({
            "ok": "{{db.customer.id}}",
            "broken": "{{logic.not_computed_yet}}"
        });
        let err = resolve_value(&template, &store).expect_err("should fail");
        assert_eq!(err, EngineError::unresolved("logic.not_computed_yet"));
    }

    #[test]
    fn unknown_namespace_fails_resolution() {
        let store = store_with_fixtures();
        let err = resolve_value(&json!("{{env.HOME}}"), &store).expect_err("should fail");
        assert_eq!(err, EngineError::unresolved("env.HOME"));
    }

    #[test]
    fn bare_namespace_without_path_fails_resolution() {
        let store = store_with_fixtures();
        assert!(resolve_value(&json!("{{db}}"), &store).is_err());
    }

    #[test]
    fn resolution_is_pure() {
        let store = store_with_fixtures();
        let template = json!("{{db.invoice.total}}");
        let first = resolve_value(&template, &store).expect("resolve");
        let second = resolve_value(&template, &store).expect("resolve");
        assert_eq!(first, second);
    }

    #[test]
    fn non_string_leaves_pass_through() {
        let store = store_with_fixtures();
        let template = json!({"count": 3, "enabled": false, "note": null});
        assert_eq!(resolve_value(&template, &store).expect("resolve"), template);
    }

    #[test]
    fn unmatched_opener_is_literal() {
        let store = store_with_fixtures();
        let resolved = resolve_value(&json!("total: {{db.invoice.total}} {{oops"), &store).expect("resolve");
        assert_eq!(resolved, json!("total: 120.5 {{oops"));
    }

    #[test]
    fn extract_references_finds_each_expression() {
        let refs = extract_references("{{db.customer.id}} owes {{db.invoice.total}}");
        assert_eq!(refs, vec!["db.customer.id", "db.invoice.total"]);
    }

    #[test]
    fn collect_references_walks_nested_values() {
        let template = json!({
            "a": "{{logic.x}}",
            "b": ["{{db.y}}", {"c": "{{state.z}}"}]
        });
        let mut refs = Vec::new();
        collect_references(&template, &mut refs);
        assert_eq!(refs, vec!["logic.x", "db.y", "state.z"]);
    }
}
