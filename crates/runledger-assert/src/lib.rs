// SPDX-License-Identifier: MIT OR Apache-2.0
//! runledger-assert
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Evaluates a case's merged assertions against its final output and
//! trace. Never panics on a malformed assertion or schema file; those
//! become ordinary [`AssertionFailureRecord`]s instead.

use runledger_core::{AssertionFailureRecord, AssertionSpec, KnownAssertion, TraceEvent};
use serde_json::{Map, Value};
use std::path::Path;

/// Concatenate suite-level assertions with case-level ones, suite first.
#[must_use]
pub fn merge_assertions(
    suite: &[AssertionSpec],
    case: Option<&[AssertionSpec]>,
) -> Vec<AssertionSpec> {
    let mut merged = suite.to_vec();
    if let Some(case) = case {
        merged.extend_from_slice(case);
    }
    merged
}

/// The number of assertions that will be evaluated; one per spec entry.
#[must_use]
pub fn count_assertions(specs: &[AssertionSpec]) -> u64 {
    specs.len() as u64
}

fn tool_call_names(trace: &[TraceEvent]) -> Vec<&str> {
    trace
        .iter()
        .filter_map(|e| match e {
            TraceEvent::ToolCall { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect()
}

fn fail(kind: &str, message: impl Into<String>, details: Option<Value>) -> AssertionFailureRecord {
    AssertionFailureRecord {
        kind: kind.to_string(),
        message: message.into(),
        details,
    }
}

fn apply_required_fields(
    fields: &[String],
    output: Option<&Map<String, Value>>,
) -> Option<AssertionFailureRecord> {
    let missing: Vec<String> = fields
        .iter()
        .filter(|f| !output.is_some_and(|o| o.contains_key(f.as_str())))
        .cloned()
        .collect();
    if missing.is_empty() {
        None
    } else {
        Some(fail(
            "required_fields",
            format!("missing required field(s): {}", missing.join(", ")),
            Some(serde_json::json!({ "missing": missing })),
        ))
    }
}

fn apply_json_schema(
    schema_path: &str,
    output: Option<&Map<String, Value>>,
    schema_base_dir: &Path,
) -> Option<AssertionFailureRecord> {
    let resolved = {
        let p = Path::new(schema_path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            schema_base_dir.join(p)
        }
    };

    let schema_text = match std::fs::read_to_string(&resolved) {
        Ok(text) => text,
        Err(e) => {
            return Some(fail(
                "json_schema",
                format!("could not read schema file {}: {e}", resolved.display()),
                None,
            ));
        }
    };
    let schema: Value = match serde_json::from_str(&schema_text) {
        Ok(v) => v,
        Err(e) => {
            return Some(fail(
                "json_schema",
                format!("schema file {} is not valid JSON: {e}", resolved.display()),
                None,
            ));
        }
    };
    let validator = match jsonschema::validator_for(&schema) {
        Ok(v) => v,
        Err(e) => {
            return Some(fail(
                "json_schema",
                format!("invalid JSON Schema in {}: {e}", resolved.display()),
                None,
            ));
        }
    };

    let instance = Value::Object(output.cloned().unwrap_or_default());
    let mut errors: Vec<_> = validator.iter_errors(&instance).collect();
    if errors.is_empty() {
        return None;
    }
    errors.sort_by(|a, b| a.instance_path.to_string().cmp(&b.instance_path.to_string()));
    let first = &errors[0];
    let path = first.instance_path.to_string();
    let path = if path.is_empty() { "/".to_string() } else { path };

    // Draft 2020-12 reports one missing property per `required` error; when
    // the top-level schema names its own `required` array, enumerate every
    // field the instance is missing rather than just the first.
    if path == "/" {
        if let Some(missing) = missing_top_level_required(&schema, output) {
            return Some(fail(
                "json_schema",
                format!("missing required field(s): {}", missing.join(", ")),
                Some(serde_json::json!({ "path": path, "missing": missing })),
            ));
        }
    }

    Some(fail(
        "json_schema",
        format!("{path}: {first}"),
        Some(serde_json::json!({ "path": path, "error": first.to_string() })),
    ))
}

fn missing_top_level_required(
    schema: &Value,
    output: Option<&Map<String, Value>>,
) -> Option<Vec<String>> {
    let required = schema.get("required")?.as_array()?;
    let missing: Vec<String> = required
        .iter()
        .filter_map(Value::as_str)
        .filter(|name| !output.is_some_and(|o| o.contains_key(*name)))
        .map(str::to_string)
        .collect();
    if missing.is_empty() { None } else { Some(missing) }
}

fn observed_label(observed: &[&str]) -> String {
    if observed.is_empty() {
        "<none>".to_string()
    } else {
        observed.join(", ")
    }
}

fn apply_must_call(tools: &[String], observed: &[&str]) -> Option<AssertionFailureRecord> {
    let missing: Vec<String> = tools
        .iter()
        .filter(|t| !observed.contains(&t.as_str()))
        .cloned()
        .collect();
    if missing.is_empty() {
        None
    } else {
        Some(fail(
            "must_call",
            format!(
                "missing required tool call(s): {}. Observed: {}",
                missing.join(", "),
                observed_label(observed)
            ),
            Some(serde_json::json!({ "missing": missing, "observed_calls": observed })),
        ))
    }
}

fn apply_must_not_call(tools: &[String], observed: &[&str]) -> Option<AssertionFailureRecord> {
    let called: Vec<String> = tools
        .iter()
        .filter(|t| observed.contains(&t.as_str()))
        .cloned()
        .collect();
    if called.is_empty() {
        None
    } else {
        Some(fail(
            "must_not_call",
            format!(
                "forbidden tool(s) called: {}. Observed: {}",
                called.join(", "),
                observed_label(observed)
            ),
            Some(serde_json::json!({ "called": called, "observed_calls": observed })),
        ))
    }
}

fn apply_call_order(order: &[String], observed: &[&str]) -> Option<AssertionFailureRecord> {
    let mut cursor = 0usize;
    for name in observed {
        if cursor < order.len() && order[cursor] == *name {
            cursor += 1;
        }
    }
    if cursor == order.len() {
        None
    } else {
        Some(fail(
            "call_order",
            "tool calls did not appear in the required order",
            Some(serde_json::json!({
                "expected": order,
                "observed": observed,
            })),
        ))
    }
}

/// Evaluate every merged assertion spec against a case's output and
/// trace, returning the failures in spec order. `schema_base_dir` is
/// where relative `json_schema` paths are resolved against (typically
/// the suite directory).
#[must_use]
pub fn apply_assertions(
    specs: &[AssertionSpec],
    output: Option<&Map<String, Value>>,
    trace: &[TraceEvent],
    schema_base_dir: &Path,
) -> Vec<AssertionFailureRecord> {
    let observed = tool_call_names(trace);
    specs
        .iter()
        .filter_map(|spec| match spec {
            AssertionSpec::Known(KnownAssertion::RequiredFields { fields }) => {
                apply_required_fields(fields, output)
            }
            AssertionSpec::Known(KnownAssertion::JsonSchema { schema_path }) => {
                apply_json_schema(schema_path, output, schema_base_dir)
            }
            AssertionSpec::Known(KnownAssertion::MustCall { tools }) => {
                apply_must_call(tools, &observed)
            }
            AssertionSpec::Known(KnownAssertion::MustNotCall { tools }) => {
                apply_must_not_call(tools, &observed)
            }
            AssertionSpec::Known(KnownAssertion::CallOrder { order }) => {
                apply_call_order(order, &observed)
            }
            AssertionSpec::Unknown(raw) => {
                let tag = raw.get("type").and_then(Value::as_str).unwrap_or("?");
                Some(fail(
                    "unknown_assertion",
                    format!("unrecognized assertion type: {tag}"),
                    Some(Value::Object(raw.clone())),
                ))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn call(name: &str) -> TraceEvent {
        TraceEvent::ToolCall {
            name: name.to_string(),
            call_id: "c1".to_string(),
            args: Map::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn required_fields_reports_missing() {
        let output: Map<String, Value> = json!({"a": 1}).as_object().unwrap().clone();
        let failure = apply_required_fields(
            &["a".to_string(), "b".to_string()],
            Some(&output),
        );
        assert!(failure.is_some());
        assert!(failure.unwrap().message.contains('b'));
    }

    #[test]
    fn required_fields_passes_when_all_present() {
        let output: Map<String, Value> = json!({"a": 1, "b": 2}).as_object().unwrap().clone();
        assert!(apply_required_fields(&["a".to_string(), "b".to_string()], Some(&output)).is_none());
    }

    #[test]
    fn must_call_detects_missing_tool() {
        let trace = vec![call("search_docs")];
        let observed = tool_call_names(&trace);
        let failure = apply_must_call(&["search_docs".to_string(), "send_email".to_string()], &observed);
        assert!(failure.unwrap().message.contains("send_email"));
    }

    #[test]
    fn must_not_call_flags_forbidden_tool() {
        let trace = vec![call("delete_account")];
        let observed = tool_call_names(&trace);
        let failure = apply_must_not_call(&["delete_account".to_string()], &observed);
        assert!(failure.is_some());
    }

    #[test]
    fn call_order_accepts_valid_subsequence() {
        let trace = vec![call("a"), call("x"), call("b"), call("c")];
        let observed = tool_call_names(&trace);
        let order = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert!(apply_call_order(&order, &observed).is_none());
    }

    #[test]
    fn call_order_rejects_wrong_order() {
        let trace = vec![call("b"), call("a")];
        let observed = tool_call_names(&trace);
        let order = vec!["a".to_string(), "b".to_string()];
        assert!(apply_call_order(&order, &observed).is_some());
    }

    #[test]
    fn unknown_assertion_always_fails() {
        let specs = vec![AssertionSpec::Unknown(
            json!({"type": "bogus"}).as_object().unwrap().clone(),
        )];
        let failures = apply_assertions(&specs, None, &[], Path::new("."));
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, "unknown_assertion");
    }

    #[test]
    fn json_schema_reports_first_error_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = dir.path().join("schema.json");
        std::fs::write(
            &schema_path,
            json!({
                "type": "object",
                "required": ["hits"],
                "properties": {"hits": {"type": "array"}}
            })
            .to_string(),
        )
        .unwrap();

        let output: Map<String, Value> = json!({}).as_object().unwrap().clone();
        let failure = apply_json_schema(
            schema_path.file_name().unwrap().to_str().unwrap(),
            Some(&output),
            dir.path(),
        );
        assert!(failure.is_some());
    }

    #[test]
    fn json_schema_enumerates_missing_required_fields() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = dir.path().join("schema.json");
        std::fs::write(
            &schema_path,
            json!({
                "type": "object",
                "required": ["category", "reply"],
                "properties": {"category": {"type": "string"}, "reply": {"type": "string"}}
            })
            .to_string(),
        )
        .unwrap();

        let output: Map<String, Value> = json!({"category": "support"}).as_object().unwrap().clone();
        let failure = apply_json_schema(
            schema_path.file_name().unwrap().to_str().unwrap(),
            Some(&output),
            dir.path(),
        )
        .unwrap();
        assert!(failure.message.contains("missing required field(s): reply"));
        assert_eq!(failure.kind, "json_schema");
    }
}
