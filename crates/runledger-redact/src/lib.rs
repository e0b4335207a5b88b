// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical JSON serialization and secret redaction.
//!
//! These are the two pure boundary functions every external write in
//! runledger passes through: [`canonicalize`] gives a deterministic,
//! key-sorted form used for cassette matching and hashing, and [`redact`]
//! scrubs sensitive-looking values before anything touches disk.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde_json::Value;
use std::sync::LazyLock;

/// Recursively sort object keys so that two structurally-equal JSON values
/// serialize identically regardless of their original key order.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use runledger_redact::canonicalize;
///
/// let a = canonicalize(json!({"b": 1, "a": 2}));
/// let b = canonicalize(json!({"a": 2, "b": 1}));
/// assert_eq!(a, b);
/// ```
#[must_use]
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> =
                map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Serialize `value` to compact JSON after canonicalizing key order.
///
/// Equality of two values under this function is the definition of
/// "canonical args equal" used throughout cassette matching.
#[must_use]
pub fn canonical_dumps(value: &Value) -> String {
    serde_json::to_string(&canonicalize(value.clone())).unwrap_or_default()
}

const REDACTED: &str = "[REDACTED]";

const SENSITIVE_SUBSTRINGS: &[&str] = &[
    "api_key",
    "apikey",
    "access_token",
    "refresh_token",
    "authorization",
    "auth_token",
];

const SENSITIVE_PARTS: &[&str] = &["token", "secret", "password", "pwd", "auth"];

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    if SENSITIVE_SUBSTRINGS.iter().any(|s| lower.contains(s)) {
        return true;
    }
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .any(|part| SENSITIVE_PARTS.contains(&part))
}

struct TextPattern {
    regex: regex::Regex,
    replacement: &'static str,
}

static TEXT_PATTERNS: LazyLock<Vec<TextPattern>> = LazyLock::new(|| {
    vec![
        TextPattern {
            regex: regex::Regex::new(r"(?i)bearer\s+[a-zA-Z0-9._~+/=-]+").unwrap(),
            replacement: "Bearer [REDACTED]",
        },
        TextPattern {
            regex: regex::Regex::new(r"\bsk-[A-Za-z0-9]{20,}\b").unwrap(),
            replacement: REDACTED,
        },
        TextPattern {
            regex: regex::Regex::new(r"\bghp_[A-Za-z0-9]{36}\b").unwrap(),
            replacement: REDACTED,
        },
        TextPattern {
            regex: regex::Regex::new(r"\bAKIA[0-9A-Z]{16}\b").unwrap(),
            replacement: REDACTED,
        },
        TextPattern {
            regex: regex::Regex::new(
                r"\beyJ[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+\b",
            )
            .unwrap(),
            replacement: REDACTED,
        },
    ]
});

/// Replace bearer tokens, API keys, GitHub PATs, AWS access key ids, and
/// JWT-shaped substrings within free text with `[REDACTED]`.
#[must_use]
pub fn redact_text(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in TEXT_PATTERNS.iter() {
        out = pattern.regex.replace_all(&out, pattern.replacement).into_owned();
    }
    out
}

/// Recursively redact a JSON value.
///
/// Object values whose key name looks sensitive (contains `token`,
/// `secret`, `password`, `auth`, ... as a whole path segment, or one of a
/// few known substrings) are replaced wholesale with `"[REDACTED]"`.
/// String values elsewhere are scanned for known secret shapes via
/// [`redact_text`]. The function is idempotent: redacting an
/// already-redacted value is a no-op.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use runledger_redact::redact;
///
/// let v = redact(json!({"password": "hunter2", "q": "reset password"}));
/// assert_eq!(v["password"], "[REDACTED]");
/// assert_eq!(v["q"], "reset password");
/// ```
#[must_use]
pub fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if is_sensitive_key(&k) {
                    out.insert(k, Value::String(REDACTED.to_string()));
                } else {
                    out.insert(k, redact(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        Value::String(s) => Value::String(redact_text(&s)),
        other => other,
    }
}
