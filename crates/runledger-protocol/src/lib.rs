// SPDX-License-Identifier: MIT OR Apache-2.0
//! runledger-protocol
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Wire format exchanged with an agent subprocess.
//! Transport: one JSON object per line (JSONL) over stdin/stdout.

pub mod codec;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One message in the exchange between harness and agent.
///
/// The agent reads [`ProtocolMessage::TaskStart`] first; for every
/// [`ProtocolMessage::ToolCall`] it emits it receives exactly one
/// [`ProtocolMessage::ToolResult`]; it ends the case by emitting either
/// [`ProtocolMessage::FinalOutput`] or [`ProtocolMessage::TaskError`].
///
/// # Examples
///
/// ```
/// use runledger_protocol::{ProtocolMessage, codec::JsonlCodec};
/// use serde_json::Map;
///
/// let msg = ProtocolMessage::TaskStart {
///     task_id: "t1".into(),
///     input: Map::new(),
/// };
/// let line = JsonlCodec::encode(&msg).unwrap();
/// assert!(line.ends_with('\n'));
/// assert!(line.contains("\"type\":\"task_start\""));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ProtocolMessage {
    /// Harness → agent. Exactly one per case, always first.
    TaskStart {
        /// Identifier of the case being run.
        task_id: String,
        /// Arbitrary input payload for the case.
        input: Map<String, Value>,
    },

    /// Agent → harness. Requests that a named tool be invoked.
    ToolCall {
        /// Name of the tool to call.
        name: String,
        /// Opaque identifier correlating this call to its result.
        call_id: String,
        /// Arguments passed to the tool.
        args: Map<String, Value>,
    },

    /// Harness → agent. Exactly one per `tool_call` received.
    ToolResult {
        /// Identifier of the `tool_call` this result answers.
        call_id: String,
        /// Whether the tool invocation succeeded.
        ok: bool,
        /// Result payload, present when `ok` is true.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Error message, present when `ok` is false.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Agent → harness. Terminates the case successfully.
    FinalOutput {
        /// The case's final output.
        output: Map<String, Value>,
    },

    /// Agent → harness. Advisory; does not end the case.
    Log {
        /// Log severity (e.g. `"info"`, `"warn"`).
        level: String,
        /// Human-readable log message.
        message: String,
        /// Optional structured payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    /// Agent → harness. Terminates the case with failure.
    TaskError {
        /// Human-readable error description.
        message: String,
        /// Optional structured payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
}

impl ProtocolMessage {
    /// The wire tag (`"task_start"`, `"tool_call"`, ...) for this message.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::TaskStart { .. } => "task_start",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::FinalOutput { .. } => "final_output",
            Self::Log { .. } => "log",
            Self::TaskError { .. } => "task_error",
        }
    }
}

/// The six message tags known to the protocol.
pub const KNOWN_TAGS: &[&str] = &[
    "task_start",
    "tool_call",
    "tool_result",
    "final_output",
    "log",
    "task_error",
];

/// Errors arising from JSONL decoding or protocol-level violations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON parsing or schema mismatch failure.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying I/O error while reading a line.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The line parsed as JSON but was not an object.
    #[error("expected a JSON object, got: {preview}")]
    NotAnObject {
        /// First 200 bytes of the offending line.
        preview: String,
    },

    /// The object had no `type` field.
    #[error("message is missing a \"type\" field: {preview}")]
    MissingType {
        /// First 200 bytes of the offending line.
        preview: String,
    },

    /// The `type` field was not one of the six known tags.
    #[error("unknown message type {tag:?}, expected one of {KNOWN_TAGS:?}")]
    UnknownType {
        /// The unrecognized tag value.
        tag: String,
    },

    /// A message of the expected shape never arrived where one was required.
    #[error("unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage {
        /// The tag that was expected.
        expected: String,
        /// The tag that was actually received.
        got: String,
    },
}

fn preview(line: &str) -> String {
    line.bytes().take(200).map(|b| b as char).collect()
}

pub use codec::JsonlCodec;

/// Parse one JSONL line into a [`ProtocolMessage`], giving a distinct error
/// for "not JSON", "not an object", and "unknown type" so the caller can
/// produce the precise diagnostics the harness contract requires.
pub fn parse_line(line: &str) -> Result<ProtocolMessage, ProtocolError> {
    let value: Value = serde_json::from_str(line)?;
    let Some(obj) = value.as_object() else {
        return Err(ProtocolError::NotAnObject {
            preview: preview(line),
        });
    };
    let Some(tag) = obj.get("type").and_then(Value::as_str) else {
        return Err(ProtocolError::MissingType {
            preview: preview(line),
        });
    };
    if !KNOWN_TAGS.contains(&tag) {
        return Err(ProtocolError::UnknownType {
            tag: tag.to_string(),
        });
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_tool_call() {
        let msg = ProtocolMessage::ToolCall {
            name: "search_docs".into(),
            call_id: "c1".into(),
            args: json!({"q": "reset password"}).as_object().unwrap().clone(),
        };
        let line = JsonlCodec::encode(&msg).unwrap();
        let decoded = parse_line(line.trim_end()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn rejects_non_object_lines() {
        let err = parse_line("[1,2,3]").unwrap_err();
        assert!(matches!(err, ProtocolError::NotAnObject { .. }));
    }

    #[test]
    fn rejects_unknown_type() {
        let err = parse_line(r#"{"type":"bogus"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType { tag } if tag == "bogus"));
    }

    #[test]
    fn rejects_unknown_fields_in_known_variant() {
        let err = parse_line(r#"{"type":"final_output","output":{},"extra":1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));
    }

    #[test]
    fn tag_matches_wire_discriminant() {
        let msg = ProtocolMessage::Log {
            level: "info".into(),
            message: "hi".into(),
            data: None,
        };
        assert_eq!(msg.tag(), "log");
    }
}
