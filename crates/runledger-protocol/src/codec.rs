// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stateless JSONL encoder/decoder with line-number tracking.

use crate::{ProtocolError, ProtocolMessage, parse_line};
use std::io::BufRead;

/// Stateless codec for encoding/decoding [`ProtocolMessage`]s as
/// newline-delimited JSON.
#[derive(Debug, Clone, Copy)]
pub struct JsonlCodec;

impl JsonlCodec {
    /// Serialize a [`ProtocolMessage`] to compact, newline-terminated JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if the message cannot be serialized.
    pub fn encode(msg: &ProtocolMessage) -> Result<String, ProtocolError> {
        let mut s = serde_json::to_string(msg)?;
        s.push('\n');
        Ok(s)
    }

    /// Deserialize a single JSON line (without its trailing newline) into a
    /// [`ProtocolMessage`].
    ///
    /// # Errors
    ///
    /// See [`ProtocolError`] variants for the distinct failure modes.
    pub fn decode(line: &str) -> Result<ProtocolMessage, ProtocolError> {
        parse_line(line)
    }

    /// Read JSONL lines from `reader`, skipping blank lines, yielding
    /// `(1-based line number, parse result)` pairs so callers can produce
    /// diagnostics that cite the offending line.
    pub fn decode_stream(
        reader: impl BufRead,
    ) -> impl Iterator<Item = (usize, Result<ProtocolMessage, ProtocolError>)> {
        reader
            .lines()
            .enumerate()
            .filter_map(|(idx, line_result)| {
                let line_no = idx + 1;
                match line_result {
                    Err(e) => Some((line_no, Err(ProtocolError::Io(e)))),
                    Ok(line) => {
                        if line.trim().is_empty() {
                            None
                        } else {
                            Some((line_no, Self::decode(&line)))
                        }
                    }
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProtocolMessage;
    use std::io::BufReader;

    #[test]
    fn decode_stream_skips_blank_lines_and_tracks_numbers() {
        let input = "\n{\"type\":\"log\",\"level\":\"info\",\"message\":\"a\"}\n\n{\"type\":\"bogus\"}\n";
        let reader = BufReader::new(input.as_bytes());
        let results: Vec<_> = JsonlCodec::decode_stream(reader).collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 2);
        assert!(results[0].1.is_ok());
        assert_eq!(results[1].0, 4);
        assert!(results[1].1.is_err());
    }

    #[test]
    fn encode_has_no_embedded_newline_before_terminator() {
        let msg = ProtocolMessage::TaskError {
            message: "boom".into(),
            data: None,
        };
        let line = JsonlCodec::encode(&msg).unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.ends_with('\n'));
    }
}
