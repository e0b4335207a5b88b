// SPDX-License-Identifier: MIT OR Apache-2.0
//! runledger-cassette
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! A cassette is a line-delimited JSON file recording tool calls and
//! their results. In replay mode it answers the agent's `tool_call`
//! messages without running anything real; in record mode it grows as
//! real handlers run.

use runledger_redact::{canonical_dumps, redact};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Maximum length of a preview string in mismatch diagnostics.
const PREVIEW_CHARS: usize = 160;

/// How many ranked candidates to include in a mismatch diagnostic.
const MAX_CANDIDATES: usize = 5;

/// A single recorded tool call and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CassetteEntry {
    /// Tool name.
    pub tool: String,
    /// Arguments the tool was called with.
    pub args: Map<String, Value>,
    /// Whether the recorded call succeeded.
    pub ok: bool,
    /// Result payload, present when the call succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message, present iff `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CassetteEntry {
    /// Build a passing entry.
    #[must_use]
    pub fn ok(tool: impl Into<String>, args: Map<String, Value>, result: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    /// Build a failing entry.
    #[must_use]
    pub fn err(tool: impl Into<String>, args: Map<String, Value>, error: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            args,
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }

    fn canonical_args_key(&self) -> String {
        canonical_dumps(&redact(Value::Object(self.args.clone())))
    }
}

/// Errors loading or writing a cassette file.
#[derive(Debug, Error)]
pub enum CassetteError {
    /// The cassette file does not exist or could not be opened.
    #[error("cassette {path}: {source}")]
    Io {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A line of the cassette was not valid JSON, or not an object with
    /// the expected shape.
    #[error("cassette {path} line {line}: {message}")]
    Malformed {
        /// Path of the cassette.
        path: PathBuf,
        /// 1-based line number of the offending entry.
        line: usize,
        /// What was wrong with it.
        message: String,
    },
}

/// A loaded cassette, ready to answer tool calls by replay.
#[derive(Debug, Clone, Default)]
pub struct CassetteStore {
    entries: Vec<CassetteEntry>,
}

/// One ranked candidate in a mismatch diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePreview {
    /// The candidate entry's tool name.
    pub tool: String,
    /// Truncated preview of the candidate's canonical args.
    pub args_preview: String,
    /// Jaccard token-overlap similarity to the requested call, in `[0,1]`.
    pub similarity: f64,
}

/// Diagnostic payload describing why a tool call found no cassette match.
#[derive(Debug, Clone, PartialEq)]
pub struct MismatchReport {
    /// The tool name that was requested.
    pub requested_tool: String,
    /// Truncated preview of the requested call's canonical args.
    pub requested_args_preview: String,
    /// Up to five candidates from the cassette, most similar first.
    pub candidates: Vec<CandidatePreview>,
}

impl MismatchReport {
    /// Render the human-readable message a `cassette_mismatch` failure
    /// carries.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from("Cassette mismatch.\n");
        out.push_str(&format!("Requested tool: {}\n", self.requested_tool));
        out.push_str(&format!(
            "Requested args: {}\n",
            self.requested_args_preview
        ));
        if self.candidates.is_empty() {
            out.push_str("Available entries: (none)\n");
        } else {
            out.push_str("Available entries:\n");
            for c in &self.candidates {
                out.push_str(&format!(
                    "  - {} (similarity {:.2}): {}\n",
                    c.tool, c.similarity, c.args_preview
                ));
            }
        }
        out
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= PREVIEW_CHARS {
        s.to_string()
    } else {
        let mut preview: String = s.chars().take(PREVIEW_CHARS).collect();
        preview.push('\u{2026}');
        preview
    }
}

fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let tokenize = |s: &str| -> BTreeSet<&str> {
        s.split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .collect()
    };
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

impl CassetteStore {
    /// Load a cassette from a line-delimited JSON file, skipping blank
    /// lines. Each non-blank line must be a JSON object matching
    /// [`CassetteEntry`]'s shape.
    ///
    /// # Errors
    ///
    /// Returns [`CassetteError::Io`] if the file cannot be opened, or
    /// [`CassetteError::Malformed`] citing the offending line number.
    pub fn load(path: &Path) -> Result<Self, CassetteError> {
        let file = std::fs::File::open(path).map_err(|source| CassetteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for (idx, line_result) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line_result.map_err(|source| CassetteError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: CassetteEntry =
                serde_json::from_str(&line).map_err(|e| CassetteError::Malformed {
                    path: path.to_path_buf(),
                    line: line_no,
                    message: e.to_string(),
                })?;
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    /// An empty cassette, used when record mode starts with no prior
    /// recording on disk.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Find the first entry whose tool name and canonicalized, redacted
    /// args match the request exactly.
    #[must_use]
    pub fn find(&self, tool: &str, args: &Map<String, Value>) -> Option<&CassetteEntry> {
        let probe = CassetteEntry {
            tool: tool.to_string(),
            args: args.clone(),
            ok: true,
            result: None,
            error: None,
        };
        let key = probe.canonical_args_key();
        self.entries
            .iter()
            .find(|e| e.tool == tool && e.canonical_args_key() == key)
    }

    /// Build a ranked mismatch diagnostic for a call that [`Self::find`]
    /// could not answer.
    ///
    /// Candidates are drawn from entries sharing the requested tool name;
    /// if none share it, every entry in the cassette is considered
    /// instead.
    #[must_use]
    pub fn mismatch(&self, tool: &str, args: &Map<String, Value>) -> MismatchReport {
        let requested_key = CassetteEntry {
            tool: tool.to_string(),
            args: args.clone(),
            ok: true,
            result: None,
            error: None,
        }
        .canonical_args_key();

        let same_tool: Vec<&CassetteEntry> = self.entries.iter().filter(|e| e.tool == tool).collect();
        let pool: Vec<&CassetteEntry> = if same_tool.is_empty() {
            self.entries.iter().collect()
        } else {
            same_tool
        };

        let mut ranked: Vec<CandidatePreview> = pool
            .into_iter()
            .map(|e| {
                let key = e.canonical_args_key();
                CandidatePreview {
                    tool: e.tool.clone(),
                    args_preview: truncate(&key),
                    similarity: jaccard_similarity(&requested_key, &key),
                }
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(MAX_CANDIDATES);

        MismatchReport {
            requested_tool: tool.to_string(),
            requested_args_preview: truncate(&requested_key),
            candidates: ranked,
        }
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cassette has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Append one entry to a cassette file on disk, canonicalizing and
/// redacting its args first. Used by record mode after a real tool call.
///
/// # Errors
///
/// Returns [`CassetteError::Io`] if the file cannot be opened for append
/// or the write fails.
pub fn append_entry(path: &Path, entry: &CassetteEntry) -> Result<(), CassetteError> {
    let redacted_args = redact(Value::Object(entry.args.clone()))
        .as_object()
        .cloned()
        .unwrap_or_default();
    let to_write = CassetteEntry {
        tool: entry.tool.clone(),
        args: redacted_args,
        ok: entry.ok,
        result: entry.result.clone().map(redact),
        error: entry.error.clone(),
    };
    let value = serde_json::to_value(&to_write).expect("CassetteEntry always serializes");
    let line = canonical_dumps(&value);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| CassetteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    writeln!(file, "{line}").map_err(|source| CassetteError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write as _;

    fn write_cassette(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        f
    }

    #[test]
    fn loads_entries_and_skips_blank_lines() {
        let f = write_cassette(&[
            "",
            r#"{"tool":"search_docs","args":{"q":"reset"},"ok":true,"result":{"hits":[]}}"#,
            "",
        ]);
        let store = CassetteStore::load(f.path()).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let f = write_cassette(&[
            r#"{"tool":"a","args":{},"ok":true}"#,
            "not json",
        ]);
        let err = CassetteStore::load(f.path()).unwrap_err();
        match err {
            CassetteError::Malformed { line, .. } => assert_eq!(line, 2),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn find_matches_on_canonicalized_args_regardless_of_key_order() {
        let f = write_cassette(&[
            r#"{"tool":"search_docs","args":{"b":2,"a":1},"ok":true,"result":{"ok":true}}"#,
        ]);
        let store = CassetteStore::load(f.path()).unwrap();
        let args: Map<String, Value> = json!({"a": 1, "b": 2}).as_object().unwrap().clone();
        let found = store.find("search_docs", &args);
        assert!(found.is_some());
    }

    #[test]
    fn mismatch_ranks_candidates_by_similarity() {
        let f = write_cassette(&[
            r#"{"tool":"search_docs","args":{"q":"reset password"},"ok":true,"result":{}}"#,
            r#"{"tool":"search_docs","args":{"q":"totally unrelated"},"ok":true,"result":{}}"#,
        ]);
        let store = CassetteStore::load(f.path()).unwrap();
        let args: Map<String, Value> =
            json!({"q": "reset my password"}).as_object().unwrap().clone();
        let report = store.mismatch("search_docs", &args);
        assert_eq!(report.candidates.len(), 2);
        assert!(report.candidates[0].similarity >= report.candidates[1].similarity);
    }

    #[test]
    fn append_entry_redacts_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cassette.jsonl");
        let args: Map<String, Value> =
            json!({"api_key": "sk-abcdefghijklmnopqrstuvwx"}).as_object().unwrap().clone();
        let entry = CassetteEntry::ok("call_api", args, json!({"ok": true}));
        append_entry(&path, &entry).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[REDACTED]"));
        assert!(!contents.contains("sk-abcdefghijklmnopqrstuvwx"));
    }
}
