// SPDX-License-Identifier: MIT OR Apache-2.0
//! runledger-baseline
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stored baseline summary model and its on-disk load/write. A
//! baseline is a previously-written `summary.json`, so every field here
//! is tolerant of extras: a newer runledger version may add fields a
//! baseline written by an older one doesn't have, and vice versa.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading or writing a stored baseline.
#[derive(Debug, Error)]
pub enum BaselineError {
    /// The baseline file does not exist.
    #[error("baseline file not found: {0}")]
    NotFound(PathBuf),

    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file's contents were not a valid baseline summary.
    #[error("failed to parse baseline {path}: {source}")]
    ParseError {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
}

/// Unknown fields on any of these types are preserved-but-ignored rather
/// than rejected: a baseline is read-only historical data, not config a
/// typo in should fail loudly on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    /// Identifier of the run that produced this baseline.
    pub run_id: String,
    /// Tool mediation mode the run used.
    pub mode: String,
    /// Overall run outcome.
    pub exit_status: String,
    /// Git commit the run was taken from, if known.
    #[serde(default)]
    pub git_sha: Option<String>,
    /// CI metadata, if known.
    #[serde(default)]
    pub ci: Option<Value>,
    /// Any additional fields a newer schema version added.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// See [`RunInfo`] on field tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteInfo {
    /// Suite name.
    pub name: String,
    /// Path to the suite file, as recorded at run time.
    pub suite_path: String,
    /// Argv used to launch the agent.
    pub agent_command: Vec<String>,
    /// Tool mediation mode.
    pub tool_mode: String,
    /// Hash of the suite configuration, if recorded.
    #[serde(default)]
    pub suite_config_hash: Option<String>,
    /// Number of cases in the suite, if recorded.
    #[serde(default)]
    pub cases_total: Option<u64>,
    /// Any additional fields a newer schema version added.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// See [`RunInfo`] on field tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    /// Minimum observed value.
    #[serde(default)]
    pub min: Option<f64>,
    /// 50th percentile.
    #[serde(default)]
    pub p50: Option<f64>,
    /// 95th percentile.
    #[serde(default)]
    pub p95: Option<f64>,
    /// Arithmetic mean.
    #[serde(default)]
    pub mean: Option<f64>,
    /// Maximum observed value.
    #[serde(default)]
    pub max: Option<f64>,
}

/// See [`RunInfo`] on field tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregates {
    /// Total number of cases.
    pub cases_total: u64,
    /// Cases that passed.
    pub cases_pass: u64,
    /// Cases that failed.
    pub cases_fail: u64,
    /// Cases that errored.
    pub cases_error: u64,
    /// `cases_pass / cases_total`.
    pub pass_rate: f64,
    /// Per-metric summaries, keyed by metric name (`wall_ms`, ...).
    pub metrics: BTreeMap<String, MetricSummary>,
    /// Any additional fields a newer schema version added.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// See [`RunInfo`] on field tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssertionsSummary {
    /// Total assertions evaluated.
    pub total: u64,
    /// Assertions that failed.
    pub failed: u64,
}

/// See [`RunInfo`] on field tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
    /// Case identifier.
    pub id: String,
    /// `pass`, `fail`, `error`, or `skipped`.
    pub status: String,
    /// Wall-clock duration in milliseconds.
    pub wall_ms: u64,
    /// Tool calls observed.
    pub tool_calls: u64,
    /// Tool errors observed.
    pub tool_errors: u64,
    /// Assertion pass/fail counts.
    pub assertions: AssertionsSummary,
    /// Any additional fields a newer schema version added.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A previously-written `summary.json`, loaded back in for regression
/// comparison against the current run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSummary {
    /// Summary schema version.
    pub schema_version: u32,
    /// When the baseline run was generated.
    pub generated_at: String,
    /// Version of runledger that produced the baseline.
    pub runledger_version: String,
    /// Run-level metadata.
    pub run: RunInfo,
    /// Suite-level metadata.
    pub suite: SuiteInfo,
    /// Aggregate metrics across all cases.
    pub aggregates: Aggregates,
    /// Per-case summaries.
    pub cases: Vec<CaseSummary>,
    /// Any additional fields a newer schema version added.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Load a stored baseline summary from disk.
///
/// # Errors
///
/// Returns [`BaselineError::NotFound`] if `path` is not a file,
/// [`BaselineError::Io`] on a read failure, or [`BaselineError::ParseError`]
/// if the contents don't match the expected shape.
pub fn load_baseline(path: &Path) -> Result<BaselineSummary, BaselineError> {
    if !path.is_file() {
        return Err(BaselineError::NotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|source| BaselineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| BaselineError::ParseError {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a baseline summary to disk, creating parent directories and
/// sorting object keys deterministically.
///
/// # Errors
///
/// Returns [`BaselineError::Io`] on write failure.
pub fn write_baseline(path: &Path, baseline: &BaselineSummary) -> Result<PathBuf, BaselineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| BaselineError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let value = serde_json::to_value(baseline).expect("BaselineSummary always serializes");
    let value = canonicalize(value);
    let text = serde_json::to_string_pretty(&value).expect("canonicalized value always serializes");
    std::fs::write(path, format!("{text}\n")).map_err(|source| BaselineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(path.to_path_buf())
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> =
                map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> BaselineSummary {
        BaselineSummary {
            schema_version: 1,
            generated_at: "2026-01-01T00:00:00Z".to_string(),
            runledger_version: "0.1.0".to_string(),
            run: RunInfo {
                run_id: "run1".to_string(),
                mode: "replay".to_string(),
                exit_status: "success".to_string(),
                git_sha: None,
                ci: None,
                extra: BTreeMap::new(),
            },
            suite: SuiteInfo {
                name: "demo".to_string(),
                suite_path: "suite.yaml".to_string(),
                agent_command: vec!["agent".to_string()],
                tool_mode: "replay".to_string(),
                suite_config_hash: None,
                cases_total: Some(1),
                extra: BTreeMap::new(),
            },
            aggregates: Aggregates {
                cases_total: 1,
                cases_pass: 1,
                cases_fail: 0,
                cases_error: 0,
                pass_rate: 1.0,
                metrics: BTreeMap::new(),
                extra: BTreeMap::new(),
            },
            cases: vec![CaseSummary {
                id: "c1".to_string(),
                status: "pass".to_string(),
                wall_ms: 100,
                tool_calls: 1,
                tool_errors: 0,
                assertions: AssertionsSummary { total: 1, failed: 0 },
                extra: BTreeMap::new(),
            }],
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baseline.json");
        write_baseline(&path, &sample()).unwrap();
        let loaded = load_baseline(&path).unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_baseline(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, BaselineError::NotFound(_)));
    }

    #[test]
    fn tolerates_unknown_fields() {
        let raw = json!({
            "schema_version": 1,
            "generated_at": "2026-01-01T00:00:00Z",
            "runledger_version": "0.1.0",
            "run": {"run_id": "r1", "mode": "replay", "exit_status": "success", "future_field": true},
            "suite": {"name": "demo", "suite_path": "s.yaml", "agent_command": [], "tool_mode": "replay"},
            "aggregates": {"cases_total": 0, "cases_pass": 0, "cases_fail": 0, "cases_error": 0, "pass_rate": 0.0, "metrics": {}},
            "cases": [],
            "future_top_level": "ignored by older readers, kept here"
        });
        let parsed: BaselineSummary = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.run.extra.get("future_field"), Some(&Value::Bool(true)));
        assert!(parsed.extra.contains_key("future_top_level"));
    }
}
