// SPDX-License-Identifier: MIT OR Apache-2.0
//! runledger-summary
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Turns a [`SuiteResult`] into the three on-disk run artifacts:
//! `summary.json` (machine-readable aggregate), `run.jsonl` (one redacted
//! trace event per line), and `junit.xml` (for CI test reporting).
//! Every write passes through [`runledger_redact::redact`] first; nothing
//! here knows about regression or baselines, only about the run that just
//! happened.

use chrono::{DateTime, Utc};
use runledger_core::{CaseResult, CaseStatus, Mode, SuiteConfig, SuiteResult};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors writing run artifacts to disk.
#[derive(Debug, Error)]
pub enum SummaryError {
    /// Creating the run directory, or writing one of its files, failed.
    #[error("failed to write {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Create `base_dir/<suite_name>/<run_id>`, generating a run id of the
/// form `YYYYMMDD-HHMMSSZ-xxxxxx` if one is not supplied.
///
/// # Errors
///
/// Returns [`SummaryError::Io`] if the directory cannot be created.
pub fn create_run_dir(
    base_dir: &Path,
    suite_name: &str,
    run_id: Option<String>,
) -> Result<(PathBuf, String), SummaryError> {
    let run_id = run_id.unwrap_or_else(|| {
        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let suffix = &uuid::Uuid::new_v4().simple().to_string()[..6];
        format!("{timestamp}-{suffix}")
    });
    let run_dir = base_dir.join(suite_name).join(&run_id);
    std::fs::create_dir_all(&run_dir).map_err(|source| SummaryError::Io {
        path: run_dir.clone(),
        source,
    })?;
    Ok((run_dir, run_id))
}

fn percentile(values_sorted: &[f64], pct: f64) -> f64 {
    let n = values_sorted.len();
    let rank = ((pct / 100.0) * n as f64).ceil() as i64 - 1;
    let rank = rank.clamp(0, n as i64 - 1) as usize;
    values_sorted[rank]
}

/// min/p50/p95/mean/max over the non-null values of one metric, or all
/// `None` if no case reported a value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSummary {
    /// Minimum observed value.
    pub min: Option<f64>,
    /// 50th percentile.
    pub p50: Option<f64>,
    /// 95th percentile.
    pub p95: Option<f64>,
    /// Arithmetic mean.
    pub mean: Option<f64>,
    /// Maximum observed value.
    pub max: Option<f64>,
}

impl MetricSummary {
    /// Summarize a metric that may be absent on some cases.
    #[must_use]
    pub fn of(values: impl IntoIterator<Item = Option<f64>>) -> Self {
        let mut numeric: Vec<f64> = values.into_iter().flatten().collect();
        if numeric.is_empty() {
            return Self {
                min: None,
                p50: None,
                p95: None,
                mean: None,
                max: None,
            };
        }
        numeric.sort_by(|a, b| a.partial_cmp(b).expect("metric values are never NaN"));
        let mean = numeric.iter().sum::<f64>() / numeric.len() as f64;
        Self {
            min: numeric.first().copied(),
            p50: Some(percentile(&numeric, 50.0)),
            p95: Some(percentile(&numeric, 95.0)),
            mean: Some(mean),
            max: numeric.last().copied(),
        }
    }
}

/// The top-level outcome of a run, classifying beyond per-case pass/fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Every case passed and any regression check passed.
    Success,
    /// At least one case failed an assertion or budget, or regression failed.
    Failed,
    /// At least one case hit an infrastructural or agent-level fault.
    Error,
}

fn case_status_str(status: CaseStatus) -> &'static str {
    match status {
        CaseStatus::Pass => "pass",
        CaseStatus::Fail => "fail",
        CaseStatus::Error => "error",
    }
}

#[derive(Debug, Clone, Serialize)]
struct RunInfo {
    run_id: String,
    mode: Mode,
    exit_status: ExitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    git_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ci: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct SuiteInfo {
    name: String,
    suite_path: String,
    agent_command: Vec<String>,
    tool_mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    suite_config_hash: Option<String>,
    cases_total: u64,
}

#[derive(Debug, Clone, Serialize)]
struct Aggregates {
    cases_total: u64,
    cases_pass: u64,
    cases_fail: u64,
    cases_error: u64,
    pass_rate: f64,
    metrics: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
struct ReplayInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    cassette_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cassette_sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct AssertionsInfo {
    total: u64,
    failed: u64,
}

#[derive(Debug, Clone, Serialize)]
struct CaseSummary {
    id: String,
    status: &'static str,
    wall_ms: u64,
    tool_calls: u64,
    tool_errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tokens_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tokens_out: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    steps: Option<u64>,
    tool_calls_by_name: std::collections::BTreeMap<String, u64>,
    tool_errors_by_name: std::collections::BTreeMap<String, u64>,
    replay: ReplayInfo,
    assertions: AssertionsInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
    failed_assertions: Vec<runledger_core::AssertionFailureRecord>,
}

/// The full `summary.json` document.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    schema_version: u32,
    generated_at: String,
    runledger_version: String,
    run: RunInfo,
    suite: SuiteInfo,
    aggregates: Aggregates,
    cases: Vec<CaseSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy_snapshot: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    regression: Option<Value>,
}

impl Summary {
    /// The run's overall outcome, for callers that need to decide a
    /// process exit code without walking the serialized JSON.
    #[must_use]
    pub fn exit_status(&self) -> ExitStatus {
        self.run.exit_status
    }

    /// The run id this summary was built under.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }
}

fn policy_snapshot(suite: &SuiteConfig) -> Option<Value> {
    let thresholds = suite.regression.as_ref()?;
    let mut out = Map::new();
    let mut thresholds_obj = Map::new();
    let mut regression_obj = Map::new();
    if let Some(p) = thresholds.min_pass_rate {
        thresholds_obj.insert("min_pass_rate".to_string(), Value::from(p));
    }
    if let Some(p) = thresholds.max_avg_wall_ms_delta_pct {
        regression_obj.insert("max_avg_wall_ms_delta_pct".to_string(), Value::from(p));
    }
    if let Some(p) = thresholds.max_p95_wall_ms_delta_pct {
        regression_obj.insert("max_p95_wall_ms_delta_pct".to_string(), Value::from(p));
    }
    if !thresholds_obj.is_empty() {
        out.insert("thresholds".to_string(), Value::Object(thresholds_obj));
    }
    if !regression_obj.is_empty() {
        out.insert("regression".to_string(), Value::Object(regression_obj));
    }
    if out.is_empty() {
        None
    } else {
        Some(Value::Object(out))
    }
}

fn metric(values: impl IntoIterator<Item = Option<f64>>) -> Value {
    serde_json::to_value(MetricSummary::of(values)).expect("MetricSummary always serializes")
}

/// Build the in-memory summary document for a completed suite run.
///
/// `regression` is the already-computed regression report (as a JSON
/// value, produced by `runledger-regression`) when a baseline was
/// supplied; `None` otherwise. `regression_passed` narrows `exit_status`
/// to `failed` when the regression report's own `passed` field is
/// `false`, even if every case in this run passed.
#[must_use]
pub fn build_summary(
    suite: &SuiteConfig,
    suite_path: &Path,
    suite_result: &SuiteResult,
    run_id: &str,
    regression: Option<&Value>,
    regression_passed: bool,
    generated_at: Option<DateTime<Utc>>,
) -> Summary {
    let mut cases: Vec<&CaseResult> = suite_result.cases.iter().collect();
    cases.sort_by(|a, b| a.case_id.cmp(&b.case_id));

    let cases_total = cases.len() as u64;
    let statuses: Vec<CaseStatus> = cases.iter().map(|c| c.status()).collect();
    let cases_pass = statuses.iter().filter(|s| **s == CaseStatus::Pass).count() as u64;
    let cases_fail = statuses.iter().filter(|s| **s == CaseStatus::Fail).count() as u64;
    let cases_error = statuses.iter().filter(|s| **s == CaseStatus::Error).count() as u64;
    let pass_rate = if cases_total == 0 {
        0.0
    } else {
        cases_pass as f64 / cases_total as f64
    };

    let mut metrics = Map::new();
    metrics.insert(
        "wall_ms".to_string(),
        metric(cases.iter().map(|c| Some(c.wall_ms as f64))),
    );
    metrics.insert(
        "tool_calls".to_string(),
        metric(cases.iter().map(|c| Some(c.tool_calls as f64))),
    );
    metrics.insert(
        "tool_errors".to_string(),
        metric(cases.iter().map(|c| Some(c.tool_errors as f64))),
    );
    metrics.insert(
        "tokens_in".to_string(),
        metric(cases.iter().map(|c| c.tokens_in.map(|v| v as f64))),
    );
    metrics.insert(
        "tokens_out".to_string(),
        metric(cases.iter().map(|c| c.tokens_out.map(|v| v as f64))),
    );
    metrics.insert(
        "cost_usd".to_string(),
        metric(cases.iter().map(|c| c.cost_usd)),
    );
    metrics.insert(
        "steps".to_string(),
        metric(cases.iter().map(|c| c.steps.map(|v| v as f64))),
    );

    let exit_status = if cases_error > 0 {
        ExitStatus::Error
    } else if cases_fail > 0 || !regression_passed {
        ExitStatus::Failed
    } else {
        ExitStatus::Success
    };

    let generated_at = generated_at.unwrap_or_else(Utc::now);

    let case_summaries = cases
        .iter()
        .zip(statuses.iter())
        .map(|(c, status)| CaseSummary {
            id: c.case_id.clone(),
            status: case_status_str(*status),
            wall_ms: c.wall_ms,
            tool_calls: c.tool_calls,
            tool_errors: c.tool_errors,
            tokens_in: c.tokens_in,
            tokens_out: c.tokens_out,
            cost_usd: c.cost_usd,
            steps: c.steps,
            tool_calls_by_name: c.tool_calls_by_name.clone(),
            tool_errors_by_name: c.tool_errors_by_name.clone(),
            replay: ReplayInfo {
                cassette_path: c.cassette_path.clone(),
                cassette_sha256: c.cassette_sha256.clone(),
            },
            assertions: AssertionsInfo {
                total: c.assertions_total,
                failed: c.assertions_failed,
            },
            failure_reason: c.failure.as_ref().map(|f| f.message.clone()),
            failed_assertions: c.failed_assertions.clone(),
        })
        .collect();

    Summary {
        schema_version: 1,
        generated_at: generated_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        runledger_version: env!("CARGO_PKG_VERSION").to_string(),
        run: RunInfo {
            run_id: run_id.to_string(),
            mode: suite.mode,
            exit_status,
            git_sha: std::env::var("GITHUB_SHA").ok(),
            ci: None,
        },
        suite: SuiteInfo {
            name: suite.name.clone(),
            suite_path: suite_path.display().to_string(),
            agent_command: suite.agent_command.clone(),
            tool_mode: suite.mode,
            suite_config_hash: None,
            cases_total,
        },
        aggregates: Aggregates {
            cases_total,
            cases_pass,
            cases_fail,
            cases_error,
            pass_rate,
            metrics,
        },
        cases: case_summaries,
        policy_snapshot: policy_snapshot(suite),
        regression: regression.cloned(),
    }
}

/// Write `summary.json` into `run_dir`, redacted and with sorted keys.
///
/// # Errors
///
/// Returns [`SummaryError::Io`] on write failure.
pub fn write_summary(run_dir: &Path, summary: &Summary) -> Result<PathBuf, SummaryError> {
    let path = run_dir.join("summary.json");
    let value = serde_json::to_value(summary).expect("Summary always serializes");
    let value = runledger_redact::canonicalize(runledger_redact::redact(value));
    let text = serde_json::to_string_pretty(&value).expect("canonicalized value always serializes");
    std::fs::write(&path, format!("{text}\n")).map_err(|source| SummaryError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Write `run.jsonl`: one redacted trace event per line, in case order.
///
/// # Errors
///
/// Returns [`SummaryError::Io`] on write failure.
pub fn write_run_log(run_dir: &Path, cases: &[CaseResult]) -> Result<PathBuf, SummaryError> {
    let path = run_dir.join("run.jsonl");
    let mut out = String::new();
    for case in cases {
        for event in &case.trace {
            let value = serde_json::to_value(event).expect("TraceEvent always serializes");
            let value = runledger_redact::redact(value);
            out.push_str(&serde_json::to_string(&value).expect("redacted value always serializes"));
            out.push('\n');
        }
    }
    std::fs::write(&path, out).map_err(|source| SummaryError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Write a minimal `junit.xml`: one `<testcase>` per case, with a nested
/// `<failure>` element when the case didn't pass.
///
/// # Errors
///
/// Returns [`SummaryError::Io`] on write failure.
pub fn write_junit(run_dir: &Path, suite_name: &str, cases: &[CaseResult]) -> Result<PathBuf, SummaryError> {
    use std::fmt::Write as _;

    let path = run_dir.join("junit.xml");
    let tests = cases.len();
    let failures = cases.iter().filter(|c| !c.passed).count();
    let time_seconds = cases.iter().map(|c| c.wall_ms).sum::<u64>() as f64 / 1000.0;

    let mut xml = String::new();
    let _ = write!(
        xml,
        r#"<testsuite name="{}" tests="{tests}" failures="{failures}" time="{time_seconds:.3}">"#,
        xml_escape(suite_name)
    );
    for case in cases {
        let case_time = case.wall_ms as f64 / 1000.0;
        let _ = write!(
            xml,
            r#"<testcase name="{}" time="{case_time:.3}">"#,
            xml_escape(&case.case_id)
        );
        if let Some(failure) = &case.failure {
            let _ = write!(
                xml,
                r#"<failure message="{}">{}</failure>"#,
                xml_escape(&failure.message),
                xml_escape(&format!("{:?}", failure.kind))
            );
        }
        xml.push_str("</testcase>");
    }
    xml.push_str("</testsuite>");

    std::fs::write(&path, xml).map_err(|source| SummaryError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
