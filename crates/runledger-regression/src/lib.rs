// SPDX-License-Identifier: MIT OR Apache-2.0
//! runledger-regression
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Compares a just-completed run's summary against a stored
//! [`BaselineSummary`], producing a report with one check per configured
//! threshold plus a diff of which cases appeared, disappeared, or
//! changed status. A check with no configured threshold is `skipped`,
//! never `pass` — skip and pass are distinct and both carry through to
//! `passed`, which only `fail` can flip.

use runledger_baseline::BaselineSummary;
use runledger_core::RegressionThresholds;
use serde::Serialize;
use std::path::Path;

/// One threshold check's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// The metric stayed within the configured threshold.
    Pass,
    /// The metric exceeded the configured threshold.
    Fail,
    /// No threshold was configured, or the baseline had no comparable value.
    Skipped,
}

/// A single regression check's full result.
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    /// Check identifier (`min_pass_rate`, `max_avg_wall_ms_delta_pct`, `max_p95_wall_ms_delta_pct`).
    pub id: &'static str,
    /// Outcome of this check.
    pub status: CheckStatus,
    /// Configured threshold, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Baseline value being compared against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<f64>,
    /// Current value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    /// Absolute difference, for the pass-rate check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    /// Fractional difference, for the latency checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_pct: Option<f64>,
    /// Why the check was skipped, when it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'static str>,
}

/// A case whose status changed between baseline and current run.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    /// Case identifier.
    pub id: String,
    /// Status recorded in the baseline.
    pub baseline: String,
    /// Status recorded in the current run.
    pub current: String,
}

/// Which cases appeared, disappeared, or changed status between runs.
#[derive(Debug, Clone, Serialize)]
pub struct CaseDiffs {
    /// Case ids present in the baseline but absent from the current run.
    pub missing_in_current: Vec<String>,
    /// Case ids present in the current run but absent from the baseline.
    pub new_in_current: Vec<String>,
    /// Case ids present in both whose status differs.
    pub status_changed: Vec<StatusChange>,
}

/// The full regression comparison result.
#[derive(Debug, Clone, Serialize)]
pub struct RegressionReport {
    /// Path the baseline was loaded from.
    pub baseline_path: String,
    /// `true` unless at least one check's status is `fail`. A report with
    /// every check `skipped` is `passed`.
    pub passed: bool,
    /// One entry per configured/skippable threshold.
    pub checks: Vec<Check>,
    /// Case-level diffs between the two runs.
    pub case_diffs: CaseDiffs,
    /// Non-fatal warnings, e.g. a `schema_version` mismatch.
    pub warnings: Vec<String>,
}

fn delta_pct(baseline: Option<f64>, current: Option<f64>) -> Option<f64> {
    let (b, c) = (baseline?, current?);
    if b == 0.0 {
        return None;
    }
    Some((c - b) / b)
}

fn metric_value(summary: &BaselineSummary, metric: &str, field: impl Fn(&runledger_baseline::MetricSummary) -> Option<f64>) -> Option<f64> {
    summary.aggregates.metrics.get(metric).and_then(field)
}

/// Compare `current` against `baseline` under `thresholds`, recording
/// `baseline_path` in the report for display purposes.
#[must_use]
pub fn compute_regression(
    baseline: &BaselineSummary,
    current: &BaselineSummary,
    thresholds: Option<&RegressionThresholds>,
    baseline_path: &Path,
) -> RegressionReport {
    let mut warnings = Vec::new();
    if baseline.schema_version != current.schema_version {
        warnings.push(
            "Baseline schema_version does not match current summary schema_version.".to_string(),
        );
    }

    let baseline_ids: std::collections::BTreeSet<&str> =
        baseline.cases.iter().map(|c| c.id.as_str()).collect();
    let current_ids: std::collections::BTreeSet<&str> =
        current.cases.iter().map(|c| c.id.as_str()).collect();

    let missing_in_current: Vec<String> = baseline_ids
        .difference(&current_ids)
        .map(|s| (*s).to_string())
        .collect();
    let new_in_current: Vec<String> = current_ids
        .difference(&baseline_ids)
        .map(|s| (*s).to_string())
        .collect();

    let mut status_changed = Vec::new();
    for id in baseline_ids.intersection(&current_ids) {
        let b = baseline.cases.iter().find(|c| c.id == *id).expect("id came from baseline.cases");
        let c = current.cases.iter().find(|c| c.id == *id).expect("id came from current.cases");
        if b.status != c.status {
            status_changed.push(StatusChange {
                id: (*id).to_string(),
                baseline: b.status.clone(),
                current: c.status.clone(),
            });
        }
    }

    let baseline_pass_rate = baseline.aggregates.pass_rate;
    let current_pass_rate = current.aggregates.pass_rate;
    let baseline_wall_mean = metric_value(baseline, "wall_ms", |m| m.mean);
    let current_wall_mean = metric_value(current, "wall_ms", |m| m.mean);
    let baseline_wall_p95 = metric_value(baseline, "wall_ms", |m| m.p95);
    let current_wall_p95 = metric_value(current, "wall_ms", |m| m.p95);

    let mut checks = Vec::new();
    let mut passed = true;
    let mut push = |check: Check| {
        if check.status == CheckStatus::Fail {
            passed = false;
        }
        checks.push(check);
    };

    match thresholds.and_then(|t| t.min_pass_rate) {
        None => push(Check {
            id: "min_pass_rate",
            status: CheckStatus::Skipped,
            threshold: None,
            baseline: Some(baseline_pass_rate),
            current: Some(current_pass_rate),
            delta: Some(current_pass_rate - baseline_pass_rate),
            delta_pct: None,
            note: Some("No min_pass_rate configured."),
        }),
        Some(min_pass_rate) => push(Check {
            id: "min_pass_rate",
            status: if current_pass_rate >= min_pass_rate {
                CheckStatus::Pass
            } else {
                CheckStatus::Fail
            },
            threshold: Some(min_pass_rate),
            baseline: Some(baseline_pass_rate),
            current: Some(current_pass_rate),
            delta: Some(current_pass_rate - baseline_pass_rate),
            delta_pct: None,
            note: None,
        }),
    }

    push(latency_check(
        "max_avg_wall_ms_delta_pct",
        thresholds.and_then(|t| t.max_avg_wall_ms_delta_pct),
        baseline_wall_mean,
        current_wall_mean,
    ));
    push(latency_check(
        "max_p95_wall_ms_delta_pct",
        thresholds.and_then(|t| t.max_p95_wall_ms_delta_pct),
        baseline_wall_p95,
        current_wall_p95,
    ));

    RegressionReport {
        baseline_path: baseline_path.display().to_string(),
        passed,
        checks,
        case_diffs: CaseDiffs {
            missing_in_current,
            new_in_current,
            status_changed,
        },
        warnings,
    }
}

fn latency_check(
    id: &'static str,
    threshold: Option<f64>,
    baseline: Option<f64>,
    current: Option<f64>,
) -> Check {
    let pct = delta_pct(baseline, current);
    match threshold {
        None => Check {
            id,
            status: CheckStatus::Skipped,
            threshold: None,
            baseline,
            current,
            delta: None,
            delta_pct: pct,
            note: Some("No threshold configured."),
        },
        Some(limit) => match pct {
            None => Check {
                id,
                status: CheckStatus::Skipped,
                threshold: Some(limit),
                baseline,
                current,
                delta: None,
                delta_pct: None,
                note: Some("Baseline metric missing or zero."),
            },
            Some(pct) => Check {
                id,
                status: if pct <= limit { CheckStatus::Pass } else { CheckStatus::Fail },
                threshold: Some(limit),
                baseline,
                current,
                delta: None,
                delta_pct: Some(pct),
                note: None,
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runledger_baseline::{Aggregates, AssertionsSummary, CaseSummary, MetricSummary, RunInfo, SuiteInfo};
    use std::collections::BTreeMap;

    fn summary(pass_rate: f64, wall_mean: f64, wall_p95: f64, case_ids: &[(&str, &str)]) -> BaselineSummary {
        let mut metrics = BTreeMap::new();
        metrics.insert(
            "wall_ms".to_string(),
            MetricSummary {
                min: Some(wall_mean),
                p50: Some(wall_mean),
                p95: Some(wall_p95),
                mean: Some(wall_mean),
                max: Some(wall_p95),
            },
        );
        BaselineSummary {
            schema_version: 1,
            generated_at: "2026-01-01T00:00:00Z".to_string(),
            runledger_version: "0.1.0".to_string(),
            run: RunInfo {
                run_id: "r".to_string(),
                mode: "replay".to_string(),
                exit_status: "success".to_string(),
                git_sha: None,
                ci: None,
                extra: BTreeMap::new(),
            },
            suite: SuiteInfo {
                name: "demo".to_string(),
                suite_path: "suite.yaml".to_string(),
                agent_command: vec![],
                tool_mode: "replay".to_string(),
                suite_config_hash: None,
                cases_total: Some(case_ids.len() as u64),
                extra: BTreeMap::new(),
            },
            aggregates: Aggregates {
                cases_total: case_ids.len() as u64,
                cases_pass: case_ids.len() as u64,
                cases_fail: 0,
                cases_error: 0,
                pass_rate,
                metrics,
                extra: BTreeMap::new(),
            },
            cases: case_ids
                .iter()
                .map(|(id, status)| CaseSummary {
                    id: (*id).to_string(),
                    status: (*status).to_string(),
                    wall_ms: wall_mean as u64,
                    tool_calls: 1,
                    tool_errors: 0,
                    assertions: AssertionsSummary { total: 1, failed: 0 },
                    extra: BTreeMap::new(),
                })
                .collect(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn latency_regression_fails_when_delta_exceeds_threshold() {
        let baseline = summary(1.0, 100.0, 100.0, &[("t1", "pass")]);
        let current = summary(1.0, 140.0, 140.0, &[("t1", "pass")]);
        let thresholds = RegressionThresholds {
            min_pass_rate: Some(1.0),
            max_avg_wall_ms_delta_pct: Some(0.2),
            max_p95_wall_ms_delta_pct: Some(0.2),
        };
        let report = compute_regression(&baseline, &current, Some(&thresholds), Path::new("baseline.json"));
        assert!(!report.passed);
        let by_id = |id: &str| report.checks.iter().find(|c| c.id == id).unwrap();
        assert_eq!(by_id("min_pass_rate").status, CheckStatus::Pass);
        assert_eq!(by_id("max_avg_wall_ms_delta_pct").status, CheckStatus::Fail);
        assert_eq!(by_id("max_p95_wall_ms_delta_pct").status, CheckStatus::Fail);
        assert!((by_id("max_avg_wall_ms_delta_pct").delta_pct.unwrap() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn unconfigured_thresholds_are_skipped_not_passed() {
        let baseline = summary(1.0, 100.0, 100.0, &[("t1", "pass")]);
        let current = summary(1.0, 100.0, 100.0, &[("t1", "pass")]);
        let report = compute_regression(&baseline, &current, None, Path::new("baseline.json"));
        assert!(report.passed);
        assert!(report.checks.iter().all(|c| c.status == CheckStatus::Skipped));
    }

    #[test]
    fn case_diffs_detect_missing_new_and_status_changed() {
        let baseline = summary(1.0, 100.0, 100.0, &[("t1", "pass"), ("t2", "pass")]);
        let current = summary(0.5, 100.0, 100.0, &[("t1", "fail"), ("t3", "pass")]);
        let report = compute_regression(&baseline, &current, None, Path::new("baseline.json"));
        assert_eq!(report.case_diffs.missing_in_current, vec!["t2".to_string()]);
        assert_eq!(report.case_diffs.new_in_current, vec!["t3".to_string()]);
        assert_eq!(report.case_diffs.status_changed.len(), 1);
        assert_eq!(report.case_diffs.status_changed[0].id, "t1");
    }

    #[test]
    fn schema_version_mismatch_warns_but_still_computes_checks() {
        let mut baseline = summary(1.0, 100.0, 100.0, &[("t1", "pass")]);
        baseline.schema_version = 0;
        let current = summary(1.0, 100.0, 100.0, &[("t1", "pass")]);
        let report = compute_regression(&baseline, &current, None, Path::new("baseline.json"));
        assert_eq!(report.warnings.len(), 1);
        assert!(!report.checks.is_empty());
    }
}
