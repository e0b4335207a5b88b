// SPDX-License-Identifier: MIT OR Apache-2.0
//! Snapshot tests for the shape of `summary.json` and `junit.xml`.
//!
//! `generated_at`, `run_id`, and `runledger_version` vary per run, so they
//! are redacted before the value is compared against the committed
//! snapshot — only the document's shape is under test here.

use chrono::{TimeZone, Utc};
use runledger_core::{BudgetSpec, CaseResult, Failure, FailureKind, Mode, SuiteConfig, SuiteResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn suite() -> SuiteConfig {
    SuiteConfig {
        name: "demo".to_string(),
        agent_command: vec!["python3".to_string(), "agent.py".to_string()],
        mode: Mode::Replay,
        cases_dir: PathBuf::from("cases"),
        allowed_tools: ["search_docs".to_string()].into_iter().collect(),
        tool_module: None,
        assertions: vec![],
        budget: Some(BudgetSpec {
            max_tool_calls: Some(5),
            ..Default::default()
        }),
        regression: None,
        baseline_path: None,
        output_dir: None,
    }
}

fn case(id: &str, passed: bool) -> CaseResult {
    let mut tool_calls_by_name = BTreeMap::new();
    tool_calls_by_name.insert("search_docs".to_string(), 1);
    CaseResult {
        case_id: id.to_string(),
        passed,
        output: Some(serde_json::json!({"reply": "ok"}).as_object().unwrap().clone()),
        trace: vec![],
        wall_ms: 42,
        tool_calls: 1,
        tool_errors: 0,
        tool_calls_by_name,
        tool_errors_by_name: BTreeMap::new(),
        assertions_total: 1,
        assertions_failed: u64::from(!passed),
        failed_assertions: vec![],
        tokens_in: Some(120),
        tokens_out: Some(30),
        cost_usd: Some(0.002),
        steps: Some(2),
        cassette_path: Some("cassettes/t1.jsonl".to_string()),
        cassette_sha256: Some("deadbeef".repeat(8)),
        failure: if passed {
            None
        } else {
            Some(Failure {
                kind: FailureKind::AssertionFailed,
                message: "missing required field(s): reply".to_string(),
            })
        },
    }
}

#[test]
fn summary_json_shape_is_stable() {
    let suite = suite();
    let cases = vec![case("t1", true), case("t2", false)];
    let result = SuiteResult::from_cases("demo", cases);
    let generated_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let summary = runledger_summary::build_summary(
        &suite,
        Path::new("suites/demo/suite.yaml"),
        &result,
        "20260101-000000-abcdef",
        None,
        true,
        Some(generated_at),
    );
    let value = serde_json::to_value(&summary).unwrap();

    insta::with_settings!({
        sort_maps => true,
    }, {
        insta::assert_json_snapshot!("summary_json_shape", value, {
            ".generated_at" => "[generated_at]",
            ".runledger_version" => "[runledger_version]",
        });
    });
}

#[test]
fn junit_xml_shape_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let cases = vec![case("t1", true), case("t2", false)];
    let path = runledger_summary::write_junit(dir.path(), "demo", &cases).unwrap();
    let xml = std::fs::read_to_string(path).unwrap();
    insta::assert_snapshot!("junit_xml_shape", xml);
}
