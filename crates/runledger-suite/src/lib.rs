// SPDX-License-Identifier: MIT OR Apache-2.0
//! runledger-suite
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Runs every case in a suite, one at a time, and folds the results. No
//! parallelism: cases share one resolved tool registry and must not
//! race each other's cassette or tool-registry state.

use runledger_core::{BudgetSpec, CaseConfig, Mode, SuiteConfig, SuiteResult};
use runledger_tools::{ToolHandler, ToolRegistry, ToolsError};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failures that stop a suite before any case runs.
#[derive(Debug, Error)]
pub enum SuiteRunError {
    /// Record/live mode needs a tool registry and one or more allowed
    /// tools have no handler.
    #[error(transparent)]
    Tools(#[from] ToolsError),
}

/// Everything the runner needs beyond the suite's own configuration.
#[derive(Default)]
pub struct RunOptions {
    /// User-supplied tool handlers, consulted before the built-ins.
    pub tool_overlay: Option<BTreeMap<String, Arc<dyn ToolHandler>>>,
    /// Extra environment variables passed to every case's agent process.
    pub env_vars: BTreeMap<String, String>,
    /// Working directory for every case's agent process.
    pub working_dir: Option<std::path::PathBuf>,
    /// How long each case waits for a single agent message.
    pub receive_timeout: Option<Duration>,
}

/// Run every case in `cases` against `suite`, in file order, and fold the
/// results into a [`SuiteResult`].
///
/// `suite_dir` is where relative `json_schema` assertion paths are
/// resolved against (the suite's home directory, not the cases
/// directory, since a case may name a schema defined at suite scope).
///
/// # Errors
///
/// Returns [`SuiteRunError::Tools`] if `suite.mode` is `record` or `live`
/// and the tool registry cannot cover every allowed tool name. No
/// individual case failure is ever returned as an `Err`: it becomes a
/// failing [`CaseResult`](runledger_core::CaseResult) instead.
pub async fn run_suite(
    suite: &SuiteConfig,
    cases: &[CaseConfig],
    suite_dir: &Path,
    options: RunOptions,
) -> Result<SuiteResult, SuiteRunError> {
    let registry = match suite.mode {
        Mode::Replay => None,
        Mode::Record | Mode::Live => {
            Some(ToolRegistry::resolve(&suite.allowed_tools, options.tool_overlay)?)
        }
    };

    let receive_timeout = options
        .receive_timeout
        .unwrap_or(runledger_transport::DEFAULT_RECEIVE_TIMEOUT);

    let mut results = Vec::with_capacity(cases.len());
    for case in cases {
        let assertions =
            runledger_assert::merge_assertions(&suite.assertions, case.assertions.as_deref());
        let budget = BudgetSpec::merge(suite.budget.clone(), case.budget.clone());

        let engine = runledger_case::CaseEngine {
            agent_command: &suite.agent_command,
            mode: suite.mode,
            allowed_tools: &suite.allowed_tools,
            assertions,
            budget,
            schema_base_dir: suite_dir,
            tool_registry: registry.as_ref(),
            receive_timeout,
            env_vars: options.env_vars.clone(),
            working_dir: options.working_dir.clone(),
        };
        results.push(engine.run(case).await);
    }

    Ok(SuiteResult::from_cases(suite.name.clone(), results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::io::Write as _;

    fn agent_script(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".sh").tempfile().unwrap();
        writeln!(f, "#!/bin/sh\n{body}").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(f.path()).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(f.path(), perms).unwrap();
        }
        f
    }

    #[tokio::test]
    async fn runs_every_case_and_folds_into_suite_result() {
        let script = agent_script(
            r#"read line
echo '{"type":"final_output","output":{"answer":"ok"}}'"#,
        );
        let command = vec!["/bin/sh".to_string(), script.path().display().to_string()];
        let suite = SuiteConfig {
            name: "demo".to_string(),
            agent_command: command,
            mode: Mode::Replay,
            cases_dir: std::path::PathBuf::from("cases"),
            allowed_tools: BTreeSet::new(),
            tool_module: None,
            assertions: vec![],
            budget: None,
            regression: None,
            baseline_path: None,
            output_dir: None,
        };

        let cassette_dir = tempfile::tempdir().unwrap();
        let make_case = |id: &str| CaseConfig {
            id: id.to_string(),
            description: None,
            input: serde_json::Map::new(),
            cassette_path: cassette_dir.path().join(format!("{id}.jsonl")),
            assertions: None,
            budget: None,
        };
        let cases = vec![make_case("a"), make_case("b")];

        let result = run_suite(&suite, &cases, cassette_dir.path(), RunOptions::default())
            .await
            .unwrap();
        assert_eq!(result.total_cases, 2);
        assert_eq!(result.passed_cases, 2);
        assert!(result.passed);
    }

    #[tokio::test]
    async fn record_mode_without_handler_for_allowed_tool_fails_fast() {
        let suite = SuiteConfig {
            name: "demo".to_string(),
            agent_command: vec!["true".to_string()],
            mode: Mode::Record,
            cases_dir: std::path::PathBuf::from("cases"),
            allowed_tools: ["nonexistent_tool".to_string()].into_iter().collect(),
            tool_module: None,
            assertions: vec![],
            budget: None,
            regression: None,
            baseline_path: None,
            output_dir: None,
        };
        let err = run_suite(&suite, &[], Path::new("."), RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SuiteRunError::Tools(_)));
    }
}
