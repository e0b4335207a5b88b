// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Thin command-line front end: `run` executes a suite and writes its
//! artifacts, `diff` compares two stored summaries, `init` scaffolds a
//! new suite directory. The actual engine lives in the library crates;
//! this binary only wires argv to them and maps a `Result` to an exit
//! code.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use runledger_baseline::BaselineSummary;
use runledger_core::SuiteConfig;
use runledger_suite::RunOptions;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Exit code used for any runtime or usage failure that isn't a failed
/// suite (clap itself exits 2 on argument errors).
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "runledger", version, about = "Deterministic evaluation harness for autonomous agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every case in a suite and write its summary/run log/JUnit report.
    Run {
        /// Path to a `suite.yaml` file, or a directory containing one.
        suite: PathBuf,

        /// Only run the case with this id (may be repeated).
        #[arg(long = "case")]
        cases: Vec<String>,

        /// Directory run artifacts are written under (overrides the
        /// suite's own `output_dir`, defaults to `.runledger/runs`).
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Stored baseline to diff against (overrides the suite's own
        /// `baseline_path`).
        #[arg(long)]
        baseline: Option<PathBuf>,

        /// Print the summary document to stdout after the run.
        #[arg(long)]
        json: bool,
    },

    /// Compare two stored `summary.json` documents without running anything.
    Diff {
        /// The older, reference summary.
        baseline: PathBuf,

        /// The newer summary to compare against it.
        current: PathBuf,

        /// Print the regression report as JSON instead of plain text.
        #[arg(long)]
        json: bool,
    },

    /// Scaffold a new suite directory with one example case.
    Init {
        /// Directory to create the suite in.
        dir: PathBuf,

        /// Suite name (defaults to the directory's file name).
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("runledger=debug")
    } else {
        EnvFilter::new("runledger=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let outcome = match cli.command {
        Commands::Run {
            suite,
            cases,
            output_dir,
            baseline,
            json,
        } => cmd_run(&suite, &cases, output_dir, baseline, json).await,
        Commands::Diff {
            baseline,
            current,
            json,
        } => cmd_diff(&baseline, &current, json),
        Commands::Init { dir, name } => cmd_init(&dir, name),
    };

    match outcome {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(EXIT_RUNTIME_ERROR);
        }
    }
}

fn suite_dir_of(suite_path: &Path) -> PathBuf {
    if suite_path.is_dir() {
        suite_path.to_path_buf()
    } else {
        suite_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

async fn cmd_run(
    suite_path: &Path,
    case_filter: &[String],
    output_dir_override: Option<PathBuf>,
    baseline_override: Option<PathBuf>,
    print_json: bool,
) -> Result<i32> {
    let suite: SuiteConfig =
        runledger_config::load_suite(suite_path).context("loading suite configuration")?;
    let suite_dir = suite_dir_of(suite_path);

    let mut cases = runledger_config::load_cases(&suite_dir, &suite.cases_dir)
        .context("loading suite cases")?;
    if !case_filter.is_empty() {
        cases.retain(|c| case_filter.contains(&c.id));
        if cases.is_empty() {
            anyhow::bail!("no cases in {} matched --case filter", suite_path.display());
        }
    }

    println!(
        "running suite {:?} ({} case{}, mode {:?})",
        suite.name,
        cases.len(),
        if cases.len() == 1 { "" } else { "s" },
        suite.mode
    );

    let suite_result = runledger_suite::run_suite(&suite, &cases, &suite_dir, RunOptions::default())
        .await
        .context("running suite")?;

    let base_dir = output_dir_override
        .or_else(|| suite.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from(".runledger/runs"));
    let (run_dir, run_id) = runledger_summary::create_run_dir(&base_dir, &suite.name, None)
        .context("creating run directory")?;

    // First pass: build the summary without a regression block, so its
    // aggregates exist to diff against a baseline.
    let provisional = runledger_summary::build_summary(
        &suite,
        suite_path,
        &suite_result,
        &run_id,
        None,
        true,
        None,
    );

    let baseline_path = baseline_override.or_else(|| suite.baseline_path.clone());
    let (regression_value, regression_passed) = match &baseline_path {
        Some(path) => {
            let baseline = runledger_baseline::load_baseline(path)
                .with_context(|| format!("loading baseline {}", path.display()))?;
            let current_as_baseline: BaselineSummary =
                serde_json::from_value(serde_json::to_value(&provisional)?)
                    .context("converting run summary for regression comparison")?;
            let report = runledger_regression::compute_regression(
                &baseline,
                &current_as_baseline,
                suite.regression.as_ref(),
                path,
            );
            let passed = report.passed;
            (Some(serde_json::to_value(&report)?), passed)
        }
        None => (None, true),
    };

    let summary = runledger_summary::build_summary(
        &suite,
        suite_path,
        &suite_result,
        &run_id,
        regression_value.as_ref(),
        regression_passed,
        None,
    );

    runledger_summary::write_summary(&run_dir, &summary).context("writing summary.json")?;
    runledger_summary::write_run_log(&run_dir, &suite_result.cases).context("writing run.jsonl")?;
    runledger_summary::write_junit(&run_dir, &suite.name, &suite_result.cases)
        .context("writing junit.xml")?;

    println!(
        "{}/{} cases passed ({:.0}%), wrote {}",
        suite_result.passed_cases,
        suite_result.total_cases,
        suite_result.success_rate * 100.0,
        run_dir.display()
    );
    if let Some(path) = &baseline_path {
        println!(
            "regression vs {}: {}",
            path.display(),
            if regression_passed { "pass" } else { "fail" }
        );
    }

    if print_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(match summary.exit_status() {
        runledger_summary::ExitStatus::Success => 0,
        runledger_summary::ExitStatus::Failed | runledger_summary::ExitStatus::Error => 1,
    })
}

fn cmd_diff(baseline_path: &Path, current_path: &Path, print_json: bool) -> Result<i32> {
    let baseline = runledger_baseline::load_baseline(baseline_path)
        .with_context(|| format!("loading baseline {}", baseline_path.display()))?;
    let current = runledger_baseline::load_baseline(current_path)
        .with_context(|| format!("loading summary {}", current_path.display()))?;

    let report = runledger_regression::compute_regression(&baseline, &current, None, baseline_path);

    if print_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("regression vs {}: {}", baseline_path.display(), if report.passed { "pass" } else { "fail" });
        for check in &report.checks {
            println!("  {:?} {:?}", check.id, check.status);
        }
        if !report.case_diffs.missing_in_current.is_empty() {
            println!("  missing in current: {:?}", report.case_diffs.missing_in_current);
        }
        if !report.case_diffs.new_in_current.is_empty() {
            println!("  new in current: {:?}", report.case_diffs.new_in_current);
        }
        if !report.case_diffs.status_changed.is_empty() {
            println!("  status changed: {:?}", report.case_diffs.status_changed.iter().map(|c| &c.id).collect::<Vec<_>>());
        }
        for warning in &report.warnings {
            println!("  warning: {warning}");
        }
    }

    Ok(if report.passed { 0 } else { 1 })
}

fn cmd_init(dir: &Path, name: Option<String>) -> Result<i32> {
    let name = name.unwrap_or_else(|| {
        dir.file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("demo")
            .to_string()
    });

    std::fs::create_dir_all(dir.join("cases")).context("creating cases directory")?;
    std::fs::create_dir_all(dir.join("cassettes")).context("creating cassettes directory")?;

    let suite_yaml = format!(
        r#"suite_name: {name}
agent_command: ["python3", "agent.py"]
mode: replay
cases_path: cases
tool_registry: ["search_docs"]
assertions:
  - type: required_fields
    fields: ["reply"]
"#
    );
    write_if_absent(&dir.join("suite.yaml"), &suite_yaml)?;

    let case_yaml = r#"id: t1
description: "First example case."
input:
  ticket: "reset password"
cassette: cassettes/t1.jsonl
"#;
    write_if_absent(&dir.join("cases/t1.yaml"), case_yaml)?;

    let cassette = r#"{"tool":"search_docs","args":{"q":"reset password"},"ok":true,"result":{"hits":[{"title":"Reset password"}]}}
"#;
    write_if_absent(&dir.join("cassettes/t1.jsonl"), cassette)?;

    println!("scaffolded suite {name:?} at {}", dir.display());
    Ok(0)
}

fn write_if_absent(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        println!("skipping existing {}", path.display());
        return Ok(());
    }
    std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}
