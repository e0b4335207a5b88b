// SPDX-License-Identifier: MIT OR Apache-2.0
//! runledger-case
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Drives a single case: spawns the agent, exchanges protocol messages,
//! mediates tool calls against a cassette or a real [`ToolRegistry`], and
//! folds the exchange into a [`CaseResult`]. Never returns an `Err` —
//! every way a case can fail becomes a [`Failure`] inside the result, per
//! the taxonomy in [`FailureKind`].

use chrono::Utc;
use runledger_cassette::{append_entry, CassetteEntry, CassetteStore};
use runledger_core::{
    AssertionSpec, BudgetSpec, CaseConfig, CaseResult, Failure, FailureKind, Mode, TraceEvent,
};
use runledger_protocol::ProtocolMessage;
use runledger_tools::ToolRegistry;
use runledger_transport::{AgentTransport, TransportConfig};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::{Duration, Instant};

/// Everything a case needs that does not change from case to case within
/// a suite: the agent command, mode, tool allow-list, merged assertions
/// and budget, and (for record/live) a resolved tool registry.
pub struct CaseEngine<'a> {
    /// Argv used to launch the agent for this case.
    pub agent_command: &'a [String],
    /// Tool mediation mode.
    pub mode: Mode,
    /// Tool names the agent may call.
    pub allowed_tools: &'a BTreeSet<String>,
    /// Assertions merged from suite and case, in evaluation order.
    pub assertions: Vec<AssertionSpec>,
    /// Budget merged from suite and case.
    pub budget: Option<BudgetSpec>,
    /// Directory relative `json_schema` assertion paths resolve against.
    pub schema_base_dir: &'a Path,
    /// Real tool handlers, required for record and live mode.
    pub tool_registry: Option<&'a ToolRegistry>,
    /// How long to wait for each agent response.
    pub receive_timeout: Duration,
    /// Extra environment variables passed to the agent process.
    pub env_vars: BTreeMap<String, String>,
    /// Working directory for the agent process.
    pub working_dir: Option<std::path::PathBuf>,
}

impl CaseEngine<'_> {
    /// Run one case to completion.
    pub async fn run(&self, case: &CaseConfig) -> CaseResult {
        tracing::debug!(target: "runledger.case", case_id = %case.id, mode = ?self.mode, "starting case");
        let start = Instant::now();
        let mut trace = Vec::new();
        let mut builder = Accumulator::default();

        let mut cassette = match self.mode {
            Mode::Replay => match CassetteStore::load(&case.cassette_path) {
                Ok(store) => store,
                Err(e) => {
                    return self.finish(
                        case,
                        trace,
                        start,
                        builder,
                        Some(Failure {
                            kind: FailureKind::CassetteError,
                            message: e.to_string(),
                        }),
                    );
                }
            },
            Mode::Record => {
                if case.cassette_path.exists() {
                    match CassetteStore::load(&case.cassette_path) {
                        Ok(store) => store,
                        Err(e) => {
                            return self.finish(
                                case,
                                trace,
                                start,
                                builder,
                                Some(Failure {
                                    kind: FailureKind::CassetteError,
                                    message: e.to_string(),
                                }),
                            );
                        }
                    }
                } else {
                    CassetteStore::empty()
                }
            }
            Mode::Live => CassetteStore::empty(),
        };

        if matches!(self.mode, Mode::Record | Mode::Live) && self.tool_registry.is_none() {
            return self.finish(
                case,
                trace,
                start,
                builder,
                Some(Failure {
                    kind: FailureKind::ToolRegistryError,
                    message: "no tool registry resolved for record/live mode".to_string(),
                }),
            );
        }

        let config = TransportConfig {
            command: self.agent_command.to_vec(),
            working_dir: self.working_dir.clone(),
            env_vars: self.env_vars.clone(),
            inherit_env: true,
            receive_timeout: self.receive_timeout,
            stderr_tail_lines: runledger_transport::DEFAULT_STDERR_TAIL,
        };
        let mut transport = match AgentTransport::spawn(config).await {
            Ok(t) => t,
            Err(e) => {
                return self.finish(
                    case,
                    trace,
                    start,
                    builder,
                    Some(Failure {
                        kind: FailureKind::AgentError,
                        message: e.to_string(),
                    }),
                );
            }
        };

        trace.push(TraceEvent::TaskStart {
            task_id: case.id.clone(),
            input: case.input.clone(),
            timestamp: Utc::now(),
        });
        if let Err(e) = transport
            .send(&ProtocolMessage::TaskStart {
                task_id: case.id.clone(),
                input: case.input.clone(),
            })
            .await
        {
            transport.shutdown().await;
            return self.finish(
                case,
                trace,
                start,
                builder,
                Some(Failure {
                    kind: FailureKind::AgentError,
                    message: e.to_string(),
                }),
            );
        }

        let mut output = None;
        let mut failure = None;

        loop {
            let msg = match transport.recv().await {
                Ok(msg) => msg,
                Err(e) => {
                    let tail = transport.stderr_tail();
                    let message = if tail.is_empty() {
                        e.to_string()
                    } else {
                        format!("{e}\nstderr:\n{}", tail.join("\n"))
                    };
                    failure = Some(Failure {
                        kind: FailureKind::AgentError,
                        message,
                    });
                    break;
                }
            };

            match msg {
                ProtocolMessage::ToolCall { name, call_id, args } => {
                    trace.push(TraceEvent::ToolCall {
                        name: name.clone(),
                        call_id: call_id.clone(),
                        args: args.clone(),
                        timestamp: Utc::now(),
                    });
                    builder.record_call(&name);

                    if !self.allowed_tools.contains(&name) {
                        let allowed = self.allowed_tools.iter().cloned().collect::<Vec<_>>().join(", ");
                        let message =
                            format!("tool {name:?} is not in this suite's allowed_tools: [{allowed}]");
                        let _ = transport
                            .send(&ProtocolMessage::ToolResult {
                                call_id: call_id.clone(),
                                ok: false,
                                result: None,
                                error: Some(message.clone()),
                            })
                            .await;
                        trace.push(TraceEvent::ToolResult {
                            call_id,
                            ok: false,
                            result: None,
                            error: Some(message.clone()),
                            timestamp: Utc::now(),
                        });
                        builder.record_error(&name);
                        tracing::warn!(target: "runledger.case", case_id = %case.id, tool = %name, "tool call rejected: not in allowed_tools");
                        failure = Some(Failure {
                            kind: FailureKind::ToolNotAllowed,
                            message,
                        });
                        break;
                    }

                    let (ok, result, error) = match self.mode {
                        Mode::Replay => match cassette.find(&name, &args) {
                            Some(entry) => (entry.ok, entry.result.clone(), entry.error.clone()),
                            None => {
                                let report = cassette.mismatch(&name, &args);
                                let message = report.render();
                                let _ = transport
                                    .send(&ProtocolMessage::ToolResult {
                                        call_id: call_id.clone(),
                                        ok: false,
                                        result: None,
                                        error: Some(message.clone()),
                                    })
                                    .await;
                                trace.push(TraceEvent::ToolResult {
                                    call_id,
                                    ok: false,
                                    result: None,
                                    error: Some(message.clone()),
                                    timestamp: Utc::now(),
                                });
                                builder.record_error(&name);
                                tracing::warn!(target: "runledger.case", case_id = %case.id, tool = %name, "cassette mismatch");
                                failure = Some(Failure {
                                    kind: FailureKind::CassetteMismatch,
                                    message,
                                });
                                break;
                            }
                        },
                        Mode::Record | Mode::Live => {
                            let registry = self.tool_registry.expect("checked above");
                            match registry.call(&name, &args) {
                                Ok(value) => {
                                    if matches!(self.mode, Mode::Record) {
                                        let _ = append_entry(
                                            &case.cassette_path,
                                            &CassetteEntry::ok(name.clone(), args.clone(), value.clone()),
                                        );
                                    }
                                    (true, Some(value), None)
                                }
                                Err(e) => {
                                    if matches!(self.mode, Mode::Record) {
                                        let _ = append_entry(
                                            &case.cassette_path,
                                            &CassetteEntry::err(name.clone(), args.clone(), e.0.clone()),
                                        );
                                    }
                                    (false, None, Some(e.0))
                                }
                            }
                        }
                    };

                    if !ok {
                        builder.record_error(&name);
                    }
                    let _ = transport
                        .send(&ProtocolMessage::ToolResult {
                            call_id: call_id.clone(),
                            ok,
                            result: result.clone(),
                            error: error.clone(),
                        })
                        .await;
                    trace.push(TraceEvent::ToolResult {
                        call_id,
                        ok,
                        result,
                        error,
                        timestamp: Utc::now(),
                    });
                }
                ProtocolMessage::FinalOutput { output: out } => {
                    trace.push(TraceEvent::FinalOutput {
                        output: out.clone(),
                        timestamp: Utc::now(),
                    });
                    output = Some(out);
                    break;
                }
                ProtocolMessage::Log { level, message, data } => {
                    trace.push(TraceEvent::Log {
                        level,
                        message,
                        data,
                        timestamp: Utc::now(),
                    });
                }
                ProtocolMessage::TaskError { message, data } => {
                    trace.push(TraceEvent::TaskError {
                        message: message.clone(),
                        data,
                        timestamp: Utc::now(),
                    });
                    failure = Some(Failure {
                        kind: FailureKind::TaskError,
                        message,
                    });
                    break;
                }
                ProtocolMessage::TaskStart { .. } => {
                    failure = Some(Failure {
                        kind: FailureKind::AgentError,
                        message: "agent sent an unexpected task_start".to_string(),
                    });
                    break;
                }
            }
        }

        transport.shutdown().await;
        builder.output = output;
        self.finish(case, trace, start, builder, failure)
    }

    fn finish(
        &self,
        case: &CaseConfig,
        mut trace: Vec<TraceEvent>,
        start: Instant,
        mut acc: Accumulator,
        mut failure: Option<Failure>,
    ) -> CaseResult {
        let wall_ms = start.elapsed().as_millis() as u64;

        // Step 1: counted unconditionally, even for cases that never reach
        // assertion evaluation (cassette error, tool_not_allowed, task_error, ...).
        acc.assertions_total = runledger_assert::count_assertions(&self.assertions);

        if failure.is_none() {
            if let Some(output) = &acc.output {
                let failures = runledger_assert::apply_assertions(
                    &self.assertions,
                    Some(output),
                    &trace,
                    self.schema_base_dir,
                );
                acc.assertions_failed = failures.len() as u64;
                if !failures.is_empty() {
                    let message = failures
                        .iter()
                        .map(|f| f.message.clone())
                        .collect::<Vec<_>>()
                        .join("\n");
                    trace.push(TraceEvent::AssertionFailure {
                        failures: failures.clone(),
                        timestamp: Utc::now(),
                    });
                    acc.failed_assertions = failures;
                    failure = Some(Failure {
                        kind: FailureKind::AssertionFailed,
                        message,
                    });
                }
            }
        }

        let violations = runledger_budget::check_budgets(
            self.budget.as_ref(),
            wall_ms,
            acc.tool_calls,
            acc.tool_errors,
        );
        if !violations.is_empty() {
            trace.push(TraceEvent::BudgetFailure {
                violations: violations.clone(),
                timestamp: Utc::now(),
            });
            if failure.is_none() {
                let message = violations
                    .iter()
                    .map(|v| format!("{} limit={} actual={}", v.field, v.limit, v.actual))
                    .collect::<Vec<_>>()
                    .join("; ");
                tracing::warn!(target: "runledger.case", case_id = %case.id, %message, "budget exceeded");
                failure = Some(Failure {
                    kind: FailureKind::BudgetExceeded,
                    message,
                });
            }
        }

        let passed = failure.is_none();
        trace.push(TraceEvent::CaseEnd {
            passed,
            wall_ms,
            timestamp: Utc::now(),
        });

        let cassette_sha256 = std::fs::read(&case.cassette_path)
            .ok()
            .map(|bytes| format!("{:x}", Sha256::digest(&bytes)));

        CaseResult {
            case_id: case.id.clone(),
            passed,
            output: acc.output,
            trace,
            wall_ms,
            tool_calls: acc.tool_calls,
            tool_errors: acc.tool_errors,
            tool_calls_by_name: acc.tool_calls_by_name,
            tool_errors_by_name: acc.tool_errors_by_name,
            assertions_total: acc.assertions_total,
            assertions_failed: acc.assertions_failed,
            failed_assertions: acc.failed_assertions,
            tokens_in: None,
            tokens_out: None,
            cost_usd: None,
            steps: None,
            cassette_path: Some(case.cassette_path.display().to_string()),
            cassette_sha256,
            failure,
        }
    }
}

#[derive(Default)]
struct Accumulator {
    output: Option<serde_json::Map<String, serde_json::Value>>,
    tool_calls: u64,
    tool_errors: u64,
    tool_calls_by_name: BTreeMap<String, u64>,
    tool_errors_by_name: BTreeMap<String, u64>,
    assertions_total: u64,
    assertions_failed: u64,
    failed_assertions: Vec<runledger_core::AssertionFailureRecord>,
}

impl Accumulator {
    fn record_call(&mut self, name: &str) {
        self.tool_calls += 1;
        *self.tool_calls_by_name.entry(name.to_string()).or_insert(0) += 1;
    }

    fn record_error(&mut self, name: &str) {
        self.tool_errors += 1;
        *self.tool_errors_by_name.entry(name.to_string()).or_insert(0) += 1;
    }
}
