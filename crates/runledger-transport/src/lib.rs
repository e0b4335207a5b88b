// SPDX-License-Identifier: MIT OR Apache-2.0
//! runledger-transport
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Spawns an agent as a subprocess and exchanges [`ProtocolMessage`]s with
//! it over JSONL stdio. One background task drains stdout into a bounded
//! queue; a second drains stderr into a ring buffer so a failure can be
//! reported with the agent's last few diagnostic lines attached.

use runledger_protocol::{JsonlCodec, ProtocolError, ProtocolMessage};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Number of trailing stderr lines retained for diagnostics.
pub const DEFAULT_STDERR_TAIL: usize = 200;

/// Default time to wait for a single message before giving up.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait after a graceful terminate request before killing.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Launch parameters for an agent subprocess.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Argv; `command[0]` is the executable.
    pub command: Vec<String>,
    /// Working directory for the child process.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables set on the child.
    pub env_vars: BTreeMap<String, String>,
    /// Whether the child inherits the harness's environment in addition
    /// to `env_vars`.
    pub inherit_env: bool,
    /// How long [`AgentTransport::recv`] waits for the next message.
    pub receive_timeout: Duration,
    /// How many trailing stderr lines to retain.
    pub stderr_tail_lines: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            working_dir: None,
            env_vars: BTreeMap::new(),
            inherit_env: true,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            stderr_tail_lines: DEFAULT_STDERR_TAIL,
        }
    }
}

/// Failure modes of the transport layer. These all map to the harness's
/// `agent_error` failure kind; callers attach [`AgentTransport::stderr_tail`]
/// to the message they surface.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The child process could not be spawned.
    #[error("failed to spawn agent process: {0}")]
    Spawn(#[source] std::io::Error),

    /// Writing to the child's stdin failed.
    #[error("failed to write to agent stdin: {0}")]
    Stdin(#[source] std::io::Error),

    /// Reading from the child's stdout failed.
    #[error("failed to read agent stdout: {0}")]
    Stdout(#[source] std::io::Error),

    /// A line of stdout did not parse as a protocol message.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// No message arrived within the configured timeout.
    #[error("timed out after {waited_ms}ms waiting for agent response")]
    Timeout {
        /// How long the transport waited.
        waited_ms: u64,
    },

    /// The child exited before sending a message the caller expected.
    #[error("agent exited unexpectedly (code {code:?})")]
    Exited {
        /// The process exit code, if known.
        code: Option<i32>,
    },
}

/// A running agent subprocess, speaking JSONL over stdio.
pub struct AgentTransport {
    child: Child,
    stdin: BufWriterHalf,
    inbox: mpsc::Receiver<Result<ProtocolMessage, TransportError>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    receive_timeout: Duration,
}

type BufWriterHalf = ChildStdin;

impl AgentTransport {
    /// Spawn the configured command, wiring piped stdin/stdout/stderr and
    /// starting the background reader tasks.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Spawn`] if the process cannot be started.
    pub async fn spawn(config: TransportConfig) -> Result<Self, TransportError> {
        let [program, args @ ..] = config.command.as_slice() else {
            return Err(TransportError::Spawn(std::io::Error::other(
                "agent_command must name an executable",
            )));
        };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !config.inherit_env {
            cmd.env_clear();
        }
        for (k, v) in &config.env_vars {
            cmd.env(k, v);
        }
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(TransportError::Spawn)?;
        tracing::debug!(target: "runledger.transport", command = ?config.command, pid = child.id(), "spawned agent process");
        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let (tx, rx) = mpsc::channel(64);
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let parsed = JsonlCodec::decode(&line).map_err(TransportError::from);
                        if tx.send(parsed).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(TransportError::Stdout(e))).await;
                        break;
                    }
                }
            }
        });

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(
            config.stderr_tail_lines,
        )));
        let tail_for_task = Arc::clone(&stderr_tail);
        let tail_capacity = config.stderr_tail_lines;
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut buf = tail_for_task.lock().expect("stderr tail mutex poisoned");
                if buf.len() == tail_capacity {
                    buf.pop_front();
                }
                buf.push_back(line);
            }
        });

        Ok(Self {
            child,
            stdin,
            inbox: rx,
            stderr_tail,
            stdout_task,
            stderr_task,
            receive_timeout: config.receive_timeout,
        })
    }

    /// Send one message to the agent's stdin.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Stdin`] on write failure.
    pub async fn send(&mut self, msg: &ProtocolMessage) -> Result<(), TransportError> {
        let line = JsonlCodec::encode(msg)?;
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(TransportError::Stdin)?;
        self.stdin.flush().await.map_err(TransportError::Stdin)
    }

    /// Wait for the next message from the agent, subject to the
    /// configured receive timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Timeout`] if no message arrives in time,
    /// [`TransportError::Exited`] if the channel closes because the reader
    /// task ended, or the underlying [`TransportError`] the reader task
    /// observed.
    pub async fn recv(&mut self) -> Result<ProtocolMessage, TransportError> {
        let waited = self.receive_timeout;
        match tokio::time::timeout(waited, self.inbox.recv()).await {
            Ok(Some(result)) => result,
            Ok(None) => {
                let code = self
                    .child
                    .try_wait()
                    .ok()
                    .flatten()
                    .and_then(|s| s.code());
                tracing::warn!(target: "runledger.transport", ?code, "agent exited before sending an expected message");
                Err(TransportError::Exited { code })
            }
            Err(_) => {
                tracing::warn!(target: "runledger.transport", waited_ms = waited.as_millis() as u64, "timed out waiting for agent message");
                Err(TransportError::Timeout {
                    waited_ms: waited.as_millis() as u64,
                })
            }
        }
    }

    /// The trailing stderr lines captured so far, oldest first.
    #[must_use]
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail
            .lock()
            .expect("stderr tail mutex poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Ask the agent to exit, escalating to a kill if it doesn't within
    /// the shutdown grace period. Always succeeds; a failure to kill an
    /// already-dead process is not an error.
    pub async fn shutdown(mut self) {
        self.stdout_task.abort();
        self.stderr_task.abort();
        drop(self.stdin);
        let graceful = tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await;
        if graceful.is_err() {
            tracing::debug!(target: "runledger.transport", "agent did not exit within grace period, killing");
            let _ = self.child.kill().await;
            let _ = self.child.wait().await;
        }
    }
}
