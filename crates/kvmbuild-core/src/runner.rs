//! External tool execution with timeout and cancellation.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::context::PipelineContext;
use crate::error::{PipelineError, Result};
use crate::stage::{StageTimeouts, ToolInvocation};

/// Captured result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether the process reported success.
    pub success: bool,
}

impl ToolOutput {
    /// Whether this invocation passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Stderr if non-empty, otherwise stdout. Some tools report failures on stdout.
    pub fn diagnostics(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }

    /// Stdout and stderr joined, for tools that split reports across both.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.clone(),
            _ => self.stderr.clone(),
        }
    }
}

/// Runs an external tool to completion.
///
/// The seam between pipeline stages and real subprocesses; tests substitute
/// [`crate::fakes::FakeExecutor`].
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, invocation: &ToolInvocation, workdir: &Path) -> Result<ToolOutput>;
}

/// Executes tools as child processes via `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

#[async_trait]
impl ToolExecutor for ProcessExecutor {
    async fn execute(&self, invocation: &ToolInvocation, workdir: &Path) -> Result<ToolOutput> {
        let start = Instant::now();

        let (exe, args) = invocation.command.split_first().ok_or_else(|| {
            PipelineError::InvalidConfig(format!("stage {} has empty command", invocation.stage))
        })?;

        debug!(stage = %invocation.stage, command = %invocation.display(), "Spawning tool");

        // Dropping the wait future (timeout, cancel) kills the child.
        let child = Command::new(exe)
            .args(args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PipelineError::Spawn {
                tool: exe.clone(),
                source,
            })?;

        let output = child.wait_with_output().await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);

        Ok(ToolOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            success: output.status.success(),
        })
    }
}

/// Everything a stage needs to run tools inside the project.
#[derive(Clone, Copy)]
pub struct ToolRuntime<'a> {
    pub ctx: &'a PipelineContext,
    pub executor: &'a dyn ToolExecutor,
    pub timeouts: &'a StageTimeouts,
    pub cancel: &'a CancelToken,
}

impl<'a> ToolRuntime<'a> {
    /// Run `invocation` in the project root under the stage's timeout.
    pub async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        run_tool(
            self.executor,
            invocation,
            self.ctx.root(),
            self.timeouts.for_stage(invocation.stage),
            self.cancel,
        )
        .await
    }
}

/// Execute with an optional time limit, racing against cancellation.
pub async fn run_tool(
    executor: &dyn ToolExecutor,
    invocation: &ToolInvocation,
    workdir: &Path,
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> Result<ToolOutput> {
    let stage = invocation.stage;
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled { stage });
    }

    let execution = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, executor.execute(invocation, workdir)).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Timeout {
                    stage,
                    secs: limit.as_secs(),
                }),
            },
            None => executor.execute(invocation, workdir).await,
        }
    };

    tokio::select! {
        result = execution => result,
        _ = cancel.cancelled() => Err(PipelineError::Cancelled { stage }),
    }
}
