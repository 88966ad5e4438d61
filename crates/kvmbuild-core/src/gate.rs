//! Quality gate: formatter and linter over the whole source tree.
//!
//! Whether findings block packaging is decided by [`QualityPolicy`]. The
//! historical release script never inspected the linter's exit status, which
//! corresponds to [`QualityPolicy::Advisory`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::report::StageStatus;
use crate::runner::ToolRuntime;
use crate::stage::{StageKind, ToolInvocation};

/// How lint findings affect the run. Formatter findings are always advisory.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QualityPolicy {
    /// Findings abort the pipeline.
    Blocking,

    /// Findings are logged and recorded as warnings.
    #[default]
    Advisory,
}

impl fmt::Display for QualityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityPolicy::Blocking => f.write_str("blocking"),
            QualityPolicy::Advisory => f.write_str("advisory"),
        }
    }
}

impl FromStr for QualityPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blocking" => Ok(QualityPolicy::Blocking),
            "advisory" => Ok(QualityPolicy::Advisory),
            other => Err(format!("unknown quality policy: {other} (expected blocking or advisory)")),
        }
    }
}

/// Outcome of one gate sub-step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub status: StageStatus,

    /// Finding recorded as a warning.
    pub warning: Option<String>,
}

impl CheckOutcome {
    fn passed() -> Self {
        Self {
            status: StageStatus::Passed,
            warning: None,
        }
    }

    fn skipped() -> Self {
        Self {
            status: StageStatus::Skipped,
            warning: None,
        }
    }

    fn warned(message: String) -> Self {
        Self {
            status: StageStatus::Warned,
            warning: Some(message),
        }
    }
}

/// Formatter and linter invocations plus the policy that governs lint findings.
#[derive(Debug, Clone)]
pub struct QualityGate {
    /// `None` skips the formatter.
    pub formatter: Option<ToolInvocation>,

    /// `None` skips the linter.
    pub linter: Option<ToolInvocation>,

    pub policy: QualityPolicy,
}

impl QualityGate {
    /// Run the formatter in place.
    ///
    /// The formatter runs in safe mode and refuses rewrites it cannot prove
    /// equivalent; those skipped files surface as a non-zero exit. Its findings
    /// are informational under every policy: they become a warning, never an
    /// error. Only timeouts and cancellation stop the run here.
    pub async fn run_format(&self, rt: &ToolRuntime<'_>) -> Result<CheckOutcome> {
        let Some(invocation) = &self.formatter else {
            return Ok(CheckOutcome::skipped());
        };

        let finding = match rt.run(invocation).await {
            Ok(output) if output.passed() => return Ok(CheckOutcome::passed()),
            Ok(output) => PipelineError::FormatterWarning {
                exit_code: output.exit_code,
                output: output.combined(),
            },
            Err(err @ PipelineError::Spawn { .. }) => err,
            Err(err) => return Err(err),
        };

        Ok(warn_finding(StageKind::Format, &finding))
    }

    /// Run the linter against its rule configuration, under [`QualityPolicy`].
    pub async fn run_lint(&self, rt: &ToolRuntime<'_>) -> Result<CheckOutcome> {
        let Some(invocation) = &self.linter else {
            return Ok(CheckOutcome::skipped());
        };

        let finding = match rt.run(invocation).await {
            Ok(output) if output.passed() => return Ok(CheckOutcome::passed()),
            Ok(output) => PipelineError::LintViolation {
                exit_code: output.exit_code,
                output: output.combined(),
            },
            Err(err @ PipelineError::Spawn { .. }) => err,
            Err(err) => return Err(err),
        };

        self.apply_policy(StageKind::Lint, finding)
    }

    fn apply_policy(&self, stage: StageKind, finding: PipelineError) -> Result<CheckOutcome> {
        match self.policy {
            QualityPolicy::Blocking => Err(finding),
            QualityPolicy::Advisory => Ok(warn_finding(stage, &finding)),
        }
    }
}

fn warn_finding(stage: StageKind, finding: &PipelineError) -> CheckOutcome {
    let message = first_line(&finding.to_string());
    warn!(stage = %stage, finding = %message, "Quality gate finding");
    CheckOutcome::warned(message)
}

/// First line of a possibly multi-line diagnostic.
pub(crate) fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().to_string()
}
