//! Error taxonomy for the release pipeline.

use std::path::PathBuf;

use crate::stage::StageKind;

/// Errors produced by pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("cannot resolve project root {path}: {reason}")]
    PathResolution { path: PathBuf, reason: String },

    #[error("cannot write dependency manifest {path}: {source}")]
    SnapshotWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with code {exit_code}\n{stderr}")]
    ExternalTool {
        tool: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("formatter reported problems (exit code {exit_code})\n{output}")]
    FormatterWarning { exit_code: i32, output: String },

    #[error("linter reported violations (exit code {exit_code})\n{output}")]
    LintViolation { exit_code: i32, output: String },

    #[error("packaging failed: {diagnostics}")]
    Packaging { diagnostics: String },

    #[error("cannot publish {path}: {reason}")]
    Publish { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("stage {stage} timed out after {secs} seconds")]
    Timeout { stage: StageKind, secs: u64 },

    #[error("run cancelled before stage {stage} completed")]
    Cancelled { stage: StageKind },

    #[error("another pipeline run holds {lock_path}")]
    Locked { lock_path: PathBuf },

    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Process exit code for this error.
    ///
    /// `2` environment resolution, `3` packaging, `4` publish, `1` otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::PathResolution { .. } => 2,
            PipelineError::Packaging { .. } => 3,
            PipelineError::Timeout {
                stage: StageKind::Package,
                ..
            } => 3,
            PipelineError::Publish { .. } => 4,
            _ => 1,
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
