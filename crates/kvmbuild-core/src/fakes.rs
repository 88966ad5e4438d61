//! Scripted fakes for the tool and package seams (testing only)
//!
//! `FakeExecutor` answers each stage with a configured exit code, output and
//! optional files written under the working directory, and records every
//! invocation. `StaticPackageSource` reports a fixed package set.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{PipelineError, Result};
use crate::manifest::{PackagePin, PackageSource};
use crate::runner::{ToolExecutor, ToolOutput, ToolRuntime};
use crate::stage::{StageKind, ToolInvocation};

// ---------------------------------------------------------------------------
// FakeExecutor
// ---------------------------------------------------------------------------

/// Scripted response for one stage.
#[derive(Debug, Clone, Default)]
pub struct FakeBehavior {
    exit_code: i32,
    stdout: String,
    stderr: String,
    writes: Vec<(PathBuf, Vec<u8>)>,
    delay: Option<Duration>,
    missing: bool,
}

impl FakeBehavior {
    /// Exit 0 with no output.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Exit with `exit_code`.
    pub fn fail(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    /// The tool cannot be started at all.
    pub fn missing() -> Self {
        Self {
            missing: true,
            ..Self::default()
        }
    }

    pub fn stdout(mut self, text: impl Into<String>) -> Self {
        self.stdout = text.into();
        self
    }

    pub fn stderr(mut self, text: impl Into<String>) -> Self {
        self.stderr = text.into();
        self
    }

    /// Write `contents` to `relative` (under the workdir) when invoked.
    pub fn writes(mut self, relative: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        self.writes.push((relative.into(), contents.into()));
        self
    }

    /// Sleep before answering.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// In-memory [`ToolExecutor`]. Unconfigured stages succeed silently.
#[derive(Debug, Default)]
pub struct FakeExecutor {
    behaviors: HashMap<StageKind, FakeBehavior>,
    calls: Mutex<Vec<ToolInvocation>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: StageKind, behavior: FakeBehavior) -> Self {
        self.behaviors.insert(stage, behavior);
        self
    }

    /// Every invocation seen so far, in order.
    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Stages of every invocation seen so far, in order.
    pub fn called_stages(&self) -> Vec<StageKind> {
        self.calls().iter().map(|c| c.stage).collect()
    }
}

#[async_trait]
impl ToolExecutor for FakeExecutor {
    async fn execute(&self, invocation: &ToolInvocation, workdir: &Path) -> Result<ToolOutput> {
        self.calls.lock().unwrap().push(invocation.clone());

        let behavior = self
            .behaviors
            .get(&invocation.stage)
            .cloned()
            .unwrap_or_default();

        if let Some(delay) = behavior.delay {
            tokio::time::sleep(delay).await;
        }

        if behavior.missing {
            return Err(PipelineError::Spawn {
                tool: invocation.program().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "program not found"),
            });
        }

        for (relative, contents) in &behavior.writes {
            let path = workdir.join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, contents)?;
        }

        Ok(ToolOutput {
            exit_code: behavior.exit_code,
            stdout: behavior.stdout,
            stderr: behavior.stderr,
            duration_ms: 0,
            success: behavior.exit_code == 0,
        })
    }
}

// ---------------------------------------------------------------------------
// StaticPackageSource
// ---------------------------------------------------------------------------

/// [`PackageSource`] that reports a fixed package set without running anything.
#[derive(Debug, Clone, Default)]
pub struct StaticPackageSource {
    packages: Vec<PackagePin>,
}

impl StaticPackageSource {
    pub fn new(packages: Vec<PackagePin>) -> Self {
        Self { packages }
    }

    /// Build from `(name, version)` pairs.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|(name, version)| PackagePin::new(*name, *version))
                .collect(),
        )
    }
}

#[async_trait]
impl PackageSource for StaticPackageSource {
    async fn installed_packages(&self, _rt: &ToolRuntime<'_>) -> Result<Vec<PackagePin>> {
        Ok(self.packages.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_records_calls_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let executor = FakeExecutor::new().with(
            StageKind::Package,
            FakeBehavior::ok().writes("build/app.exe", b"MZ".to_vec()),
        );
        let inv = ToolInvocation::new(StageKind::Package, vec!["python".to_string()]);

        let output = executor.execute(&inv, dir.path()).await.unwrap();

        assert!(output.passed());
        assert_eq!(std::fs::read(dir.path().join("build/app.exe")).unwrap(), b"MZ");
        assert_eq!(executor.called_stages(), vec![StageKind::Package]);
    }

    #[tokio::test]
    async fn test_fake_failure() {
        let dir = tempfile::tempdir().unwrap();
        let executor =
            FakeExecutor::new().with(StageKind::Resources, FakeBehavior::fail(2).stderr("boom"));
        let inv = ToolInvocation::new(StageKind::Resources, vec!["python".to_string()]);

        let output = executor.execute(&inv, dir.path()).await.unwrap();
        assert!(!output.passed());
        assert_eq!(output.stderr, "boom");
    }
}
