//! Pipeline stage identities and external tool invocations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Resolve the project root.
    Resolve,

    /// Freeze installed packages into the dependency manifest.
    Snapshot,

    /// Regenerate compiled UI resources.
    Resources,

    /// Formatter half of the quality gate.
    Format,

    /// Linter half of the quality gate.
    Lint,

    /// Build the single-file executable.
    Package,

    /// Move the executable into the releases directory.
    Publish,
}

impl StageKind {
    /// All stages in execution order.
    pub const ALL: [StageKind; 7] = [
        StageKind::Resolve,
        StageKind::Snapshot,
        StageKind::Resources,
        StageKind::Format,
        StageKind::Lint,
        StageKind::Package,
        StageKind::Publish,
    ];

    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Resolve => "resolve",
            StageKind::Snapshot => "snapshot",
            StageKind::Resources => "resources",
            StageKind::Format => "format",
            StageKind::Lint => "lint",
            StageKind::Package => "package",
            StageKind::Publish => "publish",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single external tool call: program plus arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Stage that owns this call.
    pub stage: StageKind,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,
}

impl ToolInvocation {
    pub fn new(stage: StageKind, command: Vec<String>) -> Self {
        Self { stage, command }
    }

    /// Executable name, or `""` when the command is empty.
    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("")
    }

    /// Space-joined command line for logs.
    pub fn display(&self) -> String {
        self.command.join(" ")
    }
}

/// Per-stage timeouts in seconds. Zero disables the limit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StageTimeouts {
    pub snapshot_secs: u64,
    pub resources_secs: u64,
    pub format_secs: u64,
    pub lint_secs: u64,
    pub package_secs: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            snapshot_secs: 120,
            resources_secs: 300,
            format_secs: 600,
            lint_secs: 900,
            package_secs: 3600,
        }
    }
}

impl StageTimeouts {
    /// Timeout for a stage, `None` when unlimited or not subprocess-backed.
    pub fn for_stage(&self, stage: StageKind) -> Option<Duration> {
        let secs = match stage {
            StageKind::Snapshot => self.snapshot_secs,
            StageKind::Resources => self.resources_secs,
            StageKind::Format => self.format_secs,
            StageKind::Lint => self.lint_secs,
            StageKind::Package => self.package_secs,
            StageKind::Resolve | StageKind::Publish => 0,
        };
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(StageKind::Resolve.name(), "resolve");
        assert_eq!(StageKind::Snapshot.name(), "snapshot");
        assert_eq!(StageKind::Resources.name(), "resources");
        assert_eq!(StageKind::Package.name(), "package");
        assert_eq!(StageKind::Publish.to_string(), "publish");
    }

    #[test]
    fn test_stage_order() {
        let mut sorted = StageKind::ALL;
        sorted.sort();
        assert_eq!(sorted, StageKind::ALL);
        assert!(StageKind::Resources < StageKind::Format);
        assert!(StageKind::Lint < StageKind::Package);
    }

    #[test]
    fn test_invocation_program() {
        let inv = ToolInvocation::new(
            StageKind::Lint,
            vec!["python".to_string(), "-m".to_string(), "pylint".to_string()],
        );
        assert_eq!(inv.program(), "python");
        assert_eq!(inv.display(), "python -m pylint");

        let empty = ToolInvocation::new(StageKind::Lint, vec![]);
        assert_eq!(empty.program(), "");
    }

    #[test]
    fn test_timeouts() {
        let timeouts = StageTimeouts::default();
        assert_eq!(
            timeouts.for_stage(StageKind::Package),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(timeouts.for_stage(StageKind::Publish), None);

        let unlimited = StageTimeouts {
            lint_secs: 0,
            ..StageTimeouts::default()
        };
        assert_eq!(unlimited.for_stage(StageKind::Lint), None);
    }
}
