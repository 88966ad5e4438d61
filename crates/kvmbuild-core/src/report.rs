//! Run report and content digests.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::error::Result;
use crate::manifest::ManifestSnapshot;
use crate::publish::PublishedArtifact;
use crate::stage::StageKind;

/// File name of the report inside the output directory.
pub const REPORT_FILE_NAME: &str = "pipeline-report.json";

/// Outcome class of a single stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    /// Completed with an advisory finding.
    Warned,
    Skipped,
    Failed,
}

impl StageStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            StageStatus::Passed => "✓",
            StageStatus::Warned => "!",
            StageStatus::Skipped => "-",
            StageStatus::Failed => "✗",
        }
    }
}

/// Recorded outcome of one stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageOutcome {
    pub stage: StageKind,
    pub status: StageStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub exit_code: i32,
    pub stages: Vec<StageOutcome>,
    pub warnings: Vec<String>,
    pub manifest: Option<ManifestSnapshot>,
    pub release: Option<PublishedArtifact>,
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            duration_ms: 0,
            success: false,
            exit_code: 1,
            stages: Vec::new(),
            warnings: Vec::new(),
            manifest: None,
            release: None,
            error: None,
        }
    }

    /// Number of stages that passed or passed with warnings.
    pub fn passed_count(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| matches!(s.status, StageStatus::Passed | StageStatus::Warned))
            .count()
    }

    /// Number of stages that failed.
    pub fn failed_count(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Failed)
            .count()
    }

    /// Outcome recorded for `stage`, if it ran.
    pub fn outcome(&self, stage: StageKind) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Write the report as pretty JSON into `dir`, atomically.
    pub fn write_to_dir(&self, dir: &Path) -> Result<std::path::PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(REPORT_FILE_NAME);
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), self)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(path)
    }
}

/// Hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hex SHA-256 of a file's contents, streamed.
pub fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(stage: StageKind, status: StageStatus) -> StageOutcome {
        StageOutcome {
            stage,
            status,
            duration_ms: 10,
            detail: None,
        }
    }

    #[test]
    fn test_sha256_hex_deterministic() {
        assert_eq!(sha256_hex(b"a==1.0\n"), sha256_hex(b"a==1.0\n"));
        assert_ne!(sha256_hex(b"a==1.0\n"), sha256_hex(b"a==1.1\n"));
        assert_eq!(sha256_hex(b"").len(), 64);
    }

    #[test]
    fn test_file_sha256_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"kvm").unwrap();
        assert_eq!(file_sha256(&path).unwrap(), sha256_hex(b"kvm"));
    }

    #[test]
    fn test_report_counts() {
        let mut report = RunReport::new(Uuid::new_v4());
        report.stages = vec![
            outcome(StageKind::Resolve, StageStatus::Passed),
            outcome(StageKind::Format, StageStatus::Warned),
            outcome(StageKind::Lint, StageStatus::Skipped),
            outcome(StageKind::Package, StageStatus::Failed),
        ];

        assert_eq!(report.passed_count(), 2);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(
            report.outcome(StageKind::Lint).map(|o| o.status),
            Some(StageStatus::Skipped)
        );
        assert!(report.outcome(StageKind::Publish).is_none());
    }

    #[test]
    fn test_write_report_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::new(Uuid::new_v4());
        report.stages.push(outcome(StageKind::Snapshot, StageStatus::Passed));
        report.success = true;
        report.exit_code = 0;

        let path = report.write_to_dir(&dir.path().join("build")).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(value["success"], true);
        assert_eq!(value["stages"][0]["stage"], "snapshot");
        assert_eq!(value["stages"][0]["status"], "passed");
        assert!(value["stages"][0].get("detail").is_none());
    }
}
