//! Dependency snapshot: freeze installed packages into `data/requirements.txt`.
//!
//! The manifest is a provenance artifact. It is regenerated from scratch on
//! every run, sorted deterministically and written atomically, so two runs
//! against the same environment produce byte-identical files.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::report::sha256_hex;
use crate::runner::ToolRuntime;
use crate::stage::{StageKind, ToolInvocation};

/// Default manifest location relative to the project root.
pub const MANIFEST_RELATIVE_PATH: &str = "data/requirements.txt";

/// One installed package pinned to an exact version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackagePin {
    pub name: String,
    pub version: String,
}

impl PackagePin {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parse a `name==version` record. Anything else yields `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let (name, version) = line.split_once("==")?;
        let (name, version) = (name.trim(), version.trim());
        if name.is_empty()
            || version.is_empty()
            || name.contains(char::is_whitespace)
            || version.contains(char::is_whitespace)
            || name.contains('@')
            || version.contains('=')
        {
            return None;
        }

        Some(Self::new(name, version))
    }
}

impl fmt::Display for PackagePin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

/// Supplies the installed package set of the active Python environment.
#[async_trait]
pub trait PackageSource: Send + Sync {
    async fn installed_packages(&self, rt: &ToolRuntime<'_>) -> Result<Vec<PackagePin>>;
}

/// Queries `<python> -m pip freeze`.
#[derive(Debug, Clone)]
pub struct PipFreeze {
    python: String,
}

impl PipFreeze {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    pub fn invocation(&self) -> ToolInvocation {
        ToolInvocation::new(
            StageKind::Snapshot,
            vec![
                self.python.clone(),
                "-m".to_string(),
                "pip".to_string(),
                "freeze".to_string(),
            ],
        )
    }
}

#[async_trait]
impl PackageSource for PipFreeze {
    async fn installed_packages(&self, rt: &ToolRuntime<'_>) -> Result<Vec<PackagePin>> {
        let output = rt.run(&self.invocation()).await?;
        if !output.passed() {
            return Err(PipelineError::ExternalTool {
                tool: "pip freeze".to_string(),
                exit_code: output.exit_code,
                stderr: output.diagnostics().to_string(),
            });
        }
        Ok(parse_freeze_output(&output.stdout))
    }
}

/// Extract pinned records from `pip freeze` output.
///
/// Editable installs and direct URL references have no `==` pin and are skipped.
pub fn parse_freeze_output(stdout: &str) -> Vec<PackagePin> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
        .filter_map(|line| {
            let pin = PackagePin::parse(line);
            if pin.is_none() {
                warn!(record = %line.trim(), "Skipping unpinned freeze record");
            }
            pin
        })
        .collect()
}

/// Render the manifest body: sorted by case-folded name then version, deduplicated.
pub fn render_manifest(packages: &[PackagePin]) -> String {
    let mut sorted = packages.to_vec();
    sorted.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.version.cmp(&b.version))
            .then_with(|| a.name.cmp(&b.name))
    });
    sorted.dedup();

    sorted.iter().map(|pin| format!("{pin}\n")).collect()
}

/// Result of writing a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSnapshot {
    pub path: PathBuf,
    pub package_count: usize,
    /// SHA-256 of the written bytes.
    pub digest: String,
}

/// Replace the manifest at `path` with `packages`, UTF-8 without BOM.
///
/// Written to a temp file beside the target and renamed over it, so readers
/// never see a half-written manifest.
pub fn write_manifest(path: &Path, packages: &[PackagePin]) -> Result<ManifestSnapshot> {
    let write_err = |source: std::io::Error| PipelineError::SnapshotWrite {
        path: path.to_path_buf(),
        source,
    };

    let body = render_manifest(packages);
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(write_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(body.as_bytes()).map_err(write_err)?;
    tmp.flush().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;

    debug!(path = %path.display(), "Wrote dependency manifest");

    Ok(ManifestSnapshot {
        path: path.to_path_buf(),
        package_count: body.lines().count(),
        digest: sha256_hex(body.as_bytes()),
    })
}

/// Read a manifest back, tolerating byte-order marks.
///
/// Manifests produced by shell redirection on Windows are UTF-16 with a BOM;
/// UTF-8 and UTF-32 BOMs are handled as well. Without a BOM the file must be UTF-8.
pub fn read_manifest(path: &Path) -> Result<Vec<PackagePin>> {
    let bytes = std::fs::read(path)?;
    let text = decode_text(&bytes)?;
    Ok(text.lines().filter_map(PackagePin::parse).collect())
}

fn decode_text(bytes: &[u8]) -> Result<String> {
    let invalid = |encoding: &str| {
        PipelineError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("manifest is not valid {encoding}"),
        ))
    };

    // UTF-32 LE shares its first two bytes with UTF-16 LE, so it is checked first.
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE, 0x00, 0x00]) {
        return decode_utf32(rest, u32::from_le_bytes).ok_or_else(|| invalid("UTF-32LE"));
    }
    if let Some(rest) = bytes.strip_prefix(&[0x00, 0x00, 0xFE, 0xFF]) {
        return decode_utf32(rest, u32::from_be_bytes).ok_or_else(|| invalid("UTF-32BE"));
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8(rest.to_vec()).map_err(|_| invalid("UTF-8"));
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, u16::from_le_bytes).ok_or_else(|| invalid("UTF-16LE"));
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, u16::from_be_bytes).ok_or_else(|| invalid("UTF-16BE"));
    }

    String::from_utf8(bytes.to_vec()).map_err(|_| invalid("UTF-8"))
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes.chunks_exact(2).map(|c| unit([c[0], c[1]])).collect();
    String::from_utf16(&units).ok()
}

fn decode_utf32(bytes: &[u8], unit: fn([u8; 4]) -> u32) -> Option<String> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    bytes
        .chunks_exact(4)
        .map(|c| char::from_u32(unit([c[0], c[1], c[2], c[3]])))
        .collect()
}

/// Snapshot stage: query the source, then overwrite the manifest.
pub async fn snapshot_dependencies(
    rt: &ToolRuntime<'_>,
    source: &dyn PackageSource,
) -> Result<ManifestSnapshot> {
    let packages = source.installed_packages(rt).await?;

    if rt.cancel.is_cancelled() {
        return Err(PipelineError::Cancelled {
            stage: StageKind::Snapshot,
        });
    }

    write_manifest(rt.ctx.manifest_path(), &packages)
}
