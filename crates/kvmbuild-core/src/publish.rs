//! Move the packaged executable into the persistent releases directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::report::file_sha256;

/// A release artifact after publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// SHA-256 of the published file.
    pub digest: String,
}

/// Move `artifact` into `releases_dir`, replacing any file with the same name.
///
/// `releases_dir` is created when absent. The move is a rename when source and
/// destination share a filesystem; otherwise the bytes are copied into a temp
/// file inside `releases_dir` and renamed over the destination, so a stale
/// release is never partially overwritten.
pub fn publish(artifact: &Path, releases_dir: &Path) -> Result<PublishedArtifact> {
    let fail = |path: &Path, reason: String| PipelineError::Publish {
        path: path.to_path_buf(),
        reason,
    };

    if !artifact.is_file() {
        return Err(fail(
            artifact,
            "build artifact is missing; packaging did not produce it".to_string(),
        ));
    }
    let file_name = artifact
        .file_name()
        .ok_or_else(|| fail(artifact, "artifact path has no file name".to_string()))?;

    fs::create_dir_all(releases_dir)
        .map_err(|e| fail(releases_dir, format!("cannot create releases directory: {e}")))?;

    let destination = releases_dir.join(file_name);

    if let Err(rename_err) = fs::rename(artifact, &destination) {
        debug!(error = %rename_err, "Rename failed, falling back to copy");
        copy_replace(artifact, releases_dir, &destination)
            .map_err(|e| fail(&destination, e.to_string()))?;
        fs::remove_file(artifact)
            .map_err(|e| fail(artifact, format!("published but cannot remove build copy: {e}")))?;
    }

    let size_bytes = fs::metadata(&destination)
        .map_err(|e| fail(&destination, e.to_string()))?
        .len();
    let digest = file_sha256(&destination).map_err(|e| fail(&destination, e.to_string()))?;

    info!(path = %destination.display(), size_bytes, "Published release artifact");

    Ok(PublishedArtifact {
        path: destination,
        size_bytes,
        digest,
    })
}

fn copy_replace(source: &Path, dir: &Path, destination: &Path) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    let mut reader = fs::File::open(source)?;
    io::copy(&mut reader, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(destination).map_err(|e| e.error)?;
    Ok(())
}
