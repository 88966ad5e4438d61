//! At-most-one pipeline run per project root.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

pub const LOCK_FILENAME: &str = ".build-pipeline.lock";

/// Written into the lock file by the holder, for diagnostics.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
    pub pid: u32,
    pub run_id: String,
    pub started_at: String,
}

/// Exclusive advisory lock held for the duration of a run.
///
/// Released when dropped.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    lock_path: PathBuf,
}

impl RunLock {
    pub fn acquire(root: &Path, run_id: &str) -> Result<Self> {
        let lock_path = root.join(LOCK_FILENAME);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if let Err(err) = file.try_lock_exclusive() {
            if is_contended(&err) {
                return Err(PipelineError::Locked { lock_path });
            }
            return Err(PipelineError::Io(err));
        }

        write_metadata(&file, run_id)?;

        Ok(Self { file, lock_path })
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn write_metadata(mut file: &File, run_id: &str) -> Result<()> {
    let metadata = LockMetadata {
        pid: std::process::id(),
        run_id: run_id.to_string(),
        started_at: chrono::Utc::now().to_rfc3339(),
    };
    file.set_len(0)?;
    serde_json::to_writer(&mut file, &metadata)?;
    file.flush()?;
    Ok(())
}
