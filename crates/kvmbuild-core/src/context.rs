//! Project root resolution and the immutable per-run context.

use std::path::{Path, PathBuf};

use crate::config::PathsConfig;
use crate::error::{PipelineError, Result};

/// Resolved locations for one pipeline run.
///
/// Built once by [`PipelineContext::resolve`] and only read afterwards. Every
/// subprocess receives `root` as its working directory; the process-wide
/// current directory is never changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineContext {
    root: PathBuf,
    output_dir: PathBuf,
    releases_dir: PathBuf,
    manifest_path: PathBuf,
}

impl PipelineContext {
    /// Resolve `anchor` to its canonical absolute form.
    ///
    /// Relative anchors are interpreted against the current working directory.
    pub fn resolve(anchor: &Path, paths: &PathsConfig) -> Result<Self> {
        let root = std::fs::canonicalize(anchor).map_err(|e| PipelineError::PathResolution {
            path: anchor.to_path_buf(),
            reason: e.to_string(),
        })?;

        if !root.is_dir() {
            return Err(PipelineError::PathResolution {
                path: anchor.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        Ok(Self {
            output_dir: root.join(&paths.output_dir),
            releases_dir: root.join(&paths.releases_dir),
            manifest_path: root.join(&paths.manifest),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Packager workspace (`build/` by default).
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Persistent release store (`releases/` by default).
    pub fn releases_dir(&self) -> &Path {
        &self.releases_dir
    }

    /// Dependency manifest (`data/requirements.txt` by default).
    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Join a root-relative path onto the root. Absolute paths pass through.
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_absolute_form() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::resolve(dir.path(), &PathsConfig::default()).unwrap();

        let expected = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(ctx.root(), expected.as_path());
        assert!(ctx.root().is_absolute());
    }

    #[test]
    fn test_resolve_relative_components() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("scripts")).unwrap();
        let anchor = dir.path().join("scripts").join("..");

        let ctx = PipelineContext::resolve(&anchor, &PathsConfig::default()).unwrap();
        assert_eq!(ctx.root(), std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn test_default_layout() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::resolve(dir.path(), &PathsConfig::default()).unwrap();

        assert_eq!(ctx.output_dir(), ctx.root().join("build"));
        assert_eq!(ctx.releases_dir(), ctx.root().join("releases"));
        assert_eq!(
            ctx.manifest_path(),
            ctx.root().join("data").join("requirements.txt")
        );
    }

    #[test]
    fn test_custom_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            output_dir: PathBuf::from("out"),
            releases_dir: PathBuf::from("dist/releases"),
            ..PathsConfig::default()
        };
        let ctx = PipelineContext::resolve(dir.path(), &paths).unwrap();
        assert_eq!(ctx.output_dir(), ctx.root().join("out"));
        assert_eq!(ctx.releases_dir(), ctx.root().join("dist/releases"));
    }

    #[test]
    fn test_missing_anchor_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let err = PipelineContext::resolve(&missing, &PathsConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::PathResolution { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_file_anchor_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.py");
        std::fs::write(&file, b"print('hi')").unwrap();
        let err = PipelineContext::resolve(&file, &PathsConfig::default()).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }
}
