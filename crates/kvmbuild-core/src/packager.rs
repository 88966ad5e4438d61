//! Standalone-executable packaging.
//!
//! [`PackagerConfig`] is the typed form of the packager's long flag list. It
//! is validated against the project tree first, then serialized to the
//! packager's command line by [`PackagerConfig::to_args`].

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::runner::ToolRuntime;
use crate::stage::{StageKind, ToolInvocation};

/// A directory bundled into the executable: `source` (root-relative) lands at `dest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDir {
    pub source: PathBuf,
    pub dest: String,
}

impl DataDir {
    pub fn new(source: impl Into<PathBuf>, dest: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
        }
    }
}

/// Packager settings for the USB KVM client executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagerConfig {
    /// Script the executable starts from, relative to the root.
    pub entry_point: PathBuf,

    /// Executable base name. Defaults to the entry point's stem when unset;
    /// set it to `usb_kvm_client` for the historical release name.
    pub output_filename: Option<String>,

    pub standalone: bool,
    pub onefile: bool,

    /// Run as a background GUI process with no console window.
    pub disable_console: bool,

    pub data_dirs: Vec<DataDir>,

    /// Packager plugins to enable.
    pub plugins: Vec<String>,

    /// Qt plugin groups to bundle.
    pub include_qt_plugins: Vec<String>,

    /// DLL glob patterns to leave out of the bundle.
    pub exclude_dlls: Vec<String>,

    pub product_name: String,
    pub file_description: String,

    /// One to four dot-separated integers.
    pub product_version: String,

    /// Window icon. An empty string in the config file disables it.
    #[serde(with = "empty_as_none")]
    pub icon: Option<PathBuf>,

    /// Startup splash image. An empty string in the config file disables it.
    #[serde(with = "empty_as_none")]
    pub splash_image: Option<PathBuf>,

    /// Parallel compile jobs handed to the packager.
    pub jobs: usize,

    pub quiet: bool,

    /// Bundle the GUI toolkit's own translation files.
    pub include_qt_translations: bool,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            entry_point: PathBuf::from("main.py"),
            output_filename: None,
            standalone: true,
            onefile: true,
            disable_console: true,
            data_dirs: vec![
                DataDir::new("icons", "icons"),
                DataDir::new("data", "data"),
                DataDir::new("translations", "translations"),
            ],
            plugins: vec!["pyside6".to_string()],
            include_qt_plugins: vec!["multimedia".to_string()],
            exclude_dlls: [
                "qt6charts*",
                "qt63d*",
                "qt6sensors*",
                "qt6test*",
                "qt6webengine*",
                "qt6pdf*",
                "qt6web*",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            product_name: "USB KVM Client".to_string(),
            file_description: "USB KVM Client".to_string(),
            product_version: "1.0.0".to_string(),
            icon: Some(PathBuf::from("icons/main.ico")),
            splash_image: Some(PathBuf::from("icons/splash.png")),
            jobs: default_jobs(),
            quiet: true,
            include_qt_translations: false,
        }
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl PackagerConfig {
    /// Executable file name, e.g. `usb_kvm_client.exe` or `app.exe` for `app.py`.
    pub fn artifact_name(&self) -> String {
        let base = match &self.output_filename {
            Some(name) => name.trim_end_matches(".exe").to_string(),
            None => self
                .entry_point
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "main".to_string()),
        };
        format!("{base}.exe")
    }

    /// Check the configuration against the tree under `root`.
    ///
    /// All problems are reported together.
    pub fn validate(&self, root: &Path) -> Result<()> {
        let mut problems = Vec::new();

        if self.product_name.trim().is_empty() {
            problems.push("product_name must not be empty".to_string());
        }
        if self.jobs == 0 {
            problems.push("jobs must be at least 1".to_string());
        }
        if !is_valid_product_version(&self.product_version) {
            problems.push(format!(
                "product_version {:?} must be 1 to 4 dot-separated integers",
                self.product_version
            ));
        }
        if let Some(name) = &self.output_filename {
            if name.trim().trim_end_matches(".exe").is_empty() || name.contains(['/', '\\']) {
                problems.push(format!("output_filename {name:?} must be a bare file name"));
            }
        }

        if !root.join(&self.entry_point).is_file() {
            problems.push(format!("entry point {} not found", self.entry_point.display()));
        }

        for dir in &self.data_dirs {
            if !root.join(&dir.source).is_dir() {
                problems.push(format!("data directory {} not found", dir.source.display()));
            }
            if !is_relative_dest(&dir.dest) {
                problems.push(format!(
                    "data directory destination {:?} must be a non-empty relative path",
                    dir.dest
                ));
            }
        }

        for (label, image) in [("icon", &self.icon), ("splash image", &self.splash_image)] {
            if let Some(path) = image {
                if !root.join(path).is_file() {
                    problems.push(format!("{label} {} not found", path.display()));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::InvalidConfig(problems.join("; ")))
        }
    }

    /// Packager arguments, after the interpreter, for a build into `output_dir`.
    pub fn to_args(&self, output_dir: &Path) -> Vec<String> {
        let mut args = vec!["-m".to_string(), "nuitka".to_string()];

        if self.standalone {
            args.push("--standalone".to_string());
        }
        if self.onefile {
            args.push("--onefile".to_string());
        }
        if self.disable_console {
            args.push("--windows-console-mode=disable".to_string());
        }

        args.push(format!("--output-dir={}", output_dir.display()));
        args.push(format!("--output-filename={}", self.artifact_name()));

        for dir in &self.data_dirs {
            args.push(format!("--include-data-dir={}={}", dir.source.display(), dir.dest));
        }
        for plugin in &self.plugins {
            args.push(format!("--enable-plugin={plugin}"));
        }
        if !self.include_qt_plugins.is_empty() {
            args.push(format!("--include-qt-plugins={}", self.include_qt_plugins.join(",")));
        }
        for pattern in &self.exclude_dlls {
            args.push(format!("--noinclude-dlls={pattern}"));
        }

        args.push(format!("--product-name={}", self.product_name));
        args.push(format!("--file-description={}", self.file_description));
        args.push(format!("--product-version={}", self.product_version));

        if let Some(icon) = &self.icon {
            args.push(format!("--windows-icon-from-ico={}", icon.display()));
        }
        if let Some(splash) = &self.splash_image {
            args.push(format!("--onefile-windows-splash-screen-image={}", splash.display()));
        }

        args.push(format!("--jobs={}", self.jobs));
        if self.quiet {
            args.push("--quiet".to_string());
        }
        if !self.include_qt_translations {
            args.push("--noinclude-qt-translations".to_string());
        }

        args.push(self.entry_point.display().to_string());
        args
    }

    /// Full invocation: `python -m nuitka …`.
    pub fn invocation(&self, python: &str, output_dir: &Path) -> ToolInvocation {
        let mut command = vec![python.to_string()];
        command.extend(self.to_args(output_dir));
        ToolInvocation::new(StageKind::Package, command)
    }
}

/// Optional paths stored as plain strings, where `""` means unset.
///
/// TOML has no null, so this is the only way a config file can switch off a
/// path that is set by default.
mod empty_as_none {
    use std::path::PathBuf;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<PathBuf>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(path) => serializer.collect_str(&path.display()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<PathBuf>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok((!raw.trim().is_empty()).then(|| PathBuf::from(raw)))
    }
}

fn is_valid_product_version(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    (1..=4).contains(&parts.len())
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()) && p.parse::<u32>().is_ok())
}

fn is_relative_dest(dest: &str) -> bool {
    let path = Path::new(dest);
    !dest.trim().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Package stage: validate, build, and return the produced executable's path.
pub async fn package(rt: &ToolRuntime<'_>, config: &PackagerConfig, python: &str) -> Result<PathBuf> {
    config.validate(rt.ctx.root())?;

    let output_dir = rt.ctx.output_dir();
    std::fs::create_dir_all(output_dir).map_err(|e| PipelineError::Packaging {
        diagnostics: format!("cannot create {}: {e}", output_dir.display()),
    })?;

    let invocation = config.invocation(python, output_dir);
    info!(
        product = %config.product_name,
        version = %config.product_version,
        jobs = config.jobs,
        "Packaging executable"
    );
    debug!(command = %invocation.display(), "Packager command");

    let output = match rt.run(&invocation).await {
        Ok(output) => output,
        Err(PipelineError::Spawn { tool, source }) => {
            return Err(PipelineError::Packaging {
                diagnostics: format!("failed to start {tool}: {source}"),
            })
        }
        Err(err) => return Err(err),
    };

    if !output.passed() {
        return Err(PipelineError::Packaging {
            diagnostics: output.diagnostics().to_string(),
        });
    }

    let artifact = output_dir.join(config.artifact_name());
    if !artifact.is_file() {
        return Err(PipelineError::Packaging {
            diagnostics: format!(
                "packager reported success but {} was not produced",
                artifact.display()
            ),
        });
    }

    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("main.py"), b"print('kvm')").unwrap();
        for sub in ["icons", "data", "translations"] {
            std::fs::create_dir(root.join(sub)).unwrap();
        }
        std::fs::write(root.join("icons/main.ico"), b"ico").unwrap();
        std::fs::write(root.join("icons/splash.png"), b"png").unwrap();
        dir
    }

    #[test]
    fn test_artifact_name() {
        let config = PackagerConfig::default();
        assert_eq!(config.artifact_name(), "main.exe");

        let config = PackagerConfig {
            entry_point: PathBuf::from("app.py"),
            ..PackagerConfig::default()
        };
        assert_eq!(config.artifact_name(), "app.exe");

        let config = PackagerConfig {
            output_filename: Some("usb_kvm_client".to_string()),
            ..PackagerConfig::default()
        };
        assert_eq!(config.artifact_name(), "usb_kvm_client.exe");

        let config = PackagerConfig {
            output_filename: Some("kvm.exe".to_string()),
            ..PackagerConfig::default()
        };
        assert_eq!(config.artifact_name(), "kvm.exe");
    }

    #[test]
    fn test_default_config_validates() {
        let dir = project();
        PackagerConfig::default().validate(dir.path()).expect("valid");
    }

    #[test]
    fn test_validate_reports_all_problems() {
        let dir = tempfile::tempdir().unwrap();
        let config = PackagerConfig {
            product_name: " ".to_string(),
            jobs: 0,
            product_version: "1.2.3.4.5".to_string(),
            ..PackagerConfig::default()
        };

        let err = config.validate(dir.path()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("product_name"));
        assert!(msg.contains("jobs"));
        assert!(msg.contains("product_version"));
        assert!(msg.contains("entry point main.py not found"));
        assert!(msg.contains("data directory icons not found"));
        assert!(msg.contains("icon icons/main.ico not found"));
    }

    #[test]
    fn test_validate_rejects_escaping_dest() {
        let dir = project();
        let mut config = PackagerConfig::default();
        config.data_dirs.push(DataDir::new("data", "../outside"));

        let err = config.validate(dir.path()).unwrap_err();
        assert!(err.to_string().contains("../outside"));
    }

    #[test]
    fn test_validate_rejects_path_in_output_filename() {
        let dir = project();
        let config = PackagerConfig {
            output_filename: Some("dist/kvm".to_string()),
            ..PackagerConfig::default()
        };
        assert!(config.validate(dir.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_bare_exe_suffix() {
        let dir = project();
        for name in [".exe", " .exe", ""] {
            let config = PackagerConfig {
                output_filename: Some(name.to_string()),
                ..PackagerConfig::default()
            };
            let err = config.validate(dir.path()).unwrap_err();
            assert!(err.to_string().contains("output_filename"), "{name:?} accepted");
        }
    }

    #[test]
    fn test_validate_without_icon_or_splash() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.py"), b"print('kvm')").unwrap();
        let config = PackagerConfig {
            data_dirs: vec![],
            icon: None,
            splash_image: None,
            ..PackagerConfig::default()
        };
        config.validate(dir.path()).expect("valid without images");
    }

    #[test]
    fn test_product_versions() {
        assert!(is_valid_product_version("1"));
        assert!(is_valid_product_version("1.0.0"));
        assert!(is_valid_product_version("2.3.4.5"));
        assert!(!is_valid_product_version(""));
        assert!(!is_valid_product_version("1..0"));
        assert!(!is_valid_product_version("1.0.0-beta"));
        assert!(!is_valid_product_version("v1.0"));
    }

    #[test]
    fn test_to_args_serialization() {
        let config = PackagerConfig {
            jobs: 8,
            output_filename: Some("usb_kvm_client".to_string()),
            ..PackagerConfig::default()
        };
        let args = config.to_args(Path::new("build"));

        assert_eq!(&args[..2], &["-m", "nuitka"]);
        for expected in [
            "--standalone",
            "--onefile",
            "--windows-console-mode=disable",
            "--output-dir=build",
            "--output-filename=usb_kvm_client.exe",
            "--include-data-dir=icons=icons",
            "--include-data-dir=data=data",
            "--include-data-dir=translations=translations",
            "--enable-plugin=pyside6",
            "--include-qt-plugins=multimedia",
            "--noinclude-dlls=qt6charts*",
            "--noinclude-dlls=qt63d*",
            "--noinclude-dlls=qt6sensors*",
            "--noinclude-dlls=qt6test*",
            "--noinclude-dlls=qt6webengine*",
            "--noinclude-dlls=qt6pdf*",
            "--noinclude-dlls=qt6web*",
            "--product-name=USB KVM Client",
            "--file-description=USB KVM Client",
            "--product-version=1.0.0",
            "--windows-icon-from-ico=icons/main.ico",
            "--onefile-windows-splash-screen-image=icons/splash.png",
            "--jobs=8",
            "--quiet",
            "--noinclude-qt-translations",
        ] {
            assert!(args.iter().any(|a| a == expected), "missing {expected}");
        }
        assert_eq!(args.last().map(String::as_str), Some("main.py"));
    }

    #[test]
    fn test_to_args_optional_flags_omitted() {
        let config = PackagerConfig {
            disable_console: false,
            icon: None,
            splash_image: None,
            quiet: false,
            include_qt_translations: true,
            include_qt_plugins: vec![],
            ..PackagerConfig::default()
        };
        let args = config.to_args(Path::new("build"));

        assert!(!args.iter().any(|a| a.starts_with("--windows-console-mode")));
        assert!(!args.iter().any(|a| a.starts_with("--windows-icon-from-ico")));
        assert!(!args.iter().any(|a| a.starts_with("--onefile-windows-splash")));
        assert!(!args.iter().any(|a| a == "--quiet"));
        assert!(!args.iter().any(|a| a == "--noinclude-qt-translations"));
        assert!(!args.iter().any(|a| a.starts_with("--include-qt-plugins")));
    }

    #[test]
    fn test_invocation_starts_with_interpreter() {
        let inv = PackagerConfig::default().invocation("py", Path::new("build"));
        assert_eq!(inv.stage, StageKind::Package);
        assert_eq!(inv.program(), "py");
        assert_eq!(inv.command[1], "-m");
    }
}
