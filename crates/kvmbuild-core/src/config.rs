//! Pipeline configuration: `build-pipeline.toml` plus CLI overrides.
//!
//! Every field has a default, so an absent or partial file is valid. The
//! defaults reproduce the historical release script.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::gate::{QualityGate, QualityPolicy};
use crate::manifest::MANIFEST_RELATIVE_PATH;
use crate::packager::PackagerConfig;
use crate::stage::{StageKind, StageTimeouts, ToolInvocation};

/// Config file looked up in the project root when none is given explicitly.
pub const DEFAULT_CONFIG_FILE: &str = "build-pipeline.toml";

/// Root-relative locations of pipeline artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub output_dir: PathBuf,
    pub releases_dir: PathBuf,
    pub manifest: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("build"),
            releases_dir: PathBuf::from("releases"),
            manifest: PathBuf::from(MANIFEST_RELATIVE_PATH),
        }
    }
}

/// External tools. Explicit command overrides replace the derived defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Python interpreter used for pip, the formatter, the linter and the packager.
    pub python: String,

    /// UI resource generator script, run as `<python> <script>`.
    pub resource_script: PathBuf,
    pub resource_command: Option<Vec<String>>,

    pub formatter_command: Option<Vec<String>>,

    /// Linter rule configuration file.
    pub lint_config: PathBuf,
    pub linter_command: Option<Vec<String>>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            python: "python".to_string(),
            resource_script: PathBuf::from("ui/compile_ui.py"),
            resource_command: None,
            formatter_command: None,
            lint_config: PathBuf::from(".pylintrc"),
            linter_command: None,
        }
    }
}

impl ToolsConfig {
    pub fn resources_invocation(&self) -> ToolInvocation {
        let command = self.resource_command.clone().unwrap_or_else(|| {
            vec![
                self.python.clone(),
                self.resource_script.display().to_string(),
            ]
        });
        ToolInvocation::new(StageKind::Resources, command)
    }

    pub fn formatter_invocation(&self) -> ToolInvocation {
        let command = self.formatter_command.clone().unwrap_or_else(|| {
            vec![
                self.python.clone(),
                "-m".to_string(),
                "black".to_string(),
                "--safe".to_string(),
                ".".to_string(),
            ]
        });
        ToolInvocation::new(StageKind::Format, command)
    }

    pub fn linter_invocation(&self) -> ToolInvocation {
        let command = self.linter_command.clone().unwrap_or_else(|| {
            vec![
                self.python.clone(),
                "-m".to_string(),
                "pylint".to_string(),
                format!("--rcfile={}", self.lint_config.display()),
                "--recursive=y".to_string(),
                ".".to_string(),
            ]
        });
        ToolInvocation::new(StageKind::Lint, command)
    }
}

/// Quality gate switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub policy: QualityPolicy,
    pub skip_format: bool,
    pub skip_lint: bool,
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub paths: PathsConfig,
    pub tools: ToolsConfig,
    pub quality: QualityConfig,
    pub timeouts: StageTimeouts,
    pub packager: PackagerConfig,
}

impl BuildConfig {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| PipelineError::InvalidConfig(e.to_string()))
    }

    /// Load `path`, which must exist.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            PipelineError::InvalidConfig(msg) => {
                PipelineError::InvalidConfig(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Load `explicit` if given, else `<root>/build-pipeline.toml` if present, else defaults.
    pub fn discover(root: &Path, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let candidate = root.join(DEFAULT_CONFIG_FILE);
        if candidate.is_file() {
            debug!(path = %candidate.display(), "Loading pipeline config");
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// Render back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PipelineError::InvalidConfig(e.to_string()))
    }

    /// Quality gate built from the tool commands and switches.
    pub fn quality_gate(&self) -> QualityGate {
        QualityGate {
            formatter: (!self.quality.skip_format).then(|| self.tools.formatter_invocation()),
            linter: (!self.quality.skip_lint).then(|| self.tools.linter_invocation()),
            policy: self.quality.policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = BuildConfig::from_toml("").unwrap();
        assert_eq!(config, BuildConfig::default());
        assert_eq!(config.quality.policy, QualityPolicy::Advisory);
        assert_eq!(config.paths.output_dir, PathBuf::from("build"));
    }

    #[test]
    fn test_partial_document() {
        let config = BuildConfig::from_toml(
            r#"
            [tools]
            python = "py"

            [quality]
            policy = "blocking"
            skip_format = true

            [packager]
            entry_point = "app.py"
            product_version = "2.1.0"
            jobs = 4

            [[packager.data_dirs]]
            source = "assets"
            dest = "assets"

            [timeouts]
            package_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.tools.python, "py");
        assert_eq!(config.tools.lint_config, PathBuf::from(".pylintrc"));
        assert_eq!(config.quality.policy, QualityPolicy::Blocking);
        assert!(config.quality.skip_format);
        assert!(!config.quality.skip_lint);
        assert_eq!(config.packager.entry_point, PathBuf::from("app.py"));
        assert_eq!(config.packager.jobs, 4);
        assert_eq!(config.packager.data_dirs.len(), 1);
        assert_eq!(config.packager.product_name, "USB KVM Client");
        assert_eq!(config.timeouts.for_stage(StageKind::Package), None);
        assert_eq!(config.timeouts.lint_secs, StageTimeouts::default().lint_secs);
    }

    #[test]
    fn test_invalid_document() {
        let err = BuildConfig::from_toml("[quality]\npolicy = \"sometimes\"").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = BuildConfig::default();
        let rendered = config.to_toml().unwrap();
        assert_eq!(BuildConfig::from_toml(&rendered).unwrap(), config);
    }

    #[test]
    fn test_entry_point_names_artifact() {
        let config = BuildConfig::from_toml("[packager]\nentry_point = \"app.py\"\n").unwrap();
        assert_eq!(config.packager.output_filename, None);
        assert_eq!(config.packager.artifact_name(), "app.exe");

        let config =
            BuildConfig::from_toml("[packager]\noutput_filename = \"usb_kvm_client\"\n").unwrap();
        assert_eq!(config.packager.artifact_name(), "usb_kvm_client.exe");
    }

    #[test]
    fn test_empty_image_paths_disable_images() {
        let config =
            BuildConfig::from_toml("[packager]\nicon = \"\"\nsplash_image = \"\"\n").unwrap();
        assert_eq!(config.packager.icon, None);
        assert_eq!(config.packager.splash_image, None);

        let config = BuildConfig::from_toml("[packager]\nicon = \"res/kvm.ico\"\n").unwrap();
        assert_eq!(config.packager.icon, Some(PathBuf::from("res/kvm.ico")));
        assert_eq!(config.packager.splash_image, Some(PathBuf::from("icons/splash.png")));
    }

    #[test]
    fn test_toml_roundtrip_with_unset_fields() {
        let mut config = BuildConfig::default();
        config.packager.entry_point = PathBuf::from("app.py");
        config.packager.output_filename = None;
        config.packager.icon = None;
        config.packager.splash_image = None;

        let rendered = config.to_toml().unwrap();
        assert_eq!(BuildConfig::from_toml(&rendered).unwrap(), config);

        config.packager.output_filename = Some("usb_kvm_client".to_string());
        let rendered = config.to_toml().unwrap();
        assert_eq!(BuildConfig::from_toml(&rendered).unwrap(), config);
    }

    #[test]
    fn test_discover() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(BuildConfig::discover(dir.path(), None).unwrap(), BuildConfig::default());

        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            "[tools]\npython = \"python3.11\"\n",
        )
        .unwrap();
        assert_eq!(
            BuildConfig::discover(dir.path(), None).unwrap().tools.python,
            "python3.11"
        );

        let err = BuildConfig::discover(dir.path(), Some(&dir.path().join("missing.toml")))
            .unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn test_default_invocations() {
        let tools = ToolsConfig::default();
        assert_eq!(tools.resources_invocation().command, vec!["python", "ui/compile_ui.py"]);
        assert_eq!(
            tools.formatter_invocation().command,
            vec!["python", "-m", "black", "--safe", "."]
        );
        assert!(tools
            .linter_invocation()
            .command
            .contains(&"--rcfile=.pylintrc".to_string()));
    }

    #[test]
    fn test_command_overrides() {
        let tools = ToolsConfig {
            resource_command: Some(vec!["pwsh".to_string(), "ui/build.ps1".to_string()]),
            linter_command: Some(vec!["ruff".to_string(), "check".to_string()]),
            ..ToolsConfig::default()
        };
        assert_eq!(tools.resources_invocation().program(), "pwsh");
        assert_eq!(tools.linter_invocation().command, vec!["ruff", "check"]);
    }

    #[test]
    fn test_quality_gate_skips() {
        let mut config = BuildConfig::default();
        config.quality.skip_lint = true;
        let gate = config.quality_gate();
        assert!(gate.formatter.is_some());
        assert!(gate.linter.is_none());
        assert_eq!(gate.policy, QualityPolicy::Advisory);
    }
}
