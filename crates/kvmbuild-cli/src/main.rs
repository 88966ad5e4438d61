//! build-pipeline - release pipeline CLI for the USB KVM client
//!
//! ## Commands
//!
//! - `run`: Freeze dependencies, regenerate resources, check, package and publish
//! - `deps`: Print the pinned dependency manifest
//! - `show-config`: Print the effective configuration and packager command

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn, Level};

use kvmbuild_core::config::DEFAULT_CONFIG_FILE;
use kvmbuild_core::{
    read_manifest, BuildConfig, CancelToken, Pipeline, PipelineResult, QualityPolicy,
};

#[derive(Parser)]
#[command(name = "build-pipeline")]
#[command(author = "USB KVM Client Developers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build and publish the USB KVM client executable", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and machine-readable output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Project location shared by every command.
#[derive(clap::Args, Debug, Clone)]
struct ProjectArgs {
    /// Project root (default: parent of the current directory)
    #[arg(long, env = "BUILD_PIPELINE_ROOT", default_value = "..")]
    root: PathBuf,

    /// Pipeline config file (default: <root>/build-pipeline.toml if present)
    #[arg(long, env = "BUILD_PIPELINE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full release pipeline
    Run {
        #[command(flatten)]
        project: ProjectArgs,

        #[command(flatten)]
        overrides: RunOverrides,
    },

    /// Print the pinned dependency manifest
    Deps {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Print the effective configuration and packager command
    ShowConfig {
        #[command(flatten)]
        project: ProjectArgs,
    },
}

/// Command-line overrides applied on top of the config file.
#[derive(clap::Args, Debug, Clone, Default)]
struct RunOverrides {
    /// Skip the linter
    #[arg(long)]
    skip_lint: bool,

    /// Skip the formatter
    #[arg(long)]
    skip_format: bool,

    /// Whether lint findings abort the run (advisory, blocking)
    #[arg(long)]
    lint_policy: Option<QualityPolicy>,

    /// Parallel compilation jobs for the packager
    #[arg(long)]
    job_count: Option<usize>,

    /// Executable base name; an empty value derives it from the entry point
    #[arg(long)]
    output_filename: Option<String>,

    /// Build output directory, relative to the root
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Release directory, relative to the root
    #[arg(long)]
    releases_dir: Option<PathBuf>,
}

impl RunOverrides {
    fn apply(&self, config: &mut BuildConfig) {
        if self.skip_lint {
            config.quality.skip_lint = true;
        }
        if self.skip_format {
            config.quality.skip_format = true;
        }
        if let Some(policy) = self.lint_policy {
            config.quality.policy = policy;
        }
        if let Some(jobs) = self.job_count {
            config.packager.jobs = jobs;
        }
        if let Some(name) = &self.output_filename {
            config.packager.output_filename = (!name.trim().is_empty()).then(|| name.clone());
        }
        if let Some(dir) = &self.output_dir {
            config.paths.output_dir = dir.clone();
        }
        if let Some(dir) = &self.releases_dir {
            config.paths.releases_dir = dir.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    kvmbuild_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run { project, overrides } => cmd_run(&project, &overrides, cli.json).await,
        Commands::Deps { project } => cmd_deps(&project, cli.json).map(|_| ExitCode::SUCCESS),
        Commands::ShowConfig { project } => cmd_show_config(&project).map(|_| ExitCode::SUCCESS),
    }
}

/// Load the config for `project`, from `--config` or the root's default file.
fn load_config(project: &ProjectArgs) -> Result<BuildConfig> {
    BuildConfig::discover(&project.root, project.config.as_deref()).with_context(|| {
        match &project.config {
            Some(path) => format!("Failed to load config {}", path.display()),
            None => format!(
                "Failed to load {}",
                project.root.join(DEFAULT_CONFIG_FILE).display()
            ),
        }
    })
}

/// Run the release pipeline and print a stage summary
async fn cmd_run(project: &ProjectArgs, overrides: &RunOverrides, json: bool) -> Result<ExitCode> {
    let mut config = load_config(project)?;
    overrides.apply(&mut config);

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    info!(root = %project.root.display(), "Starting release pipeline");
    let result = Pipeline::new(config)
        .with_cancel(cancel)
        .run(&project.root)
        .await;

    if json {
        let rendered =
            serde_json::to_string_pretty(&result.report).context("Failed to render run report")?;
        println!("{rendered}");
    } else {
        print_summary(&result);
    }

    Ok(exit_code(&result))
}

fn print_summary(result: &PipelineResult) {
    let report = &result.report;

    println!("Run ID: {}", report.run_id);
    println!(
        "Status: {}",
        if result.success() { "✓ PASSED" } else { "✗ FAILED" }
    );
    println!("Duration: {}ms", report.duration_ms);
    println!();

    for outcome in &report.stages {
        match &outcome.detail {
            Some(detail) => println!(
                "  {} {} ({}ms): {}",
                outcome.status.symbol(),
                outcome.stage,
                outcome.duration_ms,
                detail
            ),
            None => println!(
                "  {} {} ({}ms)",
                outcome.status.symbol(),
                outcome.stage,
                outcome.duration_ms
            ),
        }
    }

    println!();
    println!(
        "Summary: {}/{} stages passed",
        report.passed_count(),
        report.stages.len()
    );

    if !report.warnings.is_empty() {
        println!("Warnings:");
        for warning in &report.warnings {
            println!("  - {}", warning);
        }
    }

    match &result.outcome {
        Ok(release) => {
            println!("\n✓ Published {} ({} bytes)", release.path.display(), release.size_bytes);
            println!("  sha256: {}", release.digest);
        }
        Err(err) => {
            println!("\n✗ {}", err);
        }
    }
}

fn exit_code(result: &PipelineResult) -> ExitCode {
    ExitCode::from(u8::try_from(result.exit_code()).unwrap_or(1))
}

/// Print the pinned dependency manifest
fn cmd_deps(project: &ProjectArgs, json: bool) -> Result<()> {
    let config = load_config(project)?;
    let path = manifest_path(&project.root, &config);

    let packages = read_manifest(&path)
        .with_context(|| format!("Failed to read dependency manifest {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&packages)?);
        return Ok(());
    }

    println!("Manifest: {}", path.display());
    println!();
    for package in &packages {
        println!("  {}", package);
    }
    println!();
    println!("{} packages pinned", packages.len());
    Ok(())
}

fn manifest_path(root: &Path, config: &BuildConfig) -> PathBuf {
    root.join(&config.paths.manifest)
}

/// Print the effective configuration and the packager command line
fn cmd_show_config(project: &ProjectArgs) -> Result<()> {
    let config = load_config(project)?;
    let rendered = config.to_toml().context("Failed to render config")?;

    println!("# Effective configuration for {}", project.root.display());
    println!("{rendered}");
    println!("# Packager command");
    println!("{}", packager_command(&project.root, &config));
    Ok(())
}

fn packager_command(root: &Path, config: &BuildConfig) -> String {
    config
        .packager
        .invocation(&config.tools.python, &root.join(&config.paths.output_dir))
        .display()
}
