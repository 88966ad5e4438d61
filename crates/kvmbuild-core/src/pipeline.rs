//! Pipeline driver: runs the stages in order and short-circuits on the first error.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::BuildConfig;
use crate::context::PipelineContext;
use crate::error::{PipelineError, Result};
use crate::gate::{first_line, CheckOutcome};
use crate::lock::RunLock;
use crate::manifest::{snapshot_dependencies, ManifestSnapshot, PackageSource, PipFreeze};
use crate::obs;
use crate::packager::package;
use crate::publish::{publish, PublishedArtifact};
use crate::report::{RunReport, StageOutcome, StageStatus};
use crate::resources::regenerate_resources;
use crate::runner::{ProcessExecutor, ToolExecutor, ToolRuntime};
use crate::stage::StageKind;

/// Result of a complete pipeline run.
#[derive(Debug)]
pub struct PipelineResult {
    pub report: RunReport,

    /// The published release, or the error that stopped the run.
    pub outcome: Result<PublishedArtifact>,
}

impl PipelineResult {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Process exit code: `0` on success, otherwise [`PipelineError::exit_code`].
    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            Ok(_) => 0,
            Err(err) => err.exit_code(),
        }
    }
}

/// Release pipeline orchestrator.
pub struct Pipeline {
    config: BuildConfig,
    executor: Arc<dyn ToolExecutor>,
    packages: Arc<dyn PackageSource>,
    cancel: CancelToken,
}

impl Pipeline {
    /// Pipeline backed by real subprocesses and `pip freeze`.
    pub fn new(config: BuildConfig) -> Self {
        let packages = Arc::new(PipFreeze::new(config.tools.python.clone()));
        Self {
            config,
            executor: Arc::new(ProcessExecutor),
            packages,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_package_source(mut self, packages: Arc<dyn PackageSource>) -> Self {
        self.packages = packages;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Run every stage against the project rooted at `anchor`.
    ///
    /// The run report is written to `<output_dir>/pipeline-report.json` once
    /// the run lock is held, whether the run succeeds or not.
    pub async fn run(&self, anchor: &Path) -> PipelineResult {
        let run_id = Uuid::new_v4();
        let span = obs::run_span(&run_id.to_string());
        self.run_inner(anchor, run_id).instrument(span).await
    }

    async fn run_inner(&self, anchor: &Path, run_id: Uuid) -> PipelineResult {
        let start = Instant::now();
        let mut report = RunReport::new(run_id);
        obs::emit_pipeline_started(&run_id.to_string(), &anchor.display().to_string());

        let resolved = self
            .stage(
                &mut report,
                StageKind::Resolve,
                async { PipelineContext::resolve(anchor, &self.config.paths) },
                |ctx: &PipelineContext| (StageStatus::Passed, Some(ctx.root().display().to_string())),
            )
            .await;
        let ctx = match resolved {
            Ok(ctx) => ctx,
            Err(err) => return finish(report, start, Err(err), None),
        };

        let _lock = match RunLock::acquire(ctx.root(), &run_id.to_string()) {
            Ok(lock) => lock,
            Err(err) => return finish(report, start, Err(err), None),
        };

        let outcome = self.execute(&ctx, &mut report).await;
        finish(report, start, outcome, Some(ctx.output_dir()))
    }

    async fn execute(&self, ctx: &PipelineContext, report: &mut RunReport) -> Result<PublishedArtifact> {
        let rt = ToolRuntime {
            ctx,
            executor: self.executor.as_ref(),
            timeouts: &self.config.timeouts,
            cancel: &self.cancel,
        };

        let manifest = self
            .stage(
                report,
                StageKind::Snapshot,
                snapshot_dependencies(&rt, self.packages.as_ref()),
                |m: &ManifestSnapshot| {
                    (StageStatus::Passed, Some(format!("{} packages", m.package_count)))
                },
            )
            .await?;
        report.manifest = Some(manifest);

        self.stage(
            report,
            StageKind::Resources,
            regenerate_resources(&rt, &self.config.tools.resources_invocation()),
            |_| (StageStatus::Passed, None),
        )
        .await?;

        let gate = self.config.quality_gate();
        self.stage(report, StageKind::Format, gate.run_format(&rt), check_status)
            .await?;
        self.stage(report, StageKind::Lint, gate.run_lint(&rt), check_status)
            .await?;

        let artifact = self
            .stage(
                report,
                StageKind::Package,
                package(&rt, &self.config.packager, &self.config.tools.python),
                |path: &PathBuf| (StageStatus::Passed, Some(path.display().to_string())),
            )
            .await?;

        let published = self
            .stage(
                report,
                StageKind::Publish,
                async { publish(&artifact, ctx.releases_dir()) },
                |p: &PublishedArtifact| (StageStatus::Passed, Some(p.path.display().to_string())),
            )
            .await?;
        report.release = Some(published.clone());

        Ok(published)
    }

    /// Run one stage, timing it and recording its outcome in `report`.
    async fn stage<T, F, C>(
        &self,
        report: &mut RunReport,
        stage: StageKind,
        work: F,
        classify: C,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        C: FnOnce(&T) -> (StageStatus, Option<String>),
    {
        if self.cancel.is_cancelled() {
            let err = PipelineError::Cancelled { stage };
            record(report, stage, StageStatus::Failed, 0, Some(err.to_string()));
            return Err(err);
        }

        obs::emit_stage_started(stage);
        let start = Instant::now();
        let result = work.await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (status, detail) = match &result {
            Ok(value) => classify(value),
            Err(err) => (StageStatus::Failed, Some(first_line(&err.to_string()))),
        };

        if status == StageStatus::Warned {
            if let Some(message) = &detail {
                obs::emit_stage_warning(stage, message);
                report.warnings.push(format!("{stage}: {message}"));
            }
        }

        record(report, stage, status, duration_ms, detail);
        result
    }
}

fn check_status(check: &CheckOutcome) -> (StageStatus, Option<String>) {
    (check.status, check.warning.clone())
}

fn record(
    report: &mut RunReport,
    stage: StageKind,
    status: StageStatus,
    duration_ms: u64,
    detail: Option<String>,
) {
    obs::emit_stage_finished(stage, status, duration_ms);
    report.stages.push(StageOutcome {
        stage,
        status,
        duration_ms,
        detail,
    });
}

fn finish(
    mut report: RunReport,
    start: Instant,
    outcome: Result<PublishedArtifact>,
    report_dir: Option<&Path>,
) -> PipelineResult {
    report.duration_ms = start.elapsed().as_millis() as u64;
    report.success = outcome.is_ok();
    report.exit_code = match &outcome {
        Ok(_) => 0,
        Err(err) => err.exit_code(),
    };
    report.error = outcome.as_ref().err().map(|e| e.to_string());

    if let Some(dir) = report_dir {
        match report.write_to_dir(dir) {
            Ok(path) => info!(path = %path.display(), "Wrote run report"),
            Err(err) => warn!(error = %err, "Failed to write run report"),
        }
    }

    obs::emit_pipeline_finished(
        &report.run_id.to_string(),
        report.duration_ms,
        report.success,
        report.exit_code,
    );

    PipelineResult { report, outcome }
}
