//! Structured lifecycle events for pipeline runs.
//!
//! Emitted at `info!` (warnings at `warn!`) inside a run-scoped span, so JSON
//! output carries the run id on every line.

use tracing::{info, warn};

use crate::report::StageStatus;
use crate::stage::StageKind;

/// Span tagged with the run id. Attach with `Instrument::instrument`.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("pipeline.run", run_id = %run_id)
}

pub fn emit_pipeline_started(run_id: &str, anchor: &str) {
    info!(event = "pipeline.started", run_id = %run_id, anchor = %anchor);
}

pub fn emit_stage_started(stage: StageKind) {
    info!(event = "stage.started", stage = %stage);
}

pub fn emit_stage_finished(stage: StageKind, status: StageStatus, duration_ms: u64) {
    info!(
        event = "stage.finished",
        stage = %stage,
        status = ?status,
        duration_ms = duration_ms,
    );
}

pub fn emit_stage_warning(stage: StageKind, message: &str) {
    warn!(event = "stage.warning", stage = %stage, message = %message);
}

pub fn emit_pipeline_finished(run_id: &str, duration_ms: u64, success: bool, exit_code: i32) {
    info!(
        event = "pipeline.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        success = success,
        exit_code = exit_code,
    );
}
