//! Structured observability hooks for the backport pipeline.
//!
//! - [`run_span`] tags every log line of a run with its commit and branch.
//! - `emit_*` functions log stage and pipeline lifecycle events with a
//!   stable `event` field (`stage.started`, `pipeline.failed`, ...).

use tracing::{error, info};

use crate::pipeline::PipelineStage;

/// Span tagging every log line of a run with its commit and branch.
///
/// Attach it with [`tracing::Instrument`] so it survives `.await` points.
pub fn run_span(commit: &str, branch: &str) -> tracing::Span {
    tracing::info_span!("backport", commit = %commit, branch = %branch)
}

/// Emit event: a stage is about to run.
///
/// `target` is the state the pipeline reaches when the stage succeeds.
pub fn emit_stage_started(target: PipelineStage) {
    info!(event = "stage.started", stage = %target);
}

/// Emit event: a stage finished and the pipeline advanced.
pub fn emit_stage_completed(reached: PipelineStage, duration_ms: u64) {
    info!(event = "stage.completed", stage = %reached, duration_ms = duration_ms);
}

/// Emit event: the whole pipeline succeeded.
pub fn emit_pipeline_finished(duration_ms: u64, patch_bytes: usize) {
    info!(
        event = "pipeline.finished",
        duration_ms = duration_ms,
        patch_bytes = patch_bytes,
    );
}

/// Emit event: the pipeline stopped at `failed_stage`.
pub fn emit_pipeline_failed(failed_stage: PipelineStage, kind: &str, error: &dyn std::fmt::Display) {
    error!(
        event = "pipeline.failed",
        stage = %failed_stage,
        kind = %kind,
        error = %error,
    );
}
