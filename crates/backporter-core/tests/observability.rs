//! Structured lifecycle events emitted by pipeline runs.

use std::sync::Arc;

use backporter_core::fakes::{ScriptedResponse, ScriptedRunner};
use backporter_core::obs::{emit_pipeline_finished, emit_stage_completed, run_span};
use backporter_core::{BackportRequest, PipelineOrchestrator, PipelineSettings, PipelineStage};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_stage_completed_logs_stage_and_duration() {
    let span = run_span("c0ffee", "rhel-9.4");
    let _entered = span.enter();
    emit_stage_completed(PipelineStage::PatchIsolated, 42);

    assert!(logs_contain("stage.completed"));
    assert!(logs_contain("patch_isolated"));
    assert!(logs_contain("duration_ms=42"));
}

#[traced_test]
#[test]
fn test_pipeline_finished_logs_patch_size() {
    emit_pipeline_finished(1200, 512);
    assert!(logs_contain("pipeline.finished"));
    assert!(logs_contain("patch_bytes=512"));
}

#[traced_test]
#[tokio::test]
async fn test_failed_run_logs_failure_event() {
    let runner = Arc::new(ScriptedRunner::new().on(
        "git",
        &["clone"],
        ScriptedResponse::failure(128, "fatal: unable to access"),
    ));
    let request =
        BackportRequest::new("https://example.com/up.git", "rpms/up", "abc123", "rhel-9").unwrap();
    let orchestrator = PipelineOrchestrator::new(runner, PipelineSettings::default());

    let failure = orchestrator
        .run(&request, &mut |_l: &str| {})
        .await
        .unwrap_err();

    assert_eq!(failure.reached, PipelineStage::Init);
    assert!(logs_contain("stage.started"));
    assert!(logs_contain("pipeline.failed"));
    assert!(logs_contain("clone_error"));
    assert!(!logs_contain("stage.completed"));
}
