//! Backport pipeline orchestration.
//!
//! The pipeline is a linear state machine:
//!
//! ```text
//! Init -> UpstreamCloned -> PatchIsolated -> DownstreamCloned -> BranchSelected
//!      -> SourcesMaterialized -> WorkspaceAssembled -> ImageBuilt -> ContainerRun
//!      -> ResultExtracted -> Done
//! ```
//!
//! The first failing stage ends the run with a [`PipelineFailure`] carrying
//! the last state reached and the originating error. Nothing is retried and
//! nothing is resumed; a new run always starts from a fresh workspace.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn, Instrument};

use crate::assembler::{BuildRecipe, WorkspaceAssembler};
use crate::config::{BackporterConfig, DEFAULT_FIXMORPH_BASE_IMAGE};
use crate::distgit::{DistributionRepository, DEFAULT_ARCHIVE_EXTENSION, DEFAULT_PACKAGING_CLIENT};
use crate::error::{BackportError, BackportResult};
use crate::exec::{CommandRunner, LineSink};
use crate::obs;
use crate::porting::{BuildCommands, ContainerEngine, PortingResult, PortingToolRunner};
use crate::request::BackportRequest;
use crate::source_repo::SourceRepository;
use crate::workspace::{Workspace, WorkspaceRetention};

/// States of one pipeline run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineStage {
    Init,
    UpstreamCloned,
    PatchIsolated,
    DownstreamCloned,
    BranchSelected,
    SourcesMaterialized,
    WorkspaceAssembled,
    ImageBuilt,
    ContainerRun,
    ResultExtracted,
    Done,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 11] = [
        PipelineStage::Init,
        PipelineStage::UpstreamCloned,
        PipelineStage::PatchIsolated,
        PipelineStage::DownstreamCloned,
        PipelineStage::BranchSelected,
        PipelineStage::SourcesMaterialized,
        PipelineStage::WorkspaceAssembled,
        PipelineStage::ImageBuilt,
        PipelineStage::ContainerRun,
        PipelineStage::ResultExtracted,
        PipelineStage::Done,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PipelineStage::Init => "init",
            PipelineStage::UpstreamCloned => "upstream_cloned",
            PipelineStage::PatchIsolated => "patch_isolated",
            PipelineStage::DownstreamCloned => "downstream_cloned",
            PipelineStage::BranchSelected => "branch_selected",
            PipelineStage::SourcesMaterialized => "sources_materialized",
            PipelineStage::WorkspaceAssembled => "workspace_assembled",
            PipelineStage::ImageBuilt => "image_built",
            PipelineStage::ContainerRun => "container_run",
            PipelineStage::ResultExtracted => "result_extracted",
            PipelineStage::Done => "done",
        }
    }

    /// The state after this one, `None` for `Done`.
    pub fn next(self) -> Option<PipelineStage> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(idx + 1).copied()
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Knobs for one pipeline run beyond the request itself.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Packaging client used for `clone` and `sources`.
    pub packaging_client: String,

    /// Extension identifying the source archive after `sources`.
    pub archive_extension: String,

    pub engine: ContainerEngine,

    pub build_commands: BuildCommands,

    /// Porting tool base image; the config's value is used when `None`.
    pub base_image: Option<String>,

    pub recipe: BuildRecipe,

    /// Create workspaces under this directory instead of the system temp dir.
    pub workspace_parent: Option<PathBuf>,

    pub retention: WorkspaceRetention,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            packaging_client: DEFAULT_PACKAGING_CLIENT.to_string(),
            archive_extension: DEFAULT_ARCHIVE_EXTENSION.to_string(),
            engine: ContainerEngine::default(),
            build_commands: BuildCommands::default(),
            base_image: None,
            recipe: BuildRecipe::bundled(),
            workspace_parent: None,
            retention: WorkspaceRetention::default(),
        }
    }
}

/// A completed run.
#[derive(Debug, Clone)]
pub struct BackportOutcome {
    pub result: PortingResult,

    /// Workspace path when the retention policy kept it.
    pub workspace: Option<PathBuf>,
}

/// Terminal failure of a run.
#[derive(Debug)]
pub struct PipelineFailure {
    /// Last state the pipeline reached before failing.
    pub reached: PipelineStage,

    pub error: BackportError,

    /// Workspace path when the retention policy kept it.
    pub workspace: Option<PathBuf>,
}

impl PipelineFailure {
    /// The state the failing stage was trying to reach.
    pub fn failed_stage(&self) -> PipelineStage {
        self.reached.next().unwrap_or(PipelineStage::Done)
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "backport failed before {} ({}): {}",
            self.failed_stage(),
            self.error.kind(),
            self.error
        )
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Sequences the pipeline stages over one workspace per run.
pub struct PipelineOrchestrator {
    runner: Arc<dyn CommandRunner>,
    settings: PipelineSettings,
}

impl PipelineOrchestrator {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: PipelineSettings) -> Self {
        Self { runner, settings }
    }

    /// Run the full pipeline for `request`.
    ///
    /// Build and run output is forwarded to `sink` as it is produced.
    pub async fn run(
        &self,
        request: &BackportRequest,
        sink: &mut LineSink<'_>,
    ) -> Result<BackportOutcome, PipelineFailure> {
        let span = obs::run_span(request.commit(), request.branch());
        self.run_in_span(request, sink).instrument(span).await
    }

    async fn run_in_span(
        &self,
        request: &BackportRequest,
        sink: &mut LineSink<'_>,
    ) -> Result<BackportOutcome, PipelineFailure> {
        let started = Instant::now();
        let mut reached = PipelineStage::Init;

        let workspace = Workspace::create(self.settings.workspace_parent.as_deref()).map_err(|error| {
            obs::emit_pipeline_failed(PipelineStage::UpstreamCloned, error.kind(), &error);
            PipelineFailure {
                reached,
                error,
                workspace: None,
            }
        })?;
        info!(workspace = %workspace.root().display(), "created workspace");

        let result = self.execute(request, &workspace, &mut reached, sink).await;
        let kept = self.finish_workspace(workspace, result.is_ok());

        match result {
            Ok(result) => {
                obs::emit_pipeline_finished(
                    started.elapsed().as_millis() as u64,
                    result.patch.len(),
                );
                Ok(BackportOutcome {
                    result,
                    workspace: kept,
                })
            }
            Err(error) => {
                let failure = PipelineFailure {
                    reached,
                    error,
                    workspace: kept,
                };
                obs::emit_pipeline_failed(failure.failed_stage(), failure.error.kind(), &failure.error);
                Err(failure)
            }
        }
    }

    async fn execute(
        &self,
        request: &BackportRequest,
        workspace: &Workspace,
        reached: &mut PipelineStage,
        sink: &mut LineSink<'_>,
    ) -> BackportResult<PortingResult> {
        let settings = &self.settings;
        let upstream = SourceRepository::new(Arc::clone(&self.runner));
        let distgit = DistributionRepository::new(Arc::clone(&self.runner))
            .with_packaging_client(settings.packaging_client.as_str())
            .with_archive_extension(settings.archive_extension.as_str());
        let porting = PortingToolRunner::new(Arc::clone(&self.runner))
            .with_engine(settings.engine.clone())
            .with_base_image(
                settings
                    .base_image
                    .as_deref()
                    .unwrap_or(DEFAULT_FIXMORPH_BASE_IMAGE),
            )
            .with_build_commands(settings.build_commands.clone());

        let upstream_dir = advance(
            reached,
            PipelineStage::UpstreamCloned,
            upstream.acquire(request.upstream_url(), workspace),
        )
        .await?;

        let patch = advance(
            reached,
            PipelineStage::PatchIsolated,
            upstream.isolate_patch(&upstream_dir, request.commit()),
        )
        .await?;

        let distgit_dir = advance(
            reached,
            PipelineStage::DownstreamCloned,
            distgit.acquire(request.distgit_url(), workspace),
        )
        .await?;

        advance(
            reached,
            PipelineStage::BranchSelected,
            distgit.select_branch(&distgit_dir, request.branch()),
        )
        .await?;

        let source_tree = advance(
            reached,
            PipelineStage::SourcesMaterialized,
            distgit.materialize_sources(&distgit_dir),
        )
        .await?;

        advance(reached, PipelineStage::WorkspaceAssembled, async {
            WorkspaceAssembler::assemble(workspace, &patch, &source_tree, &settings.recipe)
        })
        .await?;

        let tag = advance(
            reached,
            PipelineStage::ImageBuilt,
            porting.build_image(workspace, request.short_commit(), request.package_name(), &mut *sink),
        )
        .await?;

        advance(
            reached,
            PipelineStage::ContainerRun,
            porting.run(&tag, &mut *sink),
        )
        .await?;

        let result = advance(
            reached,
            PipelineStage::ResultExtracted,
            porting.extract_result(&tag, workspace),
        )
        .await?;

        *reached = PipelineStage::Done;
        Ok(result)
    }

    fn finish_workspace(&self, workspace: Workspace, succeeded: bool) -> Option<PathBuf> {
        if self.settings.retention.keeps(succeeded) {
            let path = workspace.retain();
            info!(workspace = %path.display(), "workspace kept for inspection");
            return Some(path);
        }
        if let Err(e) = workspace.remove() {
            warn!(error = %e, "failed to remove workspace");
        }
        None
    }
}

/// Run one stage and move `reached` to `target` if it succeeds.
async fn advance<T, F>(reached: &mut PipelineStage, target: PipelineStage, stage: F) -> BackportResult<T>
where
    F: Future<Output = BackportResult<T>>,
{
    obs::emit_stage_started(target);
    let started = Instant::now();
    let value = stage.await?;
    *reached = target;
    obs::emit_stage_completed(target, started.elapsed().as_millis() as u64);
    Ok(value)
}

/// Run a backport of `commit` onto `branch` using the stored configuration.
///
/// The configured base image is used unless `settings` already names one.
pub async fn run_backport(
    commit: &str,
    branch: &str,
    config: &BackporterConfig,
    runner: Arc<dyn CommandRunner>,
    mut settings: PipelineSettings,
    sink: &mut LineSink<'_>,
) -> Result<BackportOutcome, PipelineFailure> {
    let request = BackportRequest::from_config(config, commit, branch).map_err(|error| PipelineFailure {
        reached: PipelineStage::Init,
        error,
        workspace: None,
    })?;
    if settings.base_image.is_none() {
        settings.base_image = Some(config.effective_base_image().to_string());
    }
    PipelineOrchestrator::new(runner, settings)
        .run(&request, sink)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert_eq!(PipelineStage::Init.next(), Some(PipelineStage::UpstreamCloned));
        assert_eq!(
            PipelineStage::WorkspaceAssembled.next(),
            Some(PipelineStage::ImageBuilt)
        );
        assert_eq!(PipelineStage::Done.next(), None);
        assert!(PipelineStage::PatchIsolated < PipelineStage::ContainerRun);
    }

    #[test]
    fn test_failure_reports_attempted_stage() {
        let failure = PipelineFailure {
            reached: PipelineStage::WorkspaceAssembled,
            error: BackportError::MissingResult {
                path: PathBuf::from("/ws/output/generated.patch"),
            },
            workspace: None,
        };
        assert_eq!(failure.failed_stage(), PipelineStage::ImageBuilt);
        let msg = failure.to_string();
        assert!(msg.contains("image_built"));
        assert!(msg.contains("missing_result_error"));
    }

    #[test]
    fn test_default_settings() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.packaging_client, "rhpkg");
        assert_eq!(settings.archive_extension, ".tar.gz");
        assert_eq!(settings.engine.program, "docker");
        assert_eq!(settings.retention, WorkspaceRetention::Delete);
        assert!(settings.base_image.is_none());
    }
}
