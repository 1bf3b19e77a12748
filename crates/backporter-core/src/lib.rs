//! Backporter Core Library
//!
//! Backports a single upstream commit into a distgit packaging repository:
//! isolate the commit's patch, materialise the packaged source tree for the
//! target branch, and run a containerised porting tool that adapts the patch
//! to that tree.

pub mod assembler;
pub mod config;
pub mod distgit;
pub mod error;
pub mod exec;
pub mod fakes;
pub mod obs;
pub mod pipeline;
pub mod porting;
pub mod preflight;
pub mod request;
pub mod source_repo;
pub mod telemetry;
pub mod workspace;

pub use assembler::{AssembledWorkspace, BuildRecipe, WorkspaceAssembler};
pub use config::{
    BackporterConfig, ConfigError, ConfigField, ConfigResult, DEFAULT_CONFIG,
    DEFAULT_FIXMORPH_BASE_IMAGE,
};
pub use distgit::{locate_archive, DistributionRepository};
pub use error::{BackportError, BackportResult, CommandFailure};
pub use exec::{
    CommandOutput, CommandRunner, CommandSpec, ExecError, ExecResult, LineSink, OutputLine,
    OutputLines, StreamSource, SystemRunner,
};
pub use pipeline::{
    run_backport, BackportOutcome, PipelineFailure, PipelineOrchestrator, PipelineSettings,
    PipelineStage,
};
pub use porting::{BuildCommands, ContainerEngine, PortingResult, PortingToolRunner, StageCommands};
pub use preflight::{check_required_tools, required_tools, MissingTools, RequiredTool};
pub use request::BackportRequest;
pub use source_repo::SourceRepository;
pub use workspace::{Workspace, WorkspaceRetention};
