//! Error taxonomy for the backport pipeline.
//!
//! Each stage has its own variant so an operator can tell which external
//! dependency broke. Variants backed by a subprocess carry the full
//! [`CommandFailure`] (command line, exit code, stdout, stderr).

use std::fmt;
use std::path::PathBuf;

use crate::exec::{CommandOutput, CommandSpec, ExecError};

/// A subprocess that ran but did not do what the stage needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub command: String,
    pub output: CommandOutput,
}

impl CommandFailure {
    pub fn new(spec: &CommandSpec, output: CommandOutput) -> Self {
        Self {
            command: spec.to_string(),
            output,
        }
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}` exited with code {}",
            self.command, self.output.exit_code
        )?;
        let stdout = self.output.stdout.trim_end();
        if !stdout.is_empty() {
            write!(f, "\n--- stdout ---\n{stdout}")?;
        }
        let stderr = self.output.stderr.trim_end();
        if !stderr.is_empty() {
            write!(f, "\n--- stderr ---\n{stderr}")?;
        }
        Ok(())
    }
}

/// Errors produced by the backport pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum BackportError {
    #[error("invalid backport request: {0}")]
    InvalidRequest(String),

    #[error("failed to clone {url}: {failure}")]
    Clone { url: String, failure: CommandFailure },

    #[error("failed to check out {rev}: {failure}")]
    Checkout { rev: String, failure: CommandFailure },

    #[error("commit {commit} introduces no changes against its parent")]
    EmptyPatch { commit: String },

    #[error("branch {branch} not found: {failure}")]
    BranchNotFound {
        branch: String,
        failure: CommandFailure,
    },

    #[error("failed to fetch package sources: {failure}")]
    SourcesFetch { failure: CommandFailure },

    #[error("no *{extension} archive found in {}", dir.display())]
    ArchiveNotFound { dir: PathBuf, extension: String },

    #[error("{} candidate archives in {}: {}", candidates.len(), dir.display(), candidates.join(", "))]
    AmbiguousArchive {
        dir: PathBuf,
        candidates: Vec<String>,
    },

    #[error("failed to extract {}: {reason}", archive.display())]
    ArchiveExtraction { archive: PathBuf, reason: String },

    #[error("container image build for {tag} failed: {failure}")]
    ImageBuild { tag: String, failure: CommandFailure },

    #[error("container run for {tag} failed: {failure}")]
    ContainerRun { tag: String, failure: CommandFailure },

    #[error("failed to copy result out of container {container}: {failure}")]
    ArtifactExtraction {
        container: String,
        failure: CommandFailure,
    },

    #[error("porting tool produced no result at {}", path.display())]
    MissingResult { path: PathBuf },

    #[error("workspace i/o error at {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl BackportError {
    /// Stable label for logs and operator output.
    pub fn kind(&self) -> &'static str {
        match self {
            BackportError::InvalidRequest(_) => "invalid_request",
            BackportError::Clone { .. } => "clone_error",
            BackportError::Checkout { .. } => "checkout_error",
            BackportError::EmptyPatch { .. } => "empty_patch_error",
            BackportError::BranchNotFound { .. } => "branch_not_found_error",
            BackportError::SourcesFetch { .. } => "sources_fetch_error",
            BackportError::ArchiveNotFound { .. } => "archive_not_found_error",
            BackportError::AmbiguousArchive { .. } => "ambiguous_archive_error",
            BackportError::ArchiveExtraction { .. } => "archive_extraction_error",
            BackportError::ImageBuild { .. } => "image_build_error",
            BackportError::ContainerRun { .. } => "container_run_error",
            BackportError::ArtifactExtraction { .. } => "artifact_extraction_error",
            BackportError::MissingResult { .. } => "missing_result_error",
            BackportError::Workspace { .. } => "workspace_error",
            BackportError::Exec(ExecError::Interrupted { .. }) => "interrupted",
            BackportError::Exec(_) => "exec_error",
        }
    }

    pub(crate) fn workspace(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| BackportError::Workspace { path, source }
    }
}

/// Result type for pipeline operations.
pub type BackportResult<T> = std::result::Result<T, BackportError>;
