//! The per-run staging directory.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{BackportError, BackportResult};

/// Upstream clone, relative to the workspace root.
pub const UPSTREAM_DIR: &str = "upstream";
/// Distgit clone, relative to the workspace root.
pub const DISTGIT_DIR: &str = "distgit";
/// Upstream patch file written by the assembler.
pub const PATCH_FILE: &str = "upstream.patch";
/// Stable name the extracted downstream tree is moved to.
pub const SOURCE_TREE_DIR: &str = "source";
/// Where the container result is copied to.
pub const OUTPUT_DIR: &str = "output";

/// What happens to the workspace when a run ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkspaceRetention {
    /// Always delete.
    #[default]
    Delete,
    /// Keep it for inspection only when the run failed.
    KeepOnFailure,
    /// Never delete.
    Keep,
}

impl WorkspaceRetention {
    pub fn keeps(self, succeeded: bool) -> bool {
        match self {
            WorkspaceRetention::Delete => false,
            WorkspaceRetention::KeepOnFailure => !succeeded,
            WorkspaceRetention::Keep => true,
        }
    }
}

/// A directory exclusively owned by one pipeline run.
///
/// Every stage resolves its paths from here; nothing is relative to the
/// process working directory. Dropping a `Workspace` deletes it.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh workspace under the system temp dir, or under `parent`
    /// when given.
    pub fn create(parent: Option<&Path>) -> BackportResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("backporter-");
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(BackportError::workspace(parent))?;
                builder
                    .tempdir_in(parent)
                    .map_err(BackportError::workspace(parent))?
            }
            None => builder
                .tempdir()
                .map_err(BackportError::workspace(std::env::temp_dir()))?,
        };
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn upstream_dir(&self) -> PathBuf {
        self.root().join(UPSTREAM_DIR)
    }

    pub fn distgit_dir(&self) -> PathBuf {
        self.root().join(DISTGIT_DIR)
    }

    pub fn patch_file(&self) -> PathBuf {
        self.root().join(PATCH_FILE)
    }

    pub fn source_tree_dir(&self) -> PathBuf {
        self.root().join(SOURCE_TREE_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root().join(OUTPUT_DIR)
    }

    /// Detach the directory from automatic cleanup and return its path.
    pub fn retain(self) -> PathBuf {
        self.dir.keep()
    }

    /// Delete the workspace now, reporting failures instead of ignoring them.
    pub fn remove(self) -> BackportResult<()> {
        let path = self.root().to_path_buf();
        self.dir.close().map_err(BackportError::workspace(path))
    }
}
