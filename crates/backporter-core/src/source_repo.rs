//! Upstream repository: clone, isolate the target commit's patch, and leave
//! the tree at the commit's parent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{BackportError, BackportResult, CommandFailure};
use crate::exec::{CommandRunner, CommandSpec};
use crate::workspace::Workspace;

/// The upstream git repository a fix is taken from.
pub struct SourceRepository {
    runner: Arc<dyn CommandRunner>,
}

impl SourceRepository {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Clone `url` into the workspace and return the clone's path.
    pub async fn acquire(&self, url: &str, workspace: &Workspace) -> BackportResult<PathBuf> {
        let dest = workspace.upstream_dir();
        let spec = CommandSpec::new("git")
            .arg("clone")
            .arg(url)
            .path_arg(&dest)
            .current_dir(workspace.root());

        info!(url = %url, dest = %dest.display(), "cloning upstream repository");
        let output = self.runner.capture(&spec).await?;
        if !output.success() {
            return Err(BackportError::Clone {
                url: url.to_string(),
                failure: CommandFailure::new(&spec, output),
            });
        }
        Ok(dest)
    }

    /// Diff `commit` against its first parent, then hard-reset the clone to
    /// that parent so the tree shows the code before the change.
    pub async fn isolate_patch(&self, repo: &Path, commit: &str) -> BackportResult<String> {
        let parent = format!("{commit}~1");

        self.git(repo, &["checkout", "--quiet", commit], commit)
            .await?;

        let diff = self.git(repo, &["diff", parent.as_str(), commit], &parent).await?;
        if diff.trim().is_empty() {
            return Err(BackportError::EmptyPatch {
                commit: commit.to_string(),
            });
        }

        self.git(repo, &["reset", "--hard", "--quiet", parent.as_str()], &parent)
            .await?;

        info!(
            commit = %commit,
            patch_bytes = diff.len(),
            "isolated upstream patch"
        );
        Ok(diff)
    }

    /// Run git in `repo`; a non-zero exit is a checkout failure for `rev`.
    async fn git(&self, repo: &Path, args: &[&str], rev: &str) -> BackportResult<String> {
        let spec = CommandSpec::new("git")
            .args(args.iter().copied())
            .current_dir(repo);
        debug!(command = %spec, "running git");
        let output = self.runner.capture(&spec).await?;
        if !output.success() {
            return Err(BackportError::Checkout {
                rev: rev.to_string(),
                failure: CommandFailure::new(&spec, output),
            });
        }
        Ok(output.stdout)
    }
}
