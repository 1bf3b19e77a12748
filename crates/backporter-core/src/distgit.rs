//! Downstream distgit repository: clone, switch branch, and materialise the
//! packaged source tree the patch has to land on.
//!
//! Source archives usually live in a lookaside cache rather than in git, so
//! the packaging client fetches them into the clone. The archive is
//! then found by extension and its extracted directory derived from its
//! file name; neither is known in advance.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::error::{BackportError, BackportResult, CommandFailure};
use crate::exec::{CommandRunner, CommandSpec};
use crate::workspace::Workspace;

/// Packaging client used when none is configured.
pub const DEFAULT_PACKAGING_CLIENT: &str = "rhpkg";

/// Extension identifying the upstream source archive.
pub const DEFAULT_ARCHIVE_EXTENSION: &str = ".tar.gz";

/// The downstream packaging repository a fix is ported into.
pub struct DistributionRepository {
    runner: Arc<dyn CommandRunner>,
    packaging_client: String,
    archive_extension: String,
}

impl DistributionRepository {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            packaging_client: DEFAULT_PACKAGING_CLIENT.to_string(),
            archive_extension: DEFAULT_ARCHIVE_EXTENSION.to_string(),
        }
    }

    /// Use another client speaking the same CLI (e.g. `fedpkg`, `centpkg`).
    pub fn with_packaging_client(mut self, client: impl Into<String>) -> Self {
        self.packaging_client = client.into();
        self
    }

    pub fn with_archive_extension(mut self, extension: impl Into<String>) -> Self {
        self.archive_extension = extension.into();
        self
    }

    /// Anonymously clone `url` into the workspace and return the clone's path.
    pub async fn acquire(&self, url: &str, workspace: &Workspace) -> BackportResult<PathBuf> {
        let dest = workspace.distgit_dir();
        let spec = CommandSpec::new(&self.packaging_client)
            .args(["clone", "--anonymous", url])
            .path_arg(&dest)
            .current_dir(workspace.root());

        info!(url = %url, client = %self.packaging_client, "cloning distgit repository");
        let output = self.runner.capture(&spec).await?;
        if !output.success() {
            return Err(BackportError::Clone {
                url: url.to_string(),
                failure: CommandFailure::new(&spec, output),
            });
        }
        Ok(dest)
    }

    /// Switch the clone's working tree to `branch`.
    pub async fn select_branch(&self, repo: &Path, branch: &str) -> BackportResult<()> {
        let spec = CommandSpec::new("git")
            .args(["checkout", "--quiet", branch])
            .current_dir(repo);

        let output = self.runner.capture(&spec).await?;
        if !output.success() {
            return Err(BackportError::BranchNotFound {
                branch: branch.to_string(),
                failure: CommandFailure::new(&spec, output),
            });
        }
        info!(branch = %branch, "switched distgit branch");
        Ok(())
    }

    /// Fetch the source archive, extract it in place, and return the
    /// extracted tree.
    pub async fn materialize_sources(&self, repo: &Path) -> BackportResult<PathBuf> {
        let fetch = CommandSpec::new(&self.packaging_client)
            .arg("sources")
            .current_dir(repo);
        let output = self.runner.capture(&fetch).await?;
        if !output.success() {
            return Err(BackportError::SourcesFetch {
                failure: CommandFailure::new(&fetch, output),
            });
        }

        let archive = locate_archive(repo, &self.archive_extension)?;
        let tree = repo.join(archive_stem(&archive, &self.archive_extension));

        info!(archive = %archive.display(), "extracting source archive");
        let extract = CommandSpec::new("tar")
            .arg("-xf")
            .path_arg(&archive)
            .arg("-C")
            .path_arg(repo)
            .current_dir(repo);
        let output = self.runner.capture(&extract).await?;
        if !output.success() {
            return Err(BackportError::ArchiveExtraction {
                archive,
                reason: CommandFailure::new(&extract, output).to_string(),
            });
        }

        if !tree.is_dir() {
            return Err(BackportError::ArchiveExtraction {
                reason: format!(
                    "archive did not contain the expected top-level directory {}",
                    tree.display()
                ),
                archive,
            });
        }
        Ok(tree)
    }
}

/// The single regular file in `dir` whose name ends with `extension`.
///
/// No match is [`BackportError::ArchiveNotFound`]; several matches are
/// [`BackportError::AmbiguousArchive`], never an arbitrary pick.
pub fn locate_archive(dir: &Path, extension: &str) -> BackportResult<PathBuf> {
    let entries = std::fs::read_dir(dir).map_err(BackportError::workspace(dir))?;

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(BackportError::workspace(dir))?;
        let is_file = entry
            .file_type()
            .map_err(BackportError::workspace(entry.path()))?
            .is_file();
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_file && name.ends_with(extension) && name.len() > extension.len() {
            candidates.push(name);
        }
    }
    candidates.sort();

    match candidates.len() {
        0 => Err(BackportError::ArchiveNotFound {
            dir: dir.to_path_buf(),
            extension: extension.to_string(),
        }),
        1 => Ok(dir.join(&candidates[0])),
        _ => Err(BackportError::AmbiguousArchive {
            dir: dir.to_path_buf(),
            candidates,
        }),
    }
}

/// Archive file name without `extension`: `mypkg-1.2.3.tar.gz` gives
/// `mypkg-1.2.3`.
pub fn archive_stem(archive: &Path, extension: &str) -> String {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(extension) {
        Some(stem) => stem.to_string(),
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ScriptedResponse, ScriptedRunner};

    #[test]
    fn test_locate_single_archive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mypkg-1.2.3.tar.gz"), b"x").unwrap();
        std::fs::write(dir.path().join("mypkg.spec"), b"Name: mypkg").unwrap();
        std::fs::write(dir.path().join("sources"), b"SHA512 (mypkg-1.2.3.tar.gz)").unwrap();

        let archive = locate_archive(dir.path(), ".tar.gz").unwrap();
        assert_eq!(archive, dir.path().join("mypkg-1.2.3.tar.gz"));
    }

    #[test]
    fn test_locate_no_archive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mypkg.spec"), b"").unwrap();
        let err = locate_archive(dir.path(), ".tar.gz").unwrap_err();
        assert!(matches!(err, BackportError::ArchiveNotFound { .. }));
    }

    #[test]
    fn test_locate_ambiguous_archives() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b-2.0.tar.gz"), b"x").unwrap();
        std::fs::write(dir.path().join("a-1.0.tar.gz"), b"x").unwrap();

        match locate_archive(dir.path(), ".tar.gz").unwrap_err() {
            BackportError::AmbiguousArchive { candidates, .. } => {
                assert_eq!(candidates, vec!["a-1.0.tar.gz", "b-2.0.tar.gz"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_locate_ignores_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("old-0.9.tar.gz")).unwrap();
        std::fs::write(dir.path().join("new-1.0.tar.gz"), b"x").unwrap();
        let archive = locate_archive(dir.path(), ".tar.gz").unwrap();
        assert!(archive.ends_with("new-1.0.tar.gz"));
    }

    #[test]
    fn test_archive_stem() {
        assert_eq!(
            archive_stem(Path::new("/ws/distgit/mypkg-1.2.3.tar.gz"), ".tar.gz"),
            "mypkg-1.2.3"
        );
        assert_eq!(archive_stem(Path::new("x.tgz"), ".tar.gz"), "x.tgz");
    }

    #[tokio::test]
    async fn test_missing_branch_is_branch_not_found() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "git",
            &["checkout"],
            ScriptedResponse::failure(1, "error: pathspec 'rhel-99' did not match"),
        ));
        let repo = DistributionRepository::new(runner);
        let err = repo
            .select_branch(Path::new("/ws/distgit"), "rhel-99")
            .await
            .unwrap_err();
        assert!(matches!(err, BackportError::BranchNotFound { ref branch, .. } if branch == "rhel-99"));
    }

    #[tokio::test]
    async fn test_acquire_uses_configured_client_anonymously() {
        let runner = Arc::new(ScriptedRunner::new().on("fedpkg", &["clone"], ScriptedResponse::ok("")));
        let ws = Workspace::create(None).unwrap();
        let repo = DistributionRepository::new(runner.clone()).with_packaging_client("fedpkg");

        let dest = repo.acquire("rpms/etcd", &ws).await.unwrap();
        assert_eq!(dest, ws.distgit_dir());
        assert!(runner.invoked("fedpkg", &["clone", "--anonymous", "rpms/etcd"]));
    }

    #[tokio::test]
    async fn test_failed_fetch_is_sources_fetch_error() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "rhpkg",
            &["sources"],
            ScriptedResponse::failure(1, "Could not execute sources: lookaside unreachable"),
        ));
        let dir = tempfile::tempdir().unwrap();
        let repo = DistributionRepository::new(runner.clone());

        let err = repo.materialize_sources(dir.path()).await.unwrap_err();
        assert!(matches!(err, BackportError::SourcesFetch { .. }));
        assert!(!runner.invoked("tar", &[]));
    }

    #[tokio::test]
    async fn test_failed_extraction_is_archive_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mypkg-1.2.3.tar.gz"), b"not gzip").unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("rhpkg", &["sources"], ScriptedResponse::ok(""))
                .on("tar", &[], ScriptedResponse::failure(2, "gzip: stdin: not in gzip format")),
        );
        let repo = DistributionRepository::new(runner);

        match repo.materialize_sources(dir.path()).await.unwrap_err() {
            BackportError::ArchiveExtraction { archive, reason } => {
                assert!(archive.ends_with("mypkg-1.2.3.tar.gz"));
                assert!(reason.contains("not in gzip format"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_extraction_without_expected_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mypkg-1.2.3.tar.gz"), b"x").unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("rhpkg", &["sources"], ScriptedResponse::ok(""))
                .on("tar", &[], ScriptedResponse::ok("")),
        );
        let repo = DistributionRepository::new(runner);

        let err = repo.materialize_sources(dir.path()).await.unwrap_err();
        assert!(
            matches!(err, BackportError::ArchiveExtraction { ref reason, .. } if reason.contains("mypkg-1.2.3"))
        );
    }
}
