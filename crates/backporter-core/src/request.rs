//! The immutable input of one backport run.

use crate::config::BackporterConfig;
use crate::error::{BackportError, BackportResult};

/// What to backport, from where, to where.
///
/// All four fields are non-empty; [`BackportRequest::new`] is the only
/// constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackportRequest {
    upstream_url: String,
    distgit_url: String,
    commit: String,
    branch: String,
}

impl BackportRequest {
    pub fn new(
        upstream_url: impl Into<String>,
        distgit_url: impl Into<String>,
        commit: impl Into<String>,
        branch: impl Into<String>,
    ) -> BackportResult<Self> {
        let request = Self {
            upstream_url: upstream_url.into().trim().to_string(),
            distgit_url: distgit_url.into().trim().to_string(),
            commit: commit.into().trim().to_string(),
            branch: branch.into().trim().to_string(),
        };

        let fields = [
            ("upstream repository", &request.upstream_url),
            ("distgit repository", &request.distgit_url),
            ("commit", &request.commit),
            ("branch", &request.branch),
        ];
        for (name, value) in fields {
            if value.is_empty() {
                return Err(BackportError::InvalidRequest(format!(
                    "{name} must not be empty"
                )));
            }
        }

        Ok(request)
    }

    /// Build a request from the stored configuration.
    pub fn from_config(
        config: &BackporterConfig,
        commit: impl Into<String>,
        branch: impl Into<String>,
    ) -> BackportResult<Self> {
        Self::new(&config.upstream_url, &config.distgit_repo, commit, branch)
    }

    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    pub fn distgit_url(&self) -> &str {
        &self.distgit_url
    }

    pub fn commit(&self) -> &str {
        &self.commit
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Package name implied by the distgit location: its last path segment
    /// without a `.git` suffix (`rpms/python` and
    /// `https://src.fedoraproject.org/rpms/etcd.git` give `python` / `etcd`).
    pub fn package_name(&self) -> &str {
        let trimmed = self.distgit_url.trim_end_matches('/');
        let last = trimmed
            .rsplit(['/', ':'])
            .next()
            .unwrap_or(trimmed);
        let name = last.strip_suffix(".git").unwrap_or(last);
        if name.is_empty() {
            trimmed
        } else {
            name
        }
    }

    /// Abbreviated commit for tags and names.
    pub fn short_commit(&self) -> &str {
        let end = self
            .commit
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.commit.len());
        &self.commit[..end]
    }
}
