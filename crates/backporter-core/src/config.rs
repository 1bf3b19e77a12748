//! Persistent tool configuration.
//!
//! A small YAML document with three keys:
//!
//! ```yaml
//! upstream_url: https://github.com/python/cpython.git
//! distgit_repo: rpms/python3
//! fixmorph_base_image: quay.io/cve-gen-ai/et-fixmorph:latest
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Config file used when none is given.
pub const DEFAULT_CONFIG: &str = "config.yaml";

/// Base image for the porting tool container when the config leaves it unset.
pub const DEFAULT_FIXMORPH_BASE_IMAGE: &str = "quay.io/cve-gen-ai/et-fixmorph:latest";

/// Errors produced by the configuration store.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {} does not exist", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to access config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("unknown config field: {0}")]
    UnknownField(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Stored settings for backport runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackporterConfig {
    /// Upstream repository to backport from.
    pub upstream_url: String,

    /// Downstream distgit repository to backport to.
    pub distgit_repo: String,

    /// Base image for the porting tool container.
    #[serde(default)]
    pub fixmorph_base_image: Option<String>,
}

impl BackporterConfig {
    /// Read the config at `path`.
    pub fn read(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the config to `path`, replacing any existing file.
    pub fn write(&self, path: &Path) -> ConfigResult<()> {
        let yaml = self.to_yaml()?;
        std::fs::write(path, yaml).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        serde_yaml::to_string(self).map_err(ConfigError::Serialize)
    }

    pub fn get(&self, field: ConfigField) -> Option<&str> {
        match field {
            ConfigField::UpstreamUrl => Some(&self.upstream_url),
            ConfigField::DistgitRepo => Some(&self.distgit_repo),
            ConfigField::FixmorphBaseImage => self.fixmorph_base_image.as_deref(),
        }
    }

    /// Replace one field.
    pub fn set(&mut self, field: ConfigField, value: impl Into<String>) {
        let value = value.into();
        match field {
            ConfigField::UpstreamUrl => self.upstream_url = value,
            ConfigField::DistgitRepo => self.distgit_repo = value,
            ConfigField::FixmorphBaseImage => self.fixmorph_base_image = Some(value),
        }
    }

    /// Base image to build the porting container from.
    pub fn effective_base_image(&self) -> &str {
        self.fixmorph_base_image
            .as_deref()
            .filter(|image| !image.trim().is_empty())
            .unwrap_or(DEFAULT_FIXMORPH_BASE_IMAGE)
    }
}

/// The closed set of settable config keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    UpstreamUrl,
    DistgitRepo,
    FixmorphBaseImage,
}

impl ConfigField {
    pub const ALL: [ConfigField; 3] = [
        ConfigField::UpstreamUrl,
        ConfigField::DistgitRepo,
        ConfigField::FixmorphBaseImage,
    ];

    /// Key as stored in the YAML file.
    pub fn key(self) -> &'static str {
        match self {
            ConfigField::UpstreamUrl => "upstream_url",
            ConfigField::DistgitRepo => "distgit_repo",
            ConfigField::FixmorphBaseImage => "fixmorph_base_image",
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ConfigField {
    type Err = ConfigError;

    /// Accepts the YAML key or its dashed form (`upstream-url`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_");
        ConfigField::ALL
            .into_iter()
            .find(|field| field.key() == normalized)
            .ok_or_else(|| ConfigError::UnknownField(s.to_string()))
    }
}
