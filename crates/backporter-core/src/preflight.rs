//! Host tool checks run before a backport.
//!
//! A missing `git` or container engine otherwise surfaces only as a spawn
//! failure several minutes into a run.

use std::fmt;

use crate::pipeline::PipelineSettings;

/// A required tool and a hint on where it comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredTool {
    pub command: String,
    pub provided_by: String,
}

impl RequiredTool {
    pub fn new(command: impl Into<String>, provided_by: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            provided_by: provided_by.into(),
        }
    }
}

/// One or more required tools are not on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingTools {
    pub missing: Vec<RequiredTool>,
}

impl fmt::Display for MissingTools {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing required host tools:")?;
        for tool in &self.missing {
            write!(f, "\n  {} (install: {})", tool.command, tool.provided_by)?;
        }
        Ok(())
    }
}

impl std::error::Error for MissingTools {}

/// Whether `command` resolves on `PATH`.
pub fn command_exists(command: &str) -> bool {
    which::which(command).is_ok()
}

/// Tools a pipeline run with `settings` will invoke.
pub fn required_tools(settings: &PipelineSettings) -> Vec<RequiredTool> {
    vec![
        RequiredTool::new("git", "git"),
        RequiredTool::new(settings.packaging_client.as_str(), settings.packaging_client.as_str()),
        RequiredTool::new("tar", "tar"),
        RequiredTool::new(settings.engine.program.as_str(), settings.engine.program.as_str()),
    ]
}

/// Check that every tool in `tools` is available.
pub fn check_required_tools(tools: &[RequiredTool]) -> Result<(), MissingTools> {
    let missing: Vec<RequiredTool> = tools
        .iter()
        .filter(|tool| !command_exists(&tool.command))
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(MissingTools { missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists() {
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools_reports_only_missing() {
        let tools = [
            RequiredTool::new("sh", "coreutils"),
            RequiredTool::new("nonexistent_command_xyz", "fake-package"),
        ];
        let err = check_required_tools(&tools).unwrap_err();
        assert_eq!(err.missing.len(), 1);
        assert!(err.to_string().contains("nonexistent_command_xyz (install: fake-package)"));
    }

    #[test]
    fn test_required_tools_follow_settings() {
        let mut settings = PipelineSettings::default();
        settings.packaging_client = "centpkg".to_string();
        settings.engine.program = "podman".to_string();

        let commands: Vec<String> = required_tools(&settings)
            .into_iter()
            .map(|t| t.command)
            .collect();
        assert_eq!(commands, vec!["git", "centpkg", "tar", "podman"]);
    }
}
