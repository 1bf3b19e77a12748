//! External process execution.
//!
//! Every call to `git`, the packaging client, `tar` or the container engine
//! goes through a [`CommandRunner`] and comes back as a [`CommandOutput`].
//! Callers decide success from the exit code and captured streams only.

pub mod error;
pub mod system;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

pub use error::{ExecError, ExecResult};
pub use system::{OutputLine, OutputLines, StreamSource, SystemRunner};

/// A single external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,

    /// Arguments, not including the program.
    pub args: Vec<String>,

    /// Working directory. `None` inherits the runner's own, so only commands
    /// whose arguments are all absolute paths may leave it unset.
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a path argument.
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Whether `program` matches and `args` begins with `prefix`.
    pub fn matches(&self, program: &str, prefix: &[&str]) -> bool {
        self.program == program
            && self.args.len() >= prefix.len()
            && self.args.iter().zip(prefix).all(|(a, p)| a == p)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Normalised result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (-1 when the process was killed by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Receives output lines as a command produces them.
///
/// Declared outside `#[async_trait]` so the line borrow stays higher-ranked.
pub type LineSink<'a> = dyn FnMut(&str) + Send + 'a;

/// Runs external commands.
///
/// `capture` collects output silently; `stream` additionally hands every
/// output line to `sink` as soon as it is read. Implementations must honour
/// operator interruption in both.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion and collect its output.
    async fn capture(&self, spec: &CommandSpec) -> ExecResult<CommandOutput>;

    /// Run `spec`, forwarding each line of combined output to `sink`.
    async fn stream(&self, spec: &CommandSpec, sink: &mut LineSink<'_>) -> ExecResult<CommandOutput>;

    /// Run a short cleanup command (e.g. removing a container).
    ///
    /// Unlike `capture`, this still runs after an operator interrupt.
    async fn cleanup(&self, spec: &CommandSpec) -> ExecResult<CommandOutput> {
        self.capture(spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_display_quotes_whitespace() {
        let spec = CommandSpec::new("docker")
            .args(["build", "--build-arg"])
            .arg("BUILD_COMMAND_A=make -j4");
        assert_eq!(
            spec.to_string(),
            "docker build --build-arg 'BUILD_COMMAND_A=make -j4'"
        );
    }

    #[test]
    fn test_command_spec_matches_prefix() {
        let spec = CommandSpec::new("git").args(["diff", "abc~1", "abc"]);
        assert!(spec.matches("git", &["diff"]));
        assert!(spec.matches("git", &[]));
        assert!(!spec.matches("git", &["checkout"]));
        assert!(!spec.matches("rhpkg", &["diff"]));
    }

    #[test]
    fn test_command_output_success() {
        let ok = CommandOutput::default();
        assert!(ok.success());
        let failed = CommandOutput {
            exit_code: 1,
            ..Default::default()
        };
        assert!(!failed.success());
    }

    #[tokio::test]
    async fn test_stream_through_trait_object_with_borrowing_sink() {
        let runner: std::sync::Arc<dyn CommandRunner> =
            std::sync::Arc::new(crate::fakes::ScriptedRunner::new().on(
                "echo",
                &[],
                crate::fakes::ScriptedResponse::ok("a\nb\n"),
            ));
        let mut seen = Vec::new();
        let mut sink = |line: &str| seen.push(line.to_owned());
        runner
            .stream(&CommandSpec::new("echo"), &mut sink)
            .await
            .unwrap();
        assert_eq!(seen, ["a", "b"]);
    }
}
