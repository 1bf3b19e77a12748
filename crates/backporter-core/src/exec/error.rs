//! Error types for the process execution layer.

/// Errors produced while spawning or supervising an external process.
///
/// A non-zero exit is not an `ExecError`; it is reported through
/// [`CommandOutput::exit_code`](super::CommandOutput) and judged by the caller.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` was interrupted by the operator")]
    Interrupted { command: String },
}

/// Result type for process execution.
pub type ExecResult<T> = std::result::Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_error_names_program() {
        let err = ExecError::Spawn {
            program: "rhpkg".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let msg = err.to_string();
        assert!(msg.contains("rhpkg"));
        assert!(msg.contains("not found"));
    }

    #[test]
    fn test_interrupted_error_names_command() {
        let err = ExecError::Interrupted {
            command: "docker build .".to_string(),
        };
        assert!(err.to_string().contains("docker build ."));
    }
}
