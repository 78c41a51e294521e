use thiserror::Error as ThisError;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by logging and subprocess execution.
#[derive(Debug, ThisError)]
pub enum Error {
    /// I/O errors from the terminal or the PTY streams.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Pseudo-terminal allocation or resize errors.
    #[error("PTY error: {0}")]
    Pty(String),

    /// The subprocess could not be started.
    #[error("failed to start subprocess: {0}")]
    Spawn(String),

    /// The subprocess ran but exited with a non-zero status.
    #[error("command exited with status {0}")]
    CommandFailed(u32),

    /// A background task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such pty");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("no such pty"));
    }

    #[test]
    fn command_failed_display() {
        let err = Error::CommandFailed(3);
        assert_eq!(err.to_string(), "command exited with status 3");
    }

    #[test]
    fn spawn_error_display() {
        let err = Error::Spawn("command not found".into());
        assert_eq!(
            err.to_string(),
            "failed to start subprocess: command not found"
        );
    }
}
