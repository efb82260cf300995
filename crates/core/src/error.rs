use std::path::PathBuf;

/// Result alias that carries the custom [`PlayerError`] type.
pub type Result<T> = std::result::Result<T, PlayerError>;

/// Common error type for the core crate.
///
/// Only startup and configuration problems surface here. Reaching the end of
/// the decoder stream, or losing the pipe mid-stream, ends playback through
/// [`crate::ReadOutcome::End`] instead.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    /// Free-form message for failures that do not warrant their own variant.
    #[error("{0}")]
    Message(String),
    /// The source could not be probed or described a stream we cannot play.
    #[error("invalid or unreadable source `{}`: {reason}", path.display())]
    InvalidSource { path: PathBuf, reason: String },
    /// A required external program is not on `PATH`.
    #[error("`{tool}` was not found on PATH")]
    ToolNotFound { tool: String },
    /// An external program exists but could not be started or piped.
    #[error("failed to spawn `{tool}`: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    /// Rejected user input (palette, size string, frame rate, option mix).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The interrupt handler could not be registered.
    #[error("failed to install interrupt handler: {0}")]
    Interrupt(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration file could not be parsed.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl PlayerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid_source(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    /// Maps a spawn failure, distinguishing a missing binary from other IO
    /// problems.
    pub fn spawn(tool: impl Into<String>, source: std::io::Error) -> Self {
        let tool = tool.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::ToolNotFound { tool }
        } else {
            Self::Spawn { tool, source }
        }
    }
}

impl From<&str> for PlayerError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for PlayerError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
