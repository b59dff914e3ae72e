use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::models::task::FaultSide;

pub type Result<T, E = TranscodeError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Cannot find transcoder executable: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Transcoder process is already started")]
    AlreadyRunning,

    #[error("Transcoder process has not been started")]
    NotStarted,

    /// Manual write attempted after the child terminated.
    #[error("{message} (exit code: {exit_code})")]
    ProcessExited { exit_code: i32, message: String },

    #[error("{message} (exit code: {exit_code})")]
    ProcessFailed { exit_code: i32, message: String },

    #[error("Transcoder process exceeded execution timeout ({timeout:?}) and was aborted")]
    ExecutionTimeout { timeout: Duration },

    #[error("Stream fault on the {side} end: {source}")]
    StreamFault {
        side: FaultSide,
        #[source]
        source: io::Error,
    },

    #[error("Conversion aborted")]
    Aborted,

    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("Failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TranscodeError {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Exit code as seen by the orchestrator: `-1` for aborted, `-2` for timeout.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ProcessExited { exit_code, .. } | Self::ProcessFailed { exit_code, .. } => {
                Some(*exit_code)
            }
            Self::ExecutionTimeout { .. } => Some(-2),
            Self::Aborted => Some(-1),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_minus_two() {
        let err = TranscodeError::ExecutionTimeout {
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.exit_code(), Some(-2));
        assert!(err.to_string().contains("execution timeout"));
    }

    #[test]
    fn not_found_names_the_path() {
        let err = TranscodeError::NotFound {
            path: PathBuf::from("/opt/ffmpeg/ffmpeg"),
        };
        assert_eq!(
            err.to_string(),
            "Cannot find transcoder executable: /opt/ffmpeg/ffmpeg"
        );
        assert_eq!(err.exit_code(), None);
    }

    #[test]
    fn stream_fault_tags_side() {
        let err = TranscodeError::StreamFault {
            side: FaultSide::Pipe,
            source: io::Error::new(io::ErrorKind::BrokenPipe, "closed"),
        };
        assert_eq!(err.to_string(), "Stream fault on the pipe end: closed");
    }
}
