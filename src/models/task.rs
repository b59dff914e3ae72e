use std::fmt;
use std::io;

use crate::error::{Result, TranscodeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Created,
    Running,
    Completed,
    Faulted,
    Aborted,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Faulted | TaskStatus::Aborted
        )
    }
}

/// Which end of a pump an I/O fault happened on.
///
/// `Pipe` is the end facing the child process, `Caller` is the source or sink
/// handed in by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultSide {
    Pipe,
    Caller,
}

impl fmt::Display for FaultSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultSide::Pipe => f.write_str("pipe"),
            FaultSide::Caller => f.write_str("non-pipe"),
        }
    }
}

/// The single result recorded for a finished task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Success {
        exit_code: i32,
    },
    Failed {
        exit_code: i32,
        message: String,
    },
    Aborted,
    StreamFault {
        side: FaultSide,
        kind: io::ErrorKind,
        message: String,
    },
}

impl ProcessOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            ProcessOutcome::Success { .. } => TaskStatus::Completed,
            ProcessOutcome::Failed { .. } | ProcessOutcome::StreamFault { .. } => {
                TaskStatus::Faulted
            }
            ProcessOutcome::Aborted => TaskStatus::Aborted,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Success { .. })
    }

    /// Rebuilds the error a finished task reported, so repeated waits agree.
    pub fn to_result(&self) -> Result<()> {
        match self {
            ProcessOutcome::Success { .. } => Ok(()),
            ProcessOutcome::Failed { exit_code, message } => Err(TranscodeError::ProcessFailed {
                exit_code: *exit_code,
                message: message.clone(),
            }),
            ProcessOutcome::Aborted => Err(TranscodeError::Aborted),
            ProcessOutcome::StreamFault {
                side,
                kind,
                message,
            } => Err(TranscodeError::StreamFault {
                side: *side,
                source: io::Error::new(*kind, message.clone()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_status_mapping() {
        assert_eq!(
            ProcessOutcome::Success { exit_code: 0 }.status(),
            TaskStatus::Completed
        );
        assert_eq!(ProcessOutcome::Aborted.status(), TaskStatus::Aborted);
        let failed = ProcessOutcome::Failed {
            exit_code: 1,
            message: "boom".to_string(),
        };
        assert_eq!(failed.status(), TaskStatus::Faulted);
        assert!(failed.status().is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn replayed_fault_keeps_side_and_kind() {
        let outcome = ProcessOutcome::StreamFault {
            side: FaultSide::Caller,
            kind: io::ErrorKind::BrokenPipe,
            message: "source closed".to_string(),
        };
        match outcome.to_result() {
            Err(TranscodeError::StreamFault { side, source }) => {
                assert_eq!(side, FaultSide::Caller);
                assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn replayed_failure_displays_exit_code() {
        let outcome = ProcessOutcome::Failed {
            exit_code: 1,
            message: "boom".to_string(),
        };
        let err = outcome.to_result().unwrap_err();
        assert_eq!(err.to_string(), "boom (exit code: 1)");
        assert_eq!(err.exit_code(), Some(1));
    }
}
