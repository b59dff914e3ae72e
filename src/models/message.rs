use super::progress::ProgressSnapshot;

/// Events published by a running task when observed through a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Log(String),
    Progress(ProgressSnapshot),
    OutputData,
}
