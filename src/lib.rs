//! Streaming transcoding on top of an external ffmpeg process.
//!
//! A [`LiveConversionTask`] starts the child, pumps bytes into its stdin and out
//! of its stdout on dedicated threads, and turns its diagnostic stream into
//! progress reports. [`Transcoder`] composes ffmpeg command lines and builds
//! tasks from a [`TranscoderConfig`].

pub mod error;
pub mod manager;
pub mod models;
pub mod process;
pub mod worker;

pub use error::{Result, TranscodeError};
pub use manager::live_task::LiveConversionTask;
pub use manager::observers::TaskObservers;
pub use manager::progress_tracker::ProgressTracker;
pub use manager::transcoder::{LiveInput, LiveOutput, Transcoder};
pub use models::config::{ProcessPriority, ProcessUser, TranscoderConfig};
pub use models::message::TaskEvent;
pub use models::progress::ProgressSnapshot;
pub use models::settings::{ConcatSettings, ConvertSettings, MediaInput};
pub use models::task::{FaultSide, ProcessOutcome, TaskStatus};
pub use process::host::{ProcessHost, SpawnConfig};
