pub mod live_task;
pub mod observers;
pub mod progress_tracker;
pub mod transcoder;
