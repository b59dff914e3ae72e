use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver};

use crate::manager::progress_tracker::ProgressCallback;
use crate::models::message::TaskEvent;
use crate::models::progress::ProgressSnapshot;

type LogFn = Arc<dyn Fn(&str) + Send + Sync>;
type ProgressFn = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;
type OutputDataFn = Arc<dyn Fn() + Send + Sync>;

/// Optional callbacks attached to a task when it is built.
///
/// Each slot holds at most one callback. Leaving the progress slot empty
/// turns progress parsing off entirely.
#[derive(Clone, Default)]
pub struct TaskObservers {
    log: Option<LogFn>,
    progress: Option<ProgressFn>,
    output_data: Option<OutputDataFn>,
}

impl TaskObservers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observers that publish every event to the returned receiver.
    pub fn channel() -> (Self, Receiver<TaskEvent>) {
        let (sender, receiver) = unbounded();
        let log_sender = sender.clone();
        let progress_sender = sender.clone();
        let observers = Self::new()
            .on_log(move |line| {
                let _ = log_sender.send(TaskEvent::Log(line.to_string()));
            })
            .on_progress(move |snapshot| {
                let _ = progress_sender.send(TaskEvent::Progress(snapshot));
            })
            .on_output_data(move || {
                let _ = sender.send(TaskEvent::OutputData);
            });
        (observers, receiver)
    }

    pub fn on_log(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.log = Some(Arc::new(callback));
        self
    }

    pub fn on_progress(
        mut self,
        callback: impl Fn(ProgressSnapshot) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn on_output_data(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.output_data = Some(Arc::new(callback));
        self
    }

    pub fn observes_progress(&self) -> bool {
        self.progress.is_some()
    }

    pub(crate) fn progress_callback(&self) -> Option<ProgressCallback> {
        self.progress.clone().map(|callback| -> ProgressCallback {
            Box::new(move |snapshot| callback(snapshot))
        })
    }

    pub(crate) fn log(&self, line: &str) {
        if let Some(callback) = &self.log {
            callback(line);
        }
    }

    pub(crate) fn output_data(&self) {
        if let Some(callback) = &self.output_data {
            callback();
        }
    }
}
