use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Result, TranscodeError};
use crate::manager::observers::TaskObservers;
use crate::manager::progress_tracker::ProgressTracker;
use crate::models::progress::ProgressSnapshot;
use crate::models::task::{ProcessOutcome, TaskStatus};
use crate::process::host::{lock, ProcessHost, SpawnConfig, EXIT_CODE_ABORTED};
use crate::worker::pump::{
    retire, spawn_input_pump, spawn_output_pump, AbortHandle, PumpContext, PumpToken,
    RecordedFault,
};

const EXIT_CODE_TIMEOUT: i32 = -2;

/// How long a failed write waits for the child to be reaped.
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Fields written by the diagnostics drain thread.
struct DiagnosticState {
    last_line: Option<String>,
    tracker: ProgressTracker,
}

/// One streaming conversion: a child process, its two pumps and its diagnostics.
///
/// The task moves `Created -> Running -> {Completed | Faulted | Aborted}` and never
/// leaves a terminal state. [`wait`](Self::wait) is where exit code, stream faults
/// and aborts are reconciled into a single [`ProcessOutcome`].
pub struct LiveConversionTask {
    spawn: SpawnConfig,
    execution_timeout: Option<Duration>,
    input: Option<Box<dyn Read + Send>>,
    output: Option<Box<dyn Write + Send>>,
    has_input: bool,
    observers: TaskObservers,
    seek: Option<Duration>,
    max_duration: Option<Duration>,
    diagnostics: Arc<Mutex<DiagnosticState>>,
    fault: Arc<Mutex<Option<RecordedFault>>>,
    bytes_written: Arc<AtomicU64>,
    input_generation: Arc<AtomicU64>,
    output_generation: Arc<AtomicU64>,
    host: Option<ProcessHost>,
    abort_handle: Option<AbortHandle>,
    input_pump: Option<JoinHandle<()>>,
    output_pump: Option<JoinHandle<()>>,
    aborted: bool,
    status: TaskStatus,
    outcome: Option<ProcessOutcome>,
}

impl LiveConversionTask {
    pub fn new(spawn: SpawnConfig) -> Self {
        Self {
            spawn,
            execution_timeout: None,
            input: None,
            output: None,
            has_input: false,
            observers: TaskObservers::new(),
            seek: None,
            max_duration: None,
            diagnostics: Arc::new(Mutex::new(DiagnosticState {
                last_line: None,
                tracker: ProgressTracker::disabled(),
            })),
            fault: Arc::new(Mutex::new(None)),
            bytes_written: Arc::new(AtomicU64::new(0)),
            input_generation: Arc::new(AtomicU64::new(0)),
            output_generation: Arc::new(AtomicU64::new(0)),
            host: None,
            abort_handle: None,
            input_pump: None,
            output_pump: None,
            aborted: false,
            status: TaskStatus::Created,
            outcome: None,
        }
    }

    pub fn with_input(mut self, source: impl Read + Send + 'static) -> Self {
        self.input = Some(Box::new(source));
        self.has_input = true;
        self
    }

    pub fn with_output(mut self, sink: impl Write + Send + 'static) -> Self {
        self.output = Some(Box::new(sink));
        self
    }

    pub fn with_observers(mut self, observers: TaskObservers) -> Self {
        self.observers = observers;
        self.rebuild_tracker();
        self
    }

    /// Seek offset and duration cap used to correct the declared media length.
    pub fn with_progress_window(
        mut self,
        seek: Option<Duration>,
        max_duration: Option<Duration>,
    ) -> Self {
        self.seek = seek;
        self.max_duration = max_duration;
        self.rebuild_tracker();
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.execution_timeout = timeout;
        self
    }

    fn rebuild_tracker(&mut self) {
        let tracker = ProgressTracker::new(self.observers.progress_callback())
            .with_seek(self.seek)
            .with_max_duration(self.max_duration);
        lock(&self.diagnostics).tracker = tracker;
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn outcome(&self) -> Option<&ProcessOutcome> {
        self.outcome.as_ref()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }

    pub fn last_diagnostic_line(&self) -> Option<String> {
        lock(&self.diagnostics).last_line.clone()
    }

    pub fn last_progress(&self) -> Option<ProgressSnapshot> {
        lock(&self.diagnostics).tracker.last_snapshot()
    }

    pub fn pid(&self) -> Option<u32> {
        self.host.as_ref().map(|host| host.control().pid())
    }

    pub fn has_exited(&self) -> bool {
        match &self.host {
            Some(host) => host.has_exited(),
            None => self.status.is_terminal(),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.status != TaskStatus::Created {
            return Err(TranscodeError::AlreadyRunning);
        }

        *lock(&self.fault) = None;
        {
            let mut state = lock(&self.diagnostics);
            state.last_line = None;
            state.tracker.reset();
        }

        let diagnostics = Arc::clone(&self.diagnostics);
        let observers = self.observers.clone();
        let mut host = ProcessHost::spawn(&self.spawn, move |line| {
            {
                let mut state = lock(&diagnostics);
                state.tracker.parse_line(&line);
                state.last_line = Some(line.clone());
            }
            observers.log(&line);
        })?;

        let control = host.control();
        let abort_handle = AbortHandle::new(
            control.clone(),
            Arc::clone(&self.input_generation),
            Arc::clone(&self.output_generation),
        );
        let context = PumpContext {
            fault: Arc::clone(&self.fault),
            abort: abort_handle.clone(),
        };

        if let Some(source) = self.input.take() {
            self.input_pump = Some(spawn_input_pump(
                source,
                host.input(),
                PumpToken::new(&self.input_generation),
                Arc::clone(&self.bytes_written),
                context.clone(),
            ));
        }
        if let Some(sink) = self.output.take() {
            if let Some(stdout) = host.take_output() {
                self.output_pump = Some(spawn_output_pump(
                    stdout,
                    sink,
                    PumpToken::new(&self.output_generation),
                    control,
                    self.observers.clone(),
                    context,
                ));
            }
        }

        info!(
            "Live conversion started (pid {}, input pump: {}, output pump: {}).",
            host.control().pid(),
            self.input_pump.is_some(),
            self.output_pump.is_some()
        );
        self.host = Some(host);
        self.abort_handle = Some(abort_handle);
        self.status = TaskStatus::Running;
        Ok(())
    }

    /// Feeds bytes to the child directly, for callers without an input source.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        if self.status == TaskStatus::Created {
            return Err(TranscodeError::NotStarted);
        }
        let Some(host) = self.host.as_mut() else {
            let exit_code = match &self.outcome {
                Some(ProcessOutcome::Success { .. }) | None => 0,
                Some(ProcessOutcome::Failed { exit_code, .. }) => *exit_code,
                Some(_) => EXIT_CODE_ABORTED,
            };
            return Err(exited_error(exit_code, None));
        };

        if host.has_exited() {
            host.wait_for_exit(None);
            let exit_code = host.exit_code().unwrap_or(EXIT_CODE_ABORTED);
            let last_line = lock(&self.diagnostics).last_line.clone();
            return Err(exited_error(exit_code, last_line));
        }

        if let Err(e) = host.input().write_chunk(buf) {
            // The child may have exited after the check above.
            if host.wait_for_exit(Some(EXIT_GRACE)) {
                let exit_code = host.exit_code().unwrap_or(EXIT_CODE_ABORTED);
                let last_line = lock(&self.diagnostics).last_line.clone();
                return Err(exited_error(exit_code, last_line));
            }
            return Err(e.into());
        }
        self.bytes_written
            .fetch_add(buf.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    /// Ends the conversion and waits for it.
    ///
    /// Without `force` the child's input is closed so it can flush and finish.
    /// With `force`, a child that never received input gets the interactive `q`
    /// command; any other child is aborted.
    pub fn stop(&mut self, force: bool) -> Result<()> {
        if self.status == TaskStatus::Created {
            return Err(TranscodeError::NotStarted);
        }
        if let Some(host) = &self.host {
            retire(&self.input_generation);
            let input = host.input();
            if !force {
                input.close();
            } else if !self.has_input && self.bytes_written() == 0 {
                if let Err(e) = input.write_chunk(b"q\n") {
                    debug!("Could not send quit command: {}", e);
                }
                input.close();
            } else {
                self.abort();
            }
        }
        self.wait()
    }

    pub fn wait(&mut self) -> Result<()> {
        if let Some(outcome) = &self.outcome {
            return outcome.to_result();
        }
        let Some(mut host) = self.host.take() else {
            return Err(TranscodeError::NotStarted);
        };

        if !host.wait_for_exit(self.execution_timeout) {
            let timeout = self.execution_timeout.unwrap_or_default();
            warn!(
                "Process {} exceeded execution timeout {:?}, killing it.",
                host.control().pid(),
                timeout
            );
            self.retire_pumps();
            host.kill();
            host.wait_for_exit(None);
            self.join_pumps();
            host.close();
            self.finish(ProcessOutcome::Failed {
                exit_code: EXIT_CODE_TIMEOUT,
                message: "execution timeout exceeded".to_string(),
            });
            return Err(TranscodeError::ExecutionTimeout { timeout });
        }

        // The output pump drains whatever the child wrote before exiting.
        self.join_pumps();
        host.join_diagnostics();
        let exit_code = host.exit_code().unwrap_or(EXIT_CODE_ABORTED);
        host.close();

        let fault = lock(&self.fault).take();
        let (outcome, result) = if let Some(fault) = fault {
            let outcome = ProcessOutcome::StreamFault {
                side: fault.side,
                kind: fault.error.kind(),
                message: fault.error.to_string(),
            };
            let err = TranscodeError::StreamFault {
                side: fault.side,
                source: fault.error,
            };
            (outcome, Err(err))
        } else if self.aborted {
            (ProcessOutcome::Aborted, Err(TranscodeError::Aborted))
        } else if exit_code != 0 {
            let message = lock(&self.diagnostics)
                .last_line
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());
            let outcome = ProcessOutcome::Failed {
                exit_code,
                message: message.clone(),
            };
            (
                outcome,
                Err(TranscodeError::ProcessFailed { exit_code, message }),
            )
        } else {
            lock(&self.diagnostics).tracker.complete();
            (ProcessOutcome::Success { exit_code }, Ok(()))
        };

        self.finish(outcome);
        result
    }

    /// Kills the child, stops both pumps and reaps the task.
    ///
    /// Safe to call in any state, any number of times. A running task is terminal
    /// when this returns. If the child had already exited on its own, the task
    /// finishes with that exit instead of `Aborted`.
    pub fn abort(&mut self) {
        match self.status {
            TaskStatus::Created => {
                self.input.take();
                self.output.take();
                self.finish(ProcessOutcome::Aborted);
            }
            TaskStatus::Running => {
                if let Some(handle) = &self.abort_handle {
                    if handle.abort() {
                        self.aborted = true;
                    }
                }
                if let Err(e) = self.wait() {
                    debug!("Aborted task finished with: {}", e);
                }
            }
            _ => {}
        }
    }

    fn retire_pumps(&self) {
        retire(&self.input_generation);
        retire(&self.output_generation);
    }

    fn join_pumps(&mut self) {
        if let Some(handle) = self.output_pump.take() {
            if handle.join().is_err() {
                warn!("Output pump panicked.");
            }
        }
        self.retire_pumps();
        if let Some(handle) = self.input_pump.take() {
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!("Input pump panicked.");
                }
            } else {
                // Blocked in a source read that cannot be interrupted.
                debug!("Detaching input pump still blocked on its source.");
            }
        }
    }

    fn finish(&mut self, outcome: ProcessOutcome) {
        info!("Live conversion finished: {:?}", outcome);
        self.status = outcome.status();
        self.outcome = Some(outcome);
        self.abort_handle = None;
    }
}

impl Drop for LiveConversionTask {
    fn drop(&mut self) {
        if self.status == TaskStatus::Running {
            if let Some(handle) = &self.abort_handle {
                handle.abort();
            }
        }
    }
}

fn exited_error(exit_code: i32, last_line: Option<String>) -> TranscodeError {
    if exit_code != 0 {
        TranscodeError::ProcessExited {
            exit_code,
            message: last_line
                .filter(|line| !line.is_empty())
                .unwrap_or_else(|| "process has exited".to_string()),
        }
    } else {
        TranscodeError::ProcessExited {
            exit_code: EXIT_CODE_ABORTED,
            message: "process has exited".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_before_start_is_an_error() {
        let mut task = LiveConversionTask::new(SpawnConfig::new("/bin/true", ""));
        assert!(matches!(task.wait(), Err(TranscodeError::NotStarted)));
        assert!(matches!(task.write(b"x"), Err(TranscodeError::NotStarted)));
        assert_eq!(task.status(), TaskStatus::Created);
    }

    #[test]
    fn abort_before_start_is_terminal() {
        let mut task = LiveConversionTask::new(SpawnConfig::new("/bin/true", ""));
        task.abort();
        task.abort();
        assert_eq!(task.status(), TaskStatus::Aborted);
        assert_eq!(task.outcome(), Some(&ProcessOutcome::Aborted));
        assert!(matches!(task.wait(), Err(TranscodeError::Aborted)));
        assert!(matches!(task.start(), Err(TranscodeError::AlreadyRunning)));
    }

    #[test]
    fn exited_error_uses_last_line_for_failures() {
        match exited_error(1, Some("boom".to_string())) {
            TranscodeError::ProcessExited { exit_code, message } => {
                assert_eq!(exit_code, 1);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        match exited_error(0, Some("done".to_string())) {
            TranscodeError::ProcessExited { exit_code, message } => {
                assert_eq!(exit_code, -1);
                assert_eq!(message, "process has exited");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
