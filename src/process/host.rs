use std::io::{self, Write};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};

use crate::error::{Result, TranscodeError};
use crate::models::config::{ProcessPriority, ProcessUser};
use crate::process::args::split_args;
use crate::worker::diagnostics::spawn_diagnostics_drain;

/// Exit code reported when the child could not be waited on or was killed by a signal.
pub const EXIT_CODE_ABORTED: i32 = -1;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Everything needed to start the child, consumed once by [`ProcessHost::spawn`].
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub executable: PathBuf,
    pub args: String,
    pub priority: ProcessPriority,
    pub user: Option<ProcessUser>,
}

impl SpawnConfig {
    pub fn new(executable: impl Into<PathBuf>, args: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: args.into(),
            priority: ProcessPriority::Normal,
            user: None,
        }
    }

    pub fn with_priority(mut self, priority: ProcessPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_user(mut self, user: Option<ProcessUser>) -> Self {
        self.user = user;
        self
    }
}

/// Shared handle to the child's standard input.
///
/// Closing drops the pipe so the child observes end of input.
#[derive(Debug, Clone)]
pub struct InputChannel {
    stdin: Arc<Mutex<Option<ChildStdin>>>,
}

impl InputChannel {
    fn new(stdin: Option<ChildStdin>) -> Self {
        Self {
            stdin: Arc::new(Mutex::new(stdin)),
        }
    }

    pub fn write_chunk(&self, buf: &[u8]) -> io::Result<()> {
        let mut guard = lock(&self.stdin);
        match guard.as_mut() {
            Some(stdin) => {
                stdin.write_all(buf)?;
                stdin.flush()
            }
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "process input is closed",
            )),
        }
    }

    pub fn close(&self) {
        if lock(&self.stdin).take().is_some() {
            debug!("Closed process input.");
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.stdin).is_none()
    }
}

/// Cloneable view of a child used to kill it from any thread.
#[derive(Debug, Clone)]
pub struct ProcessControl {
    pid: u32,
    exited: Arc<AtomicBool>,
}

impl ProcessControl {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Sends SIGKILL. Returns false when the child was already gone.
    pub fn kill(&self) -> bool {
        if self.has_exited() {
            return false;
        }
        let rc = unsafe { libc::kill(self.pid as libc::pid_t, libc::SIGKILL) };
        if rc == 0 {
            info!("Process {} killed.", self.pid);
            return true;
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("Failed to kill process {}: {}", self.pid, err);
        }
        false
    }
}

/// A running child process with its stdin, stdout and stderr redirected.
///
/// Stderr is drained line by line on a dedicated thread from the moment the
/// child starts, and a waiter thread reaps the child and publishes its exit code.
pub struct ProcessHost {
    control: ProcessControl,
    input: InputChannel,
    output: Option<ChildStdout>,
    exit_rx: Receiver<i32>,
    exit_code: Option<i32>,
    waiter: Option<JoinHandle<()>>,
    diagnostics: Option<JoinHandle<()>>,
}

impl ProcessHost {
    pub fn spawn<F>(config: &SpawnConfig, on_line: F) -> Result<Self>
    where
        F: FnMut(String) + Send + 'static,
    {
        if !config.executable.is_file() {
            return Err(TranscodeError::NotFound {
                path: config.executable.clone(),
            });
        }
        let executable = config.executable.canonicalize()?;

        let mut command = Command::new(&executable);
        command
            .args(split_args(&config.args))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = executable.parent() {
            command.current_dir(dir);
        }
        if let Some(user) = config.user {
            command.uid(user.uid);
            if let Some(gid) = user.gid {
                command.gid(gid);
            }
            debug!("Process will run as uid {}.", user.uid);
        }

        let mut child = command.spawn()?;
        let pid = child.id();
        info!("Started '{}' (pid {}).", executable.display(), pid);

        if config.priority != ProcessPriority::Normal {
            apply_priority(pid, config.priority);
        }

        let input = InputChannel::new(child.stdin.take());
        let output = child.stdout.take();
        let diagnostics = child
            .stderr
            .take()
            .map(|stderr| spawn_diagnostics_drain(stderr, on_line));

        let exited = Arc::new(AtomicBool::new(false));
        let (exit_tx, exit_rx) = bounded(1);
        let waiter_exited = Arc::clone(&exited);
        let waiter = thread::spawn(move || {
            let code = match child.wait() {
                Ok(status) => status.code().unwrap_or(EXIT_CODE_ABORTED),
                Err(e) => {
                    error!("Failed to wait for child process {}: {}", pid, e);
                    EXIT_CODE_ABORTED
                }
            };
            waiter_exited.store(true, Ordering::SeqCst);
            info!("Process {} exited with code {}.", pid, code);
            let _ = exit_tx.send(code);
        });

        Ok(Self {
            control: ProcessControl { pid, exited },
            input,
            output,
            exit_rx,
            exit_code: None,
            waiter: Some(waiter),
            diagnostics,
        })
    }

    pub fn control(&self) -> ProcessControl {
        self.control.clone()
    }

    pub fn input(&self) -> InputChannel {
        self.input.clone()
    }

    pub fn take_output(&mut self) -> Option<ChildStdout> {
        self.output.take()
    }

    pub fn has_exited(&self) -> bool {
        self.control.has_exited()
    }

    pub fn exit_code(&mut self) -> Option<i32> {
        if self.exit_code.is_none() {
            if let Ok(code) = self.exit_rx.try_recv() {
                self.exit_code = Some(code);
            }
        }
        self.exit_code
    }

    pub fn kill(&self) {
        self.control.kill();
    }

    /// Blocks until the child exits. Returns false if `timeout` elapsed first.
    pub fn wait_for_exit(&mut self, timeout: Option<Duration>) -> bool {
        if self.exit_code.is_some() {
            return true;
        }
        let code = match timeout {
            None => self.exit_rx.recv().unwrap_or(EXIT_CODE_ABORTED),
            Some(timeout) => match self.exit_rx.recv_timeout(timeout) {
                Ok(code) => code,
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => EXIT_CODE_ABORTED,
            },
        };
        self.exit_code = Some(code);
        if let Some(waiter) = self.waiter.take() {
            if waiter.join().is_err() {
                warn!("Process waiter thread panicked.");
            }
        }
        true
    }

    /// Waits for the diagnostic stream to reach end of file.
    pub fn join_diagnostics(&mut self) {
        if let Some(handle) = self.diagnostics.take() {
            if handle.join().is_err() {
                warn!("Diagnostic drain thread panicked.");
            }
        }
    }

    /// Releases the pipes and threads, killing the child if it is still running.
    pub fn close(mut self) {
        self.input.close();
        self.output.take();
        self.control.kill();
        self.wait_for_exit(None);
        self.join_diagnostics();
    }
}

impl Drop for ProcessHost {
    fn drop(&mut self) {
        self.input.close();
        if !self.control.has_exited() {
            self.control.kill();
        }
    }
}

fn apply_priority(pid: u32, priority: ProcessPriority) {
    let rc = unsafe {
        libc::setpriority(
            libc::PRIO_PROCESS,
            pid as libc::id_t,
            priority.nice_value(),
        )
    };
    if rc != 0 {
        warn!(
            "Failed to apply {:?} priority to process {}: {}",
            priority,
            pid,
            io::Error::last_os_error()
        );
    }
}
