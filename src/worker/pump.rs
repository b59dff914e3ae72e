use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error};

use crate::manager::observers::TaskObservers;
use crate::models::task::FaultSide;
use crate::process::host::{lock, InputChannel, ProcessControl};

pub const CHUNK_SIZE: usize = 64 * 1024;

/// How long the output pump idles when the child has nothing to hand over.
const OUTPUT_IDLE_SLEEP: Duration = Duration::from_millis(30);

/// Cancellation token: the generation of its direction when the pump started.
///
/// Retiring the generation makes every outstanding token stale; pumps notice at
/// their next loop boundary.
#[derive(Debug, Clone)]
pub struct PumpToken {
    generation: Arc<AtomicU64>,
    captured: u64,
}

impl PumpToken {
    pub fn new(generation: &Arc<AtomicU64>) -> Self {
        Self {
            generation: Arc::clone(generation),
            captured: generation.load(Ordering::SeqCst),
        }
    }

    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.captured
    }
}

pub fn retire(generation: &AtomicU64) {
    generation.fetch_add(1, Ordering::SeqCst);
}

/// First caller-facing fault seen by either pump.
#[derive(Debug)]
pub struct RecordedFault {
    pub side: FaultSide,
    pub error: io::Error,
}

/// Stops both pumps and kills the child.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    control: ProcessControl,
    input_generation: Arc<AtomicU64>,
    output_generation: Arc<AtomicU64>,
}

impl AbortHandle {
    pub fn new(
        control: ProcessControl,
        input_generation: Arc<AtomicU64>,
        output_generation: Arc<AtomicU64>,
    ) -> Self {
        Self {
            control,
            input_generation,
            output_generation,
        }
    }

    /// Returns true when the child was still running and got killed.
    pub fn abort(&self) -> bool {
        retire(&self.input_generation);
        retire(&self.output_generation);
        self.control.kill()
    }
}

#[derive(Clone)]
pub(crate) struct PumpContext {
    pub fault: Arc<Mutex<Option<RecordedFault>>>,
    pub abort: AbortHandle,
}

impl PumpContext {
    fn on_stream_error(&self, err: io::Error, side: FaultSide, pump: &str) {
        match side {
            FaultSide::Pipe => {
                debug!("{} pump stopped on pipe error: {}", pump, err);
            }
            FaultSide::Caller => {
                error!("{} pump failed on caller stream: {}", pump, err);
                {
                    let mut fault = lock(&self.fault);
                    if fault.is_none() {
                        *fault = Some(RecordedFault { side, error: err });
                    }
                }
                self.abort.abort();
            }
        }
    }
}

/// Copies the caller's source into the child's stdin until end of input.
pub(crate) fn spawn_input_pump(
    mut source: Box<dyn Read + Send>,
    input: InputChannel,
    token: PumpToken,
    bytes_written: Arc<AtomicU64>,
    context: PumpContext,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let read = match source.read(&mut buf) {
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    context.on_stream_error(e, FaultSide::Caller, "Input");
                    return;
                }
            };
            if read == 0 {
                break;
            }
            if !token.is_current() {
                debug!("Input pump superseded.");
                return;
            }
            if let Err(e) = input.write_chunk(&buf[..read]) {
                context.on_stream_error(e, FaultSide::Pipe, "Input");
                return;
            }
            bytes_written.fetch_add(read as u64, Ordering::SeqCst);
        }
        input.close();
        debug!("Input pump reached end of source.");
    })
}

/// Copies the child's stdout into the caller's sink.
///
/// An empty read is not taken as end of stream until the child has exited.
pub(crate) fn spawn_output_pump<R>(
    mut output: R,
    mut sink: Box<dyn Write + Send>,
    token: PumpToken,
    control: ProcessControl,
    observers: TaskObservers,
    context: PumpContext,
) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = vec![0u8; CHUNK_SIZE];
        while token.is_current() {
            let read = match output.read(&mut buf) {
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    context.on_stream_error(e, FaultSide::Pipe, "Output");
                    return;
                }
            };
            if read > 0 {
                if !token.is_current() {
                    break;
                }
                if let Err(e) = sink.write_all(&buf[..read]).and_then(|_| sink.flush()) {
                    context.on_stream_error(e, FaultSide::Caller, "Output");
                    return;
                }
                observers.output_data();
            } else if control.has_exited() {
                break;
            } else {
                thread::sleep(OUTPUT_IDLE_SLEEP);
            }
        }
        debug!("Output pump finished.");
    })
}
