//! Stand-ins for the serial hardware, test builds only.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{Transport, TransportError};

/// One scripted outcome of `Read::read`.
#[derive(Debug, Clone)]
pub enum Step {
    Data(Vec<u8>),
    Timeout,
    Interrupted,
    Eof,
    Fail(io::ErrorKind),
}

/// Byte source replaying a script, times out once the script is exhausted.
pub struct ScriptedPort {
    steps: VecDeque<Step>,
}

impl ScriptedPort {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
        }
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.steps.pop_front().unwrap_or(Step::Timeout) {
            Step::Data(mut data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.steps.push_front(Step::Data(data.split_off(n)));
                }
                Ok(n)
            }
            Step::Timeout => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
            Step::Interrupted => Err(io::Error::new(io::ErrorKind::Interrupted, "signal")),
            Step::Eof => Ok(0),
            Step::Fail(kind) => Err(io::Error::new(kind, "scripted failure")),
        }
    }
}

/// Line level fake used to drive the polling worker.
///
/// Scripted responses are returned in order; afterwards every read waits
/// `read_delay` (like a real timeout) and returns `idle_line`.
pub struct FakeTransport {
    responses: VecDeque<Result<String, TransportError>>,
    idle_line: String,
    read_delay: Duration,
    fail_writes: bool,
    open: bool,
    pub writes: Arc<AtomicUsize>,
    pub closed: Arc<AtomicBool>,
}

impl FakeTransport {
    pub fn new(responses: Vec<Result<String, TransportError>>) -> Self {
        Self {
            responses: responses.into(),
            idle_line: String::new(),
            read_delay: Duration::from_millis(20),
            fail_writes: false,
            open: true,
            writes: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_idle_line(mut self, line: &str) -> Self {
        self.idle_line = line.to_string();
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }
}

impl Transport for FakeTransport {
    fn write_byte(&mut self, _byte: u8) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        if self.fail_writes {
            return Err(TransportError::Write(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "scripted write failure",
            )));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }

    fn read_line(&mut self, _terminator: u8, _max_bytes: usize) -> Result<String, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        match self.responses.pop_front() {
            Some(response) => response,
            None => {
                thread::sleep(self.read_delay);
                Ok(self.idle_line.clone())
            }
        }
    }

    fn close(&mut self) {
        self.open = false;
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
