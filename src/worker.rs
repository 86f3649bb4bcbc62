use log::{debug, trace, warn};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::measurement::Sample;
use crate::proto::codec::{MAX_LINE_LEN, TERMINATOR, TRIGGER};
use crate::proto::decode::ProtocolDecoder;
use crate::transport::{LineConfig, SerialTransport, Transport, TransportError};

/// Granularity of the poll delay; a stop request is noticed within one slice.
pub const SLEEP_SLICE: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Poll interval must be greater than zero")]
    InvalidInterval,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Failed to spawn polling thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("Polling thread panicked")]
    Panicked,
}

/// Message from the worker to its consumer
#[derive(Debug, Clone)]
pub enum Event {
    Reading(Sample),
    /// Terminal: the worker is stopped once this is delivered.
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

/// Polls the meter on a dedicated thread.
///
/// Events go out through an unbounded channel, so publishing never waits
/// on the consumer. The worker stops on its own when the receiving side is
/// dropped. After `request_stop()` + `join()` returned the sender is gone
/// and no further event can arrive. Dropping the worker does the same.
pub struct PollingWorker {
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    handle: Option<JoinHandle<()>>,
}

impl PollingWorker {
    /// Start polling on an already opened transport.
    pub fn spawn<T>(
        transport: T,
        poll_interval: Duration,
        events: UnboundedSender<Event>,
    ) -> Result<Self, WorkerError>
    where
        T: Transport + 'static,
    {
        if poll_interval.is_zero() {
            return Err(WorkerError::InvalidInterval);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(AtomicU8::new(WorkerState::Idle.into()));

        let poll_loop = PollLoop {
            transport,
            decoder: ProtocolDecoder::new(),
            events,
            interval: poll_interval,
            stop: Arc::clone(&stop),
            state: Arc::clone(&state),
        };

        let handle = thread::Builder::new()
            .name("p506-poll".to_string())
            .spawn(move || poll_loop.run())
            .map_err(WorkerError::Spawn)?;

        Ok(Self {
            stop,
            state,
            handle: Some(handle),
        })
    }

    /// Open `device` and start polling it.
    pub fn connect(
        device: &str,
        config: &LineConfig,
        poll_interval: Duration,
        events: UnboundedSender<Event>,
    ) -> Result<Self, WorkerError> {
        if poll_interval.is_zero() {
            return Err(WorkerError::InvalidInterval);
        }
        let transport = SerialTransport::open(device, config)?;
        Self::spawn(transport, poll_interval, events)
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::try_from(self.state.load(Ordering::Acquire)).unwrap_or(WorkerState::Stopped)
    }

    /// Ask the loop to end. Does not interrupt a read in progress.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// True once the polling thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the loop to exit and the transport to be closed.
    ///
    /// Call [`request_stop`](Self::request_stop) first unless the worker
    /// already ended on an error.
    pub fn join(mut self) -> Result<(), WorkerError> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<(), WorkerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| WorkerError::Panicked),
            None => Ok(()),
        }
    }
}

impl Drop for PollingWorker {
    fn drop(&mut self) {
        self.request_stop();
        if self.join_inner().is_err() {
            warn!("Polling thread panicked");
        }
    }
}

enum Halt {
    Transport(TransportError),
    ConsumerGone,
}

impl From<TransportError> for Halt {
    fn from(value: TransportError) -> Self {
        Halt::Transport(value)
    }
}

struct PollLoop<T> {
    transport: T,
    decoder: ProtocolDecoder,
    events: UnboundedSender<Event>,
    interval: Duration,
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
}

impl<T: Transport> PollLoop<T> {
    fn run(mut self) {
        self.set_state(WorkerState::Running);
        debug!("Polling every {} ms", self.interval.as_millis());

        let mut failure = None;
        while !self.stop_requested() {
            match self.poll_once() {
                Ok(()) => {}
                Err(Halt::Transport(err)) => {
                    warn!("Polling stopped: {}", err);
                    failure = Some(err.to_string());
                    break;
                }
                Err(Halt::ConsumerGone) => {
                    debug!("Event receiver dropped, stopping");
                    break;
                }
            }
            self.pause();
        }

        self.set_state(WorkerState::Stopping);
        if self.transport.is_open() {
            self.transport.close();
        }
        self.set_state(WorkerState::Stopped);

        if let Some(message) = failure {
            // Nobody left to tell if this fails.
            let _ = self.events.send(Event::Error(message));
        }
        debug!("Polling thread finished");
    }

    /// One trigger/read/decode cycle.
    fn poll_once(&mut self) -> Result<(), Halt> {
        self.transport.write_byte(TRIGGER)?;
        let line = self.transport.read_line(TERMINATOR, MAX_LINE_LEN)?;
        if line.is_empty() {
            trace!("No response within timeout");
            return Ok(());
        }

        let clean = strip_control(&line);
        let reading = self.decoder.decode(&clean);
        if !reading.valid {
            trace!("Dropped unrecognized line {:?}", clean);
            return Ok(());
        }

        self.events
            .send(Event::Reading(Sample::now(reading)))
            .map_err(|_| Halt::ConsumerGone)
    }

    fn pause(&self) {
        let deadline = Instant::now() + self.interval;
        while !self.stop_requested() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state.into(), Ordering::Release);
    }
}

/// Drop control characters picked up on a noisy line (tab is kept).
fn strip_control(line: &str) -> String {
    line.chars().filter(|c| !c.is_control() || *c == '\t').collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;
    use std::io;
    use tokio::sync::mpsc::{error::TryRecvError, unbounded_channel, UnboundedReceiver};

    fn wait_for_state(worker: &PollingWorker, state: WorkerState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.state() != state {
            assert!(Instant::now() < deadline, "worker never reached {:?}", state);
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn readings(events: &[Event]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Reading(sample) => Some(sample.reading.raw_line.clone()),
                Event::Error(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_zero_interval_rejected() {
        let (tx, _rx) = unbounded_channel();
        let result = PollingWorker::spawn(FakeTransport::new(vec![]), Duration::ZERO, tx);
        assert!(matches!(result, Err(WorkerError::InvalidInterval)));
    }

    #[test]
    fn test_publishes_valid_readings_in_order() {
        let transport = FakeTransport::new(vec![
            Ok("DC 1.000 V".to_string()),
            Ok(String::new()),
            Ok("garbage".to_string()),
            Ok("XY 1.0 V".to_string()),
            Ok("AC OL".to_string()),
            Ok("\u{2}RES 3.999 MOH".to_string()),
        ]);
        let (tx, mut rx) = unbounded_channel();
        let worker = PollingWorker::spawn(transport, Duration::from_millis(1), tx).unwrap();

        let mut received = Vec::new();
        while received.len() < 3 {
            match rx.blocking_recv() {
                Some(Event::Reading(sample)) => received.push(sample.reading),
                Some(Event::Error(err)) => panic!("unexpected error event: {}", err),
                None => panic!("channel closed early"),
            }
        }
        worker.request_stop();
        worker.join().unwrap();

        assert_eq!(received[0].raw_value, "1.000");
        assert!(received[1].is_overload());
        assert_eq!(received[2].units, "MΩ");
        assert_eq!(received[2].raw_line, "RES 3.999 MOH");
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_timeout_keeps_polling() {
        let transport = FakeTransport::new(vec![Ok(String::new()), Ok(String::new())])
            .with_idle_line("DC 0.500 V")
            .with_read_delay(Duration::from_millis(5));
        let writes = Arc::clone(&transport.writes);
        let (tx, mut rx) = unbounded_channel();
        let worker = PollingWorker::spawn(transport, Duration::from_millis(1), tx).unwrap();

        match rx.blocking_recv() {
            Some(Event::Reading(sample)) => assert_eq!(sample.reading.raw_value, "0.500"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(writes.load(Ordering::SeqCst) >= 3);
        assert_eq!(worker.state(), WorkerState::Running);
        worker.request_stop();
        worker.join().unwrap();
    }

    #[test]
    fn test_read_error_is_terminal() {
        let transport = FakeTransport::new(vec![
            Ok("DC 1.000 V".to_string()),
            Err(TransportError::Read {
                partial: "DC".to_string(),
                source: io::Error::new(io::ErrorKind::BrokenPipe, "gone"),
            }),
            Ok("DC 2.000 V".to_string()),
        ]);
        let closed = Arc::clone(&transport.closed);
        let (tx, mut rx) = unbounded_channel();
        let worker = PollingWorker::spawn(transport, Duration::from_millis(1), tx).unwrap();

        assert!(matches!(rx.blocking_recv(), Some(Event::Reading(_))));
        match rx.blocking_recv() {
            Some(Event::Error(message)) => assert!(message.contains("gone"), "{}", message),
            other => panic!("unexpected event: {:?}", other),
        }
        // Sender dropped with the loop, nothing else follows
        assert!(rx.blocking_recv().is_none());
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(closed.load(Ordering::SeqCst));
        worker.join().unwrap();
    }

    #[test]
    fn test_write_error_is_terminal() {
        let transport = FakeTransport::new(vec![]).failing_writes();
        let (tx, mut rx) = unbounded_channel();
        let worker = PollingWorker::spawn(transport, Duration::from_millis(1), tx).unwrap();

        match rx.blocking_recv() {
            Some(Event::Error(message)) => assert!(message.contains("write")),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.blocking_recv().is_none());
        worker.join().unwrap();
    }

    #[test]
    fn test_silent_after_join() {
        let transport = FakeTransport::new(vec![])
            .with_idle_line("DC 3.999 V")
            .with_read_delay(Duration::from_millis(2));
        let closed = Arc::clone(&transport.closed);
        let (tx, mut rx) = unbounded_channel();
        let worker = PollingWorker::spawn(transport, Duration::from_millis(1), tx).unwrap();

        assert!(matches!(rx.blocking_recv(), Some(Event::Reading(_))));
        worker.request_stop();
        worker.join().unwrap();
        assert!(closed.load(Ordering::SeqCst));

        let before = drain(&mut rx);
        assert!(readings(&before).iter().all(|l| l == "DC 3.999 V"));
        thread::sleep(Duration::from_millis(100));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[test]
    fn test_stop_latency_ignores_interval() {
        let read_timeout = Duration::from_millis(50);
        let transport = FakeTransport::new(vec![]).with_read_delay(read_timeout);
        let writes = Arc::clone(&transport.writes);
        let (tx, _rx) = unbounded_channel();
        let worker = PollingWorker::spawn(transport, Duration::from_secs(30), tx).unwrap();

        wait_for_state(&worker, WorkerState::Running);
        // Let the first cycle finish so the worker sits in its long pause
        let deadline = Instant::now() + Duration::from_secs(5);
        while writes.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(read_timeout * 2);

        let started = Instant::now();
        worker.request_stop();
        worker.join().unwrap();
        let elapsed = started.elapsed();
        assert!(
            elapsed < read_timeout + SLEEP_SLICE + Duration::from_millis(250),
            "join took {:?}",
            elapsed
        );
    }

    #[test]
    fn test_stops_when_consumer_dropped() {
        let transport = FakeTransport::new(vec![])
            .with_idle_line("DC 3.999 V")
            .with_read_delay(Duration::from_millis(1));
        let closed = Arc::clone(&transport.closed);
        let (tx, rx) = unbounded_channel();
        let worker = PollingWorker::spawn(transport, Duration::from_millis(1), tx).unwrap();
        drop(rx);

        wait_for_state(&worker, WorkerState::Stopped);
        assert!(closed.load(Ordering::SeqCst));
        let deadline = Instant::now() + Duration::from_secs(5);
        while !worker.is_finished() {
            assert!(Instant::now() < deadline, "polling thread still alive");
            thread::sleep(Duration::from_millis(5));
        }
        worker.join().unwrap();
    }

    #[test]
    fn test_drop_stops_worker() {
        let transport = FakeTransport::new(vec![]).with_read_delay(Duration::from_millis(5));
        let closed = Arc::clone(&transport.closed);
        let (tx, mut rx) = unbounded_channel();
        let worker = PollingWorker::spawn(transport, Duration::from_secs(10), tx).unwrap();
        drop(worker);

        assert!(closed.load(Ordering::SeqCst));
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn test_strip_control() {
        assert_eq!(strip_control("\u{2}DC 1 V\u{0}"), "DC 1 V");
        assert_eq!(strip_control("DC\t1"), "DC\t1");
    }
}
