//!
//! This library provides communication with a Protek 506 digital multimeter.
//!
//! <br>
//!
//! # Details
//!
//! - The meter is attached through its RS-232 port (or an USB adapter).
//!   Line settings are fixed: 1200 baud, 7 data bits, 2 stop bits, no parity.
//!
//! - The host sends a line feed, the meter answers with one CR terminated line
//!   like `DC 3.999 V`. [`PollingWorker`] drives this cycle on its own thread
//!   and publishes decoded readings through a channel.
//!
//!   ```no_run
//!   use p506ctrl::{worker::Event, LineConfig, PollingWorker, DEFAULT_TTY};
//!   use std::time::Duration;
//!
//!   fn main() -> p506ctrl::Result<()> {
//!       let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!       let worker = PollingWorker::connect(
//!           DEFAULT_TTY,
//!           &LineConfig::default(),
//!           Duration::from_millis(200),
//!           tx,
//!       )?;
//!       if let Some(Event::Reading(sample)) = rx.blocking_recv() {
//!           println!("{}", sample.reading);
//!       }
//!       worker.request_stop();
//!       worker.join()?;
//!       Ok(())
//!   }
//!   ```
//!
//! # Supported devices
//!
//!  * Protek 506
//!

pub mod measurement;
pub mod proto;
pub mod settings;
pub mod sink;
pub mod transport;
pub mod worker;

pub use measurement::{Classification, Reading, Sample};
pub use proto::{decode, ProtoError, Result};
pub use transport::{LineConfig, PortDescriptor, SerialTransport, Transport};
pub use worker::PollingWorker;

#[cfg(unix)]
pub const DEFAULT_TTY: &str = "/dev/ttyUSB0";
#[cfg(windows)]
pub const DEFAULT_TTY: &str = "COM1";

/// Default Baudrate for Protek 506.
pub const DEFAULT_BAUDRATE: u32 = 1200;

/// Default delay between two poll cycles in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
