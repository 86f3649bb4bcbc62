use bytes::BytesMut;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::io::{self, Read};
use std::time::Duration;
use thiserror::Error;
use tokio_util::codec::Decoder;

use crate::proto::codec::LineCodec;
use crate::DEFAULT_BAUDRATE;

mod serial;

#[cfg(test)]
pub(crate) mod fake;

pub use serial::SerialTransport;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Cannot open port {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: tokio_serial::Error,
    },
    #[error("Serial write failed: {0}")]
    Write(#[source] io::Error),
    /// `partial` holds the bytes collected before the failure.
    #[error("Serial read failed: {source}")]
    Read {
        partial: String,
        #[source]
        source: io::Error,
    },
    #[error("Serial port is not open")]
    Closed,
}

/// Byte channel to the meter.
///
/// Implementations know nothing about the line grammar, they move bytes
/// and honor the read timeout they were opened with.
pub trait Transport: Send {
    /// Write a single byte, returns the number of bytes written.
    fn write_byte(&mut self, byte: u8) -> Result<usize, TransportError>;

    /// Read until `terminator` (not included) or `max_bytes`.
    ///
    /// Every byte is awaited for up to the configured timeout. A timeout
    /// before the first byte is not an error and yields an empty line.
    fn read_line(&mut self, terminator: u8, max_bytes: usize) -> Result<String, TransportError>;

    /// Release the port. Calling it again is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Serial port found by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    /// e.g. `/dev/ttyUSB0` or `COM3`
    pub device: String,
    pub description: String,
    pub manufacturer: String,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TryFromPrimitive, IntoPrimitive,
)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum WordLength {
    Five = 5,
    Six = 6,
    Seven = 7,
    Eight = 8,
}

impl From<WordLength> for tokio_serial::DataBits {
    fn from(value: WordLength) -> Self {
        match value {
            WordLength::Five => tokio_serial::DataBits::Five,
            WordLength::Six => tokio_serial::DataBits::Six,
            WordLength::Seven => tokio_serial::DataBits::Seven,
            WordLength::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TryFromPrimitive, IntoPrimitive,
)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum StopBitCount {
    One = 1,
    Two = 2,
}

impl From<StopBitCount> for tokio_serial::StopBits {
    fn from(value: StopBitCount) -> Self {
        match value {
            StopBitCount::One => tokio_serial::StopBits::One,
            StopBitCount::Two => tokio_serial::StopBits::Two,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    #[serde(rename = "N")]
    None,
    #[serde(rename = "O")]
    Odd,
    #[serde(rename = "E")]
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(value: Parity) -> Self {
        match value {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Serial line parameters, fixed per device family
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineConfig {
    pub baud_rate: u32,
    pub data_bits: WordLength,
    pub stop_bits: StopBitCount,
    pub parity: Parity,
    /// Wait limit for each single byte
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    #[serde(rename = "timeout_ms")]
    pub timeout: Duration,
}

impl LineConfig {
    /// Protek 506: 1200 baud, 7N2, 1 s
    pub const PROTEK_506: LineConfig = LineConfig {
        baud_rate: DEFAULT_BAUDRATE,
        data_bits: WordLength::Seven,
        stop_bits: StopBitCount::Two,
        parity: Parity::None,
        timeout: Duration::from_millis(1000),
    };
}

impl Default for LineConfig {
    fn default() -> Self {
        Self::PROTEK_506
    }
}

/// Shared `read_line` logic for anything readable with a timeout.
///
/// `pending` keeps bytes that arrived after a terminator for the next
/// call. `TimedOut` and `WouldBlock` end the line, `Interrupted` is
/// retried, a zero-length read means the device is gone.
pub(crate) fn read_line_from<R: Read + ?Sized>(
    port: &mut R,
    pending: &mut BytesMut,
    terminator: u8,
    max_bytes: usize,
) -> Result<String, TransportError> {
    let mut codec = LineCodec::new(terminator, max_bytes);
    let mut chunk = [0u8; 64];
    loop {
        if let Some(line) = codec
            .decode(pending)
            .map_err(|source| TransportError::Read {
                partial: String::new(),
                source,
            })?
        {
            return Ok(line);
        }

        match port.read(&mut chunk) {
            Ok(0) => {
                return Err(TransportError::Read {
                    partial: LineCodec::take_partial(pending),
                    source: io::Error::new(io::ErrorKind::UnexpectedEof, "device disconnected"),
                });
            }
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e)
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock =>
            {
                return Ok(LineCodec::take_partial(pending));
            }
            Err(source) => {
                return Err(TransportError::Read {
                    partial: LineCodec::take_partial(pending),
                    source,
                });
            }
        }
    }
}
