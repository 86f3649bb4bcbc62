use std::io;
use thiserror::Error;

use crate::settings::SettingsError;
use crate::sink::SinkError;
use crate::transport::TransportError;
use crate::worker::WorkerError;

pub mod codec;
pub mod decode;
pub mod mode;

pub use decode::{decode, ProtocolDecoder};
pub use mode::Mode;

pub type Result<T> = std::result::Result<T, ProtoError>;

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("I/O Error: {0}")]
    Io(#[from] io::Error),
}
