use bytes::BytesMut;
use std::io;
use tokio_util::codec::Decoder;

/// Byte sent to the meter to request one reading.
pub const TRIGGER: u8 = b'\n';
/// Byte terminating each response line.
pub const TERMINATOR: u8 = b'\r';
/// Upper bound for a single response line.
pub const MAX_LINE_LEN: usize = 256;

/// Splits the raw byte stream into lines.
///
/// A line ends at the terminator (which is dropped) or when `max_len`
/// bytes have been collected, whichever comes first. Bytes after the
/// terminator stay in the buffer for the next call.
#[derive(Debug, Clone, Copy)]
pub struct LineCodec {
    terminator: u8,
    max_len: usize,
}

impl LineCodec {
    pub fn new(terminator: u8, max_len: usize) -> Self {
        Self {
            terminator,
            max_len: max_len.max(1),
        }
    }

    /// Drain whatever is buffered as an unterminated line.
    pub(crate) fn take_partial(src: &mut BytesMut) -> String {
        let partial = src.split();
        to_line(&partial)
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(TERMINATOR, MAX_LINE_LEN)
    }
}

fn to_line(bytes: &[u8]) -> String {
    // The meter only sends 7-bit ASCII.
    String::from_utf8_lossy(bytes).into_owned()
}

impl Decoder for LineCodec {
    type Item = String;
    // Framing itself can't fail, io::Error is what the trait wants.
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let window = src.len().min(self.max_len);
        if let Some(pos) = src[..window].iter().position(|b| *b == self.terminator) {
            let line = src.split_to(pos + 1);
            return Ok(Some(to_line(&line[..pos])));
        }
        if src.len() >= self.max_len {
            let line = src.split_to(self.max_len);
            return Ok(Some(to_line(&line)));
        }
        Ok(None) // Not enough bytes yet
    }
}
