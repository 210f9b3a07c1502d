//! Line framing for the agent connection.
//!
//! Splits the stream on `\n` with [`tokio_util::codec::AnyDelimiterCodec`]
//! under a maximum chunk length, so an unterminated or oversized frame from
//! a misbehaving agent cannot exhaust memory. Use [`AgentCodec`] with
//! [`tokio_util::codec::FramedRead`] on the read half of the socket and
//! [`tokio_util::codec::FramedWrite`] on the write half.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder};

use crate::config::DEFAULT_MAX_FRAME_BYTES;
use crate::{AppError, Result};

/// Newline-delimited JSON codec for the agent stream.
///
/// # Decoder
///
/// Lines are decoded as UTF-8 with invalid sequences replaced by
/// `U+FFFD`, and a trailing `\r` is dropped. Inbound lines longer than the
/// configured limit return [`AppError::Codec`]; the codec discards the rest
/// of that line and keeps decoding the following ones. I/O errors map to
/// [`AppError::Io`].
///
/// # Encoder
///
/// Outbound strings are encoded as `item\n`. The length limit applies to
/// decoding only.
#[derive(Debug)]
pub struct AgentCodec {
    inner: AnyDelimiterCodec,
    max_length: usize,
}

impl AgentCodec {
    /// Create a codec with the default frame limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a codec rejecting inbound lines longer than `max_length` bytes.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), max_length),
            max_length,
        }
    }

    /// Longest inbound line accepted.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn map_error(&self, e: AnyDelimiterCodecError) -> AppError {
        match e {
            AnyDelimiterCodecError::MaxChunkLengthExceeded => {
                AppError::Codec(format!("line too long: exceeded {} bytes", self.max_length))
            }
            AnyDelimiterCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        }
    }
}

impl Default for AgentCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn into_line(chunk: &Bytes) -> String {
    let line = chunk.strip_suffix(b"\r").unwrap_or(&chunk[..]);
    String::from_utf8_lossy(line).into_owned()
}

impl Decoder for AgentCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let chunk = self.inner.decode(src).map_err(|e| self.map_error(e))?;
        Ok(chunk.as_ref().map(into_line))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let chunk = self.inner.decode_eof(src).map_err(|e| self.map_error(e))?;
        Ok(chunk.as_ref().map(into_line))
    }
}

impl Encoder<String> for AgentCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.inner.encode(item, dst).map_err(|e| self.map_error(e))
    }
}
