//! Length-prefixed frame codec.
//!
//! The ciphertext stream is a sequence of frames, each an 8-byte ASCII
//! decimal length followed by that many ciphertext bytes:
//!
//! ```text
//! "00001040" <1040 bytes> "00000512" <512 bytes> ...
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use oculux_common::{Error, Result};

/// Width of the ASCII length header.
pub const HEADER_LEN: usize = 8;

/// Largest body an 8-digit header can describe.
pub const MAX_FRAME_LEN: u64 = 99_999_999;

/// Parse a frame header into the declared body length.
///
/// Surrounding ASCII whitespace is ignored; what remains must be a
/// non-empty run of decimal digits.
pub fn parse_header(header: &[u8]) -> Result<u64> {
    if header.len() != HEADER_LEN {
        return Err(Error::framing(format!(
            "frame header must be {HEADER_LEN} bytes, got {}",
            header.len()
        )));
    }

    let digits = header.trim_ascii();
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(Error::framing(format!(
            "invalid frame length header {:?}",
            String::from_utf8_lossy(header)
        )));
    }

    Ok(digits
        .iter()
        .fold(0u64, |acc, d| acc * 10 + u64::from(d - b'0')))
}

/// Encode one frame: zero-padded decimal length followed by `body`.
pub fn encode_frame(body: &[u8]) -> Result<Bytes> {
    let len = body.len() as u64;
    if len > MAX_FRAME_LEN {
        return Err(Error::framing(format!(
            "frame body of {len} bytes exceeds {MAX_FRAME_LEN}"
        )));
    }

    let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
    out.put_slice(format!("{len:0width$}", width = HEADER_LEN).as_bytes());
    out.put_slice(body);
    Ok(out.freeze())
}

/// Incremental frame parser over an accumulation buffer.
///
/// Network chunks are pushed as they arrive; [`next_frame`](Self::next_frame)
/// hands out complete frame bodies in order and leaves partial frames in the
/// buffer.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: BytesMut,
    consumed: u64,
}

impl FrameReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly received bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Take the next complete frame body.
    ///
    /// Returns `Ok(None)` when more bytes are needed; the buffer is left
    /// untouched in that case.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = parse_header(&self.buffer[..HEADER_LEN])?;
        let total = HEADER_LEN as u64 + len;
        if (self.buffer.len() as u64) < total {
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(total as usize);
        self.consumed += total;
        Ok(Some(frame.split_off(HEADER_LEN).freeze()))
    }

    /// Bytes buffered but not yet returned as frames.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Whether an incomplete frame is sitting in the buffer.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Ciphertext bytes consumed by complete frames so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}
