//! Order-preserving key encoding.
//!
//! Index keys are tuples of strings and signed 64-bit integers, encoded
//! so that byte-wise lexicographic order equals tuple order. That lets a
//! prefix scan over `(tag)` or `(tag, value)` enumerate exactly the
//! matching entries in order:
//!
//! - Strings are escaped (`0x00 → 0x00 0xFF`, `0xFF → 0xFF 0x00`) and
//!   closed with the terminator `0x00 0x01`, which sorts below every
//!   escaped byte, so `"a" < "ab"` holds byte-wise.
//! - Integers are offset-binary big-endian: flipping the sign bit maps
//!   the signed order onto the unsigned byte order.

use thiserror::Error;

const ESCAPE_LOW: u8 = 0x00;
const ESCAPE_HIGH: u8 = 0xff;
const TERMINATOR: [u8; 2] = [0x00, 0x01];

/// Append an escaped, terminated string.
pub fn append_str(buf: &mut Vec<u8>, s: &str) {
    for &b in s.as_bytes() {
        match b {
            ESCAPE_LOW => buf.extend_from_slice(&[ESCAPE_LOW, 0xff]),
            ESCAPE_HIGH => buf.extend_from_slice(&[ESCAPE_HIGH, 0x00]),
            _ => buf.push(b),
        }
    }
    buf.extend_from_slice(&TERMINATOR);
}

/// Append an order-preserving signed integer.
pub fn append_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&((v as u64) ^ (1 << 63)).to_be_bytes());
}

/// Errors from decoding index keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyDecodeError {
    #[error("unterminated string segment")]
    UnterminatedString,

    #[error("invalid escape sequence")]
    InvalidEscape,

    #[error("string segment is not valid UTF-8")]
    InvalidUtf8,

    #[error("truncated integer segment")]
    TruncatedInteger,

    #[error("trailing bytes after the last segment")]
    TrailingBytes,
}

/// Sequential reader over an encoded key.
pub struct KeyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> KeyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        KeyReader { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Require the key to be fully consumed.
    pub fn finish(self) -> Result<(), KeyDecodeError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(KeyDecodeError::TrailingBytes)
        }
    }

    pub fn read_str(&mut self) -> Result<String, KeyDecodeError> {
        let mut out = Vec::new();
        loop {
            let b = *self
                .buf
                .get(self.pos)
                .ok_or(KeyDecodeError::UnterminatedString)?;
            self.pos += 1;
            match b {
                ESCAPE_LOW => {
                    let next = *self
                        .buf
                        .get(self.pos)
                        .ok_or(KeyDecodeError::UnterminatedString)?;
                    self.pos += 1;
                    match next {
                        0x01 => break,
                        0xff => out.push(ESCAPE_LOW),
                        _ => return Err(KeyDecodeError::InvalidEscape),
                    }
                }
                ESCAPE_HIGH => {
                    let next = *self
                        .buf
                        .get(self.pos)
                        .ok_or(KeyDecodeError::UnterminatedString)?;
                    self.pos += 1;
                    match next {
                        0x00 => out.push(ESCAPE_HIGH),
                        _ => return Err(KeyDecodeError::InvalidEscape),
                    }
                }
                _ => out.push(b),
            }
        }
        String::from_utf8(out).map_err(|_| KeyDecodeError::InvalidUtf8)
    }

    pub fn read_i64(&mut self) -> Result<i64, KeyDecodeError> {
        let end = self.pos + 8;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(KeyDecodeError::TruncatedInteger)?;
        self.pos = end;
        let arr: [u8; 8] = bytes.try_into().expect("slice of length 8");
        Ok((u64::from_be_bytes(arr) ^ (1 << 63)) as i64)
    }
}
