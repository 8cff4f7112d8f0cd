//! SLIP (Serial Line IP) byte-stuffing framing.
//!
//! Frames are delimited by `END` (0xC0); `END` and `ESC` bytes that occur in
//! the payload are escaped as two-byte sequences so the terminator can never
//! be confused with payload data.

const END: u8 = 0xC0;
const ESC: u8 = 0xDB;
const ESC_END: u8 = 0xDC;
const ESC_ESC: u8 = 0xDD;

/// Result of feeding one byte to the decoder.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// Byte consumed, frame not yet complete.
    Pending,
    /// Byte consumed, frame complete. `empty` is true if no payload bytes
    /// were ever produced (a stray terminator).
    Frame { empty: bool },
}

/// Encode `src` into `dst`, appending a single `END` terminator.
///
/// `dst` is not cleared first; callers that want a fresh buffer should
/// clear it themselves. At most `2 * src.len() + 1` bytes are appended.
pub fn encode(src: &[u8], dst: &mut Vec<u8>) {
    dst.reserve(src.len() + 1);
    for &b in src {
        match b {
            END => dst.extend_from_slice(&[ESC, ESC_END]),
            ESC => dst.extend_from_slice(&[ESC, ESC_ESC]),
            b => dst.push(b),
        }
    }
    dst.push(END);
}

/// Incremental SLIP decoder. Feed it bytes one at a time (or via
/// [`Decoder::feed_slice`]) as they arrive from the transport; it
/// accumulates the decoded payload in an internal buffer and reports frame
/// completion via [`Decoded`].
#[derive(Default)]
pub struct Decoder {
    escaped: bool,
}

impl Decoder {
    pub fn new() -> Self {
        Self { escaped: false }
    }

    /// Feed a single raw (still SLIP-encoded) byte. Decoded payload bytes
    /// are appended to `out`. Returns whether the frame completed, or an
    /// error if the escape sequence was malformed.
    pub fn feed(&mut self, b: u8, out: &mut Vec<u8>) -> Result<Decoded, FramingError> {
        if b == END {
            if self.escaped {
                self.escaped = false;
                return Err(FramingError::DanglingEscape);
            }
            let empty = out.is_empty();
            return Ok(Decoded::Frame { empty });
        }

        if self.escaped {
            self.escaped = false;
            match b {
                ESC_END => out.push(END),
                ESC_ESC => out.push(ESC),
                _ => return Err(FramingError::InvalidEscape(b)),
            }
        } else if b == ESC {
            self.escaped = true;
        } else {
            out.push(b);
        }

        Ok(Decoded::Pending)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("END received while an escape sequence was pending")]
    DanglingEscape,
    #[error("invalid SLIP escape byte 0x{0:02x}")]
    InvalidEscape(u8),
}
