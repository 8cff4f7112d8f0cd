//! Framed transport: one SLIP frame out, one SLIP frame in, over anything
//! that implements `Read + Write` (a real `serialport::SerialPort` in
//! production, an in-memory duplex in tests).

use std::io::{Read, Write};

use crate::slip::{self, Decoded};
use crate::DfuError;
use crate::Result;

/// Conservative default payload ceiling used before the device's MTU is
/// known (large enough for the handshake opcodes: Ping, ReceiptNotifSet,
/// MtuGet).
const DEFAULT_MAX_PAYLOAD: usize = 64;

pub struct FramedTransport<T> {
    link: T,
    max_payload: usize,
    send_buf: Vec<u8>,
    receive_buf: Vec<u8>,
    staging: Vec<u8>,
}

impl<T: Read + Write> FramedTransport<T> {
    pub fn new(link: T) -> Self {
        let mut this = Self {
            link,
            max_payload: DEFAULT_MAX_PAYLOAD,
            send_buf: Vec::new(),
            receive_buf: Vec::new(),
            staging: Vec::new(),
        };
        this.resize_staging();
        this
    }

    /// Raise (or lower) the payload ceiling once the device's MTU is known.
    /// `max_payload` should be the largest opcode payload the protocol can
    /// still produce under that MTU.
    pub fn set_max_payload(&mut self, max_payload: usize) {
        self.max_payload = max_payload;
        self.resize_staging();
    }

    fn resize_staging(&mut self) {
        self.staging = vec![0u8; 2 * self.max_payload + 1];
    }

    /// SLIP-encode `payload` and write it as one frame.
    pub fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_payload {
            return Err(DfuError::TooLarge {
                size: payload.len(),
                limit: self.max_payload,
            });
        }
        self.send_buf.clear();
        slip::encode(payload, &mut self.send_buf);
        self.link
            .write_all(&self.send_buf)
            .map_err(DfuError::Io)?;
        self.link.flush().map_err(DfuError::Io)?;
        Ok(())
    }

    /// Read and SLIP-decode one frame, skipping any stray empty frames
    /// (a bare `END` with no pending payload, possible after a device
    /// reset).
    ///
    /// Returns the decoded payload as a slice borrowed from internal
    /// scratch, valid until the next call.
    pub fn receive_frame(&mut self) -> Result<&[u8]> {
        let cap = 2 * self.max_payload + 1;
        let mut decoder = slip::Decoder::new();
        self.receive_buf.clear();

        loop {
            let n = self
                .link
                .read(&mut self.staging)
                .map_err(DfuError::Io)?;
            if n == 0 {
                return Err(DfuError::Timeout);
            }

            for &b in &self.staging[..n] {
                match decoder.feed(b, &mut self.receive_buf) {
                    Ok(Decoded::Pending) => {
                        if self.receive_buf.len() > cap {
                            return Err(DfuError::Framing(
                                "receive buffer overflowed MTU-bounded capacity".into(),
                            ));
                        }
                    }
                    Ok(Decoded::Frame { empty: true }) => {
                        // Stray terminator between frames: drop it and
                        // keep reading for the real frame.
                        decoder = slip::Decoder::new();
                        self.receive_buf.clear();
                    }
                    Ok(Decoded::Frame { empty: false }) => {
                        return Ok(&self.receive_buf);
                    }
                    Err(e) => return Err(DfuError::Framing(e.to_string())),
                }
            }
        }
    }
}
