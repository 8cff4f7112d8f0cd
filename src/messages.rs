//! Wire types for the DFU opcode protocol: one request/response pair per
//! opcode, plus the shared response-validation logic.

use crate::wire;
use crate::{DfuError, Result};

pub const RESPONSE_PREFIX: u8 = 0x60;
const RESULT_SUCCESS: u8 = 0x01;
const RESULT_EXT_ERROR: u8 = 0x0B;

/// Object type selector used by `ObjectSelect` and `ObjectCreate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Command = 0x01,
    Data = 0x02,
}

/// A request that can be packed into a frame payload and expects exactly
/// one typed response.
pub trait Request {
    const OPCODE: u8;
    type Response: Response;

    fn write_payload(&self, buf: &mut Vec<u8>);
}

/// A response payload parser. `parse_payload` receives only the bytes
/// after the shared `[0x60, opcode, result]` header that
/// [`parse_response`] has already validated.
pub trait Response: Sized {
    fn parse_payload(payload: &[u8]) -> Result<Self>;
}

/// Validate and parse a raw response frame for request type `R`.
///
/// Checks the `0x60` prefix, the echoed opcode, and the result code before
/// handing the remaining bytes to `R::Response::parse_payload`.
pub fn parse_response<R: Request>(raw: &[u8]) -> Result<R::Response> {
    if raw.len() < 3 {
        return Err(DfuError::Protocol(format!(
            "response too short ({} bytes)",
            raw.len()
        )));
    }
    if raw[0] != RESPONSE_PREFIX {
        return Err(DfuError::Protocol(format!(
            "expected response prefix 0x{:02x}, got 0x{:02x}",
            RESPONSE_PREFIX, raw[0]
        )));
    }
    if raw[1] != R::OPCODE {
        return Err(DfuError::Protocol(format!(
            "response echoes opcode 0x{:02x}, expected 0x{:02x}",
            raw[1],
            R::OPCODE
        )));
    }
    let result = raw[2];
    if result != RESULT_SUCCESS {
        let ext = if result == RESULT_EXT_ERROR && raw.len() >= 4 {
            Some(raw[3])
        } else {
            None
        };
        return Err(DfuError::Remote { code: result, ext });
    }

    R::Response::parse_payload(&raw[3..])
}

fn expect_len(payload: &[u8], expected: usize, what: &str) -> Result<()> {
    if payload.len() != expected {
        Err(DfuError::Protocol(format!(
            "{what}: expected {expected}-byte payload, got {}",
            payload.len()
        )))
    } else {
        Ok(())
    }
}

/// No opcode-specific payload, and the response carries nothing beyond the
/// shared `[0x60, opcode, result]` header.
pub struct Empty;

impl Response for Empty {
    fn parse_payload(payload: &[u8]) -> Result<Self> {
        expect_len(payload, 0, "empty response")?;
        Ok(Empty)
    }
}

// --- Ping (0x09) ---

pub struct PingRequest(pub u8);

impl Request for PingRequest {
    const OPCODE: u8 = 0x09;
    type Response = PingResponse;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.push(self.0);
    }
}

pub struct PingResponse {
    pub id: u8,
}

impl Response for PingResponse {
    fn parse_payload(payload: &[u8]) -> Result<Self> {
        expect_len(payload, 1, "ping response")?;
        Ok(PingResponse { id: payload[0] })
    }
}

// --- ReceiptNotifSet (0x02) ---

pub struct SetPrnRequest(pub u16);

impl Request for SetPrnRequest {
    const OPCODE: u8 = 0x02;
    type Response = Empty;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        wire::push_u16(buf, self.0);
    }
}

// --- MtuGet (0x07) ---

pub struct MtuGetRequest;

impl Request for MtuGetRequest {
    const OPCODE: u8 = 0x07;
    type Response = MtuResponse;

    fn write_payload(&self, _buf: &mut Vec<u8>) {}
}

pub struct MtuResponse {
    pub mtu: u16,
}

impl Response for MtuResponse {
    fn parse_payload(payload: &[u8]) -> Result<Self> {
        expect_len(payload, 2, "MTU response")?;
        Ok(MtuResponse {
            mtu: wire::read_u16(payload),
        })
    }
}

// --- ObjectSelect (0x06) ---

pub struct SelectRequest(pub ObjectType);

impl Request for SelectRequest {
    const OPCODE: u8 = 0x06;
    type Response = SelectResponse;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.push(self.0 as u8);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SelectResponse {
    pub max_size: u32,
    pub offset: u32,
    pub crc: u32,
}

impl Response for SelectResponse {
    fn parse_payload(payload: &[u8]) -> Result<Self> {
        expect_len(payload, 12, "select response")?;
        Ok(SelectResponse {
            max_size: wire::read_u32(&payload[0..4]),
            offset: wire::read_u32(&payload[4..8]),
            crc: wire::read_u32(&payload[8..12]),
        })
    }
}

// --- ObjectCreate (0x01) ---

pub struct CreateObjectRequest {
    pub obj_type: ObjectType,
    pub size: u32,
}

impl Request for CreateObjectRequest {
    const OPCODE: u8 = 0x01;
    type Response = Empty;

    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.push(self.obj_type as u8);
        wire::push_u32(buf, self.size);
    }
}

// --- ObjectWrite (0x08) ---
//
// Special-cased by the transfer engine: with PRN disabled, no response is
// elicited per write, so this does not implement `Request`. It's modeled
// here only as a payload builder.

pub fn write_request_payload(chunk: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(chunk.len() + 1);
    buf.push(0x08);
    buf.extend_from_slice(chunk);
    buf
}

// --- CrcGet (0x03) ---

pub struct CrcRequest;

impl Request for CrcRequest {
    const OPCODE: u8 = 0x03;
    type Response = CrcResponse;

    fn write_payload(&self, _buf: &mut Vec<u8>) {}
}

#[derive(Debug, Clone, Copy)]
pub struct CrcResponse {
    pub offset: u32,
    pub crc: u32,
}

impl Response for CrcResponse {
    fn parse_payload(payload: &[u8]) -> Result<Self> {
        expect_len(payload, 8, "CRC response")?;
        Ok(CrcResponse {
            offset: wire::read_u32(&payload[0..4]),
            crc: wire::read_u32(&payload[4..8]),
        })
    }
}

// --- ObjectExecute (0x04) ---

pub struct ExecuteRequest;

impl Request for ExecuteRequest {
    const OPCODE: u8 = 0x04;
    type Response = Empty;

    fn write_payload(&self, _buf: &mut Vec<u8>) {}
}
