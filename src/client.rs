//! Protocol client: one function per opcode, driving the framed
//! transport and validating every response.

use std::io::{Read, Write};

use crate::messages::{
    self, CrcRequest, CrcResponse, CreateObjectRequest, ExecuteRequest, MtuGetRequest, ObjectType,
    PingRequest, Request, SelectRequest, SelectResponse, SetPrnRequest,
};
use crate::transport::FramedTransport;
use crate::{DfuError, Result};

pub struct Client<T> {
    transport: FramedTransport<T>,
    ping_id: u8,
    mtu: u16,
}

impl<T: Read + Write> Client<T> {
    pub fn new(link: T) -> Self {
        Self {
            transport: FramedTransport::new(link),
            ping_id: 0,
            mtu: 0,
        }
    }

    /// Session handshake: ping, disable PRN, fetch MTU.
    pub fn open(&mut self) -> Result<()> {
        self.ping_id = self.ping_id.wrapping_add(1);
        let pong = self.request_response(PingRequest(self.ping_id))?;
        if pong.id != self.ping_id {
            return Err(DfuError::Protocol(format!(
                "ping id mismatch: sent {}, got {}",
                self.ping_id, pong.id
            )));
        }

        self.request_response(SetPrnRequest(0))?;

        let mtu = self.request_response(MtuGetRequest)?.mtu;
        log::debug!("negotiated MTU = {mtu} bytes");
        self.mtu = mtu;
        // Largest frame payload a write can ever carry under this MTU is
        // bounded by the MTU itself; object create/select responses are
        // small and fixed-size regardless.
        self.transport.set_max_payload(mtu as usize);
        Ok(())
    }

    /// No protocol traffic; the caller is responsible for closing the
    /// underlying link.
    pub fn close(&mut self) {}

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn select(&mut self, obj_type: ObjectType) -> Result<SelectResponse> {
        log::debug!("select {obj_type:?}");
        let resp = self.request_response(SelectRequest(obj_type))?;
        log::debug!(
            "select {obj_type:?} -> max_size={} offset={} crc=0x{:08x}",
            resp.max_size,
            resp.offset,
            resp.crc
        );
        Ok(resp)
    }

    pub fn create(&mut self, obj_type: ObjectType, size: u32) -> Result<()> {
        log::debug!("create {obj_type:?} size={size}");
        self.request_response(CreateObjectRequest { obj_type, size })
            .map(|_| ())
    }

    /// Send one `ObjectWrite` chunk. No response is elicited (PRN is
    /// disabled); progress is verified later via [`Client::crc_get`].
    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let payload = messages::write_request_payload(chunk);
        self.transport.send_frame(&payload)
    }

    pub fn crc_get(&mut self) -> Result<CrcResponse> {
        let resp = self.request_response(CrcRequest)?;
        log::debug!("crc_get -> offset={} crc=0x{:08x}", resp.offset, resp.crc);
        Ok(resp)
    }

    pub fn execute(&mut self) -> Result<()> {
        log::debug!("execute");
        self.request_response(ExecuteRequest).map(|_| ())
    }

    fn request<R: Request>(&mut self, req: R) -> Result<()> {
        let mut buf = Vec::with_capacity(16);
        buf.push(R::OPCODE);
        req.write_payload(&mut buf);
        log::trace!("--> {buf:?}");
        self.transport.send_frame(&buf)
    }

    fn request_response<R: Request>(&mut self, req: R) -> Result<R::Response> {
        self.request(req)?;
        let raw = self.transport.receive_frame()?;
        log::trace!("<-- {raw:?}");
        messages::parse_response::<R>(raw)
    }
}
