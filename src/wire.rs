//! Little-endian integer pack/unpack helpers for protocol fields.

use byteorder::{ByteOrder, LE};

pub fn push_u16(dst: &mut Vec<u8>, v: u16) {
    let mut buf = [0u8; 2];
    LE::write_u16(&mut buf, v);
    dst.extend_from_slice(&buf);
}

pub fn push_u32(dst: &mut Vec<u8>, v: u32) {
    let mut buf = [0u8; 4];
    LE::write_u32(&mut buf, v);
    dst.extend_from_slice(&buf);
}

pub fn read_u16(src: &[u8]) -> u16 {
    LE::read_u16(src)
}

pub fn read_u32(src: &[u8]) -> u32 {
    LE::read_u32(src)
}
