//! Object transfer engine: per-object select → recover-or-create →
//! stream → CRC-verify → execute, including the resume/recovery algorithms
//! for picking up a partially-transferred object.

use std::io::{Read, Write};

use crate::client::Client;
use crate::messages::{ObjectType, SelectResponse};
use crate::{DfuError, Result};

/// Transfer a Command object (the init packet). At most one object is
/// ever created for this type.
pub fn transfer_init<T: Read + Write>(client: &mut Client<T>, buf: &[u8]) -> Result<()> {
    let sel = client.select(ObjectType::Command)?;
    let recovered = try_recover_init(client, buf, &sel)?;
    if recovered as usize == buf.len() {
        return Ok(());
    }

    if buf.len() as u64 > sel.max_size as u64 {
        return Err(DfuError::TooLarge {
            size: buf.len(),
            limit: sel.max_size as usize,
        });
    }

    client.create(ObjectType::Command, buf.len() as u32)?;
    stream_with_crc(client, buf, 0, buf.len(), 0)?;
    client.execute()?;
    Ok(())
}

/// Transfer a Data payload (the firmware body), chunked into objects of
/// at most `sel.max_size` bytes each.
pub fn transfer_firmware<T: Read + Write>(client: &mut Client<T>, buf: &[u8]) -> Result<()> {
    let sel = client.select(ObjectType::Data)?;
    let mut pos = try_recover_firmware(client, buf, &sel)?;
    let max_size = sel.max_size as usize;
    let mut crc = crc32fast::hash(&buf[..pos]);

    while pos < buf.len() {
        let chunk_len = (buf.len() - pos).min(max_size);
        client.create(ObjectType::Data, chunk_len as u32)?;
        crc = stream_with_crc(client, buf, pos, chunk_len, crc)?;
        client.execute()?;
        pos += chunk_len;
    }

    Ok(())
}

/// Resolves what the device already holds for the Command object and
/// resumes or discards as needed. Returns the number of bytes of `buf`
/// now accepted *and executed* on the device (either 0 or `buf.len()`).
fn try_recover_init<T: Read + Write>(
    client: &mut Client<T>,
    buf: &[u8],
    sel: &SelectResponse,
) -> Result<u32> {
    let n = buf.len() as u32;

    if sel.offset == 0 || sel.offset > n {
        return Ok(0);
    }

    let host_crc = crc32fast::hash(&buf[..sel.offset as usize]);
    if host_crc != sel.crc {
        return Ok(0);
    }

    if sel.offset == n {
        client.execute()?;
        return Ok(n);
    }

    let remainder_len = (n - sel.offset) as usize;
    match stream_with_crc(client, buf, sel.offset as usize, remainder_len, sel.crc) {
        Ok(_) => {
            client.execute()?;
            Ok(n)
        }
        Err(DfuError::CrcMismatch) => Ok(0),
        Err(e) => Err(e),
    }
}

/// Resolves what the device already holds for the current Data object
/// chain. Returns the recovered offset, which is guaranteed to be 0,
/// `buf.len()`, or a multiple of `sel.max_size`.
fn try_recover_firmware<T: Read + Write>(
    client: &mut Client<T>,
    buf: &[u8],
    sel: &SelectResponse,
) -> Result<usize> {
    let n = buf.len();
    let offset = sel.offset as usize;

    if offset > n {
        return Err(DfuError::InvalidRemoteState {
            offset: sel.offset,
            len: n,
        });
    }
    if offset == 0 {
        return Ok(0);
    }

    let max = sel.max_size as usize;
    let tail = offset % max;
    let host_crc = crc32fast::hash(&buf[..offset]);

    if host_crc != sel.crc {
        let rewind = if tail > 0 { tail } else { max };
        return Ok(offset - rewind);
    }

    if tail == 0 {
        // Every previously transferred object was already executed; the
        // main loop resumes with a fresh ObjectCreate.
        return Ok(offset);
    }

    let complete_len = max - tail;
    match stream_with_crc(client, buf, offset, complete_len, sel.crc) {
        Ok(_) => {
            client.execute()?;
            Ok(offset + complete_len)
        }
        Err(DfuError::CrcMismatch) => Ok(offset - tail),
        Err(e) => Err(e),
    }
}

/// Stream `buf[offset..offset+len]` as a sequence of MTU-bounded
/// `ObjectWrite`s, then verify the result with a trailing `CrcGet`.
/// Returns the new running CRC over every byte accepted since the last
/// object-type reset.
fn stream_with_crc<T: Read + Write>(
    client: &mut Client<T>,
    buf: &[u8],
    offset: usize,
    len: usize,
    initial_crc: u32,
) -> Result<u32> {
    let mtu = client.mtu();
    if mtu < 5 {
        return Err(DfuError::MtuTooSmall(mtu));
    }
    let write_max = (mtu as usize - 1) / 2 - 1;

    let mut p = 0;
    while p < len {
        let step = (len - p).min(write_max);
        client.write_chunk(&buf[offset + p..offset + p + step])?;
        p += step;
    }

    let mut hasher = crc32fast::Hasher::new_with_initial(initial_crc);
    hasher.update(&buf[offset..offset + len]);
    let crc = hasher.finalize();

    let resp = client.crc_get()?;
    let expected_offset = (offset + len) as u32;
    if resp.offset != expected_offset || resp.crc != crc {
        log::debug!(
            "crc mismatch: expected offset {expected_offset} crc 0x{crc:08x}, device reported offset {} crc 0x{:08x}",
            resp.offset,
            resp.crc
        );
        return Err(DfuError::CrcMismatch);
    }

    Ok(crc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    struct MockLink {
        to_read: VecDeque<Vec<u8>>,
        written: Rc<RefCell<Vec<u8>>>,
    }

    impl Read for MockLink {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.to_read.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                }
                None => Ok(0),
            }
        }
    }

    impl Write for MockLink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn framed(bytes: &[u8]) -> Vec<u8> {
        let mut encoded = Vec::new();
        crate::slip::encode(bytes, &mut encoded);
        encoded
    }

    fn client_with_mtu(mtu: u16, frames: Vec<Vec<u8>>) -> Client<MockLink> {
        client_with_mtu_tracked(mtu, frames).0
    }

    /// Like `client_with_mtu`, but also returns a handle to everything the
    /// client has written to the link (post-handshake), SLIP frames and
    /// all, so tests can check how many times a given opcode was sent.
    fn client_with_mtu_tracked(
        mtu: u16,
        mut frames: Vec<Vec<u8>>,
    ) -> (Client<MockLink>, Rc<RefCell<Vec<u8>>>) {
        // Reserve the first three responses for the open() handshake.
        let mut handshake = vec![
            framed(&[0x60, 0x09, 0x01, 0x01]),
            framed(&[0x60, 0x02, 0x01]),
            framed(&{
                let mut b = vec![0x60, 0x07, 0x01];
                crate::wire::push_u16(&mut b, mtu);
                b
            }),
        ];
        handshake.append(&mut frames);
        let written = Rc::new(RefCell::new(Vec::new()));
        let link = MockLink {
            to_read: VecDeque::from(handshake),
            written: written.clone(),
        };
        let mut client = Client::new(link);
        client.open().unwrap();
        // The handshake's own request frames aren't interesting to callers
        // counting opcodes in the object-transfer phase.
        written.borrow_mut().clear();
        (client, written)
    }

    /// Decodes every complete SLIP frame in `written` and returns each
    /// frame's opcode (first byte), in the order they were sent.
    fn sent_opcodes(written: &Rc<RefCell<Vec<u8>>>) -> Vec<u8> {
        let bytes = written.borrow();
        let mut decoder = crate::slip::Decoder::new();
        let mut payload = Vec::new();
        let mut opcodes = Vec::new();
        for &b in bytes.iter() {
            match decoder.feed(b, &mut payload).unwrap() {
                crate::slip::Decoded::Pending => {}
                crate::slip::Decoded::Frame { empty: false } => {
                    opcodes.push(payload[0]);
                    payload.clear();
                    decoder = crate::slip::Decoder::new();
                }
                crate::slip::Decoded::Frame { empty: true } => {
                    decoder = crate::slip::Decoder::new();
                }
            }
        }
        opcodes
    }

    #[test]
    fn recover_init_returns_zero_when_offset_is_zero() {
        let mut client = client_with_mtu(64, vec![]);
        let buf = vec![1u8, 2, 3, 4];
        let sel = SelectResponse {
            max_size: 512,
            offset: 0,
            crc: 0,
        };
        assert_eq!(try_recover_init(&mut client, &buf, &sel).unwrap(), 0);
    }

    #[test]
    fn recover_init_completes_when_offset_equals_len_and_crc_matches() {
        let buf = vec![1u8, 2, 3, 4, 5];
        let crc = crc32fast::hash(&buf);
        let mut client = client_with_mtu(
            64,
            vec![framed(&[0x60, 0x04, 0x01])], // execute ok
        );
        let sel = SelectResponse {
            max_size: 512,
            offset: buf.len() as u32,
            crc,
        };
        assert_eq!(
            try_recover_init(&mut client, &buf, &sel).unwrap(),
            buf.len() as u32
        );
    }

    #[test]
    fn recover_firmware_rewinds_on_stale_crc() {
        let buf = vec![7u8; 10_000];
        let mut client = client_with_mtu(512, vec![]);
        let sel = SelectResponse {
            max_size: 4096,
            offset: 5000,
            crc: 0xdead_beef, // deliberately wrong
        };
        let recovered = try_recover_firmware(&mut client, &buf, &sel).unwrap();
        assert_eq!(recovered, 4096);
    }

    #[test]
    fn recover_firmware_no_op_when_offset_zero() {
        let buf = vec![7u8; 100];
        let mut client = client_with_mtu(512, vec![]);
        let sel = SelectResponse {
            max_size: 4096,
            offset: 0,
            crc: 0,
        };
        assert_eq!(try_recover_firmware(&mut client, &buf, &sel).unwrap(), 0);
    }

    #[test]
    fn recover_firmware_resumes_aligned_offset_without_streaming() {
        let buf = vec![9u8; 8192];
        let crc = crc32fast::hash(&buf[..4096]);
        let mut client = client_with_mtu(512, vec![]);
        let sel = SelectResponse {
            max_size: 4096,
            offset: 4096,
            crc,
        };
        assert_eq!(try_recover_firmware(&mut client, &buf, &sel).unwrap(), 4096);
    }

    #[test]
    fn recover_firmware_rejects_offset_beyond_buffer() {
        let buf = vec![9u8; 100];
        let mut client = client_with_mtu(512, vec![]);
        let sel = SelectResponse {
            max_size: 4096,
            offset: 200,
            crc: 0,
        };
        assert!(matches!(
            try_recover_firmware(&mut client, &buf, &sel),
            Err(DfuError::InvalidRemoteState { offset: 200, len: 100 })
        ));
    }

    #[test]
    fn stream_with_crc_rejects_too_small_mtu() {
        let mut client = client_with_mtu(4, vec![]);
        let buf = vec![1u8, 2, 3];
        assert!(matches!(
            stream_with_crc(&mut client, &buf, 0, buf.len(), 0),
            Err(DfuError::MtuTooSmall(4))
        ));
    }

    #[test]
    fn transfer_init_clean_sends_create_write_crc_execute() {
        let buf = vec![0xABu8; 128];
        let crc = crc32fast::hash(&buf);
        let mut client = client_with_mtu(
            64,
            vec![
                framed(&{
                    // ObjectSelect response: max=512, offset=0, crc=0
                    let mut b = vec![0x60, 0x06, 0x01];
                    crate::wire::push_u32(&mut b, 512);
                    crate::wire::push_u32(&mut b, 0);
                    crate::wire::push_u32(&mut b, 0);
                    b
                }),
                framed(&[0x60, 0x01, 0x01]), // ObjectCreate ok
                framed(&{
                    // CrcGet response: offset=128, crc matches
                    let mut b = vec![0x60, 0x03, 0x01];
                    crate::wire::push_u32(&mut b, buf.len() as u32);
                    crate::wire::push_u32(&mut b, crc);
                    b
                }),
                framed(&[0x60, 0x04, 0x01]), // ObjectExecute ok
            ],
        );
        transfer_init(&mut client, &buf).unwrap();
    }

    #[test]
    fn transfer_init_resume_complete_only_executes() {
        let buf = vec![0x11u8; 200];
        let crc = crc32fast::hash(&buf);
        let mut client = client_with_mtu(
            64,
            vec![
                framed(&{
                    let mut b = vec![0x60, 0x06, 0x01];
                    crate::wire::push_u32(&mut b, 512);
                    crate::wire::push_u32(&mut b, buf.len() as u32);
                    crate::wire::push_u32(&mut b, crc);
                    b
                }),
                framed(&[0x60, 0x04, 0x01]), // ObjectExecute ok (recovery path)
            ],
        );
        transfer_init(&mut client, &buf).unwrap();
    }

    /// Spec seed scenario S6: firmware 10,000 bytes, max=4096, device
    /// reports offset=5000 with a matching CRC. The engine should complete
    /// the in-progress object by streaming the remaining 3192 bytes up to
    /// the 8192-byte object boundary, execute it, then transfer the final
    /// 1808-byte object from scratch — one `ObjectCreate`/`ObjectExecute`
    /// pair for the new object, none for the one being completed.
    #[test]
    fn transfer_firmware_s6_partial_object_resume() {
        let buf: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
        let crc_at = |n: usize| crc32fast::hash(&buf[..n]);

        let (mut client, written) = client_with_mtu_tracked(
            512,
            vec![
                framed(&{
                    // ObjectSelect: max=4096, offset=5000, crc matches buf[..5000]
                    let mut b = vec![0x60, 0x06, 0x01];
                    crate::wire::push_u32(&mut b, 4096);
                    crate::wire::push_u32(&mut b, 5000);
                    crate::wire::push_u32(&mut b, crc_at(5000));
                    b
                }),
                framed(&{
                    // CrcGet completing the partial object: offset=8192
                    let mut b = vec![0x60, 0x03, 0x01];
                    crate::wire::push_u32(&mut b, 8192);
                    crate::wire::push_u32(&mut b, crc_at(8192));
                    b
                }),
                framed(&[0x60, 0x04, 0x01]), // execute the completed object
                framed(&[0x60, 0x01, 0x01]), // create the final 1808-byte object
                framed(&{
                    // CrcGet for the final object: offset=10000
                    let mut b = vec![0x60, 0x03, 0x01];
                    crate::wire::push_u32(&mut b, 10_000);
                    crate::wire::push_u32(&mut b, crc_at(10_000));
                    b
                }),
                framed(&[0x60, 0x04, 0x01]), // execute the final object
            ],
        );

        transfer_firmware(&mut client, &buf).unwrap();

        let opcodes = sent_opcodes(&written);
        assert_eq!(opcodes.iter().filter(|&&op| op == 0x01).count(), 1);
        assert_eq!(opcodes.iter().filter(|&&op| op == 0x04).count(), 2);
        assert_eq!(opcodes.iter().filter(|&&op| op == 0x03).count(), 2);
    }

    /// A fresh (non-resumed) firmware transfer spanning multiple objects:
    /// 10,000 bytes at max=4096 must create exactly `ceil(10000/4096) == 3`
    /// objects, one `ObjectExecute` per object, per spec.md §8 property 4.
    #[test]
    fn transfer_firmware_fresh_spans_multiple_objects() {
        let buf: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
        let crc_at = |n: usize| crc32fast::hash(&buf[..n]);

        let crc_get_response = |offset: u32, crc: u32| {
            framed(&{
                let mut b = vec![0x60, 0x03, 0x01];
                crate::wire::push_u32(&mut b, offset);
                crate::wire::push_u32(&mut b, crc);
                b
            })
        };

        let (mut client, written) = client_with_mtu_tracked(
            512,
            vec![
                framed(&{
                    // ObjectSelect: fresh, offset=0
                    let mut b = vec![0x60, 0x06, 0x01];
                    crate::wire::push_u32(&mut b, 4096);
                    crate::wire::push_u32(&mut b, 0);
                    crate::wire::push_u32(&mut b, 0);
                    b
                }),
                framed(&[0x60, 0x01, 0x01]), // create object 1 (4096 bytes)
                crc_get_response(4096, crc_at(4096)),
                framed(&[0x60, 0x04, 0x01]), // execute object 1
                framed(&[0x60, 0x01, 0x01]), // create object 2 (4096 bytes)
                crc_get_response(8192, crc_at(8192)),
                framed(&[0x60, 0x04, 0x01]), // execute object 2
                framed(&[0x60, 0x01, 0x01]), // create object 3 (1808 bytes)
                crc_get_response(10_000, crc_at(10_000)),
                framed(&[0x60, 0x04, 0x01]), // execute object 3
            ],
        );

        transfer_firmware(&mut client, &buf).unwrap();

        let opcodes = sent_opcodes(&written);
        assert_eq!(opcodes.iter().filter(|&&op| op == 0x01).count(), 3);
        assert_eq!(opcodes.iter().filter(|&&op| op == 0x04).count(), 3);
    }
}
