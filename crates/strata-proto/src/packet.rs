//! Packet: the request/reply unit of the data node protocol
//!
//! Header layout (big-endian, 40 bytes):
//!
//! ```text
//! magic:u8 | store_mode:u8 | opcode:u8 | result_code:u8 | crc:u32 | size:u32
//! partition_id:u32 | file_id:u64 | offset:u64 | req_id:u64
//! ```
//!
//! followed by `size` payload bytes. `size` always denotes the length of the
//! payload the unit currently carries; `data` may be longer when it is a
//! pooled full-block buffer.

use bytes::{Buf, BufMut, BytesMut};
use std::time::Instant;
use strata_common::{BufferPool, Error, Result, StoreMode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::opcode::{Opcode, ResultCode, opcode_name};

pub const PACKET_MAGIC: u8 = 0xFF;
pub const HEADER_SIZE: usize = 40;
/// Largest payload accepted on a single frame (16 MiB)
pub const MAX_PACKET_DATA: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Packet {
    pub magic: u8,
    pub store_mode: u8,
    pub opcode: u8,
    pub result_code: u8,
    pub crc: u32,
    pub size: u32,
    pub partition_id: u32,
    pub file_id: u64,
    pub offset: u64,
    pub req_id: u64,
    pub data: Vec<u8>,
    /// When the request was received
    pub start: Instant,
}

impl Packet {
    /// Build a request without payload
    #[must_use]
    pub fn new_request(opcode: Opcode, mode: StoreMode, partition_id: u32, file_id: u64) -> Self {
        Self {
            magic: PACKET_MAGIC,
            store_mode: mode.as_u8(),
            opcode: opcode as u8,
            result_code: ResultCode::Init as u8,
            crc: 0,
            size: 0,
            partition_id,
            file_id,
            offset: 0,
            req_id: 0,
            data: Vec::new(),
            start: Instant::now(),
        }
    }

    /// Attach a payload and set `size` to its length
    #[must_use]
    pub fn with_payload(mut self, data: Vec<u8>) -> Self {
        self.size = data.len() as u32;
        self.data = data;
        self
    }

    #[must_use]
    pub const fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub const fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub const fn with_crc(mut self, crc: u32) -> Self {
        self.crc = crc;
        self
    }

    #[must_use]
    pub const fn with_req_id(mut self, req_id: u64) -> Self {
        self.req_id = req_id;
        self
    }

    pub fn opcode(&self) -> Result<Opcode> {
        Opcode::try_from(self.opcode)
    }

    pub fn store_mode(&self) -> Result<StoreMode> {
        StoreMode::try_from(self.store_mode)
    }

    #[must_use]
    pub fn op_name(&self) -> String {
        opcode_name(self.opcode)
    }

    #[must_use]
    pub const fn result(&self) -> ResultCode {
        ResultCode::from_u8(self.result_code)
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        !matches!(self.result(), ResultCode::Ok | ResultCode::Init)
    }

    /// The bytes covered by `size`
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let len = (self.size as usize).min(self.data.len());
        &self.data[..len]
    }

    /// Identity string used to correlate log lines for one request
    #[must_use]
    pub fn unique_log_id(&self) -> String {
        format!(
            "req({})_dp({})_file({})_off({})_size({})_{}",
            self.req_id,
            self.partition_id,
            self.file_id,
            self.offset,
            self.size,
            self.op_name()
        )
    }

    pub fn pack_ok_reply(&mut self) {
        self.result_code = ResultCode::Ok as u8;
        self.size = 0;
    }

    /// Successful read: `data` already holds the requested bytes
    pub fn pack_ok_read_reply(&mut self) {
        self.result_code = ResultCode::Ok as u8;
        self.size = self.data.len() as u32;
    }

    pub fn pack_ok_with_body(&mut self, body: Vec<u8>) {
        self.result_code = ResultCode::Ok as u8;
        self.size = body.len() as u32;
        self.data = body;
    }

    /// Turn the unit into an error reply carrying `action: err` as text
    pub fn pack_error(&mut self, action: &str, err: &Error) {
        let msg = format!("{action}: {err}");
        self.result_code = ResultCode::from(err) as u8;
        self.size = msg.len() as u32;
        self.data = msg.into_bytes();
    }

    /// Payload interpreted as an error message
    #[must_use]
    pub fn error_text(&self) -> String {
        String::from_utf8_lossy(self.payload()).into_owned()
    }

    #[must_use]
    pub fn encode_header(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        buf.put_u8(self.magic);
        buf.put_u8(self.store_mode);
        buf.put_u8(self.opcode);
        buf.put_u8(self.result_code);
        buf.put_u32(self.crc);
        buf.put_u32(self.size);
        buf.put_u32(self.partition_id);
        buf.put_u64(self.file_id);
        buf.put_u64(self.offset);
        buf.put_u64(self.req_id);
        buf
    }

    pub fn decode_header(mut header: &[u8]) -> Result<Self> {
        if header.len() < HEADER_SIZE {
            return Err(Error::Decode(format!(
                "short header: {} bytes",
                header.len()
            )));
        }
        let magic = header.get_u8();
        if magic != PACKET_MAGIC {
            return Err(Error::Decode(format!("bad magic {magic:#04x}")));
        }
        Ok(Self {
            magic,
            store_mode: header.get_u8(),
            opcode: header.get_u8(),
            result_code: header.get_u8(),
            crc: header.get_u32(),
            size: header.get_u32(),
            partition_id: header.get_u32(),
            file_id: header.get_u64(),
            offset: header.get_u64(),
            req_id: header.get_u64(),
            data: Vec::new(),
            start: Instant::now(),
        })
    }

    /// Whether `size` payload bytes travel with this unit on the wire
    #[must_use]
    pub fn has_wire_payload(&self) -> bool {
        self.result() != ResultCode::Init
            || Opcode::try_from(self.opcode).map_or(true, Opcode::carries_payload)
    }

    /// Write header and `data[..size]` as one frame
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let payload = if self.has_wire_payload() {
            self.payload()
        } else {
            &[]
        };
        if self.has_wire_payload() && payload.len() != self.size as usize {
            return Err(Error::internal(format!(
                "packet size {} exceeds data length {}",
                self.size,
                self.data.len()
            )));
        }
        let mut frame = self.encode_header();
        frame.extend_from_slice(payload);
        writer
            .write_all(&frame)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    /// Read one frame. Returns `None` on a clean end of stream.
    ///
    /// A full-block Write payload is read into a buffer from `pool`.
    pub async fn read_from<R>(reader: &mut R, pool: &BufferPool) -> Result<Option<Self>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut header = [0u8; HEADER_SIZE];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(Error::Transport(e.to_string())),
        }
        let mut pkt = Self::decode_header(&header)?;

        if !pkt.has_wire_payload() || pkt.size == 0 {
            return Ok(Some(pkt));
        }

        let size = pkt.size as usize;
        if size > MAX_PACKET_DATA {
            return Err(Error::Decode(format!(
                "payload of {size} bytes exceeds limit {MAX_PACKET_DATA}"
            )));
        }
        let pooled = pkt.opcode == Opcode::Write as u8 && size == pool.block_size();
        let mut data = if pooled { pool.get() } else { vec![0u8; size] };
        if let Err(e) = reader.read_exact(&mut data[..size]).await {
            if pooled {
                pool.put(data);
            }
            return Err(Error::Transport(e.to_string()));
        }
        pkt.data = data;
        Ok(Some(pkt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let pkt = Packet::new_request(Opcode::Write, StoreMode::Extent, 7, 9)
            .with_offset(4096)
            .with_req_id(42)
            .with_crc(0xDEAD_BEEF)
            .with_payload(b"abc".to_vec());
        let header = pkt.encode_header();
        assert_eq!(header.len(), HEADER_SIZE);

        let decoded = Packet::decode_header(&header).unwrap();
        assert_eq!(decoded.opcode, Opcode::Write as u8);
        assert_eq!(decoded.partition_id, 7);
        assert_eq!(decoded.file_id, 9);
        assert_eq!(decoded.offset, 4096);
        assert_eq!(decoded.size, 3);
        assert_eq!(decoded.crc, 0xDEAD_BEEF);
        assert_eq!(decoded.req_id, 42);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut header = Packet::new_request(Opcode::Read, StoreMode::Extent, 1, 1).encode_header();
        header[0] = 0x01;
        assert!(matches!(Packet::decode_header(&header), Err(Error::Decode(_))));
    }

    #[test]
    fn test_pack_error_sets_size_to_message() {
        let mut pkt = Packet::new_request(Opcode::Write, StoreMode::Extent, 3, 1).with_size(4096);
        pkt.pack_error("Write", &Error::PartitionReadOnly(3));
        assert!(pkt.is_error());
        assert_eq!(pkt.result(), ResultCode::ReadOnly);
        assert_eq!(pkt.size as usize, pkt.data.len());
        assert_eq!(pkt.error_text(), "Write: partition 3 is read-only");
    }

    #[test]
    fn test_payload_respects_size_over_pooled_buffer() {
        let mut pkt = Packet::new_request(Opcode::StreamRead, StoreMode::Extent, 1, 1);
        pkt.data = vec![7u8; 16];
        pkt.size = 4;
        assert_eq!(pkt.payload(), &[7, 7, 7, 7]);
    }

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let pool = BufferPool::new(8, 4);
        let (mut client, mut server) = tokio::io::duplex(1024);

        let write = Packet::new_request(Opcode::Write, StoreMode::Extent, 1, 2)
            .with_payload(vec![1u8; 8]);
        write.write_to(&mut client).await.unwrap();
        let read = Packet::new_request(Opcode::Read, StoreMode::Extent, 1, 2).with_size(8);
        read.write_to(&mut client).await.unwrap();
        drop(client);

        let got = Packet::read_from(&mut server, &pool).await.unwrap().unwrap();
        assert_eq!(got.payload(), &[1u8; 8]);
        // full-block write payloads come from the pool
        assert_eq!(pool.outstanding(), 1);

        let got = Packet::read_from(&mut server, &pool).await.unwrap().unwrap();
        assert_eq!(got.size, 8);
        assert!(got.data.is_empty());

        assert!(Packet::read_from(&mut server, &pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_write_payload_returns_pooled_buffer() {
        let pool = BufferPool::new(8, 4);
        let (mut client, mut server) = tokio::io::duplex(1024);

        let write = Packet::new_request(Opcode::Write, StoreMode::Extent, 1, 2)
            .with_payload(vec![1u8; 8]);
        let header = write.encode_header();
        tokio::io::AsyncWriteExt::write_all(&mut client, &header).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client, &[1u8; 3]).await.unwrap();
        drop(client);

        let err = Packet::read_from(&mut server, &pool).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(pool.outstanding(), 0);
    }
}
