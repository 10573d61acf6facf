//! Bounds-checked AJP message buffer.
//!
//! # Responsibilities
//! - Append big-endian integers, strings and raw bytes after the 4-byte header
//! - Backfill the header (magic + payload length) once the payload is complete
//! - Validate a received header and read typed fields back out
//!
//! # Design Decisions
//! - The backing storage is allocated once at `capacity` and reused per request
//! - A failed append leaves the write position untouched
//! - A failed read leaves the read position untouched

use std::fmt::Write as _;

use super::codes::HEADER_LEN;
use super::ProtocolError;

/// Length sentinel of a null string.
const NULL_STRING: u16 = 0xFFFF;

/// A fixed-capacity AJP frame.
///
/// Invariant: `HEADER_LEN <= pos <= len <= capacity` after any operation
/// other than a header receive (where `pos` is rewound to the payload start).
#[derive(Clone)]
pub struct MessageBuffer {
    buf: Vec<u8>,
    len: usize,
    pos: usize,
}

impl MessageBuffer {
    /// Create an empty buffer of `capacity` bytes (header included).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(HEADER_LEN);
        Self {
            buf: vec![0; capacity],
            len: HEADER_LEN,
            pos: HEADER_LEN,
        }
    }

    /// Rewind to just past the header.
    pub fn reset(&mut self) {
        self.len = HEADER_LEN;
        self.pos = HEADER_LEN;
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Total frame length, header included.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == HEADER_LEN
    }

    /// Payload length (frame length minus header).
    pub fn payload_len(&self) -> usize {
        self.len - HEADER_LEN
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read in the payload.
    pub fn remaining(&self) -> usize {
        self.len - self.pos
    }

    /// The whole frame as it goes on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn reserve(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.len + needed > self.buf.len() {
            return Err(ProtocolError::Overflow {
                offset: self.len,
                needed,
                limit: self.buf.len(),
            });
        }
        Ok(())
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    pub fn append_byte(&mut self, value: u8) -> Result<(), ProtocolError> {
        self.reserve(1)?;
        self.put(&[value]);
        Ok(())
    }

    pub fn append_u16(&mut self, value: u16) -> Result<(), ProtocolError> {
        self.reserve(2)?;
        self.put(&value.to_be_bytes());
        Ok(())
    }

    pub fn append_u32(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.reserve(4)?;
        self.put(&value.to_be_bytes());
        Ok(())
    }

    /// Append a length-prefixed, NUL-terminated string; `None` encodes as `0xFFFF`.
    pub fn append_string(&mut self, value: Option<&str>) -> Result<(), ProtocolError> {
        let Some(value) = value else {
            return self.append_u16(NULL_STRING);
        };
        let bytes = value.as_bytes();
        let needed = 2 + bytes.len() + 1;
        if bytes.len() >= NULL_STRING as usize {
            return Err(ProtocolError::Overflow {
                offset: self.len,
                needed,
                limit: self.buf.len(),
            });
        }
        self.reserve(needed)?;
        self.put(&(bytes.len() as u16).to_be_bytes());
        self.put(bytes);
        self.put(&[0]);
        Ok(())
    }

    /// Append raw bytes with no length prefix.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.reserve(bytes.len())?;
        self.put(bytes);
        Ok(())
    }

    /// Append a body chunk: 2-byte length followed by the data.
    pub fn append_chunk(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let needed = 2 + data.len();
        if data.len() > u16::MAX as usize {
            return Err(ProtocolError::Overflow {
                offset: self.len,
                needed,
                limit: self.buf.len(),
            });
        }
        self.reserve(needed)?;
        self.put(&(data.len() as u16).to_be_bytes());
        self.put(data);
        Ok(())
    }

    /// Backfill the header with `magic` and the payload length.
    pub fn end(&mut self, magic: u16) {
        let payload = (self.len - HEADER_LEN) as u16;
        self.buf[0..2].copy_from_slice(&magic.to_be_bytes());
        self.buf[2..4].copy_from_slice(&payload.to_be_bytes());
    }

    /// Storage for receiving a frame header.
    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..HEADER_LEN]
    }

    /// Validate a received header and size the buffer for its payload.
    ///
    /// Returns the payload length. After this call `payload_mut` exposes
    /// exactly the bytes still to be received.
    pub fn parse_header(&mut self, expected_magic: u16) -> Result<usize, ProtocolError> {
        let found = u16::from_be_bytes([self.buf[0], self.buf[1]]);
        if found != expected_magic {
            return Err(ProtocolError::BadMagic {
                expected: expected_magic,
                found,
            });
        }
        let payload = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
        if payload > self.buf.len() - HEADER_LEN {
            return Err(ProtocolError::FrameTooLarge {
                len: payload,
                capacity: self.buf.len(),
            });
        }
        self.len = HEADER_LEN + payload;
        self.pos = HEADER_LEN;
        Ok(payload)
    }

    /// Storage for receiving the payload announced by `parse_header`.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buf[HEADER_LEN..self.len]
    }

    fn take(&mut self, size: usize) -> Result<&[u8], ProtocolError> {
        if self.pos + size > self.len {
            return Err(ProtocolError::Overflow {
                offset: self.pos,
                needed: size,
                limit: self.len,
            });
        }
        let start = self.pos;
        self.pos += size;
        Ok(&self.buf[start..start + size])
    }

    pub fn get_byte(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn peek_byte(&self) -> Result<u8, ProtocolError> {
        if self.pos + 1 > self.len {
            return Err(ProtocolError::Overflow {
                offset: self.pos,
                needed: 1,
                limit: self.len,
            });
        }
        Ok(self.buf[self.pos])
    }

    pub fn get_u16(&mut self) -> Result<u16, ProtocolError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn peek_u16(&self) -> Result<u16, ProtocolError> {
        if self.pos + 2 > self.len {
            return Err(ProtocolError::Overflow {
                offset: self.pos,
                needed: 2,
                limit: self.len,
            });
        }
        Ok(u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a string written by `append_string`; `0xFFFF` yields `None`.
    ///
    /// Bytes that are not valid UTF-8 are read as ISO-8859-1, one char per
    /// byte, since containers send header values in that charset.
    pub fn get_string(&mut self) -> Result<Option<String>, ProtocolError> {
        let start = self.pos;
        let size = self.get_u16()?;
        if size == NULL_STRING {
            return Ok(None);
        }
        let size = size as usize;
        if self.pos + size + 1 > self.len {
            let offset = self.pos;
            self.pos = start;
            return Err(ProtocolError::Overflow {
                offset,
                needed: size + 1,
                limit: self.len,
            });
        }
        let bytes = &self.buf[self.pos..self.pos + size];
        let value = match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
        };
        self.pos += size + 1;
        Ok(Some(value))
    }

    /// Read `size` raw bytes.
    pub fn get_bytes(&mut self, size: usize) -> Result<&[u8], ProtocolError> {
        self.take(size)
    }

    /// Hex dump of the frame, 16 bytes per line, for trace logging.
    pub fn dump(&self) -> String {
        let mut out = String::with_capacity(self.len * 4);
        for (line, chunk) in self.as_bytes().chunks(16).enumerate() {
            let _ = write!(out, "{:04x}:", line * 16);
            for byte in chunk {
                let _ = write!(out, " {byte:02x}");
            }
            out.push_str("  ");
            for byte in chunk {
                out.push(if byte.is_ascii_graphic() { *byte as char } else { '.' });
            }
            out.push('\n');
        }
        out
    }
}

impl std::fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBuffer")
            .field("capacity", &self.buf.len())
            .field("len", &self.len)
            .field("pos", &self.pos)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codes::AJP13_WS_HEADER;

    #[test]
    fn test_header_backfill() {
        let mut msg = MessageBuffer::new(64);
        msg.append_byte(2).unwrap();
        msg.append_u16(0x0102).unwrap();
        msg.end(AJP13_WS_HEADER);
        assert_eq!(msg.as_bytes(), &[0x12, 0x34, 0x00, 0x03, 0x02, 0x01, 0x02]);
    }

    #[test]
    fn test_string_encoding() {
        let mut msg = MessageBuffer::new(64);
        msg.append_string(Some("ab")).unwrap();
        msg.append_string(None).unwrap();
        assert_eq!(&msg.as_bytes()[4..], &[0x00, 0x02, b'a', b'b', 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn test_null_and_empty_strings_read_back_distinctly() {
        let mut msg = MessageBuffer::new(64);
        msg.append_string(None).unwrap();
        msg.append_string(Some("")).unwrap();
        msg.append_u32(0xDEADBEEF).unwrap();

        assert_eq!(msg.get_string().unwrap(), None);
        assert_eq!(msg.get_string().unwrap(), Some(String::new()));
        assert_eq!(msg.get_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(msg.remaining(), 0);
    }

    #[test]
    fn test_append_overflow_leaves_position_unchanged() {
        let mut msg = MessageBuffer::new(10);
        msg.append_u32(7).unwrap();
        assert_eq!(msg.len(), 8);

        let err = msg.append_string(Some("abc")).unwrap_err();
        assert!(matches!(err, ProtocolError::Overflow { offset: 8, needed: 6, limit: 10 }));
        assert_eq!(msg.len(), 8);

        assert!(msg.append_u32(1).is_err());
        assert_eq!(msg.len(), 8);

        msg.append_u16(1).unwrap();
        assert_eq!(msg.len(), 10);
        assert!(msg.append_byte(1).is_err());
        assert_eq!(msg.len(), msg.capacity());
    }

    #[test]
    fn test_read_past_end_fails() {
        let mut msg = MessageBuffer::new(16);
        msg.append_byte(1).unwrap();
        assert_eq!(msg.get_byte().unwrap(), 1);
        assert!(msg.get_u16().is_err());
        assert_eq!(msg.position(), 5);
    }

    #[test]
    fn test_latin1_string_is_decoded_per_byte() {
        let mut msg = MessageBuffer::new(32);
        msg.append_u16(3).unwrap();
        msg.append_bytes(&[b'c', 0xE9, b'x', 0x00]).unwrap();
        msg.append_string(Some("café")).unwrap();

        assert_eq!(msg.get_string().unwrap().as_deref(), Some("céx"));
        assert_eq!(msg.get_string().unwrap().as_deref(), Some("café"));
        assert_eq!(msg.remaining(), 0);
    }

    #[test]
    fn test_truncated_string_rewinds() {
        let mut msg = MessageBuffer::new(16);
        msg.append_u16(10).unwrap();
        msg.append_bytes(b"abc").unwrap();
        assert!(msg.get_string().is_err());
        assert_eq!(msg.position(), 4);
    }

    #[test]
    fn test_parse_header_validates_magic_and_length() {
        let mut msg = MessageBuffer::new(16);
        msg.header_mut().copy_from_slice(&[0x41, 0x42, 0x00, 0x03]);
        assert_eq!(msg.parse_header(0x4142).unwrap(), 3);
        assert_eq!(msg.payload_mut().len(), 3);

        msg.header_mut().copy_from_slice(&[0x12, 0x34, 0x00, 0x03]);
        assert!(matches!(
            msg.parse_header(0x4142),
            Err(ProtocolError::BadMagic { found: 0x1234, .. })
        ));

        msg.header_mut().copy_from_slice(&[0x41, 0x42, 0x00, 0x20]);
        assert!(matches!(
            msg.parse_header(0x4142),
            Err(ProtocolError::FrameTooLarge { len: 32, .. })
        ));
    }

    #[test]
    fn test_reset_rewinds_past_header() {
        let mut msg = MessageBuffer::new(32);
        msg.append_string(Some("hello")).unwrap();
        msg.reset();
        assert!(msg.is_empty());
        assert_eq!(msg.position(), 4);
    }

    #[test]
    fn test_dump_format() {
        let mut msg = MessageBuffer::new(32);
        msg.append_bytes(b"AB").unwrap();
        msg.end(AJP13_WS_HEADER);
        let dump = msg.dump();
        assert!(dump.starts_with("0000: 12 34 00 02 41 42"));
    }
}
