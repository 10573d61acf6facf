//! AJP13 message codec.
//!
//! # Data Flow
//! ```text
//! ForwardRequest ──encode──→ MessageBuffer ──write_frame──→ backend
//!                                                   │
//! AdapterCallbacks ←── ResponseMessage ←──decode── read_frame (magic + length checked)
//! ```
//!
//! # Design Decisions
//! - One `MessageBuffer` per endpoint, reused for every frame of a request
//! - Every append/read is bounds-checked; overflow is an error, never a write past the end
//! - A malformed frame makes the connection unusable (`ProtocolError` is never recoverable)

pub mod buffer;
pub mod codes;
pub mod request;
pub mod response;

use std::io::{Read, Write};

use thiserror::Error;

use crate::net::connection::{recv_all, send_all};
use crate::net::NetError;

pub use buffer::MessageBuffer;
pub use request::{Attribute, ForwardRequest};
pub use response::ResponseMessage;

/// Codec and framing errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("buffer overflow: {needed} bytes at offset {offset} exceed limit {limit}")]
    Overflow {
        offset: usize,
        needed: usize,
        limit: usize,
    },

    #[error("bad frame magic {found:#06x}, expected {expected:#06x}")]
    BadMagic { expected: u16, found: u16 },

    #[error("frame payload of {len} bytes exceeds buffer capacity {capacity}")]
    FrameTooLarge { len: usize, capacity: usize },

    #[error("method {0:?} has no AJP13 code")]
    UnknownMethod(String),

    #[error("unknown method code {0}")]
    UnknownMethodCode(u8),

    #[error("unknown header code {0:#06x}")]
    UnknownHeaderCode(u16),

    #[error("unknown attribute code {0}")]
    UnknownAttribute(u8),

    #[error("unexpected message type {0}")]
    UnexpectedMessage(u8),

    #[error("required field {0} is null")]
    NullField(&'static str),
}

/// Failure while moving a frame over a connection.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Send a completed frame.
pub fn write_frame<W: Write + ?Sized>(stream: &mut W, msg: &MessageBuffer) -> Result<(), NetError> {
    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!(len = msg.len(), "sending frame\n{}", msg.dump());
    }
    send_all(stream, msg.as_bytes())
}

/// Receive one frame with the given magic into `msg`; returns the payload length.
///
/// Transfer counts in errors include the header bytes, so a failure while
/// reading the payload is never mistaken for a clean close.
pub fn read_frame<R: Read + ?Sized>(
    stream: &mut R,
    msg: &mut MessageBuffer,
    magic: u16,
) -> Result<usize, FrameError> {
    recv_all(stream, msg.header_mut())?;
    let len = msg.parse_header(magic)?;
    recv_all(stream, msg.payload_mut()).map_err(|e| e.after(codes::HEADER_LEN))?;
    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!(len, "received frame\n{}", msg.dump());
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::NetOp;
    use std::io::Cursor;

    #[test]
    fn test_read_frame_from_stream() {
        let mut out = MessageBuffer::new(64);
        response::encode_end_response(&mut out, true).unwrap();
        let mut wire = Vec::new();
        write_frame(&mut wire, &out).unwrap();

        let mut msg = MessageBuffer::new(64);
        let len = read_frame(&mut Cursor::new(wire), &mut msg, codes::AJP13_SW_HEADER).unwrap();
        assert_eq!(len, 2);
        assert_eq!(
            ResponseMessage::decode(&mut msg).unwrap(),
            ResponseMessage::EndResponse { reuse: true }
        );
    }

    #[test]
    fn test_truncated_payload_is_not_a_clean_close() {
        let wire = vec![0x41, 0x42, 0x00, 0x05, 0x03];
        let mut msg = MessageBuffer::new(64);
        let err = read_frame(&mut Cursor::new(wire), &mut msg, codes::AJP13_SW_HEADER).unwrap_err();
        match err {
            FrameError::Net(e) => {
                assert!(matches!(e, NetError::Closed { op: NetOp::Recv, transferred: 5 }));
                assert!(!e.is_recoverable());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_wrong_magic_is_protocol_error() {
        let wire = vec![0x12, 0x34, 0x00, 0x00];
        let mut msg = MessageBuffer::new(64);
        let err = read_frame(&mut Cursor::new(wire), &mut msg, codes::AJP13_SW_HEADER).unwrap_err();
        assert!(matches!(err, FrameError::Protocol(ProtocolError::BadMagic { .. })));
    }
}
