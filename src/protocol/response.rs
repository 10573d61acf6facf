//! Container → web-server messages.

use super::buffer::MessageBuffer;
use super::codes::{self, MessageType, AJP13_SW_HEADER, REQ_HEADER_PREFIX};
use super::ProtocolError;

/// A decoded reply frame. Body chunks borrow from the receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum ResponseMessage<'a> {
    SendHeaders {
        status: u16,
        reason: Option<String>,
        headers: Vec<(String, String)>,
    },
    SendBodyChunk(&'a [u8]),
    GetBodyChunk { requested: u16 },
    EndResponse { reuse: bool },
    CPong,
}

impl<'a> ResponseMessage<'a> {
    /// Decode the payload of a frame received with the `AB` magic.
    pub fn decode(msg: &'a mut MessageBuffer) -> Result<Self, ProtocolError> {
        let code = msg.get_byte()?;
        let kind = MessageType::try_from(code).map_err(ProtocolError::UnexpectedMessage)?;
        match kind {
            MessageType::SendHeaders => {
                let status = msg.get_u16()?;
                let reason = msg.get_string()?;
                let count = msg.get_u16()?;
                let mut headers = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let name = if msg.peek_u16()? & 0xFF00 == REQ_HEADER_PREFIX {
                        let code = msg.get_u16()?;
                        codes::response_header_name(code)
                            .ok_or(ProtocolError::UnknownHeaderCode(code))?
                            .to_string()
                    } else {
                        msg.get_string()?.ok_or(ProtocolError::NullField("header name"))?
                    };
                    let value = msg.get_string()?.unwrap_or_default();
                    headers.push((name, value));
                }
                Ok(ResponseMessage::SendHeaders {
                    status,
                    reason,
                    headers,
                })
            }
            MessageType::SendBodyChunk => {
                let len = msg.get_u16()? as usize;
                Ok(ResponseMessage::SendBodyChunk(msg.get_bytes(len)?))
            }
            MessageType::GetBodyChunk => Ok(ResponseMessage::GetBodyChunk {
                requested: msg.get_u16()?,
            }),
            MessageType::EndResponse => {
                // Older containers omit the reuse flag.
                let reuse = msg.remaining() > 0 && msg.get_byte()? == 1;
                Ok(ResponseMessage::EndResponse { reuse })
            }
            MessageType::CPong => Ok(ResponseMessage::CPong),
            other => Err(ProtocolError::UnexpectedMessage(other.code())),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            ResponseMessage::SendHeaders { .. } => MessageType::SendHeaders,
            ResponseMessage::SendBodyChunk(_) => MessageType::SendBodyChunk,
            ResponseMessage::GetBodyChunk { .. } => MessageType::GetBodyChunk,
            ResponseMessage::EndResponse { .. } => MessageType::EndResponse,
            ResponseMessage::CPong => MessageType::CPong,
        }
    }
}

/// Fill `msg` with a SEND_HEADERS frame.
pub fn encode_send_headers(
    msg: &mut MessageBuffer,
    status: u16,
    reason: Option<&str>,
    headers: &[(&str, &str)],
) -> Result<(), ProtocolError> {
    msg.reset();
    msg.append_byte(MessageType::SendHeaders.code())?;
    msg.append_u16(status)?;
    msg.append_string(reason)?;
    msg.append_u16(headers.len() as u16)?;
    for (name, value) in headers {
        match codes::response_header_code(name) {
            Some(code) => msg.append_u16(code)?,
            None => msg.append_string(Some(name))?,
        }
        msg.append_string(Some(value))?;
    }
    msg.end(AJP13_SW_HEADER);
    Ok(())
}

/// Fill `msg` with a SEND_BODY_CHUNK frame (data followed by a NUL).
pub fn encode_send_body_chunk(msg: &mut MessageBuffer, data: &[u8]) -> Result<(), ProtocolError> {
    msg.reset();
    msg.append_byte(MessageType::SendBodyChunk.code())?;
    msg.append_chunk(data)?;
    msg.append_byte(0)?;
    msg.end(AJP13_SW_HEADER);
    Ok(())
}

/// Fill `msg` with a GET_BODY_CHUNK frame.
pub fn encode_get_body_chunk(msg: &mut MessageBuffer, requested: u16) -> Result<(), ProtocolError> {
    msg.reset();
    msg.append_byte(MessageType::GetBodyChunk.code())?;
    msg.append_u16(requested)?;
    msg.end(AJP13_SW_HEADER);
    Ok(())
}

/// Fill `msg` with an END_RESPONSE frame.
pub fn encode_end_response(msg: &mut MessageBuffer, reuse: bool) -> Result<(), ProtocolError> {
    msg.reset();
    msg.append_byte(MessageType::EndResponse.code())?;
    msg.append_byte(u8::from(reuse))?;
    msg.end(AJP13_SW_HEADER);
    Ok(())
}

/// Fill `msg` with a CPONG reply.
pub fn encode_cpong(msg: &mut MessageBuffer) -> Result<(), ProtocolError> {
    msg.reset();
    msg.append_byte(MessageType::CPong.code())?;
    msg.end(AJP13_SW_HEADER);
    Ok(())
}
