//! Web-server → container messages: forward request, body chunks, CPing.

use super::buffer::MessageBuffer;
use super::codes::{self, attr, MessageType, AJP13_WS_HEADER, REQ_HEADER_PREFIX};
use super::ProtocolError;

/// A request attribute carried after the headers of a forward request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    Context(String),
    ServletPath(String),
    RemoteUser(String),
    AuthType(String),
    QueryString(String),
    JvmRoute(String),
    SslCert(String),
    SslCipher(String),
    SslSession(String),
    SslKeySize(u16),
    Secret(String),
    Request { name: String, value: String },
}

impl Attribute {
    fn code(&self) -> u8 {
        match self {
            Attribute::Context(_) => attr::CONTEXT,
            Attribute::ServletPath(_) => attr::SERVLET_PATH,
            Attribute::RemoteUser(_) => attr::REMOTE_USER,
            Attribute::AuthType(_) => attr::AUTH_TYPE,
            Attribute::QueryString(_) => attr::QUERY_STRING,
            Attribute::JvmRoute(_) => attr::JVM_ROUTE,
            Attribute::SslCert(_) => attr::SSL_CERT,
            Attribute::SslCipher(_) => attr::SSL_CIPHER,
            Attribute::SslSession(_) => attr::SSL_SESSION,
            Attribute::SslKeySize(_) => attr::SSL_KEY_SIZE,
            Attribute::Secret(_) => attr::SECRET,
            Attribute::Request { .. } => attr::REQ_ATTRIBUTE,
        }
    }

    fn encode(&self, msg: &mut MessageBuffer) -> Result<(), ProtocolError> {
        msg.append_byte(self.code())?;
        match self {
            Attribute::Context(v)
            | Attribute::ServletPath(v)
            | Attribute::RemoteUser(v)
            | Attribute::AuthType(v)
            | Attribute::QueryString(v)
            | Attribute::JvmRoute(v)
            | Attribute::SslCert(v)
            | Attribute::SslCipher(v)
            | Attribute::SslSession(v)
            | Attribute::Secret(v) => msg.append_string(Some(v)),
            Attribute::SslKeySize(size) => msg.append_u16(*size),
            Attribute::Request { name, value } => {
                msg.append_string(Some(name))?;
                msg.append_string(Some(value))
            }
        }
    }

    fn decode(code: u8, msg: &mut MessageBuffer) -> Result<Self, ProtocolError> {
        let attribute = match code {
            attr::CONTEXT => Attribute::Context(required_string(msg, "context")?),
            attr::SERVLET_PATH => Attribute::ServletPath(required_string(msg, "servlet_path")?),
            attr::REMOTE_USER => Attribute::RemoteUser(required_string(msg, "remote_user")?),
            attr::AUTH_TYPE => Attribute::AuthType(required_string(msg, "auth_type")?),
            attr::QUERY_STRING => Attribute::QueryString(required_string(msg, "query_string")?),
            attr::JVM_ROUTE => Attribute::JvmRoute(required_string(msg, "jvm_route")?),
            attr::SSL_CERT => Attribute::SslCert(required_string(msg, "ssl_cert")?),
            attr::SSL_CIPHER => Attribute::SslCipher(required_string(msg, "ssl_cipher")?),
            attr::SSL_SESSION => Attribute::SslSession(required_string(msg, "ssl_session")?),
            attr::SECRET => Attribute::Secret(required_string(msg, "secret")?),
            attr::REQ_ATTRIBUTE => {
                let name = required_string(msg, "attribute name")?;
                let value = required_string(msg, "attribute value")?;
                Attribute::Request { name, value }
            }
            attr::SSL_KEY_SIZE => Attribute::SslKeySize(msg.get_u16()?),
            other => return Err(ProtocolError::UnknownAttribute(other)),
        };
        Ok(attribute)
    }
}

fn required_string(msg: &mut MessageBuffer, field: &'static str) -> Result<String, ProtocolError> {
    msg.get_string()?.ok_or(ProtocolError::NullField(field))
}

/// The FORWARD_REQUEST message.
///
/// Well-known header names are sent as 2-byte codes and come back in
/// their lowercase form; other names round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForwardRequest {
    pub method: String,
    pub protocol: String,
    pub request_uri: String,
    pub remote_addr: String,
    pub remote_host: Option<String>,
    pub server_name: String,
    pub server_port: u16,
    pub is_ssl: bool,
    pub headers: Vec<(String, String)>,
    pub attributes: Vec<Attribute>,
}

impl ForwardRequest {
    /// Marshal into `msg`, replacing its contents and backfilling the header.
    pub fn encode(&self, msg: &mut MessageBuffer) -> Result<(), ProtocolError> {
        let method = codes::method_code(&self.method)
            .ok_or_else(|| ProtocolError::UnknownMethod(self.method.clone()))?;
        let header_count = u16::try_from(self.headers.len()).map_err(|_| ProtocolError::Overflow {
            offset: msg.len(),
            needed: self.headers.len(),
            limit: u16::MAX as usize,
        })?;

        msg.reset();
        msg.append_byte(MessageType::ForwardRequest.code())?;
        msg.append_byte(method)?;
        msg.append_string(Some(&self.protocol))?;
        msg.append_string(Some(&self.request_uri))?;
        msg.append_string(Some(&self.remote_addr))?;
        msg.append_string(self.remote_host.as_deref())?;
        msg.append_string(Some(&self.server_name))?;
        msg.append_u16(self.server_port)?;
        msg.append_byte(u8::from(self.is_ssl))?;
        msg.append_u16(header_count)?;

        for (name, value) in &self.headers {
            match codes::request_header_code(name) {
                Some(code) => msg.append_u16(code)?,
                None => msg.append_string(Some(name))?,
            }
            msg.append_string(Some(value))?;
        }

        for attribute in &self.attributes {
            attribute.encode(msg)?;
        }
        msg.append_byte(attr::ARE_DONE)?;
        msg.end(AJP13_WS_HEADER);
        Ok(())
    }

    /// Unmarshal a received FORWARD_REQUEST payload.
    pub fn decode(msg: &mut MessageBuffer) -> Result<Self, ProtocolError> {
        let kind = msg.get_byte()?;
        if kind != MessageType::ForwardRequest.code() {
            return Err(ProtocolError::UnexpectedMessage(kind));
        }
        let code = msg.get_byte()?;
        let method = codes::method_name(code)
            .ok_or(ProtocolError::UnknownMethodCode(code))?
            .to_string();

        let protocol = msg.get_string()?.ok_or(ProtocolError::NullField("protocol"))?;
        let request_uri = msg.get_string()?.ok_or(ProtocolError::NullField("req_uri"))?;
        let remote_addr = msg.get_string()?.ok_or(ProtocolError::NullField("remote_addr"))?;
        let remote_host = msg.get_string()?;
        let server_name = msg.get_string()?.ok_or(ProtocolError::NullField("server_name"))?;
        let server_port = msg.get_u16()?;
        let is_ssl = msg.get_byte()? != 0;

        let count = msg.get_u16()?;
        let mut headers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = if msg.peek_u16()? & 0xFF00 == REQ_HEADER_PREFIX {
                let code = msg.get_u16()?;
                codes::request_header_name(code)
                    .ok_or(ProtocolError::UnknownHeaderCode(code))?
                    .to_string()
            } else {
                msg.get_string()?.ok_or(ProtocolError::NullField("header name"))?
            };
            let value = msg.get_string()?.ok_or(ProtocolError::NullField("header value"))?;
            headers.push((name, value));
        }

        let mut attributes = Vec::new();
        loop {
            let code = msg.get_byte()?;
            if code == attr::ARE_DONE {
                break;
            }
            attributes.push(Attribute::decode(code, msg)?);
        }

        Ok(Self {
            method,
            protocol,
            request_uri,
            remote_addr,
            remote_host,
            server_name,
            server_port,
            is_ssl,
            headers,
            attributes,
        })
    }
}

/// Fill `msg` with a request body chunk; an empty `data` marks end of body.
pub fn encode_body_chunk(msg: &mut MessageBuffer, data: &[u8]) -> Result<(), ProtocolError> {
    msg.reset();
    if !data.is_empty() {
        msg.append_chunk(data)?;
    }
    msg.end(AJP13_WS_HEADER);
    Ok(())
}

/// Read a body chunk sent by the web server. Empty means end of body.
pub fn decode_body_chunk(msg: &mut MessageBuffer) -> Result<Vec<u8>, ProtocolError> {
    if msg.remaining() == 0 {
        return Ok(Vec::new());
    }
    let len = msg.get_u16()? as usize;
    Ok(msg.get_bytes(len)?.to_vec())
}

/// Fill `msg` with a CPING probe.
pub fn encode_cping(msg: &mut MessageBuffer) -> Result<(), ProtocolError> {
    msg.reset();
    msg.append_byte(MessageType::CPing.code())?;
    msg.end(AJP13_WS_HEADER);
    Ok(())
}
