//! AJP13 protocol constants and code tables.

/// Magic of frames sent from the web server to the container.
pub const AJP13_WS_HEADER: u16 = 0x1234;

/// Magic of frames sent from the container to the web server (`AB`).
pub const AJP13_SW_HEADER: u16 = 0x4142;

/// Default (and minimum) packet size.
pub const DEF_BUFFER_SZ: usize = 8 * 1024;

/// Largest packet size a worker may be configured with.
pub const MAX_BUFFER_SZ: usize = 64 * 1024;

/// Frame header: 2-byte magic + 2-byte payload length.
pub const HEADER_LEN: usize = 4;

/// Header plus the 2-byte chunk length of a body frame.
pub const BODY_CHUNK_OVERHEAD: usize = HEADER_LEN + 2;

/// Largest request body chunk for a given packet size.
pub const fn max_send_body(packet_size: usize) -> usize {
    packet_size - BODY_CHUNK_OVERHEAD
}

/// Prefix of the coded request header names.
pub const REQ_HEADER_PREFIX: u16 = 0xA000;

/// Message type, the first payload byte of every non-body frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    ForwardRequest = 2,
    SendBodyChunk = 3,
    SendHeaders = 4,
    EndResponse = 5,
    GetBodyChunk = 6,
    Shutdown = 7,
    CPong = 9,
    CPing = 10,
}

impl MessageType {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(MessageType::ForwardRequest),
            3 => Ok(MessageType::SendBodyChunk),
            4 => Ok(MessageType::SendHeaders),
            5 => Ok(MessageType::EndResponse),
            6 => Ok(MessageType::GetBodyChunk),
            7 => Ok(MessageType::Shutdown),
            9 => Ok(MessageType::CPong),
            10 => Ok(MessageType::CPing),
            other => Err(other),
        }
    }
}

/// Request method names in code order, starting at code 1.
const METHODS: [&str; 27] = [
    "OPTIONS",
    "GET",
    "HEAD",
    "POST",
    "PUT",
    "DELETE",
    "TRACE",
    "PROPFIND",
    "PROPPATCH",
    "MKCOL",
    "COPY",
    "MOVE",
    "LOCK",
    "UNLOCK",
    "ACL",
    "REPORT",
    "VERSION-CONTROL",
    "CHECKIN",
    "CHECKOUT",
    "UNCHECKOUT",
    "SEARCH",
    "MKWORKSPACE",
    "UPDATE",
    "LABEL",
    "MERGE",
    "BASELINE-CONTROL",
    "MKACTIVITY",
];

/// Wire code for an HTTP method, matched case-sensitively as methods are.
pub fn method_code(method: &str) -> Option<u8> {
    METHODS
        .iter()
        .position(|m| *m == method)
        .map(|idx| (idx + 1) as u8)
}

/// Method name for a wire code.
pub fn method_name(code: u8) -> Option<&'static str> {
    METHODS.get((code as usize).checked_sub(1)?).copied()
}

/// Request headers with a 2-byte code, lowercase, in code order from 0xA001.
const REQUEST_HEADERS: [&str; 14] = [
    "accept",
    "accept-charset",
    "accept-encoding",
    "accept-language",
    "authorization",
    "connection",
    "content-type",
    "content-length",
    "cookie",
    "cookie2",
    "host",
    "pragma",
    "referer",
    "user-agent",
];

/// Code for a well-known request header (case-insensitive).
pub fn request_header_code(name: &str) -> Option<u16> {
    REQUEST_HEADERS
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
        .map(|idx| REQ_HEADER_PREFIX + idx as u16 + 1)
}

/// Header name for a request header code.
pub fn request_header_name(code: u16) -> Option<&'static str> {
    let idx = code.checked_sub(REQ_HEADER_PREFIX + 1)? as usize;
    REQUEST_HEADERS.get(idx).copied()
}

/// Response headers with a 2-byte code, in code order from 0xA001.
const RESPONSE_HEADERS: [&str; 11] = [
    "Content-Type",
    "Content-Language",
    "Content-Length",
    "Date",
    "Last-Modified",
    "Location",
    "Set-Cookie",
    "Set-Cookie2",
    "Servlet-Engine",
    "Status",
    "WWW-Authenticate",
];

/// Code for a well-known response header (case-insensitive).
pub fn response_header_code(name: &str) -> Option<u16> {
    RESPONSE_HEADERS
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
        .map(|idx| REQ_HEADER_PREFIX + idx as u16 + 1)
}

/// Header name for a response header code.
pub fn response_header_name(code: u16) -> Option<&'static str> {
    let idx = code.checked_sub(REQ_HEADER_PREFIX + 1)? as usize;
    RESPONSE_HEADERS.get(idx).copied()
}

/// Request attribute codes.
pub mod attr {
    pub const CONTEXT: u8 = 1;
    pub const SERVLET_PATH: u8 = 2;
    pub const REMOTE_USER: u8 = 3;
    pub const AUTH_TYPE: u8 = 4;
    pub const QUERY_STRING: u8 = 5;
    pub const JVM_ROUTE: u8 = 6;
    pub const SSL_CERT: u8 = 7;
    pub const SSL_CIPHER: u8 = 8;
    pub const SSL_SESSION: u8 = 9;
    pub const REQ_ATTRIBUTE: u8 = 10;
    pub const SSL_KEY_SIZE: u8 = 11;
    pub const SECRET: u8 = 12;
    pub const ARE_DONE: u8 = 0xFF;
}
