//! Adapter callbacks for body input and response output.
//!
//! # Responsibilities
//! - Define what the core needs from the host adapter: body reads, header and body writes
//! - Provide an in-memory exchange for the CLI and tests
//!
//! # Design Decisions
//! - Callback failures are client-side errors and never mark a backend as failed
//! - Headers are written once, before any body bytes

use std::io;

/// Callbacks the host adapter supplies for one request.
pub trait AdapterCallbacks {
    /// Read up to `buf.len()` bytes of the (dechunked) client body; 0 means end.
    fn read_body(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send the response status line and headers to the client.
    fn write_headers(&mut self, status: u16, reason: &str, headers: &[(String, String)]) -> io::Result<()>;

    /// Send a piece of the response body to the client.
    fn write_body(&mut self, data: &[u8]) -> io::Result<()>;
}

/// In-memory request body and captured response.
#[derive(Debug, Default, Clone)]
pub struct BufferedExchange {
    body: Vec<u8>,
    body_pos: usize,
    pub status: Option<u16>,
    pub reason: Option<String>,
    pub headers: Vec<(String, String)>,
    pub response_body: Vec<u8>,
}

impl BufferedExchange {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// First response header value, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Response body as UTF-8 text (lossy).
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.response_body).into_owned()
    }

    /// Bytes of the request body consumed so far.
    pub fn body_consumed(&self) -> usize {
        self.body_pos
    }
}

impl AdapterCallbacks for BufferedExchange {
    fn read_body(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let rest = &self.body[self.body_pos..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.body_pos += n;
        Ok(n)
    }

    fn write_headers(&mut self, status: u16, reason: &str, headers: &[(String, String)]) -> io::Result<()> {
        self.status = Some(status);
        self.reason = Some(reason.to_string());
        self.headers = headers.to_vec();
        Ok(())
    }

    fn write_body(&mut self, data: &[u8]) -> io::Result<()> {
        self.response_body.extend_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_read_in_pieces() {
        let mut exchange = BufferedExchange::new("hello world");
        let mut buf = [0u8; 5];
        assert_eq!(exchange.read_body(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(exchange.read_body(&mut buf).unwrap(), 5);
        assert_eq!(exchange.read_body(&mut buf).unwrap(), 1);
        assert_eq!(exchange.read_body(&mut buf).unwrap(), 0);
        assert_eq!(exchange.body_consumed(), 11);
    }

    #[test]
    fn test_response_captured() {
        let mut exchange = BufferedExchange::default();
        exchange
            .write_headers(200, "OK", &[("Content-Type".into(), "text/plain".into())])
            .unwrap();
        exchange.write_body(b"ab").unwrap();
        exchange.write_body(b"c").unwrap();

        assert_eq!(exchange.status, Some(200));
        assert_eq!(exchange.header("content-type"), Some("text/plain"));
        assert_eq!(exchange.body_text(), "abc");
    }
}
