//! Request descriptor handed over by the host adapter.
//!
//! # Responsibilities
//! - Carry method, normalized URI, query string and headers
//! - Carry client/server network identity and TLS attributes
//! - Give the core a request ID for log correlation
//!
//! # Design Decisions
//! - Read-only for the duration of one `service` call
//! - The adapter has already dechunked and validated the client body
//! - Header lookups are case-insensitive; order and duplicates are preserved

use uuid::Uuid;

/// TLS attributes of the client connection, when it arrived over TLS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SslAttributes {
    pub cert: Option<String>,
    pub cipher: Option<String>,
    pub session: Option<String>,
    pub key_size: Option<u16>,
}

/// Canonical description of one incoming HTTP request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub request_id: Uuid,
    pub method: String,
    pub protocol: String,
    /// Decoded, normalized path; may still carry a `;jsessionid=` parameter.
    pub uri: String,
    pub query_string: Option<String>,
    pub headers: Vec<(String, String)>,
    pub remote_addr: String,
    pub remote_host: Option<String>,
    pub remote_user: Option<String>,
    pub auth_type: Option<String>,
    pub server_name: String,
    pub server_port: u16,
    pub ssl: Option<SslAttributes>,
    /// Extra request attributes forwarded to the container.
    pub attributes: Vec<(String, String)>,
}

impl RequestDescriptor {
    /// A request with local defaults for everything but method and URI.
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method: method.into(),
            protocol: "HTTP/1.1".to_string(),
            uri: uri.into(),
            query_string: None,
            headers: Vec::new(),
            remote_addr: "127.0.0.1".to_string(),
            remote_host: None,
            remote_user: None,
            auth_type: None,
            server_name: "localhost".to_string(),
            server_port: 80,
            ssl: None,
            attributes: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query_string = Some(query.into());
        self
    }

    pub fn with_remote(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = addr.into();
        self
    }

    pub fn with_server(mut self, name: impl Into<String>, port: u16) -> Self {
        self.server_name = name.into();
        self.server_port = port;
        self
    }

    pub fn with_ssl(mut self, ssl: SslAttributes) -> Self {
        self.ssl = Some(ssl);
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of a header, in order.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Declared body length; `None` when absent or unparsable.
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")?.trim().parse().ok()
    }

    pub fn is_ssl(&self) -> bool {
        self.ssl.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_case_insensitive() {
        let req = RequestDescriptor::new("GET", "/app/index.jsp")
            .with_header("Host", "example.com")
            .with_header("Cookie", "a=1")
            .with_header("cookie", "b=2");

        assert_eq!(req.header("host"), Some("example.com"));
        assert_eq!(req.header_values("COOKIE").collect::<Vec<_>>(), vec!["a=1", "b=2"]);
        assert_eq!(req.header("accept"), None);
    }

    #[test]
    fn test_content_length() {
        let req = RequestDescriptor::new("POST", "/upload").with_header("Content-Length", " 42 ");
        assert_eq!(req.content_length(), Some(42));

        let req = RequestDescriptor::new("POST", "/upload").with_header("Content-Length", "lots");
        assert_eq!(req.content_length(), None);
    }

    #[test]
    fn test_request_ids_differ() {
        let a = RequestDescriptor::new("GET", "/");
        let b = RequestDescriptor::new("GET", "/");
        assert_ne!(a.request_id, b.request_id);
        assert!(!a.is_ssl());
    }
}
