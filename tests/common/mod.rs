//! Shared utilities for integration and load testing.

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use ajp_connector::config::Properties;
use ajp_connector::observability::logging::silent_dispatch;
use ajp_connector::protocol::codes::{max_send_body, MessageType, AJP13_WS_HEADER, DEF_BUFFER_SZ};
use ajp_connector::protocol::request::decode_body_chunk;
use ajp_connector::protocol::response::{
    encode_cpong, encode_end_response, encode_get_body_chunk, encode_send_body_chunk, encode_send_headers,
};
use ajp_connector::protocol::{read_frame, write_frame, ForwardRequest, MessageBuffer};
use ajp_connector::ConnectorContext;

/// How a mock container answers each forwarded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum Behavior {
    /// 200 with `X-Backend: <name>` and the name as body; connection kept.
    Respond,
    /// 200 echoing the request body, pulled with GET_BODY_CHUNK.
    Echo,
    /// Close the connection without answering.
    CloseImmediately,
    /// Send headers, then close mid-response.
    CloseAfterHeaders,
}

/// A mock AJP13 container on a loopback port.
pub struct MockBackend {
    pub port: u16,
    requests: Arc<Mutex<Vec<ForwardRequest>>>,
    connections: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl MockBackend {
    /// Every forward request received so far.
    pub fn requests(&self) -> Vec<ForwardRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Start a mock container named `name`; each connection gets its own thread.
pub fn start_backend(name: &'static str, behavior: Behavior) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let connections = Arc::new(AtomicUsize::new(0));

    let seen = Arc::clone(&requests);
    let accepted = Arc::clone(&connections);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            accepted.fetch_add(1, Ordering::SeqCst);
            let seen = Arc::clone(&seen);
            thread::spawn(move || serve_connection(stream, name, behavior, seen));
        }
    });

    MockBackend {
        port,
        requests,
        connections,
    }
}

/// A loopback port with nothing listening on it.
#[allow(dead_code)]
pub fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Parse a configuration and build a context that logs nowhere.
#[allow(dead_code)]
pub fn context(config: &str) -> ConnectorContext {
    let props = Properties::parse(config).unwrap();
    ConnectorContext::with_dispatch(&props, silent_dispatch()).unwrap()
}

fn serve_connection(
    mut stream: TcpStream,
    name: &str,
    behavior: Behavior,
    seen: Arc<Mutex<Vec<ForwardRequest>>>,
) {
    let mut msg = MessageBuffer::new(DEF_BUFFER_SZ);
    let mut out = MessageBuffer::new(DEF_BUFFER_SZ);

    loop {
        if read_frame(&mut stream, &mut msg, AJP13_WS_HEADER).is_err() {
            return;
        }
        if msg.peek_byte().ok() == Some(MessageType::CPing.code()) {
            encode_cpong(&mut out).unwrap();
            if write_frame(&mut stream, &out).is_err() {
                return;
            }
            continue;
        }

        let request = ForwardRequest::decode(&mut msg).unwrap();
        let length: usize = request
            .headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.parse().ok())
            .unwrap_or(0);
        seen.lock().unwrap().push(request);

        match behavior {
            Behavior::CloseImmediately => return,
            Behavior::CloseAfterHeaders => {
                encode_send_headers(&mut out, 200, Some("OK"), &[]).unwrap();
                let _ = write_frame(&mut stream, &out);
                return;
            }
            Behavior::Respond => {
                if length > 0 && read_body(&mut stream, &mut msg, &mut out, length).is_err() {
                    return;
                }
                if respond(&mut stream, &mut out, name, name.as_bytes()).is_err() {
                    return;
                }
            }
            Behavior::Echo => {
                let body = match read_body(&mut stream, &mut msg, &mut out, length) {
                    Ok(body) => body,
                    Err(_) => return,
                };
                if respond(&mut stream, &mut out, name, &body).is_err() {
                    return;
                }
            }
        }
    }
}

/// Take the chunk sent with the request, then pull the rest.
fn read_body(
    stream: &mut TcpStream,
    msg: &mut MessageBuffer,
    out: &mut MessageBuffer,
    length: usize,
) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(length);
    let mut first = true;
    while body.len() < length {
        if !first {
            let want = (length - body.len()).min(max_send_body(DEF_BUFFER_SZ));
            encode_get_body_chunk(out, want as u16).unwrap();
            write_frame(stream, out).map_err(|e| std::io::Error::new(ErrorKind::Other, e.to_string()))?;
        }
        first = false;
        read_frame(stream, msg, AJP13_WS_HEADER)
            .map_err(|e| std::io::Error::new(ErrorKind::Other, e.to_string()))?;
        let chunk = decode_body_chunk(msg).unwrap();
        if chunk.is_empty() {
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn respond(stream: &mut TcpStream, out: &mut MessageBuffer, name: &str, body: &[u8]) -> std::io::Result<()> {
    let to_io = |e: ajp_connector::net::NetError| std::io::Error::new(ErrorKind::Other, e.to_string());
    let length = body.len().to_string();
    encode_send_headers(
        out,
        200,
        Some("OK"),
        &[("Content-Type", "text/plain"), ("Content-Length", &length), ("X-Backend", name)],
    )
    .unwrap();
    write_frame(stream, out).map_err(to_io)?;
    for chunk in body.chunks(4096) {
        encode_send_body_chunk(out, chunk).unwrap();
        write_frame(stream, out).map_err(to_io)?;
    }
    encode_end_response(out, true).unwrap();
    write_frame(stream, out).map_err(to_io)
}
