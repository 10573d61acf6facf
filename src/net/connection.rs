//! Backend connection primitives.
//!
//! # Responsibilities
//! - Resolve a backend host/port to a socket address
//! - Open TCP connections and apply socket options (no-delay, keep-alive, timeouts)
//! - Send and receive whole buffers
//! - Classify every failure as recoverable or not where it happens
//!
//! # Design Decisions
//! - Blocking I/O only; deadlines come from socket timeouts
//! - `connect` retries only on an interrupted system call
//! - A zero-byte read/write is reported as `Closed`, distinct from an I/O error
//! - Connection IDs are process-unique and only used for log correlation

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;

/// Upper bound on `EINTR` retries for a single connect.
const MAX_INTERRUPTED_RETRIES: u32 = 8;

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The network operation a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetOp {
    Resolve,
    Connect,
    Send,
    Recv,
}

impl fmt::Display for NetOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetOp::Resolve => "resolve",
            NetOp::Connect => "connect",
            NetOp::Send => "send",
            NetOp::Recv => "recv",
        };
        f.write_str(name)
    }
}

/// Error type for connection operations.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("cannot resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("no usable address for {host}:{port}")]
    NoAddress { host: String, port: u16 },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("{op} timed out after {transferred} bytes")]
    Timeout { op: NetOp, transferred: usize },

    #[error("connection closed by peer during {op} after {transferred} bytes")]
    Closed { op: NetOp, transferred: usize },

    #[error("{op} failed after {transferred} bytes: {source}")]
    Io {
        op: NetOp,
        transferred: usize,
        #[source]
        source: io::Error,
    },
}

impl NetError {
    /// The operation that failed.
    pub fn op(&self) -> NetOp {
        match self {
            NetError::Resolve { .. } | NetError::NoAddress { .. } => NetOp::Resolve,
            NetError::Connect { .. } => NetOp::Connect,
            NetError::Timeout { op, .. } | NetError::Closed { op, .. } | NetError::Io { op, .. } => *op,
        }
    }

    /// Shift the transfer count by `bytes` already moved before this call.
    pub fn after(self, bytes: usize) -> Self {
        match self {
            NetError::Timeout { op, transferred } => NetError::Timeout {
                op,
                transferred: transferred + bytes,
            },
            NetError::Closed { op, transferred } => NetError::Closed {
                op,
                transferred: transferred + bytes,
            },
            NetError::Io { op, transferred, source } => NetError::Io {
                op,
                transferred: transferred + bytes,
                source,
            },
            other => other,
        }
    }

    /// Whether the request may be retried against another backend.
    ///
    /// Connect, send and timeout failures are recoverable. On receive, only a
    /// peer that went away before delivering a single byte of the read is
    /// recoverable (typically an idle pooled connection the backend closed).
    pub fn is_recoverable(&self) -> bool {
        match self {
            NetError::Resolve { .. } | NetError::NoAddress { .. } => false,
            NetError::Connect { .. } | NetError::Timeout { .. } => true,
            NetError::Closed { op: NetOp::Recv, transferred } => *transferred == 0,
            NetError::Closed { .. } => true,
            NetError::Io { op: NetOp::Recv, transferred, source } => {
                *transferred == 0
                    && matches!(
                        source.kind(),
                        io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::BrokenPipe
                    )
            }
            NetError::Io { .. } => true,
        }
    }
}

/// Socket options applied right after a successful connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    /// Disable Nagle's algorithm.
    pub nodelay: bool,
    /// Enable SO_KEEPALIVE.
    pub keepalive: bool,
    /// Bound on connection establishment.
    pub connect_timeout: Option<Duration>,
    /// Read/write timeout for full-buffer I/O.
    pub socket_timeout: Option<Duration>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: false,
            connect_timeout: None,
            socket_timeout: None,
        }
    }
}

/// Resolve `host:port`, preferring an IPv4 address when both families exist.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, NetError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| NetError::Resolve {
            host: host.to_string(),
            port,
            source,
        })?
        .collect();

    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| NetError::NoAddress {
            host: host.to_string(),
            port,
        })
}

/// Open a TCP connection to `addr` and apply `options`.
pub fn connect(addr: SocketAddr, options: &SocketOptions) -> Result<TcpStream, NetError> {
    let mut interrupted = 0;
    let socket = loop {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|source| NetError::Connect { addr, source })?;

        let result = match options.connect_timeout {
            Some(timeout) => socket.connect_timeout(&addr.into(), timeout),
            None => socket.connect(&addr.into()),
        };

        match result {
            Ok(()) => break socket,
            Err(e) if e.kind() == io::ErrorKind::Interrupted && interrupted < MAX_INTERRUPTED_RETRIES => {
                // A fresh socket avoids EALREADY from the half-started attempt.
                interrupted += 1;
                tracing::debug!(addr = %addr, attempt = interrupted, "connect interrupted, retrying");
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                return Err(NetError::Timeout {
                    op: NetOp::Connect,
                    transferred: 0,
                });
            }
            Err(source) => return Err(NetError::Connect { addr, source }),
        }
    };

    apply_options(&socket, options).map_err(|source| NetError::Connect { addr, source })?;
    Ok(socket.into())
}

fn apply_options(socket: &Socket, options: &SocketOptions) -> io::Result<()> {
    if options.nodelay {
        socket.set_nodelay(true)?;
    }
    if options.keepalive {
        socket.set_keepalive(true)?;
    }
    socket.set_read_timeout(options.socket_timeout)?;
    socket.set_write_timeout(options.socket_timeout)?;
    Ok(())
}

fn classify(op: NetOp, transferred: usize, source: io::Error) -> NetError {
    match source.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => NetError::Timeout { op, transferred },
        _ => NetError::Io {
            op,
            transferred,
            source,
        },
    }
}

/// Write all of `data`, looping over short writes.
pub fn send_all<W: Write + ?Sized>(stream: &mut W, data: &[u8]) -> Result<(), NetError> {
    let mut sent = 0;
    while sent < data.len() {
        match stream.write(&data[sent..]) {
            Ok(0) => {
                return Err(NetError::Closed {
                    op: NetOp::Send,
                    transferred: sent,
                })
            }
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(classify(NetOp::Send, sent, e)),
        }
    }
    Ok(())
}

/// Fill `buf` completely, looping over short reads.
pub fn recv_all<R: Read + ?Sized>(stream: &mut R, buf: &mut [u8]) -> Result<(), NetError> {
    let mut received = 0;
    while received < buf.len() {
        match stream.read(&mut buf[received..]) {
            Ok(0) => {
                return Err(NetError::Closed {
                    op: NetOp::Recv,
                    transferred: received,
                })
            }
            Ok(n) => received += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(classify(NetOp::Recv, received, e)),
        }
    }
    Ok(())
}

/// An open backend connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    stream: TcpStream,
}

impl Connection {
    /// Connect to `peer` with the given options.
    pub fn open(peer: SocketAddr, options: &SocketOptions) -> Result<Self, NetError> {
        let stream = connect(peer, options)?;
        let id = ConnectionId::new();
        tracing::debug!(connection_id = %id, peer = %peer, "Backend connection opened");
        Ok(Self { id, peer, stream })
    }

    /// This connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The backend address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send the whole buffer.
    pub fn send_all(&mut self, data: &[u8]) -> Result<(), NetError> {
        send_all(&mut self.stream, data)
    }

    /// Receive exactly `buf.len()` bytes.
    pub fn recv_all(&mut self, buf: &mut [u8]) -> Result<(), NetError> {
        recv_all(&mut self.stream, buf)
    }

    /// Override the read timeout; used for bounded probes.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), NetError> {
        self.stream
            .set_read_timeout(timeout)
            .map_err(|source| NetError::Io {
                op: NetOp::Recv,
                transferred: 0,
                source,
            })
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        tracing::trace!(connection_id = %self.id, "Backend connection closed");
    }
}
