//! Simple AJP13 worker: one backend address.
//!
//! # Responsibilities
//! - Resolve the backend at validate time and keep socket options
//! - Run one AJP13 exchange per `service` call
//! - Reuse connections through the endpoint cache when the backend allows it
//!
//! # Design Decisions
//! - Connections open lazily, on the first exchange of an endpoint
//! - A cached connection that fails before any response byte is replaced once
//! - The END_RESPONSE reuse flag decides whether the connection goes back to the cache
//! - With `prepost_timeout`, cached connections are probed with CPing before use
//! - Timeouts, keep-alive, the secret and cache limits follow `refresh`; the
//!   backend address and packet size are fixed once validated

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::config::{AjpSettings, ConfigError, Properties, WorkerType};
use crate::net::connection::resolve;
use crate::net::{Connection, NetError, SocketOptions};
use crate::observability::metrics;
use crate::protocol::codes::{max_send_body, MessageType, AJP13_SW_HEADER};
use crate::protocol::request::{encode_body_chunk, encode_cping};
use crate::protocol::{
    read_frame, write_frame, Attribute, ForwardRequest, FrameError, MessageBuffer, ProtocolError,
    ResponseMessage,
};
use crate::worker::cache::EndpointCache;
use crate::worker::status::AjpStatus;
use crate::worker::{Endpoint, ServiceError, ServiceRequest, StateCell, Worker, WorkerState, WorkerStatus};

/// A single AJP13 backend.
#[derive(Debug)]
pub struct Ajp13Worker {
    name: String,
    state: StateCell,
    settings: ArcSwap<AjpSettings>,
    address: Option<SocketAddr>,
    options: ArcSwap<SocketOptions>,
    cache: Option<EndpointCache<EndpointSlot>>,
    requests: AtomicU64,
    errors: AtomicU64,
}

/// What an endpoint keeps between requests.
#[derive(Debug)]
struct EndpointSlot {
    connection: Option<Connection>,
    request: MessageBuffer,
    reply: MessageBuffer,
    body: Vec<u8>,
}

impl EndpointSlot {
    fn new(packet_size: usize) -> Self {
        Self {
            connection: None,
            request: MessageBuffer::new(packet_size),
            reply: MessageBuffer::new(packet_size),
            body: Vec::new(),
        }
    }
}

impl Ajp13Worker {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: StateCell::new(),
            settings: ArcSwap::from_pointee(AjpSettings::default()),
            address: None,
            options: ArcSwap::from_pointee(SocketOptions::default()),
            cache: None,
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Settings currently in effect.
    pub fn settings(&self) -> Arc<AjpSettings> {
        self.settings.load_full()
    }

    /// Backend address, known once validated.
    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    /// Connections currently parked in the cache.
    pub fn cached_endpoints(&self) -> usize {
        self.cache.as_ref().map_or(0, EndpointCache::len)
    }

    fn transport(&self, source: NetError, req: &ServiceRequest<'_>) -> ServiceError {
        let recoverable = source.is_recoverable() && !req.response_started() && !req.body_streamed();
        ServiceError::Transport {
            worker: self.name.clone(),
            source,
            recoverable,
        }
    }

    fn protocol(&self, source: ProtocolError) -> ServiceError {
        ServiceError::Protocol {
            worker: self.name.clone(),
            source,
        }
    }

    fn frame_error(&self, err: FrameError, req: &ServiceRequest<'_>) -> ServiceError {
        match err {
            FrameError::Net(e) => self.transport(e, req),
            FrameError::Protocol(e) => self.protocol(e),
        }
    }

    fn forward_request(&self, req: &ServiceRequest<'_>) -> ForwardRequest {
        let d = req.descriptor;
        let mut attributes = Vec::new();
        if let Some(user) = &d.remote_user {
            attributes.push(Attribute::RemoteUser(user.clone()));
        }
        if let Some(auth) = &d.auth_type {
            attributes.push(Attribute::AuthType(auth.clone()));
        }
        if let Some(query) = &d.query_string {
            attributes.push(Attribute::QueryString(query.clone()));
        }
        if let Some(route) = &req.route {
            attributes.push(Attribute::JvmRoute(route.clone()));
        }
        if let Some(ssl) = &d.ssl {
            if let Some(cert) = &ssl.cert {
                attributes.push(Attribute::SslCert(cert.clone()));
            }
            if let Some(cipher) = &ssl.cipher {
                attributes.push(Attribute::SslCipher(cipher.clone()));
            }
            if let Some(session) = &ssl.session {
                attributes.push(Attribute::SslSession(session.clone()));
            }
            if let Some(size) = ssl.key_size {
                attributes.push(Attribute::SslKeySize(size));
            }
        }
        if let Some(secret) = &self.settings.load().secret {
            attributes.push(Attribute::Secret(secret.clone()));
        }
        for (name, value) in &d.attributes {
            attributes.push(Attribute::Request {
                name: name.clone(),
                value: value.clone(),
            });
        }

        ForwardRequest {
            method: d.method.clone(),
            protocol: d.protocol.clone(),
            request_uri: d.uri.clone(),
            remote_addr: d.remote_addr.clone(),
            remote_host: d.remote_host.clone(),
            server_name: d.server_name.clone(),
            server_port: d.server_port,
            is_ssl: d.is_ssl(),
            headers: d.headers.clone(),
            attributes,
        }
    }

    /// Probe a cached connection; drop it if the backend does not answer.
    fn probe(&self, connection: &mut Option<Connection>, request: &mut MessageBuffer, reply: &mut MessageBuffer) {
        let settings = self.settings.load();
        let (Some(conn), Some(timeout)) = (connection.as_mut(), settings.prepost_timeout()) else {
            return;
        };
        if let Err(e) = cping(conn, request, reply, timeout, settings.socket_timeout()) {
            tracing::debug!(worker = %self.name, error = %e, "CPing failed, discarding cached connection");
            *connection = None;
        }
    }

    /// One request/response exchange. Returns the status and the reuse flag.
    fn exchange(&self, slot: &mut EndpointSlot, req: &mut ServiceRequest<'_>) -> Result<(u16, bool), ServiceError> {
        let EndpointSlot {
            connection,
            request,
            reply,
            body,
        } = slot;

        self.probe(connection, request, reply);
        if connection.is_none() {
            let addr = self.address.ok_or_else(|| ServiceError::NoEndpoint {
                worker: self.name.clone(),
            })?;
            let opened = Connection::open(addr, &self.options.load()).map_err(|e| self.transport(e, req))?;
            *connection = Some(opened);
        }
        let Some(conn) = connection.as_mut() else {
            return Err(ServiceError::NoEndpoint {
                worker: self.name.clone(),
            });
        };

        self.forward_request(req)
            .encode(request)
            .map_err(|e| self.protocol(e))?;
        tracing::debug!(
            worker = %self.name,
            connection_id = %conn.id(),
            uri = %req.descriptor.uri,
            "Forwarding request"
        );
        write_frame(conn, request).map_err(|e| self.transport(e, req))?;

        let first = req.first_body_chunk()?;
        if !first.is_empty() {
            encode_body_chunk(request, first).map_err(|e| self.protocol(e))?;
            write_frame(conn, request).map_err(|e| self.transport(e, req))?;
        }

        let mut status = None;
        loop {
            read_frame(conn, reply, AJP13_SW_HEADER).map_err(|e| self.frame_error(e, req))?;
            match ResponseMessage::decode(reply).map_err(|e| self.protocol(e))? {
                ResponseMessage::SendHeaders {
                    status: code,
                    reason,
                    headers,
                } => {
                    tracing::debug!(worker = %self.name, status = code, "Response headers received");
                    req.write_headers(code, reason.as_deref().unwrap_or_default(), &headers)?;
                    status = Some(code);
                }
                ResponseMessage::SendBodyChunk(data) => req.write_body(data)?,
                ResponseMessage::GetBodyChunk { requested } => {
                    let want = usize::from(requested).min(max_send_body(request.capacity()));
                    body.resize(want, 0);
                    let n = req.read_body_chunk(&mut body[..want])?;
                    encode_body_chunk(request, &body[..n]).map_err(|e| self.protocol(e))?;
                    write_frame(conn, request).map_err(|e| self.transport(e, req))?;
                }
                ResponseMessage::EndResponse { reuse } => {
                    return match status {
                        Some(code) => Ok((code, reuse)),
                        None => Err(self.protocol(ProtocolError::UnexpectedMessage(
                            MessageType::EndResponse.code(),
                        ))),
                    };
                }
                ResponseMessage::CPong => {
                    return Err(self.protocol(ProtocolError::UnexpectedMessage(MessageType::CPong.code())));
                }
            }
        }
    }
}

/// Send CPING and wait up to `timeout` for CPONG.
fn cping(
    conn: &mut Connection,
    request: &mut MessageBuffer,
    reply: &mut MessageBuffer,
    timeout: Duration,
    restore: Option<Duration>,
) -> Result<(), FrameError> {
    encode_cping(request)?;
    write_frame(conn, request)?;
    conn.set_read_timeout(Some(timeout))?;
    let answer = read_frame(conn, reply, AJP13_SW_HEADER).and_then(|_| {
        match ResponseMessage::decode(reply)? {
            ResponseMessage::CPong => Ok(()),
            other => Err(ProtocolError::UnexpectedMessage(other.message_type().code()).into()),
        }
    });
    conn.set_read_timeout(restore)?;
    answer
}

impl Worker for Ajp13Worker {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> WorkerType {
        WorkerType::Ajp13
    }

    fn state(&self) -> WorkerState {
        self.state.get()
    }

    fn validate(&mut self, props: &Properties) -> Result<(), ConfigError> {
        let settings = AjpSettings::from_properties(&self.name, props)?;
        let address = resolve(&settings.host, settings.port).map_err(|e| ConfigError::InvalidValue {
            key: Properties::worker_key(&self.name, "host"),
            value: format!("{}:{} ({})", settings.host, settings.port, e),
        })?;
        self.state
            .transition(&self.name, WorkerState::Unvalidated, WorkerState::Validated)?;

        self.options.store(Arc::new(socket_options(&settings)));
        self.settings.store(Arc::new(settings));
        self.address = Some(address);
        tracing::debug!(worker = %self.name, address = %address, "Worker validated");
        Ok(())
    }

    fn init(&mut self, _props: &Properties) -> Result<(), ConfigError> {
        self.state
            .transition(&self.name, WorkerState::Validated, WorkerState::Initialized)?;
        let settings = self.settings.load();
        self.cache = Some(EndpointCache::new(settings.cache_size, settings.cache_timeout()));
        Ok(())
    }

    fn get_endpoint(&self) -> Result<Box<dyn Endpoint + '_>, ServiceError> {
        self.state.ensure_ready(&self.name)?;
        let Some(cache) = &self.cache else {
            return Err(ServiceError::NoEndpoint {
                worker: self.name.clone(),
            });
        };
        let slot = cache
            .take()
            .unwrap_or_else(|| EndpointSlot::new(self.settings.load().max_packet_size));
        Ok(Box::new(AjpEndpoint {
            worker: self,
            slot: Some(slot),
            reuse: false,
        }))
    }

    fn destroy(&self) {
        self.state.set(WorkerState::Destroyed);
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    fn status(&self) -> WorkerStatus {
        let settings = self.settings.load();
        let mut status = WorkerStatus::new(&self.name, WorkerType::Ajp13, self.state.get());
        status.ajp = Some(AjpStatus {
            host: settings.host.clone(),
            port: settings.port,
            address: self.address.map(|a| a.to_string()),
            cached_endpoints: self.cached_endpoints(),
            cache_capacity: self.cache.as_ref().map_or(settings.cache_size, EndpointCache::capacity),
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        });
        status
    }

    fn check_refresh(&self, props: &Properties) -> Result<(), ConfigError> {
        AjpSettings::from_properties(&self.name, props).map(|_| ())
    }

    fn refresh(&self, props: &Properties) -> Result<(), ConfigError> {
        let mut settings = AjpSettings::from_properties(&self.name, props)?;
        let current = self.settings.load_full();
        if settings.host != current.host
            || settings.port != current.port
            || settings.max_packet_size != current.max_packet_size
        {
            tracing::warn!(
                worker = %self.name,
                host = %settings.host,
                port = settings.port,
                max_packet_size = settings.max_packet_size,
                "Backend address and packet size only change on restart, keeping current values"
            );
            settings.host = current.host.clone();
            settings.port = current.port;
            settings.max_packet_size = current.max_packet_size;
        }

        let options = socket_options(&settings);
        let options_changed = **self.options.load() != options;
        self.options.store(Arc::new(options));
        if let Some(cache) = &self.cache {
            cache.reconfigure(settings.cache_size, settings.cache_timeout());
            // Pooled sockets keep the timeouts they were opened with.
            if options_changed {
                cache.clear();
            }
        }
        self.settings.store(Arc::new(settings));
        tracing::info!(worker = %self.name, "Worker settings refreshed");
        Ok(())
    }
}

fn socket_options(settings: &AjpSettings) -> SocketOptions {
    SocketOptions {
        nodelay: true,
        keepalive: settings.socket_keepalive,
        connect_timeout: settings.connect_timeout(),
        socket_timeout: settings.socket_timeout(),
    }
}

/// Request-scoped endpoint of an `Ajp13Worker`.
struct AjpEndpoint<'w> {
    worker: &'w Ajp13Worker,
    slot: Option<EndpointSlot>,
    reuse: bool,
}

impl Endpoint for AjpEndpoint<'_> {
    fn service(&mut self, req: &mut ServiceRequest<'_>) -> Result<u16, ServiceError> {
        let worker = self.worker;
        worker.state.ensure_ready(&worker.name)?;
        let Some(slot) = self.slot.as_mut() else {
            return Err(ServiceError::NoEndpoint {
                worker: worker.name.clone(),
            });
        };
        worker.requests.fetch_add(1, Ordering::Relaxed);
        self.reuse = false;

        let cached = slot.connection.is_some();
        let mut result = worker.exchange(slot, req);
        if cached {
            if let Err(e @ ServiceError::Transport { recoverable: true, .. }) = &result {
                tracing::debug!(worker = %worker.name, error = %e, "Cached connection failed, reconnecting");
                slot.connection = None;
                result = worker.exchange(slot, req);
            }
        }

        match result {
            Ok((status, reuse)) => {
                self.reuse = reuse;
                if !reuse {
                    slot.connection = None;
                }
                Ok(status)
            }
            Err(e) => {
                slot.connection = None;
                if !e.is_client_error() {
                    worker.errors.fetch_add(1, Ordering::Relaxed);
                    metrics::record_worker_error(&worker.name, e.is_recoverable());
                    tracing::debug!(worker = %worker.name, error = %e, recoverable = e.is_recoverable(), "Exchange failed");
                }
                Err(e)
            }
        }
    }
}

impl Drop for AjpEndpoint<'_> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        if !self.reuse || slot.connection.is_none() || self.worker.state.get() != WorkerState::Initialized {
            return;
        }
        if let Some(cache) = &self.worker.cache {
            if !cache.put(slot) {
                tracing::trace!(worker = %self.worker.name, "Endpoint cache full, closing connection");
            }
        }
    }
}
