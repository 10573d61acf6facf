//! AJP13 connector library
//!
//! The dispatch and transport core of a web-server-to-servlet-container
//! connector. A host adapter hands over one request at a time; the
//! connector picks a worker, speaks AJP13 to the backend and streams the
//! reply back through the adapter's callbacks.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────┐
//!                         │                 ConnectorContext                 │
//!                         │                                                  │
//!   Adapter request       │  ┌─────────┐    ┌───────────┐    ┌───────────┐   │
//!   ──────────────────────┼─▶│  http   │───▶│  routing  │───▶│  worker   │   │
//!                         │  │descript.│    │  URI map  │    │ registry  │   │
//!                         │  └─────────┘    └───────────┘    └─────┬─────┘   │
//!                         │                                        │         │
//!                         │                          ┌─────────────┴───┐     │
//!                         │                          ▼                 ▼     │
//!                         │                  ┌──────────────┐   ┌─────────┐  │
//!                         │                  │load_balancer │──▶│  ajp13  │  │
//!                         │                  │sticky/failover│  │endpoint │  │
//!                         │                  └──────────────┘   └────┬────┘  │
//!                         │                                          │       │
//!   Adapter callbacks     │  ┌─────────┐    ┌───────────┐    ┌───────▼─────┐ │
//!   ◀─────────────────────┼──│  http   │◀───│ protocol  │◀───│     net     │◀┼──── Backend
//!                         │  │callbacks│    │  codec    │    │ connection  │ │     container
//!                         │  └─────────┘    └───────────┘    └─────────────┘ │
//!                         │                                                  │
//!                         │  ┌────────────────────────────────────────────┐  │
//!                         │  │ config (properties, validation, watcher)   │  │
//!                         │  │ observability (dispatch, spans, metrics)   │  │
//!                         │  └────────────────────────────────────────────┘  │
//!                         └──────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod protocol;
pub mod routing;

// Dispatch
pub mod context;
pub mod load_balancer;
pub mod worker;

// Cross-cutting concerns
pub mod observability;

pub use config::{ConfigError, Mount, Properties};
pub use context::ConnectorContext;
pub use http::{AdapterCallbacks, BufferedExchange, RequestDescriptor, SslAttributes};
pub use routing::UriWorkerMap;
pub use worker::{ServiceError, Worker, WorkerRegistry, WorkerStatus};
