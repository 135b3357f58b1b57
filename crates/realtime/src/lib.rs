//! WebSocket client for the realtime speech service.
//!
//! This crate owns the transport layer only: endpoint/credential handling,
//! the connection handshake, and typed send/receive over the socket. What the
//! events *mean* is the session manager's business (`parlance-core`).

pub mod client;
pub mod endpoint;
pub mod transport;

pub use client::WsConnector;
pub use endpoint::{Credential, Endpoint, DEFAULT_REALTIME_URL};
pub use transport::{ConnectError, Connector, EventSink, EventStream, TransportError};
