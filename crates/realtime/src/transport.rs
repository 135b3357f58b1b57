//! Transport seams the session manager talks through.
//!
//! The manager's driver loop `select!`s over an outbound command channel and
//! the inbound event stream, so the transport splits into independently owned
//! sink and stream halves. Tests in `parlance-core` substitute channel-backed
//! fakes for both.

use async_trait::async_trait;
use parlance_realtime_types::{ClientEvent, Inbound};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed by peer")]
    Closed,
    #[error("event serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// No credential available and no relay configured; fatal to `connect()`.
    #[error("no usable credential and no relay endpoint configured")]
    MissingCredential,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Outbound half: serializes and sends client events.
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: ClientEvent) -> Result<(), TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Inbound half: yields parsed server events until the peer closes.
#[async_trait]
pub trait EventStream: Send {
    async fn next(&mut self) -> Option<Result<Inbound, TransportError>>;
}

/// Opens a fresh transport for each session generation.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<(Box<dyn EventSink>, Box<dyn EventStream>), ConnectError>;
}
