//! Error taxonomy for the session layer.
//!
//! The split matters operationally: `Authentication` is surfaced to the user
//! and never retried, `NotReady` is recovered locally, `Transport` drops the
//! session to its initial state and waits for an explicit reconnect, and tool
//! and decode failures never escalate past their own boundary.

use parlance_realtime::{ConnectError, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No usable credential and no relay endpoint; fatal to `connect()`.
    #[error("no usable credential and no relay endpoint configured")]
    Authentication,

    /// The operation arrived while the session was connecting or tearing
    /// down. Callers either retry after the transition or drop the request.
    #[error("session is not ready for `{0}`")]
    NotReady(&'static str),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("audio device error: {0}")]
    Device(String),
}

impl From<ConnectError> for SessionError {
    fn from(e: ConnectError) -> Self {
        match e {
            ConnectError::MissingCredential => SessionError::Authentication,
            ConnectError::Transport(t) => SessionError::Transport(t),
        }
    }
}

/// Audio artifact decode failure; degrades to "no playable artifact".
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("pcm16 payload has odd byte length {0}")]
    OddLength(usize),
    #[error("no audio bytes to decode")]
    Empty,
}

/// Tool failures, contained at the registry boundary and reported to the
/// service as a structured `{"error": ...}` output.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Handler(String),
}

impl ToolError {
    pub fn handler(e: impl std::fmt::Display) -> Self {
        ToolError::Handler(e.to_string())
    }
}
