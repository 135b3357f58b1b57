//! Parlance core: the realtime session manager and its satellites.
//!
//! The session manager (`session`) owns the single live connection to the
//! speech service. Around it sit the conversation item list (`conversation`),
//! the diagnostic event log and typed subscriptions (`events`), the tool
//! registry and built-in tools (`tools`, `builtin`), and the collaborator
//! seams for audio devices, weather, and wallet (`audio`, `weather`,
//! `wallet`). Everything here is transport-agnostic; the WebSocket lives in
//! `parlance-realtime`.

pub mod audio;
pub mod builtin;
pub mod conversation;
pub mod error;
pub mod events;
pub mod memory;
pub mod session;
pub mod tools;
pub mod wallet;
pub mod weather;

pub use builtin::{ConsoleState, Marker, ToolContext, register_builtin_tools};
pub use error::{DecodeError, SessionError, ToolError};
pub use session::{
    ConnectionState, SessionConfigUpdate, SessionManager, SessionOptions, TurnDetectionMode,
};
