//! Wire-protocol types for the realtime speech service.
//!
//! The protocol is a stream of JSON events over a WebSocket, each tagged by a
//! dotted `type` string (`session.update`, `response.audio.delta`, ...).
//! Client events are strongly typed and serialized by us; server events are
//! parsed leniently so that event types this crate does not know about flow
//! through as [`server::ServerEvent::Unknown`] instead of killing the session.

pub mod client;
pub mod item;
pub mod server;
pub mod session;

pub use client::ClientEvent;
pub use item::{ContentPart, ContentType, Item, ItemRole, ItemStatus, ItemType};
pub use server::{ApiError, Inbound, ServerEvent};
pub use session::{AudioFormat, SessionConfig, ToolSpec, Transcription, TurnDetection};
