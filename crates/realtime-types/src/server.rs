//! Events received from the service.
//!
//! Parsing is deliberately lenient: the wire format is owned by the remote
//! service, so anything we cannot decode into a known variant becomes
//! [`ServerEvent::Unknown`] and is left to the caller to log. A malformed body
//! on a known type is treated the same way rather than tearing the session
//! down.

use crate::item::{ContentPart, Item};
use serde::Deserialize;
use serde_json::Value;

/// A structured error reported by the service via the `error` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
enum KnownServerEvent {
    #[serde(rename = "error")]
    Error { error: ApiError },

    #[serde(rename = "session.created")]
    SessionCreated { session: Value },
    #[serde(rename = "session.updated")]
    SessionUpdated { session: Value },

    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        #[serde(default)]
        previous_item_id: Option<String>,
        item: Item,
    },
    #[serde(rename = "conversation.item.deleted")]
    ConversationItemDeleted { item_id: String },
    #[serde(rename = "conversation.item.truncated")]
    ConversationItemTruncated { item_id: String, audio_end_ms: u64 },
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputAudioTranscriptionDelta {
        item_id: String,
        delta: String,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted {
        item_id: String,
        transcript: String,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
        #[serde(default)]
        item_id: Option<String>,
    },
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        item_id: Option<String>,
    },
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "response.created")]
    ResponseCreated { response: Value },
    #[serde(rename = "response.output_item.added")]
    ResponseOutputItemAdded { item: Item },
    #[serde(rename = "response.output_item.done")]
    ResponseOutputItemDone { item: Item },
    #[serde(rename = "response.content_part.added")]
    ResponseContentPartAdded { item_id: String, part: ContentPart },
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { item_id: String, delta: String },
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone { item_id: String },
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta { item_id: String, delta: String },
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone { item_id: String, transcript: String },
    #[serde(rename = "response.text.delta")]
    ResponseTextDelta { item_id: String, delta: String },
    #[serde(rename = "response.text.done")]
    ResponseTextDone { item_id: String, text: String },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        call_id: String,
        delta: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        #[serde(default)]
        name: Option<String>,
        arguments: String,
        #[serde(default)]
        item_id: Option<String>,
    },
    #[serde(rename = "response.done")]
    ResponseDone { response: Value },

    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated { rate_limits: Value },
}

/// A parsed server event. Mirrors [`KnownServerEvent`] plus the `Unknown`
/// catch-all.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Error { error: ApiError },
    SessionCreated { session: Value },
    SessionUpdated { session: Value },
    ConversationItemCreated { previous_item_id: Option<String>, item: Item },
    ConversationItemDeleted { item_id: String },
    ConversationItemTruncated { item_id: String, audio_end_ms: u64 },
    InputAudioTranscriptionDelta { item_id: String, delta: String },
    InputAudioTranscriptionCompleted { item_id: String, transcript: String },
    SpeechStarted { audio_start_ms: Option<u64>, item_id: Option<String> },
    SpeechStopped { item_id: Option<String> },
    InputAudioBufferCommitted { item_id: Option<String> },
    ResponseCreated { response: Value },
    ResponseOutputItemAdded { item: Item },
    ResponseOutputItemDone { item: Item },
    ResponseContentPartAdded { item_id: String, part: ContentPart },
    ResponseAudioDelta { item_id: String, delta: String },
    ResponseAudioDone { item_id: String },
    ResponseAudioTranscriptDelta { item_id: String, delta: String },
    ResponseAudioTranscriptDone { item_id: String, transcript: String },
    ResponseTextDelta { item_id: String, delta: String },
    ResponseTextDone { item_id: String, text: String },
    FunctionCallArgumentsDelta { call_id: String, delta: String },
    FunctionCallArgumentsDone {
        call_id: String,
        name: Option<String>,
        arguments: String,
        item_id: Option<String>,
    },
    ResponseDone { response: Value },
    RateLimitsUpdated { rate_limits: Value },
    /// Any event type this crate does not model.
    Unknown { event_type: String, payload: Value },
}

impl From<KnownServerEvent> for ServerEvent {
    fn from(known: KnownServerEvent) -> Self {
        match known {
            KnownServerEvent::Error { error } => ServerEvent::Error { error },
            KnownServerEvent::SessionCreated { session } => ServerEvent::SessionCreated { session },
            KnownServerEvent::SessionUpdated { session } => ServerEvent::SessionUpdated { session },
            KnownServerEvent::ConversationItemCreated { previous_item_id, item } => {
                ServerEvent::ConversationItemCreated { previous_item_id, item }
            }
            KnownServerEvent::ConversationItemDeleted { item_id } => {
                ServerEvent::ConversationItemDeleted { item_id }
            }
            KnownServerEvent::ConversationItemTruncated { item_id, audio_end_ms } => {
                ServerEvent::ConversationItemTruncated { item_id, audio_end_ms }
            }
            KnownServerEvent::InputAudioTranscriptionDelta { item_id, delta } => {
                ServerEvent::InputAudioTranscriptionDelta { item_id, delta }
            }
            KnownServerEvent::InputAudioTranscriptionCompleted { item_id, transcript } => {
                ServerEvent::InputAudioTranscriptionCompleted { item_id, transcript }
            }
            KnownServerEvent::SpeechStarted { audio_start_ms, item_id } => {
                ServerEvent::SpeechStarted { audio_start_ms, item_id }
            }
            KnownServerEvent::SpeechStopped { item_id } => ServerEvent::SpeechStopped { item_id },
            KnownServerEvent::InputAudioBufferCommitted { item_id } => {
                ServerEvent::InputAudioBufferCommitted { item_id }
            }
            KnownServerEvent::ResponseCreated { response } => ServerEvent::ResponseCreated { response },
            KnownServerEvent::ResponseOutputItemAdded { item } => {
                ServerEvent::ResponseOutputItemAdded { item }
            }
            KnownServerEvent::ResponseOutputItemDone { item } => {
                ServerEvent::ResponseOutputItemDone { item }
            }
            KnownServerEvent::ResponseContentPartAdded { item_id, part } => {
                ServerEvent::ResponseContentPartAdded { item_id, part }
            }
            KnownServerEvent::ResponseAudioDelta { item_id, delta } => {
                ServerEvent::ResponseAudioDelta { item_id, delta }
            }
            KnownServerEvent::ResponseAudioDone { item_id } => ServerEvent::ResponseAudioDone { item_id },
            KnownServerEvent::ResponseAudioTranscriptDelta { item_id, delta } => {
                ServerEvent::ResponseAudioTranscriptDelta { item_id, delta }
            }
            KnownServerEvent::ResponseAudioTranscriptDone { item_id, transcript } => {
                ServerEvent::ResponseAudioTranscriptDone { item_id, transcript }
            }
            KnownServerEvent::ResponseTextDelta { item_id, delta } => {
                ServerEvent::ResponseTextDelta { item_id, delta }
            }
            KnownServerEvent::ResponseTextDone { item_id, text } => {
                ServerEvent::ResponseTextDone { item_id, text }
            }
            KnownServerEvent::FunctionCallArgumentsDelta { call_id, delta } => {
                ServerEvent::FunctionCallArgumentsDelta { call_id, delta }
            }
            KnownServerEvent::FunctionCallArgumentsDone { call_id, name, arguments, item_id } => {
                ServerEvent::FunctionCallArgumentsDone { call_id, name, arguments, item_id }
            }
            KnownServerEvent::ResponseDone { response } => ServerEvent::ResponseDone { response },
            KnownServerEvent::RateLimitsUpdated { rate_limits } => {
                ServerEvent::RateLimitsUpdated { rate_limits }
            }
        }
    }
}

/// One inbound message: the parsed event plus the raw JSON it came from,
/// kept for the diagnostic event log.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub event: ServerEvent,
    pub raw: Value,
}

impl ServerEvent {
    /// Parses one inbound text frame. Only invalid JSON is an error; a JSON
    /// object of unrecognized shape parses as [`ServerEvent::Unknown`].
    pub fn parse(text: &str) -> Result<Inbound, serde_json::Error> {
        let raw: Value = serde_json::from_str(text)?;
        let event = match serde_json::from_value::<KnownServerEvent>(raw.clone()) {
            Ok(known) => known.into(),
            Err(_) => ServerEvent::Unknown {
                event_type: raw
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("(untyped)")
                    .to_string(),
                payload: raw.clone(),
            },
        };
        Ok(Inbound { event, raw })
    }

    /// The wire `type` tag, used for logging and event aggregation.
    pub fn event_type(&self) -> &str {
        match self {
            ServerEvent::Error { .. } => "error",
            ServerEvent::SessionCreated { .. } => "session.created",
            ServerEvent::SessionUpdated { .. } => "session.updated",
            ServerEvent::ConversationItemCreated { .. } => "conversation.item.created",
            ServerEvent::ConversationItemDeleted { .. } => "conversation.item.deleted",
            ServerEvent::ConversationItemTruncated { .. } => "conversation.item.truncated",
            ServerEvent::InputAudioTranscriptionDelta { .. } => {
                "conversation.item.input_audio_transcription.delta"
            }
            ServerEvent::InputAudioTranscriptionCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            ServerEvent::SpeechStarted { .. } => "input_audio_buffer.speech_started",
            ServerEvent::SpeechStopped { .. } => "input_audio_buffer.speech_stopped",
            ServerEvent::InputAudioBufferCommitted { .. } => "input_audio_buffer.committed",
            ServerEvent::ResponseCreated { .. } => "response.created",
            ServerEvent::ResponseOutputItemAdded { .. } => "response.output_item.added",
            ServerEvent::ResponseOutputItemDone { .. } => "response.output_item.done",
            ServerEvent::ResponseContentPartAdded { .. } => "response.content_part.added",
            ServerEvent::ResponseAudioDelta { .. } => "response.audio.delta",
            ServerEvent::ResponseAudioDone { .. } => "response.audio.done",
            ServerEvent::ResponseAudioTranscriptDelta { .. } => "response.audio_transcript.delta",
            ServerEvent::ResponseAudioTranscriptDone { .. } => "response.audio_transcript.done",
            ServerEvent::ResponseTextDelta { .. } => "response.text.delta",
            ServerEvent::ResponseTextDone { .. } => "response.text.done",
            ServerEvent::FunctionCallArgumentsDelta { .. } => "response.function_call_arguments.delta",
            ServerEvent::FunctionCallArgumentsDone { .. } => "response.function_call_arguments.done",
            ServerEvent::ResponseDone { .. } => "response.done",
            ServerEvent::RateLimitsUpdated { .. } => "rate_limits.updated",
            ServerEvent::Unknown { event_type, .. } => event_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_delta_parses() {
        let inbound = ServerEvent::parse(
            r#"{"type":"response.audio.delta","event_id":"ev_1","response_id":"r1","item_id":"item_3","output_index":0,"content_index":0,"delta":"AAAA"}"#,
        )
        .unwrap();
        match inbound.event {
            ServerEvent::ResponseAudioDelta { item_id, delta } => {
                assert_eq!(item_id, "item_3");
                assert_eq!(delta, "AAAA");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_not_fatal() {
        let inbound =
            ServerEvent::parse(r#"{"type":"response.shiny_new_thing","payload":{"x":1}}"#).unwrap();
        match inbound.event {
            ServerEvent::Unknown { event_type, .. } => {
                assert_eq!(event_type, "response.shiny_new_thing")
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn malformed_known_event_degrades_to_unknown() {
        // `error` without its `error` body must not kill parsing.
        let inbound = ServerEvent::parse(r#"{"type":"error"}"#).unwrap();
        assert!(matches!(inbound.event, ServerEvent::Unknown { .. }));
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(ServerEvent::parse("not json").is_err());
    }

    #[test]
    fn function_call_done_parses_with_and_without_name() {
        let with_name = ServerEvent::parse(
            r#"{"type":"response.function_call_arguments.done","call_id":"c1","name":"get_weather","arguments":"{\"lat\":1}"}"#,
        )
        .unwrap();
        match with_name.event {
            ServerEvent::FunctionCallArgumentsDone { name, .. } => {
                assert_eq!(name.as_deref(), Some("get_weather"))
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let without_name = ServerEvent::parse(
            r#"{"type":"response.function_call_arguments.done","call_id":"c2","arguments":"{}"}"#,
        )
        .unwrap();
        match without_name.event {
            ServerEvent::FunctionCallArgumentsDone { name, .. } => assert!(name.is_none()),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
