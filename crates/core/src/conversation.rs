//! The conversation item list and its reconciliation rules.
//!
//! Items are owned exclusively by the session manager and mutated only here,
//! strictly in server-event arrival order. The view reads `Arc` snapshots
//! whose identity changes exactly when content does.

use crate::audio::{DecodedAudio, SERVICE_SAMPLE_RATE, pcm16_from_bytes};
use parlance_realtime_types as wire;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    /// Function calls and their outputs.
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
            Role::Tool => f.write_str("tool"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Streaming,
    Completed,
    Truncated,
}

/// A pending or completed function call attached to a tool item.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

/// One turn of dialog.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationItem {
    pub id: String,
    pub role: Role,
    pub status: ItemStatus,
    /// Raw text content (typed input, streamed text deltas).
    pub text: String,
    /// Speech transcript, preferred over `text` for display.
    pub transcript: String,
    /// Raw PCM16 bytes accumulated from audio deltas.
    pub audio: Vec<u8>,
    /// Decoded playable artifact, produced exactly once on completion.
    pub artifact: Option<DecodedAudio>,
    pub tool_call: Option<ToolCall>,
    /// Output of a completed function call, when this item carries one.
    pub tool_output: Option<String>,
}

impl ConversationItem {
    fn new(id: String, role: Role) -> Self {
        Self {
            id,
            role,
            status: ItemStatus::Streaming,
            text: String::new(),
            transcript: String::new(),
            audio: Vec::new(),
            artifact: None,
            tool_call: None,
            tool_output: None,
        }
    }

    /// Transcript when present, raw text otherwise.
    pub fn display_text(&self) -> &str {
        if self.transcript.trim().is_empty() {
            &self.text
        } else {
            &self.transcript
        }
    }
}

/// Cheap item view carried on `ConversationUpdated` events.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSnapshot {
    pub id: String,
    pub role: Role,
    pub status: ItemStatus,
    pub text: String,
}

impl From<&ConversationItem> for ItemSnapshot {
    fn from(item: &ConversationItem) -> Self {
        Self {
            id: item.id.clone(),
            role: item.role,
            status: item.status,
            text: item.display_text().to_string(),
        }
    }
}

fn role_from_wire(item: &wire::Item) -> Role {
    match item.kind {
        Some(wire::ItemType::FunctionCall) | Some(wire::ItemType::FunctionCallOutput) => Role::Tool,
        _ => match item.role {
            Some(wire::ItemRole::Assistant) => Role::Assistant,
            // System prompts render on the user side of the transcript.
            _ => Role::User,
        },
    }
}

fn status_from_wire(status: Option<wire::ItemStatus>) -> ItemStatus {
    match status {
        Some(wire::ItemStatus::Completed) => ItemStatus::Completed,
        Some(wire::ItemStatus::Incomplete) => ItemStatus::Truncated,
        _ => ItemStatus::Streaming,
    }
}

/// The ordered item list plus derived last-message state.
#[derive(Default)]
pub struct Conversation {
    items: Vec<ConversationItem>,
    snapshot: Option<Arc<Vec<ConversationItem>>>,
    last_assistant: Option<String>,
    last_user: Option<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ConversationItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Most recent assistant utterance (transcript preferred, text fallback).
    pub fn last_assistant_message(&self) -> Option<&str> {
        self.last_assistant.as_deref()
    }

    /// Most recent user utterance (transcript preferred, text fallback).
    pub fn last_user_message(&self) -> Option<&str> {
        self.last_user.as_deref()
    }

    /// Inserts or refreshes an item from its wire form, in arrival order.
    pub fn upsert(&mut self, wire_item: &wire::Item) -> Option<ItemSnapshot> {
        let id = wire_item.id.clone()?;
        let index = match self.items.iter().position(|item| item.id == id) {
            Some(index) => index,
            None => {
                self.items.push(ConversationItem::new(id.clone(), role_from_wire(wire_item)));
                self.items.len() - 1
            }
        };

        let item = &mut self.items[index];
        // A barge-in truncation is final; later lifecycle events must not
        // resurrect the item to completed.
        if item.status != ItemStatus::Truncated {
            item.status = status_from_wire(wire_item.status);
        }
        if let Some(parts) = &wire_item.content {
            for part in parts {
                if let Some(text) = &part.text
                    && !text.is_empty()
                {
                    item.text = text.clone();
                }
                if let Some(transcript) = &part.transcript
                    && !transcript.is_empty()
                {
                    item.transcript = transcript.clone();
                }
            }
        }
        if wire_item.kind == Some(wire::ItemType::FunctionCall) {
            item.tool_call = Some(ToolCall {
                call_id: wire_item.call_id.clone().unwrap_or_default(),
                name: wire_item.name.clone().unwrap_or_default(),
                arguments: wire_item.arguments.clone().unwrap_or_default(),
            });
        }
        if wire_item.kind == Some(wire::ItemType::FunctionCallOutput) {
            item.tool_output = wire_item.output.clone();
        }

        Some(self.touch(index))
    }

    /// Appends decoded delta bytes to an item's accumulating audio.
    pub fn append_audio(&mut self, item_id: &str, bytes: &[u8]) -> Option<ItemSnapshot> {
        let index = self.items.iter().position(|item| item.id == item_id)?;
        self.items[index].audio.extend_from_slice(bytes);
        Some(self.touch(index))
    }

    pub fn append_transcript_delta(&mut self, item_id: &str, delta: &str) -> Option<ItemSnapshot> {
        let index = self.items.iter().position(|item| item.id == item_id)?;
        self.items[index].transcript.push_str(delta);
        Some(self.touch(index))
    }

    pub fn append_text_delta(&mut self, item_id: &str, delta: &str) -> Option<ItemSnapshot> {
        let index = self.items.iter().position(|item| item.id == item_id)?;
        self.items[index].text.push_str(delta);
        Some(self.touch(index))
    }

    pub fn set_transcript(&mut self, item_id: &str, transcript: &str) -> Option<ItemSnapshot> {
        let index = self.items.iter().position(|item| item.id == item_id)?;
        self.items[index].transcript = transcript.to_string();
        Some(self.touch(index))
    }

    pub fn set_text(&mut self, item_id: &str, text: &str) -> Option<ItemSnapshot> {
        let index = self.items.iter().position(|item| item.id == item_id)?;
        self.items[index].text = text.to_string();
        Some(self.touch(index))
    }

    /// Replaces streamed argument fragments with the final argument string.
    pub fn set_tool_arguments(&mut self, call_id: &str, arguments: &str) -> Option<ItemSnapshot> {
        let index = self
            .items
            .iter()
            .position(|item| item.tool_call.as_ref().is_some_and(|c| c.call_id == call_id))?;
        if let Some(call) = self.items[index].tool_call.as_mut() {
            call.arguments = arguments.to_string();
        }
        Some(self.touch(index))
    }

    pub fn append_tool_arguments(&mut self, call_id: &str, delta: &str) -> Option<ItemSnapshot> {
        let index = self
            .items
            .iter()
            .position(|item| item.tool_call.as_ref().is_some_and(|c| c.call_id == call_id))?;
        if let Some(call) = self.items[index].tool_call.as_mut() {
            call.arguments.push_str(delta);
        }
        Some(self.touch(index))
    }

    /// Looks up the function name recorded for a call id, for argument-done
    /// events that do not repeat it.
    pub fn tool_name_for_call(&self, call_id: &str) -> Option<String> {
        self.items.iter().find_map(|item| {
            item.tool_call
                .as_ref()
                .filter(|call| call.call_id == call_id && !call.name.is_empty())
                .map(|call| call.name.clone())
        })
    }

    /// Marks an item completed and decodes its audio artifact exactly once.
    /// Decode failure is logged and leaves the item without an artifact.
    pub fn complete(&mut self, item_id: &str) -> Option<ItemSnapshot> {
        let index = self.items.iter().position(|item| item.id == item_id)?;
        let item = &mut self.items[index];
        if item.status != ItemStatus::Truncated {
            item.status = ItemStatus::Completed;
        }
        if item.artifact.is_none() && !item.audio.is_empty() {
            match pcm16_from_bytes(&item.audio) {
                Ok(samples) => {
                    item.artifact = Some(DecodedAudio {
                        sample_rate: SERVICE_SAMPLE_RATE,
                        samples,
                    });
                }
                Err(e) => warn!(item_id, error = %e, "audio artifact decode failed"),
            }
        }
        Some(self.touch(index))
    }

    /// Marks the item truncated after a barge-in; the audio the user never
    /// heard stays off the artifact.
    pub fn truncate(&mut self, item_id: &str, audio_end_ms: u64) -> Option<ItemSnapshot> {
        let index = self.items.iter().position(|item| item.id == item_id)?;
        let item = &mut self.items[index];
        item.status = ItemStatus::Truncated;
        let keep_bytes = (audio_end_ms as usize * SERVICE_SAMPLE_RATE as usize / 1000) * 2;
        if item.audio.len() > keep_bytes {
            item.audio.truncate(keep_bytes);
        }
        item.artifact = None;
        Some(self.touch(index))
    }

    pub fn remove(&mut self, item_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id != item_id);
        let removed = self.items.len() != before;
        if removed {
            self.invalidate();
            self.recompute_last_messages();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.invalidate();
        self.recompute_last_messages();
    }

    /// Snapshot with stable `Arc` identity while content is unchanged.
    pub fn snapshot(&mut self) -> Arc<Vec<ConversationItem>> {
        if let Some(snapshot) = &self.snapshot {
            return snapshot.clone();
        }
        let snapshot = Arc::new(self.items.clone());
        self.snapshot = Some(snapshot.clone());
        snapshot
    }

    fn touch(&mut self, index: usize) -> ItemSnapshot {
        self.invalidate();
        self.recompute_last_messages();
        ItemSnapshot::from(&self.items[index])
    }

    fn invalidate(&mut self) {
        self.snapshot = None;
    }

    fn recompute_last_messages(&mut self) {
        self.last_assistant = self
            .items
            .iter()
            .rev()
            .filter(|item| item.role == Role::Assistant)
            .map(|item| item.display_text())
            .find(|text| !text.trim().is_empty())
            .map(str::to_string);
        self.last_user = self
            .items
            .iter()
            .rev()
            .filter(|item| item.role == Role::User)
            .map(|item| item.display_text())
            .find(|text| !text.trim().is_empty())
            .map(str::to_string);
    }
}
