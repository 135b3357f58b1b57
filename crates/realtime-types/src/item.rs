//! Conversation items as they appear on the wire.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Message,
    FunctionCall,
    FunctionCallOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    InProgress,
    Completed,
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    InputText,
    InputAudio,
    Text,
    Audio,
}

/// One block of item content. Audio is carried as base64-encoded PCM16.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: ContentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl ContentPart {
    pub fn input_text(text: impl Into<String>) -> Self {
        Self {
            kind: ContentType::InputText,
            text: Some(text.into()),
            audio: None,
            transcript: None,
        }
    }
}

/// A conversation item. Function-call items carry `call_id`/`name`/`arguments`
/// instead of `content`; function-call outputs carry `call_id`/`output`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Item {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ItemType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ItemRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl Item {
    /// A user or system text message.
    pub fn message(role: ItemRole, text: impl Into<String>) -> Self {
        Self {
            kind: Some(ItemType::Message),
            role: Some(role),
            content: Some(vec![ContentPart::input_text(text)]),
            ..Default::default()
        }
    }

    /// The result of a locally executed function call, keyed back by `call_id`.
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind: Some(ItemType::FunctionCallOutput),
            call_id: Some(call_id.into()),
            output: Some(output.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_wire_shape() {
        let item = Item::message(ItemRole::User, "hello there");
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value.get("type").unwrap(), "message");
        assert_eq!(value.get("role").unwrap(), "user");
        assert_eq!(value["content"][0]["type"], "input_text");
        assert_eq!(value["content"][0]["text"], "hello there");
        // Function-call fields must not leak into message items.
        assert!(value.get("call_id").is_none());
    }

    #[test]
    fn function_output_wire_shape() {
        let item = Item::function_call_output("call_7", r#"{"ok":true}"#);
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value.get("type").unwrap(), "function_call_output");
        assert_eq!(value.get("call_id").unwrap(), "call_7");
        assert_eq!(value.get("output").unwrap(), r#"{"ok":true}"#);
    }

    #[test]
    fn server_item_with_unknown_free_fields_parses() {
        let raw = serde_json::json!({
            "id": "item_1",
            "type": "function_call",
            "status": "in_progress",
            "call_id": "call_1",
            "name": "get_weather",
            "arguments": ""
        });
        let item: Item = serde_json::from_value(raw).unwrap();
        assert_eq!(item.kind, Some(ItemType::FunctionCall));
        assert_eq!(item.status, Some(ItemStatus::InProgress));
        assert_eq!(item.name.as_deref(), Some("get_weather"));
    }
}
