//! Canonical inbound message.
//!
//! Ingress converts wire requests into [`Message`] values; the router only
//! ever sees validated messages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Group chat or one-to-one chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Group,
    Private,
}

impl FromStr for ChatType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "group" => Ok(Self::Group),
            "private" => Ok(Self::Private),
            other => Err(ValidationError::invalid(
                "chat_type",
                format!("must be group or private, got {other:?}"),
            )),
        }
    }
}

/// Kind of payload carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Voice,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Voice => "voice",
            Self::File => "file",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "voice" => Ok(Self::Voice),
            "file" => Ok(Self::File),
            other => Err(ValidationError::invalid(
                "message_type",
                format!("unknown message type {other:?}"),
            )),
        }
    }
}

/// Message payload: inline text or a reference to a stored upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "lowercase")]
pub enum Content {
    Text(String),
    File { path: String },
}

/// A validated inbound message. Fields are private so the invariants set up
/// by [`Message::new`] cannot be broken afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    sender_id: i64,
    sender: String,
    chat_type: ChatType,
    character: i64,
    message_type: MessageType,
    sent_at: String,
    content: Content,
}

impl Message {
    /// Build a message, enforcing that the content matches the type and is
    /// non-empty.
    pub fn new(
        sender_id: i64,
        sender: impl Into<String>,
        chat_type: ChatType,
        character: i64,
        message_type: MessageType,
        sent_at: impl Into<String>,
        content: Content,
    ) -> Result<Self, ValidationError> {
        match (&message_type, &content) {
            (MessageType::Text, Content::Text(text)) => {
                if text.trim().is_empty() {
                    return Err(ValidationError::EmptyContent);
                }
            }
            (MessageType::Text, Content::File { .. }) => {
                return Err(ValidationError::invalid(
                    "content",
                    "text messages carry inline text",
                ));
            }
            (_, Content::File { path }) => {
                if path.is_empty() {
                    return Err(ValidationError::EmptyContent);
                }
            }
            (other, Content::Text(_)) => {
                return Err(ValidationError::invalid(
                    "content",
                    format!("{other} messages carry a file reference"),
                ));
            }
        }

        Ok(Self {
            sender_id,
            sender: sender.into(),
            chat_type,
            character,
            message_type,
            sent_at: sent_at.into(),
            content,
        })
    }

    /// Shorthand for a text message.
    pub fn text(
        sender_id: i64,
        sender: impl Into<String>,
        chat_type: ChatType,
        content: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Self::new(
            sender_id,
            sender,
            chat_type,
            0,
            MessageType::Text,
            chrono::Local::now().format(WIRE_TIME_FORMAT).to_string(),
            Content::Text(content.into()),
        )
    }

    /// Validate a JSON wire body from the text endpoint.
    pub fn from_wire(wire: WireMessage) -> Result<Self, ValidationError> {
        let message_type: MessageType = wire.message_type.parse()?;
        if message_type != MessageType::Text {
            return Err(ValidationError::invalid("message_type", "must be text"));
        }
        Self::new(
            wire.sender_id,
            wire.sender,
            wire.chat_type.parse()?,
            wire.character,
            message_type,
            wire.message_send_time,
            Content::Text(wire.content),
        )
    }

    pub fn sender_id(&self) -> i64 {
        self.sender_id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn chat_type(&self) -> ChatType {
        self.chat_type
    }

    pub fn character(&self) -> i64 {
        self.character
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn sent_at(&self) -> &str {
        &self.sent_at
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    /// Text forwarded to the conversational backend. File-backed messages
    /// become a tagged reference to the stored upload.
    pub fn chat_text(&self) -> String {
        match &self.content {
            Content::Text(text) => text.clone(),
            Content::File { path } => format!("[{}] {}", self.message_type, path),
        }
    }
}

/// Wire timestamp format (`message_send_time`).
pub const WIRE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// JSON body accepted by `POST /message/text`.
///
/// Every field is required; type mismatches are reported by serde.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireMessage {
    pub sender_id: i64,
    pub sender: String,
    pub chat_type: String,
    pub character: i64,
    pub message_type: String,
    pub message_send_time: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(content: &str) -> WireMessage {
        WireMessage {
            sender_id: 42,
            sender: "susu".into(),
            chat_type: "private".into(),
            character: 1,
            message_type: "text".into(),
            message_send_time: "2024-04-21 12:00:00".into(),
            content: content.into(),
        }
    }

    #[test]
    fn wire_text_message_validates() {
        let msg = Message::from_wire(wire("hello")).unwrap();
        assert_eq!(msg.sender_id(), 42);
        assert_eq!(msg.chat_type(), ChatType::Private);
        assert_eq!(msg.message_type(), MessageType::Text);
        assert_eq!(msg.chat_text(), "hello");
    }

    #[test]
    fn empty_text_rejected() {
        assert_eq!(
            Message::from_wire(wire("   ")).unwrap_err(),
            ValidationError::EmptyContent
        );
    }

    #[test]
    fn bad_chat_type_rejected() {
        let mut w = wire("hi");
        w.chat_type = "qq".into();
        let err = Message::from_wire(w).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { ref field, .. } if field == "chat_type"));
    }

    #[test]
    fn text_endpoint_rejects_other_types() {
        let mut w = wire("hi");
        w.message_type = "image".into();
        assert!(Message::from_wire(w).is_err());
    }

    #[test]
    fn file_message_forwards_reference() {
        let msg = Message::new(
            7,
            "alice",
            ChatType::Group,
            0,
            MessageType::Image,
            "2024-04-21 12:00:00",
            Content::File {
                path: "uploads/images/cat.png".into(),
            },
        )
        .unwrap();
        assert_eq!(msg.chat_text(), "[image] uploads/images/cat.png");
    }

    #[test]
    fn content_must_match_type() {
        let err = Message::new(
            7,
            "alice",
            ChatType::Group,
            0,
            MessageType::Voice,
            "2024-04-21 12:00:00",
            Content::Text("hi".into()),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { .. }));
    }

    #[test]
    fn wire_json_requires_integer_sender_id() {
        let raw = serde_json::json!({
            "sender_id": "42",
            "sender": "susu",
            "chat_type": "private",
            "character": 1,
            "message_type": "text",
            "message_send_time": "2024-04-21 12:00:00",
            "content": "hello"
        });
        assert!(serde_json::from_value::<WireMessage>(raw).is_err());
    }

    #[test]
    fn text_content_serializes_with_kind_tag() {
        let msg = Message::from_wire(wire("hello")).unwrap();
        assert_eq!(msg.content(), &Content::Text("hello".into()));

        let value = serde_json::to_value(Content::Text("hello".into())).unwrap();
        assert_eq!(value, serde_json::json!({"kind": "text", "body": "hello"}));
    }
}
