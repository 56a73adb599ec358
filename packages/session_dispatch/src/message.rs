//! Messages produced by the agent and delivered to sinks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier assigned by the agent. The deduplication key.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// Message body: either plain role/content text or an opaque structured object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Text { role: Role, content: String },
    Structured { value: serde_json::Value },
}

/// An immutable message. Identity is the `id`, never the payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Message {
    pub fn text(id: impl Into<MessageId>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: Payload::Text {
                role,
                content: content.into(),
            },
        }
    }

    pub fn structured(id: impl Into<MessageId>, value: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload: Payload::Structured { value },
        }
    }

    /// Text content, if this is a text message
    pub fn content(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text { content, .. } => Some(content),
            Payload::Structured { .. } => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        match &self.payload {
            Payload::Text { role, .. } => Some(*role),
            Payload::Structured { .. } => None,
        }
    }
}

/// Cumulative list of every message produced so far in a turn.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub messages: Vec<Message>,
}

impl Snapshot {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message_wire_shape() {
        let msg = Message::text("a1", Role::Assistant, "hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "a1",
                "kind": "text",
                "role": "assistant",
                "content": "hi",
            })
        );
    }

    #[test]
    fn test_structured_message_has_no_content() {
        let msg = Message::structured("s1", serde_json::json!({"score": 3}));
        assert_eq!(msg.content(), None);
        assert_eq!(msg.role(), None);
    }

    #[test]
    fn test_snapshot_parses_from_script_json() {
        let snap: Snapshot = serde_json::from_str(
            r#"{"messages":[{"id":"m1","kind":"text","role":"user","content":"hello"}]}"#,
        )
        .unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.messages[0].id, MessageId::from("m1"));
        assert_eq!(snap.messages[0].role(), Some(Role::User));
    }
}
