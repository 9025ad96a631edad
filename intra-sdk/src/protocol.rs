//! Wire format: one JSON object per WebSocket text frame.
//!
//! ```text
//! {"type":"text","sender":"alice","receiver":"bob","text":"hi","timestamp":1700000000000}
//! {"type":"file","sender":"alice","receiver":"bob","url":"/files/a.png","filename":"a.png","timestamp":1700000000000}
//! {"type":"typing","sender":"alice","receiver":"bob"}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Payload of a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatBody {
    Text(String),
    File { url: String, filename: String },
}

/// A text or file message between two identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub sender: String,
    pub receiver: String,
    pub body: ChatBody,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl ChatEvent {
    pub fn text(sender: &str, receiver: &str, text: &str, timestamp: i64) -> Self {
        Self {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            body: ChatBody::Text(text.to_string()),
            timestamp,
        }
    }

    pub fn file(sender: &str, receiver: &str, url: &str, filename: &str, timestamp: i64) -> Self {
        Self {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            body: ChatBody::File {
                url: url.to_string(),
                filename: filename.to_string(),
            },
            timestamp,
        }
    }

    /// Wire discriminator: `"text"` or `"file"`.
    pub fn kind(&self) -> &'static str {
        match self.body {
            ChatBody::Text(_) => "text",
            ChatBody::File { .. } => "file",
        }
    }
}

/// Someone is typing to `receiver`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEvent {
    pub sender: String,
    pub receiver: String,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Chat(ChatEvent),
    Typing(TypingEvent),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Frame {
    Text {
        sender: String,
        receiver: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    File {
        sender: String,
        receiver: String,
        url: String,
        filename: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    Typing {
        sender: String,
        receiver: String,
    },
}

/// Current wall clock in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parse one inbound frame.
///
/// Chat frames without a timestamp are stamped with the local clock.
pub fn decode(raw: &str) -> Result<InboundEvent, DecodeError> {
    let event = match serde_json::from_str::<Frame>(raw)? {
        Frame::Text {
            sender,
            receiver,
            text,
            timestamp,
        } => InboundEvent::Chat(ChatEvent {
            sender,
            receiver,
            body: ChatBody::Text(text),
            timestamp: timestamp.unwrap_or_else(now_ms),
        }),
        Frame::File {
            sender,
            receiver,
            url,
            filename,
            timestamp,
        } => InboundEvent::Chat(ChatEvent {
            sender,
            receiver,
            body: ChatBody::File { url, filename },
            timestamp: timestamp.unwrap_or_else(now_ms),
        }),
        Frame::Typing { sender, receiver } => {
            InboundEvent::Typing(TypingEvent { sender, receiver })
        }
    };
    Ok(event)
}

/// Serialize a chat message for transmission.
pub fn encode_chat(event: &ChatEvent) -> String {
    let frame = match &event.body {
        ChatBody::Text(text) => Frame::Text {
            sender: event.sender.clone(),
            receiver: event.receiver.clone(),
            text: text.clone(),
            timestamp: Some(event.timestamp),
        },
        ChatBody::File { url, filename } => Frame::File {
            sender: event.sender.clone(),
            receiver: event.receiver.clone(),
            url: url.clone(),
            filename: filename.clone(),
            timestamp: Some(event.timestamp),
        },
    };
    frame_json(&frame)
}

/// Serialize a typing signal. Typing frames carry no timestamp.
pub fn encode_typing(event: &TypingEvent) -> String {
    frame_json(&Frame::Typing {
        sender: event.sender.clone(),
        receiver: event.receiver.clone(),
    })
}

fn frame_json(frame: &Frame) -> String {
    // Only strings and integers: serialization cannot fail.
    serde_json::to_string(frame).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_roundtrip() {
        let event = ChatEvent::text("alice", "bob", "hello there", 1_700_000_000_123);
        let decoded = decode(&encode_chat(&event)).unwrap();
        assert_eq!(decoded, InboundEvent::Chat(event));
    }

    #[test]
    fn file_roundtrip() {
        let event = ChatEvent::file("alice", "Family Group", "/uploads/cat.png", "cat.png", 42);
        let decoded = decode(&encode_chat(&event)).unwrap();
        assert_eq!(decoded, InboundEvent::Chat(event));
    }

    #[test]
    fn typing_has_no_timestamp() {
        let raw = encode_typing(&TypingEvent {
            sender: "alice".into(),
            receiver: "bob".into(),
        });
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["type"], "typing");
        assert_eq!(json["sender"], "alice");
        assert_eq!(json["receiver"], "bob");
        assert!(json.get("timestamp").is_none());
    }

    #[test]
    fn text_frame_field_names() {
        let raw = encode_chat(&ChatEvent::text("bob", "alice", "yo", 1000));
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "yo");
        assert_eq!(json["timestamp"], 1000);
    }

    #[test]
    fn decode_typing() {
        let ev = decode(r#"{"type":"typing","sender":"alice","receiver":"bob"}"#).unwrap();
        assert_eq!(
            ev,
            InboundEvent::Typing(TypingEvent {
                sender: "alice".into(),
                receiver: "bob".into()
            })
        );
    }

    #[test]
    fn missing_timestamp_uses_local_clock() {
        let before = now_ms();
        let ev = decode(r#"{"type":"text","sender":"a","receiver":"b","text":"x"}"#).unwrap();
        let InboundEvent::Chat(chat) = ev else {
            panic!("expected chat event");
        };
        assert!(chat.timestamp >= before);
    }

    #[test]
    fn unknown_type_rejected() {
        assert!(decode(r#"{"type":"presence","sender":"a","receiver":"b"}"#).is_err());
    }

    #[test]
    fn garbage_rejected() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"sender":"a","receiver":"b"}"#).is_err());
        assert!(decode(r#"{"type":"file","sender":"a","receiver":"b","url":"/x"}"#).is_err());
    }
}
