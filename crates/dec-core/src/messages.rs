use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Document,
}

/// A file the user sent along with a message. Only used to build multi-part
/// model content; never mutated after creation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    /// Base64-encoded payload.
    pub data: String,
    pub media_type: String,
    pub name: String,
    pub size: u64,
}

impl Attachment {
    /// Encode raw bytes. The kind follows the media type: `image/*` is an
    /// image, anything else a document.
    pub fn from_bytes(name: impl Into<String>, media_type: impl Into<String>, bytes: &[u8]) -> Self {
        let media_type = media_type.into();
        let kind = if media_type.starts_with("image/") {
            AttachmentKind::Image
        } else {
            AttachmentKind::Document
        };
        Self {
            kind,
            data: BASE64.encode(bytes),
            media_type,
            name: name.into(),
            size: bytes.len() as u64,
        }
    }
}

/// One entry of a session's history. Immutable once appended.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            content: content.into(),
            attachments,
            timestamp,
        }
    }

    pub fn assistant(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            content: content.into(),
            attachments: Vec::new(),
            timestamp,
        }
    }
}

// --- Provider-facing history ---

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { media_type: String, data: String },
    Document { media_type: String, data: String, name: String },
}

/// A history entry as sent to the model: role plus one or more content parts.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl PromptMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// Concatenated text parts.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn is_multipart(&self) -> bool {
        self.content.len() > 1
    }
}

impl From<&ChatMessage> for PromptMessage {
    fn from(msg: &ChatMessage) -> Self {
        let mut content = Vec::with_capacity(1 + msg.attachments.len());
        content.push(ContentPart::Text { text: msg.content.clone() });
        for att in &msg.attachments {
            content.push(match att.kind {
                AttachmentKind::Image => ContentPart::Image {
                    media_type: att.media_type.clone(),
                    data: att.data.clone(),
                },
                AttachmentKind::Document => ContentPart::Document {
                    media_type: att.media_type.clone(),
                    data: att.data.clone(),
                    name: att.name.clone(),
                },
            });
        }
        Self { role: msg.role, content }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_kind_follows_media_type() {
        let img = Attachment::from_bytes("shot.png", "image/png", b"\x89PNG");
        assert_eq!(img.kind, AttachmentKind::Image);
        assert_eq!(img.size, 4);
        assert_eq!(img.data, "iVBORw==");

        let doc = Attachment::from_bytes("spec.pdf", "application/pdf", b"%PDF");
        assert_eq!(doc.kind, AttachmentKind::Document);
    }

    #[test]
    fn plain_message_is_single_text_part() {
        let msg = ChatMessage::user("hello", Vec::new(), Utc::now());
        let prompt = PromptMessage::from(&msg);
        assert_eq!(prompt.role, Role::User);
        assert!(!prompt.is_multipart());
        assert_eq!(prompt.text_content(), "hello");
    }

    #[test]
    fn attachments_become_inline_parts_in_order() {
        let msg = ChatMessage::user(
            "look at these",
            vec![
                Attachment::from_bytes("a.png", "image/png", b"img"),
                Attachment::from_bytes("b.txt", "text/plain", b"doc"),
            ],
            Utc::now(),
        );
        let prompt = PromptMessage::from(&msg);
        assert!(prompt.is_multipart());
        assert!(matches!(prompt.content[0], ContentPart::Text { .. }));
        assert!(matches!(prompt.content[1], ContentPart::Image { .. }));
        match &prompt.content[2] {
            ContentPart::Document { name, media_type, .. } => {
                assert_eq!(name, "b.txt");
                assert_eq!(media_type, "text/plain");
            }
            other => panic!("expected document part, got {other:?}"),
        }
    }

    #[test]
    fn chat_message_serialization() {
        let msg = ChatMessage::assistant("done", Utc::now());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "done");
        assert!(json.get("attachments").is_none());
    }

    #[test]
    fn content_part_tagging() {
        let part = ContentPart::Image { media_type: "image/png".into(), data: "AA==".into() };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], "image");
    }
}
