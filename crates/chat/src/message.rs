use std::fmt;
use std::str::FromStr;

use snafu::ResultExt;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult, InvalidIdSnafu};

// Macro keeps the opaque ID wrappers structurally identical, so the wire
// representation stays a plain UUID string on both.
macro_rules! define_chat_id {
    ($name:ident, $id_type:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(raw: Uuid) -> Self {
                Self(raw)
            }

            pub fn mint() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn parse(raw: &str) -> ChatResult<Self> {
                let parsed = Uuid::parse_str(raw).context(InvalidIdSnafu {
                    stage: "parse-chat-id",
                    id_type: $id_type,
                    raw: raw.to_string(),
                })?;
                Ok(Self(parsed))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ChatError;

            fn from_str(raw: &str) -> ChatResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_chat_id!(ChatId, "chat-id");
define_chat_id!(AttachmentKey, "attachment-key");

/// Identifier for one streaming generation.
///
/// This must change on every send so stale tokens can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationId(pub u64);

impl GenerationId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Stream routing key used for stale-token rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub chat_id: ChatId,
    pub generation: GenerationId,
}

impl StreamTarget {
    pub const fn new(chat_id: ChatId, generation: GenerationId) -> Self {
        Self {
            chat_id,
            generation,
        }
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// Broad attachment classification used for chip rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    Image,
    Document,
}

impl AttachmentKind {
    /// Classifies by MIME type the way the upload channel reports it.
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("image/") {
            Self::Image
        } else {
            Self::Document
        }
    }
}

/// A completed upload attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub key: AttachmentKey,
    pub file_name: String,
    pub kind: AttachmentKind,
    pub preview_url: Option<String>,
}

/// Lifecycle status for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    Streaming,
    Done,
    Error(String),
}

/// One transcript entry. Only the transcript's last message may have its
/// content extended after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub attachments: Vec<AttachmentRef>,
    pub status: MessageStatus,
}

impl Message {
    pub fn new(
        role: Role,
        content: impl Into<String>,
        attachments: Vec<AttachmentRef>,
        status: MessageStatus,
    ) -> Self {
        Self {
            role,
            content: content.into(),
            attachments,
            status,
        }
    }

    /// Creates a completed user message.
    pub fn user(content: impl Into<String>, attachments: Vec<AttachmentRef>) -> Self {
        Self::new(Role::User, content, attachments, MessageStatus::Done)
    }

    /// Creates the assistant message that streaming tokens extend.
    pub fn assistant_streaming() -> Self {
        Self::new(
            Role::Assistant,
            String::new(),
            Vec::new(),
            MessageStatus::Streaming,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_round_trips_through_display_and_parse() {
        let id = ChatId::mint();
        let parsed = ChatId::parse(&id.to_string()).expect("freshly minted id must parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn malformed_id_is_rejected() {
        let error = AttachmentKey::parse("not-a-uuid").unwrap_err();
        assert!(error.to_string().contains("attachment-key"));
    }

    #[test]
    fn mime_classification_splits_images_from_documents() {
        assert_eq!(AttachmentKind::from_mime("image/png"), AttachmentKind::Image);
        assert_eq!(
            AttachmentKind::from_mime("application/pdf"),
            AttachmentKind::Document
        );
        assert_eq!(AttachmentKind::from_mime(""), AttachmentKind::Document);
    }
}
