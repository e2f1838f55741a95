use koda_chat::PendingId;

/// Emitted when the user submits the composed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submit {
    pub content: String,
}

/// Emitted when the user asks to pick files to attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachRequested;

/// Emitted when the user removes one attachment chip before sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoveAttachmentClicked {
    pub id: PendingId,
}

/// Emitted when the topic selector changes the active documentation set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSelected {
    pub value: String,
}
