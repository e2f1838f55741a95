#![deny(unsafe_code)]

//! Streaming chat session core for the Koda docs assistant.
//!
//! Everything in this crate is plain domain logic: message transcript,
//! incremental stream assembly, attachment bookkeeping, scroll-follow
//! decisions and the markdown segmentation pipeline. No UI types leak in,
//! so the whole session lifecycle is unit-testable.

pub mod assembler;
pub mod controller;
pub mod error;
pub mod follow;
pub mod ledger;
pub mod message;
pub mod render;
pub mod transcript;

pub use assembler::{AssemblerState, StreamAssembler};
pub use controller::{Outbound, SessionController, StreamEvent};
pub use error::{ChatError, ChatResult};
pub use follow::{FOLLOW_GAP_PX, FollowTracker, RESUME_GAP_PX};
pub use ledger::{
    AttachmentLedger, LedgerEntry, PendingId, RemovalAction, UploadOutcome, UploadState,
};
pub use message::{
    AttachmentKey, AttachmentKind, AttachmentRef, ChatId, GenerationId, Message, MessageStatus,
    Role, StreamTarget,
};
pub use render::{CodeBlockRenderer, RenderedBlock, Segment, render_code_block, segment_markdown};
pub use transcript::Transcript;
