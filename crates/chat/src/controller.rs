use snafu::ensure;

use crate::assembler::StreamAssembler;
use crate::error::{ChatResult, EmptyOutboundSnafu, SessionBusySnafu};
use crate::ledger::{AttachmentLedger, PendingId, RemovalAction, UploadOutcome};
use crate::message::{
    AttachmentKey, AttachmentKind, AttachmentRef, ChatId, GenerationId, Message, StreamTarget,
};
use crate::transcript::Transcript;

/// Stream payload as the controller consumes it, already decoupled from the
/// transport representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    Completed,
    Failed(String),
}

/// Everything the caller needs to open the remote stream for one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub target: StreamTarget,
    pub text: String,
    pub attachments: Vec<AttachmentRef>,
}

/// Owns one live chat session: identity, transcript, stream assembly and
/// attachment ledger.
///
/// The controller performs no IO. The caller opens streams and uploads and
/// feeds results back through `apply_event` / the ledger methods; every
/// stream-driven mutation is gated on the `StreamTarget` captured when the
/// stream was opened, so events from a superseded session are discarded
/// instead of corrupting the new one.
#[derive(Debug)]
pub struct SessionController {
    chat_id: ChatId,
    transcript: Transcript,
    assembler: StreamAssembler,
    ledger: AttachmentLedger,
    next_generation: u64,
    stream_error: Option<String>,
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            chat_id: ChatId::mint(),
            transcript: Transcript::new(),
            assembler: StreamAssembler::new(),
            ledger: AttachmentLedger::new(),
            next_generation: 1,
            stream_error: None,
        }
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    /// The working flag: true while a stream is open and non-terminal.
    pub fn working(&self) -> bool {
        self.assembler.is_streaming()
    }

    pub fn messages(&self) -> &[Message] {
        self.transcript.messages()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.transcript.snapshot()
    }

    /// Last stream failure, shown as a non-blocking indicator.
    pub fn stream_error(&self) -> Option<&str> {
        self.stream_error.as_deref()
    }

    /// Target of the in-flight stream, if any.
    pub fn active_target(&self) -> Option<StreamTarget> {
        self.assembler.active_target()
    }

    /// True when the assistant's reply has not started rendering yet.
    pub fn awaiting_first_token(&self) -> bool {
        self.working() && self.transcript.last_role() == Some(crate::message::Role::User)
    }

    /// Replaces an empty transcript with server-side history.
    pub fn hydrate(&mut self, history: Vec<Message>) {
        if self.working() || !self.transcript.is_empty() {
            tracing::warn!(chat_id = %self.chat_id, "ignoring history for a session already in use");
            return;
        }
        for message in history {
            self.transcript.push(message);
        }
    }

    /// Validates and stages one send: resolves attachments, appends the user
    /// message and opens a new generation. The caller streams the returned
    /// request and feeds events back via `apply_event`.
    pub fn send(&mut self, text: &str, selected: &[PendingId]) -> ChatResult<Outbound> {
        if let Some(active) = self.assembler.active_target() {
            return SessionBusySnafu {
                stage: "controller-send",
                target: active,
            }
            .fail();
        }

        let text = text.trim();
        ensure!(
            !text.is_empty() || self.ledger.peek_resolved(selected) > 0,
            EmptyOutboundSnafu {
                stage: "controller-send",
            }
        );

        let attachments = self.ledger.resolve_for_send(selected);
        let target = StreamTarget::new(self.chat_id, self.alloc_generation());
        self.assembler.begin(target)?;
        self.stream_error = None;

        self.transcript
            .push(Message::user(text, attachments.clone()));

        Ok(Outbound {
            target,
            text: text.to_string(),
            attachments,
        })
    }

    /// Applies one stream event. Returns whether the transcript changed.
    /// Events tagged with a superseded chat id or generation are discarded.
    pub fn apply_event(&mut self, target: StreamTarget, event: StreamEvent) -> bool {
        if target.chat_id != self.chat_id || !self.assembler.accepts(target) {
            tracing::debug!(?target, "discarding stream event for a superseded session");
            return false;
        }

        let outcome = match event {
            StreamEvent::Token(token) => self.assembler.apply_token(&mut self.transcript, &token),
            StreamEvent::Completed => {
                self.assembler.complete(&mut self.transcript).map(|_| true)
            }
            StreamEvent::Failed(message) => {
                self.stream_error = Some(message.clone());
                self.assembler
                    .fail(&mut self.transcript, message)
                    .map(|_| true)
            }
        };

        match outcome {
            Ok(mutated) => mutated,
            Err(error) => {
                // Reaching here means a logic defect, not a user condition.
                tracing::error!(?target, error = %error, "stream event violated session invariants");
                false
            }
        }
    }

    /// Tears the session down and mints a fresh identity. Returns the
    /// superseded chat id so the caller can best-effort close it remotely.
    pub fn reset(&mut self) -> ChatId {
        let superseded = self.chat_id;
        self.chat_id = ChatId::mint();
        self.transcript.clear();
        self.assembler.reset();
        self.ledger.clear();
        self.stream_error = None;
        superseded
    }

    // Attachment ledger surface, re-exposed so callers never hold a ledger
    // reference that could outlive a session switch.

    pub fn begin_upload(&mut self, file_name: impl Into<String>, kind: AttachmentKind) -> PendingId {
        self.ledger.begin_upload(file_name, kind)
    }

    pub fn finish_upload(
        &mut self,
        id: PendingId,
        key: AttachmentKey,
        preview_url: Option<String>,
    ) -> UploadOutcome {
        self.ledger.finish_upload(id, key, preview_url)
    }

    pub fn fail_upload(&mut self, id: PendingId, reason: impl Into<String>) {
        self.ledger.fail_upload(id, reason)
    }

    pub fn request_remove(&mut self, id: PendingId) -> RemovalAction {
        self.ledger.request_remove(id)
    }

    pub fn ledger(&self) -> &AttachmentLedger {
        &self.ledger
    }

    fn alloc_generation(&mut self) -> GenerationId {
        let generation = GenerationId::new(self.next_generation);
        self.next_generation = self.next_generation.saturating_add(1);
        generation
    }
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageStatus, Role};

    #[test]
    fn hello_round_trip_builds_both_messages() {
        let mut controller = SessionController::new();

        let outbound = controller.send("Hello", &[]).expect("idle session sends");
        assert!(controller.working());
        assert_eq!(outbound.text, "Hello");

        assert!(controller.apply_event(outbound.target, StreamEvent::Token("Hi".into())));
        assert!(controller.apply_event(outbound.target, StreamEvent::Token(" there".into())));
        assert!(controller.apply_event(outbound.target, StreamEvent::Completed));

        assert!(!controller.working());
        let messages = controller.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Hello");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hi there");
        assert_eq!(messages[1].status, MessageStatus::Done);
    }

    #[test]
    fn send_while_working_is_rejected_without_mutation() {
        let mut controller = SessionController::new();
        controller.send("first", &[]).expect("idle session sends");
        let length_before = controller.messages().len();

        let error = controller.send("second", &[]).unwrap_err();
        assert!(error.to_string().contains("already active"));
        assert_eq!(controller.messages().len(), length_before);
    }

    #[test]
    fn blank_send_with_no_resolved_attachments_is_rejected() {
        let mut controller = SessionController::new();
        let error = controller.send("   ", &[]).unwrap_err();
        assert!(error.to_string().contains("empty"));
        assert!(controller.messages().is_empty());
        assert!(!controller.working());
    }

    #[test]
    fn blank_send_with_a_resolved_attachment_goes_through() {
        let mut controller = SessionController::new();
        let pending = controller.begin_upload("shot.png", AttachmentKind::Image);
        controller.finish_upload(pending, AttachmentKey::mint(), None);

        let outbound = controller.send("", &[pending]).expect("attachment-only send");
        assert_eq!(outbound.attachments.len(), 1);
        assert_eq!(controller.messages()[0].attachments.len(), 1);
    }

    #[test]
    fn attachment_send_transfers_ownership_out_of_the_ledger() {
        let mut controller = SessionController::new();
        let pending = controller.begin_upload("notes.pdf", AttachmentKind::Document);
        let key = AttachmentKey::mint();
        controller.finish_upload(pending, key, None);

        let outbound = controller
            .send("describe", &[pending])
            .expect("idle session sends");

        assert_eq!(outbound.attachments[0].key, key);
        assert_eq!(outbound.attachments[0].file_name, "notes.pdf");
        let user_message = &controller.messages()[0];
        assert_eq!(user_message.attachments[0].key, key);
        assert!(controller.ledger().is_empty());
    }

    #[test]
    fn stale_tokens_after_reset_do_not_touch_the_new_session() {
        let mut controller = SessionController::new();
        let outbound = controller.send("Hello", &[]).expect("idle session sends");

        let superseded = controller.reset();
        assert_ne!(superseded, controller.chat_id());
        assert!(controller.messages().is_empty());

        // Late token from the old subscription.
        assert!(!controller.apply_event(outbound.target, StreamEvent::Token("ghost".into())));
        assert!(controller.messages().is_empty());

        // The new session is fully usable afterwards.
        let next = controller.send("again", &[]).expect("fresh session sends");
        assert!(controller.apply_event(next.target, StreamEvent::Token("ok".into())));
    }

    #[test]
    fn stale_generation_within_the_same_chat_is_discarded() {
        let mut controller = SessionController::new();
        let first = controller.send("one", &[]).expect("idle session sends");
        controller.apply_event(first.target, StreamEvent::Completed);

        let second = controller.send("two", &[]).expect("idle session sends");
        assert!(!controller.apply_event(first.target, StreamEvent::Token("late".into())));
        assert!(controller.apply_event(second.target, StreamEvent::Token("live".into())));
    }

    #[test]
    fn failure_mid_stream_keeps_partial_content_and_clears_working() {
        let mut controller = SessionController::new();
        let outbound = controller.send("question", &[]).expect("idle session sends");

        controller.apply_event(outbound.target, StreamEvent::Token("half an ans".into()));
        controller.apply_event(
            outbound.target,
            StreamEvent::Failed("stream interrupted".into()),
        );

        assert!(!controller.working());
        assert_eq!(controller.stream_error(), Some("stream interrupted"));
        let assistant = &controller.messages()[1];
        assert_eq!(assistant.content, "half an ans");
        assert!(matches!(assistant.status, MessageStatus::Error(_)));
    }

    #[test]
    fn awaiting_first_token_tracks_the_thinking_gap() {
        let mut controller = SessionController::new();
        let outbound = controller.send("Hello", &[]).expect("idle session sends");
        assert!(controller.awaiting_first_token());

        controller.apply_event(outbound.target, StreamEvent::Token(String::new()));
        assert!(controller.awaiting_first_token());

        controller.apply_event(outbound.target, StreamEvent::Token("Hi".into()));
        assert!(!controller.awaiting_first_token());
    }

    #[test]
    fn reset_clears_ledger_and_error_state() {
        let mut controller = SessionController::new();
        let pending = controller.begin_upload("f.txt", AttachmentKind::Document);
        controller.finish_upload(pending, AttachmentKey::mint(), None);
        let outbound = controller.send("hi", &[]).expect("idle session sends");
        controller.apply_event(outbound.target, StreamEvent::Failed("boom".into()));

        controller.reset();

        assert!(controller.ledger().is_empty());
        assert!(controller.stream_error().is_none());
        assert!(!controller.working());
    }

    #[test]
    fn hydrate_fills_only_a_fresh_session() {
        let mut controller = SessionController::new();
        controller.hydrate(vec![Message::user("earlier", Vec::new())]);
        assert_eq!(controller.messages().len(), 1);

        // A second hydration must not duplicate history.
        controller.hydrate(vec![Message::user("earlier", Vec::new())]);
        assert_eq!(controller.messages().len(), 1);
    }
}
