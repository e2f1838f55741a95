use snafu::ensure;

use crate::error::{ChatResult, NoActiveStreamSnafu, SessionBusySnafu};
use crate::message::{Message, MessageStatus, StreamTarget};
use crate::transcript::Transcript;

/// Stream lifecycle over one generation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AssemblerState {
    #[default]
    Idle,
    Streaming(StreamTarget),
    Completed(StreamTarget),
    Failed {
        target: StreamTarget,
        message: String,
    },
}

/// Folds an ordered token stream into the transcript.
///
/// The assistant message is created lazily on the first non-empty token, so
/// no empty bubble appears while the model is still thinking. Terminal
/// events preserve whatever partial content already streamed.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    state: AssemblerState,
    produced_output: bool,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AssemblerState {
        &self.state
    }

    /// True iff a stream is open and not yet terminal (the working flag).
    pub fn is_streaming(&self) -> bool {
        matches!(self.state, AssemblerState::Streaming(_))
    }

    pub fn active_target(&self) -> Option<StreamTarget> {
        match self.state {
            AssemblerState::Streaming(target) => Some(target),
            _ => None,
        }
    }

    /// True when incoming stream data matches the active generation.
    pub fn accepts(&self, target: StreamTarget) -> bool {
        matches!(self.state, AssemblerState::Streaming(active) if active == target)
    }

    /// Opens a new generation. Rejected while another one is streaming.
    pub fn begin(&mut self, target: StreamTarget) -> ChatResult<()> {
        if let AssemblerState::Streaming(active) = self.state {
            ensure!(
                active == target,
                SessionBusySnafu {
                    stage: "assembler-begin",
                    target: active,
                }
            );
            return Ok(());
        }

        self.state = AssemblerState::Streaming(target);
        self.produced_output = false;
        Ok(())
    }

    /// Applies one token in emission order. Returns whether the transcript
    /// changed (empty leading tokens are absorbed without a bubble).
    pub fn apply_token(&mut self, transcript: &mut Transcript, token: &str) -> ChatResult<bool> {
        ensure!(
            self.is_streaming(),
            NoActiveStreamSnafu {
                stage: "assembler-apply-token",
            }
        );

        if token.is_empty() && !self.produced_output {
            return Ok(false);
        }

        if !self.produced_output {
            transcript.push(Message::assistant_streaming());
            self.produced_output = true;
        }

        transcript.append_to_last(token)?;
        Ok(true)
    }

    /// Finalizes the stream successfully.
    pub fn complete(&mut self, transcript: &mut Transcript) -> ChatResult<()> {
        let target = self.require_active("assembler-complete")?;
        if self.produced_output {
            transcript.finalize_last(MessageStatus::Done)?;
        }
        self.state = AssemblerState::Completed(target);
        Ok(())
    }

    /// Finalizes the stream after a transport or backend failure. Partial
    /// content already appended stays in place.
    pub fn fail(&mut self, transcript: &mut Transcript, message: String) -> ChatResult<()> {
        let target = self.require_active("assembler-fail")?;
        if self.produced_output {
            transcript.finalize_last(MessageStatus::Error(message.clone()))?;
        }
        self.state = AssemblerState::Failed { target, message };
        Ok(())
    }

    pub fn reset(&mut self) {
        self.state = AssemblerState::Idle;
        self.produced_output = false;
    }

    fn require_active(&self, stage: &'static str) -> ChatResult<StreamTarget> {
        self.active_target()
            .ok_or_else(|| NoActiveStreamSnafu { stage }.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChatId, GenerationId, Role};

    fn target(generation: u64) -> StreamTarget {
        StreamTarget::new(ChatId::mint(), GenerationId::new(generation))
    }

    #[test]
    fn tokens_concatenate_into_one_assistant_message() {
        let mut transcript = Transcript::new();
        let mut assembler = StreamAssembler::new();
        assembler.begin(target(1)).expect("idle assembler accepts");

        for token in ["Hi", ",", " ", "there"] {
            assembler
                .apply_token(&mut transcript, token)
                .expect("streaming");
        }
        assembler.complete(&mut transcript).expect("streaming");

        assert_eq!(transcript.len(), 1);
        let message = &transcript.messages()[0];
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, "Hi, there");
        assert_eq!(message.status, MessageStatus::Done);
    }

    #[test]
    fn empty_leading_tokens_do_not_create_a_bubble() {
        let mut transcript = Transcript::new();
        let mut assembler = StreamAssembler::new();
        assembler.begin(target(1)).expect("idle assembler accepts");

        assert!(!assembler.apply_token(&mut transcript, "").expect("streaming"));
        assert!(!assembler.apply_token(&mut transcript, "").expect("streaming"));
        assert!(transcript.is_empty());

        assert!(assembler.apply_token(&mut transcript, "Hello").expect("streaming"));
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.messages()[0].content, "Hello");
    }

    #[test]
    fn empty_tokens_after_first_content_still_apply() {
        let mut transcript = Transcript::new();
        let mut assembler = StreamAssembler::new();
        assembler.begin(target(1)).expect("idle assembler accepts");

        assembler.apply_token(&mut transcript, "a").expect("streaming");
        assert!(assembler.apply_token(&mut transcript, "").expect("streaming"));
        assembler.apply_token(&mut transcript, "b").expect("streaming");

        assert_eq!(transcript.messages()[0].content, "ab");
    }

    #[test]
    fn begin_while_streaming_another_generation_is_busy() {
        let mut assembler = StreamAssembler::new();
        let first = target(1);
        assembler.begin(first).expect("idle assembler accepts");

        let error = assembler.begin(target(2)).unwrap_err();
        assert!(error.to_string().contains("already active"));
        assert_eq!(assembler.active_target(), Some(first));
    }

    #[test]
    fn failure_preserves_partial_content() {
        let mut transcript = Transcript::new();
        let mut assembler = StreamAssembler::new();
        assembler.begin(target(1)).expect("idle assembler accepts");

        assembler.apply_token(&mut transcript, "partial ").expect("streaming");
        assembler.apply_token(&mut transcript, "answer").expect("streaming");
        assembler
            .fail(&mut transcript, "connection reset".to_string())
            .expect("streaming");

        assert!(!assembler.is_streaming());
        let message = &transcript.messages()[0];
        assert_eq!(message.content, "partial answer");
        assert_eq!(
            message.status,
            MessageStatus::Error("connection reset".to_string())
        );
    }

    #[test]
    fn failure_without_output_leaves_transcript_untouched() {
        let mut transcript = Transcript::new();
        let mut assembler = StreamAssembler::new();
        assembler.begin(target(1)).expect("idle assembler accepts");

        assembler
            .fail(&mut transcript, "upstream 500".to_string())
            .expect("streaming");

        assert!(transcript.is_empty());
        assert!(!assembler.is_streaming());
    }

    #[test]
    fn terminal_state_allows_a_new_generation() {
        let mut transcript = Transcript::new();
        let mut assembler = StreamAssembler::new();

        assembler.begin(target(1)).expect("idle assembler accepts");
        assembler.complete(&mut transcript).expect("streaming");
        assembler.begin(target(2)).expect("terminal state accepts");
        assert!(assembler.is_streaming());
    }

    #[test]
    fn stale_target_is_not_accepted() {
        let mut assembler = StreamAssembler::new();
        let live = target(2);
        assembler.begin(live).expect("idle assembler accepts");

        assert!(assembler.accepts(live));
        assert!(!assembler.accepts(target(1)));
    }
}
