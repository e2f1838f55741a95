use crate::error::{ChatResult, EmptyTranscriptSnafu};
use crate::message::{Message, MessageStatus, Role};

/// Ordered, append-only message list.
///
/// History never reorders and never shrinks while a session is alive; the
/// only in-place mutation allowed is extending or finalizing the last
/// message, which keeps every earlier entry effectively frozen.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Concatenates `fragment` onto the last message's content.
    pub fn append_to_last(&mut self, fragment: &str) -> ChatResult<()> {
        let last = self.messages.last_mut().ok_or_else(|| {
            EmptyTranscriptSnafu {
                stage: "append-to-last",
            }
            .build()
        })?;
        last.content.push_str(fragment);
        Ok(())
    }

    /// Marks the last message with a terminal status.
    pub fn finalize_last(&mut self, status: MessageStatus) -> ChatResult<()> {
        let last = self.messages.last_mut().ok_or_else(|| {
            EmptyTranscriptSnafu {
                stage: "finalize-last",
            }
            .build()
        })?;
        last.status = status;
        Ok(())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Read-only clone handed to rendering code.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_role(&self) -> Option<Role> {
        self.messages.last().map(|message| message.role)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_to_last_without_messages_is_an_error() {
        let mut transcript = Transcript::new();
        let error = transcript.append_to_last("hi").unwrap_err();
        assert!(error.to_string().contains("no message"));
    }

    #[test]
    fn append_to_last_extends_only_the_tail() {
        let mut transcript = Transcript::new();
        transcript.push(Message::user("first", Vec::new()));
        transcript.push(Message::assistant_streaming());

        transcript.append_to_last("Hi").expect("tail exists");
        transcript.append_to_last(" there").expect("tail exists");

        assert_eq!(transcript.messages()[0].content, "first");
        assert_eq!(transcript.messages()[1].content, "Hi there");
    }

    #[test]
    fn snapshot_is_detached_from_later_mutation() {
        let mut transcript = Transcript::new();
        transcript.push(Message::assistant_streaming());
        let snapshot = transcript.snapshot();

        transcript.append_to_last("tok").expect("tail exists");

        assert_eq!(snapshot[0].content, "");
        assert_eq!(transcript.messages()[0].content, "tok");
    }

    #[test]
    fn ordering_is_preserved_across_pushes() {
        let mut transcript = Transcript::new();
        for index in 0..5 {
            transcript.push(Message::user(format!("m{index}"), Vec::new()));
        }
        let contents = transcript
            .messages()
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(contents, ["m0", "m1", "m2", "m3", "m4"]);
    }
}
