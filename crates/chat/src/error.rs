use snafu::Snafu;

use crate::message::StreamTarget;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("a completion stream is already active for {target:?}"))]
    SessionBusy {
        stage: &'static str,
        target: StreamTarget,
    },
    #[snafu(display("transcript has no message to extend"))]
    EmptyTranscript { stage: &'static str },
    #[snafu(display("no stream is active on `{stage}`"))]
    NoActiveStream { stage: &'static str },
    #[snafu(display("message text is empty and no attachment upload has completed"))]
    EmptyOutbound { stage: &'static str },
    #[snafu(display("code block renderer failed: {details}"))]
    RenderFailed {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("'{raw}' is not a valid {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;
