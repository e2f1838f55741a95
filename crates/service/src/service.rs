use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// A documentation topic the assistant can be scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub label: String,
    pub value: String,
}

impl Topic {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Topics the assistant knows documentation sets for.
pub fn supported_topics() -> Vec<Topic> {
    vec![
        Topic::new("Flow", "flow"),
        Topic::new("Hilla with React", "hilla-react"),
        Topic::new("Hilla with Lit", "hilla-lit"),
    ]
}

/// Service-local speaker role, intentionally decoupled from the chat
/// crate's role enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMessage {
    pub role: ServiceRole,
    pub content: String,
}

impl ServiceMessage {
    pub fn new(role: ServiceRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
    pub model_id: String,
}

impl ServiceConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
            model_id: model_id.into().trim().to_string(),
        }
    }
}

/// Stream routing key. Chat ids are opaque strings at this boundary; the
/// UI layer owns the typed form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub chat_id: String,
    pub generation: u64,
}

impl StreamTarget {
    pub fn new(chat_id: impl Into<String>, generation: u64) -> Self {
        Self {
            chat_id: chat_id.into(),
            generation,
        }
    }
}

/// One streamed completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub target: StreamTarget,
    pub user_text: String,
    /// Topic value token scoping the system preamble (e.g. `hilla-react`).
    pub topic: Option<String>,
    /// Keys of attachments uploaded for this chat that accompany the message.
    pub attachment_keys: Vec<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl CompletionRequest {
    pub fn new(target: StreamTarget, user_text: impl Into<String>) -> Self {
        Self {
            target,
            user_text: user_text.into(),
            topic: None,
            attachment_keys: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_attachment_keys(mut self, keys: Vec<String>) -> Self {
        self.attachment_keys = keys;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Transport-agnostic stream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    Delta(String),
    Done,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEventMapped {
    pub target: StreamTarget,
    pub payload: StreamEventPayload,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ServiceWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ServiceError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("stream request for {target:?} has no user text"))]
    EmptyUserText {
        stage: &'static str,
        target: StreamTarget,
    },
    #[snafu(display("attachment upload has no file name"))]
    EmptyUploadName { stage: &'static str },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
}

/// Receiving side of one streamed completion.
///
/// Dropping the stream signals cancellation to the worker, so abandoning a
/// subscription can never leak a spinning network task.
pub struct CompletionEventStream {
    target: StreamTarget,
    events: mpsc::UnboundedReceiver<StreamEventMapped>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

/// A paired event stream and the worker future that feeds it. The caller
/// decides where the worker runs.
pub struct CompletionStreamHandle {
    pub stream: CompletionEventStream,
    pub worker: ServiceWorker,
}

impl CompletionEventStream {
    pub(crate) fn new(
        target: StreamTarget,
        events: mpsc::UnboundedReceiver<StreamEventMapped>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            target,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn target(&self) -> StreamTarget {
        self.target.clone()
    }

    pub async fn recv(&mut self) -> Option<StreamEventMapped> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamEventMapped> {
        self.events.try_recv().ok()
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for CompletionEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Upload payload handed to the attachment side-channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// The docs-assistant backend surface.
///
/// `close_chat` and `remove_attachment` are best-effort and idempotent;
/// callers may swallow their failures without corrupting local state.
pub trait DocsService: Send + Sync {
    fn id(&self) -> &str;
    fn supported_topics(&self) -> Vec<Topic>;
    fn history<'a>(&'a self, chat_id: &'a str) -> BoxFuture<'a, ServiceResult<Vec<ServiceMessage>>>;
    fn stream_chat(&self, request: CompletionRequest) -> ServiceResult<CompletionStreamHandle>;
    fn close_chat<'a>(&'a self, chat_id: &'a str) -> BoxFuture<'a, ServiceResult<()>>;
    fn upload_attachment<'a>(
        &'a self,
        chat_id: &'a str,
        upload: AttachmentUpload,
    ) -> BoxFuture<'a, ServiceResult<String>>;
    fn remove_attachment<'a>(
        &'a self,
        chat_id: &'a str,
        attachment_key: &'a str,
    ) -> BoxFuture<'a, ServiceResult<()>>;
}

pub(crate) fn make_event_stream_parts(
    target: StreamTarget,
) -> (
    mpsc::UnboundedSender<StreamEventMapped>,
    CompletionEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        CompletionEventStream::new(target, event_rx, cancel_tx),
        cancel_rx,
    )
}

/// Public constructor for transports implemented outside this crate.
pub fn make_event_stream(
    target: StreamTarget,
) -> (
    mpsc::UnboundedSender<StreamEventMapped>,
    CompletionEventStream,
    oneshot::Receiver<()>,
) {
    make_event_stream_parts(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> StreamTarget {
        StreamTarget::new("chat-1", 7)
    }

    #[tokio::test]
    async fn events_arrive_in_emission_order() {
        let (tx, mut stream, _cancel_rx) = make_event_stream(target());

        for payload in [
            StreamEventPayload::Delta("a".into()),
            StreamEventPayload::Delta("b".into()),
            StreamEventPayload::Done,
        ] {
            tx.send(StreamEventMapped {
                target: target(),
                payload,
            })
            .expect("receiver alive");
        }

        assert_eq!(
            stream.recv().await.map(|event| event.payload),
            Some(StreamEventPayload::Delta("a".into()))
        );
        assert_eq!(
            stream.recv().await.map(|event| event.payload),
            Some(StreamEventPayload::Delta("b".into()))
        );
        assert_eq!(
            stream.recv().await.map(|event| event.payload),
            Some(StreamEventPayload::Done)
        );
    }

    #[tokio::test]
    async fn dropping_the_stream_signals_cancellation() {
        let (_tx, stream, mut cancel_rx) = make_event_stream(target());
        drop(stream);
        assert!(cancel_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn explicit_cancel_fires_once() {
        let (_tx, mut stream, mut cancel_rx) = make_event_stream(target());
        assert!(stream.cancel());
        assert!(!stream.cancel());
        assert!(cancel_rx.try_recv().is_ok());
    }

    #[test]
    fn topic_catalog_is_stable() {
        let topics = supported_topics();
        let values = topics
            .iter()
            .map(|topic| topic.value.as_str())
            .collect::<Vec<_>>();
        assert_eq!(values, ["flow", "hilla-react", "hilla-lit"]);
    }
}
