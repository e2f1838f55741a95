use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};
use tokio::sync::{RwLock, mpsc, oneshot};
use uuid::Uuid;

use super::service::{
    AttachmentUpload, BoxFuture, CompletionRequest, CompletionStreamHandle, CompletionsFailedSnafu,
    DocsService, EmptyUploadNameSnafu, EmptyUserTextSnafu, HttpClientSnafu, MissingApiKeySnafu,
    ServiceConfig, ServiceError, ServiceMessage, ServiceResult, ServiceRole, ServiceWorker,
    StreamEventMapped, StreamEventPayload, StreamTarget, Topic, make_event_stream_parts,
    supported_topics,
};

pub const RIG_OPENAI_SERVICE_ID: &str = "openai";

// Persona prompt, parameterized on the selected framework. Mermaid is
// called out because the chat renderer can display those fences inline.
const SYSTEM_MESSAGE: &str = "\
You are Koda, an AI assistant specialized in Vaadin development.
Answer the user's questions regarding the {framework} framework.
Your primary goal is to assist users with their questions related to Vaadin development.
Your responses should be helpful, clear, succinct, and provide relevant code snippets.
Avoid making the user feel dumb by using phrases like \"straightforward\", \"easy\", \"simple\", \"obvious\", etc.
Refer to the provided documents for up-to-date information and best practices.
You may use Mermaid diagrams to visualize concepts if you deem it useful.
";

type RigStreamingResponse = rig::streaming::StreamingCompletionResponse<
    rig::providers::openai::responses_api::streaming::StreamingCompletionResponse,
>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredAttachment {
    file_name: String,
    mime_type: String,
    size_bytes: u64,
}

/// Per-chat server-side state: conversation memory plus the attachment
/// registry keyed by the opaque keys handed back from uploads.
#[derive(Debug, Default)]
struct ChatState {
    turns: Vec<ServiceMessage>,
    attachments: HashMap<String, StoredAttachment>,
}

type ChatRegistry = Arc<RwLock<HashMap<String, ChatState>>>;

/// [`DocsService`] over any OpenAI-compatible completions endpoint.
pub struct RigDocsAdapter {
    config: ServiceConfig,
    chats: ChatRegistry,
}

impl RigDocsAdapter {
    pub fn new(config: ServiceConfig) -> ServiceResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self {
            config,
            chats: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn build_client(config: &ServiceConfig) -> ServiceResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn preamble_for_topic(topic: Option<&str>) -> String {
        let label = topic
            .and_then(|value| {
                supported_topics()
                    .into_iter()
                    .find(|candidate| candidate.value == value)
                    .map(|candidate| candidate.label)
                    .or_else(|| Some(value.to_string()))
            })
            .filter(|label| !label.trim().is_empty())
            .unwrap_or_else(|| "Vaadin".to_string());

        SYSTEM_MESSAGE.replace("{framework}", &label)
    }

    /// Folds the attachment file names into the prompt body so the backend
    /// model sees what accompanied the message.
    fn prompt_text(user_text: &str, attachment_names: &[String]) -> String {
        if attachment_names.is_empty() {
            return user_text.to_string();
        }

        let mut text = String::from(user_text);
        text.push_str("\n\nAttached files:\n");
        for name in attachment_names {
            text.push_str("- ");
            text.push_str(name);
            text.push('\n');
        }
        text
    }

    fn to_rig_message(message: &ServiceMessage) -> Option<RigMessage> {
        match message.role {
            // System turns travel through the preamble, not the message list.
            ServiceRole::System => None,
            ServiceRole::User => Some(RigMessage::user(message.content.clone())),
            ServiceRole::Assistant => Some(RigMessage::assistant(message.content.clone())),
        }
    }

    async fn open_stream(
        config: &ServiceConfig,
        request: &CompletionRequest,
        history: &[ServiceMessage],
        prompt_text: String,
    ) -> ServiceResult<RigStreamingResponse> {
        let client = Self::build_client(config)?;
        let model = client.completion_model(config.model_id.clone());

        let history_messages = history
            .iter()
            .filter_map(Self::to_rig_message)
            .collect::<Vec<_>>();

        let builder = model
            .completion_request(RigMessage::user(prompt_text))
            .messages(history_messages)
            .preamble(Self::preamble_for_topic(request.topic.as_deref()));

        let builder = match request.temperature {
            Some(temperature) => builder.temperature(temperature),
            None => builder,
        };
        let builder = match request.max_tokens {
            Some(max_tokens) => builder.max_tokens(max_tokens),
            None => builder,
        };

        builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })
    }

    fn emit_error_event(
        event_tx: &mpsc::UnboundedSender<StreamEventMapped>,
        target: StreamTarget,
        error: ServiceError,
    ) {
        let _ = event_tx.send(StreamEventMapped {
            target,
            payload: StreamEventPayload::Error(error.to_string()),
        });
    }

    fn map_stream_item<R>(
        target: StreamTarget,
        item: StreamedAssistantContent<R>,
    ) -> Option<StreamEventMapped>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) => Some(StreamEventMapped {
                target,
                payload: StreamEventPayload::Delta(text.text),
            }),
            // Reasoning and tool traffic is backend-internal; the docs chat
            // only renders answer text.
            StreamedAssistantContent::Reasoning(_)
            | StreamedAssistantContent::ReasoningDelta { .. }
            | StreamedAssistantContent::ToolCall { .. }
            | StreamedAssistantContent::ToolCallDelta { .. }
            | StreamedAssistantContent::Final(_) => None,
        }
    }

    async fn record_exchange(chats: &ChatRegistry, chat_id: &str, user_text: String, reply: String) {
        let mut chats = chats.write().await;
        let state = chats.entry(chat_id.to_string()).or_default();
        state
            .turns
            .push(ServiceMessage::new(ServiceRole::User, user_text));
        state
            .turns
            .push(ServiceMessage::new(ServiceRole::Assistant, reply));
    }

    async fn run_stream_worker(
        config: ServiceConfig,
        request: CompletionRequest,
        history: Vec<ServiceMessage>,
        prompt_text: String,
        chats: ChatRegistry,
        event_tx: mpsc::UnboundedSender<StreamEventMapped>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let target = request.target.clone();
        let mut stream =
            match Self::open_stream(&config, &request, &history, prompt_text.clone()).await {
                Ok(stream) => stream,
                Err(error) => {
                    tracing::error!(
                        target = ?target,
                        provider_id = %config.provider_id,
                        model_id = %config.model_id,
                        error = %error,
                        "failed to open completion stream"
                    );
                    Self::emit_error_event(&event_tx, target, error);
                    return;
                }
            };

        let mut cancelled = false;
        let mut stream_failed = false;
        let mut reply = String::new();

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    cancelled = true;
                    // Stop upstream IO promptly once the subscriber is gone.
                    tracing::debug!(target = ?target, "completion stream cancelled");
                    stream.cancel();
                    break;
                }
                next_item = stream.next() => {
                    match next_item {
                        Some(Ok(item)) => {
                            if let Some(mapped) = Self::map_stream_item(target.clone(), item) {
                                if let StreamEventPayload::Delta(delta) = &mapped.payload {
                                    reply.push_str(delta);
                                }
                                if event_tx.send(mapped).is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Err(source)) => {
                            stream_failed = true;
                            tracing::warn!(
                                target = ?target,
                                error = %source,
                                "completion stream emitted an error chunk"
                            );
                            let error = ServiceError::CompletionsFailed {
                                stage: "stream-chunk",
                                source,
                            };
                            Self::emit_error_event(&event_tx, target.clone(), error);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if !cancelled && !stream_failed {
            // Conversation memory records completed exchanges only, so a
            // cancelled or failed stream never pollutes later prompts.
            Self::record_exchange(&chats, &target.chat_id, prompt_text, reply).await;
            let _ = event_tx.send(StreamEventMapped {
                target,
                payload: StreamEventPayload::Done,
            });
        }
    }

    fn attachment_names_in(state: &ChatState, keys: &[String]) -> Vec<String> {
        keys.iter()
            .filter_map(|key| {
                state
                    .attachments
                    .get(key)
                    .map(|attachment| attachment.file_name.clone())
            })
            .collect()
    }
}

impl DocsService for RigDocsAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn supported_topics(&self) -> Vec<Topic> {
        supported_topics()
    }

    fn history<'a>(&'a self, chat_id: &'a str) -> BoxFuture<'a, ServiceResult<Vec<ServiceMessage>>> {
        Box::pin(async move {
            let chats = self.chats.read().await;
            Ok(chats
                .get(chat_id)
                .map(|state| state.turns.clone())
                .unwrap_or_default())
        })
    }

    fn stream_chat(&self, request: CompletionRequest) -> ServiceResult<CompletionStreamHandle> {
        ensure!(
            !request.user_text.trim().is_empty(),
            EmptyUserTextSnafu {
                stage: "stream-chat",
                target: request.target.clone(),
            }
        );

        let chats = self.chats.clone();
        let config = self.config.clone();
        let (event_tx, stream, cancel_rx) = make_event_stream_parts(request.target.clone());

        let worker: ServiceWorker = Box::pin(async move {
            // Snapshot memory and attachment names inside the worker so the
            // synchronous call site never blocks on the registry lock.
            let (history, attachment_names) = {
                let registry = chats.read().await;
                let state = registry.get(&request.target.chat_id);
                let history = state.map(|state| state.turns.clone()).unwrap_or_default();
                let names = state
                    .map(|state| Self::attachment_names_in(state, &request.attachment_keys))
                    .unwrap_or_default();
                (history, names)
            };

            let prompt_text = Self::prompt_text(&request.user_text, &attachment_names);
            Self::run_stream_worker(
                config,
                request,
                history,
                prompt_text,
                chats,
                event_tx,
                cancel_rx,
            )
            .await;
        });

        Ok(CompletionStreamHandle { stream, worker })
    }

    fn close_chat<'a>(&'a self, chat_id: &'a str) -> BoxFuture<'a, ServiceResult<()>> {
        Box::pin(async move {
            let mut chats = self.chats.write().await;
            if chats.remove(chat_id).is_some() {
                tracing::debug!(chat_id, "closed chat and released its resources");
            }
            Ok(())
        })
    }

    fn upload_attachment<'a>(
        &'a self,
        chat_id: &'a str,
        upload: AttachmentUpload,
    ) -> BoxFuture<'a, ServiceResult<String>> {
        Box::pin(async move {
            ensure!(
                !upload.file_name.trim().is_empty(),
                EmptyUploadNameSnafu {
                    stage: "upload-attachment",
                }
            );

            let key = Uuid::now_v7().to_string();
            let mut chats = self.chats.write().await;
            let state = chats.entry(chat_id.to_string()).or_default();
            state.attachments.insert(
                key.clone(),
                StoredAttachment {
                    file_name: upload.file_name,
                    mime_type: upload.mime_type,
                    size_bytes: upload.bytes.len() as u64,
                },
            );
            Ok(key)
        })
    }

    fn remove_attachment<'a>(
        &'a self,
        chat_id: &'a str,
        attachment_key: &'a str,
    ) -> BoxFuture<'a, ServiceResult<()>> {
        Box::pin(async move {
            let mut chats = self.chats.write().await;
            if let Some(state) = chats.get_mut(chat_id) {
                // Unknown keys are fine: removal is idempotent.
                state.attachments.remove(attachment_key);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> RigDocsAdapter {
        RigDocsAdapter::new(ServiceConfig::new(
            "openai",
            "test-key",
            "http://localhost:11434/v1",
            "gpt-4o-mini",
        ))
        .expect("api key present")
    }

    fn upload(name: &str) -> AttachmentUpload {
        AttachmentUpload {
            file_name: name.to_string(),
            mime_type: "application/pdf".to_string(),
            bytes: vec![1, 2, 3],
        }
    }

    #[test]
    fn missing_api_key_is_rejected_up_front() {
        let error = RigDocsAdapter::new(ServiceConfig::new("openai", "", "", "gpt-4o-mini"))
            .err()
            .expect("empty key must fail");
        assert!(error.to_string().contains("missing API key"));
    }

    #[test]
    fn preamble_substitutes_the_topic_label() {
        let preamble = RigDocsAdapter::preamble_for_topic(Some("hilla-react"));
        assert!(preamble.contains("the Hilla with React framework"));
        assert!(!preamble.contains("{framework}"));
    }

    #[test]
    fn preamble_falls_back_for_unknown_or_missing_topics() {
        assert!(
            RigDocsAdapter::preamble_for_topic(Some("quarkus")).contains("the quarkus framework")
        );
        assert!(RigDocsAdapter::preamble_for_topic(None).contains("the Vaadin framework"));
    }

    #[test]
    fn prompt_text_lists_attached_files() {
        let text = RigDocsAdapter::prompt_text(
            "describe",
            &["layout.png".to_string(), "notes.pdf".to_string()],
        );
        assert!(text.starts_with("describe"));
        assert!(text.contains("- layout.png"));
        assert!(text.contains("- notes.pdf"));

        assert_eq!(RigDocsAdapter::prompt_text("plain", &[]), "plain");
    }

    #[tokio::test]
    async fn upload_then_remove_round_trips() {
        let adapter = adapter();
        let key = adapter
            .upload_attachment("chat-1", upload("notes.pdf"))
            .await
            .expect("upload succeeds");

        {
            let chats = adapter.chats.read().await;
            let state = chats.get("chat-1").expect("chat registered by upload");
            assert_eq!(
                RigDocsAdapter::attachment_names_in(state, &[key.clone()]),
                ["notes.pdf"]
            );
        }

        adapter
            .remove_attachment("chat-1", &key)
            .await
            .expect("removal succeeds");
        {
            let chats = adapter.chats.read().await;
            let state = chats.get("chat-1").expect("chat entry survives removal");
            assert!(RigDocsAdapter::attachment_names_in(state, &[key]).is_empty());
        }

        // Removing again (or for an unknown chat) stays Ok.
        adapter
            .remove_attachment("chat-1", "missing")
            .await
            .expect("idempotent");
        adapter
            .remove_attachment("other-chat", "missing")
            .await
            .expect("idempotent");
    }

    #[tokio::test]
    async fn upload_without_a_file_name_is_rejected() {
        let adapter = adapter();
        let error = adapter
            .upload_attachment("chat-1", upload("   "))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("no file name"));
    }

    #[tokio::test]
    async fn history_reflects_recorded_exchanges_and_close_clears_them() {
        let adapter = adapter();
        RigDocsAdapter::record_exchange(
            &adapter.chats,
            "chat-1",
            "question".to_string(),
            "answer".to_string(),
        )
        .await;

        let history = adapter.history("chat-1").await.expect("history readable");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, ServiceRole::User);
        assert_eq!(history[1].role, ServiceRole::Assistant);

        adapter.close_chat("chat-1").await.expect("close is ok");
        assert!(adapter.history("chat-1").await.expect("ok").is_empty());

        // Closing an already-closed chat is idempotent.
        adapter.close_chat("chat-1").await.expect("still ok");
    }

    #[test]
    fn stream_chat_rejects_empty_user_text() {
        let adapter = adapter();
        let request = CompletionRequest::new(StreamTarget::new("chat-1", 1), "   ");
        let error = adapter.stream_chat(request).err().expect("must reject");
        assert!(error.to_string().contains("no user text"));
    }

    #[test]
    fn stream_chat_hands_back_a_matching_target() {
        let adapter = adapter();
        let target = StreamTarget::new("chat-9", 3);
        let handle = adapter
            .stream_chat(CompletionRequest::new(target.clone(), "hello"))
            .expect("valid request");
        assert_eq!(handle.stream.target(), target);
        // The worker has not been polled, so no network traffic happened.
        drop(handle);
    }
}
