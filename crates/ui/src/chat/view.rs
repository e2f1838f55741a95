use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gpui::*;
use gpui_component::{ActiveTheme, v_flex};
use gpui_tokio_bridge::Tokio;

use koda_chat::{
    AttachmentKey, AttachmentKind, ChatId, GenerationId, Message, MessageStatus, PendingId,
    RemovalAction, Role, SessionController, StreamEvent, StreamTarget, UploadOutcome, UploadState,
};
use koda_service::{
    AttachmentUpload, CompletionEventStream, CompletionRequest, CompletionStreamHandle,
    DEFAULT_MODEL, DocsService, ServiceConfig, ServiceMessage, ServiceRole,
    StreamEventMapped as ServiceStreamEvent, StreamEventPayload as ServiceStreamPayload,
    StreamTarget as ServiceStreamTarget, create_service, supported_topics,
};

use crate::chat::events::{AttachRequested, RemoveAttachmentClicked, Submit, TopicSelected};
use crate::chat::message_input::{AttachmentChip, ChipStatus, MessageInput};
use crate::chat::message_list::MessageList;
use crate::chat::topic_selector::TopicSelector;
use crate::settings::state::{DEFAULT_ENDPOINT, ServiceSettings, SettingsStore};

/// Token bursts are folded into one transcript mutation per window.
pub const STREAM_DEBOUNCE_MS: u64 = 50;
/// Follow-tracking poll cadence while a stream is open.
pub const SCROLL_POLL_MS: u64 = 100;

/// Parent coordinator for the message list, input, topic selector and the
/// backend service.
///
/// Session semantics (transcript, stream assembly, attachment ledger) live
/// in [`SessionController`]; this view owns the IO around it: opening
/// streams, pumping events back in, uploads, and the scroll poll task.
pub struct ChatView {
    message_list: Entity<MessageList>,
    message_input: Entity<MessageInput>,
    topic_selector: Entity<TopicSelector>,
    service: Option<Arc<dyn DocsService>>,
    service_error: Option<String>,
    controller: SessionController,
    current_topic: String,
    stream_worker_task: Option<Task<Result<(), gpui_tokio_bridge::JoinError>>>,
    stream_reader_task: Option<Task<()>>,
    stream_debounce_task: Option<Task<()>>,
    scroll_poll_task: Option<Task<()>>,
    history_task: Option<Task<()>>,
    pending_stream_chunk: String,
}

impl ChatView {
    pub fn new(window: &mut Window, cx: &mut Context<Self>) -> Self {
        let message_list = cx.new(MessageList::new);
        let message_input = cx.new(|cx| MessageInput::new(window, cx));

        let settings = SettingsStore::load().settings();
        let (service, service_error) = Self::initialize_service(&settings);

        let topics = service
            .as_ref()
            .map(|service| service.supported_topics())
            .unwrap_or_else(supported_topics);
        let current_topic = if topics
            .iter()
            .any(|topic| topic.value == settings.default_topic)
        {
            settings.default_topic.clone()
        } else {
            topics
                .first()
                .map(|topic| topic.value.clone())
                .unwrap_or_default()
        };

        let topic_selector =
            cx.new(|_| TopicSelector::new(topics.clone(), current_topic.clone()));

        cx.subscribe(&message_input, |this, _, event: &Submit, cx| {
            this.handle_submit(event.clone(), cx);
        })
        .detach();

        cx.subscribe(&message_input, |this, _, _event: &AttachRequested, cx| {
            this.handle_attach_requested(cx);
        })
        .detach();

        cx.subscribe(
            &message_input,
            |this, _, event: &RemoveAttachmentClicked, cx| {
                this.handle_remove_attachment(*event, cx);
            },
        )
        .detach();

        cx.subscribe(&topic_selector, |this, _, event: &TopicSelected, cx| {
            this.handle_topic_selected(event.clone(), cx);
        })
        .detach();

        let mut this = Self {
            message_list,
            message_input,
            topic_selector,
            service,
            service_error,
            controller: SessionController::new(),
            current_topic,
            stream_worker_task: None,
            stream_reader_task: None,
            stream_debounce_task: None,
            scroll_poll_task: None,
            history_task: None,
            pending_stream_chunk: String::new(),
        };

        this.spawn_history_hydration(cx);
        this
    }

    pub fn topic_selector(&self) -> &Entity<TopicSelector> {
        &self.topic_selector
    }

    fn initialize_service(
        settings: &ServiceSettings,
    ) -> (Option<Arc<dyn DocsService>>, Option<String>) {
        if settings.is_valid()
            && let Some(config) = settings.to_service_config()
        {
            match create_service(config) {
                Ok(service) => {
                    tracing::info!("initialized docs service from persisted settings");
                    return (Some(service), None);
                }
                Err(error) => {
                    tracing::warn!(
                        "failed to create docs service from persisted settings, falling back: {}",
                        error
                    );
                }
            }
        }

        Self::service_from_environment()
    }

    fn service_from_environment() -> (Option<Arc<dyn DocsService>>, Option<String>) {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let Some(api_key) = api_key else {
            return (None, None);
        };

        let model_id = std::env::var("OPENAI_MODEL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let endpoint =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

        match create_service(ServiceConfig::new("openai", api_key, endpoint, model_id)) {
            Ok(service) => (Some(service), None),
            Err(error) => {
                tracing::error!("failed to initialize docs service adapter: {error}");
                (None, Some(format!("Service error: {}", error)))
            }
        }
    }

    /// Resets the session: clears the transcript and ledger, mints a fresh
    /// chat id and best-effort closes the superseded one remotely.
    pub fn clear_chat(&mut self, cx: &mut Context<Self>) {
        self.stream_worker_task = None;
        self.stream_reader_task = None;
        self.stream_debounce_task = None;
        self.scroll_poll_task = None;
        self.history_task = None;
        self.pending_stream_chunk.clear();
        self.service_error = None;

        let superseded = self.controller.reset();
        self.close_chat_remote(superseded, cx);

        self.message_input.update(cx, |input, cx| {
            input.set_streaming(false, cx);
        });
        self.refresh_attachment_chips(cx);
        self.message_list.update(cx, |list, cx| {
            list.reset_scroll_tracking(cx);
        });
        self.sync_messages(cx);
        cx.notify();
    }

    fn close_chat_remote(&mut self, superseded: ChatId, cx: &mut Context<Self>) {
        let Some(service) = self.service.clone() else {
            return;
        };

        // The remote resource being unreachable must not block local reset.
        Tokio::spawn(cx, async move {
            let chat_id = superseded.to_string();
            if let Err(error) = service.close_chat(&chat_id).await {
                tracing::debug!(chat_id, error = %error, "best-effort chat close failed");
            }
        })
        .detach();
    }

    fn handle_topic_selected(&mut self, event: TopicSelected, cx: &mut Context<Self>) {
        if event.value == self.current_topic {
            return;
        }

        // Switching the documentation set rebinds the assistant context, so
        // the conversation starts over.
        self.current_topic = event.value;
        self.clear_chat(cx);
    }

    fn handle_submit(&mut self, event: Submit, cx: &mut Context<Self>) {
        let Some(service) = self.service.clone() else {
            self.service_error = Some(
                "The assistant backend is not configured. Set OPENAI_API_KEY or add an API key \
                 to the settings file."
                    .to_string(),
            );
            self.sync_messages(cx);
            return;
        };

        let selected = self.controller.ledger().tracked_ids();
        let outbound = match self.controller.send(&event.content, &selected) {
            Ok(outbound) => outbound,
            Err(error) => {
                // Busy or blank sends are rejected synchronously and silently.
                tracing::debug!(error = %error, "send rejected");
                return;
            }
        };

        self.pending_stream_chunk.clear();
        self.stream_debounce_task = None;

        self.message_input.update(cx, |input, cx| {
            input.set_streaming(true, cx);
        });
        self.refresh_attachment_chips(cx);
        self.message_list.update(cx, |list, cx| {
            list.engage_follow(cx);
        });
        self.sync_messages(cx);

        let request = CompletionRequest::new(
            Self::chat_target_to_service(outbound.target),
            outbound.text.clone(),
        )
        .with_topic(self.current_topic.clone())
        .with_attachment_keys(
            outbound
                .attachments
                .iter()
                .map(|attachment| attachment.key.to_string())
                .collect(),
        );

        match service.stream_chat(request) {
            Ok(handle) => {
                self.spawn_stream_pipeline(handle, cx);
                self.start_scroll_poll(cx);
            }
            Err(error) => {
                self.controller
                    .apply_event(outbound.target, StreamEvent::Failed(error.to_string()));
                self.finalize_stream_ui(cx);
            }
        }
    }

    fn spawn_stream_pipeline(&mut self, handle: CompletionStreamHandle, cx: &mut Context<Self>) {
        self.stream_worker_task = Some(Tokio::spawn(cx, handle.worker));
        self.spawn_stream_reader(handle.stream, cx);
    }

    fn spawn_stream_reader(&mut self, mut stream: CompletionEventStream, cx: &mut Context<Self>) {
        let stream_target = stream.target();

        self.stream_reader_task = Some(cx.spawn(async move |this, cx| {
            while let Some(event) = stream.recv().await {
                let _ = this.update(cx, |this, cx| {
                    this.handle_stream_event(event, cx);
                });
            }

            let _ = this.update(cx, |this, cx| {
                this.handle_stream_reader_closed(stream_target, cx);
            });
        }));
    }

    fn handle_stream_event(&mut self, event: ServiceStreamEvent, cx: &mut Context<Self>) {
        // Service events carry stringly chat ids; normalize before the
        // stale-session checks so stream isolation stays consistent.
        let Some(target) = Self::service_target_to_chat(&event.target) else {
            tracing::warn!(target = ?event.target, "dropping stream event with malformed chat id");
            return;
        };

        if self.controller.active_target() != Some(target) {
            // Strict target equality prevents token leakage across session
            // and generation boundaries.
            return;
        }

        match event.payload {
            ServiceStreamPayload::Delta(chunk) => {
                self.pending_stream_chunk.push_str(&chunk);
                self.schedule_debounced_stream_flush(cx);
            }
            ServiceStreamPayload::Done => {
                self.flush_pending_stream_chunk(cx);
                self.controller.apply_event(target, StreamEvent::Completed);
                self.finalize_stream_ui(cx);
            }
            ServiceStreamPayload::Error(message) => {
                self.flush_pending_stream_chunk(cx);
                self.controller
                    .apply_event(target, StreamEvent::Failed(message));
                self.finalize_stream_ui(cx);
            }
        }
    }

    fn handle_stream_reader_closed(
        &mut self,
        target: ServiceStreamTarget,
        cx: &mut Context<Self>,
    ) {
        self.stream_worker_task = None;
        self.stream_reader_task = None;

        let Some(target) = Self::service_target_to_chat(&target) else {
            return;
        };

        if self.controller.active_target() == Some(target) {
            self.controller.apply_event(
                target,
                StreamEvent::Failed("completion stream ended before a terminal event".to_string()),
            );
            self.finalize_stream_ui(cx);
        }
    }

    fn schedule_debounced_stream_flush(&mut self, cx: &mut Context<Self>) {
        if self.stream_debounce_task.is_some() {
            return;
        }

        self.stream_debounce_task = Some(cx.spawn(async move |this, cx| {
            cx.background_executor()
                .timer(Duration::from_millis(STREAM_DEBOUNCE_MS))
                .await;

            let _ = this.update(cx, |this, cx| {
                this.flush_pending_stream_chunk(cx);
                this.stream_debounce_task = None;
            });
        }));
    }

    fn flush_pending_stream_chunk(&mut self, cx: &mut Context<Self>) {
        if self.pending_stream_chunk.is_empty() {
            return;
        }

        let Some(target) = self.controller.active_target() else {
            self.pending_stream_chunk.clear();
            return;
        };

        let chunk = std::mem::take(&mut self.pending_stream_chunk);
        if self
            .controller
            .apply_event(target, StreamEvent::Token(chunk))
        {
            self.sync_messages(cx);
        }
    }

    /// Post-terminal cleanup. The reader task is left to wind down on its
    /// own so it is never dropped from inside its own callback.
    fn finalize_stream_ui(&mut self, cx: &mut Context<Self>) {
        self.pending_stream_chunk.clear();
        self.stream_debounce_task = None;
        self.stream_worker_task = None;
        self.scroll_poll_task = None;

        self.message_list.update(cx, |list, cx| {
            list.disengage_follow(cx);
        });
        self.message_input.update(cx, |input, cx| {
            input.set_streaming(false, cx);
        });
        self.sync_messages(cx);
        cx.notify();
    }

    fn start_scroll_poll(&mut self, cx: &mut Context<Self>) {
        self.scroll_poll_task = Some(cx.spawn(async move |this, cx| {
            loop {
                cx.background_executor()
                    .timer(Duration::from_millis(SCROLL_POLL_MS))
                    .await;

                let still_streaming = this
                    .update(cx, |this, cx| {
                        if !this.controller.working() {
                            return false;
                        }
                        this.message_list.update(cx, |list, cx| {
                            list.follow_tick(cx);
                        });
                        true
                    })
                    .unwrap_or(false);

                if !still_streaming {
                    break;
                }
            }
        }));
    }

    fn handle_attach_requested(&mut self, cx: &mut Context<Self>) {
        if self.controller.working() {
            return;
        }

        let paths_rx = cx.prompt_for_paths(PathPromptOptions {
            files: true,
            directories: false,
            multiple: true,
        });

        cx.spawn(async move |this, cx| match paths_rx.await {
            Ok(Ok(Some(paths))) => {
                let _ = this.update(cx, |this, cx| {
                    this.start_uploads(paths, cx);
                });
            }
            Ok(Ok(None)) => {}
            Ok(Err(error)) => {
                tracing::warn!(error = %error, "file picker failed");
            }
            Err(_) => {}
        })
        .detach();
    }

    fn start_uploads(&mut self, paths: Vec<PathBuf>, cx: &mut Context<Self>) {
        let Some(service) = self.service.clone() else {
            return;
        };
        let chat_id = self.controller.chat_id();

        for path in paths {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            let mime_type = mime_for_path(&path);
            let kind = AttachmentKind::from_mime(&mime_type);
            let pending = self.controller.begin_upload(file_name.clone(), kind);
            let preview_url =
                (kind == AttachmentKind::Image).then(|| format!("file://{}", path.display()));

            let service = service.clone();
            let chat = chat_id.to_string();
            let io = Tokio::spawn(cx, async move {
                let bytes = std::fs::read(&path)
                    .map_err(|error| format!("failed to read {}: {error}", path.display()))?;
                service
                    .upload_attachment(
                        &chat,
                        AttachmentUpload {
                            file_name,
                            mime_type,
                            bytes,
                        },
                    )
                    .await
                    .map_err(|error| error.to_string())
            });

            cx.spawn(async move |this, cx| {
                let outcome = match io.await {
                    Ok(result) => result,
                    Err(join_error) => Err(format!("upload task failed: {join_error}")),
                };
                let _ = this.update(cx, |this, cx| {
                    this.apply_upload_outcome(pending, chat_id, preview_url, outcome, cx);
                });
            })
            .detach();
        }

        self.refresh_attachment_chips(cx);
    }

    fn apply_upload_outcome(
        &mut self,
        pending: PendingId,
        upload_chat_id: ChatId,
        preview_url: Option<String>,
        outcome: Result<String, String>,
        cx: &mut Context<Self>,
    ) {
        match outcome {
            Ok(raw_key) => match AttachmentKey::parse(&raw_key) {
                Ok(key) => match self.controller.finish_upload(pending, key, preview_url) {
                    UploadOutcome::RemoveRemote(key) => {
                        // Removal was requested while the upload was in flight.
                        self.remove_attachment_remote(upload_chat_id, key, cx);
                    }
                    UploadOutcome::Resolved | UploadOutcome::Discarded => {}
                },
                Err(error) => {
                    self.controller
                        .fail_upload(pending, format!("invalid attachment key: {error}"));
                }
            },
            Err(message) => {
                tracing::warn!(%message, "attachment upload failed");
                self.controller.fail_upload(pending, message);
            }
        }

        self.refresh_attachment_chips(cx);
    }

    fn handle_remove_attachment(&mut self, event: RemoveAttachmentClicked, cx: &mut Context<Self>) {
        match self.controller.request_remove(event.id) {
            RemovalAction::RemoveRemote(key) => {
                let chat_id = self.controller.chat_id();
                self.remove_attachment_remote(chat_id, key, cx);
            }
            RemovalAction::Deferred | RemovalAction::Forgotten => {}
        }

        self.refresh_attachment_chips(cx);
    }

    fn remove_attachment_remote(
        &mut self,
        chat_id: ChatId,
        key: AttachmentKey,
        cx: &mut Context<Self>,
    ) {
        let Some(service) = self.service.clone() else {
            return;
        };

        Tokio::spawn(cx, async move {
            let chat = chat_id.to_string();
            let attachment_key = key.to_string();
            if let Err(error) = service.remove_attachment(&chat, &attachment_key).await {
                // Per-attachment failure; the rest of the session is unaffected.
                tracing::warn!(error = %error, "failed to release remote attachment");
            }
        })
        .detach();
    }

    fn refresh_attachment_chips(&mut self, cx: &mut Context<Self>) {
        let chips = self
            .controller
            .ledger()
            .entries()
            .map(|(id, entry)| AttachmentChip {
                id,
                file_name: entry.file_name.clone(),
                kind: entry.kind,
                status: match &entry.state {
                    UploadState::Uploading {
                        remove_requested: true,
                    } => ChipStatus::Removing,
                    UploadState::Uploading { .. } => ChipStatus::Uploading,
                    UploadState::Ready(_) => ChipStatus::Ready,
                    UploadState::Failed(reason) => ChipStatus::Failed(reason.clone()),
                },
            })
            .collect::<Vec<_>>();

        self.message_input.update(cx, |input, cx| {
            input.set_attachments(chips, cx);
        });
    }

    fn spawn_history_hydration(&mut self, cx: &mut Context<Self>) {
        let Some(service) = self.service.clone() else {
            return;
        };
        let chat_id = self.controller.chat_id();

        let io = Tokio::spawn(cx, async move {
            let chat = chat_id.to_string();
            service.history(&chat).await
        });

        self.history_task = Some(cx.spawn(async move |this, cx| {
            let history = match io.await {
                Ok(Ok(history)) => history,
                Ok(Err(error)) => {
                    tracing::warn!(error = %error, "failed to fetch chat history");
                    return;
                }
                Err(_) => return,
            };

            let _ = this.update(cx, |this, cx| {
                if this.controller.chat_id() != chat_id {
                    return;
                }

                let messages = history
                    .into_iter()
                    .filter_map(service_message_to_chat)
                    .collect::<Vec<_>>();
                if messages.is_empty() {
                    return;
                }

                this.controller.hydrate(messages);
                this.sync_messages(cx);
                this.message_list.update(cx, |list, cx| {
                    list.reset_scroll_tracking(cx);
                });
            });
        }));
    }

    fn sync_messages(&mut self, cx: &mut Context<Self>) {
        let snapshot = self.controller.snapshot();
        let waiting = self.controller.awaiting_first_token();
        let banner = self
            .controller
            .stream_error()
            .map(str::to_string)
            .or_else(|| self.service_error.clone());

        self.message_list.update(cx, |list, cx| {
            list.set_messages(snapshot, waiting, banner, cx);
        });
    }

    fn chat_target_to_service(target: StreamTarget) -> ServiceStreamTarget {
        ServiceStreamTarget::new(target.chat_id.to_string(), target.generation.0)
    }

    fn service_target_to_chat(target: &ServiceStreamTarget) -> Option<StreamTarget> {
        ChatId::parse(&target.chat_id)
            .ok()
            .map(|chat_id| StreamTarget::new(chat_id, GenerationId::new(target.generation)))
    }
}

fn service_message_to_chat(message: ServiceMessage) -> Option<Message> {
    let role = match message.role {
        ServiceRole::User => Role::User,
        ServiceRole::Assistant => Role::Assistant,
        // System turns are backend context, never part of the visible chat.
        ServiceRole::System => return None,
    };

    Some(Message::new(
        role,
        message.content,
        Vec::new(),
        MessageStatus::Done,
    ))
}

/// Best-effort MIME classification for the upload side-channel.
fn mime_for_path(path: &PathBuf) -> String {
    let extension = path
        .extension()
        .map(|extension| extension.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png".to_string(),
        "jpg" | "jpeg" => "image/jpeg".to_string(),
        "gif" => "image/gif".to_string(),
        "webp" => "image/webp".to_string(),
        "svg" => "image/svg+xml".to_string(),
        "pdf" => "application/pdf".to_string(),
        "md" => "text/markdown".to_string(),
        "txt" => "text/plain".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

impl Render for ChatView {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let theme = cx.theme();

        v_flex()
            .id("chat-view")
            .relative()
            .size_full()
            .min_h_0()
            .overflow_hidden()
            .bg(theme.background)
            .child(
                div()
                    .id("chat-view-message-list")
                    .flex_1()
                    .min_h_0()
                    .child(self.message_list.clone()),
            )
            .child(
                div()
                    .id("chat-view-message-input")
                    .flex_shrink_0()
                    .w_full()
                    .border_t_1()
                    .border_color(theme.border)
                    .child(self.message_input.clone()),
            )
    }
}
