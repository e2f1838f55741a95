use gpui::prelude::FluentBuilder;
use gpui::*;
use gpui_component::{
    ActiveTheme, Disableable, Icon, IconName, Sizable,
    button::{Button, ButtonVariants},
    h_flex,
    input::{Input, InputEvent, InputState},
    label::Label,
    v_flex,
};
use koda_chat::{AttachmentKind, PendingId};

use crate::chat::events::{AttachRequested, RemoveAttachmentClicked, Submit};

/// Upload progress shown on one chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChipStatus {
    Uploading,
    Ready,
    Removing,
    Failed(String),
}

/// Display model for one tracked attachment, derived from the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentChip {
    pub id: PendingId,
    pub file_name: String,
    pub kind: AttachmentKind,
    pub status: ChipStatus,
}

pub struct MessageInput {
    input_state: Entity<InputState>,
    is_streaming: bool,
    pending_newline: bool,
    attachments: Vec<AttachmentChip>,
}

impl EventEmitter<Submit> for MessageInput {}
impl EventEmitter<AttachRequested> for MessageInput {}
impl EventEmitter<RemoveAttachmentClicked> for MessageInput {}

impl MessageInput {
    pub fn new(window: &mut Window, cx: &mut Context<Self>) -> Self {
        let input_state = cx.new(|cx| {
            InputState::new(window, cx)
                .placeholder("Ask about Vaadin development...")
                .clean_on_escape()
                .auto_grow(1, 8)
        });

        cx.subscribe_in(
            &input_state,
            window,
            |this, _, event: &InputEvent, window, cx| {
                if let InputEvent::PressEnter { secondary } = event {
                    if *secondary {
                        this.pending_newline = false;
                        return;
                    }

                    if this.pending_newline {
                        // Shift+Enter inserts a newline manually and then still
                        // emits PressEnter. Consume that synthetic enter so it
                        // never triggers submit.
                        this.pending_newline = false;
                    } else {
                        this.trim_trailing_newline(window, cx);
                        this.handle_submit(window, cx);
                    }
                }
            },
        )
        .detach();

        Self {
            input_state,
            is_streaming: false,
            pending_newline: false,
            attachments: Vec::new(),
        }
    }

    pub fn set_streaming(&mut self, streaming: bool, cx: &mut Context<Self>) {
        self.is_streaming = streaming;
        if !streaming {
            self.pending_newline = false;
        }
        cx.notify();
    }

    /// Mirrors the ledger into chip rows under the text area.
    pub fn set_attachments(&mut self, attachments: Vec<AttachmentChip>, cx: &mut Context<Self>) {
        self.attachments = attachments;
        cx.notify();
    }

    pub fn clear(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        self.input_state.update(cx, |state, cx| {
            state.set_value("", window, cx);
        });
        self.pending_newline = false;
    }

    fn has_ready_attachment(&self) -> bool {
        self.attachments
            .iter()
            .any(|chip| chip.status == ChipStatus::Ready)
    }

    fn handle_shift_enter(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        if self.is_streaming {
            return;
        }

        self.pending_newline = true;
        self.input_state.update(cx, |state, cx| {
            state.insert("\n", window, cx);
        });
        cx.notify();
    }

    fn trim_trailing_newline(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        self.input_state.update(cx, |state, cx| {
            let value = state.value().to_string();
            if let Some(trimmed) = value.strip_suffix('\n') {
                state.set_value(trimmed.to_string(), window, cx);
            }
        });
    }

    fn handle_submit(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        if self.is_streaming {
            return;
        }

        let content = self.input_state.read(cx).value().to_string();
        if content.trim().is_empty() && !self.has_ready_attachment() {
            return;
        }

        cx.emit(Submit { content });
        self.clear(window, cx);
    }

    fn render_attachment_chip(&self, chip: &AttachmentChip, cx: &Context<Self>) -> AnyElement {
        let theme = cx.theme();
        let id = chip.id;
        let status_label = match &chip.status {
            ChipStatus::Uploading => Some(("uploading".to_string(), theme.muted_foreground)),
            ChipStatus::Removing => Some(("removing".to_string(), theme.muted_foreground)),
            ChipStatus::Failed(reason) => Some((format!("failed: {reason}"), theme.danger)),
            ChipStatus::Ready => None,
        };
        let name_color = if chip.kind == AttachmentKind::Image {
            theme.primary
        } else {
            theme.foreground
        };

        h_flex()
            .id(ElementId::Name(format!("attachment-chip-{}", id.0).into()))
            .gap_1()
            .items_center()
            .px_2()
            .py_1()
            .rounded_md()
            .border_1()
            .border_color(theme.border)
            .bg(theme.muted.opacity(0.3))
            .child(
                Icon::new(IconName::File)
                    .size(px(14.))
                    .text_color(theme.muted_foreground),
            )
            .child(
                Label::new(chip.file_name.clone())
                    .text_xs()
                    .text_color(name_color),
            )
            .when_some(status_label, |element, (text, color)| {
                element.child(Label::new(text).text_xs().text_color(color))
            })
            .child(
                Button::new(ElementId::Name(
                    format!("attachment-remove-{}", id.0).into(),
                ))
                .ghost()
                .xsmall()
                .icon(IconName::Close)
                .on_click(cx.listener(move |this, _, _window, cx| {
                    this.handle_remove_attachment(id, cx);
                })),
            )
            .into_any_element()
    }

    fn handle_remove_attachment(&mut self, id: PendingId, cx: &mut Context<Self>) {
        cx.emit(RemoveAttachmentClicked { id });
    }

    fn handle_attach(&mut self, cx: &mut Context<Self>) {
        if self.is_streaming {
            return;
        }
        cx.emit(AttachRequested);
    }
}

impl Render for MessageInput {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let theme = cx.theme();
        let is_streaming = self.is_streaming;
        // Input stays disabled while a reply streams; there is no mid-stream
        // cancel, the user waits for the terminal event.
        let action = Button::new("send")
            .small()
            .primary()
            .icon(IconName::ArrowUp)
            .child("Send")
            .disabled(is_streaming)
            .on_click(cx.listener(|this, _, window, cx| {
                this.handle_submit(window, cx);
            }))
            .into_any_element();

        v_flex()
            .bg(theme.background)
            .gap_2()
            .p_3()
            .when(!self.attachments.is_empty(), |element| {
                element.child(
                    h_flex()
                        .w_full()
                        .flex_wrap()
                        .gap_2()
                        .children(
                            self.attachments
                                .clone()
                                .iter()
                                .map(|chip| self.render_attachment_chip(chip, cx)),
                        ),
                )
            })
            .child(
                div()
                    .w_full()
                    .px_3()
                    .py_2()
                    .rounded_lg()
                    .border_1()
                    .border_color(theme.border)
                    .bg(theme.background)
                    .on_key_down(cx.listener(|this, event: &KeyDownEvent, window, cx| {
                        if event.keystroke.key == "enter" && event.keystroke.modifiers.shift {
                            this.handle_shift_enter(window, cx);
                        }
                    }))
                    .child(
                        Input::new(&self.input_state)
                            .w_full()
                            .disabled(is_streaming),
                    ),
            )
            .child(
                h_flex()
                    .w_full()
                    .justify_between()
                    .items_center()
                    .child(
                        Button::new("attach")
                            .ghost()
                            .small()
                            .icon(IconName::Plus)
                            .child("Attach")
                            .on_click(cx.listener(|this, _, _window, cx| {
                                this.handle_attach(cx);
                            })),
                    )
                    .child(action),
            )
    }
}
