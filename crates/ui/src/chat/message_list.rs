use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::ops::Range;
use std::rc::Rc;

use gpui::prelude::FluentBuilder as _;
use gpui::*;
use gpui_component::{
    ActiveTheme, Icon, IconName, Sizable,
    button::{Button, ButtonVariants},
    h_flex,
    label::Label,
    text::TextView,
    v_flex, v_virtual_list,
};
use koda_chat::{
    AttachmentKind, AttachmentRef, Message, MessageStatus, RenderedBlock, Role, Segment,
    render_code_block, segment_markdown,
};

use crate::chat::renderer::{DiagramRenderer, diagram_element};
use crate::chat::scroll_manager::ScrollManager;

const DEFAULT_CONTENT_WIDTH: Pixels = px(680.);
const LIST_HORIZONTAL_PADDING: Pixels = px(16.);
const CONTENT_WIDTH_CHANGE_EPSILON: f32 = 1.0;
const USER_BUBBLE_MAX_WIDTH: Pixels = px(540.);
const USER_BUBBLE_PADDING_X: Pixels = px(14.);
const USER_BUBBLE_PADDING_Y: Pixels = px(10.);
const ASSISTANT_LABEL_HEIGHT: Pixels = px(16.);
const ASSISTANT_LABEL_GAP: Pixels = px(8.);
const STREAMING_INDICATOR_HEIGHT: Pixels = px(20.);
const STREAMING_INDICATOR_GAP: Pixels = px(8.);
const ERROR_ROW_HEIGHT: Pixels = px(20.);
const ERROR_ROW_GAP: Pixels = px(8.);
const ATTACHMENT_ROW_HEIGHT: Pixels = px(24.);
const ESTIMATED_TEXT_LINE_HEIGHT: Pixels = px(18.);
const ESTIMATED_CHAR_WIDTH: f32 = 7.0;
const MARKDOWN_SAFE_FALLBACK_THRESHOLD_BYTES: usize = 128 * 1024;

struct SizeCacheEntry {
    layout_hash: u64,
    height: Pixels,
    measured: bool,
}

/// Virtualised transcript view.
///
/// Receives read-only message snapshots from the chat view; all mutation
/// goes through the session controller upstream.
pub struct MessageList {
    messages: Vec<Message>,
    waiting: bool,
    banner_error: Option<String>,
    item_sizes: Rc<Vec<Size<Pixels>>>,
    scroll_manager: ScrollManager,
    size_cache: Vec<SizeCacheEntry>,
    content_width: Option<Pixels>,
}

impl MessageList {
    pub fn new(_cx: &mut Context<Self>) -> Self {
        Self {
            messages: Vec::new(),
            waiting: false,
            banner_error: None,
            item_sizes: Rc::new(Vec::new()),
            scroll_manager: ScrollManager::new(),
            size_cache: Vec::new(),
            content_width: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn set_messages(
        &mut self,
        messages: Vec<Message>,
        waiting: bool,
        banner_error: Option<String>,
        cx: &mut Context<Self>,
    ) {
        let should_request_follow = messages.len() > self.messages.len()
            || messages
                .iter()
                .any(|message| message.status == MessageStatus::Streaming);

        self.messages = messages;
        self.waiting = waiting;
        self.banner_error = banner_error;
        self.rebuild_item_sizes();

        if should_request_follow {
            self.scroll_manager.request_scroll_if_following();
        }

        cx.notify();
    }

    /// Arms follow mode for a freshly opened stream.
    pub fn engage_follow(&mut self, cx: &mut Context<Self>) {
        self.scroll_manager.engage();
        cx.notify();
    }

    /// Stops tail tracking the instant the stream goes terminal.
    pub fn disengage_follow(&mut self, cx: &mut Context<Self>) {
        self.scroll_manager.disengage();
        cx.notify();
    }

    /// One ~100ms poll tick while a stream is open.
    pub fn follow_tick(&mut self, cx: &mut Context<Self>) {
        self.scroll_manager.update_follow_state();
        if self.scroll_manager.follow_tick() {
            cx.notify();
        }
    }

    pub fn reset_scroll_tracking(&mut self, cx: &mut Context<Self>) {
        self.scroll_manager.reset();
        cx.notify();
    }

    fn update_content_width(&mut self, cx: &mut Context<Self>) {
        let list_width = self.scroll_manager.bounds().size.width;
        if list_width <= Pixels::ZERO {
            return;
        }

        let next_content_width = max_pixels(px(1.), list_width - LIST_HORIZONTAL_PADDING * 2);
        let width_changed = self.content_width.is_none_or(|current| {
            (f32::from(current) - f32::from(next_content_width)).abs()
                > CONTENT_WIDTH_CHANGE_EPSILON
        });

        if width_changed {
            self.content_width = Some(next_content_width);

            // Mark cached measurements dirty so item heights can be recalculated.
            for entry in self.size_cache.iter_mut() {
                entry.measured = false;
            }

            self.rebuild_item_sizes();
            cx.notify();
        }
    }

    fn rebuild_item_sizes(&mut self) {
        let content_width = self.content_width.unwrap_or(DEFAULT_CONTENT_WIDTH);
        self.size_cache.truncate(self.messages.len());

        let mut sizes = Vec::with_capacity(self.messages.len());
        for (index, message) in self.messages.iter().enumerate() {
            let next_hash = layout_hash(message);
            let estimated_height = estimate_message_height(message, content_width);

            if index >= self.size_cache.len() {
                self.size_cache.push(SizeCacheEntry {
                    layout_hash: next_hash,
                    height: estimated_height,
                    measured: false,
                });
            }

            // Slots are positional: history only appends or mutates its tail,
            // so a hash change is the only invalidation that matters.
            let entry = &mut self.size_cache[index];
            if entry.layout_hash != next_hash {
                entry.layout_hash = next_hash;
                entry.height = estimated_height;
                entry.measured = false;
            } else if !entry.measured {
                entry.height = estimated_height;
            }

            sizes.push(size(px(0.), entry.height));
        }

        self.item_sizes = Rc::new(sizes);
    }

    fn measure_visible_items(
        &mut self,
        visible_range: Range<usize>,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) {
        if self.messages.is_empty() {
            return;
        }

        let content_width = self.content_width.unwrap_or(DEFAULT_CONTENT_WIDTH);
        let available_space = size(
            AvailableSpace::Definite(content_width),
            AvailableSpace::MinContent,
        );
        let mut updated = false;

        for index in visible_range {
            let Some(message) = self.messages.get(index).cloned() else {
                continue;
            };

            let mut row = self.render_message_row(&message, index, cx);
            let measured_height = row.layout_as_root(available_space, window, cx).height;
            let Some(entry) = self.size_cache.get_mut(index) else {
                continue;
            };
            let height_changed = !entry.measured || pixels_changed(entry.height, measured_height);
            if height_changed {
                entry.height = measured_height;
                updated = true;
            }
            entry.measured = true;
        }

        if updated {
            self.rebuild_item_sizes();
            cx.notify();
        }
    }

    fn render_message_row(
        &self,
        message: &Message,
        index: usize,
        cx: &mut Context<Self>,
    ) -> AnyElement {
        let theme = cx.theme();

        if message.role == Role::User {
            let content = if message.content.is_empty() {
                " ".to_string()
            } else {
                message.content.clone()
            };

            return v_flex()
                .w_full()
                .items_end()
                .gap_1()
                .when(!message.attachments.is_empty(), |column| {
                    column.child(render_attachment_rows(&message.attachments, cx))
                })
                .child(
                    div()
                        .max_w(USER_BUBBLE_MAX_WIDTH)
                        .px(USER_BUBBLE_PADDING_X)
                        .py(USER_BUBBLE_PADDING_Y)
                        .rounded_lg()
                        .bg(theme.accent)
                        .text_color(theme.accent_foreground)
                        .child(Label::new(content).text_sm()),
                )
                .into_any_element();
        }

        let content = self.render_assistant_content(message, index, cx);
        let error_message = if let MessageStatus::Error(error) = &message.status {
            Some(error.clone())
        } else {
            None
        };

        v_flex()
            .w_full()
            .gap_2()
            .child(
                Label::new("Assistant")
                    .text_xs()
                    .text_color(theme.foreground.opacity(0.5)),
            )
            .child(content)
            .when(message.status == MessageStatus::Streaming, |column| {
                column.child(
                    h_flex()
                        .w_full()
                        .gap_2()
                        .items_center()
                        .child(div().size(px(8.)).rounded_full().bg(theme.primary))
                        .child(
                            Label::new("Streaming")
                                .text_xs()
                                .text_color(theme.foreground.opacity(0.65)),
                        ),
                )
            })
            .when_some(error_message, |column, error| {
                column.child(
                    Label::new(format!("Error: {error}"))
                        .text_xs()
                        .text_color(theme.danger),
                )
            })
            .into_any_element()
    }

    fn render_assistant_content(&self, message: &Message, index: usize, cx: &App) -> AnyElement {
        if message.content.trim().is_empty() {
            return Label::new("(empty response)").text_sm().into_any_element();
        }

        if message.content.len() > MARKDOWN_SAFE_FALLBACK_THRESHOLD_BYTES {
            // Keep rendering predictable by skipping markdown for oversized payloads.
            return Label::new(message.content.clone())
                .text_sm()
                .into_any_element();
        }

        let segments = segment_markdown(&message.content);
        v_flex()
            .w_full()
            .gap_2()
            .children(
                segments
                    .into_iter()
                    .enumerate()
                    .map(|(segment_index, segment)| match segment {
                        Segment::Markdown(text) => {
                            markdown_view(format!("assistant-md-{index}-{segment_index}"), text)
                        }
                        Segment::Code { language, code } => {
                            match render_code_block(Some(&DiagramRenderer), &language, &code) {
                                RenderedBlock::Custom(diagram) => diagram_element(&diagram, cx),
                                RenderedBlock::Fallback { language, code } => markdown_view(
                                    format!("assistant-code-{index}-{segment_index}"),
                                    refence(&language, &code),
                                ),
                            }
                        }
                    }),
            )
            .into_any_element()
    }

    fn render_waiting_indicator(&self, cx: &Context<Self>) -> AnyElement {
        let theme = cx.theme();

        h_flex()
            .w_full()
            .px_4()
            .pb_2()
            .gap_2()
            .items_center()
            .child(div().size(px(8.)).rounded_full().bg(theme.primary))
            .child(
                Label::new("Waiting for response...")
                    .text_xs()
                    .text_color(theme.foreground.opacity(0.65)),
            )
            .into_any_element()
    }

    fn render_error_banner(&self, error: &str, cx: &Context<Self>) -> AnyElement {
        let theme = cx.theme();

        h_flex()
            .w_full()
            .px_4()
            .pb_2()
            .child(
                Label::new(error.to_string())
                    .text_xs()
                    .text_color(theme.danger),
            )
            .into_any_element()
    }
}

impl Render for MessageList {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        self.update_content_width(cx);
        self.scroll_manager.update_follow_state();
        self.scroll_manager.apply_pending_scroll();

        let waiting = self.waiting;
        let banner_error = self.banner_error.clone();

        v_flex()
            .size_full()
            .min_h_0()
            .child(
                v_virtual_list(
                    cx.entity().clone(),
                    "message-list",
                    self.item_sizes.clone(),
                    |this, visible_range, window, cx| {
                        // Measure only visible rows so long histories keep
                        // O(visible) layout work.
                        this.update_content_width(cx);
                        this.measure_visible_items(visible_range.clone(), window, cx);
                        visible_range
                            .filter_map(|index| {
                                this.messages
                                    .get(index)
                                    .cloned()
                                    .map(|message| this.render_message_row(&message, index, cx))
                            })
                            .collect::<Vec<_>>()
                    },
                )
                .size_full()
                .px_4()
                .py_3()
                .gap_4()
                .track_scroll(self.scroll_manager.handle()),
            )
            .when(waiting, |element| {
                element.child(self.render_waiting_indicator(cx))
            })
            .when_some(banner_error, |element, error| {
                element.child(self.render_error_banner(&error, cx))
            })
    }
}

/// Markdown view with the shared copy-code affordance.
fn markdown_view(id: String, text: String) -> AnyElement {
    TextView::markdown(ElementId::Name(SharedString::from(id)), text)
        .code_block_actions(|code_block, _window, _cx| {
            let code = code_block.code().to_string();
            let mut hasher = DefaultHasher::new();
            hasher.write(code.as_bytes());
            let copy_button_id = format!("copy-code-{}", hasher.finish());

            h_flex().w_full().justify_end().child(
                Button::new(copy_button_id)
                    .ghost()
                    .small()
                    .icon(IconName::Copy)
                    .child("Copy")
                    .on_click(move |_, _, cx| {
                        cx.write_to_clipboard(ClipboardItem::new_string(code.clone()));
                    }),
            )
        })
        .selectable(true)
        .into_any_element()
}

/// Rebuilds a fenced block for literal display after a declined or failed
/// custom render.
fn refence(language: &str, code: &str) -> String {
    let mut text = format!("```{language}\n{code}");
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str("```\n");
    text
}

fn render_attachment_rows(attachments: &[AttachmentRef], cx: &App) -> AnyElement {
    let theme = cx.theme();

    v_flex()
        .gap_1()
        .items_end()
        .children(attachments.iter().map(|attachment| {
            let name_color = if attachment.kind == AttachmentKind::Image {
                theme.primary
            } else {
                theme.foreground
            };

            h_flex()
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
                    Label::new(attachment.file_name.clone())
                        .text_xs()
                        .text_color(name_color),
                )
        }))
        .into_any_element()
}

fn layout_hash(message: &Message) -> u64 {
    let mut hasher = DefaultHasher::new();

    let role_tag = match message.role {
        Role::User => 0,
        Role::Assistant => 1,
    };
    hasher.write_u8(role_tag);

    match &message.status {
        MessageStatus::Streaming => hasher.write_u8(0),
        MessageStatus::Done => hasher.write_u8(1),
        MessageStatus::Error(error) => {
            hasher.write_u8(2);
            hasher.write(error.as_bytes());
        }
    }

    for attachment in &message.attachments {
        hasher.write(attachment.file_name.as_bytes());
        hasher.write(attachment.key.to_string().as_bytes());
    }

    hasher.write(message.content.as_bytes());
    hasher.finish()
}

fn estimate_message_height(message: &Message, content_width: Pixels) -> Pixels {
    let attachments_height = if message.attachments.is_empty() {
        Pixels::ZERO
    } else {
        ATTACHMENT_ROW_HEIGHT * message.attachments.len()
    };

    match message.role {
        Role::User => {
            let bubble_width = min_pixels(content_width, USER_BUBBLE_MAX_WIDTH);
            let text_width = max_pixels(px(1.), bubble_width - USER_BUBBLE_PADDING_X * 2);
            let text_height = estimate_text_height(&message.content, text_width);
            text_height + USER_BUBBLE_PADDING_Y * 2 + attachments_height
        }
        Role::Assistant => {
            let text_height = if message.content.is_empty() {
                ESTIMATED_TEXT_LINE_HEIGHT
            } else {
                estimate_text_height(&message.content, content_width)
            };

            let mut total_height = ASSISTANT_LABEL_HEIGHT + ASSISTANT_LABEL_GAP + text_height;
            if message.status == MessageStatus::Streaming {
                total_height += STREAMING_INDICATOR_GAP + STREAMING_INDICATOR_HEIGHT;
            }
            if matches!(message.status, MessageStatus::Error(_)) {
                total_height += ERROR_ROW_GAP + ERROR_ROW_HEIGHT;
            }

            total_height + attachments_height
        }
    }
}

fn estimate_text_height(content: &str, width: Pixels) -> Pixels {
    if content.is_empty() {
        return ESTIMATED_TEXT_LINE_HEIGHT;
    }

    let width_as_f32 = f32::from(width);
    let chars_per_line = (width_as_f32 / ESTIMATED_CHAR_WIDTH).floor().max(1.0) as usize;

    let mut line_count = 0usize;
    for line in content.lines() {
        let char_count = line.chars().count().max(1);
        line_count += char_count.div_ceil(chars_per_line);
    }

    // Account for the trailing empty line when content ends with a newline.
    if content.ends_with('\n') {
        line_count += 1;
    }

    ESTIMATED_TEXT_LINE_HEIGHT * line_count.max(1)
}

fn max_pixels(a: Pixels, b: Pixels) -> Pixels {
    if f32::from(a) >= f32::from(b) { a } else { b }
}

fn min_pixels(a: Pixels, b: Pixels) -> Pixels {
    if f32::from(a) <= f32::from(b) { a } else { b }
}

fn pixels_changed(a: Pixels, b: Pixels) -> bool {
    (f32::from(a) - f32::from(b)).abs() > 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript_fixture(count: usize) -> Vec<Message> {
        (0..count)
            .map(|index| {
                let role = if index % 2 == 0 {
                    Role::User
                } else {
                    Role::Assistant
                };
                let status = if index == count - 1 {
                    MessageStatus::Streaming
                } else {
                    MessageStatus::Done
                };

                Message::new(
                    role,
                    format!("message-{index}: virtualization fixture payload"),
                    Vec::new(),
                    status,
                )
            })
            .collect()
    }

    #[test]
    fn tail_mutation_invalidates_only_the_final_row_hash() {
        let mut messages = transcript_fixture(2_000);
        let content_width = px(680.);

        let heights_before = messages
            .iter()
            .map(|message| estimate_message_height(message, content_width))
            .collect::<Vec<_>>();
        let hashes_before = messages.iter().map(layout_hash).collect::<Vec<_>>();

        assert_eq!(heights_before.len(), 2_000);
        assert!(heights_before.iter().all(|height| *height > Pixels::ZERO));

        if let Some(last_message) = messages.last_mut() {
            last_message.content.push_str(" [finalized]");
            last_message.status = MessageStatus::Done;
        }

        let hashes_after = messages.iter().map(layout_hash).collect::<Vec<_>>();

        assert_eq!(hashes_before[..1_999], hashes_after[..1_999]);
        assert_ne!(hashes_before[1_999], hashes_after[1_999]);
    }

    #[test]
    fn attachments_grow_the_estimated_row() {
        let bare = Message::user("describe", Vec::new());
        let with_attachment = Message::user(
            "describe",
            vec![AttachmentRef {
                key: koda_chat::AttachmentKey::mint(),
                file_name: "layout.png".to_string(),
                kind: AttachmentKind::Image,
                preview_url: None,
            }],
        );

        let width = px(680.);
        assert!(
            estimate_message_height(&with_attachment, width)
                > estimate_message_height(&bare, width)
        );
    }

    #[test]
    fn refence_reconstructs_a_well_formed_block() {
        assert_eq!(refence("java", "int x;\n"), "```java\nint x;\n```\n");
        assert_eq!(refence("", "raw"), "```\nraw\n```\n");
    }
}
