use gpui::prelude::FluentBuilder;
use gpui::*;
use gpui_component::{
    ActiveTheme, Icon, IconName, Selectable, Sizable,
    button::{Button, ButtonVariants},
    h_flex, v_flex,
};
use koda_service::Topic;

use crate::chat::events::TopicSelected;

/// Dropdown scoping the assistant to one documentation set.
///
/// Selecting a different topic resets the conversation, so the parent view
/// treats [`TopicSelected`] as a session boundary, not a lightweight filter.
pub struct TopicSelector {
    current_topic: String,
    is_open: bool,
    topics: Vec<Topic>,
}

impl EventEmitter<TopicSelected> for TopicSelector {}

impl TopicSelector {
    pub fn new(topics: Vec<Topic>, current_topic: impl Into<String>) -> Self {
        Self {
            current_topic: current_topic.into(),
            is_open: false,
            topics,
        }
    }

    pub fn current_topic(&self) -> &str {
        &self.current_topic
    }

    pub fn set_topics(&mut self, topics: Vec<Topic>, cx: &mut Context<Self>) {
        self.topics = topics;

        if !self
            .topics
            .iter()
            .any(|topic| topic.value == self.current_topic)
            && let Some(first_topic) = self.topics.first()
        {
            self.current_topic = first_topic.value.clone();
        }

        cx.notify();
    }

    fn toggle_open(
        &mut self,
        _event: &gpui::ClickEvent,
        _window: &mut Window,
        cx: &mut Context<Self>,
    ) {
        self.is_open = !self.is_open;
        cx.notify();
    }

    fn select_topic(&mut self, value: String, _window: &mut Window, cx: &mut Context<Self>) {
        self.is_open = false;
        if self.current_topic != value {
            self.current_topic = value.clone();
            cx.emit(TopicSelected { value });
        }
        cx.notify();
    }

    fn current_topic_label(&self) -> String {
        self.topics
            .iter()
            .find(|topic| topic.value == self.current_topic)
            .map(|topic| topic.label.clone())
            .unwrap_or_else(|| self.current_topic.clone())
    }
}

impl Render for TopicSelector {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let theme = cx.theme();
        let display_label = self.current_topic_label();
        let is_open = self.is_open;

        h_flex()
            .id("topic-selector")
            .relative()
            .child(
                Button::new("topic-selector-button")
                    .ghost()
                    .small()
                    .child(display_label)
                    .when(is_open, |button| button.selected(true))
                    .on_click(cx.listener(Self::toggle_open)),
            )
            .when(is_open, |element| {
                element.child(
                    v_flex()
                        .id("topic-selector-dropdown")
                        .absolute()
                        .top(px(32.))
                        .right_0()
                        .w(px(260.))
                        .bg(theme.popover)
                        .rounded_md()
                        .shadow_md()
                        .border_1()
                        .border_color(theme.border)
                        .py_1()
                        .children(self.topics.iter().map(|topic| {
                            let value = topic.value.clone();
                            let is_selected = value == self.current_topic;

                            h_flex()
                                .id(ElementId::Name(format!("topic-option-{value}").into()))
                                .px_3()
                                .py_2()
                                .gap_2()
                                .items_center()
                                .cursor_pointer()
                                .when(is_selected, |element| {
                                    element.bg(theme.primary.opacity(0.1))
                                })
                                .when(!is_selected, |element| {
                                    element.hover(|element| element.bg(theme.muted.opacity(0.5)))
                                })
                                .on_click(cx.listener(move |this, _event, window, cx| {
                                    this.select_topic(value.clone(), window, cx);
                                }))
                                .child(
                                    div()
                                        .flex_1()
                                        .text_sm()
                                        .text_color(theme.foreground)
                                        .child(topic.label.clone()),
                                )
                                .when(is_selected, |element| {
                                    element.child(
                                        Icon::new(IconName::Check)
                                            .size(px(16.))
                                            .text_color(theme.primary),
                                    )
                                })
                                .into_any_element()
                        })),
                )
            })
    }
}
