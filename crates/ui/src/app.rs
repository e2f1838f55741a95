use std::path::PathBuf;

use gpui::prelude::FluentBuilder;
use gpui::*;
use gpui_component::notification::NotificationList;
use gpui_component::{
    ActiveTheme, IconName, Sizable,
    button::{Button, ButtonVariants},
    h_flex, v_flex,
};

use crate::chat::ChatView;

/// Returns the default themes directory path.
/// This is a pure function to allow deterministic testing of path resolution.
pub fn default_themes_path() -> PathBuf {
    PathBuf::from("./themes")
}

#[cfg(target_os = "macos")]
const WINDOW_TOOLBAR_LEFT_SAFE_PADDING: f32 = 78.0;
#[cfg(not(target_os = "macos"))]
const WINDOW_TOOLBAR_LEFT_SAFE_PADDING: f32 = 16.0;
#[cfg(target_os = "windows")]
const WINDOW_TOOLBAR_RIGHT_SAFE_PADDING: f32 = 120.0;
#[cfg(not(target_os = "windows"))]
const WINDOW_TOOLBAR_RIGHT_SAFE_PADDING: f32 = 16.0;

/// Computes the top toolbar height using a Zed-style responsive formula.
///
/// This keeps the title area consistent across macOS and Linux while still
/// respecting user font scaling via rem size.
fn window_toolbar_height(window: &Window) -> Pixels {
    (1.75 * window.rem_size()).max(px(34.0))
}

gpui::actions!(shell, [ClearChat, Quit,]);

/// Main application shell that manages the root layout.
///
/// The shell provides:
/// - A toolbar with the assistant title, topic selector and clear control
/// - The chat view filling the remaining area
/// - Notification layer for toasts
pub struct ChatAppShell {
    /// Notification list entity for displaying toasts.
    notification_list: Entity<NotificationList>,
    chat_view: Entity<ChatView>,
    title_bar_should_move: bool,
}

impl ChatAppShell {
    pub fn new(
        notification_list: Entity<NotificationList>,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) -> Self {
        let chat_view = cx.new(|cx| ChatView::new(window, cx));

        Self {
            notification_list,
            chat_view,
            title_bar_should_move: false,
        }
    }

    /// Handles the clear-chat action: tears the session down and starts a
    /// fresh one.
    fn clear_chat(&mut self, cx: &mut Context<Self>) {
        self.chat_view
            .update(cx, |chat_view, cx| chat_view.clear_chat(cx));
    }
}

impl Render for ChatAppShell {
    fn render(&mut self, window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let theme = cx.theme();
        let toolbar_height = window_toolbar_height(window);

        div()
            .size_full()
            .relative()
            .bg(theme.background)
            .on_action(cx.listener(|this, _: &ClearChat, _window, cx| {
                this.clear_chat(cx);
            }))
            .child(
                v_flex().size_full().child(
                    v_flex()
                        .id("main-content")
                        .flex_1()
                        .w_full()
                        .min_w_0()
                        .min_h_0()
                        .pt(toolbar_height)
                        .overflow_hidden()
                        .child(self.chat_view.clone()),
                ),
            )
            .child(
                div()
                    .absolute()
                    .top_0()
                    .left_0()
                    .right_0()
                    .child(self.render_top_bar(window, toolbar_height, cx)),
            )
            .child(self.notification_list.clone())
    }
}

impl ChatAppShell {
    fn render_top_bar(
        &self,
        window: &Window,
        toolbar_height: Pixels,
        cx: &Context<Self>,
    ) -> impl IntoElement {
        let theme = cx.theme();
        let topic_selector = self.chat_view.read(cx).topic_selector().clone();

        h_flex()
            .id("app-top-bar")
            .window_control_area(WindowControlArea::Drag)
            .on_mouse_down_out(cx.listener(|this, _, _window, _cx| {
                this.title_bar_should_move = false;
            }))
            .on_mouse_up(
                MouseButton::Left,
                cx.listener(|this, _, _window, _cx| {
                    this.title_bar_should_move = false;
                }),
            )
            .on_mouse_down(
                MouseButton::Left,
                cx.listener(|this, _, _window, _cx| {
                    this.title_bar_should_move = true;
                }),
            )
            .on_mouse_move(cx.listener(|this, _, window, _cx| {
                if this.title_bar_should_move {
                    this.title_bar_should_move = false;
                    window.start_window_move();
                }
            }))
            .w_full()
            .h(toolbar_height)
            .flex_shrink_0()
            .pl(px(WINDOW_TOOLBAR_LEFT_SAFE_PADDING))
            .pr(px(WINDOW_TOOLBAR_RIGHT_SAFE_PADDING))
            .items_center()
            .justify_between()
            .bg(theme.background)
            .border_b_1()
            .border_color(theme.border)
            .child(
                div()
                    .text_sm()
                    .font_weight(FontWeight::SEMIBOLD)
                    .text_color(theme.foreground)
                    .child("Koda Docs Assistant"),
            )
            .child(
                h_flex()
                    .gap_2()
                    .items_center()
                    .child(topic_selector)
                    .child(
                        Button::new("clear-chat")
                            .ghost()
                            .small()
                            .icon(IconName::Plus)
                            .child("New chat")
                            .on_click(cx.listener(|this, _, _window, cx| {
                                this.clear_chat(cx);
                            })),
                    ),
            )
            .when(
                cfg!(target_os = "linux") && window.window_controls().window_menu,
                |title_bar| {
                    title_bar.on_mouse_down(MouseButton::Right, |event, window, _| {
                        window.show_window_menu(event.position);
                    })
                },
            )
            .child(self.render_linux_window_controls(window, cx))
    }

    fn render_linux_window_controls(&self, window: &Window, cx: &Context<Self>) -> AnyElement {
        #[cfg(target_os = "linux")]
        {
            let maximize_icon = if window.is_maximized() {
                IconName::WindowRestore
            } else {
                IconName::WindowMaximize
            };

            h_flex()
                .id("linux-window-controls")
                .items_center()
                // Prevent clicks on window controls from bubbling into title bar
                // gestures (e.g. double-click maximize), which can cause
                // double-toggle behavior.
                .on_mouse_down(MouseButton::Left, |_, _, cx| cx.stop_propagation())
                .on_mouse_down(MouseButton::Right, |_, _, cx| cx.stop_propagation())
                .gap_2()
                .ml_2()
                .child(
                    Button::new("linux-window-minimize")
                        .ghost()
                        .small()
                        .icon(IconName::WindowMinimize)
                        .on_click(cx.listener(|_, _, window, _| {
                            window.minimize_window();
                        })),
                )
                .child(
                    Button::new("linux-window-maximize")
                        .ghost()
                        .small()
                        .icon(maximize_icon)
                        .on_click(cx.listener(|_, _, window, _| {
                            window.zoom_window();
                        })),
                )
                .child(
                    Button::new("linux-window-close")
                        .ghost()
                        .small()
                        .icon(IconName::WindowClose)
                        .on_click(cx.listener(|_, _, window, _| {
                            window.remove_window();
                        })),
                )
                .into_any_element()
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = (window, cx);
            div().into_any_element()
        }
    }
}
