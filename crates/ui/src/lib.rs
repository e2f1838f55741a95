#![deny(unsafe_code)]

/// Docs-assistant chat application shell and components.
///
/// This crate provides the desktop front end built with GPUI and
/// gpui-component. Session semantics live in `koda-chat`; the backend
/// surface lives in `koda-service`. Everything here is presentation and
/// task wiring.
pub mod app;
/// Chat view, message list, input and rendering components.
pub mod chat;
/// Settings persistence used to configure the backend adapter.
pub mod settings;
/// Returns a stable marker used by integration smoke tests.
pub fn smoke_marker() -> &'static str {
    "koda"
}
