/// Event contracts for chat module wiring.
pub mod events;
pub mod message_input;
pub mod message_list;
/// Code-fence interception (diagram previews with literal-code fallback).
pub mod renderer;
pub mod scroll_manager;
pub mod topic_selector;
pub mod view;

pub use events::{AttachRequested, RemoveAttachmentClicked, Submit, TopicSelected};
pub use message_input::{AttachmentChip, ChipStatus, MessageInput};
pub use message_list::MessageList;
pub use renderer::{DiagramRenderer, MermaidDiagram};
pub use scroll_manager::ScrollManager;
pub use topic_selector::TopicSelector;
pub use view::ChatView;
