#![deny(unsafe_code)]

//! Abstract docs-assistant backend surface consumed by the chat front end.
//!
//! The core never sees a wire protocol: it talks to [`DocsService`] and
//! receives completion tokens through a [`CompletionEventStream`] that
//! delivers fragments in emission order and signals exactly one terminal
//! event. [`rig_adapter::RigDocsAdapter`] is the bundled implementation,
//! speaking to any OpenAI-compatible endpoint.

use std::sync::Arc;

mod rig_adapter;
mod service;

pub use rig_adapter::{RIG_OPENAI_SERVICE_ID, RigDocsAdapter};
pub use service::{
    AttachmentUpload, BoxFuture, CompletionEventStream, CompletionRequest, CompletionStreamHandle,
    DEFAULT_MODEL, DocsService, ServiceConfig, ServiceError, ServiceMessage, ServiceResult,
    ServiceRole, ServiceWorker, StreamEventMapped, StreamEventPayload, StreamTarget, Topic,
    make_event_stream, supported_topics,
};

pub fn create_service(mut config: ServiceConfig) -> ServiceResult<Arc<dyn DocsService>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_OPENAI_SERVICE_ID.to_string();
    }

    match config.provider_id.as_str() {
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_SERVICE_ID.to_string();
            Ok(Arc::new(RigDocsAdapter::new(config)?))
        }
        _ => Err(ServiceError::UnsupportedProvider {
            stage: "create-service",
            provider_id: config.provider_id,
        }),
    }
}
