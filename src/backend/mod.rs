mod memory;
mod rest;

pub use memory::MemoryBackend;
pub use rest::RestBackend;

use crate::cli::Args;
use crate::models::chat::{ Conversation, ConversationPatch, Message, NewMessage };
use async_trait::async_trait;
use log::info;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },
    #[error("backend response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("backend request timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid backend configuration: {0}")]
    Config(String),
}

/// Access to the hosted data store holding conversations and messages.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, BackendError>;

    async fn fetch_conversation(&self, id: &str) -> Result<Option<Conversation>, BackendError>;

    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>, BackendError>;

    async fn search_conversations(&self, query: &str) -> Result<Vec<Conversation>, BackendError>;

    async fn update_conversation(
        &self,
        id: &str,
        patch: &ConversationPatch
    ) -> Result<Conversation, BackendError>;

    async fn insert_message(&self, message: &NewMessage) -> Result<Message, BackendError>;
}

pub fn create_backend(args: &Args) -> Result<Arc<dyn Backend>, BackendError> {
    match args.backend_type.to_lowercase().as_str() {
        "rest" => {
            let base_url = args.backend_url
                .as_deref()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| BackendError::Config("BACKEND_URL is required for the rest backend".into()))?;
            let backend = RestBackend::new(
                base_url,
                &args.backend_key,
                Duration::from_millis(args.request_timeout_ms)
            )?;
            info!("Using REST backend at {}", base_url);
            Ok(Arc::new(backend))
        }
        "memory" => {
            info!("Using in-memory backend; nothing will be persisted.");
            Ok(Arc::new(MemoryBackend::new()))
        }
        other => Err(BackendError::Config(format!("Unsupported backend type: {}", other))),
    }
}
