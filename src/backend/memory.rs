use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ Backend, BackendError };
use crate::models::chat::{ Conversation, ConversationPatch, DeliveryState, Message, NewMessage };

/// Process-local store, used for demos and tests.
#[derive(Default)]
pub struct MemoryBackend {
    conversations: RwLock<Vec<Conversation>>,
    messages: RwLock<HashMap<String, Vec<Message>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversations(conversations: Vec<Conversation>) -> Self {
        Self {
            conversations: RwLock::new(conversations),
            messages: RwLock::new(HashMap::new()),
        }
    }

    pub async fn upsert_conversation(&self, conversation: Conversation) {
        let mut conversations = self.conversations.write().await;
        match conversations.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => {
                *existing = conversation;
            }
            None => conversations.push(conversation),
        }
    }
}

fn matches_query(conversation: &Conversation, needle: &str) -> bool {
    [
        conversation.name.as_deref(),
        conversation.phone_number.as_deref(),
        conversation.user_id.as_deref(),
        conversation.last_message_content.as_deref(),
    ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(needle))
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, BackendError> {
        let mut rows = self.conversations.read().await.clone();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows)
    }

    async fn fetch_conversation(&self, id: &str) -> Result<Option<Conversation>, BackendError> {
        Ok(
            self.conversations
                .read().await
                .iter()
                .find(|c| c.id == id)
                .cloned()
        )
    }

    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>, BackendError> {
        Ok(self.messages.read().await.get(conversation_id).cloned().unwrap_or_default())
    }

    async fn search_conversations(&self, query: &str) -> Result<Vec<Conversation>, BackendError> {
        let needle = query.trim().to_lowercase();
        let rows = self.list_conversations().await?;
        if needle.is_empty() {
            return Ok(rows);
        }
        Ok(
            rows
                .into_iter()
                .filter(|c| matches_query(c, &needle))
                .collect()
        )
    }

    async fn update_conversation(
        &self,
        id: &str,
        patch: &ConversationPatch
    ) -> Result<Conversation, BackendError> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| BackendError::NotFound(format!("conversation {}", id)))?;
        patch.apply_to(conversation);
        Ok(conversation.clone())
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message, BackendError> {
        let stored = Message {
            id: Uuid::new_v4().to_string(),
            delivery: DeliveryState::Confirmed,
            ..message.to_pending(String::new(), Utc::now())
        };

        {
            let mut conversations = self.conversations.write().await;
            let conversation = conversations
                .iter_mut()
                .find(|c| c.id == stored.conversation_id)
                .ok_or_else(|| BackendError::NotFound(format!("conversation {}", stored.conversation_id)))?;
            conversation.last_message_sender = Some(stored.sender.clone());
            conversation.last_message_at = stored.created_at;
            conversation.last_message_content = Some(stored.preview());
            conversation.updated_at = stored.created_at;
        }

        self.messages
            .write().await
            .entry(stored.conversation_id.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }
}
