//! Conversation persistence boundary (§4.10). The real backing store is
//! out of scope; this crate only defines the contract plus an in-memory
//! reference implementation for tests and local runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
    pub messages: Vec<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum StoreError {
    #[error("conversation {0} not found")]
    NotFound(Uuid),
    #[error("store io failure: {0}")]
    Io(String),
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create(&self) -> Result<Conversation, StoreError>;
    async fn load(&self, id: Uuid) -> Result<Conversation, StoreError>;
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
    async fn append_message(&self, id: Uuid, message: Value) -> Result<(), StoreError>;
}

/// Per-conversation single-writer semantics via a `Mutex` per entry, so
/// concurrent appends to different conversations never contend with each
/// other.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<Uuid, Arc<Mutex<Conversation>>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create(&self) -> Result<Conversation, StoreError> {
        let conversation = Conversation {
            id: Uuid::new_v4(),
            messages: Vec::new(),
            created_at: Utc::now(),
        };
        let mut guard = self.conversations.write().await;
        guard.insert(conversation.id, Arc::new(Mutex::new(conversation.clone())));
        Ok(conversation)
    }

    async fn load(&self, id: Uuid) -> Result<Conversation, StoreError> {
        let guard = self.conversations.read().await;
        let entry = guard.get(&id).ok_or(StoreError::NotFound(id))?;
        let result = entry.lock().await.clone();
        Ok(result)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut guard = self.conversations.write().await;
        guard.remove(&id).ok_or(StoreError::NotFound(id))?;
        Ok(())
    }

    async fn append_message(&self, id: Uuid, message: Value) -> Result<(), StoreError> {
        let guard = self.conversations.read().await;
        let entry = guard.get(&id).ok_or(StoreError::NotFound(id))?;
        let mut conversation = entry.lock().await;
        conversation.messages.push(message);
        Ok(())
    }
}
