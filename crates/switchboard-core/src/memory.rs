//! Persistence collaborator
//!
//! The core never touches a database. When a [`MemoryStore`] is attached to
//! the coordinator, incoming messages and produced replies are handed to it.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::types::Message;

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn save_message(&self, message: &Message) -> Result<()>;

    /// The most recent `limit` messages of a conversation, oldest first
    async fn get_conversation_history(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>>;
}

/// Process-local [`MemoryStore`]
#[derive(Default)]
pub struct InMemoryStore {
    messages: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn save_message(&self, message: &Message) -> Result<()> {
        self.messages
            .write()
            .await
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn get_conversation_history(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let messages = self.messages.read().await;
        let Some(history) = messages.get(conversation_id) else {
            return Ok(Vec::new());
        };
        let start = history.len().saturating_sub(limit);
        Ok(history[start..].to_vec())
    }
}
