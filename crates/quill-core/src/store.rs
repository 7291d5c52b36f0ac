//! Conversation store contract, plus an in-memory implementation.

use anyhow::Result;
use async_trait::async_trait;
use quill_providers::{Message, MessageRole};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::delivery::MessageId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: MessageRole,
    pub text: String,
    pub external_message_id: Option<MessageId>,
}

impl StoredMessage {
    pub fn to_message(&self) -> Message {
        Message::new(self.role, self.text.clone())
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        text: &str,
        external_message_id: Option<MessageId>,
    ) -> Result<()>;

    async fn history(&self, conversation_id: &str) -> Result<Vec<StoredMessage>>;
}

/// Store kept in process memory. Used by the CLI and in tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    conversations: Mutex<HashMap<String, Vec<StoredMessage>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn conversation_count(&self) -> usize {
        self.conversations.lock().await.len()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        text: &str,
        external_message_id: Option<MessageId>,
    ) -> Result<()> {
        let mut conversations = self.conversations.lock().await;
        conversations
            .entry(conversation_id.to_string())
            .or_default()
            .push(StoredMessage {
                role,
                text: text.to_string(),
                external_message_id,
            });
        Ok(())
    }

    async fn history(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let conversations = self.conversations.lock().await;
        Ok(conversations
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}
