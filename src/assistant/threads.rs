//! Conversation → thread mapping.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

use crate::assistant::api::AssistantApi;
use crate::error::AssistantError;

/// Externally supplied identifier of a caller's conversation (e.g. a Telegram chat id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for ConversationId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lazily creates one remote thread per conversation and remembers it for the
/// process lifetime.
///
/// First use of a conversation is serialized per key: concurrent callers for
/// the same conversation wait on a single creation. A failed creation leaves
/// the slot empty so the next caller tries again.
pub struct ThreadRegistry {
    api: Arc<dyn AssistantApi>,
    slots: Mutex<HashMap<ConversationId, Arc<OnceCell<String>>>>,
}

impl ThreadRegistry {
    pub fn new(api: Arc<dyn AssistantApi>) -> Self {
        Self {
            api,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Thread for `conversation_id`, creating it on first use.
    pub async fn get_or_create(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<String, AssistantError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(conversation_id.clone()).or_default())
        };

        let thread_id = slot
            .get_or_try_init(|| async {
                let thread = self.api.create_thread().await?;
                tracing::info!(
                    conversation_id = %conversation_id,
                    thread_id = %thread.id,
                    "Created thread"
                );
                Ok::<_, AssistantError>(thread.id)
            })
            .await?;
        Ok(thread_id.clone())
    }

    /// Thread for `conversation_id`, if one was created already.
    pub async fn get(&self, conversation_id: &ConversationId) -> Option<String> {
        self.slots
            .lock()
            .await
            .get(conversation_id)
            .and_then(|slot| slot.get().cloned())
    }

    /// Number of conversations with a thread.
    pub async fn len(&self) -> usize {
        self.slots
            .lock()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
