//! Channel trait and the message types that flow through it.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use uuid::Uuid;

use crate::assistant::{ConversationId, DirectResult};
use crate::error::ChannelError;

/// Stream of incoming messages produced by a started channel.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// A message received from a channel.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: Uuid,
    /// Channel this message arrived on.
    pub channel: String,
    /// Sender id within the channel.
    pub user_id: String,
    /// Display name, if the channel knows one.
    pub user_name: Option<String>,
    pub content: String,
    /// URL of a file sent along with the message.
    pub attachment_url: Option<String>,
    pub received_at: DateTime<Utc>,
    /// Channel-specific routing data (e.g. Telegram `chat_id`).
    pub metadata: serde_json::Value,
}

impl IncomingMessage {
    pub fn new(channel: &str, user_id: &str, content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.to_string(),
            user_id: user_id.to_string(),
            user_name: None,
            content: content.to_string(),
            attachment_url: None,
            received_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_user_name(mut self, name: &str) -> Self {
        self.user_name = Some(name.to_string());
        self
    }

    pub fn with_attachment(mut self, url: impl Into<String>) -> Self {
        self.attachment_url = Some(url.into());
        self
    }

    /// Conversation this message belongs to: the chat if the channel reports
    /// one, otherwise the sender.
    pub fn conversation_id(&self) -> ConversationId {
        let key = self
            .metadata
            .get("chat_id")
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.user_id);
        ConversationId::new(format!("{}:{}", self.channel, key))
    }
}

/// A reply to send back on a channel.
#[derive(Debug, Clone, Default)]
pub struct OutgoingResponse {
    pub content: String,
    /// Photo URLs to deliver alongside the text.
    pub photos: Vec<String>,
}

impl OutgoingResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            photos: Vec::new(),
        }
    }

    /// Attach tool results meant for the user; only URL photos are supported.
    pub fn with_direct_results(mut self, results: &[DirectResult]) -> Self {
        for result in results {
            if result.kind == "photo" && result.format == "url" {
                self.photos.push(result.value.clone());
            } else {
                tracing::debug!(kind = %result.kind, format = %result.format, "Skipping direct result");
            }
        }
        self
    }
}

/// Progress notifications while a message is being handled.
#[derive(Debug, Clone)]
pub enum StatusUpdate {
    Thinking(String),
    Status(String),
}

/// A source of user messages and sink for replies.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Start listening and return the stream of incoming messages.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Reply to `msg`.
    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError>;

    async fn send_status(
        &self,
        _status: StatusUpdate,
        _metadata: &serde_json::Value,
    ) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_prefers_chat_id() {
        let msg = IncomingMessage::new("telegram", "user123", "hi")
            .with_metadata(serde_json::json!({"chat_id": "-100"}));
        assert_eq!(msg.conversation_id().as_str(), "telegram:-100");

        let msg = IncomingMessage::new("cli", "local-user", "hi");
        assert_eq!(msg.conversation_id().as_str(), "cli:local-user");
    }

    #[test]
    fn direct_results_become_photos() {
        let response = OutgoingResponse::text("done").with_direct_results(&[
            DirectResult {
                kind: "photo".into(),
                format: "url".into(),
                value: "https://img.example/fox.png".into(),
            },
            DirectResult {
                kind: "gif".into(),
                format: "path".into(),
                value: "/tmp/x.gif".into(),
            },
        ]);
        assert_eq!(response.photos, vec!["https://img.example/fox.png"]);
    }

    #[test]
    fn messages_get_unique_ids() {
        let a = IncomingMessage::new("cli", "u", "x");
        let b = IncomingMessage::new("cli", "u", "x");
        assert_ne!(a.id, b.id);
    }
}
