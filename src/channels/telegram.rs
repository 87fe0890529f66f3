//! Telegram channel — long-polls the Bot API for updates.
//!
//! Text messages become queries. Documents and photos are forwarded as file
//! URLs on the Bot API file endpoint, with the caption as the query.

use async_trait::async_trait;
use serde_json::Value;

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse, StatusUpdate};
use crate::config::TelegramConfig;
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Telegram channel — connects to the Bot API via long-polling.
#[derive(Clone)]
pub struct TelegramChannel {
    bot_token: String,
    allowed_users: Vec<String>,
    client: reqwest::Client,
    api_base: String,
}

impl TelegramChannel {
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            client: reqwest::Client::new(),
            api_base: TELEGRAM_API_BASE.to_string(),
        }
    }

    pub fn from_config(config: &TelegramConfig) -> Self {
        Self::new(config.bot_token.clone(), config.allowed_users.clone())
    }

    /// Point the channel at another Bot API server.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{file_path}", self.api_base, self.bot_token)
    }

    /// Check if a username is in the allowed list.
    pub fn is_user_allowed(&self, username: &str) -> bool {
        self.allowed_users.iter().any(|u| u == "*" || u == username)
    }

    /// Check if any of the provided identities is allowed.
    pub fn is_any_user_allowed<'a, I>(&self, identities: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        identities.into_iter().any(|id| self.is_user_allowed(id))
    }

    /// Send a text message, trying Markdown first with plain text fallback.
    /// Splits long messages that exceed Telegram's 4096 char limit.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(chat_id, &chunk).await?;
        }
        Ok(())
    }

    /// Send a single message chunk (≤4096 chars), Markdown-first with fallback.
    async fn send_message_chunk(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let markdown_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });

        let markdown_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&markdown_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.without_url().to_string(),
            })?;

        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let markdown_status = markdown_resp.status();
        tracing::warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        // Retry without parse_mode
        let plain_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.without_url().to_string(),
            })?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!(
                    "sendMessage failed (markdown: {}, plain: {})",
                    markdown_status, plain_err
                ),
            });
        }

        Ok(())
    }

    /// Send a photo by URL (Telegram downloads it).
    pub async fn send_photo_by_url(
        &self,
        chat_id: &str,
        url: &str,
        caption: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "photo": url
        });

        if let Some(cap) = caption {
            body["caption"] = Value::String(cap.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("sendPhoto"))
            .json(&body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        if !resp.status().is_success() {
            let err = resp.text().await.map_err(reqwest::Error::without_url)?;
            anyhow::bail!("Telegram sendPhoto by URL failed: {err}");
        }

        tracing::info!("Telegram photo (URL) sent to {chat_id}");
        Ok(())
    }

    /// Download URL for an uploaded file, via `getFile`.
    pub async fn resolve_file_url(&self, file_id: &str) -> Result<String, ChannelError> {
        let resp = self
            .client
            .post(self.api_url("getFile"))
            .json(&serde_json::json!({ "file_id": file_id }))
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.without_url().to_string()))?;

        if !resp.status().is_success() {
            return Err(ChannelError::Http(format!("getFile returned {}", resp.status())));
        }

        let data: Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::Http(e.without_url().to_string()))?;
        let file_path = data
            .get("result")
            .and_then(|r| r.get("file_path"))
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::InvalidMessage("getFile response has no file_path".into()))?;
        Ok(self.file_url(file_path))
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Value>, ChannelError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": 30,
            "allowed_updates": ["message"]
        });
        let resp = self
            .client
            .post(self.api_url("getUpdates"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.without_url().to_string()))?;
        let data: Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::Http(e.without_url().to_string()))?;
        Ok(data
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Turn a raw update into an incoming message, resolving any attached file.
    async fn to_incoming(&self, message: &Value) -> Option<IncomingMessage> {
        let parsed = parse_message(message, &self.allowed_users)?;
        let mut incoming = parsed.incoming;
        if let Some(file_id) = parsed.file_id {
            match self.resolve_file_url(&file_id).await {
                Ok(url) => incoming = incoming.with_attachment(url),
                Err(e) => {
                    tracing::warn!("Telegram: could not resolve attached file: {e}");
                }
            }
        }
        Some(incoming)
    }
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let this = self.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let updates = match this.get_updates(offset).await {
                    Ok(updates) => updates,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                for update in updates {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(message) = update.get("message") else {
                        continue;
                    };
                    let Some(incoming) = this.to_incoming(message).await else {
                        continue;
                    };

                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let chat_id = msg
            .metadata
            .get("chat_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: "No chat_id in message metadata".into(),
            })?;

        if !response.content.trim().is_empty() {
            self.send_message(chat_id, &response.content).await?;
        }
        for url in &response.photos {
            self.send_photo_by_url(chat_id, url, None)
                .await
                .map_err(|e| ChannelError::SendFailed {
                    name: "telegram".into(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    async fn send_status(
        &self,
        status: StatusUpdate,
        metadata: &Value,
    ) -> Result<(), ChannelError> {
        if let Some(chat_id) = metadata.get("chat_id").and_then(|v| v.as_str()) {
            match status {
                StatusUpdate::Thinking(_) => {
                    // Typing indicator only; failures are not worth surfacing.
                    let _ = self
                        .client
                        .post(self.api_url("sendChatAction"))
                        .json(&serde_json::json!({
                            "chat_id": chat_id,
                            "action": "typing"
                        }))
                        .send()
                        .await;
                }
                StatusUpdate::Status(ref msg) if !msg.is_empty() => {
                    let _ = self.send_message(chat_id, &format!("ℹ️ {msg}")).await;
                }
                StatusUpdate::Status(_) => {}
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.without_url().to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// A Telegram message accepted for processing.
struct ParsedMessage {
    incoming: IncomingMessage,
    /// Id of an attached document or photo, still to be resolved to a URL.
    file_id: Option<String>,
}

/// Extract sender, chat, text and attachment from a `message` object.
/// Returns `None` for unauthorized senders and messages with nothing to ask.
fn parse_message(message: &Value, allowed_users: &[String]) -> Option<ParsedMessage> {
    let from = message.get("from");
    let username = from
        .and_then(|f| f.get("username"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let user_id = from
        .and_then(|f| f.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string());

    // Check allowlist against both username and numeric ID
    let mut identities = vec![username];
    if let Some(ref id) = user_id {
        identities.push(id.as_str());
    }
    if !check_user_allowed(allowed_users, identities) {
        tracing::warn!(
            "Telegram: ignoring message from unauthorized user: username={username}, user_id={}",
            user_id.as_deref().unwrap_or("unknown")
        );
        return None;
    }

    // Documents first; for photos the last size is the largest.
    let file_id = message
        .get("document")
        .and_then(|d| d.get("file_id"))
        .or_else(|| {
            message
                .get("photo")
                .and_then(Value::as_array)
                .and_then(|sizes| sizes.last())
                .and_then(|p| p.get("file_id"))
        })
        .and_then(Value::as_str)
        .map(String::from);

    let text = message
        .get("text")
        .or_else(|| message.get("caption"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    if text.trim().is_empty() && file_id.is_none() {
        return None;
    }

    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
        .unwrap_or_default();
    let first_name = from
        .and_then(|f| f.get("first_name"))
        .and_then(Value::as_str)
        .unwrap_or(username);

    let incoming = IncomingMessage::new("telegram", user_id.as_deref().unwrap_or(username), text)
        .with_metadata(serde_json::json!({
            "chat_id": chat_id,
            "username": username,
        }))
        .with_user_name(first_name);

    Some(ParsedMessage { incoming, file_id })
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Never cut inside a multi-byte character.
        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }

        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn anyone() -> Vec<String> {
        vec!["*".into()]
    }

    // ── Basic channel tests ─────────────────────────────────────────

    #[test]
    fn telegram_channel_name() {
        let ch = TelegramChannel::new("fake-token".into(), anyone());
        assert_eq!(ch.name(), "telegram");
    }

    #[test]
    fn telegram_api_and_file_urls() {
        let ch = TelegramChannel::new("123:ABC".into(), vec![]);
        assert_eq!(ch.api_url("getMe"), "https://api.telegram.org/bot123:ABC/getMe");
        assert_eq!(
            ch.file_url("documents/file_1.pdf"),
            "https://api.telegram.org/file/bot123:ABC/documents/file_1.pdf"
        );
    }

    // ── User allowlist tests ────────────────────────────────────────

    #[test]
    fn telegram_user_allowed_wildcard() {
        let ch = TelegramChannel::new("t".into(), anyone());
        assert!(ch.is_user_allowed("anyone"));
    }

    #[test]
    fn telegram_user_allowed_specific() {
        let ch = TelegramChannel::new("t".into(), vec!["alice".into(), "bob".into()]);
        assert!(ch.is_user_allowed("alice"));
        assert!(!ch.is_user_allowed("eve"));
        assert!(!ch.is_user_allowed("alice_bot"));
    }

    #[test]
    fn telegram_user_denied_empty() {
        let ch = TelegramChannel::new("t".into(), vec![]);
        assert!(!ch.is_user_allowed("anyone"));
    }

    #[test]
    fn telegram_user_allowed_by_numeric_id_identity() {
        let ch = TelegramChannel::new("t".into(), vec!["123456789".into()]);
        assert!(ch.is_any_user_allowed(["unknown", "123456789"]));
        assert!(!ch.is_any_user_allowed(["unknown", "42"]));
    }

    // ── Update parsing tests ────────────────────────────────────────

    #[test]
    fn parses_text_message() {
        let message = json!({
            "message_id": 1,
            "from": {"id": 555, "username": "alice", "first_name": "Alice"},
            "chat": {"id": 42},
            "text": "hello"
        });
        let parsed = parse_message(&message, &anyone()).unwrap();
        assert_eq!(parsed.incoming.content, "hello");
        assert_eq!(parsed.incoming.user_id, "555");
        assert_eq!(parsed.incoming.user_name.as_deref(), Some("Alice"));
        assert_eq!(parsed.incoming.metadata["chat_id"], "42");
        assert!(parsed.file_id.is_none());
    }

    #[test]
    fn parses_document_with_caption() {
        let message = json!({
            "from": {"id": 555, "username": "alice"},
            "chat": {"id": 42},
            "caption": "summarize this",
            "document": {"file_id": "doc-1", "file_name": "report.pdf"}
        });
        let parsed = parse_message(&message, &anyone()).unwrap();
        assert_eq!(parsed.incoming.content, "summarize this");
        assert_eq!(parsed.file_id.as_deref(), Some("doc-1"));
    }

    #[test]
    fn photo_uses_largest_size() {
        let message = json!({
            "from": {"id": 555},
            "chat": {"id": 42},
            "photo": [{"file_id": "small"}, {"file_id": "large"}]
        });
        let parsed = parse_message(&message, &anyone()).unwrap();
        assert_eq!(parsed.file_id.as_deref(), Some("large"));
    }

    #[test]
    fn rejects_unauthorized_and_empty_messages() {
        let message = json!({
            "from": {"id": 555, "username": "mallory"},
            "chat": {"id": 42},
            "text": "hello"
        });
        assert!(parse_message(&message, &["alice".to_string()]).is_none());

        let sticker = json!({"from": {"id": 555}, "chat": {"id": 42}, "sticker": {}});
        assert!(parse_message(&sticker, &anyone()).is_none());
    }

    // ── Bot API calls ───────────────────────────────────────────────

    #[tokio::test]
    async fn resolves_file_url_via_get_file() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botT/getFile"))
            .and(body_partial_json(json!({"file_id": "doc-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"file_id": "doc-1", "file_path": "documents/file_7.pdf"}
            })))
            .mount(&server)
            .await;

        let ch = TelegramChannel::new("T".into(), anyone()).with_api_base(server.uri());
        let url = ch.resolve_file_url("doc-1").await.unwrap();
        assert_eq!(url, format!("{}/file/botT/documents/file_7.pdf", server.uri()));
    }

    #[tokio::test]
    async fn transport_errors_do_not_reveal_the_token() {
        // Nothing listens on port 9.
        let ch = TelegramChannel::new("SECRET-TOKEN".into(), anyone())
            .with_api_base("http://127.0.0.1:9".to_string());

        let err = ch.resolve_file_url("doc-1").await.unwrap_err();
        assert!(!err.to_string().contains("SECRET-TOKEN"));
        let err = ch.health_check().await.unwrap_err();
        assert!(!err.to_string().contains("SECRET-TOKEN"));
    }

    #[tokio::test]
    async fn markdown_failure_falls_back_to_plain_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botT/sendMessage"))
            .and(body_partial_json(json!({"parse_mode": "Markdown"})))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botT/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let ch = TelegramChannel::new("T".into(), anyone()).with_api_base(server.uri());
        ch.send_message("42", "*unbalanced").await.unwrap();
    }

    #[tokio::test]
    async fn respond_sends_text_then_photos() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botT/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botT/sendPhoto"))
            .and(body_partial_json(json!({"chat_id": "42", "photo": "https://img.example/fox.png"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let ch = TelegramChannel::new("T".into(), anyone()).with_api_base(server.uri());
        let msg = IncomingMessage::new("telegram", "555", "draw a fox")
            .with_metadata(json!({"chat_id": "42"}));
        let response = OutgoingResponse {
            content: "🦊".into(),
            photos: vec!["https://img.example/fox.png".into()],
        };
        ch.respond(&msg, response).await.unwrap();
    }

    #[tokio::test]
    async fn respond_without_chat_id_fails() {
        let ch = TelegramChannel::new("T".into(), anyone());
        let msg = IncomingMessage::new("telegram", "555", "hello");
        let err = ch
            .respond(&msg, OutgoingResponse::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::SendFailed { .. }));
    }

    // ── Message splitting tests ─────────────────────────────────────

    #[test]
    fn split_message_short() {
        let chunks = split_message("Hello", 4096);
        assert_eq!(chunks, vec!["Hello"]);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(2000));
        assert_eq!(chunks[1], "b".repeat(3000));
    }

    #[test]
    fn split_message_no_good_split_point() {
        let msg = "a".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn split_message_respects_char_boundaries() {
        // Each emoji is 4 bytes; 4096 is a boundary, 4095 is not.
        let msg = "😀".repeat(1500);
        let chunks = split_message(&msg, 4095);
        assert!(chunks.iter().all(|c| c.len() <= 4095));
        assert_eq!(chunks.concat(), msg);
    }
}
