//! Bot wiring: channels in, coordinator in the middle, replies out.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::select_all;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::assistant::RunCoordinator;
use crate::channels::{Channel, IncomingMessage, OutgoingResponse, StatusUpdate};
use crate::error::{ChannelError, RunError, RunErrorKind};
use crate::i18n::Translations;

/// Routes every incoming message to the coordinator in its own task.
pub struct Bot {
    coordinator: Arc<RunCoordinator>,
    channels: Vec<Arc<dyn Channel>>,
    translations: Arc<Translations>,
    language: String,
    shutdown: CancellationToken,
}

impl Bot {
    pub fn new(
        coordinator: Arc<RunCoordinator>,
        translations: Arc<Translations>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            coordinator,
            channels: Vec::new(),
            translations,
            language: language.into(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn add_channel(&mut self, channel: Arc<dyn Channel>) {
        self.channels.push(channel);
    }

    /// Cancelling this token stops the bot and aborts in-flight runs.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn text(&self, key: &str) -> String {
        self.translations
            .localized_text(key, &self.language)
            .to_string()
    }

    /// Start all channels and serve until they end, Ctrl+C, or shutdown.
    pub async fn run(self: Arc<Self>) -> Result<(), ChannelError> {
        let mut streams = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let stream = channel.start().await?;
            tracing::info!(channel = %channel.name(), "Channel started");
            let channel = Arc::clone(channel);
            streams.push(stream.map(move |msg| (Arc::clone(&channel), msg)));
        }
        let mut messages = select_all(streams);
        let mut in_flight = JoinSet::new();

        tracing::info!("Bot ready and listening");

        loop {
            let (channel, message) = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, shutting down...");
                    self.shutdown.cancel();
                    break;
                }
                _ = self.shutdown.cancelled() => break,
                next = messages.next() => match next {
                    Some(next) => next,
                    None => {
                        tracing::info!("All channel streams ended, shutting down...");
                        break;
                    }
                },
            };

            let bot = Arc::clone(&self);
            in_flight.spawn(async move {
                let response = bot.handle_message(channel.as_ref(), &message).await;
                if let Err(e) = channel.respond(&message, response).await {
                    tracing::warn!(channel = %channel.name(), message_id = %message.id, "Failed to respond: {}", e);
                }
            });

            // Reap finished tasks so the set does not grow unbounded.
            while in_flight.try_join_next().is_some() {}
        }

        while in_flight.join_next().await.is_some() {}
        for channel in &self.channels {
            if let Err(e) = channel.shutdown().await {
                tracing::warn!(channel = %channel.name(), "Channel shutdown failed: {}", e);
            }
        }
        Ok(())
    }

    /// Produce the reply for one message.
    pub async fn handle_message(
        &self,
        channel: &dyn Channel,
        message: &IncomingMessage,
    ) -> OutgoingResponse {
        let content = message.content.trim();
        if matches!(content, "/start" | "/help") {
            return OutgoingResponse::text(self.text("help_text"));
        }

        let query = match (content.is_empty(), &message.attachment_url) {
            (true, None) => return OutgoingResponse::text(self.text("empty_query")),
            (true, Some(_)) => self.text("file_query"),
            (false, _) => content.to_string(),
        };

        let _ = channel
            .send_status(StatusUpdate::Thinking(self.text("thinking")), &message.metadata)
            .await;

        let conversation_id = message.conversation_id();
        tracing::info!(
            channel = %message.channel,
            conversation_id = %conversation_id,
            message_id = %message.id,
            has_file = message.attachment_url.is_some(),
            "Handling message"
        );

        match self
            .coordinator
            .run_query_cancellable(
                &conversation_id,
                &query,
                message.attachment_url.as_deref(),
                &self.shutdown,
            )
            .await
        {
            Ok(reply) => {
                OutgoingResponse::text(reply.text).with_direct_results(&reply.direct_results)
            }
            Err(e) => OutgoingResponse::text(self.error_text(&e)),
        }
    }

    /// Localized error line followed by the error description.
    pub fn error_text(&self, error: &RunError) -> String {
        let key = match error.kind() {
            RunErrorKind::Ingestion => "file_error",
            RunErrorKind::Timeout => "timeout",
            RunErrorKind::Cancelled => "cancelled",
            RunErrorKind::NoNewMessage => "no_new_message",
            RunErrorKind::Validation
            | RunErrorKind::Remote
            | RunErrorKind::RunFailed
            | RunErrorKind::NoText => "error_prefix",
        };
        format!("{}: {}", self.text(key), error)
    }
}
