//! CLI channel — stdin/stdout REPL for local testing.
//!
//! `/file <url> <question>` sends a question with a file attached.

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse, StatusUpdate};
use crate::error::ChannelError;

/// A simple CLI channel that reads from stdin and writes to stdout.
#[derive(Debug, Default)]
pub struct CliChannel;

impl CliChannel {
    pub fn new() -> Self {
        Self
    }
}

/// Turn one input line into a message, or `None` for blank input.
fn parse_line(line: &str) -> Option<IncomingMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some(rest) = line.strip_prefix("/file ") {
        let rest = rest.trim_start();
        let (url, query) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        return Some(IncomingMessage::new("cli", "local-user", query.trim()).with_attachment(url));
    }
    Some(IncomingMessage::new("cli", "local-user", line))
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if matches!(line.trim(), "/quit" | "/exit") {
                            break;
                        }
                        let Some(msg) = parse_line(&line) else {
                            eprint!("> ");
                            continue;
                        };
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        _msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        println!("\n{}", response.content);
        for url in &response.photos {
            println!("🖼  {}", url);
        }
        println!();
        eprint!("> ");
        Ok(())
    }

    async fn send_status(
        &self,
        status: StatusUpdate,
        _metadata: &serde_json::Value,
    ) -> Result<(), ChannelError> {
        match status {
            StatusUpdate::Thinking(msg) => eprintln!("⏳ {}", msg),
            StatusUpdate::Status(msg) => eprintln!("ℹ️  {}", msg),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_become_messages() {
        let msg = parse_line("  hello there ").unwrap();
        assert_eq!(msg.content, "hello there");
        assert_eq!(msg.channel, "cli");
        assert!(msg.attachment_url.is_none());
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert!(parse_line("   ").is_none());
    }

    #[test]
    fn file_command_attaches_url() {
        let msg = parse_line("/file https://x.example/a.csv what is the total?").unwrap();
        assert_eq!(msg.attachment_url.as_deref(), Some("https://x.example/a.csv"));
        assert_eq!(msg.content, "what is the total?");

        let bare = parse_line("/file https://x.example/a.csv").unwrap();
        assert_eq!(bare.content, "");
    }
}
