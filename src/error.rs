//! Error types for the assistant bridge.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Assistant service error: {0}")]
    Assistant(#[from] AssistantError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Failures talking to the remote assistant service.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("Request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

impl AssistantError {
    /// Whether the failure is worth retrying (network trouble, throttling,
    /// server-side errors). Client errors are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse { .. } => false,
        }
    }
}

/// File ingestion errors.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Invalid file URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Fetching {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("File at {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },

    #[error("Upload rejected: {0}")]
    Upload(#[source] AssistantError),
}

/// Coarse classification of a failed run, for callers that branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunErrorKind {
    Validation,
    Remote,
    Ingestion,
    RunFailed,
    NoNewMessage,
    NoText,
    Timeout,
    Cancelled,
}

/// Errors produced by the run lifecycle coordinator.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Remote(#[from] AssistantError),

    #[error("{0}")]
    Ingestion(#[from] IngestError),

    #[error("Run {run_id} ended with status {status}: {reason}")]
    RunFailed {
        run_id: String,
        status: String,
        reason: String,
    },

    #[error("Run {run_id} completed without producing a new message")]
    NoNewMessage { run_id: String },

    #[error("Assistant message {message_id} has no text content")]
    NoText { message_id: String },

    #[error("Run {run_id} did not finish after {polls} polls ({elapsed:?})")]
    Timeout {
        run_id: String,
        polls: u32,
        elapsed: Duration,
    },

    #[error("Run cancelled")]
    Cancelled,
}

impl RunError {
    pub fn kind(&self) -> RunErrorKind {
        match self {
            Self::Validation(_) => RunErrorKind::Validation,
            Self::Remote(_) => RunErrorKind::Remote,
            Self::Ingestion(_) => RunErrorKind::Ingestion,
            Self::RunFailed { .. } => RunErrorKind::RunFailed,
            Self::NoNewMessage { .. } => RunErrorKind::NoNewMessage,
            Self::NoText { .. } => RunErrorKind::NoText,
            Self::Timeout { .. } => RunErrorKind::Timeout,
            Self::Cancelled => RunErrorKind::Cancelled,
        }
    }
}

/// Result type alias for the bridge.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        let status = |status| AssistantError::Status {
            endpoint: "runs".into(),
            status,
            body: String::new(),
        };
        assert!(status(429).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(
            AssistantError::Transport {
                endpoint: "runs".into(),
                reason: "connection reset".into(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn concern_errors_convert_into_top_level_error() {
        let err: Error = ChannelError::Http("connection reset".into()).into();
        assert_eq!(err.to_string(), "Channel error: HTTP error: connection reset");

        let err: Error = RunError::Cancelled.into();
        assert!(matches!(err, Error::Run(RunError::Cancelled)));
    }

    #[test]
    fn ingestion_error_text_is_verbatim() {
        let err = RunError::from(IngestError::Status {
            url: "https://example.com/a.pdf".into(),
            status: 404,
        });
        assert_eq!(err.kind(), RunErrorKind::Ingestion);
        assert_eq!(
            err.to_string(),
            "Fetching https://example.com/a.pdf returned HTTP 404"
        );
    }
}
