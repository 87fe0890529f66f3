//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default behavior profile for a newly created assistant.
pub const DEFAULT_INSTRUCTIONS: &str =
    "You are a personal assistant. Answer every question with emoji only.";

/// Default assistant model.
pub const DEFAULT_MODEL: &str = "gpt-4-1106-preview";

/// Default OpenAI API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Per-request timeout for assistant service calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Desired assistant configuration, reconciled against the service on startup.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Unique lookup key on the service.
    pub name: String,
    pub model: String,
    pub instructions: String,
    /// Whether to enable the service-side code interpreter tool.
    pub code_interpreter: bool,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: "assistant-bridge".to_string(),
            model: DEFAULT_MODEL.to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            code_interpreter: true,
        }
    }
}

/// Run polling limits.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Wait between two status checks.
    pub interval: Duration,
    /// Upper bound on status checks before the run is reported as timed out.
    pub max_polls: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_polls: 60, // 5 minutes at the default interval
        }
    }
}

/// Limits for fetching caller-supplied files.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub max_bytes: u64,
    pub timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_bytes: 20 * 1024 * 1024,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Retry policy for transient service errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Telegram channel settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub allowed_users: Vec<String>,
}

/// Google Custom Search credentials.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub api_key: Option<String>,
    pub cse_id: Option<String>,
}

/// Complete bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub api_key: SecretString,
    pub base_url: String,
    /// Bound on every assistant service request, body included.
    pub request_timeout: Duration,
    pub assistant: AssistantConfig,
    pub poll: PollConfig,
    pub ingest: IngestConfig,
    pub retry: RetryPolicy,
    /// Language used for user-facing texts.
    pub bot_language: String,
    /// Optional translations file overriding the embedded table.
    pub translations_path: Option<PathBuf>,
    pub telegram: Option<TelegramConfig>,
    pub search: SearchConfig,
}

impl BotConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("OPENAI_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;

        let assistant_defaults = AssistantConfig::default();
        let assistant = AssistantConfig {
            name: get("ASSISTANT_NAME").unwrap_or(assistant_defaults.name),
            model: get("ASSISTANT_MODEL").unwrap_or(assistant_defaults.model),
            instructions: get("ASSISTANT_INSTRUCTIONS")
                .unwrap_or(assistant_defaults.instructions),
            code_interpreter: parse_or(
                get("ASSISTANT_CODE_INTERPRETER"),
                "ASSISTANT_CODE_INTERPRETER",
                assistant_defaults.code_interpreter,
            )?,
        };

        let poll_defaults = PollConfig::default();
        let poll = PollConfig {
            interval: Duration::from_secs(parse_or(
                get("POLL_INTERVAL_SECS"),
                "POLL_INTERVAL_SECS",
                poll_defaults.interval.as_secs(),
            )?),
            max_polls: parse_or(get("MAX_POLLS"), "MAX_POLLS", poll_defaults.max_polls)?,
        };
        if poll.max_polls == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_POLLS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let request_timeout = Duration::from_secs(parse_or(
            get("REQUEST_TIMEOUT_SECS"),
            "REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT.as_secs(),
        )?);

        let ingest_defaults = IngestConfig::default();
        let ingest = IngestConfig {
            max_bytes: parse_or(
                get("MAX_FILE_BYTES"),
                "MAX_FILE_BYTES",
                ingest_defaults.max_bytes,
            )?,
            timeout: ingest_defaults.timeout,
        };

        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse_or(
                get("RETRY_MAX_ATTEMPTS"),
                "RETRY_MAX_ATTEMPTS",
                retry_defaults.max_attempts,
            )?
            .max(1),
            ..retry_defaults
        };

        let telegram = get("TELEGRAM_BOT_TOKEN").map(|bot_token| TelegramConfig {
            bot_token,
            allowed_users: get("TELEGRAM_ALLOWED_USERS")
                .unwrap_or_else(|| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        });

        Ok(Self {
            api_key: SecretString::from(api_key),
            base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            request_timeout,
            assistant,
            poll,
            ingest,
            retry,
            bot_language: get("BOT_LANGUAGE").unwrap_or_else(|| "en".to_string()),
            translations_path: get("TRANSLATIONS_PATH").map(PathBuf::from),
            telegram,
            search: SearchConfig {
                api_key: get("GOOGLE_API_KEY"),
                cse_id: get("GOOGLE_CSE_ID"),
            },
        })
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
    }
}
