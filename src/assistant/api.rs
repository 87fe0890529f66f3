//! Assistant service contract and wire types.
//!
//! The coordinator only talks to the service through [`AssistantApi`], so the
//! HTTP client can be swapped for an in-memory fake in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AssistantError;

/// A remote assistant configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub model: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Vec<Value>,
}

/// Payload for creating an assistant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAssistant {
    pub name: String,
    pub model: String,
    pub instructions: String,
    pub tools: Vec<Value>,
}

/// A server-side conversation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
}

/// Lifecycle status of a run as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the run still occupies its thread.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Queued | Self::InProgress | Self::RequiresAction | Self::Cancelling
        )
    }

    /// Statuses from which the run will never produce output.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Failed | Self::Incomplete | Self::Expired
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One processing job of an assistant against a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub required_action: Option<RequiredAction>,
    #[serde(default)]
    pub last_error: Option<RunLastError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLastError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub submit_tool_outputs: Option<SubmitToolOutputs>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitToolOutputs {
    pub tool_calls: Vec<ToolCall>,
}

/// A function call the assistant wants the client to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
}

/// Result of a tool call, sent back to the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// A message on a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub content: Vec<MessageContent>,
}

impl ThreadMessage {
    /// Primary text content: the first text part.
    pub fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|part| match part {
            MessageContent::Text { text } => Some(text.value.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: TextContent },
    ImageFile { image_file: Value },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub value: String,
    #[serde(default)]
    pub annotations: Vec<Value>,
}

/// A user message to append to a thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    /// Attach an uploaded file, made available to the code interpreter.
    pub fn with_file(mut self, file_id: impl Into<String>) -> Self {
        self.attachments.push(Attachment {
            file_id: file_id.into(),
            tools: vec![serde_json::json!({ "type": "code_interpreter" })],
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    pub file_id: String,
    pub tools: Vec<Value>,
}

/// An uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileObject {
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub bytes: Option<u64>,
}

/// Remote assistant service operations used by the bridge.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// All assistants visible to the API key.
    async fn list_assistants(&self) -> Result<Vec<Assistant>, AssistantError>;

    async fn create_assistant(&self, request: &NewAssistant) -> Result<Assistant, AssistantError>;

    async fn update_assistant_model(
        &self,
        assistant_id: &str,
        model: &str,
    ) -> Result<Assistant, AssistantError>;

    async fn create_thread(&self) -> Result<Thread, AssistantError>;

    async fn create_message(
        &self,
        thread_id: &str,
        message: &NewMessage,
    ) -> Result<ThreadMessage, AssistantError>;

    async fn create_run(&self, thread_id: &str, assistant_id: &str)
    -> Result<Run, AssistantError>;

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError>;

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolCallOutput],
    ) -> Result<Run, AssistantError>;

    /// Ask the service to stop a run that is still active.
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError>;

    /// Messages on a thread, newest first.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, AssistantError>;

    /// Upload bytes for assistant use.
    async fn upload_file(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<FileObject, AssistantError>;
}
