//! HTTP client for the OpenAI Assistants API (v2).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::assistant::api::{
    Assistant, AssistantApi, FileObject, NewAssistant, NewMessage, Run, Thread, ThreadMessage,
    ToolCallOutput,
};
use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::error::AssistantError;

/// Page size used for list endpoints (the service maximum).
const PAGE_LIMIT: &str = "100";

#[derive(Debug, Deserialize)]
struct ListPage<T> {
    data: Vec<T>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    last_id: Option<String>,
}

/// Assistants API client over reqwest.
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl OpenAiClient {
    pub fn new(api_key: SecretString, base_url: impl Into<String>) -> Self {
        Self {
            client: http_client(DEFAULT_REQUEST_TIMEOUT),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Replace the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.get(self.url(path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.post(self.url(path)))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(self.api_key.expose_secret())
            .header("OpenAI-Beta", "assistants=v2")
    }

    /// Send a request and decode a JSON body, mapping failures onto [`AssistantError`].
    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        builder: RequestBuilder,
    ) -> Result<T, AssistantError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| AssistantError::Transport {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AssistantError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body: error_message(&body),
            });
        }

        resp.json::<T>().await.map_err(|e| {
            // A body cut off by the timeout is a transport failure, not a bad payload.
            if e.is_timeout() {
                AssistantError::Transport {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                }
            } else {
                AssistantError::InvalidResponse {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                }
            }
        })
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client for the assistant service: {}", e);
            reqwest::Client::new()
        })
}

/// Prefer the service's `error.message` over the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl AssistantApi for OpenAiClient {
    async fn list_assistants(&self) -> Result<Vec<Assistant>, AssistantError> {
        let mut assistants = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut request = self.get("assistants").query(&[("limit", PAGE_LIMIT)]);
            if let Some(ref cursor) = after {
                request = request.query(&[("after", cursor.as_str())]);
            }
            let page: ListPage<Assistant> = self.send("assistants.list", request).await?;
            assistants.extend(page.data);
            match (page.has_more, page.last_id) {
                (true, Some(last_id)) => after = Some(last_id),
                _ => break,
            }
        }
        Ok(assistants)
    }

    async fn create_assistant(&self, request: &NewAssistant) -> Result<Assistant, AssistantError> {
        self.send("assistants.create", self.post("assistants").json(request))
            .await
    }

    async fn update_assistant_model(
        &self,
        assistant_id: &str,
        model: &str,
    ) -> Result<Assistant, AssistantError> {
        let body = serde_json::json!({ "model": model });
        self.send(
            "assistants.update",
            self.post(&format!("assistants/{}", assistant_id)).json(&body),
        )
        .await
    }

    async fn create_thread(&self) -> Result<Thread, AssistantError> {
        self.send(
            "threads.create",
            self.post("threads").json(&serde_json::json!({})),
        )
        .await
    }

    async fn create_message(
        &self,
        thread_id: &str,
        message: &NewMessage,
    ) -> Result<ThreadMessage, AssistantError> {
        self.send(
            "messages.create",
            self.post(&format!("threads/{}/messages", thread_id))
                .json(message),
        )
        .await
    }

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<Run, AssistantError> {
        let body = serde_json::json!({ "assistant_id": assistant_id });
        self.send(
            "runs.create",
            self.post(&format!("threads/{}/runs", thread_id)).json(&body),
        )
        .await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        self.send(
            "runs.retrieve",
            self.get(&format!("threads/{}/runs/{}", thread_id, run_id)),
        )
        .await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolCallOutput],
    ) -> Result<Run, AssistantError> {
        let body = serde_json::json!({ "tool_outputs": outputs });
        self.send(
            "runs.submit_tool_outputs",
            self.post(&format!(
                "threads/{}/runs/{}/submit_tool_outputs",
                thread_id, run_id
            ))
            .json(&body),
        )
        .await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        self.send(
            "runs.cancel",
            self.post(&format!("threads/{}/runs/{}/cancel", thread_id, run_id)),
        )
        .await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, AssistantError> {
        let page: ListPage<ThreadMessage> = self
            .send(
                "messages.list",
                self.get(&format!("threads/{}/messages", thread_id))
                    .query(&[("order", "desc"), ("limit", PAGE_LIMIT)]),
            )
            .await?;
        Ok(page.data)
    }

    async fn upload_file(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<FileObject, AssistantError> {
        let form = Form::new()
            .text("purpose", "assistants")
            .part("file", Part::bytes(bytes).file_name(file_name.to_string()));
        self.send("files.upload", self.post("files").multipart(form))
            .await
    }
}
