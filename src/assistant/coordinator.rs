//! Run lifecycle coordinator.
//!
//! One query goes through `Preparing → Submitted → Polling → Completed | Failed`:
//! the conversation's thread is resolved, the user message (optionally with an
//! uploaded file) is posted, a run is started, and the run is polled until it
//! completes, fails, exhausts the poll budget, or is cancelled. Tool calls the
//! run asks for are dispatched through the [`ToolRegistry`] and their outputs
//! submitted back.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::assistant::api::{AssistantApi, NewMessage, Run, RunStatus, ToolCallOutput};
use crate::assistant::clock::{Sleeper, TokioSleeper};
use crate::assistant::ingest::FileIngestor;
use crate::assistant::ledger::MessageLedger;
use crate::assistant::resolver::{AssistantProfile, AssistantResolver};
use crate::assistant::retry::retry_transient;
use crate::assistant::threads::{ConversationId, ThreadRegistry};
use crate::config::{AssistantConfig, BotConfig, IngestConfig, PollConfig, RetryPolicy};
use crate::error::{AssistantError, RunError};
use crate::tools::{ToolContext, ToolRegistry};

/// Tunables for the coordinator.
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    pub assistant: AssistantConfig,
    pub poll: PollConfig,
    pub ingest: IngestConfig,
    pub retry: RetryPolicy,
}

impl From<&BotConfig> for RunSettings {
    fn from(config: &BotConfig) -> Self {
        Self {
            assistant: config.assistant.clone(),
            poll: config.poll.clone(),
            ingest: config.ingest.clone(),
            retry: config.retry.clone(),
        }
    }
}

/// Content a tool asked to hand to the user as-is (e.g. a generated image).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectResult {
    pub kind: String,
    pub format: String,
    pub value: String,
}

/// Successful outcome of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantReply {
    pub text: String,
    pub message_id: String,
    pub thread_id: String,
    pub run_id: String,
    /// Status checks it took to reach completion.
    pub polls: u32,
    pub direct_results: Vec<DirectResult>,
}

/// The `(text, error)` pair view of a query result. Exactly one side is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub text: Option<String>,
    pub error: Option<String>,
}

impl From<Result<AssistantReply, RunError>> for RunOutcome {
    fn from(result: Result<AssistantReply, RunError>) -> Self {
        match result {
            Ok(reply) => Self {
                text: Some(reply.text),
                error: None,
            },
            Err(e) => Self {
                text: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Preparing,
    Submitted,
    Polling,
    Completed,
    Failed,
}

/// Per-query bookkeeping. Built fresh for every call.
#[derive(Debug)]
pub struct RunState {
    pub phase: RunPhase,
    pub thread_id: Option<String>,
    pub run_id: Option<String>,
    pub polls: u32,
    started: Instant,
}

impl RunState {
    fn new() -> Self {
        Self {
            phase: RunPhase::Preparing,
            thread_id: None,
            run_id: None,
            polls: 0,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: RunPhase) {
        tracing::debug!(
            run_id = self.run_id.as_deref().unwrap_or("-"),
            "Run phase {:?} -> {:?}",
            self.phase,
            next
        );
        self.phase = next;
    }
}

/// Errors after which the run may still be queued or in progress remotely.
fn leaves_run_active(error: &RunError) -> bool {
    matches!(
        error,
        RunError::Timeout { .. } | RunError::Cancelled | RunError::Remote(_)
    )
}

/// Await `fut` unless `cancel` fires first.
async fn unless_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, RunError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RunError::Cancelled),
        value = fut => Ok(value),
    }
}

/// Shared state of the bridge: thread mapping, adopted assistant and the
/// delivered-message ledger, plus the collaborators used by every query.
///
/// Queries on one conversation take turns: a thread holds at most one active
/// run, so the next query waits until the previous one is finished.
pub struct RunCoordinator {
    api: Arc<dyn AssistantApi>,
    threads: ThreadRegistry,
    turns: Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
    resolver: AssistantResolver,
    ledger: MessageLedger,
    ingestor: FileIngestor,
    tools: Option<Arc<ToolRegistry>>,
    sleeper: Arc<dyn Sleeper>,
    settings: RunSettings,
}

impl RunCoordinator {
    pub fn new(api: Arc<dyn AssistantApi>, settings: RunSettings, profile: AssistantProfile) -> Self {
        Self {
            threads: ThreadRegistry::new(Arc::clone(&api)),
            turns: Mutex::new(HashMap::new()),
            resolver: AssistantResolver::new(Arc::clone(&api), profile),
            ledger: MessageLedger::new(),
            ingestor: FileIngestor::new(Arc::clone(&api), settings.ingest.clone()),
            tools: None,
            sleeper: Arc::new(TokioSleeper),
            api,
            settings,
        }
    }

    /// Dispatch the run's tool calls through `tools`.
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    pub fn ledger(&self) -> &MessageLedger {
        &self.ledger
    }

    pub fn resolver(&self) -> &AssistantResolver {
        &self.resolver
    }

    /// Resolve the configured assistant so queries can run against it.
    pub async fn ensure_assistant(&self) -> Result<String, AssistantError> {
        let assistant = &self.settings.assistant;
        retry_transient(
            &self.settings.retry,
            self.sleeper.as_ref(),
            "assistants.resolve",
            || self.resolver.resolve(&assistant.name, &assistant.model),
        )
        .await
    }

    /// Run one query to completion.
    pub async fn run_query(
        &self,
        conversation_id: &ConversationId,
        query: &str,
        file_url: Option<&str>,
    ) -> Result<AssistantReply, RunError> {
        self.run_query_cancellable(conversation_id, query, file_url, &CancellationToken::new())
            .await
    }

    /// Run one query to completion, giving up with [`RunError::Cancelled`] as
    /// soon as `cancel` fires.
    pub async fn run_query_cancellable(
        &self,
        conversation_id: &ConversationId,
        query: &str,
        file_url: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<AssistantReply, RunError> {
        let mut state = RunState::new();
        let result = self
            .drive(&mut state, conversation_id, query, file_url, cancel)
            .await;
        match &result {
            Ok(reply) => {
                state.advance(RunPhase::Completed);
                tracing::info!(
                    conversation_id = %conversation_id,
                    run_id = %reply.run_id,
                    polls = reply.polls,
                    "Run completed"
                );
            }
            Err(e) => {
                state.advance(RunPhase::Failed);
                tracing::warn!(
                    conversation_id = %conversation_id,
                    run_id = state.run_id.as_deref().unwrap_or("-"),
                    kind = ?e.kind(),
                    "Run failed: {}",
                    e
                );
            }
        }
        result
    }

    async fn drive(
        &self,
        state: &mut RunState,
        conversation_id: &ConversationId,
        query: &str,
        file_url: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<AssistantReply, RunError> {
        if query.trim().is_empty() {
            return Err(RunError::Validation("Query is empty".to_string()));
        }
        let assistant_id = self.resolver.assistant_id().await.ok_or_else(|| {
            RunError::Validation("Assistant has not been resolved".to_string())
        })?;

        let api = self.api.as_ref();
        let _turn = unless_cancelled(cancel, self.turn(conversation_id)).await?;

        // Thread and message creation are not idempotent, so they are not retried.
        let thread_id =
            unless_cancelled(cancel, self.threads.get_or_create(conversation_id)).await??;
        state.thread_id = Some(thread_id.clone());

        let message = match file_url {
            Some(url) => {
                let file_id = unless_cancelled(cancel, self.ingestor.ingest(url)).await??;
                NewMessage::user(query).with_file(file_id)
            }
            None => NewMessage::user(query),
        };
        unless_cancelled(cancel, api.create_message(&thread_id, &message)).await??;

        let run = unless_cancelled(cancel, api.create_run(&thread_id, &assistant_id)).await??;
        state.run_id = Some(run.id.clone());
        state.advance(RunPhase::Submitted);
        tracing::info!(
            conversation_id = %conversation_id,
            thread_id = %thread_id,
            run_id = %run.id,
            "Run submitted"
        );

        let result = self
            .poll(state, conversation_id, &thread_id, &run.id, cancel)
            .await;
        if let Err(e) = &result {
            if leaves_run_active(e) {
                self.cancel_run(&thread_id, &run.id).await;
            }
        }
        result
    }

    /// Wait for this conversation's turn.
    async fn turn(&self, conversation_id: &ConversationId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut turns = self.turns.lock().await;
            Arc::clone(turns.entry(conversation_id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Stop an abandoned run so it does not block the thread. Best effort.
    async fn cancel_run(&self, thread_id: &str, run_id: &str) {
        match self.api.cancel_run(thread_id, run_id).await {
            Ok(run) => tracing::info!(run_id = %run_id, status = %run.status, "Cancelled run"),
            Err(e) => tracing::warn!(run_id = %run_id, "Could not cancel run: {}", e),
        }
    }

    async fn poll(
        &self,
        state: &mut RunState,
        conversation_id: &ConversationId,
        thread_id: &str,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AssistantReply, RunError> {
        let api = self.api.as_ref();
        let poll = &self.settings.poll;
        let mut completed_without_message = false;
        let mut direct_results = Vec::new();
        state.advance(RunPhase::Polling);

        while state.polls < poll.max_polls {
            unless_cancelled(cancel, self.sleeper.sleep(poll.interval)).await?;
            state.polls += 1;

            let run = self
                .remote(cancel, "runs.retrieve", || api.retrieve_run(thread_id, run_id))
                .await?;
            tracing::debug!(run_id = %run_id, status = %run.status, poll = state.polls, "Polled run");

            match run.status {
                RunStatus::Completed => {
                    let messages = self
                        .remote(cancel, "messages.list", || api.list_messages(thread_id))
                        .await?;
                    if let Some(message) = self.ledger.claim_first_new(&messages) {
                        let text = message.text().ok_or_else(|| RunError::NoText {
                            message_id: message.id.clone(),
                        })?;
                        return Ok(AssistantReply {
                            text: text.to_string(),
                            message_id: message.id.clone(),
                            thread_id: thread_id.to_string(),
                            run_id: run_id.to_string(),
                            polls: state.polls,
                            direct_results,
                        });
                    }
                    if !completed_without_message {
                        tracing::warn!(run_id = %run_id, "Run completed without a new message");
                    }
                    completed_without_message = true;
                }
                RunStatus::RequiresAction => {
                    let outputs = self
                        .call_tools(&run, conversation_id, &mut direct_results, cancel)
                        .await?;
                    unless_cancelled(cancel, api.submit_tool_outputs(thread_id, run_id, &outputs))
                        .await??;
                }
                status if status.is_failure() => {
                    let reason = run
                        .last_error
                        .as_ref()
                        .map(|e| format!("{} ({})", e.message, e.code))
                        .unwrap_or_else(|| "no error details".to_string());
                    return Err(RunError::RunFailed {
                        run_id: run_id.to_string(),
                        status: status.to_string(),
                        reason,
                    });
                }
                _ => {}
            }
        }

        if completed_without_message {
            Err(RunError::NoNewMessage {
                run_id: run_id.to_string(),
            })
        } else {
            Err(RunError::Timeout {
                run_id: run_id.to_string(),
                polls: state.polls,
                elapsed: state.started.elapsed(),
            })
        }
    }

    /// Idempotent service call: retried on transient failures, abandoned on cancel.
    async fn remote<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: &str,
        call: F,
    ) -> Result<T, RunError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AssistantError>>,
    {
        let retried = retry_transient(&self.settings.retry, self.sleeper.as_ref(), operation, call);
        Ok(unless_cancelled(cancel, retried).await??)
    }

    /// Execute every tool call the run asks for and collect the outputs.
    async fn call_tools(
        &self,
        run: &Run,
        conversation_id: &ConversationId,
        direct_results: &mut Vec<DirectResult>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ToolCallOutput>, RunError> {
        let calls = run
            .required_action
            .as_ref()
            .and_then(|action| action.submit_tool_outputs.as_ref())
            .map(|submit| submit.tool_calls.as_slice())
            .unwrap_or_default();

        let mut outputs = Vec::with_capacity(calls.len());
        for call in calls {
            let ctx = ToolContext {
                conversation_id: Some(conversation_id.to_string()),
                run_id: Some(run.id.clone()),
                tool_call_id: Some(call.id.clone()),
            };
            let output = match (&self.tools, serde_json::from_str::<Value>(&call.function.arguments)) {
                (None, _) => json!({ "error": format!("Unknown tool: {}", call.function.name) }),
                (Some(_), Err(e)) => json!({ "error": format!("Invalid arguments: {}", e) }),
                (Some(registry), Ok(params)) => {
                    unless_cancelled(cancel, registry.dispatch(&call.function.name, params, &ctx))
                        .await?
                }
            };
            if let Some(direct) = output
                .get("direct_result")
                .and_then(|value| serde_json::from_value::<DirectResult>(value.clone()).ok())
            {
                direct_results.push(direct);
            }
            outputs.push(ToolCallOutput {
                tool_call_id: call.id.clone(),
                output: output.to_string(),
            });
        }
        Ok(outputs)
    }
}
