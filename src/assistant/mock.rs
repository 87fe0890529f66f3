//! In-memory assistant service and clock for tests.
//!
//! `FakeAssistantApi` keeps threads, messages, runs and assistants in memory,
//! counts calls per operation (using the same labels as the HTTP client), and
//! walks each run through a scripted sequence of poll results. Like the real
//! service, it refuses a second active run on one thread.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::assistant::api::{
    Assistant, AssistantApi, FileObject, MessageContent, NewAssistant, NewMessage, RequiredAction,
    Run, RunLastError, RunStatus, SubmitToolOutputs, TextContent, Thread, ThreadMessage, ToolCall,
    ToolCallOutput,
};
use crate::assistant::clock::Sleeper;
use crate::error::AssistantError;

/// Reply used when nothing was queued with [`FakeAssistantApi::push_reply`].
pub const DEFAULT_REPLY: &str = "👋";

/// What a single `retrieve_run` call does to a fake run.
#[derive(Debug)]
pub enum PollStep {
    /// Move the run to this status. `Completed` also appends the next reply.
    Status(RunStatus),
    /// Complete without appending any message.
    CompletedSilently,
    /// Complete, appending an assistant message with exactly this content.
    CompletedWith(Vec<MessageContent>),
    /// Ask the client to run these tool calls.
    RequiresTools(Vec<ToolCall>),
    /// End in `failed` with the given last error.
    Fail { code: String, message: String },
    /// Make the retrieval itself fail.
    Error(AssistantError),
}

#[derive(Debug)]
struct FakeRun {
    run: Run,
    script: VecDeque<PollStep>,
}

#[derive(Debug, Default)]
struct State {
    calls: HashMap<String, usize>,
    failures: HashMap<String, VecDeque<AssistantError>>,
    assistants: Vec<Assistant>,
    /// Oldest first.
    threads: HashMap<String, Vec<ThreadMessage>>,
    runs: HashMap<String, FakeRun>,
    scripts: VecDeque<Vec<PollStep>>,
    replies: VecDeque<String>,
    posted: Vec<(String, NewMessage)>,
    submitted: Vec<ToolCallOutput>,
    uploads: Vec<(String, usize)>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_{}", prefix, self.next_id)
    }

    fn append(&mut self, thread_id: &str, role: &str, text: &str) -> ThreadMessage {
        let content = vec![MessageContent::Text {
            text: TextContent {
                value: text.to_string(),
                annotations: Vec::new(),
            },
        }];
        self.append_content(thread_id, role, content)
    }

    fn append_content(
        &mut self,
        thread_id: &str,
        role: &str,
        content: Vec<MessageContent>,
    ) -> ThreadMessage {
        let message = ThreadMessage {
            id: self.next_id("msg"),
            role: role.to_string(),
            content,
        };
        self.threads
            .entry(thread_id.to_string())
            .or_default()
            .push(message.clone());
        message
    }
}

/// In-memory [`AssistantApi`].
#[derive(Debug, Default)]
pub struct FakeAssistantApi {
    state: Mutex<State>,
}

impl FakeAssistantApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and fail it if a failure was queued for `op`.
    fn enter(&self, op: &str) -> Result<MutexGuard<'_, State>, AssistantError> {
        let mut state = self.state();
        *state.calls.entry(op.to_string()).or_default() += 1;
        if let Some(err) = state.failures.get_mut(op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }

    /// Number of calls made to `op` (e.g. `"threads.create"`).
    pub fn calls(&self, op: &str) -> usize {
        self.state().calls.get(op).copied().unwrap_or(0)
    }

    /// Number of calls across all operations.
    pub fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    /// Make the next call to `op` fail with `err`. Queued failures stack.
    pub fn fail_next(&self, op: &str, err: AssistantError) {
        self.state()
            .failures
            .entry(op.to_string())
            .or_default()
            .push_back(err);
    }

    /// Queue the text of the next assistant reply.
    pub fn push_reply(&self, text: impl Into<String>) {
        self.state().replies.push_back(text.into());
    }

    /// Poll script for the next created run. Without one, a run goes
    /// `in_progress` then `completed`. Once a script runs out, the run keeps
    /// its last status.
    pub fn script_next_run(&self, steps: Vec<PollStep>) {
        self.state().scripts.push_back(steps);
    }

    /// Register an existing remote assistant and return its id.
    pub fn insert_assistant(&self, name: &str, model: &str) -> String {
        let mut state = self.state();
        let id = state.next_id("asst");
        state.assistants.push(Assistant {
            id: id.clone(),
            name: Some(name.to_string()),
            model: model.to_string(),
            instructions: None,
            tools: Vec::new(),
        });
        id
    }

    pub fn assistants(&self) -> Vec<Assistant> {
        self.state().assistants.clone()
    }

    /// Messages of a thread, oldest first.
    pub fn messages(&self, thread_id: &str) -> Vec<ThreadMessage> {
        self.state()
            .threads
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every posted user message with its thread id.
    pub fn posted(&self) -> Vec<(String, NewMessage)> {
        self.state().posted.clone()
    }

    /// Tool outputs submitted back to runs, in order.
    pub fn submitted_outputs(&self) -> Vec<ToolCallOutput> {
        self.state().submitted.clone()
    }

    /// Uploaded files as `(name, size)`.
    pub fn uploads(&self) -> Vec<(String, usize)> {
        self.state().uploads.clone()
    }
}

fn not_found(endpoint: &str, what: &str) -> AssistantError {
    AssistantError::Status {
        endpoint: endpoint.to_string(),
        status: 404,
        body: format!("No such {}", what),
    }
}

#[async_trait]
impl AssistantApi for FakeAssistantApi {
    async fn list_assistants(&self) -> Result<Vec<Assistant>, AssistantError> {
        let state = self.enter("assistants.list")?;
        Ok(state.assistants.clone())
    }

    async fn create_assistant(&self, request: &NewAssistant) -> Result<Assistant, AssistantError> {
        let mut state = self.enter("assistants.create")?;
        let assistant = Assistant {
            id: state.next_id("asst"),
            name: Some(request.name.clone()),
            model: request.model.clone(),
            instructions: Some(request.instructions.clone()),
            tools: request.tools.clone(),
        };
        state.assistants.push(assistant.clone());
        Ok(assistant)
    }

    async fn update_assistant_model(
        &self,
        assistant_id: &str,
        model: &str,
    ) -> Result<Assistant, AssistantError> {
        let mut state = self.enter("assistants.update")?;
        let assistant = state
            .assistants
            .iter_mut()
            .find(|a| a.id == assistant_id)
            .ok_or_else(|| not_found("assistants.update", "assistant"))?;
        assistant.model = model.to_string();
        Ok(assistant.clone())
    }

    async fn create_thread(&self) -> Result<Thread, AssistantError> {
        let mut state = self.enter("threads.create")?;
        let id = state.next_id("thread");
        state.threads.insert(id.clone(), Vec::new());
        Ok(Thread { id })
    }

    async fn create_message(
        &self,
        thread_id: &str,
        message: &NewMessage,
    ) -> Result<ThreadMessage, AssistantError> {
        let mut state = self.enter("messages.create")?;
        if !state.threads.contains_key(thread_id) {
            return Err(not_found("messages.create", "thread"));
        }
        state.posted.push((thread_id.to_string(), message.clone()));
        Ok(state.append(thread_id, &message.role, &message.content))
    }

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<Run, AssistantError> {
        let mut state = self.enter("runs.create")?;
        if !state.assistants.iter().any(|a| a.id == assistant_id) {
            return Err(not_found("runs.create", "assistant"));
        }
        if let Some(active) = state
            .runs
            .values()
            .find(|fake| fake.run.thread_id == thread_id && fake.run.status.is_active())
        {
            return Err(AssistantError::Status {
                endpoint: "runs.create".to_string(),
                status: 400,
                body: format!(
                    "Thread {} already has an active run {}.",
                    thread_id, active.run.id
                ),
            });
        }
        let script = state.scripts.pop_front().unwrap_or_else(|| {
            vec![
                PollStep::Status(RunStatus::InProgress),
                PollStep::Status(RunStatus::Completed),
            ]
        });
        let run = Run {
            id: state.next_id("run"),
            thread_id: thread_id.to_string(),
            status: RunStatus::Queued,
            required_action: None,
            last_error: None,
        };
        state.runs.insert(
            run.id.clone(),
            FakeRun {
                run: run.clone(),
                script: script.into(),
            },
        );
        Ok(run)
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        let mut state = self.enter("runs.retrieve")?;
        let step = {
            let fake = state
                .runs
                .get_mut(run_id)
                .filter(|fake| fake.run.thread_id == thread_id)
                .ok_or_else(|| not_found("runs.retrieve", "run"))?;
            match fake.script.pop_front() {
                Some(step) => step,
                None => return Ok(fake.run.clone()),
            }
        };

        let mut status_update = None;
        let mut required_action = None;
        let mut last_error = None;
        match step {
            PollStep::Error(err) => return Err(err),
            PollStep::Status(RunStatus::Completed) => {
                let reply = state
                    .replies
                    .pop_front()
                    .unwrap_or_else(|| DEFAULT_REPLY.to_string());
                state.append(thread_id, "assistant", &reply);
                status_update = Some(RunStatus::Completed);
            }
            PollStep::Status(status) => status_update = Some(status),
            PollStep::CompletedSilently => status_update = Some(RunStatus::Completed),
            PollStep::CompletedWith(content) => {
                state.append_content(thread_id, "assistant", content);
                status_update = Some(RunStatus::Completed);
            }
            PollStep::RequiresTools(tool_calls) => {
                status_update = Some(RunStatus::RequiresAction);
                required_action = Some(RequiredAction {
                    kind: "submit_tool_outputs".to_string(),
                    submit_tool_outputs: Some(SubmitToolOutputs { tool_calls }),
                });
            }
            PollStep::Fail { code, message } => {
                status_update = Some(RunStatus::Failed);
                last_error = Some(RunLastError { code, message });
            }
        }

        let fake = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| not_found("runs.retrieve", "run"))?;
        if let Some(status) = status_update {
            fake.run.status = status;
        }
        fake.run.required_action = required_action;
        fake.run.last_error = last_error;
        Ok(fake.run.clone())
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolCallOutput],
    ) -> Result<Run, AssistantError> {
        let mut state = self.enter("runs.submit_tool_outputs")?;
        state.submitted.extend_from_slice(outputs);
        let fake = state
            .runs
            .get_mut(run_id)
            .filter(|fake| fake.run.thread_id == thread_id)
            .ok_or_else(|| not_found("runs.submit_tool_outputs", "run"))?;
        if fake.run.status != RunStatus::RequiresAction {
            return Err(AssistantError::Status {
                endpoint: "runs.submit_tool_outputs".to_string(),
                status: 400,
                body: format!("Run is {}", fake.run.status),
            });
        }
        fake.run.status = RunStatus::InProgress;
        fake.run.required_action = None;
        Ok(fake.run.clone())
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        let mut state = self.enter("runs.cancel")?;
        let fake = state
            .runs
            .get_mut(run_id)
            .filter(|fake| fake.run.thread_id == thread_id)
            .ok_or_else(|| not_found("runs.cancel", "run"))?;
        if !fake.run.status.is_active() {
            return Err(AssistantError::Status {
                endpoint: "runs.cancel".to_string(),
                status: 400,
                body: format!("Cannot cancel run with status '{}'.", fake.run.status),
            });
        }
        fake.run.status = RunStatus::Cancelled;
        fake.run.required_action = None;
        fake.script.clear();
        Ok(fake.run.clone())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, AssistantError> {
        let state = self.enter("messages.list")?;
        let messages = state
            .threads
            .get(thread_id)
            .ok_or_else(|| not_found("messages.list", "thread"))?;
        Ok(messages.iter().rev().cloned().collect())
    }

    async fn upload_file(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<FileObject, AssistantError> {
        let mut state = self.enter("files.upload")?;
        let id = state.next_id("file");
        state.uploads.push((file_name.to_string(), bytes.len()));
        Ok(FileObject {
            id,
            filename: Some(file_name.to_string()),
            bytes: Some(bytes.len() as u64),
        })
    }
}

/// Sleeper that records requested durations and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
    }
}
