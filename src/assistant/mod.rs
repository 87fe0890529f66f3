//! Assistant service integration: the HTTP client, shared conversation state
//! and the run lifecycle coordinator.

pub mod api;
pub mod client;
pub mod clock;
pub mod coordinator;
pub mod ingest;
pub mod ledger;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod resolver;
pub mod retry;
pub mod threads;

pub use api::AssistantApi;
pub use client::OpenAiClient;
pub use clock::{Sleeper, TokioSleeper};
pub use coordinator::{
    AssistantReply, DirectResult, RunCoordinator, RunOutcome, RunPhase, RunSettings, RunState,
};
pub use ingest::FileIngestor;
pub use ledger::MessageLedger;
pub use resolver::{AssistantProfile, AssistantResolver};
pub use threads::{ConversationId, ThreadRegistry};
