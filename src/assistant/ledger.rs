//! Ledger of assistant messages already delivered to callers.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::assistant::api::ThreadMessage;

/// Process-wide set of delivered message ids. Grows monotonically.
#[derive(Debug, Default)]
pub struct MessageLedger {
    delivered: Mutex<HashSet<String>>,
}

impl MessageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the first assistant message in `messages` that was never delivered,
    /// and record it as delivered. Check and insert happen under one lock, so a
    /// message id is handed out at most once.
    pub fn claim_first_new<'m>(&self, messages: &'m [ThreadMessage]) -> Option<&'m ThreadMessage> {
        let mut delivered = self.delivered.lock().unwrap_or_else(PoisonError::into_inner);
        let message = messages
            .iter()
            .filter(|m| m.role == "assistant")
            .find(|m| !delivered.contains(&m.id))?;
        delivered.insert(message.id.clone());
        Some(message)
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(message_id)
    }

    pub fn len(&self) -> usize {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
