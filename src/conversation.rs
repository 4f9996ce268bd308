//! Conversation history with an explicit size bound.
//!
//! The system prompt and the initial task message are pinned. When the
//! history grows past [`HistoryPolicy::max_chars`], the oldest unpinned
//! messages are folded, oldest first, into one summary message holding the
//! first line of each, until the history fits or only
//! [`HistoryPolicy::keep_recent`] unpinned messages remain.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::Message;
use crate::tools::truncate;

/// Longest digest kept per folded message.
const DIGEST_LENGTH: usize = 200;

/// How much history is sent to the reasoning engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPolicy {
    /// Upper bound on total message characters before folding starts.
    pub max_chars: usize,
    /// Unpinned messages that are never folded.
    pub keep_recent: usize,
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self {
            max_chars: 400_000,
            keep_recent: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pinned: Vec<Message>,
    digests: Vec<String>,
    recent: VecDeque<Message>,
    policy: HistoryPolicy,
}

impl Conversation {
    pub fn new(
        system_prompt: impl Into<String>,
        initial_message: impl Into<String>,
        policy: HistoryPolicy,
    ) -> Self {
        Self {
            pinned: vec![
                Message::system(system_prompt),
                Message::user(initial_message),
            ],
            digests: Vec::new(),
            recent: VecDeque::new(),
            policy,
        }
    }

    /// Append a model reply.
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Message::assistant(content));
    }

    /// Append an observation or instruction addressed to the model.
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Message::user(content));
    }

    pub fn push(&mut self, message: Message) {
        self.recent.push_back(message);
        self.enforce_policy();
    }

    /// The history as sent to the engine.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = self.pinned.clone();
        if let Some(summary) = self.summary_message() {
            messages.push(summary);
        }
        messages.extend(self.recent.iter().cloned());
        messages
    }

    /// Number of messages folded into the summary so far.
    pub fn folded_count(&self) -> usize {
        self.digests.len()
    }

    pub fn total_chars(&self) -> usize {
        let pinned: usize = self.pinned.iter().map(|m| m.content.len()).sum();
        let recent: usize = self.recent.iter().map(|m| m.content.len()).sum();
        let summary = self
            .summary_message()
            .map(|m| m.content.len())
            .unwrap_or(0);
        pinned + recent + summary
    }

    fn summary_message(&self) -> Option<Message> {
        if self.digests.is_empty() {
            return None;
        }
        let mut content = format!(
            "Earlier conversation ({} messages, summarized oldest first):",
            self.digests.len()
        );
        for digest in &self.digests {
            content.push_str("\n- ");
            content.push_str(digest);
        }
        Some(Message::user(content))
    }

    fn enforce_policy(&mut self) {
        while self.total_chars() > self.policy.max_chars
            && self.recent.len() > self.policy.keep_recent
        {
            let Some(oldest) = self.recent.pop_front() else {
                break;
            };
            let first_line = oldest.content.lines().next().unwrap_or("").trim();
            self.digests
                .push(format!("{}: {}", oldest.role, truncate(first_line, DIGEST_LENGTH)));
        }
        if !self.digests.is_empty() {
            debug!(
                folded = self.digests.len(),
                total_chars = self.total_chars(),
                "History folded"
            );
        }
    }
}
