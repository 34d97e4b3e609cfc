// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-session state: transcript, attempts, pending buffers, sinks, and the
//! auto-approve budget.

use std::panic::{catch_unwind, AssertUnwindSafe};

use dbgcopilot_model::SessionConfig;
use serde_json::Value;

use crate::text::truncate_chars;

pub const DEFAULT_AUTO_ROUND_LIMIT: u32 = 64;

/// Configured auto-approve round limit (floor 1, default 64).
pub fn resolve_auto_round_limit(config: &SessionConfig) -> u32 {
    for key in ["auto_round_limit", "auto_rounds_limit"] {
        if let Some(raw) = config.get(key) {
            if let Ok(limit) = raw.trim().parse::<i64>() {
                if limit > 0 {
                    return limit as u32;
                }
            }
        }
    }
    DEFAULT_AUTO_ROUND_LIMIT
}

/// One executed command and the head of its output.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub cmd: String,
    pub output_snippet: String,
}

impl Attempt {
    /// Snippets are capped at 160 characters.
    pub fn new(cmd: impl Into<String>, output: &str) -> Self {
        Self {
            cmd: cmd.into(),
            output_snippet: truncate_chars(output, 160),
        }
    }
}

/// Immediate-delivery callback for debugger or chat output.
pub type OutputSink = Box<dyn FnMut(&str) + Send>;

/// In-memory state for one ongoing investigation.
pub struct SessionState {
    pub session_id: String,
    pub goal: String,
    /// Ordered `User:` / `Assistant:` / `Assistant: (executed)` lines.
    pub chatlog: Vec<String>,
    pub attempts: Vec<Attempt>,
    /// Short annotations (`Q:`, `A:`, `O:`); prompt context only, never
    /// consulted for correctness.
    pub facts: Vec<String>,
    pub last_output: String,
    pub config: SessionConfig,
    pub selected_provider: Option<String>,
    pub colors_enabled: bool,
    /// At most one proposed command awaiting user confirmation.
    pub pending_command: Option<String>,
    pub auto_accept_commands: bool,
    /// Countdown consulted only while auto-approve is on; `None` when the
    /// mode is off.
    pub auto_rounds_remaining: Option<u32>,
    pub pending_outputs: Vec<String>,
    pub pending_chat: Vec<String>,
    pub pending_chat_events: Vec<Value>,
    pub debugger_output_sink: Option<OutputSink>,
    pub chat_output_sink: Option<OutputSink>,
    /// Whether the current reply already went out through a sink.
    pub last_answer_streamed: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            session_id: short_id(),
            goal: String::new(),
            chatlog: Vec::new(),
            attempts: Vec::new(),
            facts: Vec::new(),
            last_output: String::new(),
            config: SessionConfig::default(),
            selected_provider: None,
            colors_enabled: true,
            pending_command: None,
            auto_accept_commands: false,
            auto_rounds_remaining: None,
            pending_outputs: Vec::new(),
            pending_chat: Vec::new(),
            pending_chat_events: Vec::new(),
            debugger_output_sink: None,
            chat_output_sink: None,
            last_answer_streamed: false,
        }
    }

    /// Assign a fresh short id (used by `/new` and the overflow reset).
    pub fn rotate_id(&mut self) {
        self.session_id = short_id();
    }

    /// Drop the heavy history while keeping configuration and selections.
    pub fn clear_history(&mut self) {
        self.chatlog.clear();
        self.attempts.clear();
        self.facts.clear();
        self.last_output.clear();
        self.pending_command = None;
    }

    /// Deliver a debugger-output chunk: through the sink when present,
    /// otherwise into the pending buffer.  Returns whether it streamed.
    ///
    /// A chunk is delivered at most once.  A panicking sink counts as "not
    /// streamed" and the chunk falls back to the buffer.
    pub fn push_debugger_output(&mut self, chunk: &str) -> bool {
        if chunk.is_empty() {
            return false;
        }
        if let Some(sink) = self.debugger_output_sink.as_mut() {
            if catch_unwind(AssertUnwindSafe(|| sink(chunk))).is_ok() {
                return true;
            }
        }
        self.pending_outputs.push(chunk.to_string());
        false
    }

    /// Deliver a chat chunk; same at-most-once contract as debugger output.
    pub fn push_chat(&mut self, chunk: &str) -> bool {
        if chunk.is_empty() {
            return false;
        }
        if let Some(sink) = self.chat_output_sink.as_mut() {
            if catch_unwind(AssertUnwindSafe(|| sink(chunk))).is_ok() {
                return true;
            }
        }
        self.pending_chat.push(chunk.to_string());
        false
    }

    /// Queue a structured chat event for front-end consumers.
    pub fn push_chat_event(&mut self, event: Value) {
        self.pending_chat_events.push(event);
    }

    /// Drain buffered debugger output (front-end poll path).
    pub fn take_pending_outputs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_outputs)
    }

    /// Drain buffered chat chunks.
    pub fn take_pending_chat(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_chat)
    }

    /// Drain buffered chat events.
    pub fn take_pending_chat_events(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.pending_chat_events)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Short opaque session id: first 8 hex chars of a v4 UUID.
fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Identity ──────────────────────────────────────────────────────────────

    #[test]
    fn ids_are_short_and_unique() {
        let a = SessionState::new();
        let b = SessionState::new();
        assert_eq!(a.session_id.len(), 8);
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn rotate_changes_the_id() {
        let mut s = SessionState::new();
        let old = s.session_id.clone();
        s.rotate_id();
        assert_ne!(s.session_id, old);
    }

    #[test]
    fn clear_history_keeps_config() {
        let mut s = SessionState::new();
        s.chatlog.push("User: hi".into());
        s.attempts.push(Attempt::new("bt", "#0 main"));
        s.facts.push("Q: hi".into());
        s.last_output = "out".into();
        s.pending_command = Some("run".into());
        s.config.set("llm_provider", "mock-local");
        s.clear_history();
        assert!(s.chatlog.is_empty());
        assert!(s.attempts.is_empty());
        assert!(s.facts.is_empty());
        assert!(s.last_output.is_empty());
        assert!(s.pending_command.is_none());
        assert_eq!(s.config.get("llm_provider"), Some("mock-local"));
    }

    // ── Attempts ──────────────────────────────────────────────────────────────

    #[test]
    fn attempt_snippet_is_capped_at_160_chars() {
        let long = "y".repeat(500);
        let a = Attempt::new("bt", &long);
        assert_eq!(a.output_snippet.chars().count(), 160);
    }

    // ── Auto-round limit ──────────────────────────────────────────────────────

    #[test]
    fn auto_round_limit_defaults_to_64() {
        assert_eq!(resolve_auto_round_limit(&SessionConfig::default()), 64);
    }

    #[test]
    fn auto_round_limit_reads_config_with_alias() {
        let mut cfg = SessionConfig::default();
        cfg.set("auto_round_limit", "5");
        assert_eq!(resolve_auto_round_limit(&cfg), 5);

        let mut cfg = SessionConfig::default();
        cfg.set("auto_rounds_limit", "7");
        assert_eq!(resolve_auto_round_limit(&cfg), 7);
    }

    #[test]
    fn auto_round_limit_rejects_nonpositive_and_garbage() {
        let mut cfg = SessionConfig::default();
        cfg.set("auto_round_limit", "0");
        assert_eq!(resolve_auto_round_limit(&cfg), 64);
        cfg.set("auto_round_limit", "many");
        assert_eq!(resolve_auto_round_limit(&cfg), 64);
    }

    // ── Sinks and buffers ─────────────────────────────────────────────────────

    #[test]
    fn output_buffers_when_no_sink_is_installed() {
        let mut s = SessionState::new();
        assert!(!s.push_debugger_output("chunk"));
        assert_eq!(s.take_pending_outputs(), vec!["chunk"]);
        assert!(s.take_pending_outputs().is_empty());
    }

    #[test]
    fn output_streams_through_sink_without_buffering() {
        use std::sync::{Arc, Mutex};
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let mut s = SessionState::new();
        s.debugger_output_sink = Some(Box::new(move |chunk| {
            sink_seen.lock().unwrap().push(chunk.to_string());
        }));
        assert!(s.push_debugger_output("chunk"));
        assert!(s.pending_outputs.is_empty(), "streamed chunks must not buffer");
        assert_eq!(seen.lock().unwrap().as_slice(), ["chunk".to_string()]);
    }

    #[test]
    fn panicking_sink_falls_back_to_buffer() {
        let mut s = SessionState::new();
        s.chat_output_sink = Some(Box::new(|_| panic!("sink failure")));
        assert!(!s.push_chat("chunk"));
        assert_eq!(s.take_pending_chat(), vec!["chunk"]);
    }

    #[test]
    fn empty_chunks_are_dropped() {
        let mut s = SessionState::new();
        assert!(!s.push_debugger_output(""));
        assert!(!s.push_chat(""));
        assert!(s.pending_outputs.is_empty());
        assert!(s.pending_chat.is_empty());
    }

    #[test]
    fn chat_events_queue_in_order() {
        let mut s = SessionState::new();
        s.push_chat_event(serde_json::json!({"type": "command_proposal", "command": "bt"}));
        s.push_chat_event(serde_json::json!({"type": "command_proposal", "command": "run"}));
        let events = s.take_pending_chat_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["command"], "bt");
        assert_eq!(events[1]["command"], "run");
    }
}
