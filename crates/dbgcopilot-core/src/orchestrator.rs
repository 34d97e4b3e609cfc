// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The per-session turn loop.
//!
//! `ask` composes a bounded prompt from accumulated session state, sends it
//! to the selected provider, and scans the reply for a single `<cmd>`
//! directive.  With auto-approve on, the directive is executed and its
//! output feeds a followup turn; otherwise the command is stashed and a
//! confirmation request is surfaced.  Context overflow is handled before
//! any provider call via two exact control phrases.

use std::sync::{Arc, OnceLock};

use async_recursion::async_recursion;
use regex::Regex;
use serde_json::json;
use tracing::{debug, warn};

use dbgcopilot_backend::DebuggerBackend;
use dbgcopilot_config::PromptConfig;
use dbgcopilot_model::ProviderRegistry;

use crate::session::{resolve_auto_round_limit, Attempt, SessionState};
use crate::text::{
    color_text, head_tail_truncate, strip_ansi, truncate_chars, wants_chinese, Color,
};

fn cmd_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<cmd>\s*([\s\S]*?)\s*</cmd>").expect("static regex"))
}

/// Extract the first `<cmd>...</cmd>` directive from a reply.
pub fn extract_cmd(text: &str) -> Option<String> {
    cmd_re()
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|c| !c.is_empty())
}

/// Reply text with the first `<cmd>` region removed.
fn remove_cmd_tag(text: &str) -> String {
    match cmd_re().find(text) {
        Some(m) => format!("{}{}", &text[..m.start()], &text[m.end()..]),
        None => text.to_string(),
    }
}

pub struct Orchestrator {
    backend: Box<dyn DebuggerBackend>,
    pub state: SessionState,
    prompts: PromptConfig,
    registry: Arc<ProviderRegistry>,
}

impl Orchestrator {
    pub fn new(
        backend: Box<dyn DebuggerBackend>,
        state: SessionState,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        let prompts = PromptConfig::load(Some(backend.name()));
        Self {
            backend,
            state,
            prompts,
            registry,
        }
    }

    /// Construct with an explicit prompt config (tests, embedded callers).
    pub fn with_prompts(
        backend: Box<dyn DebuggerBackend>,
        state: SessionState,
        registry: Arc<ProviderRegistry>,
        prompts: PromptConfig,
    ) -> Self {
        Self {
            backend,
            state,
            prompts,
            registry,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn backend_prompt(&self) -> String {
        self.backend.prompt()
    }

    pub fn backend_startup_output(&self) -> Option<String> {
        self.backend.startup_output()
    }

    pub fn prompt_config(&self) -> &PromptConfig {
        &self.prompts
    }

    pub fn reload_prompts(&mut self) -> String {
        self.prompts = PromptConfig::load(Some(self.backend.name()));
        format!("[copilot] Prompts reloaded from {}.", self.prompts.source)
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Run a raw backend command without touching session state (used by
    /// `/colors` and similar maintenance commands).
    pub async fn backend_command(&mut self, cmd: &str) -> String {
        self.backend.run_command(cmd, None).await
    }

    /// `/exec`: run a command directly, recording it as an attempt.
    pub async fn exec_direct(&mut self, cmd: &str) -> String {
        let out = self.backend.run_command(cmd, None).await;
        self.state.last_output = out.clone();
        self.state.attempts.push(Attempt::new(cmd, &out));
        out
    }

    /// `/new`: rotate the id and drop history, keeping configuration.
    pub fn new_session(&mut self) -> String {
        self.state.rotate_id();
        self.state.clear_history();
        self.state.session_id.clone()
    }

    pub async fn close(&mut self) {
        self.backend.close().await;
    }

    fn selected_provider(&self) -> Option<String> {
        self.state
            .selected_provider
            .clone()
            .or_else(|| self.state.config.get("llm_provider").map(str::to_string))
    }

    fn provider_error(&self, detail: &str) -> String {
        let msg = format!("[copilot] LLM provider error: {detail}");
        color_text(&msg, Color::Red, false, self.state.colors_enabled)
    }

    /// One user turn; returns the user-visible reply (possibly empty when
    /// everything already streamed through sinks).
    #[async_recursion]
    pub async fn ask(&mut self, question: &str) -> String {
        let text = question.trim().to_string();

        // ── Step 1: pending confirmation ─────────────────────────────────────
        if let Some(pending) = self.state.pending_command.take() {
            let choice = text.to_lowercase();
            if matches!(choice.as_str(), "y" | "yes") {
                return self.execute_with_followup(&pending).await;
            }
            if matches!(choice.as_str(), "a" | "auto" | "auto yes" | "auto-yes") {
                self.state.auto_accept_commands = true;
                self.state.auto_rounds_remaining =
                    Some(resolve_auto_round_limit(&self.state.config));
                let out = self.execute_with_followup(&pending).await;
                return if out.is_empty() {
                    "Auto-accept enabled for this session.".to_string()
                } else {
                    format!("Auto-accept enabled for this session.\n{out}")
                };
            }
            return "Command skipped.".to_string();
        }

        if text.is_empty() {
            return String::new();
        }

        // ── Step 3: overflow guard ───────────────────────────────────────────
        // Cheap character pre-check over the joined chatlog plus the incoming
        // user line; the context block itself is intentionally not counted.
        let user_line_len = "User: ".chars().count() + text.chars().count();
        let joined_len: usize = self
            .state
            .chatlog
            .iter()
            .map(|l| l.chars().count())
            .sum::<usize>()
            + self.state.chatlog.len()
            + user_line_len;
        if joined_len > self.prompts.max_context_chars {
            let choice = text.to_lowercase();
            if matches!(
                choice.as_str(),
                "summarize and new session" | "summarise and new session"
            ) {
                let summary = self.llm_summarize().await;
                self.state.rotate_id();
                self.state.clear_history();
                if let Some(first) = summary.lines().next() {
                    if !first.trim().is_empty() {
                        self.state
                            .facts
                            .push(format!("Summary: {}", truncate_chars(first, 160)));
                    }
                }
                return format!(
                    "[copilot] Started a new session: {}\n\
                     Here is a brief summary of the previous session for reference:\n{summary}",
                    self.state.session_id
                );
            }
            if matches!(choice.as_str(), "new session" | "start new session" | "new") {
                self.state.rotate_id();
                self.state.clear_history();
                return format!(
                    "[copilot] Started a fresh session: {}",
                    self.state.session_id
                );
            }
            // Do not append to the chatlog here; that would grow the context
            // further on every retry.
            return "[copilot] Your session context is quite large. Would you like me to \
                    summarize the current session and start a new one from that summary, or \
                    start a fresh session without a summary? Reply with 'summarize and new \
                    session' or 'new session'."
                .to_string();
        }

        // ── Step 2: prompt assembly ──────────────────────────────────────────
        let dbg = self.backend.name();
        let rules = self
            .prompts
            .rules
            .iter()
            .map(|r| format!("- {r}"))
            .collect::<Vec<_>>()
            .join("\n");
        let mut preamble = self.prompts.system_preamble.replace("{debugger}", dbg);
        preamble.push_str(&self.prompts.assistant_cmd_tag_instructions);
        if !rules.is_empty() {
            preamble.push_str(&format!("Rules:\n{rules}\n"));
        }

        let attempts_txt = self
            .state
            .attempts
            .iter()
            .rev()
            .take(5)
            .rev()
            .filter(|a| !a.output_snippet.is_empty())
            .map(|a| format!("- {}: {}", a.cmd, a.output_snippet))
            .collect::<Vec<_>>()
            .join("\n");
        let last_out = head_tail_truncate(&self.state.last_output, 2000);
        let goal = self.state.goal.trim();

        let mut context_block = String::new();
        if !goal.is_empty() {
            context_block.push_str(&format!("Goal: {goal}\n"));
        }
        if !attempts_txt.is_empty() {
            context_block.push_str(&format!("Recent commands and snippets:\n{attempts_txt}\n"));
        }
        if !last_out.is_empty() {
            context_block.push_str(&format!("Last output:\n{last_out}\n"));
        }
        if !self.state.chatlog.is_empty() {
            context_block.push_str(&format!(
                "\nFull conversation so far:\n{}\n",
                self.state.chatlog.join("\n")
            ));
        }

        let lang_hint = if wants_chinese(&text) {
            self.prompts.language_hint_zh.clone()
        } else {
            String::new()
        };

        let mut primed = preamble;
        if !context_block.is_empty() {
            primed.push('\n');
            primed.push_str(&context_block);
        }
        if !lang_hint.is_empty() {
            primed.push('\n');
            primed.push_str(&lang_hint);
        }
        primed.push_str("\nUser: ");
        primed.push_str(&text);
        primed.push_str("\nAssistant:");

        // ── Step 4: provider dispatch ────────────────────────────────────────
        let Some(pname) = self.selected_provider() else {
            return "[copilot] (placeholder) I'm ready to help. Ask anything about your debug session."
                .to_string();
        };
        let mut client = match self.registry.create_client(&pname, &self.state.config) {
            Ok(c) => c,
            Err(e) => return self.provider_error(&e.to_string()),
        };
        debug!(provider = %pname, prompt_chars = primed.chars().count(), "dispatching turn");
        let answer = match client.ask(&primed).await {
            Ok(a) => a,
            Err(e) => {
                warn!(provider = %pname, error = %e, "provider call failed");
                return self.provider_error(&e.to_string());
            }
        };

        let answer = answer.trim().to_string();
        self.state.chatlog.push(format!("User: {text}"));
        self.state.chatlog.push(format!("Assistant: {answer}"));
        self.state.facts.push(format!("Q: {text}"));
        self.state.facts.push(format!(
            "A: {}",
            answer.lines().next().unwrap_or("").trim()
        ));

        // ── Step 5: command extraction ───────────────────────────────────────
        let Some(cmd) = extract_cmd(&answer) else {
            self.state.last_answer_streamed = false;
            return color_text(&answer, Color::Green, false, self.state.colors_enabled);
        };

        // ── Step 6: execution / confirmation ─────────────────────────────────
        let explanation = remove_cmd_tag(&answer).trim().to_string();
        if self.state.auto_accept_commands {
            self.state.last_answer_streamed = if explanation.is_empty() {
                false
            } else {
                self.state.push_chat(&explanation)
            };
            // This execution consumes one auto round; at zero the mode
            // disables itself and the next proposal goes back to manual
            // confirmation.
            let limit = resolve_auto_round_limit(&self.state.config);
            let remaining = self.state.auto_rounds_remaining.unwrap_or(limit);
            let next = remaining.saturating_sub(1);
            self.state.auto_rounds_remaining = Some(next);
            if next == 0 {
                self.state.auto_accept_commands = false;
            }
            return self.execute_with_followup(&cmd).await;
        }

        self.state.pending_command = Some(cmd.clone());
        let label = format!("{dbg}> {cmd}");
        let mut event = json!({
            "type": "command_proposal",
            "command": cmd,
            "label": label,
        });
        if !explanation.is_empty() {
            event["explanation"] = json!(explanation);
        }
        self.state.push_chat_event(event);

        let mut msg = String::new();
        if !explanation.is_empty() {
            msg.push_str(&explanation);
            msg.push('\n');
        }
        msg.push_str(&color_text(
            &label,
            Color::Cyan,
            true,
            self.state.colors_enabled,
        ));
        msg.push_str("\nRun it? (y(es)/n(o)/a(uto yes))");
        msg
    }

    // ── Step 7: execution ─────────────────────────────────────────────────────

    /// Execute one command and feed its output back as a followup turn.
    ///
    /// Visible segments (execution output when no sink streamed it, plus the
    /// followup reply) are concatenated for the caller.
    async fn execute_with_followup(&mut self, cmd: &str) -> String {
        let (display, streamed, plain) = self.execute_once(cmd).await;

        let body = if plain.trim().is_empty() {
            "(no output)".to_string()
        } else {
            plain.trim().to_string()
        };
        let followup = format!(
            "The debugger command `{cmd}` was executed.\nDebugger output:\n{body}\n\
             What should we do next? Remember to wrap any future debugger commands inside <cmd>...</cmd>."
        );
        let follow = self.ask(&followup).await;

        let mut segments: Vec<String> = Vec::new();
        if !streamed && !display.is_empty() {
            segments.push(display);
        }
        if !follow.is_empty() {
            segments.push(follow);
        }
        segments.join("\n")
    }

    /// Run the command and record it: `last_output`, attempts, chatlog,
    /// first-line fact, sink-or-buffer delivery.
    async fn execute_once(&mut self, cmd: &str) -> (String, bool, String) {
        let raw = self.backend.run_command(cmd, None).await;
        let label = format!("{}> {cmd}", self.backend.name());
        let echo = color_text(&label, Color::Cyan, true, self.state.colors_enabled);
        let full = if raw.is_empty() {
            echo
        } else {
            format!("{echo}\n{raw}")
        };

        self.state.last_output = full.clone();
        self.state.attempts.push(Attempt::new(cmd, &full));
        self.state
            .chatlog
            .push(format!("Assistant: (executed) {cmd}\n{full}"));
        if let Some(first) = full.lines().next() {
            self.state.facts.push(format!("O: {first}"));
        }
        let streamed = self.state.push_debugger_output(&full);
        let plain = strip_ansi(&full);
        (full, streamed, plain)
    }

    // ── Summaries ─────────────────────────────────────────────────────────────

    /// Deterministic short rendering of the session (pure in the state).
    pub fn summary(&self) -> String {
        let dbg = self.backend.name();
        let provider = self.selected_provider().unwrap_or_else(|| "(none)".into());
        let goal = self.state.goal.trim();

        let attempts_txt = self
            .state
            .attempts
            .iter()
            .rev()
            .take(5)
            .rev()
            .filter(|a| !a.cmd.is_empty())
            .map(|a| format!("  - {}: {}", a.cmd, truncate_chars(&a.output_snippet, 120)))
            .collect::<Vec<_>>()
            .join("\n");

        let qa_tail = self
            .state
            .facts
            .iter()
            .filter(|l| l.starts_with("Q:") || l.starts_with("A:"))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .take(6)
            .rev()
            .map(|l| format!("  {l}"))
            .collect::<Vec<_>>()
            .join("\n");

        let last_out = head_tail_truncate(&self.state.last_output, 400);

        let mut parts = vec![
            format!("[copilot] Session {}", self.state.session_id),
            format!("Debugger: {dbg}"),
            format!("Provider: {provider}"),
        ];
        if !goal.is_empty() {
            parts.push(format!("Goal: {goal}"));
        }
        if !attempts_txt.is_empty() {
            parts.push("Recent commands:".to_string());
            parts.push(attempts_txt);
        }
        if !last_out.is_empty() {
            parts.push("Last output:".to_string());
            parts.push(format!("  {}", last_out.replace('\n', "\n  ")));
        }
        if !qa_tail.is_empty() {
            parts.push("Recent chat:".to_string());
            parts.push(qa_tail);
        }
        parts.join("\n")
    }

    /// Ask the provider for a 5–8 bullet summary over trimmed context;
    /// falls back to the local summary on any failure.
    async fn llm_summarize(&mut self) -> String {
        let goal = self.state.goal.trim();
        let attempts_txt = self
            .state
            .attempts
            .iter()
            .rev()
            .take(5)
            .rev()
            .filter(|a| !a.output_snippet.is_empty())
            .map(|a| format!("- {}: {}", a.cmd, a.output_snippet))
            .collect::<Vec<_>>()
            .join("\n");
        let last_out = head_tail_truncate(&self.state.last_output, 1200);
        let chat_tail = self
            .state
            .chatlog
            .iter()
            .rev()
            .take(40)
            .rev()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");

        let mut prompt = String::from(
            "You are a helpful debugging assistant. Produce a concise summary of the session below.\n\
             Keep it to 5-8 bullet points, plus one short suggested next step if relevant.\n\
             Do NOT include any preamble or extra text; output only the summary text.\n\n",
        );
        if !goal.is_empty() {
            prompt.push_str(&format!("Goal: {goal}\n"));
        }
        if !attempts_txt.is_empty() {
            prompt.push_str(&format!("Recent commands and snippets:\n{attempts_txt}\n"));
        }
        if !last_out.is_empty() {
            prompt.push_str(&format!("Last output (truncated):\n{last_out}\n"));
        }
        if !chat_tail.is_empty() {
            prompt.push_str(&format!("Recent chat (tail):\n{chat_tail}\n"));
        }
        prompt.push_str("\nSummary:");

        if let Some(pname) = self.selected_provider() {
            if let Ok(mut client) = self.registry.create_client(&pname, &self.state.config) {
                if let Ok(answer) = client.ask(&prompt).await {
                    let trimmed = answer.trim();
                    if !trimmed.is_empty() {
                        return trimmed.to_string();
                    }
                }
            }
        }
        self.summary()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    // ── Fixtures ──────────────────────────────────────────────────────────────

    /// Backend returning canned output for every command.
    struct ScriptedBackend {
        executed: Vec<String>,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self { executed: Vec::new() }
        }
    }

    #[async_trait]
    impl DebuggerBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "gdb"
        }
        fn prompt(&self) -> String {
            "(gdb) ".to_string()
        }
        async fn initialize(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn run_command(&mut self, cmd: &str, _timeout: Option<Duration>) -> String {
            self.executed.push(cmd.to_string());
            format!("output of {cmd}")
        }
        async fn close(&mut self) {}
    }

    fn scripted_registry(replies: &[&str]) -> (tempfile::TempDir, Arc<ProviderRegistry>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llm_providers.json");
        let file = json!({
            "providers": {
                "scripted": { "kind": "mock", "replies": replies }
            }
        });
        std::fs::write(&path, serde_json::to_string_pretty(&file).unwrap()).unwrap();
        (dir, Arc::new(ProviderRegistry::with_path(path).unwrap()))
    }

    fn orchestrator(replies: &[&str]) -> (tempfile::TempDir, Orchestrator) {
        let (dir, registry) = scripted_registry(replies);
        let mut state = SessionState::new();
        state.selected_provider = Some("scripted".into());
        state.colors_enabled = false;
        let orch = Orchestrator::with_prompts(
            Box::new(ScriptedBackend::new()),
            state,
            registry,
            PromptConfig::default(),
        );
        (dir, orch)
    }

    // ── extract_cmd ───────────────────────────────────────────────────────────

    #[test]
    fn extract_takes_first_match_only() {
        let text = "first <cmd>bt</cmd> then <cmd>run</cmd>";
        assert_eq!(extract_cmd(text), Some("bt".into()));
    }

    #[test]
    fn extract_is_case_insensitive_and_trims() {
        assert_eq!(extract_cmd("<CMD>  info locals \n</CMD>"), Some("info locals".into()));
    }

    #[test]
    fn extract_handles_multiline_bodies() {
        assert_eq!(extract_cmd("<cmd>\nbt full\n</cmd>"), Some("bt full".into()));
    }

    #[test]
    fn extract_without_tag_is_none() {
        assert_eq!(extract_cmd("just an answer"), None);
        assert_eq!(extract_cmd("<cmd>  </cmd>"), None);
    }

    #[test]
    fn remove_cmd_tag_strips_only_first_region() {
        assert_eq!(remove_cmd_tag("a <cmd>bt</cmd> b"), "a  b");
        assert_eq!(remove_cmd_tag("no tags"), "no tags");
    }

    // ── Basic turns ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let (_d, mut orch) = orchestrator(&[]);
        assert_eq!(orch.ask("").await, "");
        assert!(orch.state.chatlog.is_empty());
        assert!(orch.state.facts.is_empty());
    }

    #[tokio::test]
    async fn plain_reply_is_recorded_and_returned() {
        let (_d, mut orch) = orchestrator(&["The crash is a null dereference."]);
        let reply = orch.ask("why did it crash?").await;
        assert_eq!(reply, "The crash is a null dereference.");
        assert_eq!(orch.state.chatlog.len(), 2);
        assert_eq!(orch.state.chatlog[0], "User: why did it crash?");
        assert!(orch.state.chatlog[1].starts_with("Assistant: The crash"));
        assert_eq!(orch.state.facts.len(), 2);
        assert!(orch.state.facts[0].starts_with("Q: "));
        assert!(orch.state.facts[1].starts_with("A: "));
    }

    #[tokio::test]
    async fn missing_provider_surfaces_structured_error() {
        let (_d, mut orch) = orchestrator(&[]);
        orch.state.selected_provider = Some("ghost".into());
        let reply = orch.ask("hello").await;
        assert!(reply.contains("LLM provider error"), "got: {reply}");
        assert!(reply.contains("ghost"), "got: {reply}");
        assert!(orch.state.chatlog.is_empty(), "failed turns must not log");
    }

    // ── Scenario: crash walk with auto-approve ────────────────────────────────

    #[tokio::test]
    async fn auto_mode_executes_and_runs_followup_turn() {
        let (_d, mut orch) = orchestrator(&[
            "Let's inspect the stack. <cmd>bt</cmd>",
            "The backtrace shows a crash in main.",
        ]);
        orch.state.auto_accept_commands = true;
        orch.state.auto_rounds_remaining = Some(64);

        let reply = orch.ask("find the crash").await;

        // Execution output plus the followup reply are both visible.
        assert!(reply.contains("gdb> bt"), "got: {reply}");
        assert!(reply.contains("output of bt"), "got: {reply}");
        assert!(reply.contains("backtrace shows a crash"), "got: {reply}");

        // Budget consumed once.
        assert_eq!(orch.state.auto_rounds_remaining, Some(63));
        assert!(orch.state.auto_accept_commands);

        // Attempts and chatlog bookkeeping.
        assert_eq!(orch.state.attempts.len(), 1);
        assert_eq!(orch.state.attempts[0].cmd, "bt");
        assert!(orch
            .state
            .chatlog
            .iter()
            .any(|l| l.starts_with("Assistant: (executed) bt\n")));
        // Followup turn appended its own user/assistant pair.
        assert!(orch
            .state
            .chatlog
            .iter()
            .any(|l| l.contains("was executed")));
    }

    #[tokio::test]
    async fn auto_budget_of_one_disables_after_single_execution() {
        let (_d, mut orch) = orchestrator(&["<cmd>bt</cmd>", "done here"]);
        orch.state.auto_accept_commands = true;
        orch.state.auto_rounds_remaining = Some(1);
        let _ = orch.ask("go").await;
        assert!(!orch.state.auto_accept_commands);
        assert_eq!(orch.state.auto_rounds_remaining, Some(0));
        assert_eq!(orch.state.attempts.len(), 1);
    }

    // ── Scenario: manual confirmation ─────────────────────────────────────────

    #[tokio::test]
    async fn manual_mode_stashes_and_asks_for_confirmation() {
        let (_d, mut orch) = orchestrator(&["Try running it. <cmd>run</cmd>"]);
        let reply = orch.ask("start").await;
        assert!(reply.contains("Run it? (y(es)/n(o)/a(uto yes))"), "got: {reply}");
        assert!(reply.contains("gdb> run"), "got: {reply}");
        assert_eq!(orch.state.pending_command.as_deref(), Some("run"));

        // A structured proposal event is queued for front-ends.
        let events = orch.state.take_pending_chat_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "command_proposal");
        assert_eq!(events[0]["command"], "run");
        assert_eq!(events[0]["label"], "gdb> run");
        assert_eq!(events[0]["explanation"], "Try running it.");
    }

    #[tokio::test]
    async fn declining_clears_pending_without_executing() {
        let (_d, mut orch) = orchestrator(&["<cmd>run</cmd>"]);
        let _ = orch.ask("start").await;
        let attempts_before = orch.state.attempts.len();
        let reply = orch.ask("n").await;
        assert_eq!(reply, "Command skipped.");
        assert!(orch.state.pending_command.is_none());
        assert_eq!(orch.state.attempts.len(), attempts_before);
    }

    // ── Scenario: auto-approve promotion ──────────────────────────────────────

    #[tokio::test]
    async fn promotion_enables_auto_and_executes_pending() {
        let (_d, mut orch) = orchestrator(&["<cmd>info threads</cmd>", "All threads idle."]);
        let _ = orch.ask("threads?").await;
        assert!(orch.state.pending_command.is_some());

        let reply = orch.ask("a").await;
        assert!(
            reply.starts_with("Auto-accept enabled for this session."),
            "got: {reply}"
        );
        assert!(orch.state.auto_accept_commands);
        // The promoted execution itself does not consume a round.
        assert_eq!(orch.state.auto_rounds_remaining, Some(64));
        assert_eq!(orch.state.attempts.len(), 1);
        assert_eq!(orch.state.attempts[0].cmd, "info threads");
        assert!(orch.state.pending_command.is_none());
    }

    // ── Scenario: context overflow ────────────────────────────────────────────

    fn overflow_orchestrator(replies: &[&str]) -> (tempfile::TempDir, Orchestrator) {
        let (dir, mut orch) = orchestrator(replies);
        orch.prompts.max_context_chars = 50;
        orch.state.chatlog.push("User: ".to_string() + &"x".repeat(100));
        (dir, orch)
    }

    #[tokio::test]
    async fn overflow_prompts_for_a_choice() {
        let (_d, mut orch) = overflow_orchestrator(&[]);
        let before = orch.state.chatlog.len();
        let reply = orch.ask("what next?").await;
        assert!(reply.contains("summarize and new session"), "got: {reply}");
        assert_eq!(orch.state.chatlog.len(), before, "overflow must not grow the log");
    }

    #[tokio::test]
    async fn overflow_summarize_rotates_and_seeds_summary_fact() {
        let (_d, mut orch) = overflow_orchestrator(&["- found a crash in main\n- next: check locals"]);
        let old_id = orch.state.session_id.clone();
        let reply = orch.ask("summarize and new session").await;

        assert_ne!(orch.state.session_id, old_id, "id must rotate");
        assert!(orch.state.chatlog.is_empty());
        assert!(orch.state.attempts.is_empty());
        assert!(orch.state.last_output.is_empty());
        assert_eq!(orch.state.facts.len(), 1);
        assert!(orch.state.facts[0].starts_with("Summary: - found a crash"));
        assert!(reply.contains(&orch.state.session_id));
        assert!(reply.contains("found a crash in main"));
    }

    #[tokio::test]
    async fn overflow_new_session_clears_without_summary() {
        let (_d, mut orch) = overflow_orchestrator(&[]);
        let old_id = orch.state.session_id.clone();
        let reply = orch.ask("new session").await;
        assert_ne!(orch.state.session_id, old_id);
        assert!(orch.state.facts.is_empty());
        assert!(reply.contains("Started a fresh session"));
    }

    // ── Sinks ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn execution_output_buffers_without_sink() {
        let (_d, mut orch) = orchestrator(&["<cmd>bt</cmd>", "ok"]);
        orch.state.auto_accept_commands = true;
        orch.state.auto_rounds_remaining = Some(4);
        let _ = orch.ask("go").await;
        let pending = orch.state.take_pending_outputs();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].contains("output of bt"));
    }

    // ── Summary ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn summary_is_pure_in_the_state() {
        let (_d, mut orch) = orchestrator(&[]);
        orch.state.goal = "find the crash".into();
        orch.state.attempts.push(Attempt::new("bt", "#0 main"));
        orch.state.facts.push("Q: why?".into());
        orch.state.facts.push("A: because".into());
        orch.state.last_output = "#0 main".into();
        let a = orch.summary();
        let b = orch.summary();
        assert_eq!(a, b);
        assert!(a.contains("Debugger: gdb"));
        assert!(a.contains("Provider: scripted"));
        assert!(a.contains("Goal: find the crash"));
        assert!(a.contains("  - bt: #0 main"));
        assert!(a.contains("  Q: why?"));
    }

    // ── Direct execution ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn exec_direct_records_attempt_and_last_output() {
        let (_d, mut orch) = orchestrator(&[]);
        let out = orch.exec_direct("info registers").await;
        assert_eq!(out, "output of info registers");
        assert_eq!(orch.state.last_output, "output of info registers");
        assert_eq!(orch.state.attempts.len(), 1);
        assert_eq!(orch.state.attempts[0].cmd, "info registers");
        assert!(orch.state.chatlog.is_empty(), "exec_direct is not a chat turn");
    }

    #[tokio::test]
    async fn new_session_rotates_and_clears_but_keeps_provider() {
        let (_d, mut orch) = orchestrator(&[]);
        orch.state.chatlog.push("User: hi".into());
        let old_id = orch.state.session_id.clone();
        let new_id = orch.new_session();
        assert_ne!(new_id, old_id);
        assert!(orch.state.chatlog.is_empty());
        assert_eq!(orch.state.selected_provider.as_deref(), Some("scripted"));
    }
}
