// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! GDB backend driven over a pseudo-terminal.
//!
//! Spawns `gdb -q`, frames on the `(gdb) ` prompt, and configures the
//! session for non-interactive use (no pagination, no confirmations, no
//! debuginfod prompts).  After state-changing commands the backend appends
//! `info program` and `bt 5` so the model always sees where the inferior
//! stopped.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::pty::{PtyError, PtySession};
use crate::util::{split_commands, strip_echo};
use crate::DebuggerBackend;

const EXIT_COMMANDS: &[&str] = &["quit", "exit", "q"];

/// Commands that move the inferior and deserve a context refresh.
const STATE_CHANGING: &[&str] = &[
    "run", "continue", "next", "step", "finish", "start", "r", "c", "n", "s",
];

const INIT_COMMANDS: &[&str] = &[
    "set pagination off",
    "set height 0",
    "set width 0",
    "set confirm off",
    // Older GDBs reject this; failures are ignored.
    "set debuginfod enabled off",
];

pub struct GdbBackend {
    label: &'static str,
    gdb_path: String,
    timeout: Duration,
    session: Option<PtySession>,
    prompt_re: Regex,
}

impl GdbBackend {
    pub fn new() -> Self {
        Self::with_path("gdb", "gdb")
    }

    /// `rust-gdb` wrapper when available, plain gdb otherwise.
    pub fn rust() -> Self {
        let path = which::which("rust-gdb")
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "gdb".to_string());
        Self::with_path("rust-gdb", &path)
    }

    fn with_path(label: &'static str, gdb_path: &str) -> Self {
        Self {
            label,
            gdb_path: gdb_path.to_string(),
            timeout: Duration::from_secs(10),
            session: None,
            prompt_re: Regex::new(r"\(gdb\)\s").expect("static regex"),
        }
    }

    async fn send_and_capture(&mut self, cmd: &str, timeout: Option<Duration>) -> Result<String, PtyError> {
        let Self { session, prompt_re, .. } = self;
        let Some(session) = session.as_mut() else {
            return Err(PtyError::Eof);
        };
        session.send_line(cmd)?;
        let out = session.expect_prompt(prompt_re, timeout).await?;
        Ok(strip_echo(&out, cmd))
    }

    /// Run the exit command, wait briefly for EOF, then restart the session
    /// so an accidental `quit` does not end the investigation.
    async fn handle_exit(&mut self, cmd: &str) -> String {
        if let Some(mut session) = self.session.take() {
            let _ = session.send_line(cmd);
            session.expect_eof(self.timeout.min(Duration::from_secs(3))).await;
            session.close();
        }
        match self.initialize().await {
            Ok(()) => format!("[{}] session restarted; ready for commands", self.label),
            Err(e) => {
                warn!(backend = self.label, error = %e, "restart after exit failed");
                format!("[{} closed] {cmd}: {e}", self.label)
            }
        }
    }

    fn is_state_changing(cmd: &str) -> bool {
        let head = cmd.split_whitespace().next().unwrap_or("");
        STATE_CHANGING.contains(&head)
    }
}

impl Default for GdbBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DebuggerBackend for GdbBackend {
    fn name(&self) -> &'static str {
        self.label
    }

    fn prompt(&self) -> String {
        "(gdb) ".to_string()
    }

    async fn initialize(&mut self) -> anyhow::Result<()> {
        let argv = vec![self.gdb_path.clone(), "-q".to_string()];
        let mut session = PtySession::spawn(&argv, None, &[], self.timeout)?;
        // Consume the banner up to the first prompt.
        session
            .expect_prompt(&self.prompt_re, None)
            .await
            .map_err(|e| anyhow::anyhow!("waiting for first (gdb) prompt: {e}"))?;
        self.session = Some(session);
        for cmd in INIT_COMMANDS {
            if let Err(e) = self.send_and_capture(cmd, None).await {
                debug!(backend = self.label, cmd, error = %e, "init command ignored");
            }
        }
        Ok(())
    }

    async fn run_command(&mut self, cmd: &str, timeout: Option<Duration>) -> String {
        let text = cmd.trim();
        if text.is_empty() {
            return String::new();
        }
        if self.session.is_none() {
            return format!("[{} closed] session is not running", self.label);
        }

        let mut outputs: Vec<String> = Vec::new();
        for part in split_commands(text) {
            if EXIT_COMMANDS.contains(&part.to_lowercase().as_str()) {
                outputs.push(self.handle_exit(&part).await);
                break;
            }
            match self.send_and_capture(&part, timeout).await {
                Ok(out) => {
                    let mut out = out;
                    if Self::is_state_changing(&part) {
                        for extra in ["info program", "bt 5"] {
                            if let Ok(more) = self.send_and_capture(extra, timeout).await {
                                if !more.trim().is_empty() {
                                    out.push_str(&format!("\n{more}"));
                                }
                            }
                        }
                    }
                    outputs.push(out);
                }
                Err(e @ PtyError::Timeout(_)) => {
                    outputs.push(format!("[{} timeout] {part}: {e}", self.label));
                }
                Err(e @ PtyError::Eof) => {
                    outputs.push(format!("[{} eof] {part}: {e}", self.label));
                    break;
                }
                Err(e) => {
                    outputs.push(format!("[{} error] {part}: {e}", self.label));
                }
            }
        }
        outputs.retain(|o| !o.is_empty());
        outputs.join("\n")
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.send_line("quit");
            session.expect_eof(Duration::from_secs(1)).await;
            session.close();
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
