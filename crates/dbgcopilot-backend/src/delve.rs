// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Delve backend: `dlv exec <binary>` driven over a pseudo-terminal.
//!
//! Delve needs the target binary up-front so it can attach immediately; the
//! startup banner is kept for the session's first message.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::warn;

use crate::pty::{PtyError, PtySession};
use crate::util::{split_commands, strip_echo};
use crate::DebuggerBackend;

const EXIT_COMMANDS: &[&str] = &["quit", "exit", "q"];

pub struct DelveBackend {
    delve_path: String,
    program: String,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    session: Option<PtySession>,
    prompt_re: Regex,
    startup: String,
}

impl DelveBackend {
    pub fn new(program: String, working_dir: Option<PathBuf>) -> Self {
        Self {
            delve_path: "dlv".to_string(),
            program,
            working_dir,
            timeout: Duration::from_secs(15),
            session: None,
            prompt_re: Regex::new(r"\(dlv\)\s").expect("static regex"),
            startup: String::new(),
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

    async fn handle_exit(&mut self, cmd: &str) -> String {
        if let Some(mut session) = self.session.take() {
            let _ = session.send_line(cmd);
            session.expect_eof(Duration::from_secs(3)).await;
            session.close();
        }
        match self.initialize().await {
            Ok(()) => "[delve] session restarted; ready for commands".to_string(),
            Err(e) => {
                warn!(error = %e, "delve restart after exit failed");
                format!("[delve closed] {cmd}: {e}")
            }
        }
    }
}

#[async_trait]
impl DebuggerBackend for DelveBackend {
    fn name(&self) -> &'static str {
        "delve"
    }

    fn prompt(&self) -> String {
        "(dlv) ".to_string()
    }

    fn startup_output(&self) -> Option<String> {
        if self.startup.is_empty() {
            None
        } else {
            Some(self.startup.clone())
        }
    }

    async fn initialize(&mut self) -> anyhow::Result<()> {
        let argv = vec![
            self.delve_path.clone(),
            "exec".to_string(),
            self.program.clone(),
        ];
        let mut session = PtySession::spawn(
            &argv,
            self.working_dir.as_deref(),
            &[],
            self.timeout,
        )?;
        let banner = session
            .expect_prompt(&self.prompt_re, None)
            .await
            .map_err(|e| anyhow::anyhow!("waiting for (dlv) prompt: {e}"))?;
        self.startup = banner.replace("\r\n", "\n").trim().to_string();
        self.session = Some(session);
        Ok(())
    }

    async fn run_command(&mut self, cmd: &str, timeout: Option<Duration>) -> String {
        let text = cmd.trim();
        if text.is_empty() {
            return String::new();
        }
        if self.session.is_none() {
            return "[delve closed] session is not running".to_string();
        }
        let mut outputs: Vec<String> = Vec::new();
        for part in split_commands(text) {
            if EXIT_COMMANDS.contains(&part.to_lowercase().as_str()) {
                outputs.push(self.handle_exit(&part).await);
                break;
            }
            match self.send_and_capture(&part, timeout).await {
                Ok(out) => outputs.push(out),
                Err(e @ PtyError::Timeout(_)) => {
                    outputs.push(format!("[delve timeout] {part}: {e}"));
                }
                Err(e @ PtyError::Eof) => {
                    outputs.push(format!("[delve eof] {part}: {e}"));
                    break;
                }
                Err(e) => outputs.push(format!("[delve error] {part}: {e}")),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_matches_dlv() {
        let b = DelveBackend::new("./prog".into(), None);
        assert!(b.prompt_re.is_match("Type 'help' for list of commands.\n(dlv) "));
        assert_eq!(b.prompt(), "(dlv) ");
    }

    #[test]
    fn startup_output_is_none_until_initialized() {
        let b = DelveBackend::new("./prog".into(), None);
        assert!(b.startup_output().is_none());
    }

    #[tokio::test]
    async fn uninitialized_backend_reports_closed() {
        let mut b = DelveBackend::new("./prog".into(), None);
        let out = b.run_command("bt", None).await;
        assert!(out.contains("[delve closed]"), "got: {out}");
    }
}
