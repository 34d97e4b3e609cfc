// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Python debugging backend over the standard-library `pdb`.
//!
//! Runs `python -m pdb <script>` under a PTY.  `file <script>` selects the
//! target, `run` starts a fresh session, and the friendly aliases map onto
//! pdb's own vocabulary (`print x` → `p x`, `info locals` → `p locals()`).

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::pty::{PtyError, PtySession};
use crate::util::prompt_regex;
use crate::DebuggerBackend;

const PROMPT: &str = "(Pdb)";

pub struct PdbBackend {
    program: Option<String>,
    python_path: String,
    cwd: Option<PathBuf>,
    timeout: Duration,
    session: Option<PtySession>,
    prompt_re: Regex,
}

impl PdbBackend {
    pub fn new(program: Option<String>, cwd: Option<PathBuf>) -> Self {
        Self {
            program,
            python_path: "python3".to_string(),
            cwd,
            timeout: Duration::from_secs(10),
            session: None,
            prompt_re: prompt_regex(PROMPT),
        }
    }

    fn prefix(&self) -> &'static str {
        "[pdb]"
    }

    fn session_alive(&mut self) -> bool {
        self.session.as_mut().map(|s| s.is_alive()).unwrap_or(false)
    }

    fn resolve_program_path(&self, path: &str) -> String {
        let p = PathBuf::from(path);
        let p = if p.is_absolute() {
            p
        } else {
            let base = self
                .cwd
                .clone()
                .or_else(|| std::env::current_dir().ok())
                .unwrap_or_default();
            base.join(p)
        };
        p.canonicalize().unwrap_or(p).to_string_lossy().into_owned()
    }

    async fn send_and_capture(&mut self, command: &str, timeout: Option<Duration>) -> String {
        if !self.session_alive() {
            return format!("{} session ended", self.prefix());
        }
        let prompt_re = self.prompt_re.clone();
        let timeout_value = timeout.unwrap_or(self.timeout);
        let session = self.session.as_mut().expect("alive session");
        if let Err(e) = session.send_line(command) {
            return format!("{} failed to send command: {e}", self.prefix());
        }
        match session.expect_prompt(&prompt_re, Some(timeout_value)).await {
            Ok(out) => normalize_output(command, &out),
            Err(PtyError::Timeout(_)) => {
                let partial = normalize_output(command, &session.take_buffer());
                if partial.is_empty() {
                    format!("[pdb] timeout waiting for '{command}'")
                } else {
                    format!("{partial}\n[pdb] timeout waiting for prompt after '{command}'")
                }
            }
            Err(PtyError::Eof) => {
                let rest = normalize_output(command, &session.take_buffer());
                self.session = None;
                if rest.is_empty() {
                    "[pdb] process exited".to_string()
                } else {
                    rest
                }
            }
            Err(e) => format!("[pdb] error: {e}"),
        }
    }

    /// Relaunch `python -m pdb` on the configured script and prime a session.
    async fn handle_run(&mut self, timeout: Option<Duration>) -> String {
        let Some(program) = self.program.clone() else {
            return format!(
                "{} no script configured. Use 'file <script.py>' first.",
                self.prefix()
            );
        };
        if let Some(mut old) = self.session.take() {
            old.close();
        }

        let cwd = self.cwd.clone().or_else(|| {
            PathBuf::from(&program).parent().map(|p| p.to_path_buf())
        });
        let argv = vec![
            self.python_path.clone(),
            "-m".to_string(),
            "pdb".to_string(),
            program,
        ];
        let env = vec![("PYTHONUNBUFFERED".to_string(), "1".to_string())];
        let mut session = match PtySession::spawn(
            &argv,
            cwd.as_deref(),
            &env,
            timeout.unwrap_or(self.timeout),
        ) {
            Ok(s) => s,
            Err(e) => return format!("{} failed to launch script: {e}", self.prefix()),
        };

        let startup = match session.expect_prompt(&self.prompt_re, timeout).await {
            Ok(out) => normalize_output("", &out),
            Err(PtyError::Eof) => {
                let rest = normalize_output("", &session.take_buffer());
                return if rest.is_empty() {
                    format!("{} process exited before prompt", self.prefix())
                } else {
                    rest
                };
            }
            Err(PtyError::Timeout(_)) => {
                return format!("{} timeout waiting for pdb prompt", self.prefix());
            }
            Err(e) => return format!("{} failed waiting for pdb prompt: {e}", self.prefix()),
        };
        self.session = Some(session);

        let run_output = self.send_and_capture("run", timeout).await;
        [startup, run_output]
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn normalize_output(command: &str, captured: &str) -> String {
    let text = captured
        .replace("\r\n", "\n")
        .trim_start_matches(['\r', '\n'])
        .to_string();
    let text = if !command.is_empty() && text.starts_with(command) {
        text[command.len()..].trim_start().to_string()
    } else {
        text
    };
    text.trim().to_string()
}

#[async_trait]
impl DebuggerBackend for PdbBackend {
    fn name(&self) -> &'static str {
        "pdb"
    }

    fn prompt(&self) -> String {
        format!("{PROMPT} ")
    }

    async fn initialize(&mut self) -> anyhow::Result<()> {
        which::which(&self.python_path)
            .map_err(|_| anyhow::anyhow!("{} not found on PATH", self.python_path))?;
        Ok(())
    }

    async fn run_command(&mut self, cmd: &str, timeout: Option<Duration>) -> String {
        let command = cmd.trim();
        if command.is_empty() {
            return String::new();
        }
        let lower = command.to_lowercase();

        if let Some(path) = lower.strip_prefix("file ") {
            if path.trim().is_empty() {
                return format!("{} provide a script path", self.prefix());
            }
            let resolved = self.resolve_program_path(command[5..].trim());
            self.program = Some(resolved.clone());
            return format!("{} script set to {resolved}", self.prefix());
        }

        if lower == "run" || lower == "r" {
            return self.handle_run(timeout).await;
        }

        if lower == "quit" || lower == "q" {
            if let Some(mut session) = self.session.take() {
                session.close();
            }
            debug!("pdb session terminated by user");
            return format!("{} session terminated", self.prefix());
        }

        if !self.session_alive() {
            return format!("{} no active session. Use 'run' first.", self.prefix());
        }

        let mapped: String = match lower.as_str() {
            "continue" | "c" => "continue".to_string(),
            "next" | "n" => "next".to_string(),
            "step" | "s" | "stepin" => "step".to_string(),
            "where" | "bt" | "backtrace" => "where".to_string(),
            _ if lower.starts_with("print ") || lower.starts_with("p ") => {
                let expr = command.splitn(2, ' ').nth(1).unwrap_or("").trim();
                if expr.is_empty() {
                    return format!("{} provide an expression", self.prefix());
                }
                format!("p {expr}")
            }
            _ if lower.starts_with("info locals") => "p locals()".to_string(),
            _ => command.to_string(),
        };

        self.send_and_capture(&mapped, timeout).await
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
