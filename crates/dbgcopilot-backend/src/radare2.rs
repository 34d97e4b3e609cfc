// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! radare2 backend speaking the r2pipe spawn protocol.
//!
//! `radare2 -q0 <file>` reads commands on stdin and terminates every reply
//! (including the startup one) with a NUL byte — no PTY and no prompt
//! regex.  stderr is pumped by a background reader into a bounded deque so
//! WARN/INFO diagnostics can be merged into the response they belong to.
//! The REPL prompt is derived from the current seek (`s`) as `[<addr>]> `.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, warn};

use crate::util::split_commands;
use crate::DebuggerBackend;

const EXIT_COMMANDS: &[&str] = &["quit", "q", "exit"];
const STDERR_CAP: usize = 256;

const INIT_COMMANDS: &[&str] = &[
    "e scr.echo=false",
    "e scr.interactive=false",
    "e scr.clippy=false",
    "e bin.cache=true",
];

pub struct Radare2Backend {
    r2_path: String,
    program: String,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    pending: Vec<u8>,
    stderr_lines: Arc<Mutex<VecDeque<String>>>,
    prompt: String,
    startup: String,
}

impl Radare2Backend {
    pub fn new(program: String, working_dir: Option<PathBuf>) -> Self {
        let r2_path = std::env::var("R2PIPE_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "radare2".to_string());
        Self {
            r2_path,
            program,
            working_dir,
            timeout: Duration::from_secs(20),
            child: None,
            stdin: None,
            stdout: None,
            pending: Vec::new(),
            stderr_lines: Arc::new(Mutex::new(VecDeque::new())),
            prompt: "[0x00000000]> ".to_string(),
            startup: String::new(),
        }
    }

    /// Read one NUL-terminated reply from the pipe.
    async fn read_reply(&mut self, timeout: Option<Duration>) -> anyhow::Result<String> {
        let limit = timeout.unwrap_or(self.timeout);
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if let Some(pos) = self.pending.iter().position(|b| *b == 0) {
                let reply: Vec<u8> = self.pending.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&reply[..reply.len() - 1]).into_owned();
                return Ok(text.trim_end_matches('\n').to_string());
            }
            let stdout = self.stdout.as_mut().context("radare2 pipe not open")?;
            let mut buf = [0u8; 8192];
            let read = tokio::time::timeout_at(deadline, stdout.read(&mut buf))
                .await
                .map_err(|_| anyhow::anyhow!("timeout after {:.1}s", limit.as_secs_f32()))?
                .context("reading from radare2")?;
            if read == 0 {
                bail!("radare2 process exited");
            }
            self.pending.extend_from_slice(&buf[..read]);
        }
    }

    /// Send one primitive command and collect its NUL-framed reply.
    async fn raw_command(&mut self, cmd: &str, timeout: Option<Duration>) -> anyhow::Result<String> {
        let stdin = self.stdin.as_mut().context("radare2 pipe not open")?;
        stdin
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .context("writing to radare2")?;
        stdin.flush().await.context("flushing radare2 stdin")?;
        self.read_reply(timeout).await
    }

    /// Drain accumulated stderr diagnostics (WARN/INFO lines only).
    fn drain_stderr(&self) -> Vec<String> {
        let mut guard = self.stderr_lines.lock().expect("stderr deque poisoned");
        guard
            .drain(..)
            .filter(|l| l.starts_with("WARN") || l.starts_with("INFO"))
            .collect()
    }

    /// Refresh the seek-derived prompt; keeps the previous one on failure.
    async fn refresh_prompt(&mut self) {
        if let Ok(addr) = self.raw_command("s", Some(Duration::from_secs(2))).await {
            let addr = addr.trim();
            if !addr.is_empty() {
                self.prompt = format!("[{addr}]> ");
            }
        }
    }

    async fn teardown(&mut self) {
        self.stdin.take();
        self.stdout.take();
        self.pending.clear();
        if let Some(mut child) = self.child.take() {
            let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
            let _ = child.kill().await;
        }
    }

    async fn handle_exit(&mut self, cmd: &str) -> String {
        if let Some(stdin) = self.stdin.as_mut() {
            let _ = stdin.write_all(b"q\n").await;
            let _ = stdin.flush().await;
        }
        self.teardown().await;
        match self.initialize().await {
            Ok(()) => "[radare2] session restarted; ready for commands".to_string(),
            Err(e) => {
                warn!(error = %e, "radare2 restart after exit failed");
                format!("[radare2 closed] {cmd}: {e}")
            }
        }
    }
}

#[async_trait]
impl DebuggerBackend for Radare2Backend {
    fn name(&self) -> &'static str {
        "radare2"
    }

    fn prompt(&self) -> String {
        self.prompt.clone()
    }

    fn startup_output(&self) -> Option<String> {
        if self.startup.is_empty() {
            None
        } else {
            Some(self.startup.clone())
        }
    }

    async fn initialize(&mut self) -> anyhow::Result<()> {
        let mut cmd = tokio::process::Command::new(&self.r2_path);
        cmd.arg("-q0")
            .arg(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        // Detach from the controlling terminal so radare2 cannot open
        // /dev/tty for interactive prompts.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.r2_path))?;

        let stdin = child.stdin.take().context("radare2 stdin unavailable")?;
        let stdout = child.stdout.take().context("radare2 stdout unavailable")?;
        let stderr = child.stderr.take().context("radare2 stderr unavailable")?;

        // Background stderr pump into the bounded deque.
        let sink = self.stderr_lines.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut guard = sink.lock().expect("stderr deque poisoned");
                if guard.len() >= STDERR_CAP {
                    guard.pop_front();
                }
                guard.push_back(line);
            }
        });

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout = Some(stdout);
        self.pending.clear();

        // `-q0` emits a NUL once the file is loaded; anything before it is
        // startup output.
        let banner = self
            .read_reply(None)
            .await
            .context("waiting for radare2 to become ready")?;
        self.startup = banner.trim().to_string();

        for init in INIT_COMMANDS {
            if let Err(e) = self.raw_command(init, None).await {
                debug!(cmd = init, error = %e, "radare2 init command ignored");
            }
        }
        self.refresh_prompt().await;
        Ok(())
    }

    async fn run_command(&mut self, cmd: &str, timeout: Option<Duration>) -> String {
        let text = cmd.trim();
        if text.is_empty() {
            return String::new();
        }
        if self.stdin.is_none() {
            return "[radare2 closed] session is not running".to_string();
        }

        // Diagnostics accumulated before this command belong to earlier
        // asynchronous work; drop them so they are not misattributed.
        let _ = self.drain_stderr();

        let mut outputs: Vec<String> = Vec::new();
        let mut restarted = false;
        for part in split_commands(text) {
            if EXIT_COMMANDS.contains(&part.to_lowercase().as_str()) {
                outputs.push(self.handle_exit(&part).await);
                break;
            }
            match self.raw_command(&part, timeout).await {
                Ok(mut out) => {
                    let diagnostics = self.drain_stderr();
                    if !diagnostics.is_empty() {
                        if !out.is_empty() {
                            out.push('\n');
                        }
                        out.push_str(&diagnostics.join("\n"));
                    }
                    if !out.is_empty() {
                        outputs.push(out);
                    }
                }
                Err(e) if e.to_string().starts_with("timeout") => {
                    outputs.push(format!("[radare2 timeout] {part}: {e}"));
                }
                Err(e) => {
                    // Child death mid-command: reinitialize once, then give up.
                    if restarted {
                        outputs.push(format!("[radare2 closed] {part}: {e}"));
                        break;
                    }
                    restarted = true;
                    self.teardown().await;
                    match self.initialize().await {
                        Ok(()) => {
                            outputs.push("[radare2] session restarted; ready for commands".to_string());
                        }
                        Err(re) => {
                            outputs.push(format!("[radare2 closed] {part}: {re}"));
                            break;
                        }
                    }
                }
            }
        }
        if self.stdin.is_some() {
            self.refresh_prompt().await;
        }
        outputs.join("\n")
    }

    async fn close(&mut self) {
        if let Some(stdin) = self.stdin.as_mut() {
            let _ = stdin.write_all(b"q\n").await;
            let _ = stdin.flush().await;
        }
        self.teardown().await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_is_seek_shaped() {
        let b = Radare2Backend::new("./bin".into(), None);
        assert_eq!(b.prompt(), "[0x00000000]> ");
    }

    #[test]
    fn stderr_filter_keeps_warn_and_info() {
        let b = Radare2Backend::new("./bin".into(), None);
        {
            let mut guard = b.stderr_lines.lock().unwrap();
            guard.push_back("WARN: relocs not loaded".to_string());
            guard.push_back("INFO: file opened".to_string());
            guard.push_back("noise line".to_string());
        }
        let kept = b.drain_stderr();
        assert_eq!(kept, vec!["WARN: relocs not loaded", "INFO: file opened"]);
        assert!(b.drain_stderr().is_empty(), "drain must empty the deque");
    }

    #[test]
    fn stderr_deque_is_bounded() {
        let b = Radare2Backend::new("./bin".into(), None);
        {
            let mut guard = b.stderr_lines.lock().unwrap();
            for i in 0..(STDERR_CAP + 10) {
                if guard.len() >= STDERR_CAP {
                    guard.pop_front();
                }
                guard.push_back(format!("WARN: {i}"));
            }
            assert_eq!(guard.len(), STDERR_CAP);
        }
    }

    #[tokio::test]
    async fn uninitialized_backend_reports_closed() {
        let mut b = Radare2Backend::new("./bin".into(), None);
        let out = b.run_command("aa", None).await;
        assert!(out.contains("[radare2 closed]"), "got: {out}");
    }

    #[test]
    fn startup_output_empty_before_init() {
        let b = Radare2Backend::new("./bin".into(), None);
        assert!(b.startup_output().is_none());
    }
}
