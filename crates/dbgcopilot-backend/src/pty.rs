// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Pseudo-terminal driver shared by the line-oriented backends.
//!
//! Turns a free-running debugger subprocess into a request/response pair:
//! send a line, await the prompt regex, return everything captured before
//! the match.  A dedicated reader thread drains the PTY master into an
//! unbounded channel so expects can enforce deadlines without blocking the
//! runtime.  Bracketed-paste guard sequences (`ESC[?2004h/l`) are stripped
//! globally before text enters the match buffer.

use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, PtySize};
use regex::Regex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Transport failures surfaced to backends.
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("timeout after {:.1}s waiting for prompt", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("end of file from child process")]
    Eof,
    #[error("pty I/O error: {0}")]
    Io(String),
}

/// One interactive child attached to a pseudo-terminal.
pub struct PtySession {
    child: Box<dyn portable_pty::Child + Send + Sync>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    // Held so the PTY pair outlives the child; never read directly.
    _master: Box<dyn portable_pty::MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    buffer: String,
    default_timeout: Duration,
}

impl PtySession {
    /// Fork `argv` attached to a fresh PTY with UTF-8 I/O.
    ///
    /// Returns once the child is running; the first prompt is consumed by
    /// the backend's initialisation, not here.
    pub fn spawn(
        argv: &[String],
        cwd: Option<&Path>,
        env: &[(String, String)],
        default_timeout: Duration,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!argv.is_empty(), "empty argv");
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 40,
                cols: 200,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| anyhow::anyhow!("failed to allocate pty: {e}"))?;

        let mut cmd = CommandBuilder::new(&argv[0]);
        cmd.args(&argv[1..]);
        // A dumb terminal keeps debugger output free of cursor choreography;
        // color sequences that still appear are stripped by the backends.
        cmd.env("TERM", "dumb");
        for (k, v) in env {
            cmd.env(k, v);
        }
        if let Some(dir) = cwd {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| anyhow::anyhow!("failed to spawn {}: {e}", argv[0]))?;
        drop(pair.slave);

        let killer = child.clone_killer();
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| anyhow::anyhow!("failed to open pty writer: {e}"))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| anyhow::anyhow!("failed to open pty reader: {e}"))?;
        let rx = spawn_reader(reader);

        debug!(program = %argv[0], "pty session spawned");
        Ok(Self {
            child,
            killer,
            _master: pair.master,
            writer,
            rx,
            buffer: String::new(),
            default_timeout,
        })
    }

    /// Write one line to the child.
    pub fn send_line(&mut self, text: &str) -> Result<(), PtyError> {
        self.writer
            .write_all(text.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush())
            .map_err(|e| PtyError::Io(e.to_string()))
    }

    /// Read until `prompt` matches; return everything preceding the match.
    pub async fn expect_prompt(
        &mut self,
        prompt: &Regex,
        timeout: Option<Duration>,
    ) -> Result<String, PtyError> {
        let limit = timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + limit;
        loop {
            if let Some((start, end)) = prompt.find(&self.buffer).map(|m| (m.start(), m.end())) {
                let captured = self.buffer[..start].to_string();
                self.buffer.drain(..end);
                return Ok(captured);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PtyError::Timeout(limit));
            }
            match tokio::time::timeout(remaining, self.rx.recv()).await {
                Err(_) => return Err(PtyError::Timeout(limit)),
                Ok(None) => return Err(PtyError::Eof),
                Ok(Some(chunk)) => {
                    let text = String::from_utf8_lossy(&chunk);
                    self.buffer.push_str(&scrub_paste_guards(&text));
                }
            }
        }
    }

    /// Bounded post-drain after commands whose target keeps emitting output
    /// past the first prompt (e.g. jdb `run`).
    ///
    /// Repeats short expects, appending each non-empty capture; stops after
    /// the first empty capture following at least one non-empty capture, or
    /// when `base_timeout` (clamped to 1–5 s) elapses.
    pub async fn drain_extra(&mut self, prompt: &Regex, base_timeout: Duration) -> String {
        let cap = base_timeout.clamp(Duration::from_secs(1), Duration::from_secs(5));
        let deadline = Instant::now() + cap;
        let mut pieces: Vec<String> = Vec::new();
        let mut captured_output = false;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.expect_prompt(prompt, Some(remaining.max(Duration::from_millis(100)))).await {
                Ok(extra) => {
                    let trimmed = extra.trim();
                    if !trimmed.is_empty() {
                        pieces.push(trimmed.replace("\r\n", "\n"));
                        captured_output = true;
                    } else if captured_output {
                        break;
                    }
                }
                Err(PtyError::Eof) => {
                    let rest = self.take_buffer();
                    let rest = rest.trim();
                    if !rest.is_empty() {
                        pieces.push(rest.replace("\r\n", "\n"));
                    }
                    break;
                }
                Err(_) => break,
            }
        }
        pieces.join("\n")
    }

    /// Wait for the child to reach EOF, discarding output.
    pub async fn expect_eof(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            match tokio::time::timeout(remaining, self.rx.recv()).await {
                Ok(Some(_)) => continue,
                _ => return,
            }
        }
    }

    /// Remaining unmatched text (drained), for EOF/timeout diagnostics.
    pub fn take_buffer(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    /// Whether the child is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the child and reap it; idempotent.
    pub fn close(&mut self) {
        let _ = self.killer.kill();
        let _ = self.child.try_wait();
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Strip bracketed-paste guard sequences emitted by some terminals.
fn scrub_paste_guards(text: &str) -> String {
    text.replace("\x1b[?2004h", "").replace("\x1b[?2004l", "")
}

fn spawn_reader(mut reader: Box<dyn Read + Send>) -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
    std::thread::Builder::new()
        .name("dbgcopilot-pty-reader".to_string())
        .spawn(move || {
            let mut buf = vec![0u8; 16 * 1024];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        })
        .expect("spawning pty reader thread");
    rx
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_output_before_match() {
        let mut pty = PtySession::spawn(
            &argv(&["echo", "before-marker-after"]),
            None,
            &[],
            Duration::from_secs(5),
        )
        .unwrap();
        let re = Regex::new("marker").unwrap();
        let before = pty.expect_prompt(&re, None).await.unwrap();
        assert!(before.contains("before-"), "got: {before:?}");
        pty.close();
    }

    #[tokio::test]
    async fn eof_is_reported_when_child_exits() {
        let mut pty = PtySession::spawn(&argv(&["true"]), None, &[], Duration::from_secs(5)).unwrap();
        let re = Regex::new("never-matches-xyz").unwrap();
        let err = pty.expect_prompt(&re, Some(Duration::from_secs(5))).await.unwrap_err();
        assert!(matches!(err, PtyError::Eof), "got: {err:?}");
    }

    #[tokio::test]
    async fn timeout_is_reported_for_silent_child() {
        let mut pty = PtySession::spawn(&argv(&["cat"]), None, &[], Duration::from_secs(5)).unwrap();
        let re = Regex::new("never-matches-xyz").unwrap();
        let err = pty
            .expect_prompt(&re, Some(Duration::from_millis(300)))
            .await
            .unwrap_err();
        assert!(matches!(err, PtyError::Timeout(_)), "got: {err:?}");
        pty.close();
    }

    #[tokio::test]
    async fn send_line_round_trips_through_cat() {
        let mut pty = PtySession::spawn(&argv(&["cat"]), None, &[], Duration::from_secs(5)).unwrap();
        pty.send_line("ping-pong").unwrap();
        let re = Regex::new("ping-pong").unwrap();
        pty.expect_prompt(&re, None).await.unwrap();
        pty.close();
    }

    #[tokio::test]
    async fn child_liveness_is_tracked() {
        let mut pty = PtySession::spawn(&argv(&["cat"]), None, &[], Duration::from_secs(5)).unwrap();
        assert!(pty.is_alive());
        pty.close();
        // Reaped children eventually report dead; poll briefly.
        for _ in 0..50 {
            if !pty.is_alive() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("child still alive after kill");
    }

    #[test]
    fn paste_guard_sequences_are_scrubbed() {
        assert_eq!(scrub_paste_guards("\x1b[?2004habc\x1b[?2004l"), "abc");
    }

    #[test]
    fn spawn_rejects_empty_argv() {
        assert!(PtySession::spawn(&[], None, &[], Duration::from_secs(1)).is_err());
    }
}
