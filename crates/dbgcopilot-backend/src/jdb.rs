// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Java debugging backend over the standard `jdb` tool.
//!
//! The jdb child is spawned lazily on the first command that needs it.
//! Launch preparation handles four program shapes: a `.java` source file
//! (compiled with `javac -g` into the source directory, with the `package`
//! declaration detected to form the qualified main class), a `.class`
//! file, a `.jar`, or a bare main-class name with a caller-provided
//! classpath.  jdb's prompt is either `> ` or a bracketed thread indicator
//! like `Thread-1[1] `; both frame the capture.  After `run` the output
//! often continues past the first prompt, so a bounded post-drain collects
//! the stragglers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::pty::{PtyError, PtySession};
use crate::util::ANSI_PREFIX;
use crate::DebuggerBackend;

/// Known end-of-run markers; when present the target does not need `cont`.
const PROGRESS_MARKERS: &[&str] = &[
    "vm started",
    "exception occurred",
    "application exited",
    "breakpoint hit",
    "vm already running",
];

pub struct JdbBackend {
    program: Option<String>,
    classpath: Option<String>,
    sourcepath: Option<String>,
    cwd: Option<PathBuf>,
    timeout: Duration,
    session: Option<PtySession>,
    prompt_re: Regex,
    prepared: Option<(Vec<String>, Option<PathBuf>)>,
}

impl JdbBackend {
    pub fn new(
        program: Option<String>,
        classpath: Option<String>,
        sourcepath: Option<String>,
        cwd: Option<PathBuf>,
    ) -> Self {
        // `> ` or a thread indicator such as `Thread-1[1] `, at end of the
        // captured stream.
        let prompt_re = Regex::new(&format!(
            r"(?:^|\r?\n){ANSI_PREFIX}(?:>\s*|[A-Za-z0-9.$-]+\[\d+\]\s*)$"
        ))
        .expect("static regex");
        Self {
            program,
            classpath,
            sourcepath,
            cwd,
            timeout: Duration::from_secs(10),
            session: None,
            prompt_re,
            prepared: None,
        }
    }

    fn prefix(&self) -> &'static str {
        "[jdb]"
    }

    fn session_alive(&mut self) -> bool {
        self.session.as_mut().map(|s| s.is_alive()).unwrap_or(false)
    }

    /// Build the jdb argv (and working directory) for the configured target.
    async fn prepare_launch(&mut self) -> anyhow::Result<(Vec<String>, Option<PathBuf>)> {
        if let Some(prepared) = &self.prepared {
            return Ok(prepared.clone());
        }
        let program = self.program.clone().unwrap_or_default();
        let (command, workdir) = if program.trim().is_empty() {
            let mut command = vec!["jdb".to_string()];
            if let Some(cp) = &self.classpath {
                command.extend(["-classpath".to_string(), cp.clone()]);
            }
            if let Some(sp) = &self.sourcepath {
                command.extend(["-sourcepath".to_string(), sp.clone()]);
            }
            (command, None)
        } else {
            let path = Path::new(&program);
            if path.is_file() {
                match path.extension().and_then(|e| e.to_str()).map(str::to_lowercase) {
                    Some(ext) if ext == "java" => self.prepare_from_java(path).await?,
                    Some(ext) if ext == "class" => self.prepare_from_class(path)?,
                    Some(ext) if ext == "jar" => {
                        let abs = path.canonicalize().context("resolving jar path")?;
                        let mut command = vec![
                            "jdb".to_string(),
                            "-jar".to_string(),
                            abs.to_string_lossy().into_owned(),
                        ];
                        if let Some(sp) = &self.sourcepath {
                            command.extend(["-sourcepath".to_string(), sp.clone()]);
                        }
                        (command, abs.parent().map(Path::to_path_buf))
                    }
                    other => bail!("Unsupported file type: {:?}", other.unwrap_or_default()),
                }
            } else {
                // Bare main class name, optionally with a provided classpath.
                let mut command = vec!["jdb".to_string()];
                if let Some(cp) = &self.classpath {
                    command.extend(["-classpath".to_string(), cp.clone()]);
                }
                if let Some(sp) = &self.sourcepath {
                    command.extend(["-sourcepath".to_string(), sp.clone()]);
                }
                command.push(program.clone());
                (command, None)
            }
        };
        self.prepared = Some((command.clone(), workdir.clone()));
        Ok((command, workdir))
    }

    /// Compile a `.java` source with `javac -g` and derive the launch args.
    async fn prepare_from_java(&mut self, source: &Path) -> anyhow::Result<(Vec<String>, Option<PathBuf>)> {
        let src = source.canonicalize().context("resolving java source path")?;
        let compile_dir = src.parent().context("source file has no parent")?.to_path_buf();
        let package = detect_package(&src);

        let output = tokio::process::Command::new("javac")
            .arg("-g")
            .arg(&src)
            .current_dir(&compile_dir)
            .output()
            .await
            .context("running javac")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() { stdout } else { stderr };
            bail!("{}", detail.trim());
        }

        let stem = src
            .file_stem()
            .and_then(|s| s.to_str())
            .context("source file has no stem")?;
        let main_class = match &package {
            Some(pkg) => format!("{pkg}.{stem}"),
            None => stem.to_string(),
        };
        let cp = self
            .classpath
            .clone()
            .unwrap_or_else(|| compile_dir.to_string_lossy().into_owned());
        let mut command = vec!["jdb".to_string(), "-classpath".to_string(), cp, main_class];
        if let Some(sp) = &self.sourcepath {
            command.extend(["-sourcepath".to_string(), sp.clone()]);
        }
        Ok((command, Some(compile_dir)))
    }

    fn prepare_from_class(&self, compiled: &Path) -> anyhow::Result<(Vec<String>, Option<PathBuf>)> {
        let class_file = compiled.canonicalize().context("resolving class path")?;
        let class_dir = class_file.parent().context("class file has no parent")?.to_path_buf();
        let main_class = class_file
            .file_stem()
            .and_then(|s| s.to_str())
            .context("class file has no stem")?
            .to_string();
        let cp = self
            .classpath
            .clone()
            .unwrap_or_else(|| class_dir.to_string_lossy().into_owned());
        let mut command = vec!["jdb".to_string(), "-classpath".to_string(), cp, main_class];
        if let Some(sp) = &self.sourcepath {
            command.extend(["-sourcepath".to_string(), sp.clone()]);
        }
        Ok((command, Some(class_dir)))
    }

    /// Spawn jdb if it is not already running; returns any startup output or
    /// an inline failure message.
    async fn ensure_session_started(&mut self, timeout: Option<Duration>) -> String {
        if self.session_alive() {
            return String::new();
        }
        let (launch, workdir) = match self.prepare_launch().await {
            Ok(v) => v,
            Err(e) => return format!("{} failed to prepare program: {e}", self.prefix()),
        };
        let cwd = workdir.or_else(|| self.cwd.clone());
        let session = match PtySession::spawn(
            &launch,
            cwd.as_deref(),
            &[],
            timeout.unwrap_or(self.timeout),
        ) {
            Ok(s) => s,
            Err(e) => return format!("{} failed to start jdb: {e}", self.prefix()),
        };
        self.session = Some(session);

        let startup = self.expect_prompt_text().await;
        if !self.session_alive() {
            if startup.is_empty() {
                return format!("{} session ended", self.prefix());
            }
            return startup;
        }
        startup
    }

    /// Wait for a prompt, rendering transport failures as inline text.
    async fn expect_prompt_text(&mut self) -> String {
        let timeout = self.timeout;
        let prompt_re = self.prompt_re.clone();
        let Some(session) = self.session.as_mut() else {
            return "[jdb] session ended".to_string();
        };
        match session.expect_prompt(&prompt_re, Some(timeout)).await {
            Ok(out) => normalize_output("", &out),
            Err(PtyError::Timeout(_)) => "[jdb] timeout waiting for jdb prompt".to_string(),
            Err(PtyError::Eof) => {
                let rest = normalize_output("", &session.take_buffer());
                self.session = None;
                if rest.is_empty() {
                    "[jdb] process exited".to_string()
                } else {
                    rest
                }
            }
            Err(e) => format!("[jdb] failed waiting for jdb prompt: {e}"),
        }
    }

    async fn send_and_capture(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
        ensure: bool,
        post_drain: bool,
    ) -> String {
        let mut startup = String::new();
        if ensure {
            startup = self.ensure_session_started(timeout).await;
            if !self.session_alive() {
                return if startup.is_empty() {
                    format!("{} session ended", self.prefix())
                } else {
                    startup
                };
            }
        }
        if !self.session_alive() {
            return if startup.is_empty() {
                format!("{} session ended", self.prefix())
            } else {
                startup
            };
        }

        {
            let session = self.session.as_mut().expect("alive session");
            if let Err(e) = session.send_line(command) {
                return format!("{} failed to send command: {e}", self.prefix());
            }
        }

        let timeout_value = timeout.unwrap_or(self.timeout);
        let prompt_re = self.prompt_re.clone();
        let session_ref = self.session.as_mut().expect("alive session");
        let mut session_died = false;
        let result = match session_ref.expect_prompt(&prompt_re, Some(timeout_value)).await {
            Ok(out) => {
                let mut result = normalize_output(command, &out);
                if post_drain {
                    let drained = session_ref.drain_extra(&prompt_re, timeout_value).await;
                    if !drained.is_empty() {
                        result = combine(&[&result, &drained]);
                    }
                }
                result
            }
            Err(PtyError::Timeout(_)) => {
                let partial = normalize_output(command, &session_ref.take_buffer());
                if partial.is_empty() {
                    format!("[jdb] timeout waiting for '{command}'")
                } else {
                    format!("{partial}\n[jdb] timeout waiting for prompt after '{command}'")
                }
            }
            Err(PtyError::Eof) => {
                let rest = normalize_output(command, &session_ref.take_buffer());
                session_died = true;
                if rest.is_empty() {
                    "[jdb] process exited".to_string()
                } else {
                    rest
                }
            }
            Err(e) => format!("[jdb] error: {e}"),
        };
        if session_died {
            self.session = None;
        }
        combine(&[&startup, &result])
    }

    async fn handle_run(&mut self, command: &str, timeout: Option<Duration>) -> String {
        let normalized = normalize_run_command(command);

        let startup = self.ensure_session_started(timeout).await;
        if !self.session_alive() {
            return if startup.is_empty() {
                format!("{} session ended", self.prefix())
            } else {
                startup
            };
        }

        let run_output = self
            .send_and_capture(&normalized, timeout, false, true)
            .await;

        let guidance = if should_suggest_continue(&run_output) {
            format!(
                "{} target is paused after startup; use '/exec cont' to resume or inspect threads",
                self.prefix()
            )
        } else {
            String::new()
        };

        combine(&[&startup, &run_output, &guidance])
    }
}

/// Join non-empty pieces with newlines.
fn combine(pieces: &[&str]) -> String {
    pieces
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
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

fn normalize_run_command(raw: &str) -> String {
    let mut parts = raw.split_whitespace();
    let verb = parts.next().unwrap_or("").to_lowercase();
    if verb != "run" && verb != "r" {
        return "run".to_string();
    }
    let args: Vec<&str> = parts.collect();
    if args.is_empty() {
        "run".to_string()
    } else {
        format!("run {}", args.join(" "))
    }
}

/// Deferred-breakpoint output with no recognised progress marker means the
/// target sits paused waiting for `cont`.
fn should_suggest_continue(output: &str) -> bool {
    if output.is_empty() {
        return false;
    }
    let lowered = output.to_lowercase();
    if PROGRESS_MARKERS.iter().any(|m| lowered.contains(m)) {
        return false;
    }
    lowered.contains("set uncaught") || lowered.contains("set deferred")
}

/// Read the `package` declaration from a Java source file, if present.
fn detect_package(source: &Path) -> Option<String> {
    let text = std::fs::read_to_string(source).ok()?;
    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with("//") {
            continue;
        }
        if let Some(rest) = stripped.strip_prefix("package ") {
            if let Some(pkg) = rest.strip_suffix(';') {
                return Some(pkg.trim().to_string());
            }
        }
    }
    None
}

#[async_trait]
impl DebuggerBackend for JdbBackend {
    fn name(&self) -> &'static str {
        "jdb"
    }

    fn prompt(&self) -> String {
        "> ".to_string()
    }

    async fn initialize(&mut self) -> anyhow::Result<()> {
        which::which("jdb").map_err(|_| anyhow::anyhow!("jdb executable not found on PATH"))?;
        which::which("javac").map_err(|_| anyhow::anyhow!("javac executable not found on PATH"))?;
        Ok(())
    }

    async fn run_command(&mut self, cmd: &str, timeout: Option<Duration>) -> String {
        let command = cmd.trim();
        if command.is_empty() {
            return String::new();
        }
        let lower = command.to_lowercase();

        if lower == "run" || lower == "r" || lower.starts_with("run ") {
            return self.handle_run(command, timeout).await;
        }

        if matches!(lower.as_str(), "quit" | "exit" | "q") {
            if self.session_alive() {
                if let Some(session) = self.session.as_mut() {
                    let _ = session.send_line("quit");
                }
            }
            if let Some(mut session) = self.session.take() {
                session.expect_eof(Duration::from_secs(1)).await;
                session.close();
            }
            self.prepared = None;
            debug!("jdb session terminated by user");
            return format!("{} session terminated", self.prefix());
        }

        let mapped: String = match lower.as_str() {
            "continue" | "c" => "cont".to_string(),
            "next" | "n" => "next".to_string(),
            "step" | "s" | "stepin" => "step".to_string(),
            "where" | "bt" | "backtrace" => "where".to_string(),
            "threads" | "thread" => "threads".to_string(),
            _ if lower.starts_with("print ") || lower.starts_with("p ") => {
                let expr = command.splitn(2, ' ').nth(1).unwrap_or("").trim();
                if expr.is_empty() {
                    return format!("{} provide an expression", self.prefix());
                }
                format!("print {expr}")
            }
            _ if lower.starts_with("locals") => "locals".to_string(),
            _ => command.to_string(),
        };

        self.send_and_capture(&mapped, timeout, true, false).await
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.prepared = None;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn backend() -> JdbBackend {
        JdbBackend::new(None, None, None, None)
    }

    // ── Prompt matching ───────────────────────────────────────────────────────

    #[test]
    fn prompt_matches_plain_and_thread_variants() {
        let b = backend();
        assert!(b.prompt_re.is_match("Initializing jdb ...\n> "));
        assert!(b.prompt_re.is_match("Breakpoint hit:\nThread-1[1] "));
        assert!(b.prompt_re.is_match("main[1] "));
        assert!(!b.prompt_re.is_match("> more output follows\n"));
    }

    // ── Launch preparation ────────────────────────────────────────────────────

    #[tokio::test]
    async fn bare_class_launch_includes_classpath_and_sourcepath() {
        let mut b = JdbBackend::new(
            Some("com.example.Main".into()),
            Some("/cp".into()),
            Some("/sp".into()),
            None,
        );
        let (cmd, dir) = b.prepare_launch().await.unwrap();
        assert_eq!(
            cmd,
            vec!["jdb", "-classpath", "/cp", "-sourcepath", "/sp", "com.example.Main"]
        );
        assert!(dir.is_none());
    }

    #[tokio::test]
    async fn no_program_launch_is_plain_jdb() {
        let mut b = backend();
        let (cmd, _) = b.prepare_launch().await.unwrap();
        assert_eq!(cmd, vec!["jdb"]);
    }

    #[tokio::test]
    async fn class_file_launch_uses_parent_dir_as_classpath() {
        let dir = tempfile::tempdir().unwrap();
        let class_path = dir.path().join("Main.class");
        std::fs::File::create(&class_path).unwrap();
        let mut b = JdbBackend::new(Some(class_path.to_string_lossy().into_owned()), None, None, None);
        let (cmd, workdir) = b.prepare_launch().await.unwrap();
        assert_eq!(cmd[0], "jdb");
        assert_eq!(cmd[1], "-classpath");
        assert_eq!(cmd[3], "Main");
        assert!(workdir.is_some());
    }

    #[tokio::test]
    async fn launch_preparation_is_cached() {
        let mut b = JdbBackend::new(Some("Main".into()), None, None, None);
        let first = b.prepare_launch().await.unwrap();
        let second = b.prepare_launch().await.unwrap();
        assert_eq!(first, second);
    }

    // ── Package detection ─────────────────────────────────────────────────────

    #[test]
    fn package_declaration_is_detected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "// a comment").unwrap();
        writeln!(f, "package com.example.app;").unwrap();
        writeln!(f, "public class Main {{}}").unwrap();
        assert_eq!(detect_package(f.path()), Some("com.example.app".into()));
    }

    #[test]
    fn missing_package_yields_none() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "public class Main {{}}").unwrap();
        assert_eq!(detect_package(f.path()), None);
    }

    // ── Run normalisation and guidance ───────────────────────────────────────

    #[test]
    fn run_command_is_normalised() {
        assert_eq!(normalize_run_command("run"), "run");
        assert_eq!(normalize_run_command("r"), "run");
        assert_eq!(normalize_run_command("r arg1 arg2"), "run arg1 arg2");
        assert_eq!(normalize_run_command("RUN  x"), "run x");
    }

    #[test]
    fn continue_guidance_fires_on_deferred_breakpoints_only() {
        assert!(should_suggest_continue(
            "Set uncaught java.lang.Throwable\nSet deferred breakpoint Main.main"
        ));
        assert!(!should_suggest_continue("Set deferred breakpoint\nVM Started: ..."));
        assert!(!should_suggest_continue("Breakpoint hit: thread=main"));
        assert!(!should_suggest_continue(""));
    }

    // ── Output normalisation ──────────────────────────────────────────────────

    #[test]
    fn echoed_command_is_stripped() {
        assert_eq!(normalize_output("where", "where\r\n  [1] Main.main\r\n"), "[1] Main.main");
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn empty_command_is_a_no_op() {
        let mut b = backend();
        assert_eq!(b.run_command("", None).await, "");
    }

    #[tokio::test]
    async fn print_without_expression_is_rejected() {
        let mut b = backend();
        let out = b.run_command("print   ", None).await;
        assert!(out.contains("provide an expression"), "got: {out}");
    }

    #[tokio::test]
    async fn quit_without_session_still_reports_termination() {
        let mut b = backend();
        let out = b.run_command("quit", None).await;
        assert_eq!(out, "[jdb] session terminated");
    }
}
