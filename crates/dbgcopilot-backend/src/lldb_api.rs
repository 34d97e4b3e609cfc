// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! LLDB API backend: drives the SBDebugger command interpreter directly,
//! with no PTY framing.
//!
//! The interpreter runs inside a small pipe-connected helper that loads the
//! LLDB scripting bindings; replies are framed by a sentinel line instead
//! of a prompt regex.  Before committing, the bindings are probe-imported
//! in a short-lived subprocess — importing them blindly in a process that
//! will keep running can hit fatal library init paths.  Candidate module
//! paths come from `LLDB_PYTHON_DIR` / `LLDB_PYTHONPATH` and `lldb -P`.
//!
//! `DBGCOPILOT_LLDB_API=0` disables this backend entirely, forcing the
//! subprocess fallback.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, warn};

use crate::lldb::RUST_DEFAULTS;
use crate::util::split_commands;
use crate::DebuggerBackend;

const KILL_SWITCH_ENV: &str = "DBGCOPILOT_LLDB_API";
const READY_MARK: &str = "__DBGCOPILOT_READY__";
const DONE_MARK: &str = "__DBGCOPILOT_DONE__";

/// Interpreter loop executed by the helper process.
const HELPER_SCRIPT: &str = r#"
import sys
import lldb
lldb.SBDebugger.Initialize()
dbg = lldb.SBDebugger.Create()
dbg.SetAsync(False)
interp = dbg.GetCommandInterpreter()
print("__DBGCOPILOT_READY__", flush=True)
for line in sys.stdin:
    cmd = line.rstrip("\n")
    res = lldb.SBCommandReturnObject()
    interp.HandleCommand(cmd, res)
    out = res.GetOutput() if res.Succeeded() else (res.GetError() or "")
    out = out or ""
    sys.stdout.write(out)
    if out and not out.endswith("\n"):
        sys.stdout.write("\n")
    print("__DBGCOPILOT_DONE__", flush=True)
lldb.SBDebugger.Destroy(dbg)
"#;

pub struct LldbApiBackend {
    label: &'static str,
    rust_profile: bool,
    timeout: Duration,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
}

impl LldbApiBackend {
    pub fn new() -> Self {
        Self::with_profile("lldb", false)
    }

    pub fn rust() -> Self {
        Self::with_profile("rust-lldb", true)
    }

    fn with_profile(label: &'static str, rust_profile: bool) -> Self {
        Self {
            label,
            rust_profile,
            timeout: Duration::from_secs(10),
            child: None,
            stdin: None,
            stdout: None,
        }
    }

    /// Run one interpreter command inside the helper and capture its reply.
    async fn handle_command(&mut self, cmd: &str, timeout: Option<Duration>) -> anyhow::Result<String> {
        let stdin = self.stdin.as_mut().context("helper not running")?;
        let stdout = self.stdout.as_mut().context("helper not running")?;
        // The protocol is line-oriented; embedded newlines would desync it.
        let flat = cmd.replace('\n', " ");
        stdin
            .write_all(format!("{flat}\n").as_bytes())
            .await
            .context("writing to lldb helper")?;
        stdin.flush().await.context("flushing lldb helper stdin")?;

        let limit = timeout.unwrap_or(self.timeout);
        let mut lines: Vec<String> = Vec::new();
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let mut line = String::new();
            let read = tokio::time::timeout_at(deadline, stdout.read_line(&mut line))
                .await
                .map_err(|_| anyhow::anyhow!("timeout after {:.1}s", limit.as_secs_f32()))?
                .context("reading from lldb helper")?;
            if read == 0 {
                bail!("lldb helper exited");
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed == DONE_MARK {
                break;
            }
            lines.push(trimmed.to_string());
        }
        Ok(lines.join("\n"))
    }
}

impl Default for LldbApiBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Candidate directories holding the `lldb` Python module.
async fn python_module_paths() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for key in ["LLDB_PYTHON_DIR", "LLDB_PYTHONPATH"] {
        if let Ok(p) = std::env::var(key) {
            let p = PathBuf::from(p);
            if p.is_dir() {
                paths.push(p);
            }
        }
    }
    // `lldb -P` prints the module path of the installed lldb.
    let probe = tokio::process::Command::new("lldb")
        .arg("-P")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();
    if let Ok(Ok(out)) = tokio::time::timeout(Duration::from_secs(5), probe).await {
        let text = String::from_utf8_lossy(&out.stdout);
        let p = PathBuf::from(text.trim());
        if p.is_dir() {
            paths.push(p);
        }
    }
    paths.dedup();
    paths
}

/// Import the bindings in a short-lived subprocess; a crash there costs
/// nothing, a crash in the long-lived helper would take the session down.
async fn probe_import(paths: &[PathBuf]) -> bool {
    let path_list: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    let code = format!(
        "import sys; sys.path[:0] = {paths:?}; import lldb; print('OK')",
        paths = path_list
    );
    let run = tokio::process::Command::new("python3")
        .arg("-c")
        .arg(&code)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();
    match tokio::time::timeout(Duration::from_secs(5), run).await {
        Ok(Ok(out)) => out.status.success(),
        _ => false,
    }
}

/// Point LLDB at a server binary when the environment does not already.
fn configure_server_paths() -> Vec<(String, String)> {
    let mut env = Vec::new();
    let already_set = std::env::var("LLDB_SERVER_PATH").is_ok()
        || std::env::var("LLDB_DEBUGSERVER_PATH").is_ok();
    if already_set {
        return env;
    }
    let mut candidates: Vec<PathBuf> = which::which("lldb-server").into_iter().collect();
    for versioned in (14..=21).rev() {
        candidates.push(PathBuf::from(format!("/usr/lib/llvm-{versioned}/bin/lldb-server")));
    }
    candidates.push(PathBuf::from("/usr/bin/lldb-server"));
    if let Some(server) = candidates.into_iter().find(|p| p.is_file()) {
        let value = server.to_string_lossy().into_owned();
        env.push(("LLDB_SERVER_PATH".to_string(), value.clone()));
        env.push(("LLDB_DEBUGSERVER_PATH".to_string(), value));
    }
    env
}

fn import_failure_hint() -> String {
    [
        "LLDB Python module could not be imported safely in a probe. Options:",
        "- Linux: sudo apt install lldb python3-lldb; then set LLDB_PYTHONPATH=$(lldb -P)",
        "- macOS: install Xcode CLT; verify with: xcrun python3 -c 'import lldb'",
        "- Conda: conda install -c conda-forge lldb",
        "Or set DBGCOPILOT_LLDB_API=0 to force the subprocess backend.",
    ]
    .join("\n")
}

#[async_trait]
impl DebuggerBackend for LldbApiBackend {
    fn name(&self) -> &'static str {
        self.label
    }

    fn prompt(&self) -> String {
        "(lldb) ".to_string()
    }

    async fn initialize(&mut self) -> anyhow::Result<()> {
        if let Ok(v) = std::env::var(KILL_SWITCH_ENV) {
            if matches!(v.to_lowercase().as_str(), "0" | "false" | "no") {
                bail!("LLDB Python API disabled by {KILL_SWITCH_ENV}=0");
            }
        }

        let paths = python_module_paths().await;
        if !probe_import(&paths).await {
            bail!("{}", import_failure_hint());
        }

        let mut cmd = tokio::process::Command::new("python3");
        cmd.arg("-u")
            .arg("-c")
            .arg(HELPER_SCRIPT)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        // Detach from the controlling terminal; LLDB must not grab /dev/tty.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        if !paths.is_empty() {
            let joined = std::env::join_paths(&paths)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            let existing = std::env::var("PYTHONPATH").unwrap_or_default();
            let value = if existing.is_empty() {
                joined
            } else {
                format!("{joined}:{existing}")
            };
            cmd.env("PYTHONPATH", value);
        }
        for (k, v) in configure_server_paths() {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().context("spawning lldb helper")?;
        let stdin = child.stdin.take().context("helper stdin unavailable")?;
        let stdout = child.stdout.take().context("helper stdout unavailable")?;
        let mut reader = BufReader::new(stdout);

        // Wait for the helper to finish importing and creating the debugger.
        let ready = async {
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    return false;
                }
                if line.trim_end() == READY_MARK {
                    return true;
                }
            }
        };
        let became_ready = tokio::time::timeout(Duration::from_secs(15), ready)
            .await
            .unwrap_or(false);
        if !became_ready {
            let _ = child.kill().await;
            bail!("lldb helper did not become ready");
        }

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout = Some(reader);

        // Session defaults.  Colors stay on here: output arrives over a pipe,
        // so there is no prompt-framing to corrupt.
        let mut setup = vec![
            "settings set use-color true".to_string(),
            "settings set auto-confirm true".to_string(),
        ];
        if cfg!(target_os = "linux") {
            // Local debugging through llgs is flaky under a pipe-driven
            // interpreter; failures here are ignored on LLDB builds without
            // the setting.
            setup.push("settings set platform.plugin.linux.use-llgs-for-local false".to_string());
        }
        if self.rust_profile {
            setup.extend(RUST_DEFAULTS.iter().map(|s| s.to_string()));
        }
        for cmd in setup {
            if let Err(e) = self.handle_command(&cmd, None).await {
                debug!(backend = self.label, cmd = %cmd, error = %e, "setup command ignored");
            }
        }
        Ok(())
    }

    async fn run_command(&mut self, cmd: &str, timeout: Option<Duration>) -> String {
        let text = cmd.trim();
        if text.is_empty() {
            return String::new();
        }
        if self.stdin.is_none() {
            return format!("[{} closed] session is not running", self.label);
        }
        let mut outputs: Vec<String> = Vec::new();
        for part in split_commands(text) {
            match self.handle_command(&part, timeout).await {
                Ok(out) => {
                    if !out.is_empty() {
                        outputs.push(out);
                    }
                }
                Err(e) if e.to_string().starts_with("timeout") => {
                    outputs.push(format!("[{} timeout] {part}: {e}", self.label));
                }
                Err(e) => {
                    warn!(backend = self.label, error = %e, "api command failed");
                    outputs.push(format!("[lldb api error] {part}: {e}"));
                }
            }
        }
        outputs.join("\n")
    }

    async fn close(&mut self) {
        // Dropping stdin EOFs the helper's read loop; the kill is a backstop.
        self.stdin.take();
        self.stdout.take();
        if let Some(mut child) = self.child.take() {
            let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
            let _ = child.kill().await;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn kill_switch_disables_backend() {
        std::env::set_var(KILL_SWITCH_ENV, "0");
        let mut b = LldbApiBackend::new();
        let err = b.initialize().await.unwrap_err().to_string();
        assert!(err.contains(KILL_SWITCH_ENV), "got: {err}");
        std::env::remove_var(KILL_SWITCH_ENV);
    }

    #[tokio::test]
    async fn uninitialized_backend_reports_closed() {
        let mut b = LldbApiBackend::new();
        let out = b.run_command("version", None).await;
        assert!(out.contains("closed"), "got: {out}");
    }

    #[test]
    fn hint_names_the_kill_switch() {
        assert!(import_failure_hint().contains("DBGCOPILOT_LLDB_API=0"));
    }

    #[test]
    fn server_paths_respect_existing_env() {
        std::env::set_var("LLDB_SERVER_PATH", "/opt/custom/lldb-server");
        assert!(configure_server_paths().is_empty());
        std::env::remove_var("LLDB_SERVER_PATH");
    }

    #[test]
    fn helper_script_frames_with_sentinels() {
        assert!(HELPER_SCRIPT.contains(READY_MARK));
        assert!(HELPER_SCRIPT.contains(DONE_MARK));
        assert!(HELPER_SCRIPT.contains("HandleCommand"));
    }
}
