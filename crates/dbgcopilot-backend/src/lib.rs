// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Debugger backends: a uniform command/response interface over
//! heterogeneous native debuggers.
//!
//! Most adapters drive their debugger through a pseudo-terminal with
//! prompt-regex framing ([`pty::PtySession`]); radare2 speaks the r2pipe
//! spawn protocol over plain pipes, and the LLDB API adapter drives the
//! SBDebugger command interpreter in a helper process.  All adapters share
//! the [`DebuggerBackend`] contract: `run_command` never fails — transport
//! problems render as inline `[<name> timeout|eof|error]` markers, and a
//! recognised exit command triggers a close-and-restart cycle.

pub mod pty;
pub mod util;

mod delve;
mod gdb;
mod jdb;
mod lldb;
mod lldb_api;
mod lldb_rust;
mod pdb;
mod radare2;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;

pub use delve::DelveBackend;
pub use gdb::GdbBackend;
pub use jdb::JdbBackend;
pub use lldb::LldbBackend;
pub use lldb_api::LldbApiBackend;
pub use pdb::PdbBackend;
pub use radare2::Radare2Backend;

/// The uniform backend contract.
///
/// `run_command` trims its input, splits it into primitive commands on
/// newlines and `;` (LLDB `script ` lines excepted), matches each primitive
/// against the backend's exit set, and joins the per-primitive outputs with
/// newlines.  It never returns an error.
#[async_trait]
pub trait DebuggerBackend: Send {
    /// Stable backend label (`"gdb"`, `"lldb"`, ...), used in echo lines and
    /// inline failure markers.
    fn name(&self) -> &'static str;

    /// Prompt string shown by the REPL (e.g. `"(gdb) "`).
    fn prompt(&self) -> String;

    /// Output captured while the session started, when the debugger prints a
    /// banner before its first prompt.
    fn startup_output(&self) -> Option<String> {
        None
    }

    /// Start (or restart) the underlying debugger session.
    async fn initialize(&mut self) -> anyhow::Result<()>;

    /// Execute one user-level command string.
    async fn run_command(&mut self, cmd: &str, timeout: Option<Duration>) -> String;

    /// Tear down the child process; safe to call twice.
    async fn close(&mut self);
}

/// Supported debugger selectors, as accepted by `/use` and `--debugger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerKind {
    Gdb,
    RustGdb,
    Lldb,
    LldbRust,
    Jdb,
    Pdb,
    Delve,
    Radare2,
}

impl DebuggerKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "gdb" => Some(Self::Gdb),
            "rust-gdb" => Some(Self::RustGdb),
            "lldb" => Some(Self::Lldb),
            "lldb-rust" | "rust-lldb" => Some(Self::LldbRust),
            "jdb" => Some(Self::Jdb),
            "pdb" => Some(Self::Pdb),
            "delve" | "dlv" => Some(Self::Delve),
            "radare2" | "r2" => Some(Self::Radare2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gdb => "gdb",
            Self::RustGdb => "rust-gdb",
            Self::Lldb => "lldb",
            Self::LldbRust => "lldb-rust",
            Self::Jdb => "jdb",
            Self::Pdb => "pdb",
            Self::Delve => "delve",
            Self::Radare2 => "radare2",
        }
    }
}

impl std::fmt::Display for DebuggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target description handed to the backend factory.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    pub program: Option<String>,
    pub corefile: Option<String>,
    pub classpath: Option<String>,
    pub sourcepath: Option<String>,
    pub main_class: Option<String>,
    pub cwd: Option<PathBuf>,
}

/// Construct and initialise the backend for a debugger selector.
///
/// LLDB selectors prefer the API adapter and fall back to the subprocess
/// adapter when the bindings probe fails (the fallback reason is logged).
pub async fn create_backend(
    kind: DebuggerKind,
    spec: &LaunchSpec,
) -> anyhow::Result<Box<dyn DebuggerBackend>> {
    match kind {
        DebuggerKind::Gdb => {
            let mut backend = GdbBackend::new();
            backend.initialize().await?;
            Ok(Box::new(backend))
        }
        DebuggerKind::RustGdb => {
            let mut backend = GdbBackend::rust();
            backend.initialize().await?;
            Ok(Box::new(backend))
        }
        DebuggerKind::Lldb => lldb_rust::create_lldb_backend(false).await,
        DebuggerKind::LldbRust => lldb_rust::create_lldb_backend(true).await,
        DebuggerKind::Jdb => {
            let mut backend = JdbBackend::new(
                spec.main_class.clone().or_else(|| spec.program.clone()),
                spec.classpath.clone(),
                spec.sourcepath.clone(),
                spec.cwd.clone(),
            );
            backend.initialize().await?;
            Ok(Box::new(backend))
        }
        DebuggerKind::Pdb => {
            let mut backend = PdbBackend::new(spec.program.clone(), spec.cwd.clone());
            backend.initialize().await?;
            Ok(Box::new(backend))
        }
        DebuggerKind::Delve => {
            let Some(program) = spec.program.clone() else {
                bail!("Delve debugger requires a program path");
            };
            let mut backend = DelveBackend::new(program, spec.cwd.clone());
            backend.initialize().await?;
            Ok(Box::new(backend))
        }
        DebuggerKind::Radare2 => {
            let Some(program) = spec.program.clone() else {
                bail!("radare2 debugger requires a program path");
            };
            let mut backend = Radare2Backend::new(program, spec.cwd.clone());
            backend.initialize().await?;
            Ok(Box::new(backend))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
