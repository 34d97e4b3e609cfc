// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Plain-text session log with timestamped lines.
//!
//! This is a user-facing run artifact (like the report), separate from the
//! `tracing` diagnostics: it captures every prompt step, executed command,
//! and usage record so a run can be audited after the fact.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use chrono::Utc;

pub struct SessionLog {
    file: File,
}

impl SessionLog {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening session log {}", path.display()))?;
        Ok(Self { file })
    }

    /// Append one timestamped entry; write failures are swallowed so logging
    /// never interrupts an investigation.
    pub fn log(&mut self, message: &str) {
        let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let _ = writeln!(self.file, "{stamp} {message}");
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("run.log");
        let mut log = SessionLog::create(&path).unwrap();
        log.log("Starting dbgagent session abc");
        log.log("Executing command: bt");
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("Starting dbgagent session abc"));
        assert!(lines[1].contains("Executing command: bt"));
        // Leading timestamp: "YYYY-MM-DD HH:MM:SS.mmm"
        assert!(lines[0].chars().take(4).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn create_makes_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("run.log");
        assert!(SessionLog::create(&nested).is_ok());
        assert!(nested.parent().unwrap().is_dir());
    }
}
