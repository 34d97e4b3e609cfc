// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Prompt configuration with layered JSON overrides.
//!
//! Load precedence, highest first:
//!   1. `DBGCOPILOT_PROMPTS` (absolute or cwd-relative path)
//!   2. `configs/prompts.<backend>.json` (per-debugger profile)
//!   3. `configs/prompts.json`
//!   4. built-in defaults
//!
//! Override files are partial: only the keys present in the file replace the
//! defaults, so a two-line JSON file can adjust a single rule list.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::paths::{configs_dir, resolve_override_path};

pub const PROMPTS_ENV_VAR: &str = "DBGCOPILOT_PROMPTS";

/// Prompt bundle consumed by the orchestrator when composing each turn.
#[derive(Debug, Clone)]
pub struct PromptConfig {
    /// Character budget for the overflow guard (chatlog + incoming line).
    pub max_context_chars: usize,
    /// System preamble template; `{debugger}` is substituted with the
    /// backend name.
    pub system_preamble: String,
    /// Protocol instructions describing the `<cmd>...</cmd>` contract.
    pub assistant_cmd_tag_instructions: String,
    /// Bulleted rule list appended after the instructions.
    pub rules: Vec<String>,
    /// Hint appended when the user asks for Chinese output.
    pub language_hint_zh: String,
    /// Where this config came from: `"defaults"` or a file path.
    pub source: String,
}

/// Partial on-disk form; any absent field keeps its default.
#[derive(Debug, Default, Deserialize)]
struct PromptOverrides {
    max_context_chars: Option<usize>,
    system_preamble: Option<String>,
    assistant_cmd_tag_instructions: Option<String>,
    rules: Option<Vec<String>>,
    language_hint_zh: Option<String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_context_chars: 16_000,
            system_preamble: "You are a debugging copilot embedded inside {debugger}.\n\
                 Interaction mode: human-in-the-loop. Whenever you believe a debugger command should run, include it inside <cmd>...</cmd> right away;\n\
                 the host will handle user confirmation before execution.\n"
                .into(),
            assistant_cmd_tag_instructions: "Protocol (single-step planning):\n\
                 1) Provide concise reasoning or guidance in natural language.\n\
                 2) If you want the debugger to run a command, emit exactly one <cmd>command</cmd> in the same reply (it may be on a new line).\n\
                 3) Keep the command inside <cmd> to a single {debugger} instruction — no multiple commands, scripts, or ';' chaining.\n\
                 4) If you do not need to run a command yet, omit <cmd> entirely and continue the discussion.\n\
                 The host will show the command to the user for (y/n/a) confirmation before execution.\n"
                .into(),
            rules: vec![
                "Prefer the suitable and reasonable command(s) for the situation.".into(),
                "Never fabricate output; quote exact snippets from tool results.".into(),
                "Keep answers concise and actionable.".into(),
                "When recommending a command, always wrap only that command in <cmd>...</cmd> and do not prefix with 'gdb> '.".into(),
                "Never include multiple commands inside <cmd>; do not use ';' to chain commands.".into(),
                "Never say 'I can't run executables directly' or similar disclaimers.".into(),
            ],
            language_hint_zh: "Please answer in Simplified Chinese (中文).\n".into(),
            source: "defaults".into(),
        }
    }
}

impl PromptConfig {
    /// Load the prompt config for a backend profile (e.g. `"gdb"`).
    pub fn load(backend: Option<&str>) -> Self {
        let mut cfg = Self::default();

        if let Ok(raw) = std::env::var(PROMPTS_ENV_VAR) {
            if !raw.trim().is_empty() {
                let path = resolve_override_path(&raw);
                if cfg.apply_file(&path) {
                    return cfg;
                }
            }
        }

        let root = configs_dir();
        if let Some(profile) = backend {
            let prof_path = root.join(format!("prompts.{profile}.json"));
            if cfg.apply_file(&prof_path) {
                return cfg;
            }
        }

        cfg.apply_file(&root.join("prompts.json"));
        cfg
    }

    /// Merge one override file into `self`; returns whether it applied.
    fn apply_file(&mut self, path: &Path) -> bool {
        let Ok(text) = std::fs::read_to_string(path) else {
            return false;
        };
        let overrides: PromptOverrides = match serde_json::from_str(&text) {
            Ok(o) => o,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "ignoring malformed prompt config");
                return false;
            }
        };
        if let Some(v) = overrides.max_context_chars {
            self.max_context_chars = v;
        }
        if let Some(v) = overrides.system_preamble {
            self.system_preamble = v;
        }
        if let Some(v) = overrides.assistant_cmd_tag_instructions {
            self.assistant_cmd_tag_instructions = v;
        }
        if let Some(v) = overrides.rules {
            self.rules = v;
        }
        if let Some(v) = overrides.language_hint_zh {
            self.language_hint_zh = v;
        }
        self.source = path.display().to_string();
        true
    }

    /// Render the config for `/prompts show`.
    pub fn render(&self) -> String {
        let rules = self
            .rules
            .iter()
            .map(|r| format!("  - {r}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "source: {}\nmax_context_chars: {}\nsystem_preamble:\n{}\nassistant_cmd_tag_instructions:\n{}\nrules:\n{}",
            self.source,
            self.max_context_chars,
            self.system_preamble,
            self.assistant_cmd_tag_instructions,
            rules
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_carry_cmd_tag_protocol() {
        let cfg = PromptConfig::default();
        assert!(cfg.assistant_cmd_tag_instructions.contains("<cmd>"));
        assert_eq!(cfg.max_context_chars, 16_000);
        assert_eq!(cfg.source, "defaults");
    }

    #[test]
    fn preamble_has_debugger_placeholder() {
        let cfg = PromptConfig::default();
        assert!(cfg.system_preamble.contains("{debugger}"));
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, r#"{{"max_context_chars": 9000, "rules": ["only rule"]}}"#).unwrap();
        let mut cfg = PromptConfig::default();
        assert!(cfg.apply_file(f.path()));
        assert_eq!(cfg.max_context_chars, 9000);
        assert_eq!(cfg.rules, vec!["only rule".to_string()]);
        // Untouched fields keep their defaults.
        assert!(cfg.system_preamble.contains("{debugger}"));
        assert_eq!(cfg.source, f.path().display().to_string());
    }

    #[test]
    fn malformed_file_is_ignored() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "not json").unwrap();
        let mut cfg = PromptConfig::default();
        assert!(!cfg.apply_file(f.path()));
        assert_eq!(cfg.source, "defaults");
    }

    #[test]
    fn missing_file_is_ignored() {
        let mut cfg = PromptConfig::default();
        assert!(!cfg.apply_file(Path::new("/nonexistent/prompts.json")));
    }

    #[test]
    fn render_includes_source_and_rules() {
        let cfg = PromptConfig::default();
        let text = cfg.render();
        assert!(text.contains("source: defaults"));
        assert!(text.contains("  - Keep answers concise"));
    }
}
