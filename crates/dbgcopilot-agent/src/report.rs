// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Markdown report layout for completed agent runs.

use std::path::Path;

use dbgcopilot_core::Attempt;
use dbgcopilot_model::UsageRecord;

/// Accumulated token/cost totals over a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
}

impl UsageTotals {
    pub fn add(&mut self, usage: &UsageRecord) {
        self.prompt_tokens += usage.prompt_tokens.unwrap_or(0);
        self.completion_tokens += usage.completion_tokens.unwrap_or(0);
        self.total_tokens += usage.total_tokens.unwrap_or(0);
        self.cost += usage.cost.unwrap_or(0.0);
    }

    pub fn render_line(&self) -> String {
        let mut line = format!(
            "LLM totals — prompt_tokens={}, completion_tokens={}, total_tokens={}",
            self.prompt_tokens, self.completion_tokens, self.total_tokens
        );
        if self.cost > 0.0 {
            line.push_str(&format!(", cost=${:.6}", self.cost));
        }
        line
    }
}

/// Everything the report needs, borrowed from the runner.
pub struct ReportInputs<'a> {
    pub session_id: &'a str,
    pub goal_type: &'a str,
    pub goal_text: &'a str,
    pub final_report: &'a str,
    pub backend_name: &'a str,
    pub provider: &'a str,
    pub model: Option<&'a str>,
    pub language: &'a str,
    pub max_steps: u32,
    pub log_path: Option<&'a Path>,
    pub usage_entries: &'a [UsageRecord],
    pub usage_totals: &'a UsageTotals,
    pub attempts: &'a [Attempt],
}

fn usage_entry_line(index: usize, entry: &UsageRecord) -> String {
    let mut parts = vec![
        format!("provider={}", entry.provider),
        format!("model={}", entry.model),
    ];
    if let Some(v) = entry.prompt_tokens {
        parts.push(format!("prompt_tokens={v}"));
    }
    if let Some(v) = entry.completion_tokens {
        parts.push(format!("completion_tokens={v}"));
    }
    if let Some(v) = entry.total_tokens {
        parts.push(format!("total_tokens={v}"));
    }
    if let Some(v) = entry.cost {
        parts.push(format!("cost=${v:.6}"));
    }
    format!("- Call {index}: {}", parts.join(", "))
}

/// Render the full report document.
pub fn render_report(inputs: &ReportInputs<'_>) -> String {
    let mut lines: Vec<String> = vec![
        format!("# dbgagent report — {}", inputs.session_id),
        String::new(),
        format!("Goal: {}", inputs.goal_type),
        format!(
            "Goal notes: {}",
            if inputs.goal_text.is_empty() {
                "(none)"
            } else {
                inputs.goal_text
            }
        ),
        String::new(),
        "## Final Report".to_string(),
        inputs.final_report.trim().to_string(),
        String::new(),
        "## Session Details".to_string(),
        format!("Debugger backend: {}", inputs.backend_name),
        format!("LLM provider: {}", inputs.provider),
        format!("LLM model: {}", inputs.model.unwrap_or("(default)")),
        format!("Language: {}", inputs.language),
        format!("Max steps: {}", inputs.max_steps),
    ];
    if let Some(log) = inputs.log_path {
        lines.push(format!("Session log: {}", log.display()));
    }

    if !inputs.usage_entries.is_empty() {
        let totals = inputs.usage_totals;
        lines.push(String::new());
        lines.push("## LLM Usage".to_string());
        lines.push(format!("Total prompt tokens: {}", totals.prompt_tokens));
        lines.push(format!("Total completion tokens: {}", totals.completion_tokens));
        lines.push(format!("Total tokens: {}", totals.total_tokens));
        if totals.cost > 0.0 {
            lines.push(format!("Total estimated cost (USD): ${:.6}", totals.cost));
        }
        lines.push(String::new());
        lines.push("Per-call usage:".to_string());
        for (i, entry) in inputs.usage_entries.iter().enumerate() {
            lines.push(usage_entry_line(i + 1, entry));
        }
    }

    lines.push(String::new());
    lines.push("## Executed Commands".to_string());
    if inputs.attempts.is_empty() {
        lines.push("- (none)".to_string());
    } else {
        for attempt in inputs.attempts {
            lines.push(format!("- `{}`: {}", attempt.cmd, attempt.output_snippet));
        }
    }

    lines.push(String::new());
    lines.push("## Notes".to_string());
    lines.push(
        "You can edit this report and pass it back to dbgagent with --resume-from to continue the investigation."
            .to_string(),
    );
    lines.join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u64, completion: u64, cost: Option<f64>) -> UsageRecord {
        UsageRecord {
            provider: "deepseek".into(),
            model: "deepseek-chat".into(),
            prompt_tokens: Some(prompt),
            completion_tokens: Some(completion),
            total_tokens: Some(prompt + completion),
            cost,
        }
    }

    #[test]
    fn totals_accumulate_across_calls() {
        let mut totals = UsageTotals::default();
        totals.add(&usage(100, 20, Some(0.001)));
        totals.add(&usage(200, 30, None));
        assert_eq!(totals.prompt_tokens, 300);
        assert_eq!(totals.completion_tokens, 50);
        assert_eq!(totals.total_tokens, 350);
        assert!((totals.cost - 0.001).abs() < 1e-9);
    }

    #[test]
    fn report_carries_all_sections() {
        let entries = vec![usage(100, 20, Some(0.002))];
        let mut totals = UsageTotals::default();
        totals.add(&entries[0]);
        let attempts = vec![Attempt::new("bt", "#0 main () at main.c:4")];
        let inputs = ReportInputs {
            session_id: "ab12cd34",
            goal_type: "crash",
            goal_text: "segfault on startup",
            final_report: "Analysis Summary:\n- crash in main",
            backend_name: "gdb",
            provider: "deepseek",
            model: Some("deepseek-chat"),
            language: "en",
            max_steps: 16,
            log_path: None,
            usage_entries: &entries,
            usage_totals: &totals,
            attempts: &attempts,
        };
        let report = render_report(&inputs);
        assert!(report.starts_with("# dbgagent report — ab12cd34"));
        assert!(report.contains("Goal: crash"));
        assert!(report.contains("Goal notes: segfault on startup"));
        assert!(report.contains("## Final Report"));
        assert!(report.contains("## Session Details"));
        assert!(report.contains("Debugger backend: gdb"));
        assert!(report.contains("## LLM Usage"));
        assert!(report.contains("Total prompt tokens: 100"));
        assert!(report.contains("Total estimated cost (USD): $0.002000"));
        assert!(report.contains("- Call 1: provider=deepseek, model=deepseek-chat"));
        assert!(report.contains("## Executed Commands"));
        assert!(report.contains("- `bt`: #0 main () at main.c:4"));
        assert!(report.contains("## Notes"));
        assert!(report.contains("--resume-from"));
    }

    #[test]
    fn empty_goal_notes_render_placeholder() {
        let totals = UsageTotals::default();
        let inputs = ReportInputs {
            session_id: "x",
            goal_type: "hang",
            goal_text: "",
            final_report: "r",
            backend_name: "pdb",
            provider: "mock-local",
            model: None,
            language: "en",
            max_steps: 4,
            log_path: None,
            usage_entries: &[],
            usage_totals: &totals,
            attempts: &[],
        };
        let report = render_report(&inputs);
        assert!(report.contains("Goal notes: (none)"));
        assert!(report.contains("LLM model: (default)"));
        assert!(report.contains("- (none)"));
        assert!(!report.contains("## LLM Usage"), "no usage section without entries");
    }

    #[test]
    fn log_path_is_listed_when_present() {
        let totals = UsageTotals::default();
        let log = Path::new("/tmp/dbgagent-x.log");
        let inputs = ReportInputs {
            session_id: "x",
            goal_type: "crash",
            goal_text: "",
            final_report: "r",
            backend_name: "gdb",
            provider: "mock-local",
            model: None,
            language: "en",
            max_steps: 4,
            log_path: Some(log),
            usage_entries: &[],
            usage_totals: &totals,
            attempts: &[],
        };
        assert!(render_report(&inputs).contains("Session log: /tmp/dbgagent-x.log"));
    }
}
