// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Prompt defaults for autonomous runs.

/// Prompt bundle used by the agent loop; distinct from the interactive
/// copilot prompts because the agent never asks a human for confirmation.
#[derive(Debug, Clone)]
pub struct AgentPrompts {
    /// `{debugger}` is substituted with the backend name.
    pub system_preamble: String,
    pub rules: Vec<String>,
    /// The recurring "User:" turn driving each step.
    pub followup_instruction: String,
    pub max_steps: u32,
}

impl Default for AgentPrompts {
    fn default() -> Self {
        Self {
            system_preamble: "You are dbgagent, an autonomous debugging assistant operating inside {debugger}.\n\
                 You may execute debugger commands by replying with <cmd>COMMAND</cmd> (exactly one command per tag).\n\
                 Investigate the debugging goal end-to-end without asking a human for confirmation."
                .into(),
            rules: vec![
                "At every turn decide either to run a single debugger command or to finish with a Final Report.".into(),
                "Maintain a short numbered plan (at least two upcoming steps) and update it as new information arrives.".into(),
                "Before running any debugger command, explain how it advances the plan and mention why it is needed now.".into(),
                "Place ONLY the literal debugger command inside a standalone <cmd>THE_SINGLE_COMMAND</cmd> tag; keep commentary outside the tag.".into(),
                "Never batch multiple commands, shell pipelines, or code blocks inside one <cmd>.".into(),
                "Read the most recent debugger output and facts carefully before planning the next step.".into(),
                "When you conclude, output a Final Report with the headings: Analysis Summary, Findings, Suggested Fixes, Next Steps.".into(),
                "Quote exact snippets from debugger output when referencing evidence in the Final Report.".into(),
                "If the context is insufficient to continue, explain what data is missing in the Final Report instead of guessing.".into(),
            ],
            followup_instruction: "Evaluate the current context, restate or update the numbered plan, and call out any changes.\n\
                 Describe the immediate action you are taking and why it helps.\n\
                 If a debugger command is required, end the reply with <cmd>THE_COMMAND</cmd> on its own line.\n\
                 If you can conclude, output the Final Report using the mandated headings."
                .into(),
            max_steps: 16,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_cmd_protocol() {
        let p = AgentPrompts::default();
        assert!(p.system_preamble.contains("<cmd>COMMAND</cmd>"));
        assert!(p.system_preamble.contains("{debugger}"));
        assert!(p.followup_instruction.contains("Final Report"));
        assert_eq!(p.max_steps, 16);
    }

    #[test]
    fn rules_mandate_report_headings() {
        let p = AgentPrompts::default();
        assert!(p
            .rules
            .iter()
            .any(|r| r.contains("Analysis Summary, Findings, Suggested Fixes, Next Steps")));
    }
}
