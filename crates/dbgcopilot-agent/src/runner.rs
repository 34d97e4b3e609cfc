// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Core execution loop for autonomous runs.
//!
//! The runner seeds a debugger backend from the request (loading the
//! program or core file), then iterates up to `max_steps`: build the agent
//! prompt, call the provider, execute any `<cmd>` directive, and feed the
//! output into the next step.  A reply without a directive is the final
//! report; exhaustion produces a synthetic fallback.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use dbgcopilot_backend::{create_backend, DebuggerBackend, DebuggerKind, LaunchSpec};
use dbgcopilot_core::{extract_cmd, text, Attempt};
use dbgcopilot_model::{ProviderRegistry, SessionConfig, UsageRecord};

use crate::prompts::AgentPrompts;
use crate::report::{render_report, ReportInputs, UsageTotals};
use crate::session_log::SessionLog;

/// Everything a run needs, resolved by the CLI.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub debugger: DebuggerKind,
    pub provider: String,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub program: Option<String>,
    pub corefile: Option<String>,
    pub classpath: Option<String>,
    pub sourcepath: Option<String>,
    pub main_class: Option<String>,
    pub goal_type: String,
    pub goal_text: String,
    pub resume_context: Option<String>,
    pub max_steps: u32,
    pub language: String,
    pub log_path: Option<PathBuf>,
    pub report_path: PathBuf,
}

/// Mutable investigation state accumulated over the run.
#[derive(Debug, Default)]
pub struct AgentState {
    pub session_id: String,
    pub attempts: Vec<Attempt>,
    pub chatlog: Vec<String>,
    pub facts: Vec<String>,
    pub last_output: String,
}

pub struct AgentRunner {
    request: AgentRequest,
    state: AgentState,
    prompts: AgentPrompts,
    session_config: SessionConfig,
    registry: Arc<ProviderRegistry>,
    log: Option<SessionLog>,
    usage_entries: Vec<UsageRecord>,
    usage_totals: UsageTotals,
    backend: Option<Box<dyn DebuggerBackend>>,
}

impl AgentRunner {
    pub fn new(request: AgentRequest, registry: Arc<ProviderRegistry>) -> anyhow::Result<Self> {
        let log = match &request.log_path {
            Some(path) => Some(SessionLog::create(path)?),
            None => None,
        };

        let mut state = AgentState {
            session_id: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
            ..AgentState::default()
        };

        if let Some(resume) = &request.resume_context {
            state.facts.push("Prior session summary:".to_string());
            for line in resume.trim().lines() {
                state.facts.push(format!("  {}", line.trim()));
            }
        }
        if let Some(program) = &request.program {
            state.facts.push(format!("Program path: {program}"));
        }
        if let Some(core) = &request.corefile {
            state.facts.push(format!("Corefile: {core}"));
        }
        if request.debugger == DebuggerKind::Jdb {
            if let Some(cp) = &request.classpath {
                state.facts.push(format!("JDB classpath: {cp}"));
            }
            if let Some(sp) = &request.sourcepath {
                state.facts.push(format!("JDB sourcepath: {sp}"));
            }
            if let Some(mc) = &request.main_class {
                state.facts.push(format!("JDB main class: {mc}"));
            }
        }

        // Session-level model/key overrides for the selected provider.
        let mut session_config = SessionConfig::default();
        let provider_key = request.provider.replace('-', "_");
        if let Some(model) = &request.model {
            session_config.set(format!("{provider_key}_model"), model.clone());
        }
        if let Some(key) = &request.api_key {
            session_config.set(format!("{provider_key}_api_key"), key.clone());
        }

        Ok(Self {
            request,
            state,
            prompts: AgentPrompts::default(),
            session_config,
            registry,
            log,
            usage_entries: Vec::new(),
            usage_totals: UsageTotals::default(),
            backend: None,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    /// Run to completion and return the final report text.
    pub async fn run(self) -> anyhow::Result<String> {
        let spec = LaunchSpec {
            program: self.request.program.clone(),
            corefile: self.request.corefile.clone(),
            classpath: self.request.classpath.clone(),
            sourcepath: self.request.sourcepath.clone(),
            main_class: self.request.main_class.clone(),
            cwd: None,
        };
        let backend = create_backend(self.request.debugger, &spec)
            .await
            .context("initialising debugger backend")?;
        self.run_with_backend(backend).await
    }

    /// Run against an already-initialised backend.
    pub async fn run_with_backend(
        mut self,
        backend: Box<dyn DebuggerBackend>,
    ) -> anyhow::Result<String> {
        self.log(&format!("Starting dbgagent session {}", self.state.session_id));
        self.log(&format!("Debugger: {}", self.request.debugger));
        self.log(&format!(
            "Provider: {} | Model: {}",
            self.request.provider,
            self.request.model.as_deref().unwrap_or("(default)")
        ));
        self.log(&format!(
            "Goal: {} | Notes: {}",
            self.request.goal_type,
            if self.request.goal_text.is_empty() {
                "(none)"
            } else {
                &self.request.goal_text
            }
        ));
        self.log(&format!("Language: {}", self.request.language));

        let backend_name = backend.name();
        self.log(&format!("Using debugger backend: {backend_name}"));
        self.state.facts.push(format!("Debugger backend: {backend_name}"));
        if let Some(startup) = backend.startup_output() {
            let trimmed = startup.trim();
            if !trimmed.is_empty() {
                self.state.facts.push(trimmed.to_string());
            }
        }
        self.backend = Some(backend);

        self.prepare_debugger().await;
        let final_report = self.auto_loop().await?;
        self.write_report(&final_report)?;

        if let Some(mut backend) = self.backend.take() {
            backend.close().await;
        }
        Ok(final_report)
    }

    /// Seed the session: load the program/core per debugger family.
    async fn prepare_debugger(&mut self) {
        self.log("Preparing debugger session");
        let mut commands: Vec<String> = Vec::new();
        match self.request.debugger {
            DebuggerKind::Gdb | DebuggerKind::RustGdb => {
                if let Some(program) = &self.request.program {
                    commands.push(format!("file {program}"));
                }
                if let Some(core) = &self.request.corefile {
                    commands.push(format!("core-file {core}"));
                }
            }
            DebuggerKind::Lldb | DebuggerKind::LldbRust => {
                match (&self.request.program, &self.request.corefile) {
                    (Some(program), Some(core)) => {
                        commands.push(format!("target create {program} --core {core}"));
                    }
                    (None, Some(core)) => commands.push(format!("target create --core {core}")),
                    (Some(program), None) => commands.push(format!("target create {program}")),
                    (None, None) => {}
                }
            }
            DebuggerKind::Pdb => {
                if let Some(program) = &self.request.program {
                    commands.push(format!("file {program}"));
                }
            }
            // jdb configuration was already recorded as facts; Delve and
            // radare2 load the program during initialisation.
            DebuggerKind::Jdb | DebuggerKind::Delve | DebuggerKind::Radare2 => {}
        }
        for cmd in commands {
            let out = self
                .backend
                .as_mut()
                .expect("backend set before prepare")
                .run_command(&cmd, None)
                .await;
            self.record_execution(&cmd, &out);
        }
    }

    /// The step loop.
    async fn auto_loop(&mut self) -> anyhow::Result<String> {
        // The CLI bound wins; the prompt default only seeds the CLI's own
        // default value.
        let max_steps = self.request.max_steps.max(1);
        let backend_name = self
            .backend
            .as_ref()
            .map(|b| b.name())
            .unwrap_or(self.request.debugger.as_str());

        let system_preamble = self
            .prompts
            .system_preamble
            .replace("{debugger}", backend_name);
        let rules_text = self
            .prompts
            .rules
            .iter()
            .map(|r| format!("- {r}"))
            .collect::<Vec<_>>()
            .join("\n");
        let followup = self.prompts.followup_instruction.clone();
        let language_instruction = self.language_instruction();

        let mut client = self
            .registry
            .create_client(&self.request.provider, &self.session_config)
            .with_context(|| format!("Unknown provider: {}", self.request.provider))?;

        for step in 1..=max_steps {
            let prompt = self.build_prompt(&system_preamble, &rules_text, &followup, &language_instruction);
            let answer = client
                .ask(&prompt)
                .await
                .with_context(|| format!("provider call failed at step {step}"))?;
            if let Some(usage) = client.last_usage.clone() {
                self.record_usage(usage);
            }
            let answer = answer.trim().to_string();
            self.log(&format!("LLM step {step} response:\n{answer}"));
            self.state.chatlog.push(format!("Assistant: {answer}"));

            if let Some(cmd) = extract_cmd(&answer) {
                self.log(&format!("Executing command: {cmd}"));
                let out = self
                    .backend
                    .as_mut()
                    .context("debugger backend not initialized")?
                    .run_command(&cmd, None)
                    .await;
                self.record_execution(&cmd, &out);
                continue;
            }

            if answer.is_empty() {
                // Nothing actionable this step; keep iterating.
                continue;
            }
            // Explanation-only reply: the final report.
            info!(step, "agent produced final report");
            return Ok(answer);
        }

        self.log("Reached maximum iterations without final report");
        Ok(fallback_report())
    }

    fn build_prompt(
        &self,
        system_preamble: &str,
        rules_text: &str,
        followup: &str,
        language_instruction: &str,
    ) -> String {
        let mut context_lines: Vec<String> = Vec::new();
        context_lines.push(format!("Goal category: {}", self.request.goal_type));
        if !self.request.goal_text.is_empty() {
            context_lines.push(format!("Goal notes: {}", self.request.goal_text));
        }
        if let Some(resume) = &self.request.resume_context {
            context_lines.push("Loaded prior report:".to_string());
            context_lines.push(resume.trim().to_string());
        }
        if !self.state.facts.is_empty() {
            context_lines.push("Recent observations:".to_string());
            let start = self.state.facts.len().saturating_sub(10);
            context_lines.extend(self.state.facts[start..].iter().cloned());
        }
        if !self.state.attempts.is_empty() {
            context_lines.push("Recent commands:".to_string());
            let start = self.state.attempts.len().saturating_sub(5);
            for a in &self.state.attempts[start..] {
                context_lines.push(format!("- {}: {}", a.cmd, a.output_snippet));
            }
        }
        if !self.state.last_output.is_empty() {
            context_lines.push("Latest debugger output:".to_string());
            context_lines.push(text::head_tail_truncate(&self.state.last_output, 1200));
        }

        let mut parts: Vec<String> = vec![system_preamble.to_string()];
        if !rules_text.is_empty() {
            parts.push(format!("Rules:\n{rules_text}"));
        }
        if !language_instruction.is_empty() {
            parts.push(language_instruction.to_string());
        }
        if !context_lines.is_empty() {
            parts.push(format!("Context:\n{}", context_lines.join("\n")));
        }
        parts.push(format!("User: {followup}"));
        parts.push("Assistant:".to_string());
        parts.join("\n\n")
    }

    fn language_instruction(&self) -> String {
        match self.request.language.to_lowercase().as_str() {
            "en" | "en-us" | "en-gb" | "english" => {
                "Respond in English. Do not switch languages unless explicitly requested.".to_string()
            }
            "zh" | "zh-cn" | "zh-hans" | "chinese" => {
                "请使用简体中文回答，并且仅在收到明确指示时切换语言。".to_string()
            }
            _ => format!(
                "Respond in {}. Do not switch languages unless explicitly requested.",
                self.request.language
            ),
        }
    }

    fn record_execution(&mut self, cmd: &str, output: &str) {
        let clean = text::strip_ansi(output);
        self.state.attempts.push(Attempt::new(cmd, &clean));
        self.state.last_output = clean.clone();
        let first_line = clean.lines().next().unwrap_or("").trim();
        let first_line = if first_line.is_empty() {
            "(no output)"
        } else {
            first_line
        };
        self.state.facts.push(format!("Executed '{cmd}': {first_line}"));
        self.state
            .chatlog
            .push(format!("Assistant: (executed) {cmd}\n{clean}"));
        self.log(&format!(
            "Output:\n{}",
            if clean.trim().is_empty() {
                "(no output)"
            } else {
                clean.trim()
            }
        ));
    }

    fn record_usage(&mut self, usage: UsageRecord) {
        if usage.prompt_tokens.is_none()
            && usage.completion_tokens.is_none()
            && usage.total_tokens.is_none()
            && usage.cost.is_none()
        {
            return;
        }
        self.usage_totals.add(&usage);
        let mut parts = vec![
            format!("provider={}", usage.provider),
            format!("model={}", usage.model),
        ];
        if let Some(v) = usage.prompt_tokens {
            parts.push(format!("prompt_tokens={v}"));
        }
        if let Some(v) = usage.completion_tokens {
            parts.push(format!("completion_tokens={v}"));
        }
        if let Some(v) = usage.total_tokens {
            parts.push(format!("total_tokens={v}"));
        }
        if let Some(v) = usage.cost {
            parts.push(format!("cost=${v:.6}"));
        }
        self.log(&format!("LLM usage: {}", parts.join(", ")));
        self.usage_entries.push(usage);
    }

    fn write_report(&mut self, final_report: &str) -> anyhow::Result<()> {
        let backend_name = self
            .backend
            .as_ref()
            .map(|b| b.name())
            .unwrap_or(self.request.debugger.as_str());
        let inputs = ReportInputs {
            session_id: &self.state.session_id,
            goal_type: &self.request.goal_type,
            goal_text: &self.request.goal_text,
            final_report,
            backend_name,
            provider: &self.request.provider,
            model: self.request.model.as_deref(),
            language: &self.request.language,
            max_steps: self.request.max_steps,
            log_path: self.request.log_path.as_deref(),
            usage_entries: &self.usage_entries,
            usage_totals: &self.usage_totals,
            attempts: &self.state.attempts,
        };
        let content = render_report(&inputs);

        if let Some(parent) = self.request.report_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&self.request.report_path, content).with_context(|| {
            format!("writing report to {}", self.request.report_path.display())
        })?;

        if !self.usage_entries.is_empty() {
            let line = self.usage_totals.render_line();
            self.log(&line);
        }
        self.log(&format!(
            "Report written to {}",
            self.request.report_path.display()
        ));
        Ok(())
    }

    fn log(&mut self, message: &str) {
        if let Some(log) = self.log.as_mut() {
            log.log(message);
        }
    }
}

/// Synthetic report when the step budget runs out.
fn fallback_report() -> String {
    [
        "Final Report",
        "Analysis Summary:\n- Reached max iterations without definitive conclusion.",
        "Findings:\n- Review executed commands and captured outputs above for clues.",
        "Suggested Fixes:\n- Collect additional data or adjust dbgagent max-steps to continue.",
        "Next Steps:\n- Provide more context or inspect the latest output manually.",
    ]
    .join("\n\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct ScriptedBackend {
        executed: Vec<String>,
    }

    #[async_trait]
    impl DebuggerBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "gdb"
        }
        fn prompt(&self) -> String {
            "(gdb) ".to_string()
        }
        fn startup_output(&self) -> Option<String> {
            Some("Reading symbols from ./a.out".to_string())
        }
        async fn initialize(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn run_command(&mut self, cmd: &str, _timeout: Option<Duration>) -> String {
            self.executed.push(cmd.to_string());
            format!("output of {cmd}")
        }
        async fn close(&mut self) {}
    }

    fn scripted_registry(replies: &[&str]) -> (tempfile::TempDir, Arc<ProviderRegistry>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llm_providers.json");
        let file = json!({
            "providers": { "scripted": { "kind": "mock", "replies": replies } }
        });
        std::fs::write(&path, serde_json::to_string_pretty(&file).unwrap()).unwrap();
        (dir, Arc::new(ProviderRegistry::with_path(path).unwrap()))
    }

    fn request(report_path: PathBuf, max_steps: u32) -> AgentRequest {
        AgentRequest {
            debugger: DebuggerKind::Gdb,
            provider: "scripted".into(),
            model: None,
            api_key: None,
            program: Some("./a.out".into()),
            corefile: None,
            classpath: None,
            sourcepath: None,
            main_class: None,
            goal_type: "crash".into(),
            goal_text: "why does it segfault".into(),
            resume_context: None,
            max_steps,
            language: "en".into(),
            log_path: None,
            report_path,
        }
    }

    #[tokio::test]
    async fn run_executes_commands_until_final_report() {
        let (_reg_dir, registry) = scripted_registry(&[
            "Plan: look at the stack.\n<cmd>bt</cmd>",
            "Final Report\n\nAnalysis Summary:\n- crash in main\n\nFindings:\n- null pointer",
        ]);
        let dir = tempfile::tempdir().unwrap();
        let report_path = dir.path().join("report.md");
        let runner = AgentRunner::new(request(report_path.clone(), 8), registry).unwrap();
        let final_report = runner
            .run_with_backend(Box::new(ScriptedBackend { executed: Vec::new() }))
            .await
            .unwrap();

        assert!(final_report.contains("crash in main"));
        let report = std::fs::read_to_string(&report_path).unwrap();
        assert!(report.contains("# dbgagent report — "));
        // The prepare step loads the program, then the model's bt runs.
        assert!(report.contains("- `file ./a.out`:"));
        assert!(report.contains("- `bt`: output of bt"));
        assert!(report.contains("## Final Report"));
    }

    #[tokio::test]
    async fn exhausted_steps_fall_back_to_synthetic_report() {
        let (_reg_dir, registry) =
            scripted_registry(&["<cmd>bt</cmd>", "<cmd>info locals</cmd>", "<cmd>bt</cmd>"]);
        let dir = tempfile::tempdir().unwrap();
        let report_path = dir.path().join("report.md");
        let runner = AgentRunner::new(request(report_path.clone(), 3), registry).unwrap();
        let final_report = runner
            .run_with_backend(Box::new(ScriptedBackend { executed: Vec::new() }))
            .await
            .unwrap();
        assert!(final_report.contains("Reached max iterations"));
        assert!(std::fs::read_to_string(&report_path)
            .unwrap()
            .contains("Reached max iterations"));
    }

    #[tokio::test]
    async fn unknown_provider_is_an_error() {
        let (_reg_dir, registry) = scripted_registry(&[]);
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(dir.path().join("report.md"), 2);
        req.provider = "ghost".into();
        let runner = AgentRunner::new(req, registry).unwrap();
        let err = runner
            .run_with_backend(Box::new(ScriptedBackend { executed: Vec::new() }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn resume_context_seeds_facts() {
        let (_reg_dir, registry) = scripted_registry(&[]);
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(dir.path().join("report.md"), 2);
        req.resume_context = Some("Earlier run found a heap overflow.".into());
        let runner = AgentRunner::new(req, registry).unwrap();
        assert!(runner.state.facts.iter().any(|f| f == "Prior session summary:"));
        assert!(runner
            .state
            .facts
            .iter()
            .any(|f| f.contains("heap overflow")));
    }

    #[tokio::test]
    async fn session_log_captures_steps() {
        let (_reg_dir, registry) = scripted_registry(&["<cmd>bt</cmd>", "Final Report: done"]);
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("run.log");
        let mut req = request(dir.path().join("report.md"), 4);
        req.log_path = Some(log_path.clone());
        let runner = AgentRunner::new(req, registry).unwrap();
        let _ = runner
            .run_with_backend(Box::new(ScriptedBackend { executed: Vec::new() }))
            .await
            .unwrap();
        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("Starting dbgagent session"));
        assert!(log.contains("Executing command: bt"));
        assert!(log.contains("Report written to"));
    }

    #[test]
    fn language_instruction_covers_en_zh_and_other() {
        let (_reg_dir, registry) = scripted_registry(&[]);
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(dir.path().join("r.md"), 1);
        req.language = "en".into();
        let runner = AgentRunner::new(req.clone(), registry.clone()).unwrap();
        assert!(runner.language_instruction().contains("Respond in English"));

        req.language = "zh".into();
        let runner = AgentRunner::new(req.clone(), registry.clone()).unwrap();
        assert!(runner.language_instruction().contains("简体中文"));

        req.language = "fr".into();
        let runner = AgentRunner::new(req, registry).unwrap();
        assert!(runner.language_instruction().contains("Respond in fr"));
    }

    #[test]
    fn model_and_key_land_in_session_config() {
        let (_reg_dir, registry) = scripted_registry(&[]);
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(dir.path().join("r.md"), 1);
        req.provider = "deepseek".into();
        req.model = Some("deepseek-reasoner".into());
        req.api_key = Some("sk-secret".into());
        let runner = AgentRunner::new(req, registry).unwrap();
        assert_eq!(
            runner.session_config.get("deepseek_model"),
            Some("deepseek-reasoner")
        );
        assert_eq!(runner.session_config.get("deepseek_api_key"), Some("sk-secret"));
    }
}
