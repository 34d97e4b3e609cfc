// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The interactive `copilot>` REPL.
//!
//! Slash commands manage the debugger, provider, and session; any other
//! input goes to the orchestrator.  Debugger output is streamed through a
//! print sink the moment a command executes; chat output that the
//! orchestrator buffered is drained and printed after each turn.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use dbgcopilot_backend::{create_backend, DebuggerKind, LaunchSpec};
use dbgcopilot_core::text::{color_text, Color};
use dbgcopilot_core::{resolve_auto_round_limit, Orchestrator, SessionState};
use dbgcopilot_model::{params, ProviderRegistry};

use crate::cli::Cli;

const HELP_TEXT: &str = "\
copilot> commands:
  /help                          Show this help
  /use <debugger>                Select gdb|rust-gdb|lldb|lldb-rust|jdb|pdb|delve|radare2
  /colors on|off                 Toggle colored output in REPL and debugger
  /new                           Start a new copilot session
  /chatlog                       Show chat transcript
  /config                        Show current config
  /auto [on|off|toggle|status]   Control auto-accept for proposed commands
  /prompts show|reload           Show or reload prompt config
  /exec <cmd>                    Run a debugger command directly
  /llm list                      List LLM providers
  /llm use <name>                Select provider
  /llm models [provider]         List models for a provider
  /llm model [get|set|session] … Inspect or set the model for a provider
  /llm provider <action> …       list|path|reload|show|get|set|add
  /llm params <action> …         list|get|set|clear session parameters
  /llm key <provider> <key>      Set API key for provider (session only)
  exit or quit                   Leave copilot>
Any other input is sent to the LLM.";

pub struct Repl {
    cli: Cli,
    registry: Arc<ProviderRegistry>,
    orch: Option<Orchestrator>,
    // Holds the session until a debugger is selected; `Some` iff `orch` is
    // `None`.
    saved_state: Option<SessionState>,
}

impl Repl {
    pub fn new(cli: Cli, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            cli,
            registry,
            orch: None,
            saved_state: Some(SessionState::new()),
        }
    }

    fn state(&self) -> &SessionState {
        match self.orch.as_ref() {
            Some(o) => &o.state,
            None => self.saved_state.as_ref().expect("state when no orchestrator"),
        }
    }

    fn state_mut(&mut self) -> &mut SessionState {
        match self.orch.as_mut() {
            Some(o) => &mut o.state,
            None => self.saved_state.as_mut().expect("state when no orchestrator"),
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        println!(
            "[copilot] Standalone REPL. Type /help. Choose a debugger with /use <debugger>."
        );

        if let Some(provider) = self.cli.llm_provider.clone() {
            println!("{}", self.select_provider(&provider));
        }
        if let Some(debugger) = self.cli.debugger.clone() {
            let msg = self.select_debugger(&debugger).await;
            println!("{msg}");
        }

        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        loop {
            prompt();
            let Some(line) = lines.next_line().await.context("reading stdin")? else {
                println!("[copilot] Exiting copilot>");
                break;
            };
            let cmd = line.trim().to_string();
            if cmd.is_empty() {
                continue;
            }
            if cmd == "exit" || cmd == "quit" {
                println!("[copilot] Exiting copilot>");
                break;
            }
            if cmd.starts_with('/') {
                self.handle_slash(&cmd).await;
            } else {
                self.handle_chat(&cmd).await;
            }
        }

        if let Some(orch) = self.orch.as_mut() {
            orch.close().await;
        }
        Ok(())
    }

    // ── Chat turns ────────────────────────────────────────────────────────────

    async fn handle_chat(&mut self, text: &str) {
        let Some(orch) = self.orch.as_mut() else {
            println!("[copilot] No debugger selected. Use /use gdb first.");
            return;
        };
        let reply = orch.ask(text).await;
        if !reply.is_empty() {
            println!("{reply}");
        }
        for chunk in orch.state.take_pending_chat() {
            println!("{chunk}");
        }
        // Structured events target the HTTP front-end; the confirmation text
        // already carries the same information here.
        let _ = orch.state.take_pending_chat_events();
        for chunk in orch.state.take_pending_outputs() {
            println!("{chunk}");
        }
    }

    // ── Slash commands ────────────────────────────────────────────────────────

    async fn handle_slash(&mut self, cmd: &str) {
        let (verb, arg) = match cmd.split_once(char::is_whitespace) {
            Some((v, rest)) => (v, rest.trim()),
            None => (cmd, ""),
        };
        match verb {
            "/help" | "/h" => println!("{HELP_TEXT}"),
            "/use" => {
                let msg = self.select_debugger(arg).await;
                println!("{msg}");
            }
            "/colors" => {
                let msg = self.handle_colors(arg).await;
                println!("{msg}");
            }
            "/new" => {
                let id = match self.orch.as_mut() {
                    Some(orch) => orch.new_session(),
                    None => {
                        let state = self.state_mut();
                        state.rotate_id();
                        state.clear_history();
                        state.session_id.clone()
                    }
                };
                println!("[copilot] New session: {id}");
            }
            "/chatlog" => {
                let log = &self.state().chatlog;
                if log.is_empty() {
                    println!("[copilot] No chat yet.");
                } else {
                    let start = log.len().saturating_sub(200);
                    for line in &log[start..] {
                        println!("{line}");
                    }
                }
            }
            "/config" => println!("{}", self.render_config()),
            "/auto" => println!("{}", self.handle_auto(arg)),
            "/prompts" => {
                let msg = self.handle_prompts(arg);
                println!("{msg}");
            }
            "/exec" => self.handle_exec(arg).await,
            "/llm" => {
                let msg = self.handle_llm(arg).await;
                println!("{msg}");
            }
            _ => println!("[copilot] Unknown slash command. Try /help"),
        }
    }

    async fn select_debugger(&mut self, choice: &str) -> String {
        let Some(kind) = DebuggerKind::parse(choice) else {
            return "[copilot] Supported: /use gdb | rust-gdb | lldb | lldb-rust | jdb | pdb | delve | radare2"
                .to_string();
        };
        let spec = LaunchSpec {
            program: self.cli.program.clone(),
            corefile: self.cli.corefile.clone(),
            classpath: self.cli.classpath.clone(),
            sourcepath: self.cli.sourcepath.clone(),
            main_class: self.cli.main_class.clone(),
            cwd: None,
        };
        let backend = match create_backend(kind, &spec).await {
            Ok(b) => b,
            Err(e) => return format!("[copilot] Failed to start {kind}: {e}"),
        };

        // Carry the session over; close any previous backend.
        let mut state = match self.orch.take() {
            Some(mut old) => {
                let state = std::mem::take(&mut old.state);
                old.close().await;
                state
            }
            None => self.saved_state.take().expect("state when no orchestrator"),
        };
        // Debugger output prints the moment a command executes.
        state.debugger_output_sink = Some(Box::new(|chunk: &str| println!("{chunk}")));

        let name = backend.name();
        let startup = backend.startup_output();
        self.orch = Some(Orchestrator::new(backend, state, self.registry.clone()));
        if let Some(banner) = startup {
            if !banner.trim().is_empty() {
                println!("{}", banner.trim());
            }
        }
        format!("[copilot] Using {name}.")
    }

    fn select_provider(&mut self, name: &str) -> String {
        if self.registry.get_provider(name).is_none() {
            return format!("[copilot] Unknown provider: {name}");
        }
        self.state_mut().selected_provider = Some(name.to_string());
        format!("[copilot] Selected provider: {name}")
    }

    async fn handle_colors(&mut self, arg: &str) -> String {
        let enable = match arg.to_lowercase().as_str() {
            "on" => true,
            "off" => false,
            _ => return "Usage: /colors on|off".to_string(),
        };
        self.state_mut().colors_enabled = enable;
        if let Some(orch) = self.orch.as_mut() {
            let toggle = match orch.backend_name() {
                "lldb" | "rust-lldb" | "lldb-rust" => Some(format!(
                    "settings set use-color {}",
                    if enable { "true" } else { "false" }
                )),
                "gdb" | "rust-gdb" => Some(format!(
                    "set style enabled {}",
                    if enable { "on" } else { "off" }
                )),
                _ => None,
            };
            if let Some(cmd) = toggle {
                let _ = orch.backend_command(&cmd).await;
            }
        }
        format!(
            "[copilot] Colors {}.",
            if enable { "enabled" } else { "disabled" }
        )
    }

    fn handle_auto(&mut self, arg: &str) -> String {
        let state = self.state_mut();
        let target = match arg.to_lowercase().as_str() {
            "on" => Some(true),
            "off" => Some(false),
            "toggle" => Some(!state.auto_accept_commands),
            "" | "status" => None,
            _ => return "Usage: /auto [on|off|toggle|status]".to_string(),
        };
        if let Some(enable) = target {
            state.auto_accept_commands = enable;
            state.auto_rounds_remaining = if enable {
                Some(resolve_auto_round_limit(&state.config))
            } else {
                None
            };
        }
        if state.auto_accept_commands {
            format!(
                "[copilot] Auto-accept is on ({} round(s) remaining).",
                state
                    .auto_rounds_remaining
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unbounded".to_string())
            )
        } else {
            "[copilot] Auto-accept is off.".to_string()
        }
    }

    fn handle_prompts(&mut self, arg: &str) -> String {
        let Some(orch) = self.orch.as_mut() else {
            return "[copilot] No debugger selected.".to_string();
        };
        match arg.to_lowercase().as_str() {
            "show" => format!(
                "[copilot] Prompt source: {}\n{}",
                orch.prompt_config().source,
                orch.prompt_config().render()
            ),
            "reload" => orch.reload_prompts(),
            _ => "Usage: /prompts show | /prompts reload".to_string(),
        }
    }

    async fn handle_exec(&mut self, arg: &str) {
        let Some(orch) = self.orch.as_mut() else {
            println!("[copilot] No debugger selected. Use /use gdb first.");
            return;
        };
        if arg.is_empty() {
            println!("[copilot] Usage: /exec <cmd>");
            return;
        }
        let label = format!("{}> {arg}", orch.backend_name());
        println!(
            "{}",
            color_text(&label, Color::Cyan, true, orch.state.colors_enabled)
        );
        let out = orch.exec_direct(arg).await;
        if !out.is_empty() {
            println!("{out}");
        }
    }

    /// Render session config without ever echoing API keys.
    fn render_config(&self) -> String {
        let state = self.state();
        let mut lines = vec![format!("[copilot] Session: {}", state.session_id)];
        lines.push(format!(
            "Selected provider: {}",
            state.selected_provider.as_deref().unwrap_or("(none)")
        ));
        lines.push(format!(
            "Auto-accept: {}{}",
            if state.auto_accept_commands { "on" } else { "off" },
            state
                .auto_rounds_remaining
                .map(|n| format!(" ({n} round(s) remaining)"))
                .unwrap_or_default()
        ));
        lines.push(format!(
            "Colors: {}",
            if state.colors_enabled { "on" } else { "off" }
        ));
        let mut keys: Vec<&String> = state.config.values.keys().collect();
        keys.sort();
        for key in keys {
            let value = &state.config.values[key];
            lines.push(format!("  {key} = {}", redact_config_value(key, value)));
        }
        for (store, params) in &state.config.params {
            let rendered = params
                .iter()
                .map(|(k, v)| format!("{k}={}", params::serialize_value(v)))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("  {store} = {{{rendered}}}"));
        }
        lines.join("\n")
    }

    // ── /llm dispatch ─────────────────────────────────────────────────────────

    async fn handle_llm(&mut self, arg: &str) -> String {
        let mut parts = arg.split_whitespace();
        let action = parts.next().unwrap_or("");
        let rest: Vec<&str> = parts.collect();

        match action {
            "list" => {
                let mut lines = vec!["Available LLM providers:".to_string()];
                for name in self.registry.list_providers() {
                    lines.push(format!("- {name}"));
                }
                lines.join("\n")
            }
            "use" => match rest.first() {
                Some(name) => self.select_provider(name),
                None => "Usage: /llm use <name>".to_string(),
            },
            "models" => self.llm_models(rest.first().copied()).await,
            "model" => self.llm_model(&rest),
            "provider" => self.llm_provider(&rest),
            "params" => self.llm_params(&rest),
            "key" => self.llm_key(&rest),
            _ => "Usage: /llm list | use <name> | models [provider] | model … | provider … | params … | key <provider> <key>"
                .to_string(),
        }
    }

    async fn llm_models(&mut self, provider: Option<&str>) -> String {
        let provider = match provider
            .map(str::to_string)
            .or_else(|| self.state().selected_provider.clone())
        {
            Some(p) => p,
            None => {
                return "[copilot] No provider selected. Use /llm use <name> first or pass a provider."
                    .to_string()
            }
        };
        let Some(entry) = self.registry.get_provider(&provider) else {
            return format!("[copilot] Unknown provider: {provider}");
        };
        let config = self.state().config.clone();
        match self.registry.list_models(&provider, &config).await {
            Ok(models) if models.is_empty() => {
                if entry.supports_model_list {
                    format!(
                        "[copilot] No models returned from {provider}. You may need to set an API key."
                    )
                } else {
                    format!("[copilot] {provider} does not expose model listing; you can still set a model with /llm model.")
                }
            }
            Ok(models) => {
                let mut lines = vec![format!("{provider} models:")];
                lines.extend(models.into_iter().map(|m| format!("- {m}")));
                lines.join("\n")
            }
            Err(e) => format!("[copilot] Error listing models for {provider}: {e}"),
        }
    }

    fn llm_model(&mut self, rest: &[&str]) -> String {
        const USAGE: &str =
            "Usage: /llm model get [provider] | set <provider> <model> | session [provider] <model> | [provider] <model>";
        match rest.first().copied() {
            Some("get") => {
                let provider = rest
                    .get(1)
                    .map(|s| s.to_string())
                    .or_else(|| self.state().selected_provider.clone());
                let Some(provider) = provider else {
                    return USAGE.to_string();
                };
                let default = self
                    .registry
                    .get_provider_field(&provider, Some("model"))
                    .map(|v| v.as_str().unwrap_or("(unset)").to_string())
                    .unwrap_or_else(|e| format!("error: {e}"));
                let session_key = format!("{}_model", provider.replace('-', "_"));
                let session = self
                    .state()
                    .config
                    .get(&session_key)
                    .unwrap_or("(none)")
                    .to_string();
                format!(
                    "[copilot] {provider} model — registry default: {default}, session override: {session}"
                )
            }
            Some("set") => {
                let (Some(provider), Some(model)) = (rest.get(1), rest.get(2)) else {
                    return USAGE.to_string();
                };
                match self.registry.set_provider_field(provider, "model", model) {
                    Ok(_) => format!("[copilot] {provider} default model set to: {model}"),
                    Err(e) => format!("[copilot] {e}"),
                }
            }
            Some("session") => {
                let (provider, model) = match (rest.get(1), rest.get(2)) {
                    (Some(p), Some(m)) => (p.to_string(), m.to_string()),
                    (Some(m), None) => {
                        let Some(p) = self.state().selected_provider.clone() else {
                            return USAGE.to_string();
                        };
                        (p, m.to_string())
                    }
                    _ => return USAGE.to_string(),
                };
                self.set_session_model(&provider, &model)
            }
            Some(first) => {
                // Compatibility form: `/llm model [provider] <model>`.
                if rest.len() == 1 {
                    let Some(provider) = self.state().selected_provider.clone() else {
                        return USAGE.to_string();
                    };
                    self.set_session_model(&provider, first)
                } else {
                    let model = rest[1..].join(" ");
                    self.set_session_model(first, &model)
                }
            }
            None => USAGE.to_string(),
        }
    }

    fn set_session_model(&mut self, provider: &str, model: &str) -> String {
        if self.registry.get_provider(provider).is_none() {
            return format!("[copilot] Unknown provider: {provider}");
        }
        let key = format!("{}_model", provider.replace('-', "_"));
        self.state_mut().config.set(key, model);
        format!("[copilot] {provider} model set to: {model}")
    }

    fn llm_provider(&mut self, rest: &[&str]) -> String {
        const USAGE: &str = "Usage: /llm provider list | path | reload | show <name> | get <name> [field] | set <name> <field> <value> | add <name> <base_url> [path] [model] [desc]";
        match rest.first().copied() {
            Some("list") => {
                let mut lines = vec!["Configured providers:".to_string()];
                for name in self.registry.list_providers() {
                    let desc = self
                        .registry
                        .get_provider(&name)
                        .map(|e| e.description)
                        .unwrap_or_default();
                    lines.push(format!("- {name}: {desc}"));
                }
                lines.join("\n")
            }
            Some("path") => format!(
                "[copilot] Provider config: {}",
                self.registry.config_path().display()
            ),
            Some("reload") => match self.registry.reload() {
                Ok(()) => "[copilot] Provider registry reloaded.".to_string(),
                Err(e) => format!("[copilot] Reload failed: {e}"),
            },
            Some("show") => match rest.get(1) {
                Some(name) => match self.registry.get_provider_field(name, None) {
                    Ok(entry) => serde_json::to_string_pretty(&entry)
                        .unwrap_or_else(|e| format!("[copilot] {e}")),
                    Err(e) => format!("[copilot] {e}"),
                },
                None => USAGE.to_string(),
            },
            Some("get") => match rest.get(1) {
                Some(name) => {
                    match self
                        .registry
                        .get_provider_field(name, rest.get(2).copied())
                    {
                        Ok(value) => format!("{value}"),
                        Err(e) => format!("[copilot] {e}"),
                    }
                }
                None => USAGE.to_string(),
            },
            Some("set") => match (rest.get(1), rest.get(2), rest.get(3)) {
                (Some(name), Some(field), Some(_)) => {
                    let value = rest[3..].join(" ");
                    match self.registry.set_provider_field(name, field, &value) {
                        Ok(v) => format!("[copilot] {name}.{field} = {v}"),
                        Err(e) => format!("[copilot] {e}"),
                    }
                }
                _ => USAGE.to_string(),
            },
            Some("add") => match (rest.get(1), rest.get(2)) {
                (Some(name), Some(base_url)) => {
                    let path = rest.get(3).copied();
                    let model = rest.get(4).copied();
                    let desc = if rest.len() > 5 { rest[5..].join(" ") } else { String::new() };
                    match self
                        .registry
                        .add_provider(name, base_url, path, model, &desc)
                    {
                        Ok(_) => format!("[copilot] Provider '{name}' added."),
                        Err(e) => format!("[copilot] {e}"),
                    }
                }
                _ => USAGE.to_string(),
            },
            _ => USAGE.to_string(),
        }
    }

    fn llm_params(&mut self, rest: &[&str]) -> String {
        const USAGE: &str =
            "Usage: /llm params list | get <param> | set <param> <value> | clear <param|all>";
        let Some(provider) = self.state().selected_provider.clone() else {
            return "[copilot] No provider selected. Use /llm use <name> first.".to_string();
        };
        let Some(entry) = self.registry.get_provider(&provider) else {
            return format!("[copilot] Unknown provider: {provider}");
        };
        let aliases = entry.alias_map();

        match rest.first().copied() {
            Some("list") | None => {
                let store = params::get_session_params(&self.state().config, &provider);
                let mut lines = vec![format!("[copilot] {provider} parameters:")];
                if entry.capabilities.is_empty() {
                    lines.push("  capabilities: (none declared)".to_string());
                } else {
                    lines.push(format!("  capabilities: {}", entry.capabilities.join(", ")));
                }
                if store.is_empty() {
                    lines.push("  overrides: (none)".to_string());
                } else {
                    for (canonical, value) in &store {
                        lines.push(format!(
                            "  {} = {}",
                            params::display_name(&aliases, canonical),
                            params::serialize_value(value)
                        ));
                    }
                }
                lines.join("\n")
            }
            Some("get") => match rest.get(1) {
                Some(name) => {
                    let canonical = match params::canonicalize(&aliases, name) {
                        Ok(c) => c,
                        Err(e) => return format!("[copilot] {e}"),
                    };
                    let store = params::get_session_params(&self.state().config, &provider);
                    match store.get(&canonical) {
                        Some(v) => format!("{canonical} = {}", params::serialize_value(v)),
                        None => format!("{canonical} = (unset)"),
                    }
                }
                None => USAGE.to_string(),
            },
            Some("set") => match (rest.get(1), rest.get(2)) {
                (Some(name), Some(_)) => {
                    let raw = rest[2..].join(" ");
                    let canonical = match params::canonicalize(&aliases, name) {
                        Ok(c) => c,
                        Err(e) => return format!("[copilot] {e}"),
                    };
                    match params::coerce(&canonical, &raw) {
                        Ok(Some(value)) => {
                            let rendered = params::serialize_value(&value);
                            params::set_session_param(
                                &mut self.state_mut().config,
                                &provider,
                                &canonical,
                                value,
                            );
                            format!("[copilot] {canonical} = {rendered}")
                        }
                        Ok(None) => {
                            params::clear_session_param(
                                &mut self.state_mut().config,
                                &provider,
                                &canonical,
                            );
                            format!("[copilot] {canonical} cleared.")
                        }
                        Err(e) => format!("[copilot] {e}"),
                    }
                }
                _ => USAGE.to_string(),
            },
            Some("clear") => match rest.get(1) {
                Some(&"all") => {
                    params::clear_all_session_params(&mut self.state_mut().config, &provider);
                    format!("[copilot] All {provider} parameters cleared.")
                }
                Some(name) => {
                    let canonical = match params::canonicalize(&aliases, name) {
                        Ok(c) => c,
                        Err(e) => return format!("[copilot] {e}"),
                    };
                    if params::clear_session_param(
                        &mut self.state_mut().config,
                        &provider,
                        &canonical,
                    ) {
                        format!("[copilot] {canonical} cleared.")
                    } else {
                        format!("[copilot] {canonical} was not set.")
                    }
                }
                None => USAGE.to_string(),
            },
            _ => USAGE.to_string(),
        }
    }

    fn llm_key(&mut self, rest: &[&str]) -> String {
        let (Some(provider), Some(key)) = (rest.first(), rest.get(1)) else {
            return "Usage: /llm key <provider> <key>".to_string();
        };
        if self.registry.get_provider(provider).is_none() {
            return format!("[copilot] Unknown provider: {provider}");
        }
        if key.is_empty() {
            return "[copilot] Missing API key.".to_string();
        }
        let config_key = format!("{}_api_key", provider.replace('-', "_"));
        self.state_mut().config.set(config_key, key.to_string());
        format!("[copilot] {provider} API key set for this session.")
    }
}

fn prompt() {
    use std::io::Write;
    print!("copilot> ");
    let _ = std::io::stdout().flush();
}

/// API keys never echo; everything else passes through.
fn redact_config_value(key: &str, value: &str) -> String {
    if key.ends_with("_api_key") {
        "********".to_string()
    } else {
        value.to_string()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
