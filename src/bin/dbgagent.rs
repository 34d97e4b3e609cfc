// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Autonomous agent CLI: run an investigation to completion and write a
//! Markdown report.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use dbgcopilot_agent::{AgentRequest, AgentRunner};
use dbgcopilot_backend::DebuggerKind;
use dbgcopilot_model::ProviderRegistry;

/// Autonomous debugging agent over GDB, LLDB, jdb, pdb, Delve, and radare2.
///
/// Example:
///   dbgagent --debugger gdb --program ./a.out --goal crash \
///            --llm-provider deepseek --llm-key $DEEPSEEK_API_KEY --log-session
///
/// To continue from a hand-edited report, pass --resume-from path/to/report.md.
#[derive(Debug, Parser)]
#[command(name = "dbgagent", version, about, verbatim_doc_comment)]
struct Cli {
    /// Debugger backend to use
    #[arg(long, default_value = "gdb",
          value_parser = ["gdb", "rust-gdb", "lldb", "rust-lldb", "lldb-rust", "jdb", "pdb", "delve", "radare2"])]
    debugger: String,

    /// Path to the binary under test
    #[arg(long)]
    program: Option<String>,

    /// Path to a core dump
    #[arg(long = "core")]
    corefile: Option<String>,

    /// Primary investigation goal
    #[arg(long, default_value = "crash", value_parser = ["crash", "hang", "leak", "custom"])]
    goal: String,

    /// Free-form goal description or question
    #[arg(long, default_value = "")]
    goal_text: String,

    /// LLM provider to use
    #[arg(long, default_value = "openrouter")]
    llm_provider: String,

    /// Override model for the selected provider
    #[arg(long)]
    llm_model: Option<String>,

    /// API key for the selected provider (optional)
    #[arg(long)]
    llm_key: Option<String>,

    /// Classpath for the jdb backend
    #[arg(long)]
    classpath: Option<String>,

    /// Sourcepath for the jdb backend
    #[arg(long)]
    sourcepath: Option<String>,

    /// Fully qualified main class for the jdb backend
    #[arg(long)]
    main_class: Option<String>,

    /// Maximum auto iterations
    #[arg(long, default_value_t = 16)]
    max_steps: u32,

    /// Preferred language for plan/log/report (e.g. en, zh)
    #[arg(long, default_value = "en")]
    language: String,

    /// Enable plaintext session logging (default path in /tmp)
    #[arg(long)]
    log_session: bool,

    /// Explicit log file path (implies --log-session)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Where to write the final report (defaults to /tmp)
    #[arg(long)]
    report_file: Option<PathBuf>,

    /// Existing report/notes to inject as additional context
    #[arg(long)]
    resume_from: Option<PathBuf>,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn default_path(prefix: &str, suffix: &str) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    PathBuf::from("/tmp").join(format!("{prefix}-{stamp}{suffix}"))
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let debugger = match DebuggerKind::parse(&cli.debugger) {
        Some(kind) => kind,
        None => {
            eprintln!("[dbgagent] Unsupported debugger: {}", cli.debugger);
            return ExitCode::from(1);
        }
    };

    let log_enabled = cli.log_session || cli.log_file.is_some() || std::env::var("DBGAGENT_LOG").is_ok();
    let report_path = cli
        .report_file
        .clone()
        .unwrap_or_else(|| default_path("dbgagent-report", ".md"));
    let log_path = if log_enabled {
        Some(
            cli.log_file
                .clone()
                .unwrap_or_else(|| default_path("dbgagent", ".log")),
        )
    } else {
        None
    };

    let resume_context = match &cli.resume_from {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(_) => {
                eprintln!("[dbgagent] Resume file not found: {}", path.display());
                return ExitCode::from(1);
            }
        },
        None => None,
    };

    let registry = match ProviderRegistry::open() {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprintln!("[dbgagent] Error: {e}");
            return ExitCode::from(1);
        }
    };

    let request = AgentRequest {
        debugger,
        provider: cli.llm_provider.clone(),
        model: cli.llm_model.clone(),
        api_key: cli.llm_key.clone(),
        program: cli.program.clone(),
        corefile: cli.corefile.clone(),
        classpath: cli.classpath.clone(),
        sourcepath: cli.sourcepath.clone(),
        main_class: cli.main_class.clone(),
        goal_type: cli.goal.clone(),
        goal_text: cli.goal_text.clone(),
        resume_context,
        max_steps: cli.max_steps,
        language: cli.language.clone(),
        log_path: log_path.clone(),
        report_path: report_path.clone(),
    };

    let runner = match AgentRunner::new(request, registry) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("[dbgagent] Error: {e}");
            return ExitCode::from(1);
        }
    };

    let final_report = match runner.run().await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("[dbgagent] Error: {e}");
            return ExitCode::from(1);
        }
    };

    println!("[dbgagent] Session complete. Report saved to {}", report_path.display());
    if let Some(log) = &log_path {
        println!("[dbgagent] Session log stored at {}", log.display());
    }
    if final_report.trim().starts_with("Final Report") {
        println!("[dbgagent] Investigation ended without a detailed report. Inspect the log for next steps.");
    }
    ExitCode::SUCCESS
}
