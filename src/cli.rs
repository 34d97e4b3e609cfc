// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::Parser;

/// Interactive debugging copilot REPL.
///
/// Starts a `copilot>` prompt; pick a debugger with `/use <name>` and a
/// provider with `/llm use <name>`, then talk to the model.  Anything that
/// is not a slash command goes to the LLM.
#[derive(Debug, Parser)]
#[command(name = "dbgcopilot", version, about)]
pub struct Cli {
    /// Debugger to select at startup (gdb|rust-gdb|lldb|lldb-rust|jdb|pdb|delve|radare2)
    #[arg(long)]
    pub debugger: Option<String>,

    /// Path to the binary / script / class under test
    #[arg(long)]
    pub program: Option<String>,

    /// Path to a core dump to load
    #[arg(long = "core")]
    pub corefile: Option<String>,

    /// Classpath for the jdb backend
    #[arg(long)]
    pub classpath: Option<String>,

    /// Sourcepath for the jdb backend
    #[arg(long)]
    pub sourcepath: Option<String>,

    /// Fully qualified main class for the jdb backend
    #[arg(long)]
    pub main_class: Option<String>,

    /// LLM provider to select at startup
    #[arg(long)]
    pub llm_provider: Option<String>,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_startup_selections() {
        let cli = Cli::parse_from([
            "dbgcopilot",
            "--debugger",
            "gdb",
            "--program",
            "./a.out",
            "--llm-provider",
            "deepseek",
            "-vv",
        ]);
        assert_eq!(cli.debugger.as_deref(), Some("gdb"));
        assert_eq!(cli.program.as_deref(), Some("./a.out"));
        assert_eq!(cli.llm_provider.as_deref(), Some("deepseek"));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn core_flag_maps_to_corefile() {
        let cli = Cli::parse_from(["dbgcopilot", "--core", "/tmp/core.1234"]);
        assert_eq!(cli.corefile.as_deref(), Some("/tmp/core.1234"));
    }

    #[test]
    fn defaults_are_empty() {
        let cli = Cli::parse_from(["dbgcopilot"]);
        assert!(cli.debugger.is_none());
        assert!(cli.program.is_none());
        assert_eq!(cli.verbose, 0);
    }
}
