// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared helpers for the line-oriented backends.

use std::sync::OnceLock;

use regex::Regex;

/// ANSI CSI prefix tolerated around prompt literals.
pub const ANSI_PREFIX: &str = r"(?:\x1b\[[0-9;?]*[ -/]*[@-~])*";

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("static regex"))
}

/// Remove ANSI escape sequences.
pub fn strip_ansi(s: &str) -> String {
    ansi_re().replace_all(s, "").into_owned()
}

/// Compile a prompt regex tolerant to surrounding ANSI color and whitespace.
pub fn prompt_regex(literal: &str) -> Regex {
    Regex::new(&format!(
        "{ANSI_PREFIX}{}{ANSI_PREFIX}\\s*",
        regex::escape(literal)
    ))
    .expect("escaped prompt literal always compiles")
}

/// Split a user-level command string into primitive commands.
///
/// Newlines and `;` both separate; blank pieces are dropped.  The input is
/// expected to be pre-trimmed and non-empty.
pub fn split_commands(text: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    for chunk in text.replace('\r', "\n").split('\n') {
        for piece in chunk.split(';') {
            let piece = piece.trim();
            if !piece.is_empty() {
                parts.push(piece.to_string());
            }
        }
    }
    if parts.is_empty() {
        parts.push(text.trim().to_string());
    }
    parts
}

/// Normalise captured output: drop the echoed command when it leads.
///
/// PTYs echo the line we sent; when the first captured line equals the
/// command it is stripped so callers see only the debugger's reply.
pub fn strip_echo(captured: &str, cmd: &str) -> String {
    let text = captured
        .replace("\r\n", "\n")
        .trim_start_matches(['\r', '\n'])
        .to_string();
    let mut lines: Vec<&str> = text.split('\n').collect();
    if let Some(first) = lines.first() {
        if first.trim() == cmd.trim() {
            lines.remove(0);
        }
    }
    lines.join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_ansi_removes_color_and_mode_sequences() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m"), "red");
        assert_eq!(strip_ansi("\x1b[?2004hplain\x1b[?2004l"), "plain");
        assert_eq!(strip_ansi("no escapes"), "no escapes");
    }

    #[test]
    fn prompt_regex_matches_colored_prompt() {
        let re = prompt_regex("(gdb) ");
        assert!(re.is_match("(gdb) "));
        assert!(re.is_match("\x1b[1m(gdb) \x1b[0m"));
        assert!(!re.is_match("(lldb) "));
    }

    #[test]
    fn split_handles_newlines_and_semicolons() {
        assert_eq!(split_commands("bt"), vec!["bt"]);
        assert_eq!(split_commands("bt; info locals"), vec!["bt", "info locals"]);
        assert_eq!(split_commands("bt\ninfo locals\n"), vec!["bt", "info locals"]);
        assert_eq!(split_commands("a;;b"), vec!["a", "b"]);
    }

    #[test]
    fn strip_echo_drops_leading_command_line() {
        assert_eq!(strip_echo("bt\r\n#0 main ()\r\n", "bt"), "#0 main ()\n");
        assert_eq!(strip_echo("#0 main ()", "bt"), "#0 main ()");
    }

    #[test]
    fn strip_echo_keeps_unrelated_first_line() {
        assert_eq!(strip_echo("value = 42", "p x"), "value = 42");
    }
}
