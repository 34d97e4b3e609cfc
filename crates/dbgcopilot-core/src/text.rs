// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Text helpers shared by the orchestrator and the front-ends.

pub use dbgcopilot_backend::util::strip_ansi;

/// Terminal colors used for locally-produced text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Green,
    Red,
    Cyan,
    Yellow,
}

impl Color {
    fn code(self) -> &'static str {
        match self {
            Color::Green => "32",
            Color::Red => "31",
            Color::Cyan => "36",
            Color::Yellow => "33",
        }
    }
}

/// Wrap `text` in ANSI styling when `enable` is set.
pub fn color_text(text: &str, color: Color, bold: bool, enable: bool) -> String {
    if !enable {
        return text.to_string();
    }
    let style = if bold {
        format!("1;{}", color.code())
    } else {
        color.code().to_string()
    };
    format!("\x1b[{style}m{text}\x1b[0m")
}

/// Truncate to `max_chars`, keeping the head and the tail halves.
pub fn head_tail_truncate(s: &str, max_chars: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_chars {
        return s.to_string();
    }
    let half = max_chars / 2;
    let head: String = chars[..half].iter().collect();
    let tail: String = chars[chars.len() - half..].iter().collect();
    format!("{head}\n... [truncated] ...\n{tail}")
}

/// First `max_chars` characters (char-aware, so multi-byte text never splits
/// inside a code point).
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Whether the user asked for a Chinese-language answer, either explicitly
/// or by writing Chinese.
pub fn wants_chinese(text: &str) -> bool {
    let lowered = text.to_lowercase();
    const EXPLICIT: &[&str] = &["in chinese", "中文", "用中文", "中文回答", "请用中文", "中文解释"];
    if EXPLICIT.iter().any(|k| lowered.contains(k)) {
        return true;
    }
    text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
