// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

/// Locate the `configs/` directory used for prompt and provider files.
///
/// Walks up from the current working directory looking for an existing
/// `configs/` child (so a checkout carries its own config set), then falls
/// back to `<user config dir>/dbgcopilot`.  The fallback directory is not
/// created here; writers create it on first save.
pub fn configs_dir() -> PathBuf {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir: Option<&Path> = Some(cwd.as_path());
        while let Some(d) = dir {
            let candidate = d.join("configs");
            if candidate.is_dir() {
                return candidate;
            }
            dir = d.parent();
        }
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dbgcopilot")
}

/// Resolve a user-supplied override path from an environment variable value.
///
/// Expands `~` and makes relative paths absolute against the current working
/// directory, mirroring how the REPL accepts both forms.
pub fn resolve_override_path(raw: &str) -> PathBuf {
    let expanded = shellexpand::tilde(raw).into_owned();
    let path = PathBuf::from(expanded);
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_override_is_kept_verbatim() {
        let p = resolve_override_path("/etc/dbgcopilot/prompts.json");
        assert_eq!(p, PathBuf::from("/etc/dbgcopilot/prompts.json"));
    }

    #[test]
    fn relative_override_is_anchored_to_cwd() {
        let p = resolve_override_path("configs/prompts.json");
        assert!(p.is_absolute());
        assert!(p.ends_with("configs/prompts.json"));
    }

    #[test]
    fn tilde_is_expanded() {
        let p = resolve_override_path("~/prompts.json");
        assert!(!p.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn configs_dir_returns_some_path() {
        // Either a discovered configs/ dir or the user-config fallback.
        let d = configs_dir();
        assert!(!d.as_os_str().is_empty());
    }
}
