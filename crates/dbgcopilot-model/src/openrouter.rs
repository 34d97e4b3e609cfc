// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenRouter client.
//!
//! Hard-wired to the OpenRouter chat-completions endpoint.  The optional
//! identification headers come from `OPENROUTER_HTTP_REFERER` /
//! `OPENROUTER_TITLE` (non-sensitive, defaulted).  Model preference:
//! registry entry → session config → `OPENROUTER_MODEL` → built-in default.

use std::time::Duration;

use anyhow::bail;
use serde_json::{json, Value};
use tracing::debug;

use crate::registry::ProviderEntry;
use crate::types::{SessionConfig, UsageRecord};
use crate::params;

const CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const MODELS_URL: &str = "https://openrouter.ai/api/v1/models";
const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

fn api_key(session: &SessionConfig) -> Option<String> {
    session
        .get("openrouter_api_key")
        .map(str::to_string)
        .or_else(|| std::env::var("OPENROUTER_API_KEY").ok().filter(|k| !k.is_empty()))
}

fn resolve_model(session: &SessionConfig, entry: &ProviderEntry) -> String {
    entry
        .default_model
        .clone()
        .filter(|m| !m.is_empty())
        .or_else(|| session.get("openrouter_model").map(str::to_string))
        .or_else(|| std::env::var("OPENROUTER_MODEL").ok().filter(|m| !m.is_empty()))
        .unwrap_or_else(|| DEFAULT_MODEL.to_string())
}

fn identification_headers() -> [(&'static str, String); 2] {
    [
        (
            "HTTP-Referer",
            std::env::var("OPENROUTER_HTTP_REFERER")
                .unwrap_or_else(|_| "https://github.com/oldzhu/dbgcopilot".to_string()),
        ),
        (
            "X-Title",
            std::env::var("OPENROUTER_TITLE").unwrap_or_else(|_| "dbgcopilot".to_string()),
        ),
    ]
}

/// One chat-completion round trip against OpenRouter.
pub(crate) async fn ask(
    http: &reqwest::Client,
    session: &SessionConfig,
    entry: &ProviderEntry,
    prompt: &str,
) -> anyhow::Result<(String, UsageRecord)> {
    let Some(key) = api_key(session) else {
        bail!("OpenRouter API key not configured (OPENROUTER_API_KEY or session config)");
    };
    let model = resolve_model(session, entry);

    let mut body = json!({
        "model": model,
        "messages": [{"role": "user", "content": prompt}],
        "max_tokens": 512,
        "temperature": 0.0,
    });
    let aliases = entry.alias_map();
    if let Some(defaults) = &entry.default_params {
        params::apply_params(&mut body, defaults, &aliases, false);
    }
    params::apply_params(
        &mut body,
        &params::get_session_params(session, "openrouter"),
        &aliases,
        true,
    );

    debug!(model = %model, "dispatching OpenRouter chat completion");

    let mut req = http
        .post(CHAT_URL)
        .bearer_auth(&key)
        .header("Content-Type", "application/json")
        .header("Accept", "application/json")
        .json(&body);
    for (name, value) in identification_headers() {
        req = req.header(name, value);
    }

    let resp = req
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("OpenRouter request failed: {e}"))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        let snippet: String = text.trim().chars().take(200).collect::<String>().replace('\n', " ");
        bail!("OpenRouter HTTP {}: {snippet}", status.as_u16());
    }

    let raw = resp.text().await.unwrap_or_default();
    let data: Value = serde_json::from_str(&raw)
        .map_err(|_| anyhow::anyhow!("OpenRouter returned non-JSON response:\n{raw}"))?;

    let content = data
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| data.to_string());
    let usage = UsageRecord::extract(&data, "openrouter", &model);
    Ok((content, usage))
}

/// List model ids from the public models endpoint (key attached if known).
pub(crate) async fn list_models(session: &SessionConfig) -> anyhow::Result<Vec<String>> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()?;
    let mut req = http.get(MODELS_URL).header("Accept", "application/json");
    if let Some(key) = api_key(session) {
        req = req.bearer_auth(key);
    }
    let resp = req
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("OpenRouter models request failed: {e}"))?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        let snippet: String = text.trim().chars().take(200).collect::<String>().replace('\n', " ");
        bail!("OpenRouter HTTP {}: {snippet}", status.as_u16());
    }
    let data: Value = resp
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("OpenRouter returned non-JSON response: {e}"))?;
    let mut models = Vec::new();
    if let Some(items) = data.get("data").and_then(Value::as_array) {
        for item in items {
            if let Some(id) = item
                .get("id")
                .and_then(Value::as_str)
                .or_else(|| item.get("name").and_then(Value::as_str))
            {
                models.push(id.to_string());
            }
        }
    }
    Ok(models)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_prefers_entry_then_session_then_default() {
        let mut entry = ProviderEntry::default();
        let mut session = SessionConfig::default();
        assert_eq!(resolve_model(&session, &entry), DEFAULT_MODEL);

        session.set("openrouter_model", "qwen/qwen3-coder");
        assert_eq!(resolve_model(&session, &entry), "qwen/qwen3-coder");

        entry.default_model = Some("anthropic/claude-sonnet".into());
        assert_eq!(resolve_model(&session, &entry), "anthropic/claude-sonnet");
    }

    #[test]
    fn empty_entry_model_does_not_shadow_session() {
        let entry = ProviderEntry {
            default_model: Some(String::new()),
            ..ProviderEntry::default()
        };
        let mut session = SessionConfig::default();
        session.set("openrouter_model", "m");
        assert_eq!(resolve_model(&session, &entry), "m");
    }

    #[test]
    fn identification_headers_have_defaults() {
        let headers = identification_headers();
        assert_eq!(headers[0].0, "HTTP-Referer");
        assert!(!headers[0].1.is_empty());
        assert_eq!(headers[1].0, "X-Title");
        assert!(!headers[1].1.is_empty());
    }

    #[tokio::test]
    async fn missing_key_is_a_configuration_error() {
        let had_key = std::env::var("OPENROUTER_API_KEY").is_ok();
        if had_key {
            // Cannot safely unset a shared env var in parallel tests.
            return;
        }
        let http = reqwest::Client::new();
        let err = ask(&http, &SessionConfig::default(), &ProviderEntry::default(), "hi")
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("OPENROUTER_API_KEY"), "got: {err}");
    }
}
