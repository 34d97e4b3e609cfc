// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Client for any endpoint speaking the OpenAI chat-completions shape.
//!
//! Configuration precedence per provider `name` (session keys use
//! underscores, env keys the uppercased prefix):
//!   1. session config: `{name}_base_url`, `{name}_api_key`, `{name}_model`,
//!      `{name}_path`, `{name}_headers` (JSON object)
//!   2. environment: `{PREFIX}_BASE_URL`, `{PREFIX}_API_KEY`,
//!      `{PREFIX}_MODEL`, `{PREFIX}_PATH`, `{PREFIX}_HEADERS`
//!   3. registry entry defaults
//!   4. built-in per-vendor defaults (Ollama, DeepSeek, Qwen/DashScope,
//!      Kimi, GLM, Gemini, llama.cpp, ModelScope)

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context};
use serde_json::{json, Value};
use tracing::debug;

use crate::params;
use crate::registry::ProviderEntry;
use crate::types::{SessionConfig, UsageRecord};

pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const LIST_TIMEOUT: Duration = Duration::from_secs(15);

/// Fully resolved connection settings for one provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ResolvedConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub path: String,
    pub headers: BTreeMap<String, String>,
}

/// `'openai-http'` → `'OPENAI_HTTP'`.
pub(crate) fn env_prefix(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_uppercase());
            last_sep = false;
        } else if !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    out.trim_matches('_').to_string()
}

fn session_key(name: &str, suffix: &str) -> String {
    format!("{}_{suffix}", name.replace('-', "_"))
}

fn pick(session: &SessionConfig, name: &str, suffix: &str, env_suffix: &str) -> Option<String> {
    if let Some(v) = session.get(&session_key(name, suffix)) {
        return Some(v.to_string());
    }
    std::env::var(format!("{}_{env_suffix}", env_prefix(name)))
        .ok()
        .filter(|v| !v.is_empty())
}

/// Resolve connection settings in session → env → registry → vendor order.
pub(crate) fn resolve_config(
    name: &str,
    session: &SessionConfig,
    entry: &ProviderEntry,
) -> ResolvedConfig {
    let mut base_url = pick(session, name, "base_url", "BASE_URL")
        .or_else(|| entry.base_url.clone().filter(|u| !u.is_empty()));
    let api_key = pick(session, name, "api_key", "API_KEY");
    let mut model = pick(session, name, "model", "MODEL");
    let path_overridden = session.get(&session_key(name, "path")).is_some()
        || std::env::var(format!("{}_PATH", env_prefix(name))).is_ok();
    let mut path = pick(session, name, "path", "PATH")
        .or_else(|| entry.path.clone().filter(|p| !p.is_empty()))
        .unwrap_or_else(|| "/v1/chat/completions".to_string());

    let mut headers: BTreeMap<String, String> = entry.headers.clone().unwrap_or_default();
    if let Some(raw) = pick(session, name, "headers", "HEADERS") {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&raw) {
            for (k, v) in map {
                if let Value::String(s) = v {
                    headers.insert(k, s);
                }
            }
        }
    }

    // Built-in per-vendor defaults, applied only where nothing else decided.
    match name {
        "ollama" => {
            base_url.get_or_insert_with(|| "http://localhost:11434".into());
            model.get_or_insert_with(|| "llama3.1".into());
        }
        "deepseek" => {
            base_url.get_or_insert_with(|| "https://api.deepseek.com".into());
            model.get_or_insert_with(|| "deepseek-chat".into());
        }
        "qwen" => {
            base_url.get_or_insert_with(|| "https://dashscope.aliyuncs.com".into());
            if path == "/v1/chat/completions" {
                path = "/compatible-mode/v1/chat/completions".into();
            }
            model.get_or_insert_with(|| "qwen-turbo".into());
        }
        "kimi" => {
            base_url.get_or_insert_with(|| "https://api.moonshot.cn".into());
            model.get_or_insert_with(|| "moonshot-v1-8k".into());
        }
        "glm" => {
            base_url.get_or_insert_with(|| "https://open.bigmodel.cn/api/paas/v4".into());
            if !path_overridden {
                path = "/chat/completions".into();
            }
            model.get_or_insert_with(|| "glm-4".into());
        }
        "gemini" => {
            base_url
                .get_or_insert_with(|| "https://generativelanguage.googleapis.com/v1beta/openai".into());
            model.get_or_insert_with(|| "gemini-2.5-flash".into());
        }
        "llama-cpp" => {
            base_url.get_or_insert_with(|| "http://localhost:8080".into());
            model.get_or_insert_with(|| "llama".into());
        }
        "modelscope" => {
            base_url.get_or_insert_with(|| "https://api-inference.modelscope.cn".into());
            model.get_or_insert_with(|| "deepseek-ai/DeepSeek-R1-Distill-Llama-8B".into());
        }
        _ => {}
    }

    if model.is_none() {
        model = entry.default_model.clone().filter(|m| !m.is_empty());
    }
    if !path.starts_with('/') {
        path = format!("/{path}");
    }

    ResolvedConfig {
        base_url,
        api_key,
        model,
        path,
        headers,
    }
}

/// One chat-completion round trip.  Returns the reply content and usage.
pub(crate) async fn ask(
    http: &reqwest::Client,
    name: &str,
    session: &SessionConfig,
    entry: &ProviderEntry,
    prompt: &str,
) -> anyhow::Result<(String, UsageRecord)> {
    let cfg = resolve_config(name, session, entry);
    let Some(base_url) = cfg.base_url.as_deref().map(|u| u.trim_end_matches('/')) else {
        bail!(
            "{name}: base_url not configured. Set {}_base_url in session config or {}_BASE_URL in env.",
            name.replace('-', "_"),
            env_prefix(name)
        );
    };
    let model = cfg.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
    let url = format!("{base_url}{}", cfg.path);

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
        &params::get_session_params(session, name),
        &aliases,
        true,
    );

    debug!(provider = name, model = %model, url = %url, "dispatching chat completion");

    let mut req = http
        .post(&url)
        .header("Content-Type", "application/json")
        .header("Accept", "application/json")
        .json(&body);
    let has_auth_override = cfg.headers.keys().any(|h| h.eq_ignore_ascii_case("authorization"));
    if let Some(key) = &cfg.api_key {
        if !has_auth_override {
            req = req.bearer_auth(key);
        }
    }
    for (k, v) in &cfg.headers {
        req = req.header(k.as_str(), v.as_str());
    }

    let resp = req
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("{name} request failed: {e}"))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        let snippet: String = text.chars().take(200).collect::<String>().replace('\n', " ");
        bail!("{name} HTTP {} for {url}: {snippet}", status.as_u16());
    }

    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();
    let raw = resp.text().await.unwrap_or_default();
    if !content_type.contains("json") {
        let snippet: String = raw.chars().take(400).collect::<String>().replace('\n', " ");
        let ct = if content_type.is_empty() {
            "unknown"
        } else {
            content_type.as_str()
        };
        bail!("{name} returned non-JSON payload (content-type={ct}). Response snippet: {snippet}");
    }
    let data: Value = serde_json::from_str(&raw).map_err(|_| {
        let snippet: String = raw.chars().take(400).collect();
        anyhow::anyhow!("{name} returned invalid JSON (status {}). Snippet: {snippet}", status.as_u16())
    })?;

    let content = data
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| data.to_string());
    let usage = UsageRecord::extract(&data, name, &model);
    Ok((content, usage))
}

/// List models via `GET {base}/v1/models`; Ollama additionally falls back to
/// `/api/tags`, whose shape differs (`models[].name`).
pub(crate) async fn list_models(
    name: &str,
    session: &SessionConfig,
    entry: &ProviderEntry,
) -> anyhow::Result<Vec<String>> {
    let cfg = resolve_config(name, session, entry);
    let Some(base_url) = cfg.base_url.as_deref().map(|u| u.trim_end_matches('/')) else {
        bail!("{name}: base_url not configured; cannot list models");
    };

    let http = reqwest::Client::builder()
        .timeout(LIST_TIMEOUT)
        .build()
        .context("building HTTP client")?;

    let fetch = |url: String| {
        let http = http.clone();
        let key = cfg.api_key.clone();
        async move {
            let mut req = http.get(&url).header("Accept", "application/json");
            if let Some(k) = &key {
                req = req.bearer_auth(k);
            }
            let resp = req.send().await.ok()?;
            if !resp.status().is_success() {
                return None;
            }
            resp.json::<Value>().await.ok()
        }
    };

    if let Some(data) = fetch(format!("{base_url}/v1/models")).await {
        let models = collect_ids(data.get("data"), &["id", "name"]);
        if !models.is_empty() {
            return Ok(models);
        }
    }

    if name == "ollama" {
        if let Some(data) = fetch(format!("{base_url}/api/tags")).await {
            return Ok(collect_ids(data.get("models"), &["name", "model"]));
        }
    }

    Ok(Vec::new())
}

fn collect_ids(items: Option<&Value>, keys: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    let Some(items) = items.and_then(Value::as_array) else {
        return out;
    };
    for item in items {
        for key in keys {
            if let Some(id) = item.get(*key).and_then(Value::as_str) {
                out.push(id.to_string());
                break;
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
