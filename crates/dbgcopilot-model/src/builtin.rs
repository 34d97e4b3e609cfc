// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Built-in provider catalog merged into the registry file on load.
//!
//! Mirrors the defaults a fresh installation ships with.  Entries the user
//! has edited are never overwritten; only names missing from the file are
//! merged back in.

use std::collections::BTreeMap;

use serde_json::{from_value, json};

use crate::registry::ProviderEntry;

fn entry(value: serde_json::Value) -> ProviderEntry {
    from_value(value).expect("built-in provider entry must deserialize")
}

/// All built-in provider entries, keyed by provider name.
pub fn builtin_providers() -> BTreeMap<String, ProviderEntry> {
    let mut map = BTreeMap::new();

    map.insert(
        "mock-local".to_string(),
        entry(json!({
            "kind": "mock",
            "description": "Local deterministic mock provider",
        })),
    );
    map.insert(
        "openrouter".to_string(),
        entry(json!({
            "kind": "openrouter",
            "description": "OpenRouter API provider (requires OPENROUTER_API_KEY)",
            "default_model": "openai/gpt-4o-mini",
            "supports_model_list": true,
            "capabilities": [
                "temperature", "max_tokens", "top_p", "presence_penalty",
                "frequency_penalty", "stop_sequences", "thinking",
            ],
            "param_aliases": {
                "enable_thinking": "thinking.enabled",
                "thinking_budget_tokens": "thinking.max_tokens",
            },
        })),
    );
    map.insert(
        "openai-http".to_string(),
        entry(json!({
            "kind": "openai-compatible",
            "description": "Generic OpenAI-compatible endpoint (configure base URL/API key/model)",
            "base_url": "",
            "path": "/v1/chat/completions",
            "default_model": "gpt-4o-mini",
            "capabilities": [
                "temperature", "max_tokens", "top_p", "presence_penalty",
                "frequency_penalty", "stop_sequences",
            ],
        })),
    );
    map.insert(
        "ollama".to_string(),
        entry(json!({
            "kind": "openai-compatible",
            "description": "Local Ollama via OpenAI-compatible /v1/chat/completions",
            "base_url": "http://localhost:11434",
            "path": "/v1/chat/completions",
            "default_model": "llama3.1",
            "capabilities": ["temperature", "max_tokens", "top_p", "top_k", "stop_sequences"],
            "param_aliases": { "mirostat": "extras.mirostat" },
        })),
    );
    map.insert(
        "deepseek".to_string(),
        entry(json!({
            "kind": "openai-compatible",
            "description": "DeepSeek OpenAI-compatible API",
            "base_url": "https://api.deepseek.com",
            "path": "/v1/chat/completions",
            "default_model": "deepseek-chat",
            "capabilities": ["temperature", "max_tokens", "top_p", "stop_sequences", "thinking"],
            "param_aliases": { "enable_thinking": "thinking.enabled" },
        })),
    );
    map.insert(
        "qwen".to_string(),
        entry(json!({
            "kind": "openai-compatible",
            "description": "Qwen via DashScope OpenAI-compatible API",
            "base_url": "https://dashscope.aliyuncs.com",
            "path": "/compatible-mode/v1/chat/completions",
            "default_model": "qwen-turbo",
            "capabilities": ["temperature", "max_tokens", "top_p", "stop_sequences"],
        })),
    );
    map.insert(
        "kimi".to_string(),
        entry(json!({
            "kind": "openai-compatible",
            "description": "Kimi (Moonshot) OpenAI-compatible API",
            "base_url": "https://api.moonshot.cn",
            "path": "/v1/chat/completions",
            "default_model": "kimi-k2-0905-preview",
            "capabilities": ["temperature", "max_tokens", "top_p", "stop_sequences", "web_search"],
            "param_aliases": { "web_search": "extras.enable_web_search" },
        })),
    );
    map.insert(
        "zhipuglm".to_string(),
        entry(json!({
            "kind": "openai-compatible",
            "description": "Zhipu GLM OpenAI-compatible API",
            "base_url": "https://open.bigmodel.cn/api/paas/v4",
            "path": "/chat/completions",
            "default_model": "glm-4",
            "capabilities": ["temperature", "max_tokens", "top_p", "stop_sequences", "web_search"],
            "param_aliases": { "web_search": "extras.enable_web_search" },
        })),
    );
    map.insert(
        "gemini".to_string(),
        entry(json!({
            "kind": "openai-compatible",
            "description": "Google Gemini OpenAI-compatible API",
            "base_url": "https://generativelanguage.googleapis.com/v1beta/openai",
            "path": "/chat/completions",
            "default_model": "gemini-2.5-flash",
            "capabilities": ["temperature", "max_tokens", "top_p", "stop_sequences"],
        })),
    );
    map.insert(
        "llama-cpp".to_string(),
        entry(json!({
            "kind": "openai-compatible",
            "description": "llama.cpp local server (OpenAI-compatible)",
            "base_url": "http://localhost:8080",
            "path": "/v1/chat/completions",
            "default_model": "llama",
            "capabilities": [
                "temperature", "max_tokens", "top_p", "top_k",
                "stop_sequences", "repeat_penalty", "mirostat",
            ],
            "param_aliases": {
                "repeat_penalty": "extras.repeat_penalty",
                "mirostat": "extras.mirostat",
            },
        })),
    );
    map.insert(
        "modelscope".to_string(),
        entry(json!({
            "kind": "openai-compatible",
            "description": "ModelScope OpenAI-compatible inference API",
            "base_url": "https://api-inference.modelscope.cn",
            "path": "/v1/chat/completions",
            "default_model": "deepseek-ai/DeepSeek-R1-Distill-Llama-8B",
            "supports_model_list": true,
            "capabilities": ["temperature", "max_tokens", "top_p", "stop_sequences", "thinking"],
            "param_aliases": { "thinking_budget_tokens": "thinking.max_tokens" },
        })),
    );

    map
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProviderKind;

    #[test]
    fn catalog_covers_required_providers() {
        let map = builtin_providers();
        for name in [
            "mock-local", "openrouter", "openai-http", "ollama", "deepseek",
            "qwen", "kimi", "zhipuglm", "gemini", "llama-cpp", "modelscope",
        ] {
            assert!(map.contains_key(name), "missing builtin: {name}");
        }
    }

    #[test]
    fn kinds_are_assigned() {
        let map = builtin_providers();
        assert_eq!(map["mock-local"].kind, ProviderKind::Mock);
        assert_eq!(map["openrouter"].kind, ProviderKind::Openrouter);
        assert_eq!(map["deepseek"].kind, ProviderKind::OpenaiCompatible);
    }

    #[test]
    fn deepseek_carries_thinking_alias() {
        let map = builtin_providers();
        assert_eq!(
            map["deepseek"].param_aliases.get("enable_thinking").map(String::as_str),
            Some("thinking.enabled")
        );
    }

    #[test]
    fn qwen_uses_dashscope_compatible_path() {
        let map = builtin_providers();
        assert_eq!(
            map["qwen"].path.as_deref(),
            Some("/compatible-mode/v1/chat/completions")
        );
    }

    #[test]
    fn model_listing_flags_match_support() {
        let map = builtin_providers();
        assert!(map["openrouter"].supports_model_list);
        assert!(map["modelscope"].supports_model_list);
        assert!(!map["deepseek"].supports_model_list);
    }
}
