// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token and cost accounting extracted from one provider response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageRecord {
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl UsageRecord {
    /// Extract usage from a chat-completion response body.
    ///
    /// Reads `usage.{prompt_tokens,completion_tokens,total_tokens}` as
    /// integers and the first of `total_cost` / `total_cost_usd` / `cost` as
    /// a float.  Some gateways nest the object under `meta.usage`; both
    /// locations are checked.
    pub fn extract(data: &Value, provider: &str, model: &str) -> Self {
        let mut rec = Self {
            provider: provider.to_string(),
            model: model.to_string(),
            ..Self::default()
        };
        let usage = data
            .get("usage")
            .filter(|u| u.is_object())
            .or_else(|| data.pointer("/meta/usage").filter(|u| u.is_object()));
        let Some(usage) = usage else {
            return rec;
        };
        rec.prompt_tokens = as_u64(usage.get("prompt_tokens"));
        rec.completion_tokens = as_u64(usage.get("completion_tokens"));
        rec.total_tokens = as_u64(usage.get("total_tokens"));
        for key in ["total_cost", "total_cost_usd", "cost"] {
            if let Some(v) = as_f64(usage.get(key)) {
                rec.cost = Some(v);
                break;
            }
        }
        rec
    }
}

fn as_u64(v: Option<&Value>) -> Option<u64> {
    let v = v?;
    v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)).or_else(|| {
        v.as_str().and_then(|s| s.trim().parse::<f64>().ok()).map(|f| f as u64)
    })
}

fn as_f64(v: Option<&Value>) -> Option<f64> {
    let v = v?;
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
}

/// Session-scoped provider configuration.
///
/// `values` holds flat string overrides (`"<provider>_model"`,
/// `"<provider>_api_key"`, `"auto_round_limit"`, ...); `params` holds the
/// nested per-provider parameter maps keyed `"<provider>_params"`.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub values: HashMap<String, String>,
    pub params: HashMap<String, serde_json::Map<String, Value>>,
}

impl SessionConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_reads_token_counts() {
        let data = json!({"usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}});
        let u = UsageRecord::extract(&data, "deepseek", "deepseek-chat");
        assert_eq!(u.prompt_tokens, Some(10));
        assert_eq!(u.completion_tokens, Some(5));
        assert_eq!(u.total_tokens, Some(15));
        assert_eq!(u.provider, "deepseek");
        assert_eq!(u.cost, None);
    }

    #[test]
    fn extract_prefers_total_cost_over_cost() {
        let data = json!({"usage": {"total_cost": 0.002, "cost": 9.0}});
        let u = UsageRecord::extract(&data, "openrouter", "m");
        assert_eq!(u.cost, Some(0.002));
    }

    #[test]
    fn extract_handles_meta_usage_nesting() {
        let data = json!({"meta": {"usage": {"prompt_tokens": 3}}});
        let u = UsageRecord::extract(&data, "openrouter", "m");
        assert_eq!(u.prompt_tokens, Some(3));
    }

    #[test]
    fn extract_tolerates_string_numbers() {
        let data = json!({"usage": {"prompt_tokens": "12", "cost": "0.5"}});
        let u = UsageRecord::extract(&data, "p", "m");
        assert_eq!(u.prompt_tokens, Some(12));
        assert_eq!(u.cost, Some(0.5));
    }

    #[test]
    fn extract_without_usage_keeps_identity_only() {
        let data = json!({"choices": []});
        let u = UsageRecord::extract(&data, "p", "m");
        assert_eq!(u.prompt_tokens, None);
        assert_eq!(u.model, "m");
    }

    #[test]
    fn session_config_get_skips_empty_values() {
        let mut cfg = SessionConfig::default();
        cfg.set("ollama_model", "");
        assert_eq!(cfg.get("ollama_model"), None);
        cfg.set("ollama_model", "llama3.1");
        assert_eq!(cfg.get("ollama_model"), Some("llama3.1"));
    }
}
