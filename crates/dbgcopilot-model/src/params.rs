// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Canonical provider parameters with alias resolution and value coercion.
//!
//! Canonical names are dotted paths into the request body
//! (`thinking.enabled`, `extras.mirostat`).  User-facing aliases come from a
//! common table plus each provider's `param_aliases`.  Coercion is keyed by
//! the final path segment, so `thinking.max_tokens` parses like
//! `max_tokens`.

use std::collections::HashMap;

use anyhow::bail;
use serde_json::{Map, Value};

use crate::types::SessionConfig;

const SESSION_SUFFIX: &str = "_params";

/// Aliases understood for every provider, regardless of its registry entry.
const COMMON_ALIASES: &[(&str, &str)] = &[
    ("temperature", "temperature"),
    ("temp", "temperature"),
    ("max_tokens", "max_tokens"),
    ("top_p", "top_p"),
    ("top_k", "top_k"),
    ("presence_penalty", "presence_penalty"),
    ("frequency_penalty", "frequency_penalty"),
    ("stop", "stop"),
    ("stop_sequences", "stop"),
    ("repeat_penalty", "extras.repeat_penalty"),
    ("mirostat", "extras.mirostat"),
    ("web_search", "extras.enable_web_search"),
];

const INT_BASE_NAMES: &[&str] = &["max_tokens", "top_k", "mirostat"];
const FLOAT_BASE_NAMES: &[&str] = &[
    "temperature",
    "top_p",
    "presence_penalty",
    "frequency_penalty",
    "repeat_penalty",
];

/// Session-config key holding a provider's parameter overrides.
pub fn params_key(provider: &str) -> String {
    provider.replace('-', "_") + SESSION_SUFFIX
}

fn alias_map(provider_aliases: &HashMap<String, String>) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = COMMON_ALIASES
        .iter()
        .map(|(a, c)| (a.to_string(), c.to_string()))
        .collect();
    for (alias, canonical) in provider_aliases {
        map.insert(alias.to_lowercase(), canonical.clone());
    }
    map
}

/// Resolve a user-facing parameter name to its canonical dotted path.
///
/// Unknown names pass through unchanged so advanced users can address raw
/// body fields directly.
pub fn canonicalize(provider_aliases: &HashMap<String, String>, name: &str) -> anyhow::Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        bail!("Parameter name is required");
    }
    Ok(alias_map(provider_aliases)
        .get(&trimmed.to_lowercase())
        .cloned()
        .unwrap_or_else(|| trimmed.to_string()))
}

/// Preferred display name for a canonical path (first matching alias).
pub fn display_name(provider_aliases: &HashMap<String, String>, canonical: &str) -> String {
    // Provider aliases win over the common table.
    for (alias, c) in provider_aliases {
        if c == canonical {
            return alias.clone();
        }
    }
    for (alias, c) in COMMON_ALIASES {
        if *c == canonical {
            return (*alias).to_string();
        }
    }
    canonical.to_string()
}

/// Coerce a raw string value for a canonical parameter.
///
/// Returns `Ok(None)` when the value is a clear sentinel (`none`, `null`,
/// `clear`, or empty).  Coercion is driven by the final path segment: the
/// integer and float families parse numerically (integers tolerate `"1.0"`),
/// `stop` accepts a JSON array, a comma-separated list, or a bare string;
/// everything else tries booleans, then embedded JSON, then falls back to a
/// plain string.
pub fn coerce(canonical: &str, raw: &str) -> anyhow::Result<Option<Value>> {
    let text = raw.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let lowered = text.to_lowercase();
    if matches!(lowered.as_str(), "none" | "null" | "clear") {
        return Ok(None);
    }

    let base = canonical.rsplit('.').next().unwrap_or(canonical);
    if INT_BASE_NAMES.contains(&base) {
        let Ok(f) = text.parse::<f64>() else {
            bail!("Expected integer value for {canonical}");
        };
        return Ok(Some(Value::from(f.trunc() as i64)));
    }
    if FLOAT_BASE_NAMES.contains(&base) {
        let Ok(f) = text.parse::<f64>() else {
            bail!("Expected numeric value for {canonical}");
        };
        return Ok(Some(Value::from(f)));
    }
    if base == "stop" {
        if text.starts_with('[') {
            let Ok(Value::Array(items)) = serde_json::from_str::<Value>(text) else {
                bail!("Invalid list value for {canonical}");
            };
            let strings: Vec<Value> = items
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Value::String(s),
                    other => Value::String(serialize_value(&other)),
                })
                .collect();
            return Ok(Some(Value::Array(strings)));
        }
        let parts: Vec<Value> = text
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| Value::String(p.to_string()))
            .collect();
        if parts.is_empty() {
            return Ok(Some(Value::Array(vec![Value::String(text.to_string())])));
        }
        return Ok(Some(Value::Array(parts)));
    }

    if matches!(lowered.as_str(), "true" | "yes" | "on" | "1") {
        return Ok(Some(Value::Bool(true)));
    }
    if matches!(lowered.as_str(), "false" | "no" | "off" | "0") {
        return Ok(Some(Value::Bool(false)));
    }
    if text.starts_with('{') || text.starts_with('[') {
        if let Ok(v) = serde_json::from_str::<Value>(text) {
            return Ok(Some(v));
        }
    }
    Ok(Some(Value::String(text.to_string())))
}

/// Apply a parameter map onto a request body, creating intermediate objects
/// along each canonical path.
pub fn apply_params(
    body: &mut Value,
    params: &Map<String, Value>,
    provider_aliases: &HashMap<String, String>,
    assume_canonical: bool,
) {
    for (key, value) in params {
        let canonical = if assume_canonical {
            key.clone()
        } else {
            match canonicalize(provider_aliases, key) {
                Ok(c) => c,
                Err(_) => continue,
            }
        };
        apply_path(body, &canonical, Some(value));
    }
}

/// Assign (or with `None`, remove) the leaf addressed by a dotted path.
///
/// A string assigned to a `stop` leaf is wrapped into a singleton list.
pub fn apply_path(body: &mut Value, canonical: &str, value: Option<&Value>) {
    let parts: Vec<&str> = canonical.split('.').filter(|s| !s.is_empty()).collect();
    let Some((leaf, intermediate)) = parts.split_last() else {
        return;
    };
    let mut current = body;
    for segment in intermediate {
        if !current.is_object() {
            return;
        }
        let map = current.as_object_mut().expect("checked is_object");
        let child = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            *child = Value::Object(Map::new());
        }
        current = child;
    }
    let Some(map) = current.as_object_mut() else {
        return;
    };
    match value {
        None => {
            map.remove(*leaf);
        }
        Some(v) => {
            let v = if *leaf == "stop" {
                match v {
                    Value::String(s) => Value::Array(vec![Value::String(s.clone())]),
                    other => other.clone(),
                }
            } else {
                v.clone()
            };
            map.insert((*leaf).to_string(), v);
        }
    }
}

/// Render a parameter value for display (`/llm params list`).
pub fn serialize_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

// ─── Session storage ─────────────────────────────────────────────────────────

pub fn get_session_params(config: &SessionConfig, provider: &str) -> Map<String, Value> {
    config
        .params
        .get(&params_key(provider))
        .cloned()
        .unwrap_or_default()
}

pub fn set_session_param(config: &mut SessionConfig, provider: &str, canonical: &str, value: Value) {
    config
        .params
        .entry(params_key(provider))
        .or_default()
        .insert(canonical.to_string(), value);
}

/// Remove one override; the sub-map is dropped when it empties.
pub fn clear_session_param(config: &mut SessionConfig, provider: &str, canonical: &str) -> bool {
    let key = params_key(provider);
    let Some(store) = config.params.get_mut(&key) else {
        return false;
    };
    let removed = store.remove(canonical).is_some();
    if store.is_empty() {
        config.params.remove(&key);
    }
    removed
}

pub fn clear_all_session_params(config: &mut SessionConfig, provider: &str) -> bool {
    config.params.remove(&params_key(provider)).is_some()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_aliases() -> HashMap<String, String> {
        HashMap::new()
    }

    fn thinking_aliases() -> HashMap<String, String> {
        HashMap::from([("enable_thinking".to_string(), "thinking.enabled".to_string())])
    }

    // ── Canonicalisation ──────────────────────────────────────────────────────

    #[test]
    fn common_alias_resolves() {
        assert_eq!(canonicalize(&no_aliases(), "temp").unwrap(), "temperature");
        assert_eq!(canonicalize(&no_aliases(), "stop_sequences").unwrap(), "stop");
    }

    #[test]
    fn provider_alias_resolves() {
        assert_eq!(
            canonicalize(&thinking_aliases(), "enable_thinking").unwrap(),
            "thinking.enabled"
        );
    }

    #[test]
    fn unknown_name_passes_through() {
        assert_eq!(canonicalize(&no_aliases(), "extras.custom").unwrap(), "extras.custom");
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(canonicalize(&no_aliases(), "  ").is_err());
    }

    #[test]
    fn display_name_prefers_provider_alias() {
        assert_eq!(display_name(&thinking_aliases(), "thinking.enabled"), "enable_thinking");
        assert_eq!(display_name(&no_aliases(), "extras.mirostat"), "mirostat");
        assert_eq!(display_name(&no_aliases(), "thinking.enabled"), "thinking.enabled");
    }

    // ── Coercion ──────────────────────────────────────────────────────────────

    #[test]
    fn integer_segment_truncates_float_strings() {
        assert_eq!(coerce("max_tokens", "512.7").unwrap(), Some(json!(512)));
        assert_eq!(coerce("thinking.max_tokens", "1024").unwrap(), Some(json!(1024)));
    }

    #[test]
    fn integer_segment_rejects_garbage() {
        assert!(coerce("top_k", "lots").is_err());
    }

    #[test]
    fn float_segment_parses() {
        assert_eq!(coerce("temperature", "0.7").unwrap(), Some(json!(0.7)));
        assert!(coerce("temperature", "warm").is_err());
    }

    #[test]
    fn stop_accepts_all_three_forms() {
        assert_eq!(coerce("stop", "END").unwrap(), Some(json!(["END"])));
        assert_eq!(coerce("stop", "a, b ,c").unwrap(), Some(json!(["a", "b", "c"])));
        assert_eq!(coerce("stop", r#"["x","y"]"#).unwrap(), Some(json!(["x", "y"])));
    }

    #[test]
    fn clear_sentinels_yield_none() {
        for raw in ["none", "NULL", "clear", "", "  "] {
            assert_eq!(coerce("temperature", raw).unwrap(), None, "raw={raw:?}");
        }
    }

    #[test]
    fn bool_words_coerce_for_generic_segments() {
        assert_eq!(coerce("thinking.enabled", "true").unwrap(), Some(json!(true)));
        assert_eq!(coerce("thinking.enabled", "ON").unwrap(), Some(json!(true)));
        assert_eq!(coerce("thinking.enabled", "0").unwrap(), Some(json!(false)));
    }

    #[test]
    fn json_object_strings_are_parsed() {
        assert_eq!(
            coerce("extras.routing", r#"{"order": ["a"]}"#).unwrap(),
            Some(json!({"order": ["a"]}))
        );
    }

    #[test]
    fn plain_strings_pass_through() {
        assert_eq!(coerce("extras.format", "deepseek").unwrap(), Some(json!("deepseek")));
    }

    // ── Path application ──────────────────────────────────────────────────────

    #[test]
    fn nested_path_creates_intermediate_maps() {
        let mut body = json!({"model": "m"});
        apply_path(&mut body, "thinking.enabled", Some(&json!(true)));
        assert_eq!(body["thinking"]["enabled"], json!(true));
        assert_eq!(body["model"], json!("m"));
    }

    #[test]
    fn removing_leaf_leaves_siblings() {
        let mut body = json!({"thinking": {"enabled": true, "max_tokens": 5}});
        apply_path(&mut body, "thinking.enabled", None);
        assert!(body["thinking"].get("enabled").is_none());
        assert_eq!(body["thinking"]["max_tokens"], json!(5));
    }

    #[test]
    fn stop_string_wrapped_to_list_at_leaf() {
        let mut body = json!({});
        apply_path(&mut body, "stop", Some(&json!("END")));
        assert_eq!(body["stop"], json!(["END"]));
    }

    #[test]
    fn apply_params_resolves_aliases_when_not_canonical() {
        let mut body = json!({});
        let mut params = Map::new();
        params.insert("enable_thinking".into(), json!(true));
        apply_params(&mut body, &params, &thinking_aliases(), false);
        assert_eq!(body["thinking"]["enabled"], json!(true));
    }

    // ── Session storage ───────────────────────────────────────────────────────

    #[test]
    fn set_is_idempotent() {
        let mut cfg = SessionConfig::default();
        set_session_param(&mut cfg, "deepseek", "thinking.enabled", json!(true));
        set_session_param(&mut cfg, "deepseek", "thinking.enabled", json!(true));
        let store = get_session_params(&cfg, "deepseek");
        assert_eq!(store.len(), 1);
        assert_eq!(store["thinking.enabled"], json!(true));
    }

    #[test]
    fn clear_is_idempotent_and_drops_empty_map() {
        let mut cfg = SessionConfig::default();
        set_session_param(&mut cfg, "deepseek", "thinking.enabled", json!(true));
        assert!(clear_session_param(&mut cfg, "deepseek", "thinking.enabled"));
        assert!(!clear_session_param(&mut cfg, "deepseek", "thinking.enabled"));
        assert!(!cfg.params.contains_key("deepseek_params"));
    }

    #[test]
    fn clear_all_removes_submap() {
        let mut cfg = SessionConfig::default();
        set_session_param(&mut cfg, "llama-cpp", "extras.mirostat", json!(2));
        assert!(clear_all_session_params(&mut cfg, "llama-cpp"));
        assert!(!clear_all_session_params(&mut cfg, "llama-cpp"));
    }

    #[test]
    fn params_key_uses_underscores() {
        assert_eq!(params_key("llama-cpp"), "llama_cpp_params");
    }

    // ── End-to-end: deepseek thinking toggle ──────────────────────────────────

    #[test]
    fn deepseek_thinking_round_trip() {
        let aliases = thinking_aliases();
        let mut cfg = SessionConfig::default();

        let canonical = canonicalize(&aliases, "enable_thinking").unwrap();
        let value = coerce(&canonical, "true").unwrap().unwrap();
        set_session_param(&mut cfg, "deepseek", &canonical, value);

        let mut body = json!({"model": "deepseek-chat"});
        apply_params(&mut body, &get_session_params(&cfg, "deepseek"), &aliases, true);
        assert_eq!(body["thinking"]["enabled"], json!(true));

        // Clearing via the sentinel removes the override.
        assert_eq!(coerce(&canonical, "none").unwrap(), None);
        clear_session_param(&mut cfg, "deepseek", &canonical);
        let mut body = json!({"model": "deepseek-chat"});
        apply_params(&mut body, &get_session_params(&cfg, "deepseek"), &aliases, true);
        assert!(body.get("thinking").is_none());
    }
}
