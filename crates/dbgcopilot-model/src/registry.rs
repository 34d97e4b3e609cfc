// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider registry backed by a JSON catalog file.
//!
//! The file lives at `DBGCOPILOT_LLM_PROVIDERS` (if set) or
//! `<configs dir>/llm_providers.json`.  On load, built-in entries that are
//! missing from the file are merged in and the file rewritten sorted with
//! two-space indentation.  Reads run on an immutable snapshot; mutations
//! (`add_provider`, `set_provider_field`) take the registry lock, persist,
//! and swap in a fresh snapshot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use dbgcopilot_config::{configs_dir, resolve_override_path};

use crate::builtin::builtin_providers;
use crate::client::ProviderClient;
use crate::types::SessionConfig;
use crate::{openai_compat, openrouter};

pub const REGISTRY_ENV_VAR: &str = "DBGCOPILOT_LLM_PROVIDERS";
const REGISTRY_FILENAME: &str = "llm_providers.json";

/// How a provider entry is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Mock,
    Openrouter,
    OpenaiCompatible,
}

impl Default for ProviderKind {
    fn default() -> Self {
        Self::OpenaiCompatible
    }
}

/// One persisted provider record.
///
/// Unknown fields round-trip through `extra` so hand-edited files survive a
/// load/save cycle untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub supports_model_list: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub param_aliases: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_params: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProviderEntry {
    /// Alias map in the form the parameter system consumes.
    pub fn alias_map(&self) -> std::collections::HashMap<String, String> {
        self.param_aliases
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    providers: BTreeMap<String, ProviderEntry>,
}

/// Process-wide provider catalog.
pub struct ProviderRegistry {
    path: PathBuf,
    snapshot: RwLock<Arc<BTreeMap<String, ProviderEntry>>>,
}

impl ProviderRegistry {
    /// Open the registry at its resolved default location.
    pub fn open() -> anyhow::Result<Self> {
        Self::with_path(Self::default_path())
    }

    /// Open the registry at an explicit path (tests, overrides).
    pub fn with_path(path: PathBuf) -> anyhow::Result<Self> {
        let providers = load_and_merge(&path)?;
        Ok(Self {
            path,
            snapshot: RwLock::new(Arc::new(providers)),
        })
    }

    /// Resolved registry file location (`DBGCOPILOT_LLM_PROVIDERS` or the
    /// discovered `configs/` directory).
    pub fn default_path() -> PathBuf {
        match std::env::var(REGISTRY_ENV_VAR) {
            Ok(raw) if !raw.trim().is_empty() => resolve_override_path(&raw),
            _ => configs_dir().join(REGISTRY_FILENAME),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.path
    }

    fn current(&self) -> Arc<BTreeMap<String, ProviderEntry>> {
        self.snapshot.read().expect("registry lock poisoned").clone()
    }

    /// Sorted provider names.
    pub fn list_providers(&self) -> Vec<String> {
        self.current().keys().cloned().collect()
    }

    pub fn get_provider(&self, name: &str) -> Option<ProviderEntry> {
        self.current().get(name).cloned()
    }

    /// Build a session-bound callable client for one provider.
    pub fn create_client(
        &self,
        name: &str,
        session: &SessionConfig,
    ) -> anyhow::Result<ProviderClient> {
        let entry = self
            .get_provider(name)
            .with_context(|| format!("Unknown provider: {name}"))?;
        Ok(ProviderClient::new(name.to_string(), entry, session.clone()))
    }

    /// Provider-specific model discovery; empty when unsupported.
    pub async fn list_models(
        &self,
        name: &str,
        session: &SessionConfig,
    ) -> anyhow::Result<Vec<String>> {
        let entry = self
            .get_provider(name)
            .with_context(|| format!("Unknown provider: {name}"))?;
        match entry.kind {
            ProviderKind::Mock => Ok(Vec::new()),
            ProviderKind::Openrouter => openrouter::list_models(session).await,
            ProviderKind::OpenaiCompatible => {
                openai_compat::list_models(name, session, &entry).await
            }
        }
    }

    /// The persisted entry for one provider.
    pub fn provider_config(&self, name: &str) -> anyhow::Result<ProviderEntry> {
        self.get_provider(name)
            .with_context(|| format!("Unknown provider: {name}"))
    }

    /// Read a whole entry (`field = None`) or one aliased field.
    pub fn get_provider_field(&self, name: &str, field: Option<&str>) -> anyhow::Result<Value> {
        let entry = self.provider_config(name)?;
        let Some(field) = field else {
            return Ok(serde_json::to_value(&entry)?);
        };
        let value = match resolve_field_alias(field)? {
            "base_url" => entry.base_url.map(Value::String),
            "path" => entry.path.map(Value::String),
            "default_model" => entry.default_model.map(Value::String),
            "description" => Some(Value::String(entry.description)),
            _ => None,
        };
        Ok(value.unwrap_or(Value::Null))
    }

    /// Set one aliased field, persist, and rebuild the snapshot.
    pub fn set_provider_field(&self, name: &str, field: &str, value: &str) -> anyhow::Result<String> {
        let key = resolve_field_alias(field)?;
        self.mutate(|providers| {
            let entry = providers
                .get_mut(name)
                .with_context(|| format!("Unknown provider: {name}"))?;
            match key {
                "base_url" => entry.base_url = Some(value.to_string()),
                "path" => entry.path = Some(value.to_string()),
                "default_model" => entry.default_model = Some(value.to_string()),
                "description" => entry.description = value.to_string(),
                _ => unreachable!("alias resolution is exhaustive"),
            }
            Ok(())
        })?;
        Ok(value.to_string())
    }

    /// Register a new OpenAI-compatible endpoint, persist, and rebuild.
    pub fn add_provider(
        &self,
        name: &str,
        base_url: &str,
        path: Option<&str>,
        default_model: Option<&str>,
        description: &str,
    ) -> anyhow::Result<ProviderEntry> {
        if name.trim().is_empty() {
            bail!("Provider name is required");
        }
        let entry = ProviderEntry {
            kind: ProviderKind::OpenaiCompatible,
            description: description.to_string(),
            base_url: Some(base_url.to_string()),
            path: Some(path.unwrap_or("/v1/chat/completions").to_string()),
            default_model: Some(default_model.unwrap_or("").to_string()),
            ..ProviderEntry::default()
        };
        let added = entry.clone();
        self.mutate(|providers| {
            if providers.contains_key(name) {
                bail!("Provider '{name}' already exists");
            }
            providers.insert(name.to_string(), entry);
            Ok(())
        })?;
        Ok(added)
    }

    /// Re-read the catalog from disk, merging any missing built-ins.
    pub fn reload(&self) -> anyhow::Result<()> {
        let providers = load_and_merge(&self.path)?;
        *self.snapshot.write().expect("registry lock poisoned") = Arc::new(providers);
        Ok(())
    }

    /// Apply a mutation under the write lock, persist, and swap the snapshot.
    fn mutate(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, ProviderEntry>) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let mut guard = self.snapshot.write().expect("registry lock poisoned");
        let mut providers = (**guard).clone();
        f(&mut providers)?;
        save(&self.path, &providers)?;
        *guard = Arc::new(providers);
        Ok(())
    }
}

/// Accepted field aliases for `get/set_provider_field`.
fn resolve_field_alias(field: &str) -> anyhow::Result<&'static str> {
    match field.to_lowercase().as_str() {
        "baseurl" | "base_url" => Ok("base_url"),
        "path" => Ok("path"),
        "model" | "default_model" => Ok("default_model"),
        "desc" | "description" => Ok("description"),
        _ => bail!("Field must be one of: baseurl, path, model, desc"),
    }
}

/// Read the catalog, merging missing built-ins; rewrites the file when it
/// was absent, unreadable, or gained merged entries.
fn load_and_merge(path: &Path) -> anyhow::Result<BTreeMap<String, ProviderEntry>> {
    let mut providers: BTreeMap<String, ProviderEntry> = match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<RegistryFile>(&raw) {
            Ok(file) => file.providers,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "provider registry unreadable; rebuilding from defaults");
                BTreeMap::new()
            }
        },
        Err(_) => BTreeMap::new(),
    };

    let mut merged = false;
    for (name, entry) in builtin_providers() {
        if !providers.contains_key(&name) {
            providers.insert(name, entry);
            merged = true;
        }
    }
    if merged || !path.exists() {
        save(path, &providers)?;
    }
    Ok(providers)
}

fn save(path: &Path, providers: &BTreeMap<String, ProviderEntry>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = RegistryFile {
        providers: providers.clone(),
    };
    let mut text = serde_json::to_string_pretty(&file)?;
    text.push('\n');
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
