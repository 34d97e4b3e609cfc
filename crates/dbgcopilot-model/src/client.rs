// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use crate::registry::{ProviderEntry, ProviderKind};
use crate::types::{SessionConfig, UsageRecord};
use crate::{mock, openai_compat, openrouter};

/// Session-bound provider handle.
///
/// Built by [`crate::ProviderRegistry::create_client`]; holds a snapshot of
/// the session configuration so that key/model/parameter overrides taken at
/// dispatch time stay stable for the duration of one call.  After each
/// successful [`ask`](Self::ask) the usage extracted from the response is
/// available in `last_usage`.
#[derive(Debug)]
pub struct ProviderClient {
    name: String,
    entry: ProviderEntry,
    session: SessionConfig,
    http: reqwest::Client,
    /// Cursor into a mock entry's scripted `replies` array.
    mock_cursor: usize,
    pub last_usage: Option<UsageRecord>,
}

impl ProviderClient {
    pub(crate) fn new(name: String, entry: ProviderEntry, session: SessionConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(openai_compat::REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            name,
            entry,
            session,
            http,
            mock_cursor: 0,
            last_usage: None,
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.name
    }

    /// Send one prompt and return the reply content.
    ///
    /// Provider transport and configuration problems surface as errors; the
    /// orchestrator catches them at the dispatch site and renders a
    /// user-visible `LLM provider error:` line.
    pub async fn ask(&mut self, prompt: &str) -> anyhow::Result<String> {
        let (content, usage) = match self.entry.kind {
            ProviderKind::Mock => {
                // A mock entry may script its replies via a `replies` array;
                // once exhausted (or absent) the heuristic answers apply.
                let scripted = self
                    .entry
                    .extra
                    .get("replies")
                    .and_then(|v| v.as_array())
                    .and_then(|arr| arr.get(self.mock_cursor))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let content = match scripted {
                    Some(reply) => {
                        self.mock_cursor += 1;
                        reply
                    }
                    None => mock::answer(prompt),
                };
                let usage = UsageRecord {
                    provider: self.name.clone(),
                    model: "mock".into(),
                    ..UsageRecord::default()
                };
                (content, usage)
            }
            ProviderKind::Openrouter => {
                openrouter::ask(&self.http, &self.session, &self.entry, prompt).await?
            }
            ProviderKind::OpenaiCompatible => {
                openai_compat::ask(&self.http, &self.name, &self.session, &self.entry, prompt)
                    .await?
            }
        };
        self.last_usage = Some(usage);
        Ok(content)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_client() -> ProviderClient {
        let entry = ProviderEntry {
            kind: ProviderKind::Mock,
            ..ProviderEntry::default()
        };
        ProviderClient::new("mock-local".into(), entry, SessionConfig::default())
    }

    #[tokio::test]
    async fn mock_ask_sets_last_usage() {
        let mut client = mock_client();
        assert!(client.last_usage.is_none());
        let reply = client.ask("explain the crash").await.unwrap();
        assert!(reply.contains("(mock)"));
        let usage = client.last_usage.as_ref().unwrap();
        assert_eq!(usage.provider, "mock-local");
        assert_eq!(usage.model, "mock");
    }

    #[tokio::test]
    async fn provider_name_is_exposed() {
        let client = mock_client();
        assert_eq!(client.provider_name(), "mock-local");
    }

    #[tokio::test]
    async fn scripted_replies_play_in_order_then_fall_back() {
        let mut extra = serde_json::Map::new();
        extra.insert(
            "replies".into(),
            serde_json::json!(["first", "second"]),
        );
        let entry = ProviderEntry {
            kind: ProviderKind::Mock,
            extra,
            ..ProviderEntry::default()
        };
        let mut client = ProviderClient::new("scripted".into(), entry, SessionConfig::default());
        assert_eq!(client.ask("x").await.unwrap(), "first");
        assert_eq!(client.ask("x").await.unwrap(), "second");
        assert!(client.ask("x").await.unwrap().contains("(mock)"));
    }
}
