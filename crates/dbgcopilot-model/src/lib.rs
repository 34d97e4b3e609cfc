// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! LLM provider layer: registry, clients, and the parameter system.
//!
//! The registry is a JSON-file-backed catalog of provider entries merged
//! with built-in defaults.  A [`ProviderClient`] is a session-bound handle
//! built from one entry plus the session's configuration overrides; after
//! each call it exposes the extracted [`UsageRecord`].

pub mod params;
pub mod registry;

mod builtin;
mod client;
mod mock;
mod openai_compat;
mod openrouter;
mod types;

pub use client::ProviderClient;
pub use registry::{ProviderEntry, ProviderKind, ProviderRegistry};
pub use types::{SessionConfig, UsageRecord};
