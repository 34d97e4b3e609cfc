// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Session state and the orchestrator turn loop.
//!
//! The orchestrator owns one debugger backend and one session, composes a
//! bounded prompt from accumulated state, dispatches to the selected
//! provider, and either executes a `<cmd>` directive from the reply or
//! surfaces the reply to the user.

mod orchestrator;
mod session;
pub mod text;

pub use orchestrator::{extract_cmd, Orchestrator};
pub use session::{
    resolve_auto_round_limit, Attempt, OutputSink, SessionState, DEFAULT_AUTO_ROUND_LIMIT,
};
