// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! LLDB backend selection: API adapter preferred, PTY subprocess fallback.
//!
//! Both the plain and the Rust-profile variants go through here.  The Rust
//! profile launches `rust-lldb` (subprocess) and applies the step-avoid
//! regex and `bt` alias in either adapter.

use tracing::warn;

use crate::lldb::LldbBackend;
use crate::lldb_api::LldbApiBackend;
use crate::DebuggerBackend;

/// Build the LLDB backend, preferring the API adapter.
///
/// The API path fails fast when the bindings probe does not pass (or the
/// kill-switch is set); the subprocess adapter then takes over and the
/// reason is logged.
pub(crate) async fn create_lldb_backend(
    rust_profile: bool,
) -> anyhow::Result<Box<dyn DebuggerBackend>> {
    let mut api = if rust_profile {
        LldbApiBackend::rust()
    } else {
        LldbApiBackend::new()
    };
    match api.initialize().await {
        Ok(()) => return Ok(Box::new(api)),
        Err(api_err) => {
            warn!(error = %api_err, "LLDB API backend unavailable, using subprocess backend");
        }
    }

    let mut subprocess = if rust_profile {
        LldbBackend::rust()
    } else {
        LldbBackend::new()
    };
    subprocess.initialize().await?;
    Ok(Box::new(subprocess))
}
