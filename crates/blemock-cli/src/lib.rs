//! # blemock-cli
//!
//! Shared plumbing for the blemock command-line tools.
//!
//! The binaries are thin: they load [`blemock_core::Settings`], initialize
//! logging, wire a collaborator into a core session and print what happens.
//! Everything they share lives here so it can be tested without a terminal.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod logging;
pub mod menu;
pub mod report;
pub mod shutdown;

use std::process::ExitCode;

use blemock_core::{BleMockError, Settings};
use tracing::error;

/// Loads settings, turning failures into a printable message.
///
/// # Errors
///
/// Returns the load or validation error.
pub fn load_settings() -> anyhow::Result<Settings> {
    Settings::load().map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))
}

/// One-line description of a top-level failure for the terminal.
#[must_use]
pub fn describe_failure(err: &anyhow::Error) -> String {
    match err.downcast_ref::<BleMockError>() {
        Some(BleMockError::PrerequisiteMissing(what)) => format!("error: {what}"),
        Some(e) => format!("error: {e}"),
        None => format!("error: {err:#}"),
    }
}

/// Reports a top-level failure and returns the process exit code.
///
/// Every fatal error exits with status 1.
#[must_use]
pub fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<BleMockError>() {
        Some(e) => error!(code = e.error_code(), error = %e, "Fatal error"),
        None => error!(error = %err, "Fatal error"),
    }
    println!("{}", describe_failure(err));
    ExitCode::FAILURE
}

/// Whether logs should also go to a rolling JSON file.
#[must_use]
pub fn is_production() -> bool {
    std::env::var("BLEMOCK_ENV").is_ok_and(|v| v.eq_ignore_ascii_case("production"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prerequisite_message_is_bare() {
        let err = anyhow::Error::new(BleMockError::PrerequisiteMissing("adb not found".into()));
        assert_eq!(describe_failure(&err), "error: adb not found");
    }

    #[test]
    fn test_other_errors_keep_context() {
        let err = anyhow::anyhow!("disk full").context("saving export");
        assert_eq!(describe_failure(&err), "error: saving export: disk full");
    }
}
