//! fieldscribe - field-recording ingestion and Norwegian transcription
//!
//! Pulls recordings from a remote drop folder, converts them to 16 kHz mono
//! WAV and transcribes them with NB-Whisper in overlapping 30 s windows.
//! Every file's progress is tracked in a durable session ledger.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod convert;
pub mod defaults;
pub mod diagnostics;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod remote;
pub mod store;
pub mod stt;
pub mod sync;
pub mod transcribe;

// Stage runners
pub use convert::{ConversionResult, Converter};
pub use sync::{FullSyncReport, SyncReport, Synchronizer};
pub use transcribe::ChunkedTranscriber;

// State
pub use ledger::{ProcessingSession, Segment, SessionLedger, Stage, StatusView, Transcript};
pub use store::LocalStore;

// Seams
pub use remote::{RemoteFile, RemoteInventory};
pub use stt::Transcriber;

// Composition
pub use pipeline::Pipeline;
pub use queue::{CancelHandle, Job, JobOutcome, JobTicket, WorkQueue};

// Error handling
pub use error::{Result, ScribeError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{version}+{hash}"),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {ver}"
        );
    }

    #[test]
    fn version_string_has_hash_only_when_built_from_git() {
        let ver = version_string();
        match option_env!("GIT_HASH") {
            Some(hash) if !hash.is_empty() => assert!(ver.ends_with(&format!("+{hash}"))),
            _ => assert_eq!(ver, env!("CARGO_PKG_VERSION")),
        }
    }
}
