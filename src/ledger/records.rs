//! Persisted ledger records.

use super::stage::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Namespace for deriving session ids from file ids.
const SESSION_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_5c2e_93d4_4b7a_8e0f_2d61_c4b9_7e35);

/// Stable session id for a file id.
pub fn session_id_for(file_id: &str) -> Uuid {
    Uuid::new_v5(&SESSION_NAMESPACE, file_id.as_bytes())
}

/// The tracked unit of work for one recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSession {
    pub session_id: Uuid,
    pub file_id: String,
    /// Remote display name, kept for status output.
    #[serde(default)]
    pub name: String,
    pub stage: Stage,
    /// Stage that was interrupted, while `stage` is `Failed`.
    #[serde(default)]
    pub failed_at: Option<Stage>,
    /// Window index that exhausted its retries.
    #[serde(default)]
    pub failed_window: Option<usize>,
    /// Human-readable detail of the last error.
    #[serde(default)]
    pub error: Option<String>,
    /// Note attached to the last successful transition.
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub converted_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingSession {
    pub fn new(file_id: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id_for(file_id),
            file_id: file_id.to_string(),
            name: name.to_string(),
            stage: Stage::Detected,
            failed_at: None,
            failed_window: None,
            error: None,
            detail: None,
            converted_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.stage == Stage::Failed
    }
}

/// One merged, time-aligned piece of a transcript. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub confidence: f32,
}

/// The finished transcription of one recording. Written once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub session_id: Uuid,
    pub file_id: String,
    pub segments: Vec<Segment>,
    pub full_text: String,
    pub model: String,
    pub language: String,
    pub audio_duration_secs: f64,
    pub windows: usize,
    /// Sum of per-window inference time.
    pub processing_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Read-only projection of a session for status consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub file_id: String,
    pub session_id: Uuid,
    pub name: String,
    pub stage: Stage,
    pub failed_at: Option<Stage>,
    pub failed_window: Option<usize>,
    pub error: Option<String>,
    pub has_transcript: bool,
    pub updated_at: DateTime<Utc>,
}

impl StatusView {
    pub(crate) fn from_session(session: &ProcessingSession, has_transcript: bool) -> Self {
        Self {
            file_id: session.file_id.clone(),
            session_id: session.session_id,
            name: session.name.clone(),
            stage: session.stage,
            failed_at: session.failed_at,
            failed_window: session.failed_window,
            error: session.error.clone(),
            has_transcript,
            updated_at: session.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_stable_per_file() {
        assert_eq!(session_id_for("rec-1"), session_id_for("rec-1"));
        assert_ne!(session_id_for("rec-1"), session_id_for("rec-2"));
        assert_eq!(ProcessingSession::new("rec-1", "a.m4a").session_id, session_id_for("rec-1"));
    }

    #[test]
    fn old_session_files_without_optional_fields_load() {
        let json = r#"{
            "session_id": "00000000-0000-0000-0000-000000000000",
            "file_id": "A",
            "stage": "downloaded",
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:00:00Z"
        }"#;
        let session: ProcessingSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.stage, Stage::Downloaded);
        assert!(session.error.is_none());
        assert!(session.name.is_empty());
    }
}
