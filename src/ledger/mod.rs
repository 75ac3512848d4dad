//! Session ledger: durable per-file processing state.
//!
//! One [`ProcessingSession`] and at most one [`Transcript`] per file id, each
//! persisted as a JSON document under the store root. All stage changes go
//! through [`SessionLedger::advance`] and friends, which enforce the stage
//! order from [`Stage::can_advance_to`].
//!
//! Writes land in `<file>.tmp` and are renamed into place, so a crash leaves
//! either the old or the new document. On open, sessions caught in an
//! in-flight stage are flipped to `failed` with detail `interrupted`.

pub mod records;
pub mod stage;

pub use records::{ProcessingSession, Segment, StatusView, Transcript, session_id_for};
pub use stage::Stage;

use crate::error::{Result, ScribeError};
use crate::store::{LocalAsset, LocalStore, validate_file_id};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Detail recorded on sessions found mid-stage after a restart.
pub const INTERRUPTED: &str = "interrupted";

/// Exclusive claim on one file id; dropping it releases the file.
pub type FileLock = tokio::sync::OwnedMutexGuard<()>;

pub struct SessionLedger {
    sessions_dir: PathBuf,
    transcripts_dir: PathBuf,
    sessions: Mutex<BTreeMap<String, ProcessingSession>>,
    transcripts: Mutex<HashMap<String, Arc<Transcript>>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn invalid(session: &ProcessingSession, to: impl ToString) -> ScribeError {
    ScribeError::InvalidTransition {
        file_id: session.file_id.clone(),
        from: session.stage.to_string(),
        to: to.to_string(),
    }
}

impl SessionLedger {
    /// Load every persisted session and recover interrupted ones.
    pub fn open(store: &LocalStore) -> Result<Self> {
        let sessions_dir = store.sessions_dir();
        let transcripts_dir = store.transcripts_dir();
        fs::create_dir_all(&sessions_dir)?;
        fs::create_dir_all(&transcripts_dir)?;

        let mut sessions = BTreeMap::new();
        for entry in fs::read_dir(&sessions_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<ProcessingSession>(&path) {
                Ok(session) => {
                    sessions.insert(session.file_id.clone(), session);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable session file");
                }
            }
        }

        let ledger = Self {
            sessions_dir,
            transcripts_dir,
            sessions: Mutex::new(sessions),
            transcripts: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        };

        let recovered = ledger.interrupt_in_flight()?;
        if recovered > 0 {
            tracing::warn!(count = recovered, "marked interrupted sessions as failed");
        }
        Ok(ledger)
    }

    fn session_path(&self, file_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{file_id}.json"))
    }

    fn transcript_path(&self, file_id: &str) -> PathBuf {
        self.transcripts_dir.join(format!("{file_id}.json"))
    }

    /// Apply `change` to a copy of the session, persist it, then publish it.
    fn update<F>(&self, file_id: &str, change: F) -> Result<ProcessingSession>
    where
        F: FnOnce(&mut ProcessingSession) -> Result<()>,
    {
        let mut sessions = guard(&self.sessions);
        let current = sessions.get(file_id).ok_or_else(|| ScribeError::NotFound {
            file_id: file_id.to_string(),
        })?;
        let mut next = current.clone();
        change(&mut next)?;
        next.updated_at = Utc::now();
        write_json(&self.session_path(file_id), &next)?;
        sessions.insert(file_id.to_string(), next.clone());
        Ok(next)
    }

    /// The session for `file_id`, creating it at `Detected` on first sight.
    pub fn get_or_create(&self, file_id: &str, name: &str) -> Result<ProcessingSession> {
        validate_file_id(file_id)?;
        let mut sessions = guard(&self.sessions);
        if let Some(session) = sessions.get(file_id) {
            return Ok(session.clone());
        }
        let session = ProcessingSession::new(file_id, name);
        write_json(&self.session_path(file_id), &session)?;
        sessions.insert(file_id.to_string(), session.clone());
        tracing::debug!(file_id, "session created");
        Ok(session)
    }

    pub fn get(&self, file_id: &str) -> Option<ProcessingSession> {
        guard(&self.sessions).get(file_id).cloned()
    }

    /// Move a session to `to`, rejecting moves the stage order forbids.
    pub fn advance(
        &self,
        file_id: &str,
        to: Stage,
        detail: Option<&str>,
    ) -> Result<ProcessingSession> {
        if to == Stage::Failed {
            return self.fail(file_id, detail.unwrap_or("failed"), None);
        }
        self.update(file_id, |session| {
            if !session.stage.can_advance_to(to) {
                return Err(invalid(session, to));
            }
            if to.reached(Stage::Converted) && session.converted_path.is_none() {
                return Err(ScribeError::validation(format!(
                    "{file_id} cannot reach {to} without a converted file"
                )));
            }
            tracing::debug!(file_id, from = %session.stage, to = %to, "stage advanced");
            session.stage = to;
            session.error = None;
            session.detail = detail.map(str::to_string);
            Ok(())
        })
    }

    /// Record the converted file and advance to `Converted`.
    pub fn mark_converted(&self, file_id: &str, path: &Path) -> Result<ProcessingSession> {
        self.update(file_id, |session| {
            if !session.stage.can_advance_to(Stage::Converted) {
                return Err(invalid(session, Stage::Converted));
            }
            session.stage = Stage::Converted;
            session.converted_path = Some(path.to_path_buf());
            session.error = None;
            session.detail = None;
            Ok(())
        })
    }

    /// Undo a conversion attempt: back to `Downloaded` with the error kept.
    pub fn revert_conversion(&self, file_id: &str, error: &str) -> Result<ProcessingSession> {
        self.update(file_id, |session| {
            if !matches!(session.stage, Stage::Converting | Stage::Downloaded) {
                return Err(invalid(session, Stage::Downloaded));
            }
            session.stage = Stage::Downloaded;
            session.converted_path = None;
            session.error = Some(error.to_string());
            Ok(())
        })
    }

    /// Mark a session failed at its current stage.
    pub fn fail(
        &self,
        file_id: &str,
        detail: &str,
        window: Option<usize>,
    ) -> Result<ProcessingSession> {
        self.update(file_id, |session| {
            if session.stage.is_terminal() {
                return Err(invalid(session, Stage::Failed));
            }
            tracing::warn!(file_id, stage = %session.stage, window, detail, "session failed");
            session.failed_at = Some(session.stage);
            session.failed_window = window;
            session.stage = Stage::Failed;
            session.error = Some(detail.to_string());
            Ok(())
        })
    }

    /// Note a per-file error without moving the stage. Terminal sessions
    /// keep what they have.
    pub fn record_error(&self, file_id: &str, detail: &str) -> Result<ProcessingSession> {
        let current = self.get(file_id).ok_or_else(|| ScribeError::NotFound {
            file_id: file_id.to_string(),
        })?;
        if current.stage.is_terminal() || current.error.as_deref() == Some(detail) {
            return Ok(current);
        }
        self.update(file_id, |session| {
            tracing::debug!(file_id, stage = %session.stage, detail, "error recorded");
            session.error = Some(detail.to_string());
            Ok(())
        })
    }

    /// Put a failed session back at the stage that failed.
    pub fn retry(&self, file_id: &str) -> Result<ProcessingSession> {
        self.update(file_id, |session| {
            if !session.is_failed() {
                return Err(invalid(session, "retry"));
            }
            let resume = session.failed_at.unwrap_or(Stage::Detected);
            tracing::info!(file_id, stage = %resume, "retrying session");
            session.stage = resume;
            session.failed_at = None;
            session.failed_window = None;
            session.error = None;
            session.detail = Some("retried".to_string());
            Ok(())
        })
    }

    /// Drop the stored transcript and send a complete session back to `Converted`.
    pub fn retranscribe(&self, file_id: &str) -> Result<ProcessingSession> {
        let session = self.update(file_id, |session| {
            if session.stage != Stage::Complete {
                return Err(invalid(session, "retranscribe"));
            }
            if session.converted_path.is_none() {
                return Err(ScribeError::validation(format!(
                    "{file_id} has no converted file to transcribe"
                )));
            }
            session.stage = Stage::Converted;
            session.detail = Some("re-transcription requested".to_string());
            Ok(())
        })?;

        guard(&self.transcripts).remove(file_id);
        match fs::remove_file(self.transcript_path(file_id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(session)
    }

    /// Flip every in-flight session to `Failed` with detail `interrupted`.
    pub fn interrupt_in_flight(&self) -> Result<usize> {
        let in_flight: Vec<String> = guard(&self.sessions)
            .values()
            .filter(|s| s.stage.is_in_flight())
            .map(|s| s.file_id.clone())
            .collect();
        for file_id in &in_flight {
            self.fail(file_id, INTERRUPTED, None)?;
        }
        Ok(in_flight.len())
    }

    /// Create sessions for assets found on disk without one.
    pub fn adopt(&self, assets: &[LocalAsset]) -> Result<usize> {
        let mut adopted = 0;
        for asset in assets {
            if self.get(&asset.file_id).is_some() {
                continue;
            }
            let name = asset
                .original_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.get_or_create(&asset.file_id, &name)?;
            self.advance(&asset.file_id, Stage::Downloaded, Some("adopted from store"))?;
            if let Some(converted) = &asset.converted_path {
                self.mark_converted(&asset.file_id, converted)?;
            }
            adopted += 1;
        }
        Ok(adopted)
    }

    fn file_mutex(&self, file_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        guard(&self.locks)
            .entry(file_id.to_string())
            .or_default()
            .clone()
    }

    /// Wait for exclusive access to `file_id`.
    pub async fn lock(&self, file_id: &str) -> FileLock {
        self.file_mutex(file_id).lock_owned().await
    }

    /// Claim `file_id` if nobody else holds it.
    pub fn try_lock(&self, file_id: &str) -> Option<FileLock> {
        self.file_mutex(file_id).try_lock_owned().ok()
    }

    /// Persist a transcript and complete its session.
    ///
    /// Transcripts are written once: if one already exists it is returned
    /// and `transcript` is dropped.
    pub fn store_transcript(&self, transcript: Transcript) -> Result<Arc<Transcript>> {
        let file_id = transcript.file_id.clone();
        if let Some(existing) = self.get_transcript(&file_id)? {
            return Ok(existing);
        }
        write_json(&self.transcript_path(&file_id), &transcript)?;
        let stored = Arc::new(transcript);
        guard(&self.transcripts).insert(file_id.clone(), stored.clone());
        self.advance(&file_id, Stage::Complete, None)?;
        tracing::info!(file_id, segments = stored.segments.len(), "transcript stored");
        Ok(stored)
    }

    pub fn get_status(&self, file_id: &str) -> Option<StatusView> {
        let session = self.get(file_id)?;
        let has_transcript = guard(&self.transcripts).contains_key(file_id)
            || self.transcript_path(file_id).is_file();
        Some(StatusView::from_session(&session, has_transcript))
    }

    /// The stored transcript, loaded from disk once and then shared.
    pub fn get_transcript(&self, file_id: &str) -> Result<Option<Arc<Transcript>>> {
        let mut transcripts = guard(&self.transcripts);
        if let Some(transcript) = transcripts.get(file_id) {
            return Ok(Some(transcript.clone()));
        }
        let path = self.transcript_path(file_id);
        if !path.is_file() {
            return Ok(None);
        }
        let transcript: Arc<Transcript> = Arc::new(read_json(&path)?);
        transcripts.insert(file_id.to_string(), transcript.clone());
        Ok(Some(transcript))
    }

    /// Every session, ordered by file id.
    pub fn sessions(&self) -> Vec<ProcessingSession> {
        guard(&self.sessions).values().cloned().collect()
    }

    pub fn sessions_in(&self, stage: Stage) -> Vec<ProcessingSession> {
        guard(&self.sessions)
            .values()
            .filter(|s| s.stage == stage)
            .cloned()
            .collect()
    }

    /// Number of sessions per stage; stages without sessions are omitted.
    pub fn stage_counts(&self) -> BTreeMap<Stage, usize> {
        let mut counts = BTreeMap::new();
        for session in guard(&self.sessions).values() {
            *counts.entry(session.stage).or_insert(0) += 1;
        }
        counts
    }
}
