//! Chunked transcription of converted recordings.
//!
//! A converted WAV is cut into 30 s windows overlapping by 1 s, each window
//! goes through the shared [`Transcriber`] on a bounded worker pool, and the
//! per-window segments are merged into one [`Transcript`] stored through the
//! ledger.
//!
//! A file is transcribed at most once: the ledger's file lock serializes
//! concurrent requests and a stored transcript short-circuits later ones.
//! A failed run recomputes every window when retried.

pub mod merge;
pub mod window;

pub use merge::{clean_transcription, full_text, merge};
pub use window::{Window, plan_windows};

use crate::audio::wav;
use crate::config::TranscribeConfig;
use crate::defaults::{self, SAMPLE_RATE};
use crate::error::{Result, ScribeError};
use crate::ledger::{Segment, SessionLedger, Stage, Transcript};
use crate::stt::{Transcriber, WindowTranscription};
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy)]
pub struct TranscribeOptions {
    /// Permits for model calls. Calls into one whisper context still run
    /// one at a time.
    pub workers: usize,
    /// Extra attempts per window after the first.
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            workers: defaults::TRANSCRIBE_WORKERS,
            max_retries: defaults::WINDOW_RETRIES,
            retry_backoff: Duration::from_millis(defaults::RETRY_BACKOFF_MS),
        }
    }
}

impl From<&TranscribeConfig> for TranscribeOptions {
    fn from(config: &TranscribeConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            max_retries: config.max_retries,
            ..Self::default()
        }
    }
}

pub struct ChunkedTranscriber {
    ledger: Arc<SessionLedger>,
    transcriber: Arc<dyn Transcriber>,
    pool: Arc<Semaphore>,
    options: TranscribeOptions,
    runs: Mutex<HashMap<String, RunEntry>>,
}

/// Runs of one file that are in progress or waiting for its lock. They
/// share one cancel flag.
#[derive(Default)]
struct RunEntry {
    pending: usize,
    cancelled: Arc<AtomicBool>,
}

/// Keeps a run registered until it finishes or is dropped.
struct Registration<'a> {
    owner: &'a ChunkedTranscriber,
    file_id: String,
    cancelled: Arc<AtomicBool>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut runs = self.owner.runs();
        if let Some(entry) = runs.get_mut(&self.file_id) {
            entry.pending = entry.pending.saturating_sub(1);
            if entry.pending == 0 {
                runs.remove(&self.file_id);
            }
        }
    }
}

impl ChunkedTranscriber {
    pub fn new(
        ledger: Arc<SessionLedger>,
        transcriber: Arc<dyn Transcriber>,
        options: TranscribeOptions,
    ) -> Self {
        Self {
            ledger,
            transcriber,
            pool: Arc::new(Semaphore::new(options.workers.max(1))),
            options,
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn model_name(&self) -> &str {
        self.transcriber.model_name()
    }

    /// Ask the run for `file_id` to stop before its next window.
    ///
    /// Only runs that are registered, i.e. running or waiting for the file
    /// lock, are affected. A cancel with no run for `file_id` is ignored.
    pub fn cancel(&self, file_id: &str) -> bool {
        match self.runs().get(file_id) {
            Some(run) => {
                run.cancelled.store(true, Ordering::SeqCst);
                true
            }
            None => {
                tracing::debug!(file_id, "no run to cancel");
                false
            }
        }
    }

    fn runs(&self) -> std::sync::MutexGuard<'_, HashMap<String, RunEntry>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, file_id: &str) -> Registration<'_> {
        let mut runs = self.runs();
        let entry = runs.entry(file_id.to_string()).or_default();
        entry.pending += 1;
        Registration {
            owner: self,
            file_id: file_id.to_string(),
            cancelled: entry.cancelled.clone(),
        }
    }

    /// Transcribe a converted recording, or return its existing transcript.
    pub async fn transcribe(&self, file_id: &str) -> Result<Arc<Transcript>> {
        let run = self.register(file_id);
        let _lock = self.ledger.lock(file_id).await;
        self.transcribe_locked(file_id, &run.cancelled).await
    }

    async fn transcribe_locked(&self, file_id: &str, cancel: &AtomicBool) -> Result<Arc<Transcript>> {
        if let Some(existing) = self.ledger.get_transcript(file_id)? {
            // a run that stored its transcript but never completed the session
            if let Some(session) = self.ledger.get(file_id)
                && session.stage != Stage::Complete
                && session.stage.can_advance_to(Stage::Complete)
            {
                tracing::info!(file_id, stage = %session.stage, "transcript exists, completing session");
                self.ledger.advance(file_id, Stage::Complete, None)?;
            } else {
                tracing::debug!(file_id, "transcript exists, skipping");
            }
            return Ok(existing);
        }

        let session = self.ledger.get(file_id).ok_or_else(|| ScribeError::NotFound {
            file_id: file_id.to_string(),
        })?;
        // `Transcribing` here is a retried run; crash recovery never leaves
        // a live one behind and we hold the file lock.
        if !matches!(session.stage, Stage::Converted | Stage::Transcribing) {
            return Err(ScribeError::InvalidTransition {
                file_id: file_id.to_string(),
                from: session.stage.to_string(),
                to: Stage::Transcribing.to_string(),
            });
        }
        let converted = session.converted_path.clone().ok_or_else(|| {
            ScribeError::validation(format!("{file_id} has no converted file"))
        })?;
        if !self.transcriber.is_ready() {
            return Err(ScribeError::ResourceUnavailable {
                message: format!("transcriber {} is not ready", self.transcriber.model_name()),
            });
        }
        if cancel.load(Ordering::SeqCst) {
            return Err(ScribeError::Cancelled {
                file_id: file_id.to_string(),
            });
        }

        self.ledger.advance(file_id, Stage::Transcribing, None)?;
        tracing::info!(file_id, model = self.transcriber.model_name(), "transcribing");

        let stored = match self.run(file_id, &converted, cancel).await {
            Ok(transcript) => self.ledger.store_transcript(transcript),
            Err(e) => Err(e),
        };
        match stored {
            Ok(transcript) => Ok(transcript),
            Err(e) => {
                let window = match &e {
                    ScribeError::WindowFailed { window, .. } => Some(*window),
                    _ => None,
                };
                if let Err(ledger_err) = self.ledger.fail(file_id, &e.to_string(), window) {
                    tracing::error!(file_id, error = %ledger_err, "failed to record failure");
                }
                Err(e)
            }
        }
    }

    async fn run(&self, file_id: &str, converted: &Path, cancel: &AtomicBool) -> Result<Transcript> {
        let path = converted.to_path_buf();
        let samples = tokio::task::spawn_blocking(move || wav::read_mono_16k(&path))
            .await
            .map_err(|e| ScribeError::Other(format!("audio read task panicked: {e}")))??;
        let samples = Arc::new(samples);
        let duration = samples.len() as f64 / SAMPLE_RATE as f64;
        let windows = plan_windows(duration);
        tracing::debug!(file_id, duration, windows = windows.len(), "planned windows");

        let mut chunks: Vec<Vec<Segment>> = Vec::with_capacity(windows.len());
        let mut processing_ms = 0;
        for window in &windows {
            if cancel.load(Ordering::SeqCst) {
                tracing::info!(file_id, window = window.index, "cancelled");
                return Err(ScribeError::Cancelled {
                    file_id: file_id.to_string(),
                });
            }
            let transcription = self.transcribe_window(file_id, &samples, window).await?;
            processing_ms += transcription.inference_ms;
            chunks.push(
                transcription
                    .segments
                    .into_iter()
                    .map(|s| Segment {
                        start: s.start + window.start,
                        end: s.end + window.start,
                        ..s
                    })
                    .collect(),
            );
        }

        let segments = merge(&chunks, duration);
        Ok(Transcript {
            session_id: crate::ledger::session_id_for(file_id),
            file_id: file_id.to_string(),
            full_text: full_text(&segments),
            segments,
            model: self.transcriber.model_name().to_string(),
            language: self.transcriber.language().to_string(),
            audio_duration_secs: duration,
            windows: windows.len(),
            processing_ms,
            created_at: Utc::now(),
        })
    }

    /// One window, retried on transient errors.
    async fn transcribe_window(
        &self,
        file_id: &str,
        samples: &Arc<Vec<f32>>,
        window: &Window,
    ) -> Result<WindowTranscription> {
        let range = window.sample_range(samples.len());
        if range.is_empty() {
            return Ok(WindowTranscription::default());
        }

        let mut attempt = 0;
        loop {
            match self.call_model(samples.clone(), range.clone()).await {
                Ok(transcription) => {
                    tracing::debug!(
                        file_id,
                        window = window.index,
                        segments = transcription.segments.len(),
                        "window transcribed"
                    );
                    return Ok(transcription);
                }
                Err(e) if e.is_retryable() && attempt < self.options.max_retries => {
                    let delay = self
                        .options
                        .retry_backoff
                        .saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    tracing::warn!(file_id, window = window.index, attempt, error = %e, "window failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(ScribeError::WindowFailed {
                        window: window.index,
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run the model on a worker slot.
    async fn call_model(
        &self,
        samples: Arc<Vec<f32>>,
        range: std::ops::Range<usize>,
    ) -> Result<WindowTranscription> {
        let permit = self
            .pool
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ScribeError::ResourceUnavailable {
                message: "transcription worker pool closed".to_string(),
            })?;
        let transcriber = self.transcriber.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            transcriber.transcribe(&samples[range])
        })
        .await
        .map_err(|e| ScribeError::ResourceUnavailable {
            message: format!("transcription worker panicked: {e}"),
        })?
    }
}
