//! Converter: original recordings to canonical 16 kHz mono WAV.
//!
//! Conversion writes to a temporary file beside the target, validates the
//! header duration against the decoded source, and only then renames it into
//! `converted/<id>.wav`. A failed attempt leaves the original untouched and
//! puts the session back at `downloaded` with the error recorded.

use crate::audio::{self, wav};
use crate::config::ConvertConfig;
use crate::defaults::{self, SAMPLE_RATE};
use crate::error::{Result, ScribeError};
use crate::ledger::{SessionLedger, Stage};
use crate::store::LocalStore;
use futures_util::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionResult {
    pub file_id: String,
    pub original_path: Option<PathBuf>,
    pub converted_path: Option<PathBuf>,
    pub duration_ms: u64,
    pub conversion_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl ConversionResult {
    fn failed(file_id: &str, original_path: Option<PathBuf>, error: &ScribeError) -> Self {
        Self {
            file_id: file_id.to_string(),
            original_path,
            converted_path: None,
            duration_ms: 0,
            conversion_ms: 0,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConversionStats {
    pub originals: usize,
    pub converted: usize,
    /// Share of originals with a converted file, 0.0 to 1.0.
    pub ratio: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions {
    pub concurrency: usize,
    pub tolerance_ms: u64,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            concurrency: defaults::CONVERT_CONCURRENCY,
            tolerance_ms: defaults::DURATION_TOLERANCE_MS,
        }
    }
}

impl From<&ConvertConfig> for ConvertOptions {
    fn from(config: &ConvertConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            tolerance_ms: config.tolerance_ms,
        }
    }
}

/// Reject an output whose duration drifted from the source.
pub fn check_duration(source_ms: u64, output_ms: u64, tolerance_ms: u64) -> Result<()> {
    let drift = source_ms.abs_diff(output_ms);
    if drift > tolerance_ms {
        return Err(ScribeError::validation(format!(
            "converted duration {output_ms} ms differs from source {source_ms} ms by {drift} ms"
        )));
    }
    Ok(())
}

/// Decode, resample, write and validate. Returns the output duration.
fn convert_file(original: &Path, tmp: &Path, target: &Path, tolerance_ms: u64) -> Result<u64> {
    let decoded = audio::decode_file(original)?;
    let source_ms = decoded.duration_ms();
    let samples = wav::resample(&decoded.samples, decoded.sample_rate, SAMPLE_RATE);

    let outcome = wav::write_canonical(tmp, &samples)
        .and_then(|()| wav::duration_ms(tmp))
        .and_then(|output_ms| check_duration(source_ms, output_ms, tolerance_ms).map(|()| output_ms));

    match outcome {
        Ok(output_ms) => {
            std::fs::rename(tmp, target)?;
            Ok(output_ms)
        }
        Err(e) => {
            let _ = std::fs::remove_file(tmp);
            Err(e)
        }
    }
}

pub struct Converter {
    store: LocalStore,
    ledger: Arc<SessionLedger>,
    options: ConvertOptions,
}

impl Converter {
    pub fn new(store: LocalStore, ledger: Arc<SessionLedger>, options: ConvertOptions) -> Self {
        Self {
            store,
            ledger,
            options,
        }
    }

    /// Convert one downloaded recording. Failures are reported in the
    /// result and on the session, never returned.
    pub async fn convert(&self, file_id: &str) -> ConversionResult {
        let _lock = self.ledger.lock(file_id).await;
        let started = Instant::now();
        let original = self.store.find_original(file_id);

        match self.convert_locked(file_id).await {
            Ok((converted, duration_ms)) => ConversionResult {
                file_id: file_id.to_string(),
                original_path: original,
                converted_path: Some(converted),
                duration_ms,
                conversion_ms: started.elapsed().as_millis() as u64,
                success: true,
                error: None,
            },
            Err(e) => {
                tracing::warn!(file_id, error = %e, "conversion failed");
                if !matches!(e, ScribeError::NotFound { .. })
                    && let Err(record) = self.ledger.record_error(file_id, &e.to_string())
                {
                    tracing::error!(file_id, error = %record, "could not record conversion error");
                }
                ConversionResult::failed(file_id, original, &e)
            }
        }
    }

    async fn convert_locked(&self, file_id: &str) -> Result<(PathBuf, u64)> {
        let session = self.ledger.get(file_id).ok_or_else(|| ScribeError::NotFound {
            file_id: file_id.to_string(),
        })?;
        let target = self.store.converted_path(file_id);

        match session.stage {
            Stage::Downloaded | Stage::Converting => {}
            Stage::Converted | Stage::Transcribing | Stage::Complete if target.is_file() => {
                tracing::debug!(file_id, "already converted");
                return Ok((target.clone(), wav::duration_ms(&target)?));
            }
            stage => {
                return Err(ScribeError::InvalidTransition {
                    file_id: file_id.to_string(),
                    from: stage.to_string(),
                    to: Stage::Converting.to_string(),
                });
            }
        }

        let asset = self.store.asset(file_id).ok_or_else(|| {
            ScribeError::validation(format!("no original on disk for {file_id}"))
        })?;
        let ext = asset
            .original_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        if !defaults::is_supported_extension(ext) {
            return Err(ScribeError::validation(format!(
                "unsupported audio format: .{ext}"
            )));
        }

        self.ledger.advance(file_id, Stage::Converting, None)?;
        tracing::info!(file_id, "converting");

        let tmp = self.store.converted_dir().join(format!("{file_id}.wav.tmp"));
        let original = asset.original_path.clone();
        let dest = target.clone();
        let tolerance = self.options.tolerance_ms;
        let converted =
            tokio::task::spawn_blocking(move || convert_file(&original, &tmp, &dest, tolerance))
                .await
                .map_err(|e| ScribeError::Other(format!("conversion task panicked: {e}")))
                .and_then(|r| r);

        match converted {
            Ok(duration_ms) => {
                self.ledger.mark_converted(file_id, &target)?;
                tracing::info!(file_id, duration_ms, "converted");
                Ok((target, duration_ms))
            }
            Err(e) => {
                self.ledger.revert_conversion(file_id, &e.to_string())?;
                Err(e)
            }
        }
    }

    /// Convert every session waiting at `downloaded`, continuing past failures.
    pub async fn convert_all(&self) -> Vec<ConversionResult> {
        let mut pending = self.ledger.sessions_in(Stage::Downloaded);
        pending.extend(self.ledger.sessions_in(Stage::Converting));

        let mut results: Vec<ConversionResult> = futures_util::stream::iter(pending)
            .map(|session| async move { self.convert(&session.file_id).await })
            .buffer_unordered(self.options.concurrency)
            .collect()
            .await;
        results.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        results
    }

    pub fn stats(&self) -> Result<ConversionStats> {
        let assets = self.store.scan()?;
        let originals = assets.len();
        let converted = assets.iter().filter(|a| a.converted_path.is_some()).count();
        let ratio = if originals == 0 {
            0.0
        } else {
            converted as f64 / originals as f64
        };
        Ok(ConversionStats {
            originals,
            converted,
            ratio,
        })
    }
}
