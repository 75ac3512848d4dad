//! Whisper-based speech-to-text transcription.
//!
//! NB-Whisper ggml models run through whisper-rs with the language forced to
//! Norwegian. Segment timestamps come back in centiseconds relative to the
//! window.
//!
//! # Feature Gate
//!
//! The real implementation requires the `whisper` feature (and cmake). Without
//! it, [`WhisperTranscriber`] still validates its model path but every call
//! fails with a resource error.

use crate::defaults;
use crate::error::{Result, ScribeError};
use crate::stt::transcriber::{Transcriber, WindowTranscription};
use std::path::PathBuf;

#[cfg(feature = "whisper")]
use crate::ledger::Segment;
#[cfg(feature = "whisper")]
use std::sync::{Mutex, Once};
#[cfg(feature = "whisper")]
use std::time::Instant;
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Configuration for Whisper transcriber.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Path to the ggml model file
    pub model_path: PathBuf,
    /// Language code; NB-Whisper is run with `no`
    pub language: String,
    /// Number of threads for inference (None = whisper.cpp default)
    pub threads: Option<usize>,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/ggml-nb-whisper-small.bin"),
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            threads: None,
        }
    }
}

fn model_name_of(config: &WhisperConfig) -> String {
    config
        .model_path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.trim_start_matches("ggml-").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(feature = "whisper")]
pub struct WhisperTranscriber {
    context: Mutex<WhisperContext>,
    config: WhisperConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl std::fmt::Debug for WhisperTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperTranscriber")
            .field("config", &self.config)
            .field("model_name", &self.model_name)
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

/// Placeholder used when the crate is built without the `whisper` feature.
#[cfg(not(feature = "whisper"))]
#[derive(Debug)]
pub struct WhisperTranscriber {
    config: WhisperConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl WhisperTranscriber {
    /// Load the model at `config.model_path`.
    ///
    /// # Errors
    /// `TranscriptionModelNotFound` if the file is missing,
    /// `ResourceUnavailable` if whisper.cpp cannot load it.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !config.model_path.exists() {
            return Err(ScribeError::TranscriptionModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }
        let model_name = model_name_of(&config);

        let mut context_params = WhisperContextParameters::default();
        context_params.flash_attn(true);
        let path = config
            .model_path
            .to_str()
            .ok_or_else(|| ScribeError::ResourceUnavailable {
                message: "model path is not valid UTF-8".to_string(),
            })?;
        let context = WhisperContext::new_with_params(path, context_params).map_err(|e| {
            ScribeError::ResourceUnavailable {
                message: format!("failed to load Whisper model: {e}"),
            }
        })?;
        tracing::info!(model = %model_name, backend = defaults::gpu_backend(), "whisper model loaded");

        Ok(Self {
            context: Mutex::new(context),
            config,
            model_name,
        })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

#[cfg(not(feature = "whisper"))]
impl WhisperTranscriber {
    /// Validate the model path; transcription itself is unavailable.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        if !config.model_path.exists() {
            return Err(ScribeError::TranscriptionModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }
        let model_name = model_name_of(&config);
        Ok(Self { config, model_name })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

#[cfg(feature = "whisper")]
impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, audio: &[f32]) -> Result<WindowTranscription> {
        let started = Instant::now();
        let context = self
            .context
            .lock()
            .map_err(|e| ScribeError::ResourceUnavailable {
                message: format!("whisper context lock poisoned: {e}"),
            })?;

        let mut state = context
            .create_state()
            .map_err(|e| ScribeError::ResourceUnavailable {
                message: format!("failed to create Whisper state: {e}"),
            })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(&self.config.language));
        params.set_translate(false);
        if let Some(threads) = self.config.threads {
            params.set_n_threads(threads as i32);
        }
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, audio)
            .map_err(|e| ScribeError::transient(format!("whisper inference failed: {e}")))?;

        let segments = state
            .as_iter()
            .map(|segment| Segment {
                start: segment.start_timestamp() as f64 / 100.0,
                end: segment.end_timestamp() as f64 / 100.0,
                text: segment.to_string().trim().to_string(),
                confidence: (1.0 - segment.no_speech_probability()).clamp(0.0, 1.0),
            })
            .collect();

        Ok(WindowTranscription {
            segments,
            inference_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn language(&self) -> &str {
        &self.config.language
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(not(feature = "whisper"))]
impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, _audio: &[f32]) -> Result<WindowTranscription> {
        Err(ScribeError::ResourceUnavailable {
            message: concat!(
                "Whisper feature not enabled. This binary was built without speech recognition.\n",
                "To fix: cargo build --release (whisper is enabled by default)"
            )
            .to_string(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn language(&self) -> &str {
        &self.config.language
    }

    fn is_ready(&self) -> bool {
        false
    }
}
