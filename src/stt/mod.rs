//! Speech-to-text backends.

pub mod transcriber;
pub mod whisper;

pub use transcriber::{MockTranscriber, Transcriber, WindowTranscription};
pub use whisper::{WhisperConfig, WhisperTranscriber};

use crate::config::TranscribeConfig;
use crate::error::Result;
use std::path::PathBuf;
use std::sync::Arc;

/// Model file for `config`: an explicit path wins over the catalog name.
pub fn resolve_model_path(config: &TranscribeConfig) -> PathBuf {
    config
        .model_path
        .clone()
        .unwrap_or_else(|| crate::models::model_path(&config.model))
}

/// Load the configured Whisper model.
pub fn from_config(config: &TranscribeConfig) -> Result<Arc<dyn Transcriber>> {
    let transcriber = WhisperTranscriber::new(WhisperConfig {
        model_path: resolve_model_path(config),
        language: config.language.clone(),
        threads: config.threads,
    })?;
    Ok(Arc::new(transcriber))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScribeError;

    #[test]
    fn explicit_model_path_wins() {
        let config = TranscribeConfig {
            model_path: Some(PathBuf::from("/models/custom.bin")),
            ..TranscribeConfig::default()
        };
        assert_eq!(resolve_model_path(&config), PathBuf::from("/models/custom.bin"));
    }

    #[test]
    fn catalog_name_resolves_into_models_dir() {
        let config = TranscribeConfig {
            model: "base".to_string(),
            model_path: None,
            ..TranscribeConfig::default()
        };
        assert!(resolve_model_path(&config).ends_with("ggml-nb-whisper-base.bin"));
    }

    #[test]
    fn missing_model_is_reported() {
        let config = TranscribeConfig {
            model_path: Some(PathBuf::from("/nonexistent/ggml-model.bin")),
            ..TranscribeConfig::default()
        };
        assert!(matches!(
            from_config(&config).err(),
            Some(ScribeError::TranscriptionModelNotFound { .. })
        ));
    }
}
