use crate::defaults;
use crate::error::{Result, ScribeError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    pub convert: ConvertConfig,
    pub transcribe: TranscribeConfig,
}

/// Local store location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

/// Remote drop folder. Exactly one of `url` or `directory` should be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of an HTTP inventory service.
    pub url: Option<String>,
    /// Bearer token sent to the HTTP inventory.
    pub token: Option<String>,
    /// A locally mounted drop folder.
    pub directory: Option<PathBuf>,
    /// Compute SHA-256 fingerprints for directory listings.
    pub fingerprint: bool,
}

/// Download behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub concurrency: usize,
    pub max_retries: u32,
    /// First retry delay, humantime syntax ("1s", "500ms").
    pub backoff: String,
}

/// Conversion behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConvertConfig {
    pub concurrency: usize,
    pub tolerance_ms: u64,
}

/// Transcription model and worker pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscribeConfig {
    pub model: String,
    /// Explicit model file; overrides the catalog lookup of `model`.
    pub model_path: Option<PathBuf>,
    pub language: String,
    /// Size of the transcription worker pool. A whisper model serves one
    /// window at a time, so more than one worker only overlaps audio
    /// loading and retries with inference; it does not run windows in
    /// parallel on a single loaded model.
    pub workers: usize,
    pub max_retries: u32,
    /// Inference threads per window.
    pub threads: Option<usize>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("fieldscribe"),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: defaults::SYNC_CONCURRENCY,
            max_retries: defaults::DOWNLOAD_RETRIES,
            backoff: format!("{}ms", defaults::RETRY_BACKOFF_MS),
        }
    }
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            concurrency: defaults::CONVERT_CONCURRENCY,
            tolerance_ms: defaults::DURATION_TOLERANCE_MS,
        }
    }
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            model: defaults::DEFAULT_MODEL.to_string(),
            model_path: None,
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            workers: defaults::TRANSCRIBE_WORKERS,
            max_retries: defaults::WINDOW_RETRIES,
            threads: None,
        }
    }
}

impl SyncConfig {
    /// Parsed retry backoff.
    pub fn backoff(&self) -> Result<Duration> {
        humantime::parse_duration(self.backoff.trim()).map_err(|e| {
            ScribeError::ConfigInvalidValue {
                key: "sync.backoff".to_string(),
                message: e.to_string(),
            }
        })
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScribeError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ScribeError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing; invalid TOML is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(ScribeError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - FIELDSCRIBE_STORAGE → storage.root
    /// - FIELDSCRIBE_REMOTE_URL → remote.url
    /// - FIELDSCRIBE_REMOTE_DIR → remote.directory
    /// - FIELDSCRIBE_REMOTE_TOKEN → remote.token
    /// - FIELDSCRIBE_MODEL → transcribe.model
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(root) = std::env::var("FIELDSCRIBE_STORAGE")
            && !root.is_empty()
        {
            self.storage.root = PathBuf::from(root);
        }

        if let Ok(url) = std::env::var("FIELDSCRIBE_REMOTE_URL")
            && !url.is_empty()
        {
            self.remote.url = Some(url);
        }

        if let Ok(dir) = std::env::var("FIELDSCRIBE_REMOTE_DIR")
            && !dir.is_empty()
        {
            self.remote.directory = Some(PathBuf::from(dir));
        }

        if let Ok(token) = std::env::var("FIELDSCRIBE_REMOTE_TOKEN")
            && !token.is_empty()
        {
            self.remote.token = Some(token);
        }

        if let Ok(model) = std::env::var("FIELDSCRIBE_MODEL")
            && !model.is_empty()
        {
            self.transcribe.model = model;
        }

        self
    }

    /// Check values that would otherwise fail deep inside a batch.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("sync.concurrency", self.sync.concurrency),
            ("convert.concurrency", self.convert.concurrency),
            ("transcribe.workers", self.transcribe.workers),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ScribeError::ConfigInvalidValue {
                    key: key.to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
        }
        if self.transcribe.max_retries == 0 {
            return Err(ScribeError::ConfigInvalidValue {
                key: "transcribe.max_retries".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        self.sync.backoff()?;
        if self.remote.url.is_some() && self.remote.directory.is_some() {
            return Err(ScribeError::ConfigInvalidValue {
                key: "remote".to_string(),
                message: "set either url or directory, not both".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/fieldscribe/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("fieldscribe")
            .join("config.toml")
    }
}
