//! Remote drop-folder inventory.
//!
//! The synchronizer only sees the [`RemoteInventory`] trait: a listing of
//! [`RemoteFile`]s and a byte-range download. Two adapters ship with the
//! crate, a mounted directory and an HTTP inventory service.

pub mod directory;
pub mod fingerprint;
#[cfg(feature = "remote-http")]
pub mod http;

use crate::config::RemoteConfig;
use crate::error::{Result, ScribeError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use directory::DirectoryInventory;
pub use fingerprint::{Fingerprint, FingerprintHasher};
#[cfg(feature = "remote-http")]
pub use http::HttpInventory;

/// One recording in the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub fingerprint: Option<Fingerprint>,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl RemoteFile {
    /// Lower-cased extension of the remote name, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

/// Open-ended byte range: everything from `start` to the end of the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
}

impl ByteRange {
    pub fn from(start: u64) -> Self {
        Self { start }
    }

    /// HTTP `Range` header value.
    pub fn header_value(&self) -> String {
        format!("bytes={}-", self.start)
    }
}

/// A remote store holding field recordings.
#[async_trait]
pub trait RemoteInventory: Send + Sync {
    /// Human-readable adapter name for logs.
    fn name(&self) -> &str;

    /// List every audio file currently in the store.
    ///
    /// A failure here means the store is unreachable and aborts the sync pass.
    async fn list(&self) -> Result<Vec<RemoteFile>>;

    /// Download `remote_id` into `dest`.
    ///
    /// Without a range `dest` is truncated first; with a range the bytes from
    /// `range.start` onward are appended. Returns the number of bytes written.
    async fn download(&self, remote_id: &str, dest: &Path, range: Option<ByteRange>)
    -> Result<u64>;
}

/// Build the inventory described by the config.
pub fn from_config(config: &RemoteConfig) -> Result<Arc<dyn RemoteInventory>> {
    if let Some(dir) = &config.directory {
        return Ok(Arc::new(DirectoryInventory::new(dir.clone(), config.fingerprint)));
    }
    if let Some(url) = &config.url {
        return http_inventory(url, config.token.clone());
    }
    Err(ScribeError::ConfigInvalidValue {
        key: "remote".to_string(),
        message: "no remote drop folder configured (set remote.url or remote.directory)"
            .to_string(),
    })
}

#[cfg(feature = "remote-http")]
fn http_inventory(url: &str, token: Option<String>) -> Result<Arc<dyn RemoteInventory>> {
    Ok(Arc::new(HttpInventory::new(url, token)?))
}

#[cfg(not(feature = "remote-http"))]
fn http_inventory(_url: &str, _token: Option<String>) -> Result<Arc<dyn RemoteInventory>> {
    Err(ScribeError::ConfigInvalidValue {
        key: "remote.url".to_string(),
        message: "this build has no HTTP support (enable the remote-http feature)".to_string(),
    })
}
