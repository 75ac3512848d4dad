//! Drop folder mounted on the local filesystem (e.g. a synced cloud folder).

use crate::defaults;
use crate::error::{Result, ScribeError};
use crate::remote::{ByteRange, Fingerprint, RemoteFile, RemoteInventory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// Inventory backed by a directory; the file stem is the remote id.
#[derive(Debug, Clone)]
pub struct DirectoryInventory {
    root: PathBuf,
    fingerprint: bool,
}

impl DirectoryInventory {
    pub fn new(root: PathBuf, fingerprint: bool) -> Self {
        Self { root, fingerprint }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn audio_entries(&self) -> Result<Vec<(String, PathBuf)>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| ScribeError::RemoteUnavailable {
            message: format!("cannot read drop folder {}: {e}", self.root.display()),
        })?;

        let mut files: Vec<(String, PathBuf)> = entries
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                if !path.is_file() {
                    return None;
                }
                let ext = path.extension()?.to_str()?;
                if !defaults::is_supported_extension(ext) {
                    return None;
                }
                let stem = path.file_stem()?.to_str()?.to_string();
                Some((stem, path))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    fn path_for(&self, remote_id: &str) -> Result<PathBuf> {
        self.audio_entries()?
            .into_iter()
            .find(|(id, _)| id == remote_id)
            .map(|(_, path)| path)
            .ok_or_else(|| ScribeError::NotFound {
                file_id: remote_id.to_string(),
            })
    }
}

#[async_trait]
impl RemoteInventory for DirectoryInventory {
    fn name(&self) -> &str {
        "directory"
    }

    async fn list(&self) -> Result<Vec<RemoteFile>> {
        let inventory = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for (id, path) in inventory.audio_entries()? {
                let meta = std::fs::metadata(&path)?;
                let fingerprint = if inventory.fingerprint {
                    Some(Fingerprint::sha256_of(&path)?)
                } else {
                    None
                };
                files.push(RemoteFile {
                    id,
                    name: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    size: meta.len(),
                    fingerprint,
                    uploaded_at: meta.modified().ok().map(DateTime::<Utc>::from),
                });
            }
            Ok(files)
        })
        .await
        .map_err(|e| ScribeError::Other(format!("listing task panicked: {e}")))?
    }

    async fn download(
        &self,
        remote_id: &str,
        dest: &Path,
        range: Option<ByteRange>,
    ) -> Result<u64> {
        let source_path = self.path_for(remote_id)?;
        let mut source = File::open(&source_path)
            .await
            .map_err(|e| ScribeError::transient(format!("open {}: {e}", source_path.display())))?;

        let mut out = match range {
            Some(range) => {
                source.seek(SeekFrom::Start(range.start)).await?;
                OpenOptions::new().append(true).create(true).open(dest).await?
            }
            None => File::create(dest).await?,
        };

        let written = tokio::io::copy(&mut source, &mut out)
            .await
            .map_err(|e| ScribeError::transient(format!("copy {remote_id}: {e}")))?;
        out.flush().await?;
        Ok(written)
    }
}
