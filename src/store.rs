//! Local store: the durable directory holding original and converted audio.
//!
//! Every path is derived from the file id, so a restart rediscovers on-disk
//! state by scanning the layout; there is no separate manifest.
//!
//! ```text
//! <root>/originals/<id>.<ext>   validated downloads, never deleted
//! <root>/converted/<id>.wav     canonical 16kHz mono WAV
//! <root>/partial/<id>.part      in-flight downloads
//! <root>/sessions/<id>.json     processing sessions (ledger)
//! <root>/transcripts/<id>.json  finished transcripts (ledger)
//! ```

use crate::error::{Result, ScribeError};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const ORIGINALS: &str = "originals";
const CONVERTED: &str = "converted";
const PARTIAL: &str = "partial";
const SESSIONS: &str = "sessions";
const TRANSCRIPTS: &str = "transcripts";

/// On-disk representation of one recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalAsset {
    pub file_id: String,
    pub original_path: PathBuf,
    pub converted_path: Option<PathBuf>,
    pub size: u64,
}

/// File count and byte total of the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreUsage {
    pub file_count: usize,
    pub total_bytes: u64,
}

/// Reject ids that could escape the store directory.
pub fn validate_file_id(file_id: &str) -> Result<()> {
    let bad = file_id.is_empty()
        || file_id == "."
        || file_id == ".."
        || file_id.contains(['/', '\\', '\0']);
    if bad {
        return Err(ScribeError::validation(format!(
            "unusable file id: {file_id:?}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open a store, creating its directory layout.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(root);
        store.ensure_layout()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_layout(&self) -> Result<()> {
        for sub in [ORIGINALS, CONVERTED, PARTIAL, SESSIONS, TRANSCRIPTS] {
            fs::create_dir_all(self.root.join(sub))?;
        }
        Ok(())
    }

    pub fn originals_dir(&self) -> PathBuf {
        self.root.join(ORIGINALS)
    }

    pub fn converted_dir(&self) -> PathBuf {
        self.root.join(CONVERTED)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join(SESSIONS)
    }

    pub fn transcripts_dir(&self) -> PathBuf {
        self.root.join(TRANSCRIPTS)
    }

    pub fn original_path(&self, file_id: &str, ext: &str) -> PathBuf {
        self.originals_dir()
            .join(format!("{file_id}.{}", ext.to_ascii_lowercase()))
    }

    pub fn converted_path(&self, file_id: &str) -> PathBuf {
        self.converted_dir().join(format!("{file_id}.wav"))
    }

    pub fn partial_path(&self, file_id: &str) -> PathBuf {
        self.root.join(PARTIAL).join(format!("{file_id}.part"))
    }

    /// Locate the original for `file_id`, whatever its extension.
    pub fn find_original(&self, file_id: &str) -> Option<PathBuf> {
        let entries = fs::read_dir(self.originals_dir()).ok()?;
        entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .find(|p| p.file_stem().and_then(|s| s.to_str()) == Some(file_id))
    }

    /// The asset for `file_id`, if its original is present.
    pub fn asset(&self, file_id: &str) -> Option<LocalAsset> {
        let original_path = self.find_original(file_id)?;
        let size = fs::metadata(&original_path).ok()?.len();
        let converted = self.converted_path(file_id);
        Some(LocalAsset {
            file_id: file_id.to_string(),
            original_path,
            converted_path: converted.is_file().then_some(converted),
            size,
        })
    }

    /// Every asset with an original on disk, sorted by id.
    pub fn scan(&self) -> Result<Vec<LocalAsset>> {
        let entries = match fs::read_dir(self.originals_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut assets: Vec<LocalAsset> = entries
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                let id = path.file_stem()?.to_str()?.to_string();
                path.is_file().then(|| self.asset(&id)).flatten()
            })
            .collect();
        assets.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        Ok(assets)
    }

    /// Atomically move a validated file into its final place.
    pub fn promote(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(from, to)?;
        Ok(())
    }

    /// Remove the original of `file_id` stored under a different extension.
    ///
    /// Called after a re-download lands under `keep`, so one id maps to one original.
    pub fn remove_stale_originals(&self, file_id: &str, keep: &Path) -> Result<()> {
        let Ok(entries) = fs::read_dir(self.originals_dir()) else {
            return Ok(());
        };
        for path in entries.filter_map(|e| e.ok().map(|e| e.path())) {
            let same_id = path.file_stem().and_then(|s| s.to_str()) == Some(file_id);
            if same_id && path != keep {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Delete a converted file, ignoring a missing one.
    pub fn discard_converted(&self, file_id: &str) -> Result<()> {
        match fs::remove_file(self.converted_path(file_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Aggregate over originals and converted audio.
    pub fn usage(&self) -> Result<StoreUsage> {
        let mut usage = StoreUsage::default();
        for dir in [self.originals_dir(), self.converted_dir()] {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let meta = entry.metadata()?;
                if meta.is_file() {
                    usage.file_count += 1;
                    usage.total_bytes += meta.len();
                }
            }
        }
        Ok(usage)
    }
}
