//! Synchronizer: reconcile the remote drop folder with the local store and
//! pull down whatever is missing.

use crate::config::SyncConfig;
use crate::defaults;
use crate::error::{Result, ScribeError};
use crate::ledger::{SessionLedger, Stage};
use crate::remote::{ByteRange, RemoteFile, RemoteInventory};
use crate::store::{LocalStore, validate_file_id};
use futures_util::StreamExt;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// How each remote entry compares to the local store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub present: Vec<String>,
    pub missing: Vec<RemoteFile>,
    pub size_mismatch: Vec<RemoteFile>,
    /// Local originals the remote no longer lists. Informational only.
    pub local_only: Vec<String>,
}

impl SyncReport {
    pub fn is_synced(&self) -> bool {
        self.missing.is_empty() && self.size_mismatch.is_empty()
    }

    /// Entries that need a transfer.
    pub fn pending(&self) -> Vec<RemoteFile> {
        self.missing
            .iter()
            .chain(&self.size_mismatch)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    pub downloaded: Vec<String>,
    /// `(file id, reason)` for files left alone this pass.
    pub skipped: Vec<(String, String)>,
    /// `(file id, error detail)` for permanent failures.
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageStats {
    pub file_count: usize,
    pub total_bytes: u64,
    pub by_stage: BTreeMap<Stage, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FullSyncReport {
    pub initial: SyncReport,
    pub downloads: DownloadReport,
    pub after: SyncReport,
}

impl FullSyncReport {
    pub fn is_synced(&self) -> bool {
        self.after.is_synced()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: defaults::SYNC_CONCURRENCY,
            max_retries: defaults::DOWNLOAD_RETRIES,
            backoff: Duration::from_millis(defaults::RETRY_BACKOFF_MS),
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Ok(Self {
            concurrency: config.concurrency.max(1),
            max_retries: config.max_retries,
            backoff: config.backoff()?,
        })
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

enum Outcome {
    Downloaded(String),
    Skipped(String, String),
    Failed(String, String),
}

pub struct Synchronizer {
    remote: Arc<dyn RemoteInventory>,
    store: LocalStore,
    ledger: Arc<SessionLedger>,
    options: SyncOptions,
}

impl Synchronizer {
    pub fn new(
        remote: Arc<dyn RemoteInventory>,
        store: LocalStore,
        ledger: Arc<SessionLedger>,
        options: SyncOptions,
    ) -> Self {
        Self {
            remote,
            store,
            ledger,
            options,
        }
    }

    /// Compare the remote listing to the local store by file id and size.
    ///
    /// Fails only when the remote cannot be listed at all.
    pub async fn reconcile(&self) -> Result<SyncReport> {
        let remote_files = self.remote.list().await?;
        let local = self.store.scan()?;
        tracing::debug!(
            remote = self.remote.name(),
            remote_files = remote_files.len(),
            local_files = local.len(),
            "reconciling"
        );

        let mut report = SyncReport::default();
        let remote_ids: HashSet<&str> = remote_files.iter().map(|f| f.id.as_str()).collect();
        for asset in &local {
            if !remote_ids.contains(asset.file_id.as_str()) {
                report.local_only.push(asset.file_id.clone());
            }
        }

        for file in &remote_files {
            match local.iter().find(|a| a.file_id == file.id) {
                None => report.missing.push(file.clone()),
                Some(asset) if asset.size != file.size => report.size_mismatch.push(file.clone()),
                Some(_) => report.present.push(file.id.clone()),
            }
        }
        Ok(report)
    }

    /// Download every missing or size-mismatched file.
    pub async fn download_missing(&self) -> Result<DownloadReport> {
        let report = self.reconcile().await?;
        Ok(self.download_files(report.pending()).await)
    }

    /// Download `files` with bounded concurrency. Per-file failures are
    /// recorded in the report and on the session, never returned.
    pub async fn download_files(&self, files: Vec<RemoteFile>) -> DownloadReport {
        let outcomes: Vec<Outcome> = futures_util::stream::iter(files)
            .map(|file| self.download_one(file))
            .buffer_unordered(self.options.concurrency)
            .collect()
            .await;

        let mut report = DownloadReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Downloaded(id) => report.downloaded.push(id),
                Outcome::Skipped(id, why) => report.skipped.push((id, why)),
                Outcome::Failed(id, detail) => report.failed.push((id, detail)),
            }
        }
        report.downloaded.sort();
        report.skipped.sort();
        report.failed.sort();
        report
    }

    pub fn storage_stats(&self) -> Result<StorageStats> {
        let usage = self.store.usage()?;
        Ok(StorageStats {
            file_count: usage.file_count,
            total_bytes: usage.total_bytes,
            by_stage: self.ledger.stage_counts(),
        })
    }

    /// Reconcile, download what is pending, then reconcile again.
    pub async fn full_sync(&self) -> Result<FullSyncReport> {
        let initial = self.reconcile().await?;
        tracing::info!(
            present = initial.present.len(),
            missing = initial.missing.len(),
            size_mismatch = initial.size_mismatch.len(),
            "initial reconcile"
        );
        let downloads = self.download_files(initial.pending()).await;
        let after = self.reconcile().await?;
        Ok(FullSyncReport {
            initial,
            downloads,
            after,
        })
    }

    async fn download_one(&self, file: RemoteFile) -> Outcome {
        let id = file.id.clone();
        match self.try_download_one(&file).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(id, e.to_string()),
        }
    }

    async fn try_download_one(&self, file: &RemoteFile) -> Result<Outcome> {
        validate_file_id(&file.id)?;
        self.ledger.get_or_create(&file.id, &file.name)?;
        let Some(_lock) = self.ledger.try_lock(&file.id) else {
            return Ok(Outcome::Skipped(file.id.clone(), "already in flight".to_string()));
        };
        // read under the lock; the stage may have moved since creation
        let session = self.ledger.get(&file.id).ok_or_else(|| ScribeError::NotFound {
            file_id: file.id.clone(),
        })?;

        // Only sessions that have not been downloaded yet move through the
        // download stages; a re-download of a later-stage file just
        // replaces the original.
        let tracked = match session.stage {
            Stage::Detected | Stage::Downloading => true,
            Stage::Failed => {
                return Ok(Outcome::Skipped(
                    file.id.clone(),
                    "session failed; retry it to download again".to_string(),
                ));
            }
            _ => false,
        };

        if tracked {
            self.ledger.advance(&file.id, Stage::Downloading, None)?;
        }
        tracing::info!(file_id = %file.id, size = file.size, "downloading");

        match self.transfer(file).await {
            Ok(path) => {
                if tracked {
                    self.ledger.advance(&file.id, Stage::Downloaded, None)?;
                } else {
                    tracing::warn!(
                        file_id = %file.id,
                        stage = %session.stage,
                        "original replaced; derived files were kept"
                    );
                }
                tracing::info!(file_id = %file.id, path = %path.display(), "downloaded");
                Ok(Outcome::Downloaded(file.id.clone()))
            }
            Err(e) => {
                let detail = e.to_string();
                if tracked {
                    self.ledger.fail(&file.id, &detail, None)?;
                }
                Ok(Outcome::Failed(file.id.clone(), detail))
            }
        }
    }

    /// Resumable transfer with retries, then promotion into `originals/`.
    async fn transfer(&self, file: &RemoteFile) -> Result<PathBuf> {
        let ext = file
            .extension()
            .filter(|ext| defaults::is_supported_extension(ext))
            .ok_or_else(|| {
                ScribeError::validation(format!("unsupported audio format: {}", file.name))
            })?;
        let partial = self.store.partial_path(&file.id);
        if let Some(parent) = partial.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut attempt = 0;
        loop {
            match self.attempt(file, &partial).await {
                Ok(()) => break,
                Err(e) if attempt < self.options.max_retries && retry_download(&e) => {
                    let delay = self.options.delay(attempt);
                    attempt += 1;
                    tracing::warn!(
                        file_id = %file.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "download attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        let target = self.store.original_path(&file.id, &ext);
        self.store.promote(&partial, &target)?;
        self.store.remove_stale_originals(&file.id, &target)?;
        Ok(target)
    }

    async fn attempt(&self, file: &RemoteFile, partial: &Path) -> Result<()> {
        let have = tokio::fs::metadata(partial).await.map(|m| m.len()).ok();
        match have {
            // Complete but not yet promoted, e.g. after a crash.
            Some(len) if len == file.size => {}
            Some(len) if len > 0 && len < file.size => {
                tracing::debug!(file_id = %file.id, from = len, "resuming partial download");
                self.remote
                    .download(&file.id, partial, Some(ByteRange::from(len)))
                    .await?;
            }
            _ => {
                self.remote.download(&file.id, partial, None).await?;
            }
        }
        validate_partial(file, partial).await
    }
}

/// Transient faults and corrupt transfers are worth another attempt.
fn retry_download(error: &ScribeError) -> bool {
    error.is_retryable() || matches!(error, ScribeError::Validation { .. })
}

/// Check byte count and fingerprint; a corrupt partial is deleted.
async fn validate_partial(file: &RemoteFile, partial: &Path) -> Result<()> {
    let len = tokio::fs::metadata(partial).await?.len();
    if len != file.size {
        tokio::fs::remove_file(partial).await?;
        return Err(ScribeError::validation(format!(
            "corrupt transfer of {}: expected {} bytes, got {len}",
            file.id, file.size
        )));
    }

    if let Some(expected) = file.fingerprint.clone() {
        let path = partial.to_path_buf();
        let actual = tokio::task::spawn_blocking(move || expected.compute_like(&path))
            .await
            .map_err(|e| ScribeError::Other(format!("fingerprint task panicked: {e}")))??;
        if Some(&actual) != file.fingerprint.as_ref() {
            tokio::fs::remove_file(partial).await?;
            return Err(ScribeError::validation(format!(
                "corrupt transfer of {}: fingerprint {actual} does not match",
                file.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{DirectoryInventory, Fingerprint};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Fixture {
        _remote_dir: TempDir,
        _local_dir: TempDir,
        remote_root: PathBuf,
        store: LocalStore,
        ledger: Arc<SessionLedger>,
    }

    fn fixture() -> Fixture {
        let remote_dir = TempDir::new().unwrap();
        let local_dir = TempDir::new().unwrap();
        let store = LocalStore::open(local_dir.path()).unwrap();
        let ledger = Arc::new(SessionLedger::open(&store).unwrap());
        Fixture {
            remote_root: remote_dir.path().to_path_buf(),
            _remote_dir: remote_dir,
            _local_dir: local_dir,
            store,
            ledger,
        }
    }

    fn options() -> SyncOptions {
        SyncOptions {
            concurrency: 2,
            max_retries: 2,
            backoff: Duration::from_millis(1),
        }
    }

    fn synchronizer(fx: &Fixture, remote: Arc<dyn RemoteInventory>) -> Synchronizer {
        Synchronizer::new(remote, fx.store.clone(), fx.ledger.clone(), options())
    }

    fn directory(fx: &Fixture) -> Arc<dyn RemoteInventory> {
        Arc::new(DirectoryInventory::new(fx.remote_root.clone(), false))
    }

    /// Wraps an inventory, failing the first `failures` downloads and
    /// recording the ranges it was asked for.
    struct Flaky {
        inner: Arc<dyn RemoteInventory>,
        failures: AtomicUsize,
        ranges: Mutex<Vec<Option<u64>>>,
    }

    #[async_trait]
    impl RemoteInventory for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn list(&self) -> Result<Vec<RemoteFile>> {
            self.inner.list().await
        }

        async fn download(&self, id: &str, dest: &Path, range: Option<ByteRange>) -> Result<u64> {
            self.ranges.lock().unwrap().push(range.map(|r| r.start));
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ScribeError::transient("connection reset"));
            }
            self.inner.download(id, dest, range).await
        }
    }

    /// Reports a size the content never matches.
    struct Lying {
        inner: Arc<dyn RemoteInventory>,
    }

    #[async_trait]
    impl RemoteInventory for Lying {
        fn name(&self) -> &str {
            "lying"
        }

        async fn list(&self) -> Result<Vec<RemoteFile>> {
            let mut files = self.inner.list().await?;
            for file in &mut files {
                file.size += 1;
            }
            Ok(files)
        }

        async fn download(&self, id: &str, dest: &Path, range: Option<ByteRange>) -> Result<u64> {
            self.inner.download(id, dest, range).await
        }
    }

    #[tokio::test]
    async fn reconcile_classifies_by_id_and_size() {
        let fx = fixture();
        std::fs::write(fx.remote_root.join("A.m4a"), vec![1u8; 10]).unwrap();
        std::fs::write(fx.remote_root.join("B.m4a"), vec![2u8; 20]).unwrap();
        std::fs::write(fx.remote_root.join("C.m4a"), vec![3u8; 5]).unwrap();
        std::fs::write(fx.store.original_path("A", "m4a"), vec![1u8; 10]).unwrap();
        std::fs::write(fx.store.original_path("C", "m4a"), vec![3u8; 3]).unwrap();
        std::fs::write(fx.store.original_path("Z", "mp3"), vec![0u8; 1]).unwrap();

        let sync = synchronizer(&fx, directory(&fx));
        let report = sync.reconcile().await.unwrap();

        assert_eq!(report.present, vec!["A"]);
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].id, "B");
        assert_eq!(report.size_mismatch.len(), 1);
        assert_eq!(report.size_mismatch[0].id, "C");
        assert_eq!(report.local_only, vec!["Z"]);
        assert!(!report.is_synced());
    }

    #[tokio::test]
    async fn download_missing_brings_store_in_sync() {
        let fx = fixture();
        std::fs::write(fx.remote_root.join("A.m4a"), vec![1u8; 10]).unwrap();
        std::fs::write(fx.remote_root.join("B.m4a"), vec![2u8; 20]).unwrap();
        std::fs::write(fx.remote_root.join("C.m4a"), vec![3u8; 5]).unwrap();
        std::fs::write(fx.store.original_path("A", "m4a"), vec![1u8; 10]).unwrap();
        std::fs::write(fx.store.original_path("C", "m4a"), vec![3u8; 3]).unwrap();

        let sync = synchronizer(&fx, directory(&fx));
        let report = sync.download_missing().await.unwrap();
        assert_eq!(report.downloaded, vec!["B", "C"]);
        assert!(report.failed.is_empty());

        let after = sync.reconcile().await.unwrap();
        assert!(after.is_synced());
        assert_eq!(after.present, vec!["A", "B", "C"]);
        assert_eq!(fx.ledger.get("B").unwrap().stage, Stage::Downloaded);
        assert_eq!(
            std::fs::read(fx.store.original_path("C", "m4a")).unwrap(),
            vec![3u8; 5]
        );
        assert!(!fx.store.partial_path("B").exists());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let fx = fixture();
        std::fs::write(fx.remote_root.join("B.wav"), vec![2u8; 20]).unwrap();
        let flaky = Arc::new(Flaky {
            inner: directory(&fx),
            failures: AtomicUsize::new(2),
            ranges: Mutex::new(Vec::new()),
        });

        let sync = synchronizer(&fx, flaky.clone());
        let report = sync.download_missing().await.unwrap();

        assert_eq!(report.downloaded, vec!["B"]);
        assert_eq!(flaky.ranges.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn partial_download_resumes_with_range() {
        let fx = fixture();
        std::fs::write(fx.remote_root.join("B.wav"), vec![2u8; 20]).unwrap();
        std::fs::write(fx.store.partial_path("B"), vec![2u8; 8]).unwrap();
        let flaky = Arc::new(Flaky {
            inner: directory(&fx),
            failures: AtomicUsize::new(0),
            ranges: Mutex::new(Vec::new()),
        });

        let sync = synchronizer(&fx, flaky.clone());
        let report = sync.download_missing().await.unwrap();

        assert_eq!(report.downloaded, vec!["B"]);
        assert_eq!(*flaky.ranges.lock().unwrap(), vec![Some(8)]);
        assert_eq!(
            std::fs::read(fx.store.original_path("B", "wav")).unwrap(),
            vec![2u8; 20]
        );
    }

    #[tokio::test]
    async fn corrupt_transfer_fails_without_touching_original() {
        let fx = fixture();
        std::fs::write(fx.remote_root.join("C.m4a"), vec![3u8; 5]).unwrap();
        std::fs::write(fx.store.original_path("C", "m4a"), vec![3u8; 3]).unwrap();
        let lying = Arc::new(Lying {
            inner: directory(&fx),
        });

        let sync = synchronizer(&fx, lying);
        let report = sync.download_missing().await.unwrap();

        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("corrupt transfer"));
        let session = fx.ledger.get("C").unwrap();
        assert_eq!(session.stage, Stage::Failed);
        assert_eq!(session.failed_at, Some(Stage::Downloading));
        assert_eq!(
            std::fs::read(fx.store.original_path("C", "m4a")).unwrap(),
            vec![3u8; 3]
        );
        assert!(!fx.store.partial_path("C").exists());

        // Failed sessions wait for an explicit retry.
        let again = sync.download_missing().await.unwrap();
        assert_eq!(again.skipped.len(), 1);
    }

    #[tokio::test]
    async fn fingerprint_mismatch_is_corrupt() {
        let fx = fixture();
        std::fs::write(fx.remote_root.join("A.wav"), vec![1u8; 10]).unwrap();
        let sync = synchronizer(&fx, directory(&fx));
        let mut file = sync.reconcile().await.unwrap().missing.remove(0);
        file.fingerprint = Some(Fingerprint::Sha1("0".repeat(40)));

        let report = sync.download_files(vec![file]).await;
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("fingerprint"));
    }

    #[tokio::test]
    async fn failed_session_downloads_again_only_after_retry() {
        let fx = fixture();
        std::fs::write(fx.remote_root.join("B.wav"), vec![2u8; 20]).unwrap();
        fx.ledger.get_or_create("B", "B.wav").unwrap();
        fx.ledger.advance("B", Stage::Downloading, None).unwrap();
        fx.ledger.fail("B", "connection reset", None).unwrap();

        let sync = synchronizer(&fx, directory(&fx));
        let report = sync.download_missing().await.unwrap();
        assert!(report.downloaded.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(fx.ledger.get("B").unwrap().stage, Stage::Failed);

        fx.ledger.retry("B").unwrap();
        let report = sync.download_missing().await.unwrap();
        assert_eq!(report.downloaded, vec!["B"]);
        assert_eq!(fx.ledger.get("B").unwrap().stage, Stage::Downloaded);
    }

    #[tokio::test]
    async fn unsupported_format_is_rejected() {
        let fx = fixture();
        let file = RemoteFile {
            id: "doc".to_string(),
            name: "doc.pdf".to_string(),
            size: 3,
            fingerprint: None,
            uploaded_at: None,
        };
        let sync = synchronizer(&fx, directory(&fx));
        let report = sync.download_files(vec![file]).await;
        assert!(report.failed[0].1.contains("unsupported audio format"));
    }

    #[tokio::test]
    async fn unreachable_remote_aborts_the_pass() {
        let fx = fixture();
        let remote = Arc::new(DirectoryInventory::new(fx.remote_root.join("gone"), false));
        let sync = synchronizer(&fx, remote);
        let err = sync.full_sync().await.unwrap_err();
        assert!(err.is_configuration_fault());
    }

    #[tokio::test]
    async fn full_sync_reports_final_state_and_stats() {
        let fx = fixture();
        std::fs::write(fx.remote_root.join("A.mp3"), vec![1u8; 10]).unwrap();
        std::fs::write(fx.remote_root.join("B.flac"), vec![2u8; 20]).unwrap();

        let sync = synchronizer(&fx, directory(&fx));
        let report = sync.full_sync().await.unwrap();
        assert_eq!(report.initial.missing.len(), 2);
        assert!(report.is_synced());

        let stats = sync.storage_stats().unwrap();
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.total_bytes, 30);
        assert_eq!(stats.by_stage.get(&Stage::Downloaded), Some(&2));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let options = SyncOptions {
            concurrency: 1,
            max_retries: 3,
            backoff: Duration::from_secs(1),
        };
        assert_eq!(options.delay(0), Duration::from_secs(1));
        assert_eq!(options.delay(1), Duration::from_secs(2));
        assert_eq!(options.delay(2), Duration::from_secs(4));
    }
}
