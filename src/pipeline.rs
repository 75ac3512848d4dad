//! The assembled pipeline: store, ledger and the three stage runners.
//!
//! The synchronizer and the transcriber are optional so that commands which
//! only read state never touch the network or load a model.

use crate::config::Config;
use crate::convert::{ConversionResult, ConvertOptions, Converter};
use crate::error::{Result, ScribeError};
use crate::ledger::{SessionLedger, Stage, Transcript};
use crate::remote::RemoteInventory;
use crate::store::LocalStore;
use crate::stt::Transcriber;
use crate::sync::{FullSyncReport, SyncOptions, Synchronizer};
use crate::transcribe::{ChunkedTranscriber, TranscribeOptions};
use std::sync::Arc;

pub struct Pipeline {
    store: LocalStore,
    ledger: Arc<SessionLedger>,
    converter: Converter,
    synchronizer: Option<Synchronizer>,
    transcriber: Option<ChunkedTranscriber>,
}

impl Pipeline {
    /// Open the store, load the ledger and adopt untracked local files.
    pub fn open(store: LocalStore, convert: ConvertOptions) -> Result<Self> {
        store.ensure_layout()?;
        let ledger = Arc::new(SessionLedger::open(&store)?);
        let adopted = ledger.adopt(&store.scan()?)?;
        if adopted > 0 {
            tracing::info!(count = adopted, "adopted local files without a session");
        }
        let converter = Converter::new(store.clone(), ledger.clone(), convert);
        Ok(Self {
            store,
            ledger,
            converter,
            synchronizer: None,
            transcriber: None,
        })
    }

    /// Open the configured store without remote or model.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::open(
            LocalStore::new(&config.storage.root),
            ConvertOptions::from(&config.convert),
        )
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteInventory>, options: SyncOptions) -> Self {
        self.synchronizer = Some(Synchronizer::new(
            remote,
            self.store.clone(),
            self.ledger.clone(),
            options,
        ));
        self
    }

    pub fn with_transcriber(
        mut self,
        transcriber: Arc<dyn Transcriber>,
        options: TranscribeOptions,
    ) -> Self {
        self.transcriber = Some(ChunkedTranscriber::new(
            self.ledger.clone(),
            transcriber,
            options,
        ));
        self
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<SessionLedger> {
        &self.ledger
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    pub fn synchronizer(&self) -> Result<&Synchronizer> {
        self.synchronizer
            .as_ref()
            .ok_or_else(|| ScribeError::ResourceUnavailable {
                message: "no remote drop folder configured".to_string(),
            })
    }

    pub fn transcriber(&self) -> Result<&ChunkedTranscriber> {
        self.transcriber
            .as_ref()
            .ok_or_else(|| ScribeError::ResourceUnavailable {
                message: "no transcription model loaded".to_string(),
            })
    }

    pub async fn sync(&self) -> Result<FullSyncReport> {
        self.synchronizer()?.full_sync().await
    }

    pub async fn convert(&self, file_id: &str) -> ConversionResult {
        self.converter.convert(file_id).await
    }

    pub async fn convert_all(&self) -> Vec<ConversionResult> {
        self.converter.convert_all().await
    }

    pub async fn transcribe(&self, file_id: &str) -> Result<Arc<Transcript>> {
        self.transcriber()?.transcribe(file_id).await
    }

    /// Convert if needed, then transcribe.
    pub async fn process(&self, file_id: &str) -> Result<Arc<Transcript>> {
        let transcriber = self.transcriber()?;
        let session = self.ledger.get(file_id).ok_or_else(|| ScribeError::NotFound {
            file_id: file_id.to_string(),
        })?;
        if matches!(session.stage, Stage::Downloaded | Stage::Converting) {
            let converted = self.converter.convert(file_id).await;
            if let Some(error) = converted.error {
                return Err(ScribeError::validation(error));
            }
        }
        transcriber.transcribe(file_id).await
    }

    /// Files ready for transcription, including retried ones.
    pub fn transcription_candidates(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .ledger
            .sessions_in(Stage::Converted)
            .into_iter()
            .chain(self.ledger.sessions_in(Stage::Transcribing))
            .map(|s| s.file_id)
            .collect();
        ids.sort();
        ids
    }

    /// Request cooperative cancellation of a running transcription.
    /// Returns whether a run was there to cancel.
    pub fn cancel(&self, file_id: &str) -> bool {
        self.transcriber
            .as_ref()
            .is_some_and(|transcriber| transcriber.cancel(file_id))
    }
}
