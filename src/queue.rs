//! Background work queue over the pipeline.
//!
//! Jobs go through a bounded channel to a fixed set of workers. Each
//! submission returns a [`JobTicket`] right away. A job for the same unit of
//! work as one already queued or running is not enqueued again; its ticket
//! resolves with the outcome of the job in flight. Converting a file and
//! transcribing it are different units; `Transcribe` and `Process` are the
//! same one, since both end in the file's transcript.

use crate::convert::ConversionResult;
use crate::error::{Result, ScribeError};
use crate::ledger::{Transcript, session_id_for};
use crate::pipeline::Pipeline;
use crate::sync::FullSyncReport;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Sync,
    Convert(String),
    ConvertAll,
    Transcribe(String),
    /// Convert if needed, then transcribe.
    Process(String),
}

impl Job {
    pub fn file_id(&self) -> Option<&str> {
        match self {
            Job::Convert(id) | Job::Transcribe(id) | Job::Process(id) => Some(id.as_str()),
            Job::Sync | Job::ConvertAll => None,
        }
    }

    /// File whose transcript this job produces.
    fn transcript_of(&self) -> Option<&str> {
        match self {
            Job::Transcribe(id) | Job::Process(id) => Some(id.as_str()),
            _ => None,
        }
    }

    fn key(&self) -> JobKey {
        match self {
            Job::Sync => JobKey::Sync,
            Job::ConvertAll => JobKey::ConvertAll,
            Job::Convert(id) => JobKey::Convert(id.clone()),
            Job::Transcribe(id) | Job::Process(id) => JobKey::Transcript(id.clone()),
        }
    }
}

/// At most one job per key is queued or running.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum JobKey {
    Sync,
    ConvertAll,
    Convert(String),
    Transcript(String),
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Synced(FullSyncReport),
    Converted(ConversionResult),
    ConvertedAll(Vec<ConversionResult>),
    Transcribed(Arc<Transcript>),
    Failed { job: Job, error: String },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            JobOutcome::Converted(result) => result.success,
            JobOutcome::Failed { .. } => false,
            _ => true,
        }
    }
}

pub struct JobTicket {
    /// Session the job works on; `None` for store-wide jobs.
    pub session_id: Option<Uuid>,
    /// The submission joined a job already in flight.
    pub joined: bool,
    pub result: oneshot::Receiver<JobOutcome>,
}

impl JobTicket {
    pub async fn wait(self) -> Result<JobOutcome> {
        self.result.await.map_err(|_| ScribeError::Other(
            "work queue dropped the job before it finished".to_string(),
        ))
    }
}

type Waiters = HashMap<JobKey, Vec<oneshot::Sender<JobOutcome>>>;

struct Shared {
    pipeline: Arc<Pipeline>,
    waiters: Mutex<Waiters>,
    /// Files whose queued or running transcription was cancelled.
    cancelled: Mutex<HashSet<String>>,
}

impl Shared {
    fn waiters(&self) -> std::sync::MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancelled(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.cancelled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel(&self, file_id: &str) {
        let key = JobKey::Transcript(file_id.to_string());
        if self.waiters().contains_key(&key) {
            self.cancelled().insert(file_id.to_string());
        }
        self.pipeline.cancel(file_id);
    }

    async fn execute(&self, job: &Job) -> JobOutcome {
        let skip = job
            .transcript_of()
            .is_some_and(|id| self.cancelled().contains(id));
        let outcome = if skip {
            tracing::info!(?job, "skipping cancelled job");
            JobOutcome::Failed {
                job: job.clone(),
                error: ScribeError::Cancelled {
                    file_id: job.file_id().unwrap_or_default().to_string(),
                }
                .to_string(),
            }
        } else {
            run(&self.pipeline, job).await
        };

        let waiting = self.waiters().remove(&job.key()).unwrap_or_default();
        if let Some(id) = job.transcript_of() {
            self.cancelled().remove(id);
        }
        for waiter in waiting {
            if waiter.send(outcome.clone()).is_err() {
                tracing::debug!(?job, "ticket dropped before the outcome arrived");
            }
        }
        outcome
    }
}

/// Cancels transcriptions from outside the task that owns the queue.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    /// Stop the transcription of `file_id`: a queued job is skipped and a
    /// running one stops before its next window.
    pub fn cancel(&self, file_id: &str) {
        self.shared.cancel(file_id);
    }
}

pub struct WorkQueue {
    tx: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl WorkQueue {
    /// Start `workers` workers draining a queue of `capacity` jobs.
    pub fn start(pipeline: Arc<Pipeline>, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shared = Arc::new(Shared {
            pipeline,
            waiters: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(HashSet::new()),
        });

        let workers = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let shared = shared.clone();
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(job) = next else {
                            break;
                        };
                        tracing::debug!(worker, ?job, "job started");
                        let outcome = shared.execute(&job).await;
                        tracing::debug!(worker, success = outcome.is_success(), "job finished");
                    }
                    tracing::debug!(worker, "worker stopped");
                })
            })
            .collect();

        Self {
            tx,
            workers,
            shared,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.shared.pipeline
    }

    /// Queue `job`, waiting for room if the queue is full.
    pub async fn submit(&self, job: Job) -> Result<JobTicket> {
        let session_id = job.file_id().map(session_id_for);
        let key = job.key();
        let (sender, receiver) = oneshot::channel();

        let joined = {
            let mut waiters = self.shared.waiters();
            let joined = waiters.contains_key(&key);
            waiters.entry(key.clone()).or_default().push(sender);
            joined
        };
        if joined {
            tracing::debug!(?job, "job already in flight");
        } else if self.tx.send(job).await.is_err() {
            self.shared.waiters().remove(&key);
            return Err(ScribeError::ResourceUnavailable {
                message: "work queue is shut down".to_string(),
            });
        }

        Ok(JobTicket {
            session_id,
            joined,
            result: receiver,
        })
    }

    /// Cancel the transcription of `file_id`, queued or running.
    pub fn cancel(&self, file_id: &str) {
        self.shared.cancel(file_id);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: self.shared.clone(),
        }
    }

    /// Stop accepting jobs, let the workers finish what is queued, and wait
    /// for them.
    pub async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "queue worker panicked");
            }
        }
    }
}

async fn run(pipeline: &Pipeline, job: &Job) -> JobOutcome {
    let failed = |e: ScribeError| JobOutcome::Failed {
        job: job.clone(),
        error: e.to_string(),
    };
    match job {
        Job::Sync => pipeline.sync().await.map_or_else(failed, JobOutcome::Synced),
        Job::Convert(id) => JobOutcome::Converted(pipeline.convert(id).await),
        Job::ConvertAll => JobOutcome::ConvertedAll(pipeline.convert_all().await),
        Job::Transcribe(id) => pipeline
            .transcribe(id)
            .await
            .map_or_else(failed, JobOutcome::Transcribed),
        Job::Process(id) => pipeline
            .process(id)
            .await
            .map_or_else(failed, JobOutcome::Transcribed),
    }
}
