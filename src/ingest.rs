//! Concurrent thumbnail ingestion: fetch, embed and persist each catalog record.
//!
//! A dispatcher feeds a bounded queue that a fixed set of worker threads
//! drains. Each worker takes one record through Fetch → Embed → Persist, then
//! sleeps for a jittered delay before taking the next. A failing record is
//! logged and counted; it never stops the other workers.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::CatalogRecord;
use crate::controls::{IngestControls, PacingPolicy};
use crate::embedder::{EmbedError, Embedder};
use crate::embeddings::EmbeddingRecord;
use crate::thumbnail::{FetchError, ThumbnailFetcher};
use crate::vector_index::{IndexError, VectorIndex};

/// Pipeline step a record failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Thumbnail download.
    Fetch,
    /// Embedding inference.
    Embed,
    /// Vector index upsert.
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Embed => write!(f, "embed"),
            Self::Persist => write!(f, "persist"),
        }
    }
}

/// Failure of one record, tagged by stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// Thumbnail download failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Embedding failed.
    #[error(transparent)]
    Embed(#[from] EmbedError),
    /// Upsert failed.
    #[error(transparent)]
    Persist(#[from] IndexError),
}

impl StageError {
    /// Stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Fetch(_) => Stage::Fetch,
            Self::Embed(_) => Stage::Embed,
            Self::Persist(_) => Stage::Persist,
        }
    }
}

/// A record that did not make it into the index this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRecord {
    /// Video id of the record.
    pub video_id: String,
    /// Stage that failed.
    pub stage: Stage,
    /// Rendered error.
    pub message: String,
}

/// Stops dispatching new records; records already taken by a worker finish.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Point-in-time view of a run's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Records attempted so far (success or failure).
    pub processed: usize,
    /// Records persisted.
    pub succeeded: usize,
    /// Records that failed a stage.
    pub failed: usize,
    /// Records scheduled for this run.
    pub total: usize,
}

/// Shared progress counters, updated by workers without locking.
#[derive(Debug, Default)]
pub struct IngestProgress {
    processed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    total: AtomicUsize,
}

impl IngestProgress {
    /// Current counters.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
        }
    }

    fn record_success(&self) -> usize {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record_failure(&self) -> usize {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Terminal state of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// Distinct records scheduled.
    pub total: usize,
    /// Records upserted into the index.
    pub succeeded: usize,
    /// Records dropped from this run, with the reason.
    pub failures: Vec<FailedRecord>,
    /// Input rows ignored because their video id appeared earlier in the batch.
    pub duplicates_skipped: usize,
    /// Records skipped because the run was cancelled before a worker started them.
    pub not_attempted: usize,
    /// Whether cancellation was requested.
    pub cancelled: bool,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl IngestReport {
    /// Records attempted (success or failure).
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failures.len()
    }
}

/// Callback invoked after each completed record.
pub type ProgressCallback<'a> = Box<dyn Fn(ProgressSnapshot) + Send + Sync + 'a>;

/// Drives Fetch → Embed → Persist for a batch of catalog records.
pub struct IngestCoordinator<'a> {
    fetcher: &'a dyn ThumbnailFetcher,
    embedder: &'a dyn Embedder,
    index: &'a dyn VectorIndex,
    controls: IngestControls,
    cancel: CancelToken,
    progress: Arc<IngestProgress>,
    on_progress: Option<ProgressCallback<'a>>,
}

impl<'a> IngestCoordinator<'a> {
    /// Wires the coordinator to its collaborators.
    pub fn new(
        fetcher: &'a dyn ThumbnailFetcher,
        embedder: &'a dyn Embedder,
        index: &'a dyn VectorIndex,
        controls: IngestControls,
    ) -> Self {
        Self {
            fetcher,
            embedder,
            index,
            controls,
            cancel: CancelToken::new(),
            progress: Arc::new(IngestProgress::default()),
            on_progress: None,
        }
    }

    /// Uses an externally owned cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Registers a callback fired after every completed record.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressSnapshot) + Send + Sync + 'a,
    {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Handle for observing counters from another thread.
    pub fn progress(&self) -> Arc<IngestProgress> {
        Arc::clone(&self.progress)
    }

    /// Processes every record once and returns the run's terminal state.
    pub fn run(&self, records: Vec<CatalogRecord>) -> IngestReport {
        let started = Instant::now();
        let (batch, duplicates_skipped) = dedup_by_video_id(records);
        let total = batch.len();
        self.progress.total.store(total, Ordering::Relaxed);
        let workers = self.controls.workers().min(total.max(1));
        info!(
            total,
            workers,
            duplicates_skipped,
            pacing_min_ms = self.controls.pacing().min().as_millis() as u64,
            pacing_max_ms = self.controls.pacing().max().as_millis() as u64,
            "starting thumbnail ingestion"
        );

        let (task_tx, task_rx) = bounded::<CatalogRecord>(workers * 2);
        let (failure_tx, failure_rx) = unbounded::<FailedRecord>();
        thread::scope(|scope| {
            for worker_id in 0..workers {
                let rx = task_rx.clone();
                let failure_tx = failure_tx.clone();
                scope.spawn(move || self.worker_loop(worker_id, rx, failure_tx));
            }
            drop(task_rx);
            drop(failure_tx);
            self.dispatch(batch, task_tx);
        });

        let mut failures: Vec<FailedRecord> = failure_rx.try_iter().collect();
        failures.sort_by(|a, b| a.video_id.cmp(&b.video_id));
        let snapshot = self.progress.snapshot();
        let report = IngestReport {
            total,
            succeeded: snapshot.succeeded,
            failures,
            duplicates_skipped,
            not_attempted: total - snapshot.processed,
            cancelled: self.cancel.is_cancelled(),
            elapsed: started.elapsed(),
        };
        info!(
            succeeded = report.succeeded,
            failed = report.failures.len(),
            not_attempted = report.not_attempted,
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "thumbnail ingestion finished"
        );
        report
    }

    /// Feeds the queue until the batch is drained or the run is cancelled.
    /// Dropping the sender on return lets idle workers exit.
    fn dispatch(&self, batch: Vec<CatalogRecord>, sender: Sender<CatalogRecord>) {
        for record in batch {
            if self.cancel.is_cancelled() || sender.send(record).is_err() {
                break;
            }
        }
    }

    fn worker_loop(
        &self,
        worker_id: usize,
        receiver: Receiver<CatalogRecord>,
        failures: Sender<FailedRecord>,
    ) {
        let mut rng = rand::thread_rng();
        let pacing: PacingPolicy = self.controls.pacing();
        for record in receiver.iter() {
            // Records still queued when cancellation lands are drained unprocessed.
            if self.cancel.is_cancelled() {
                continue;
            }
            let processed = match self.process_record(&record) {
                Ok(()) => {
                    debug!(worker_id, video_id = %record.video_id, "thumbnail embedded");
                    self.progress.record_success()
                }
                Err(err) => {
                    let stage = err.stage();
                    warn!(
                        worker_id,
                        video_id = %record.video_id,
                        %stage,
                        error = %err,
                        "skipping video"
                    );
                    // `run` holds the receiver until every worker has exited.
                    let sent = failures.send(FailedRecord {
                        video_id: record.video_id.clone(),
                        stage,
                        message: err.to_string(),
                    });
                    debug_assert!(sent.is_ok(), "failure receiver dropped during run");
                    self.progress.record_failure()
                }
            };
            self.report_progress(processed);
            let delay = pacing.sample(&mut rng);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    }

    fn process_record(&self, record: &CatalogRecord) -> Result<(), StageError> {
        let bytes = self.fetcher.fetch(&record.thumbnail_url)?;
        let vector = self.embedder.embed_image(&bytes)?;
        let embedded = EmbeddingRecord::from_catalog(record, vector);
        self.index
            .upsert(&embedded.id, &embedded.vector, &embedded.metadata)?;
        Ok(())
    }

    fn report_progress(&self, processed: usize) {
        let snapshot = self.progress.snapshot();
        if let Some(callback) = &self.on_progress {
            callback(snapshot);
        }
        let every = self.controls.progress_every();
        if every > 0 && (processed % every == 0 || processed == snapshot.total) {
            info!(
                processed,
                total = snapshot.total,
                failed = snapshot.failed,
                "processing videos"
            );
        }
    }
}

/// Keeps the first record for each video id, preserving order.
fn dedup_by_video_id(records: Vec<CatalogRecord>) -> (Vec<CatalogRecord>, usize) {
    let mut seen = HashSet::with_capacity(records.len());
    let before = records.len();
    let unique: Vec<CatalogRecord> = records
        .into_iter()
        .filter(|record| seen.insert(record.video_id.clone()))
        .collect();
    let skipped = before - unique.len();
    (unique, skipped)
}
