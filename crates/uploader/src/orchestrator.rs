//! Upload orchestrator.
//!
//! Drives one file through probe, parallel chunk transfer and merge.
//! Every attempt starts from a fresh probe, so the server's directory
//! listing is the only resume state; in-memory progress is discarded on
//! pause and retry.
//!
//! ```text
//! NotStarted -> Probing -> Uploading <-> Paused
//!                  |           |
//!                  |           v
//!                  |        Merging -> Completed
//!                  +-> Completed (already present)
//! ```
//!
//! A genuine failure in any active state restarts from `Probing` after a
//! backoff until the retry limit is reached (`Failed`). An offset conflict
//! left behind by an interrupted transfer also restarts from `Probing` but
//! never counts against the limit. Abandon ends in `Cancelled` from any
//! state.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ferry_protocol::ContentKey;
use ferry_transfer::{
    ChunkDescriptor, ProgressAggregator, ProgressEvent, ProgressSnapshot, SourceFile,
    content_key_for, split, validate_source,
};

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::prober::{self, RemoteState};
use crate::transport::{ChunkUpload, UploadTransport};

/// Lifecycle of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    NotStarted,
    Probing,
    Uploading,
    Paused,
    Merging,
    Completed,
    Failed,
    Cancelled,
}

/// Event emitted while an upload runs.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// The upload entered a new state.
    State(UploadState),
    /// Aggregate progress changed.
    Progress(ProgressSnapshot),
    /// An attempt failed and the upload restarts after `delay`.
    Retrying {
        attempt: u32,
        delay: Duration,
        error: String,
    },
}

/// Result of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub key: ContentKey,
    pub size: u64,
    /// The server already had the file; nothing was sent.
    pub already_present: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Run,
    Pause,
    Abandon,
}

/// Pause, resume and abandon handle for a running upload.
#[derive(Debug, Clone)]
pub struct UploadControl {
    intent: Arc<watch::Sender<Intent>>,
}

impl UploadControl {
    /// Stops in-flight transfers. Bytes the server already flushed are kept.
    pub fn pause(&self) {
        self.intent.send_if_modified(|intent| {
            if *intent == Intent::Run {
                *intent = Intent::Pause;
                true
            } else {
                false
            }
        });
    }

    /// Continues a paused upload from a fresh probe.
    pub fn resume(&self) {
        self.intent.send_if_modified(|intent| {
            if *intent == Intent::Pause {
                *intent = Intent::Run;
                true
            } else {
                false
            }
        });
    }

    /// Stops the upload for good.
    pub fn abandon(&self) {
        self.intent.send_replace(Intent::Abandon);
    }

    pub fn is_paused(&self) -> bool {
        *self.intent.borrow() == Intent::Pause
    }
}

/// Uploads a single file over an [`UploadTransport`].
pub struct Uploader {
    transport: Arc<dyn UploadTransport>,
    config: UploadConfig,
    intent: Arc<watch::Sender<Intent>>,
    state: watch::Sender<UploadState>,
    events_tx: mpsc::UnboundedSender<UploadEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<UploadEvent>>,
}

impl Uploader {
    pub fn new(transport: Arc<dyn UploadTransport>, config: UploadConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            config,
            intent: Arc::new(watch::channel(Intent::Run).0),
            state: watch::channel(UploadState::NotStarted).0,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<UploadEvent>> {
        self.events_rx.take()
    }

    pub fn control(&self) -> UploadControl {
        UploadControl {
            intent: Arc::clone(&self.intent),
        }
    }

    pub fn state(&self) -> UploadState {
        *self.state.borrow()
    }

    /// Uploads `path`, returning once it is merged, failed or abandoned.
    pub async fn upload(&self, path: &Path) -> Result<UploadOutcome, UploadError> {
        let result = self.run(path).await;
        match &result {
            Ok(_) => self.set_state(UploadState::Completed),
            Err(UploadError::Cancelled) => self.set_state(UploadState::Cancelled),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "upload failed");
                self.set_state(UploadState::Failed);
            }
        }
        result
    }

    async fn run(&self, path: &Path) -> Result<UploadOutcome, UploadError> {
        let source = validate_source(path, &self.config.rules)?;

        let hash_path = source.path.clone();
        let key = tokio::task::spawn_blocking(move || content_key_for(&hash_path))
            .await
            .map_err(std::io::Error::other)??;
        let chunks = split(&key, source.size, self.config.chunk_size)?;
        info!(key = %key, size = source.size, chunks = chunks.len(), "starting upload");

        let mut intents = self.intent.subscribe();
        let mut failures = 0u32;
        let mut conflicts = 0u32;
        loop {
            self.wait_until_running(&mut intents).await?;

            match self.attempt(&source, &key, &chunks, &mut intents).await {
                Ok(outcome) => return Ok(outcome),
                Err(UploadError::Cancelled) => {
                    if *intents.borrow() == Intent::Abandon {
                        return Err(UploadError::Cancelled);
                    }
                    debug!(key = %key, "attempt interrupted by pause");
                }
                Err(UploadError::Conflict(reason)) => {
                    conflicts += 1;
                    let delay = self.config.retry.delay_for_attempt(conflicts);
                    debug!(key = %key, conflicts, ?delay, %reason, "stale chunk offset, re-probing");
                    self.backoff(delay, &mut intents).await?;
                }
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    if failures >= self.config.retry.limit {
                        return Err(e);
                    }
                    let delay = self.config.retry.delay_for_attempt(failures);
                    warn!(key = %key, attempt = failures, ?delay, error = %e, "attempt failed, retrying");
                    self.emit(UploadEvent::Retrying {
                        attempt: failures,
                        delay,
                        error: e.to_string(),
                    });
                    self.backoff(delay, &mut intents).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One pass: probe, reconcile, transfer the wave, merge.
    async fn attempt(
        &self,
        source: &SourceFile,
        key: &ContentKey,
        chunks: &[ChunkDescriptor],
        intents: &mut watch::Receiver<Intent>,
    ) -> Result<UploadOutcome, UploadError> {
        self.set_state(UploadState::Probing);
        let remote = prober::probe(self.transport.as_ref(), key).await?;
        if remote == RemoteState::Exists {
            info!(key = %key, "file already on server");
            return Ok(UploadOutcome {
                key: key.clone(),
                size: source.size,
                already_present: true,
            });
        }

        let persisted = remote.persisted();
        let mut aggregator = ProgressAggregator::new(chunks.iter().map(|c| (c.name.clone(), c.len())));
        let mut uploads = Vec::new();
        for chunk in chunks {
            let done = persisted.get(chunk.name.as_str()).copied().unwrap_or(0);
            if done > 0 {
                aggregator.apply(&ProgressEvent {
                    chunk_name: chunk.name.clone(),
                    bytes_sent: done,
                    bytes_total: chunk.len(),
                });
            }
            if done >= chunk.len() {
                if done > chunk.len() {
                    warn!(chunk = %chunk.name, stored = done, expected = chunk.len(), "server holds more than the chunk");
                }
                continue;
            }
            uploads.push(ChunkUpload {
                key: key.clone(),
                source: source.path.clone(),
                chunk: chunk.clone(),
                offset: done,
            });
        }
        self.emit(UploadEvent::Progress(aggregator.snapshot()));
        debug!(key = %key, outstanding = uploads.len(), skipped = chunks.len() - uploads.len(), "reconciled");

        if *intents.borrow() != Intent::Run {
            return Err(UploadError::Cancelled);
        }

        self.set_state(UploadState::Uploading);
        self.transfer(uploads, &mut aggregator, intents).await?;

        self.set_state(UploadState::Merging);
        self.transport.merge(key, source.size).await?;
        info!(key = %key, size = source.size, "upload complete");

        Ok(UploadOutcome {
            key: key.clone(),
            size: source.size,
            already_present: false,
        })
    }

    /// Sends every outstanding chunk under one cancellation scope.
    ///
    /// Waits for every transfer to resolve. A pause or abandon cancels the
    /// scope and the wave ends as [`UploadError::Cancelled`] regardless of
    /// other failures. A genuine failure takes precedence over a conflict.
    async fn transfer(
        &self,
        uploads: Vec<ChunkUpload>,
        aggregator: &mut ProgressAggregator,
        intents: &mut watch::Receiver<Intent>,
    ) -> Result<(), UploadError> {
        let scope = CancellationToken::new();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let limit = self.config.concurrency.unwrap_or(uploads.len()).max(1);

        let wave = futures_util::stream::iter(uploads)
            .map(|upload| {
                let transport = Arc::clone(&self.transport);
                let progress = progress_tx.clone();
                let cancel = scope.child_token();
                async move {
                    let result = transport.upload_chunk(&upload, progress, cancel).await;
                    (upload, result)
                }
            })
            .buffer_unordered(limit)
            .collect::<Vec<_>>();
        tokio::pin!(wave);

        let mut watching = true;
        let results = loop {
            tokio::select! {
                results = &mut wave => break results,
                Some(event) = progress_rx.recv() => {
                    let snapshot = aggregator.apply(&event);
                    self.emit(UploadEvent::Progress(snapshot));
                }
                changed = intents.changed(), if watching => {
                    let stop = match changed {
                        Ok(()) => *intents.borrow() != Intent::Run,
                        Err(_) => {
                            watching = false;
                            true
                        }
                    };
                    if stop && !scope.is_cancelled() {
                        info!("cancelling in-flight transfers");
                        scope.cancel();
                    }
                }
            }
        };

        while let Ok(event) = progress_rx.try_recv() {
            aggregator.apply(&event);
        }

        let mut failure = None;
        for (upload, result) in results {
            match result {
                Ok(persisted) => {
                    aggregator.apply(&ProgressEvent {
                        chunk_name: upload.chunk.name.clone(),
                        bytes_sent: persisted,
                        bytes_total: upload.chunk.len(),
                    });
                }
                Err(UploadError::Cancelled) => {}
                Err(e @ UploadError::Conflict(_)) => {
                    debug!(chunk = %upload.chunk.name, error = %e, "chunk offset out of date");
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    warn!(chunk = %upload.chunk.name, error = %e, "chunk transfer failed");
                    if matches!(failure, None | Some(UploadError::Conflict(_))) {
                        failure = Some(e);
                    }
                }
            }
        }
        self.emit(UploadEvent::Progress(aggregator.snapshot()));

        if scope.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        failure.map_or(Ok(()), Err)
    }

    /// Blocks while paused. Fails with `Cancelled` on abandon.
    async fn wait_until_running(&self, intents: &mut watch::Receiver<Intent>) -> Result<(), UploadError> {
        loop {
            let intent = *intents.borrow_and_update();
            match intent {
                Intent::Run => return Ok(()),
                Intent::Abandon => return Err(UploadError::Cancelled),
                Intent::Pause => {
                    self.set_state(UploadState::Paused);
                    if intents.changed().await.is_err() {
                        return Err(UploadError::Cancelled);
                    }
                }
            }
        }
    }

    async fn backoff(&self, delay: Duration, intents: &mut watch::Receiver<Intent>) -> Result<(), UploadError> {
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = intents.wait_for(|intent| *intent == Intent::Abandon) => Err(UploadError::Cancelled),
        }
    }

    fn set_state(&self, next: UploadState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            debug!(state = ?next, "upload state");
            self.emit(UploadEvent::State(next));
        }
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.events_tx.send(event);
    }
}
