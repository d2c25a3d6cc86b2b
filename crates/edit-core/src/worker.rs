//! Edit worker: owns the staging tree for one run and pushes local edits back.
//!
//! The run loop mirrors the lifecycle of a sync daemon:
//! 1. Reset the staging tree
//! 2. Start the recursive watch
//! 3. Every tick: check cancellation, drain the upload queue, sleep
//! 4. Stop the watch on every exit path

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{EditError, Result};
use crate::fetcher::ContentFetcher;
use crate::filter::EventFilter;
use crate::queue::{upload_queue, UploadQueue, UploadSender};
use crate::remote::{EngineRegistry, FileLauncher};
use crate::staging::{StagingDir, StagingEntry};
use crate::tags::{TagKey, TagStore};
use crate::watcher::StagingWatcher;

/// Default delay between two drains of the upload queue.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root of the staging tree, wiped at every start
    pub staging_root: PathBuf,
    /// Idle delay between queue drains
    pub tick_interval: Duration,
}

impl WorkerConfig {
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }
}

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    Created,
    Running,
    Stopped,
}

/// Cumulative counters, shared with the watch thread.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    /// Raw filesystem events observed
    pub fs_events: AtomicU64,
    /// Local edits uploaded
    pub edit_files: AtomicU64,
    /// Documents staged by `edit()`
    pub staged_files: AtomicU64,
}

impl WorkerMetrics {
    pub fn record_fs_event(&self) {
        self.fs_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_edit(&self) {
        self.edit_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_staged(&self) {
        self.staged_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fs_events: self.fs_events.load(Ordering::Relaxed),
            edit_files: self.edit_files.load(Ordering::Relaxed),
            staged_files: self.staged_files.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `WorkerMetrics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub fs_events: u64,
    pub edit_files: u64,
    pub staged_files: u64,
}

type WatchStarter = fn(&Path, EventFilter) -> Result<StagingWatcher>;

/// The edit worker.
pub struct EditWorker {
    config: WorkerConfig,
    staging: StagingDir,
    registry: Arc<dyn EngineRegistry>,
    tags: Arc<dyn TagStore>,
    fetcher: Arc<ContentFetcher>,
    metrics: Arc<WorkerMetrics>,
    sender: UploadSender,
    queue: UploadQueue,
    state: watch::Sender<WorkerState>,
    start_watch: WatchStarter,
}

impl EditWorker {
    pub fn new(
        config: WorkerConfig,
        registry: Arc<dyn EngineRegistry>,
        tags: Arc<dyn TagStore>,
        launcher: Arc<dyn FileLauncher>,
    ) -> Self {
        let staging = StagingDir::new(config.staging_root.clone());
        let metrics = Arc::new(WorkerMetrics::default());
        let fetcher = Arc::new(ContentFetcher::new(
            staging.clone(),
            Arc::clone(&registry),
            Arc::clone(&tags),
            launcher,
            Arc::clone(&metrics),
        ));
        let (sender, queue) = upload_queue();
        let (state, _) = watch::channel(WorkerState::Created);

        Self {
            config,
            staging,
            registry,
            tags,
            fetcher,
            metrics,
            sender,
            queue,
            state,
            start_watch: StagingWatcher::start,
        }
    }

    /// Handle for staging documents while the worker runs.
    pub fn fetcher(&self) -> Arc<ContentFetcher> {
        Arc::clone(&self.fetcher)
    }

    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Producer side of the upload queue.
    pub fn upload_sender(&self) -> UploadSender {
        self.sender.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn staging_root(&self) -> &Path {
        self.staging.root()
    }

    /// Run until cancelled.
    ///
    /// `Running` is published once the tree is reset and watched, so staging
    /// may start from then on. Always ends in `Stopped`. Cancellation is reported as
    /// `EditError::Cancelled` once the watch has been torn down.
    pub async fn run(&mut self, token: CancellationToken) -> Result<()> {
        let result = self.run_loop(&token).await;

        self.state.send_replace(WorkerState::Stopped);
        let metrics = self.metrics.snapshot();
        info!(
            "Edit worker stopped ({} fs events, {} uploads, {} staged)",
            metrics.fs_events, metrics.edit_files, metrics.staged_files
        );
        result
    }

    async fn run_loop(&mut self, token: &CancellationToken) -> Result<()> {
        self.staging.cleanup(self.tags.as_ref())?;

        let filter = EventFilter::new(
            self.staging.root().to_path_buf(),
            Arc::clone(&self.tags),
            self.sender.clone(),
            Arc::clone(&self.metrics),
        );
        // Stopped on drop, whichever way the loop exits
        let _watcher = match (self.start_watch)(self.staging.root(), filter) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                error!(
                    "Cannot watch {:?}, local edits will not be uploaded: {}",
                    self.staging.root(),
                    e
                );
                None
            }
        };
        self.state.send_replace(WorkerState::Running);
        info!("Edit worker started on {:?}", self.staging.root());

        loop {
            if token.is_cancelled() {
                debug!("Edit worker interrupted");
                return Err(EditError::Cancelled);
            }
            if let Err(e) = self.handle_queue().await {
                error!("Upload pass failed: {}", e);
            }
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(self.config.tick_interval) => {}
            }
        }
    }

    /// Drain the upload queue once.
    ///
    /// Returns the number of files uploaded. A failed upload aborts the pass;
    /// entries not yet looked at go back on the queue.
    pub async fn handle_queue(&mut self) -> Result<usize> {
        let pending = self.queue.drain();
        if pending.is_empty() {
            return Ok(0);
        }
        debug!("Handling {} queued file(s)", pending.len());

        let mut uploaded = 0;
        let mut items = pending.into_iter();
        while let Some(path) = items.next() {
            match self.upload_if_changed(&path).await {
                Ok(true) => uploaded += 1,
                Ok(false) => {}
                Err(EditError::NotFound(what)) => {
                    debug!("Dropping {:?}, {} no longer exists", path, what);
                }
                Err(EditError::Lookup { server_url, user }) => {
                    warn!("No engine for {} ({:?}), skipping {:?}", server_url, user, path);
                }
                Err(e) => {
                    for rest in items.by_ref() {
                        self.sender.push(rest);
                    }
                    return Err(e);
                }
            }
        }
        Ok(uploaded)
    }

    /// Upload `path` if its content no longer matches its digest tag.
    async fn upload_if_changed(&self, path: &Path) -> Result<bool> {
        let Some(entry) = StagingEntry::from_tags(self.tags.as_ref(), path)? else {
            debug!("No identity tags on {:?}", path);
            return Ok(false);
        };
        let engine = self
            .registry
            .lookup(&entry.origin_server_url, None)
            .ok_or_else(|| EditError::Lookup {
                server_url: entry.origin_server_url.clone(),
                user: None,
            })?;

        let digest = match entry
            .digest_algorithm
            .digest_file_async(path.to_path_buf())
            .await
        {
            Ok(digest) => digest,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EditError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if digest == entry.last_known_digest {
            debug!("Digest unchanged for {:?}, not uploading", path);
            return Ok(false);
        }

        debug!("Uploading {:?} to {}", path, entry.doc_id);
        engine.remote.stream_update(&entry.doc_id, path).await?;
        self.tags.set(path, TagKey::Digest, &digest)?;
        self.metrics.record_edit();
        info!("Uploaded local edit of {:?} to {}", path, entry.doc_id);
        Ok(true)
    }
}
