//! Upload queue between the watch dispatcher (producer) and the worker (consumer).

use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Create a connected sender / queue pair.
pub fn upload_queue() -> (UploadSender, UploadQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UploadSender { tx }, UploadQueue { rx })
}

/// Producer side. Cheap to clone and safe to use from any thread.
#[derive(Debug, Clone)]
pub struct UploadSender {
    tx: mpsc::UnboundedSender<PathBuf>,
}

impl UploadSender {
    /// Queue a staged file for re-upload consideration.
    ///
    /// Returns false once the consumer is gone.
    pub fn push(&self, path: PathBuf) -> bool {
        self.tx.send(path).is_ok()
    }
}

/// Consumer side, owned by the worker.
#[derive(Debug)]
pub struct UploadQueue {
    rx: mpsc::UnboundedReceiver<PathBuf>,
}

impl UploadQueue {
    /// Take everything currently queued without waiting.
    ///
    /// Duplicate references collapse to their first occurrence.
    pub fn drain(&mut self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();
        while let Ok(path) = self.rx.try_recv() {
            if seen.insert(path.clone()) {
                paths.push(path);
            }
        }
        paths
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
