//! Translation of raw filesystem events into edit intents.
//!
//! Runs on the watch dispatcher thread. A raw event becomes an upload queue
//! entry only when it targets a staged file still carrying the name it was
//! staged under; everything else is dropped here.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::error::Result;
use crate::local::{file_name, is_temp_file, normalize_event_path};
use crate::queue::UploadSender;
use crate::tags::{TagKey, TagStore};
use crate::worker::WorkerMetrics;

/// Kind of a raw filesystem event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventKind {
    Created,
    Modified,
    /// Rename; the destination is in `RawEvent::dest_path`
    Moved,
    Deleted,
    /// Access and unclassified notifications
    Other,
}

/// Backend-independent filesystem event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawEventKind,
    pub src_path: PathBuf,
    /// Destination side of a `Moved` event
    pub dest_path: Option<PathBuf>,
}

impl RawEvent {
    pub fn new(kind: RawEventKind, src_path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            src_path: src_path.into(),
            dest_path: None,
        }
    }

    pub fn moved(src_path: impl Into<PathBuf>, dest_path: impl Into<PathBuf>) -> Self {
        Self {
            kind: RawEventKind::Moved,
            src_path: src_path.into(),
            dest_path: Some(dest_path.into()),
        }
    }
}

/// Event filter feeding the upload queue.
#[derive(Clone)]
pub struct EventFilter {
    /// Staging root as configured (tags are keyed under it)
    root: PathBuf,
    /// Staging root as the OS reports it
    canonical_root: PathBuf,
    tags: Arc<dyn TagStore>,
    queue: UploadSender,
    metrics: Arc<WorkerMetrics>,
}

impl EventFilter {
    /// Create a filter for `root`. The root must already exist to be
    /// canonicalized; otherwise it is used as given.
    pub fn new(
        root: PathBuf,
        tags: Arc<dyn TagStore>,
        queue: UploadSender,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        let canonical_root = root.canonicalize().unwrap_or_else(|_| root.clone());
        Self {
            root,
            canonical_root,
            tags,
            queue,
            metrics,
        }
    }

    /// Handle one raw event. Never fails: errors are logged and the event dropped.
    ///
    /// Returns the queued path, if any.
    pub fn handle(&self, event: &RawEvent) -> Option<PathBuf> {
        self.metrics.record_fs_event();
        trace!("Raw event {:?} on {:?}", event.kind, event.src_path);
        match self.evaluate(event) {
            Ok(Some(path)) => {
                debug!("Queued {:?} for upload check", path);
                if !self.queue.push(path.clone()) {
                    debug!("Upload queue closed, dropping {:?}", path);
                    return None;
                }
                Some(path)
            }
            Ok(None) => None,
            Err(e) => {
                error!("Failed to handle {:?} event on {:?}: {}", event.kind, event.src_path, e);
                None
            }
        }
    }

    /// Decide whether an event is an edit of a staged file.
    ///
    /// Directories and temp names are judged on the source path, so a
    /// download or scratch file renamed onto a document is not an edit. A
    /// move then counts for its destination.
    fn evaluate(&self, event: &RawEvent) -> Result<Option<PathBuf>> {
        let src_path = self.normalize(&event.src_path);
        if src_path.is_dir() {
            return Ok(None);
        }
        match file_name(&src_path) {
            Some(name) if !is_temp_file(name) => {}
            _ => return Ok(None),
        }

        let path = match (event.kind, &event.dest_path) {
            (RawEventKind::Modified | RawEventKind::Created, _) => src_path,
            (RawEventKind::Moved, Some(dest)) => self.normalize(dest),
            (RawEventKind::Moved, None) => src_path,
            (RawEventKind::Deleted | RawEventKind::Other, _) => return Ok(None),
        };
        let Some(name) = file_name(&path) else {
            return Ok(None);
        };

        match self.tags.get(&path, TagKey::Name)? {
            Some(tagged) if tagged == name => Ok(Some(path)),
            Some(tagged) => {
                debug!("Ignoring {:?}: staged as {:?}", path, tagged);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn normalize(&self, path: &Path) -> PathBuf {
        normalize_event_path(path, &self.root, &self.canonical_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{upload_queue, UploadQueue};
    use crate::tags::InMemoryTags;
    use std::fs;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        tags: Arc<InMemoryTags>,
        queue: UploadQueue,
        metrics: Arc<WorkerMetrics>,
        filter: EventFilter,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("staging");
        fs::create_dir_all(&root).unwrap();
        let tags = Arc::new(InMemoryTags::new());
        let (tx, queue) = upload_queue();
        let metrics = Arc::new(WorkerMetrics::default());
        let filter = EventFilter::new(root.clone(), tags.clone(), tx, metrics.clone());
        Fixture {
            _dir: dir,
            root,
            tags,
            queue,
            metrics,
            filter,
        }
    }

    fn stage(fx: &Fixture, doc_id: &str, name: &str) -> PathBuf {
        let path = fx.root.join(doc_id).join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"content").unwrap();
        fx.tags.set(&path, TagKey::DocId, doc_id).unwrap();
        fx.tags.set(&path, TagKey::Name, name).unwrap();
        path
    }

    #[test]
    fn test_modified_staged_file_is_queued() {
        let mut fx = fixture();
        let path = stage(&fx, "doc-1", "a.odt");

        let queued = fx.filter.handle(&RawEvent::new(RawEventKind::Modified, &path));

        assert_eq!(queued, Some(path.clone()));
        assert_eq!(fx.queue.drain(), vec![path]);
    }

    #[test]
    fn test_created_staged_file_is_queued() {
        let mut fx = fixture();
        let path = stage(&fx, "doc-1", "a.odt");

        fx.filter.handle(&RawEvent::new(RawEventKind::Created, &path));
        assert_eq!(fx.queue.drain().len(), 1);
    }

    #[test]
    fn test_untagged_file_is_ignored() {
        let mut fx = fixture();
        let stray = fx.root.join("doc-1/stray.txt");
        fs::create_dir_all(stray.parent().unwrap()).unwrap();
        fs::write(&stray, b"x").unwrap();

        assert_eq!(fx.filter.handle(&RawEvent::new(RawEventKind::Modified, &stray)), None);
        assert!(fx.queue.drain().is_empty());
    }

    #[test]
    fn test_directory_events_are_ignored() {
        let mut fx = fixture();
        let dir = fx.root.join("doc-1");
        fs::create_dir_all(&dir).unwrap();
        fx.tags.set(&dir, TagKey::Name, "doc-1").unwrap();

        fx.filter.handle(&RawEvent::new(RawEventKind::Modified, &dir));
        assert!(fx.queue.drain().is_empty());
    }

    #[test]
    fn test_temp_files_are_ignored() {
        let mut fx = fixture();
        let tmp = stage(&fx, "doc-1", ".a.odt.nxpart");

        fx.filter.handle(&RawEvent::new(RawEventKind::Modified, &tmp));
        assert!(fx.queue.drain().is_empty());
    }

    #[test]
    fn test_rename_away_from_tagged_name_is_ignored() {
        let mut fx = fixture();
        let path = stage(&fx, "doc-1", "a.odt");
        let renamed = fx.root.join("doc-1/b.odt");
        fs::rename(&path, &renamed).unwrap();
        // Tags followed the file but the name no longer matches
        fx.tags.rename(&path, &renamed).unwrap();

        fx.filter.handle(&RawEvent::moved(&path, &renamed));
        assert!(fx.queue.drain().is_empty());
    }

    #[test]
    fn test_safe_save_rename_onto_staged_name_is_queued() {
        let mut fx = fixture();
        let path = stage(&fx, "doc-1", "a.odt");
        let scratch = fx.root.join("doc-1/a.odt.sb-1234");
        fs::write(&scratch, b"new content").unwrap();
        fs::rename(&scratch, &path).unwrap();

        let queued = fx.filter.handle(&RawEvent::moved(&scratch, &path));
        assert_eq!(queued, Some(path.clone()));
        assert_eq!(fx.queue.drain(), vec![path]);
    }

    #[test]
    fn test_download_renamed_into_place_is_not_queued() {
        let mut fx = fixture();
        let path = stage(&fx, "doc-1", "a.odt");
        let tmp = fx.root.join("doc-1/.a.odt.nxpart");

        assert_eq!(fx.filter.handle(&RawEvent::moved(&tmp, &path)), None);
        assert!(fx.queue.drain().is_empty());
    }

    #[test]
    fn test_swap_file_renamed_onto_staged_name_is_not_queued() {
        let mut fx = fixture();
        let path = stage(&fx, "doc-1", "a.odt");
        let swap = fx.root.join("doc-1/.a.odt.swp");

        assert_eq!(fx.filter.handle(&RawEvent::moved(&swap, &path)), None);
        assert!(fx.queue.drain().is_empty());
    }

    #[test]
    fn test_decomposed_event_path_matches_composed_tags() {
        let mut fx = fixture();
        let path = stage(&fx, "doc-1", "caf\u{e9}.odt");
        let reported = fx.root.join("doc-1/cafe\u{301}.odt");

        let queued = fx.filter.handle(&RawEvent::new(RawEventKind::Modified, &reported));
        assert_eq!(queued, Some(path.clone()));
        assert_eq!(fx.queue.drain(), vec![path]);
    }

    #[test]
    fn test_deleted_events_are_ignored() {
        let mut fx = fixture();
        let path = stage(&fx, "doc-1", "a.odt");

        fx.filter.handle(&RawEvent::new(RawEventKind::Deleted, &path));
        fx.filter.handle(&RawEvent::new(RawEventKind::Other, &path));
        assert!(fx.queue.drain().is_empty());
    }

    #[test]
    fn test_every_event_is_counted() {
        let fx = fixture();
        let path = stage(&fx, "doc-1", "a.odt");

        fx.filter.handle(&RawEvent::new(RawEventKind::Modified, &path));
        fx.filter.handle(&RawEvent::new(RawEventKind::Deleted, &path));
        fx.filter.handle(&RawEvent::new(RawEventKind::Other, fx.root.join("nope")));

        assert_eq!(fx.metrics.fs_events.load(Ordering::Relaxed), 3);
    }
}
