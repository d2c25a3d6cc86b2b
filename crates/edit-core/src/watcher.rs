//! Recursive watch on the staging tree.
//!
//! Uses notify's raw events rather than a debouncer: rename pairs have to be
//! seen as moves so the filter can judge their source and destination. Each event is translated and handed
//! to the `EventFilter` on notify's dispatcher thread.

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::filter::{EventFilter, RawEvent, RawEventKind};

/// Active watch on the staging root. Dropping it stops the watch.
pub struct StagingWatcher {
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl StagingWatcher {
    /// Start watching `root` recursively, feeding every event to `filter`.
    pub fn start(root: &Path, filter: EventFilter) -> Result<Self> {
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    for raw in translate(&event) {
                        filter.handle(&raw);
                    }
                }
                Err(e) => error!("Staging watcher error: {}", e),
            }
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        debug!("Watching {:?}", root);

        Ok(Self {
            root: root.to_path_buf(),
            watcher: Some(watcher),
        })
    }

    /// Stop the watch. Safe to call more than once; failures are only logged.
    pub fn stop(&mut self) {
        let Some(mut watcher) = self.watcher.take() else {
            return;
        };
        if let Err(e) = watcher.unwatch(&self.root) {
            warn!("Failed to unwatch {:?}: {}", self.root, e);
        }
        debug!("Stopped watching {:?}", self.root);
    }
}

impl Drop for StagingWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Translate a notify event into raw events, one per affected path.
///
/// A rename reported with both ends becomes a single move.
pub fn translate(event: &Event) -> Vec<RawEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => RawEventKind::Created,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            return vec![RawEvent::moved(&event.paths[0], &event.paths[1])];
        }
        // Only the destination is known
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            return event
                .paths
                .iter()
                .map(|path| RawEvent::moved(path, path))
                .collect();
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => RawEventKind::Deleted,
        EventKind::Modify(_) => RawEventKind::Modified,
        EventKind::Remove(_) => RawEventKind::Deleted,
        _ => RawEventKind::Other,
    };
    event
        .paths
        .iter()
        .map(|path| RawEvent::new(kind, path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn test_translate_basic_kinds() {
        let created = translate(&event(EventKind::Create(CreateKind::File), &["/s/a"]));
        assert_eq!(created, vec![RawEvent::new(RawEventKind::Created, "/s/a")]);

        let modified = translate(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/s/a"],
        ));
        assert_eq!(modified, vec![RawEvent::new(RawEventKind::Modified, "/s/a")]);

        let removed = translate(&event(EventKind::Remove(RemoveKind::File), &["/s/a"]));
        assert_eq!(removed, vec![RawEvent::new(RawEventKind::Deleted, "/s/a")]);

        let access = translate(&event(EventKind::Access(AccessKind::Any), &["/s/a"]));
        assert_eq!(access, vec![RawEvent::new(RawEventKind::Other, "/s/a")]);
    }

    #[test]
    fn test_translate_renames() {
        let both = translate(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/s/.a.swp", "/s/a"],
        ));
        assert_eq!(both, vec![RawEvent::moved("/s/.a.swp", "/s/a")]);

        let to = translate(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/s/a"],
        ));
        assert_eq!(to, vec![RawEvent::moved("/s/a", "/s/a")]);

        let from = translate(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/s/a"],
        ));
        assert_eq!(from, vec![RawEvent::new(RawEventKind::Deleted, "/s/a")]);
    }
}
