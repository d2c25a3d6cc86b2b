//! Out-of-band identity tags attached to staged files.
//!
//! Tags are a key-value sidecar keyed by path, independent of file content.
//! Implementations:
//! - `SidecarTags` - JSON index file persisted next to the staging tree
//! - `InMemoryTags` - For testing
//!
//! Tags do not follow a file through the filesystem on their own: whoever
//! renames a staged file also calls `TagStore::rename`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{EditError, Result};

/// Well-known tag keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagKey {
    /// Remote document identifier
    DocId,
    /// Server the document was fetched from
    ServerUrl,
    /// Content digest as of the last download or upload
    Digest,
    /// Algorithm `Digest` was computed with
    DigestAlgorithm,
    /// Filename the document was staged under
    Name,
}

impl TagKey {
    pub fn as_str(self) -> &'static str {
        match self {
            TagKey::DocId => "doc_id",
            TagKey::ServerUrl => "server_url",
            TagKey::Digest => "digest",
            TagKey::DigestAlgorithm => "digest_algorithm",
            TagKey::Name => "name",
        }
    }
}

/// Path-keyed tag storage.
///
/// Called from the watch dispatcher thread as well as the worker task, so
/// implementations must be `Send + Sync`.
pub trait TagStore: Send + Sync {
    /// Read one tag.
    fn get(&self, path: &Path, key: TagKey) -> Result<Option<String>>;

    /// Write one tag.
    fn set(&self, path: &Path, key: TagKey, value: &str) -> Result<()>;

    /// Move every tag of `from` onto `to`, replacing what `to` had.
    ///
    /// Nothing changes when `from` has no tags.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Drop every tag of `path`.
    fn remove(&self, path: &Path) -> Result<()>;

    /// Drop every tag of every path under `root`.
    fn clear_under(&self, root: &Path) -> Result<()>;
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// On-disk format of the sidecar index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SidecarIndex {
    /// path -> (tag key -> value)
    files: BTreeMap<String, BTreeMap<String, String>>,
}

/// JSON sidecar index.
///
/// Every mutation is written through to disk, so tags survive a crash of the
/// daemon between a download and the next startup cleanup.
pub struct SidecarTags {
    /// Path to the index file
    path: PathBuf,
    /// In-memory copy of the index
    index: Mutex<SidecarIndex>,
}

impl SidecarTags {
    /// Open (or start) the index stored at `path`.
    ///
    /// An unreadable index is replaced by an empty one.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let index = match Self::load(&path) {
            Ok(index) => index,
            Err(e) => {
                warn!("Discarding unreadable tag index {:?}: {}", path, e);
                SidecarIndex::default()
            }
        };
        Ok(Self {
            path,
            index: Mutex::new(index),
        })
    }

    fn load(path: &Path) -> Result<SidecarIndex> {
        if !path.exists() {
            return Ok(SidecarIndex::default());
        }
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| EditError::Tag(e.to_string()))
    }

    /// Scratch file the index is written to before replacing the real one.
    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    /// Write the index through a temp file and rename, so the file on disk is
    /// either the old index or the new one.
    fn save(&self, index: &SidecarIndex) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents =
            serde_json::to_string_pretty(index).map_err(|e| EditError::Tag(e.to_string()))?;
        let temp_path = self.temp_path();
        if let Err(e) = fs::write(&temp_path, contents) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn with_index<T>(&self, f: impl FnOnce(&mut SidecarIndex) -> (T, bool)) -> Result<T> {
        let mut index = self
            .index
            .lock()
            .map_err(|_| EditError::Tag("tag index mutex poisoned".to_string()))?;
        let (value, dirty) = f(&mut index);
        if dirty {
            self.save(&index)?;
        }
        Ok(value)
    }
}

impl TagStore for SidecarTags {
    fn get(&self, path: &Path, key: TagKey) -> Result<Option<String>> {
        let key_path = path_key(path);
        self.with_index(|index| {
            let value = index
                .files
                .get(&key_path)
                .and_then(|tags| tags.get(key.as_str()))
                .cloned();
            (value, false)
        })
    }

    fn set(&self, path: &Path, key: TagKey, value: &str) -> Result<()> {
        let key_path = path_key(path);
        self.with_index(|index| {
            index
                .files
                .entry(key_path)
                .or_default()
                .insert(key.as_str().to_string(), value.to_string());
            ((), true)
        })
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from_key = path_key(from);
        let to_key = path_key(to);
        self.with_index(|index| match index.files.remove(&from_key) {
            Some(tags) => {
                index.files.insert(to_key, tags);
                ((), true)
            }
            None => ((), false),
        })
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let key_path = path_key(path);
        self.with_index(|index| {
            let removed = index.files.remove(&key_path).is_some();
            ((), removed)
        })
    }

    fn clear_under(&self, root: &Path) -> Result<()> {
        self.with_index(|index| {
            let before = index.files.len();
            index
                .files
                .retain(|path, _| !Path::new(path).starts_with(root));
            let dropped = before - index.files.len();
            if dropped > 0 {
                debug!("Dropped tags of {} file(s) under {:?}", dropped, root);
            }
            ((), dropped > 0)
        })
    }
}

/// In-memory tag store for testing
#[derive(Default)]
pub struct InMemoryTags {
    tags: Mutex<HashMap<PathBuf, HashMap<TagKey, String>>>,
}

impl InMemoryTags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of paths carrying at least one tag.
    pub fn tagged_count(&self) -> usize {
        self.tags.lock().unwrap().len()
    }
}

impl TagStore for InMemoryTags {
    fn get(&self, path: &Path, key: TagKey) -> Result<Option<String>> {
        let tags = self.tags.lock().unwrap();
        Ok(tags.get(path).and_then(|t| t.get(&key)).cloned())
    }

    fn set(&self, path: &Path, key: TagKey, value: &str) -> Result<()> {
        let mut tags = self.tags.lock().unwrap();
        tags.entry(path.to_path_buf())
            .or_default()
            .insert(key, value.to_string());
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut tags = self.tags.lock().unwrap();
        if let Some(moved) = tags.remove(from) {
            tags.insert(to.to_path_buf(), moved);
        }
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        self.tags.lock().unwrap().remove(path);
        Ok(())
    }

    fn clear_under(&self, root: &Path) -> Result<()> {
        self.tags.lock().unwrap().retain(|path, _| !path.starts_with(root));
        Ok(())
    }
}
