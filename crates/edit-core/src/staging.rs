//! Staging tree: the local scratch directory holding documents opened for edit.
//!
//! Layout is `staging_root/<doc_id>/<safe_filename>`. Individual entries are
//! never deleted; the whole tree is reset once per worker run.

use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{EditError, Result};
use crate::local::DigestAlgorithm;
use crate::tags::{TagKey, TagStore};

/// Owner of the staging root.
#[derive(Debug, Clone)]
pub struct StagingDir {
    root: PathBuf,
}

impl StagingDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the staged copy of `doc_id`.
    ///
    /// `doc_id` must be exactly one plain path component, so the directory is
    /// always a direct child of the root.
    pub fn doc_dir(&self, doc_id: &str) -> Result<PathBuf> {
        let mut components = Path::new(doc_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == doc_id => {
                Ok(self.root.join(doc_id))
            }
            _ => Err(EditError::InvalidDocId(doc_id.to_string())),
        }
    }

    /// Reset the tree: remove it (best effort), then recreate the root.
    ///
    /// The root exists afterwards even if part of the removal failed. Tags of
    /// files that lived under the root are dropped along with them.
    pub fn cleanup(&self, tags: &dyn TagStore) -> Result<()> {
        debug!("Cleanup staging folder {:?}", self.root);
        if let Err(e) = fs::remove_dir_all(&self.root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Partial cleanup of {:?}: {}", self.root, e);
            }
        }
        if let Err(e) = tags.clear_under(&self.root) {
            warn!("Failed to drop stale tags under {:?}: {}", self.root, e);
        }
        if !self.root.exists() {
            fs::create_dir_all(&self.root)?;
        }
        Ok(())
    }
}

/// One remotely edited document materialized locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingEntry {
    pub doc_id: String,
    pub dir_path: PathBuf,
    pub file_path: PathBuf,
    pub origin_server_url: String,
    /// Digest as of the last successful download or upload
    pub last_known_digest: String,
    /// Algorithm of `last_known_digest`, as reported by the server
    pub digest_algorithm: DigestAlgorithm,
    pub original_filename: String,
}

impl StagingEntry {
    /// Write every identity tag of this entry onto `path`.
    ///
    /// `path` may differ from `file_path` while a download is in flight.
    pub fn tag(&self, tags: &dyn TagStore, path: &Path) -> Result<()> {
        if self.doc_id.is_empty() {
            return Err(EditError::Tag(format!("empty doc_id for {:?}", path)));
        }
        tags.set(path, TagKey::DocId, &self.doc_id)?;
        tags.set(path, TagKey::ServerUrl, &self.origin_server_url)?;
        tags.set(path, TagKey::Digest, &self.last_known_digest)?;
        tags.set(path, TagKey::DigestAlgorithm, self.digest_algorithm.as_str())?;
        tags.set(path, TagKey::Name, &self.original_filename)?;
        Ok(())
    }

    /// Rebuild an entry from the tags of a staged file.
    ///
    /// Returns `None` for files that were not staged by `edit()`.
    pub fn from_tags(tags: &dyn TagStore, path: &Path) -> Result<Option<Self>> {
        let Some(doc_id) = tags.get(path, TagKey::DocId)?.filter(|id| !id.is_empty()) else {
            return Ok(None);
        };
        let Some(origin_server_url) = tags.get(path, TagKey::ServerUrl)? else {
            return Ok(None);
        };
        let last_known_digest = tags.get(path, TagKey::Digest)?.unwrap_or_default();
        let digest_algorithm = tags
            .get(path, TagKey::DigestAlgorithm)?
            .and_then(|name| DigestAlgorithm::from_name(&name))
            .unwrap_or_default();
        let original_filename = match tags.get(path, TagKey::Name)? {
            Some(name) => name,
            None => crate::local::file_name(path).unwrap_or_default().to_string(),
        };
        let dir_path = path.parent().map(Path::to_path_buf).unwrap_or_default();

        Ok(Some(Self {
            doc_id,
            dir_path,
            file_path: path.to_path_buf(),
            origin_server_url,
            last_known_digest,
            digest_algorithm,
            original_filename,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::InMemoryTags;
    use tempfile::TempDir;

    #[test]
    fn test_cleanup_removes_content_and_recreates_root() {
        let dir = TempDir::new().unwrap();
        let staging = StagingDir::new(dir.path().join("Locally Edited"));
        let tags = InMemoryTags::new();

        let stale = staging.doc_dir("doc-1").unwrap().join("old.odt");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, b"stale").unwrap();
        tags.set(&stale, TagKey::DocId, "doc-1").unwrap();

        staging.cleanup(&tags).unwrap();

        assert!(staging.root().is_dir());
        assert!(!stale.exists());
        assert_eq!(tags.tagged_count(), 0);
    }

    #[test]
    fn test_cleanup_creates_missing_root() {
        let dir = TempDir::new().unwrap();
        let staging = StagingDir::new(dir.path().join("a/b/staging"));

        staging.cleanup(&InMemoryTags::new()).unwrap();
        assert!(staging.root().is_dir());
    }

    #[test]
    fn test_entry_tag_round_trip() {
        let tags = InMemoryTags::new();
        let path = Path::new("/staging/doc-42/report.odt");
        let entry = StagingEntry {
            doc_id: "doc-42".into(),
            dir_path: PathBuf::from("/staging/doc-42"),
            file_path: path.to_path_buf(),
            origin_server_url: "https://nuxeo.example".into(),
            last_known_digest: "d1".into(),
            digest_algorithm: DigestAlgorithm::Sha256,
            original_filename: "report.odt".into(),
        };

        entry.tag(&tags, path).unwrap();
        assert_eq!(StagingEntry::from_tags(&tags, path).unwrap(), Some(entry));
    }

    #[test]
    fn test_entry_requires_doc_id() {
        let tags = InMemoryTags::new();
        let path = Path::new("/staging/doc-42/report.odt");

        assert_eq!(StagingEntry::from_tags(&tags, path).unwrap(), None);

        let entry = StagingEntry {
            doc_id: String::new(),
            dir_path: PathBuf::from("/staging/doc-42"),
            file_path: path.to_path_buf(),
            origin_server_url: "https://nuxeo.example".into(),
            last_known_digest: "d1".into(),
            digest_algorithm: DigestAlgorithm::Md5,
            original_filename: "report.odt".into(),
        };
        assert!(entry.tag(&tags, path).is_err());
        assert_eq!(tags.tagged_count(), 0);
    }

    #[test]
    fn test_doc_dir_rejects_ids_that_leave_the_root() {
        let staging = StagingDir::new("/staging");

        assert_eq!(
            staging.doc_dir("9f4b2a1c-1111").unwrap(),
            PathBuf::from("/staging/9f4b2a1c-1111")
        );
        for bad in ["..", ".", "", "a/b", "/etc", "../escaped"] {
            assert!(
                matches!(staging.doc_dir(bad), Err(EditError::InvalidDocId(_))),
                "{:?} accepted",
                bad
            );
        }
    }

    #[test]
    fn test_entry_without_algorithm_tag_defaults_to_md5() {
        let tags = InMemoryTags::new();
        let path = Path::new("/staging/doc-42/report.odt");
        tags.set(path, TagKey::DocId, "doc-42").unwrap();
        tags.set(path, TagKey::ServerUrl, "https://nuxeo.example").unwrap();

        let entry = StagingEntry::from_tags(&tags, path).unwrap().unwrap();
        assert_eq!(entry.digest_algorithm, DigestAlgorithm::Md5);
    }
}
