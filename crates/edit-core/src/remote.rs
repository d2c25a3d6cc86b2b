//! Collaborator contracts consumed by the edit loop.
//!
//! Implementations:
//! - `NuxeoClient` (in edit-daemon) - Nuxeo REST API over reqwest
//! - `RecordingRemote` (in `testing`) - in-memory documents for tests
//!
//! The engine registry is injected at construction instead of being looked up
//! as ambient state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::local::DigestAlgorithm;

/// Remote document metadata needed to stage a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocInfo {
    /// Blob filename as stored on the server
    pub name: String,
    /// Blob content digest
    pub digest: String,
    /// Algorithm the server computed `digest` with
    #[serde(default)]
    pub digest_algorithm: DigestAlgorithm,
    /// Document uid used for blob fetches
    pub uid: String,
}

/// Remote document operations.
#[async_trait]
pub trait RemoteDocClient: Send + Sync {
    /// Fetch document metadata.
    async fn get_info(&self, doc_id: &str) -> Result<DocInfo>;

    /// Download the main blob of a document into `file_out`.
    async fn get_blob(&self, uid: &str, file_out: &Path) -> Result<()>;

    /// Download an arbitrary URL into `file_out`.
    async fn do_get(&self, url: &str, file_out: &Path) -> Result<()>;

    /// Replace the main blob of a document with the content of `path`.
    async fn stream_update(&self, uid: &str, path: &Path) -> Result<()>;
}

/// Content-addressed index of files already present locally.
pub trait DuplicateIndex: Send + Sync {
    /// A local file whose content currently hashes to `digest` under
    /// `algorithm`, if any.
    fn get_valid_duplicate_file(
        &self,
        digest: &str,
        algorithm: DigestAlgorithm,
    ) -> Option<PathBuf>;
}

/// Index for engines without a local tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDuplicates;

impl DuplicateIndex for NoDuplicates {
    fn get_valid_duplicate_file(
        &self,
        _digest: &str,
        _algorithm: DigestAlgorithm,
    ) -> Option<PathBuf> {
        None
    }
}

/// Opens a file with its default associated application.
pub trait FileLauncher: Send + Sync {
    fn open(&self, path: &Path) -> Result<()>;
}

/// A bound server account: remote client plus local duplicate index.
#[derive(Clone)]
pub struct EngineHandle {
    pub server_url: String,
    pub user: String,
    pub remote: Arc<dyn RemoteDocClient>,
    pub duplicates: Arc<dyn DuplicateIndex>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("server_url", &self.server_url)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Resolves a server URL (and optional user) to a bound engine.
pub trait EngineRegistry: Send + Sync {
    fn lookup(&self, server_url: &str, user: Option<&str>) -> Option<EngineHandle>;
}

/// Server URLs compare equal with or without one trailing slash.
pub fn normalize_server_url(url: &str) -> &str {
    url.strip_suffix('/').unwrap_or(url)
}

/// Registry over a fixed list of engines, first match wins.
#[derive(Debug, Default, Clone)]
pub struct StaticRegistry {
    engines: Vec<EngineHandle>,
}

impl StaticRegistry {
    pub fn new(engines: Vec<EngineHandle>) -> Self {
        Self { engines }
    }

    pub fn push(&mut self, engine: EngineHandle) {
        self.engines.push(engine);
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

impl EngineRegistry for StaticRegistry {
    fn lookup(&self, server_url: &str, user: Option<&str>) -> Option<EngineHandle> {
        let wanted = normalize_server_url(server_url);
        self.engines
            .iter()
            .find(|engine| {
                normalize_server_url(&engine.server_url) == wanted
                    && user.is_none_or(|u| u == engine.user)
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingRemote;

    fn engine(url: &str, user: &str) -> EngineHandle {
        EngineHandle {
            server_url: url.to_string(),
            user: user.to_string(),
            remote: Arc::new(RecordingRemote::new()),
            duplicates: Arc::new(NoDuplicates),
        }
    }

    #[test]
    fn test_lookup_ignores_trailing_slash() {
        let registry = StaticRegistry::new(vec![engine("https://nuxeo.example/", "alice")]);

        assert!(registry.lookup("https://nuxeo.example", None).is_some());
        assert!(registry.lookup("https://nuxeo.example/", None).is_some());
        assert!(registry.lookup("https://other.example", None).is_none());
    }

    #[test]
    fn test_lookup_filters_by_user_when_given() {
        let registry = StaticRegistry::new(vec![
            engine("https://nuxeo.example", "alice"),
            engine("https://nuxeo.example", "bob"),
        ]);

        let found = registry.lookup("https://nuxeo.example", Some("bob")).unwrap();
        assert_eq!(found.user, "bob");

        // Without a user the first binding wins
        let found = registry.lookup("https://nuxeo.example", None).unwrap();
        assert_eq!(found.user, "alice");

        assert!(registry.lookup("https://nuxeo.example", Some("carol")).is_none());
    }

    #[test]
    fn test_no_duplicates_never_matches() {
        assert!(
            NoDuplicates
                .get_valid_duplicate_file("abc", DigestAlgorithm::Md5)
                .is_none()
        );
    }
}
