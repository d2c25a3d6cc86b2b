//! In-memory collaborators for tests.
//!
//! - `RecordingRemote` - documents held in memory, every call recorded
//! - `RecordingLauncher` - remembers opened paths instead of spawning anything
//! - `StaticDuplicates` - duplicate index over a fixed candidate list

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use crate::error::{EditError, Result};
use crate::local::DigestAlgorithm;
use crate::remote::{DocInfo, DuplicateIndex, FileLauncher, RemoteDocClient};

#[derive(Debug, Clone)]
struct RemoteDoc {
    name: String,
    content: Vec<u8>,
}

/// Remote client over in-memory documents. A document's uid is its doc id.
#[derive(Default)]
pub struct RecordingRemote {
    docs: RwLock<HashMap<String, RemoteDoc>>,
    algorithm: DigestAlgorithm,
    get_info_calls: Mutex<Vec<String>>,
    do_get_calls: Mutex<Vec<String>>,
    downloads: AtomicUsize,
    updates: Mutex<Vec<(String, Vec<u8>)>>,
    fail_downloads: AtomicBool,
    /// Number of upcoming uploads that fail with a transfer error
    failing_uploads: AtomicUsize,
}

impl RecordingRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report digests computed with `algorithm` instead of md5.
    pub fn with_digest_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn add_document(&self, doc_id: &str, name: &str, content: &[u8]) {
        let mut docs = self.docs.write().unwrap();
        docs.insert(
            doc_id.to_string(),
            RemoteDoc {
                name: name.to_string(),
                content: content.to_vec(),
            },
        );
    }

    /// Forget a document, as if it was deleted server side.
    pub fn delete_document(&self, doc_id: &str) {
        self.docs.write().unwrap().remove(doc_id);
    }

    /// Current server-side content of a document.
    pub fn content(&self, doc_id: &str) -> Option<Vec<u8>> {
        self.docs.read().unwrap().get(doc_id).map(|d| d.content.clone())
    }

    pub fn fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` uploads fail.
    pub fn fail_next_uploads(&self, count: usize) {
        self.failing_uploads.store(count, Ordering::SeqCst);
    }

    pub fn get_info_calls(&self) -> Vec<String> {
        self.get_info_calls.lock().unwrap().clone()
    }

    pub fn do_get_calls(&self) -> Vec<String> {
        self.do_get_calls.lock().unwrap().clone()
    }

    /// Number of successful downloads (blob or URL).
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Successful uploads as (uid, uploaded bytes), in order.
    pub fn updates(&self) -> Vec<(String, Vec<u8>)> {
        self.updates.lock().unwrap().clone()
    }

    fn lookup(&self, uid: &str) -> Result<RemoteDoc> {
        self.docs
            .read()
            .unwrap()
            .get(uid)
            .cloned()
            .ok_or_else(|| EditError::NotFound(uid.to_string()))
    }

    async fn write_out(&self, doc: &RemoteDoc, file_out: &Path) -> Result<()> {
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(EditError::Transfer("download refused".to_string()));
        }
        tokio::fs::write(file_out, &doc.content).await?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RemoteDocClient for RecordingRemote {
    async fn get_info(&self, doc_id: &str) -> Result<DocInfo> {
        self.get_info_calls.lock().unwrap().push(doc_id.to_string());
        let doc = self.lookup(doc_id)?;
        Ok(DocInfo {
            name: doc.name,
            digest: self.algorithm.digest_bytes(&doc.content),
            digest_algorithm: self.algorithm,
            uid: doc_id.to_string(),
        })
    }

    async fn get_blob(&self, uid: &str, file_out: &Path) -> Result<()> {
        let doc = self.lookup(uid)?;
        self.write_out(&doc, file_out).await
    }

    async fn do_get(&self, url: &str, file_out: &Path) -> Result<()> {
        self.do_get_calls.lock().unwrap().push(url.to_string());
        let doc = {
            let docs = self.docs.read().unwrap();
            docs.iter()
                .find(|(uid, _)| url.contains(uid.as_str()))
                .map(|(_, doc)| doc.clone())
        };
        let doc = doc.ok_or_else(|| EditError::NotFound(url.to_string()))?;
        self.write_out(&doc, file_out).await
    }

    async fn stream_update(&self, uid: &str, path: &Path) -> Result<()> {
        let content = tokio::fs::read(path).await?;
        let failing = self.failing_uploads.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_uploads.store(failing - 1, Ordering::SeqCst);
            return Err(EditError::Transfer(format!("upload of {} refused", uid)));
        }
        {
            let mut docs = self.docs.write().unwrap();
            let doc = docs
                .get_mut(uid)
                .ok_or_else(|| EditError::NotFound(uid.to_string()))?;
            doc.content = content.clone();
        }
        self.updates.lock().unwrap().push((uid.to_string(), content));
        Ok(())
    }
}

/// Launcher that only records what it was asked to open.
#[derive(Default)]
pub struct RecordingLauncher {
    opened: Mutex<Vec<PathBuf>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().unwrap().clone()
    }
}

impl FileLauncher for RecordingLauncher {
    fn open(&self, path: &Path) -> Result<()> {
        self.opened.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

/// Duplicate index over a fixed list of candidate files.
pub struct StaticDuplicates {
    candidates: Vec<PathBuf>,
}

impl StaticDuplicates {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }
}

impl DuplicateIndex for StaticDuplicates {
    fn get_valid_duplicate_file(
        &self,
        digest: &str,
        algorithm: DigestAlgorithm,
    ) -> Option<PathBuf> {
        self.candidates
            .iter()
            .find(|path| {
                algorithm
                    .digest_file(path)
                    .is_ok_and(|candidate| candidate == digest)
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_recording_remote_serves_and_accepts_content() {
        let dir = TempDir::new().unwrap();
        let remote = RecordingRemote::new();
        remote.add_document("doc-1", "a.txt", b"v1");

        let info = remote.get_info("doc-1").await.unwrap();
        assert_eq!(info.name, "a.txt");
        assert_eq!(info.digest, DigestAlgorithm::Md5.digest_bytes(b"v1"));
        assert_eq!(info.digest_algorithm, DigestAlgorithm::Md5);

        let out = dir.path().join("a.txt");
        remote.get_blob(&info.uid, &out).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"v1");

        std::fs::write(&out, b"v2").unwrap();
        remote.stream_update("doc-1", &out).await.unwrap();
        assert_eq!(remote.content("doc-1").unwrap(), b"v2");
        assert_eq!(remote.updates(), vec![("doc-1".to_string(), b"v2".to_vec())]);
    }

    #[tokio::test]
    async fn test_missing_document_is_not_found() {
        let remote = RecordingRemote::new();
        assert!(matches!(
            remote.get_info("nope").await,
            Err(EditError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failing_uploads_count_down() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"v2").unwrap();
        let remote = RecordingRemote::new();
        remote.add_document("doc-1", "a.txt", b"v1");
        remote.fail_next_uploads(1);

        assert!(remote.stream_update("doc-1", &file).await.is_err());
        assert!(remote.stream_update("doc-1", &file).await.is_ok());
        assert_eq!(remote.updates().len(), 1);
    }
}
