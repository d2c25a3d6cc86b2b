//! Content fetcher: resolves a remote document to a staged local file.
//!
//! Flow for one `edit()`:
//! 1. Resolve the engine for the server URL (and user)
//! 2. Fetch document metadata
//! 3. Copy a local duplicate, or download, into a temporary name
//! 4. Tag the temporary file, then rename it into place
//! 5. Hand the final path to the launcher

use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{EditError, Result};
use crate::local::{download_tmp_name, safe_filename};
use crate::protocol::EditRequest;
use crate::remote::{DocInfo, EngineHandle, EngineRegistry, FileLauncher};
use crate::staging::{StagingDir, StagingEntry};
use crate::tags::TagStore;
use crate::worker::WorkerMetrics;

/// Result of an `edit()` call that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// No engine is bound for the requested server; nothing was staged.
    NoEngine,
    /// The document was staged (and handed to the launcher).
    Staged(StagingEntry),
}

/// Where a staged file's bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentSource {
    LocalDuplicate,
    Download,
}

/// Stages remote documents for external editing.
#[derive(Clone)]
pub struct ContentFetcher {
    staging: StagingDir,
    registry: Arc<dyn EngineRegistry>,
    tags: Arc<dyn TagStore>,
    launcher: Arc<dyn FileLauncher>,
    metrics: Arc<WorkerMetrics>,
}

impl ContentFetcher {
    pub fn new(
        staging: StagingDir,
        registry: Arc<dyn EngineRegistry>,
        tags: Arc<dyn TagStore>,
        launcher: Arc<dyn FileLauncher>,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Self {
            staging,
            registry,
            tags,
            launcher,
            metrics,
        }
    }

    /// Stage and open a document.
    pub async fn edit(
        &self,
        server_url: &str,
        doc_id: &str,
        user: Option<&str>,
        download_url: Option<&str>,
    ) -> Result<EditOutcome> {
        let Some(engine) = self.registry.lookup(server_url, user) else {
            debug!("No engine found for {}({})", server_url, doc_id);
            return Ok(EditOutcome::NoEngine);
        };

        let dir_path = self.staging.doc_dir(doc_id)?;
        let info = engine.remote.get_info(doc_id).await?;
        fs::create_dir_all(&dir_path).await?;
        let safe_name = safe_filename(&info.name);
        let file_path = dir_path.join(&safe_name);

        let url = download_url.map(|relative| join_url(server_url, relative));
        let tmp_path = dir_path.join(download_tmp_name(&safe_name));

        let entry = StagingEntry {
            doc_id: doc_id.to_string(),
            dir_path,
            file_path: file_path.clone(),
            origin_server_url: server_url.to_string(),
            last_known_digest: info.digest.clone(),
            digest_algorithm: info.digest_algorithm,
            original_filename: safe_name,
        };

        if let Err(e) = self
            .materialize(&engine, &info, url.as_deref(), &tmp_path, &file_path, &entry)
            .await
        {
            self.discard(&tmp_path).await;
            return Err(e);
        }

        self.metrics.record_staged();
        info!("Staged {} from {} at {:?}", doc_id, server_url, file_path);

        if let Err(e) = self.launcher.open(&file_path) {
            warn!("Failed to open {:?}: {}", file_path, e);
        }
        Ok(EditOutcome::Staged(entry))
    }

    /// Stage and open the document described by a protocol request.
    pub async fn edit_request(&self, request: &EditRequest) -> Result<EditOutcome> {
        self.edit(
            &request.server_url,
            &request.doc_id,
            request.user.as_deref(),
            request.download_url.as_deref(),
        )
        .await
    }

    /// Write content under the temporary name, tag it, rename it into place.
    async fn materialize(
        &self,
        engine: &EngineHandle,
        info: &DocInfo,
        url: Option<&str>,
        tmp_path: &Path,
        file_path: &Path,
        entry: &StagingEntry,
    ) -> Result<()> {
        let source = self.download_content(engine, info, url, tmp_path).await?;
        debug!("Content for {} from {:?}", entry.doc_id, source);

        entry.tag(self.tags.as_ref(), tmp_path)?;
        // A re-edit replaces these; they are put back if the rename fails
        let previous = StagingEntry::from_tags(self.tags.as_ref(), file_path)?;
        // Tags move before the file so the rename event already sees them
        self.tags.rename(tmp_path, file_path)?;
        if let Err(e) = fs::rename(tmp_path, file_path).await {
            self.restore_tags(tmp_path, file_path, previous.as_ref());
            return Err(e.into());
        }
        Ok(())
    }

    /// Undo the tag move of a failed rename.
    fn restore_tags(&self, tmp_path: &Path, file_path: &Path, previous: Option<&StagingEntry>) {
        if let Err(e) = self.tags.rename(file_path, tmp_path) {
            warn!("Failed to move tags back from {:?}: {}", file_path, e);
        }
        if let Some(previous) = previous {
            if let Err(e) = previous.tag(self.tags.as_ref(), file_path) {
                warn!("Failed to restore tags of {:?}: {}", file_path, e);
            }
        }
    }

    async fn download_content(
        &self,
        engine: &EngineHandle,
        info: &DocInfo,
        url: Option<&str>,
        file_out: &Path,
    ) -> Result<ContentSource> {
        let duplicate = engine
            .duplicates
            .get_valid_duplicate_file(&info.digest, info.digest_algorithm);
        if let Some(duplicate) = duplicate {
            match fs::copy(&duplicate, file_out).await {
                Ok(_) => return Ok(ContentSource::LocalDuplicate),
                Err(e) => warn!("Failed to copy duplicate {:?}, downloading: {}", duplicate, e),
            }
        }
        match url {
            Some(url) => engine.remote.do_get(url, file_out).await?,
            None => engine.remote.get_blob(&info.uid, file_out).await?,
        }
        if !fs::try_exists(file_out).await? {
            return Err(EditError::Transfer(format!(
                "download of {} produced no file",
                info.uid
            )));
        }
        Ok(ContentSource::Download)
    }

    /// Remove a partial download and any tags it received.
    async fn discard(&self, tmp_path: &Path) {
        if let Err(e) = fs::remove_file(tmp_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove partial download {:?}: {}", tmp_path, e);
            }
        }
        if let Err(e) = self.tags.remove(tmp_path) {
            warn!("Failed to drop tags of {:?}: {}", tmp_path, e);
        }
    }
}

/// Join a server-relative path onto the server URL with exactly one slash.
pub fn join_url(server_url: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        server_url.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}
