//! Content-addressed lookup of local copies, used to skip downloads.

use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::local::{is_temp_file, DigestAlgorithm};
use crate::remote::DuplicateIndex;

/// Duplicate index that scans an engine's local tree on demand.
///
/// A candidate is valid when it is a regular, non-temporary file whose content
/// hashes to the wanted digest at lookup time, under the algorithm the server
/// reported. Files under `exclude` (the staging root) are never offered.
#[derive(Debug, Clone)]
pub struct DigestScanIndex {
    root: PathBuf,
    exclude: Option<PathBuf>,
}

impl DigestScanIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude: None,
        }
    }

    /// Skip everything under `path`.
    pub fn excluding(mut self, path: impl Into<PathBuf>) -> Self {
        self.exclude = Some(path.into());
        self
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.exclude
            .as_deref()
            .is_some_and(|excluded| path.starts_with(excluded))
    }
}

impl DuplicateIndex for DigestScanIndex {
    fn get_valid_duplicate_file(
        &self,
        digest: &str,
        algorithm: DigestAlgorithm,
    ) -> Option<PathBuf> {
        if digest.is_empty() {
            return None;
        }
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry.path()));

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if is_temp_file(&name) {
                continue;
            }
            match algorithm.digest_file(entry.path()) {
                Ok(candidate) if candidate == digest => {
                    debug!("Found local duplicate for {}: {:?}", digest, entry.path());
                    return Some(entry.into_path());
                }
                Ok(_) => {}
                Err(e) => trace!("Skipping unreadable {:?}: {}", entry.path(), e),
            }
        }
        None
    }
}
