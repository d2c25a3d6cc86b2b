//! Local file helpers: digests, safe names, temp-file recognition.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

/// Prefix wrapping an in-flight download until it is renamed into place.
pub const DOWNLOAD_TMP_FILE_PREFIX: &str = ".";
/// Suffix wrapping an in-flight download until it is renamed into place.
pub const DOWNLOAD_TMP_FILE_SUFFIX: &str = ".nxpart";

/// Buffer size for digest computation.
pub const FILE_BUFFER_SIZE: usize = 4096;

/// Editor lock and scratch files (Office owner files, LibreOffice locks).
const TEMP_PREFIXES: &[&str] = &["~$", ".~lock."];

/// Editor buffers, swap files, lock files, partial downloads.
const TEMP_SUFFIXES: &[&str] = &["~", ".swp", ".swx", ".tmp", ".lock", ".LOCK", ".part"];

/// Characters that are not allowed in a filename on at least one platform.
const UNSAFE_CHARS: &[char] = &['/', '\\', '*', ':', '|', '"', '<', '>', '?'];

/// Content hash used for change detection and deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// Matches the digest the server reports for blobs.
    #[default]
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    /// Parse an algorithm name as servers report it (`MD5`, `SHA-256`, `sha256`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace('-', "").as_str() {
            "md5" => Some(DigestAlgorithm::Md5),
            "sha256" => Some(DigestAlgorithm::Sha256),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha256 => "sha256",
        }
    }

    /// Hash a file's content, streaming it in `FILE_BUFFER_SIZE` chunks.
    pub fn digest_file(self, path: &Path) -> io::Result<String> {
        let mut file = File::open(path)?;
        let mut buffer = [0u8; FILE_BUFFER_SIZE];
        match self {
            DigestAlgorithm::Md5 => {
                let mut context = md5::Context::new();
                loop {
                    let read = file.read(&mut buffer)?;
                    if read == 0 {
                        break;
                    }
                    context.consume(&buffer[..read]);
                }
                Ok(format!("{:x}", context.compute()))
            }
            DigestAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                loop {
                    let read = file.read(&mut buffer)?;
                    if read == 0 {
                        break;
                    }
                    hasher.update(&buffer[..read]);
                }
                Ok(hex::encode(hasher.finalize()))
            }
        }
    }

    /// Hash an in-memory buffer.
    pub fn digest_bytes(self, content: &[u8]) -> String {
        match self {
            DigestAlgorithm::Md5 => format!("{:x}", md5::compute(content)),
            DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(content)),
        }
    }

    /// Hash a file on the blocking pool so the caller's runtime thread stays free.
    pub async fn digest_file_async(self, path: PathBuf) -> io::Result<String> {
        tokio::task::spawn_blocking(move || self.digest_file(&path))
            .await
            .map_err(io::Error::other)?
    }
}

/// Replace characters that are invalid in a filename on some platform.
///
/// The result is in Unicode NFC, the form event paths are normalized to.
pub fn safe_filename(name: &str) -> String {
    name.nfc()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '-' } else { c })
        .collect()
}

/// Name used while a download for `name` is in flight.
pub fn download_tmp_name(name: &str) -> String {
    format!("{}{}{}", DOWNLOAD_TMP_FILE_PREFIX, name, DOWNLOAD_TMP_FILE_SUFFIX)
}

/// Whether a filename is a transient file that must never be uploaded.
pub fn is_temp_file(name: &str) -> bool {
    if name.starts_with(DOWNLOAD_TMP_FILE_PREFIX) && name.ends_with(DOWNLOAD_TMP_FILE_SUFFIX) {
        return true;
    }
    TEMP_PREFIXES.iter().any(|p| name.starts_with(p))
        || TEMP_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Map a path reported by the OS back onto the configured staging root.
///
/// Watch backends report canonical paths (`/private/var/...` on macOS,
/// `\\?\C:\...` on Windows) and macOS reports names decomposed (NFD); tags
/// are keyed by NFC paths under the configured root.
pub fn normalize_event_path(path: &Path, root: &Path, canonical_root: &Path) -> PathBuf {
    let path = nfc_path(&strip_verbatim_prefix(path));
    if let Ok(relative) = path.strip_prefix(canonical_root) {
        return root.join(relative);
    }
    if let Ok(relative) = path.strip_prefix(strip_verbatim_prefix(canonical_root)) {
        return root.join(relative);
    }
    path
}

/// Recompose a path to NFC. Non UTF-8 paths are returned unchanged.
fn nfc_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(raw) => PathBuf::from(raw.nfc().collect::<String>()),
        None => path.to_path_buf(),
    }
}

fn strip_verbatim_prefix(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match raw.strip_prefix(r"\\?\") {
        Some(rest) => PathBuf::from(rest),
        None => path.to_path_buf(),
    }
}

/// Basename of a path as UTF-8, if it has one.
pub fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_safe_filename_replaces_reserved_characters() {
        assert_eq!(safe_filename("a/b\\c*d:e|f\"g<h>i?j"), "a-b-c-d-e-f-g-h-i-j");
        assert_eq!(safe_filename("report 2024.odt"), "report 2024.odt");
    }

    #[test]
    fn test_download_tmp_name_is_temp() {
        let tmp = download_tmp_name("test.odt");
        assert_eq!(tmp, ".test.odt.nxpart");
        assert!(is_temp_file(&tmp));
        assert!(!is_temp_file("test.odt"));
    }

    #[test]
    fn test_editor_scratch_files_are_temp() {
        assert!(is_temp_file("~$report.docx"));
        assert!(is_temp_file(".~lock.report.odt#"));
        assert!(is_temp_file("notes.txt~"));
        assert!(is_temp_file(".notes.txt.swp"));
        assert!(is_temp_file("archive.part"));
        assert!(!is_temp_file(".profile"));
    }

    #[test]
    fn test_md5_digest_matches_known_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"hello world").unwrap();

        let digest = DigestAlgorithm::Md5.digest_file(&path).unwrap();
        assert_eq!(digest, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(digest, DigestAlgorithm::Md5.digest_bytes(b"hello world"));
    }

    #[test]
    fn test_sha256_digest_streams_large_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        let content = vec![7u8; FILE_BUFFER_SIZE * 3 + 17];
        std::fs::write(&path, &content).unwrap();

        let digest = DigestAlgorithm::Sha256.digest_file(&path).unwrap();
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, DigestAlgorithm::Sha256.digest_bytes(&content));
    }

    #[test]
    fn test_normalize_event_path_rebases_canonical_root() {
        let root = Path::new("/var/folders/x/staging");
        let canonical = Path::new("/private/var/folders/x/staging");
        let reported = Path::new("/private/var/folders/x/staging/doc-1/a.txt");

        assert_eq!(
            normalize_event_path(reported, root, canonical),
            root.join("doc-1/a.txt")
        );
        // Paths already under the configured root pass through
        let direct = root.join("doc-1/a.txt");
        assert_eq!(normalize_event_path(&direct, root, canonical), direct);
    }

    #[test]
    fn test_normalize_event_path_recomposes_nfd_names() {
        let root = Path::new("/staging");
        let reported = Path::new("/staging/doc-1/cafe\u{301}.odt");

        assert_eq!(
            normalize_event_path(reported, root, root),
            PathBuf::from("/staging/doc-1/caf\u{e9}.odt")
        );
        assert_eq!(safe_filename("cafe\u{301}.odt"), "caf\u{e9}.odt");
    }

    #[test]
    fn test_digest_algorithm_from_server_names() {
        assert_eq!(DigestAlgorithm::from_name("MD5"), Some(DigestAlgorithm::Md5));
        assert_eq!(DigestAlgorithm::from_name("SHA-256"), Some(DigestAlgorithm::Sha256));
        assert_eq!(DigestAlgorithm::from_name("sha256"), Some(DigestAlgorithm::Sha256));
        assert_eq!(DigestAlgorithm::from_name("crc32"), None);
        assert_eq!(
            DigestAlgorithm::from_name(DigestAlgorithm::Sha256.as_str()),
            Some(DigestAlgorithm::Sha256)
        );
    }

    #[test]
    fn test_digest_algorithm_serde() {
        let algo: DigestAlgorithm = serde_json::from_str("\"sha256\"").unwrap();
        assert_eq!(algo, DigestAlgorithm::Sha256);
        assert_eq!(serde_json::to_string(&DigestAlgorithm::Md5).unwrap(), "\"md5\"");
    }
}
