//! Error taxonomy for the edit loop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EditError {
    /// No bound engine matches the server URL (and user, when given).
    #[error("No engine bound for {server_url} (user: {user:?})")]
    Lookup {
        server_url: String,
        user: Option<String>,
    },

    /// A download or upload call failed.
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// A document id that cannot name a single staging directory.
    #[error("Invalid document id: {0:?}")]
    InvalidDocId(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tag store error: {0}")]
    Tag(String),

    /// Start or stop of the OS-level watch failed.
    #[error("Watch error: {0}")]
    Watch(String),

    /// The worker was asked to stop. Never swallowed by the run loop.
    #[error("Worker cancelled")]
    Cancelled,
}

impl EditError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EditError::Cancelled)
    }
}

impl From<notify::Error> for EditError {
    fn from(e: notify::Error) -> Self {
        EditError::Watch(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EditError>;
