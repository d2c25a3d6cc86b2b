//! edit-core: the "edit locally" loop for remotely stored documents.
//!
//! This crate provides the core functionality for:
//! - Staging a remote document in a scratch tree and opening it externally
//! - Tagging staged files with their remote identity
//! - Watching the staging tree and filtering raw events into edit intents
//! - Draining the upload queue and pushing changed content back
//! - Collaborator trait abstractions (engine registry, remote client, launcher)

pub mod dedup;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod local;
pub mod protocol;
pub mod queue;
pub mod remote;
pub mod staging;
pub mod tags;
pub mod testing;
pub mod watcher;
pub mod worker;

pub use dedup::DigestScanIndex;
pub use error::{EditError, Result};
pub use fetcher::{ContentFetcher, EditOutcome};
pub use filter::{EventFilter, RawEvent, RawEventKind};
pub use local::DigestAlgorithm;
pub use protocol::{parse_protocol_url, EditRequest};
pub use queue::{upload_queue, UploadQueue, UploadSender};
pub use remote::{
    DocInfo, DuplicateIndex, EngineHandle, EngineRegistry, FileLauncher, NoDuplicates,
    RemoteDocClient, StaticRegistry,
};
pub use staging::{StagingDir, StagingEntry};
pub use tags::{InMemoryTags, SidecarTags, TagKey, TagStore};
pub use watcher::StagingWatcher;
pub use worker::{EditWorker, MetricsSnapshot, WorkerConfig, WorkerMetrics, WorkerState};
