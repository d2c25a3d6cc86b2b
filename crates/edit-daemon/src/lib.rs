//! edit-daemon library: Nuxeo bindings for the edit loop.
//!
//! Thin layer over edit-core providing the REST client, the platform
//! launcher and configuration, exposed for integration tests.

pub mod config;
pub mod launcher;
pub mod nuxeo;

use edit_core::{parse_protocol_url, ContentFetcher, EditOutcome};
use tracing::{error, info, warn};

pub use config::{default_config_dir, Config, EngineConfig};
pub use launcher::{LogOnlyLauncher, SystemLauncher};
pub use nuxeo::{Credentials, NuxeoClient};

/// Stage and open the document named by a protocol URL.
///
/// Returns the outcome, or `None` when the URL was not usable. Failures are
/// logged, never propagated: one bad request must not stop the daemon.
pub async fn open_protocol_url(fetcher: &ContentFetcher, url: &str) -> Option<EditOutcome> {
    let Some(request) = parse_protocol_url(url) else {
        warn!("Ignoring unsupported URL: {}", url);
        return None;
    };
    match fetcher.edit_request(&request).await {
        Ok(EditOutcome::NoEngine) => {
            warn!(
                "No account bound to {} (user {:?}), cannot edit {}",
                request.server_url, request.user, request.doc_id
            );
            Some(EditOutcome::NoEngine)
        }
        Ok(outcome) => {
            info!("Opened {} for editing", request.doc_id);
            Some(outcome)
        }
        Err(e) => {
            error!("Failed to edit {} from {}: {}", request.doc_id, request.server_url, e);
            None
        }
    }
}
