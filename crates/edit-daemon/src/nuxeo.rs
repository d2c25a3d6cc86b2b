//! Nuxeo REST client implementing `RemoteDocClient`.
//!
//! Downloads are streamed to disk chunk by chunk; uploads go through the
//! batch upload API and are then attached to the document's `file:content`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use edit_core::{DigestAlgorithm, DocInfo, EditError, RemoteDocClient, Result};

/// Sent as `X-Application-Name` on every request.
pub const APPLICATION_NAME: &str = "Nuxeo Edit";

/// How requests authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Device token, sent as `X-Authentication-Token`
    Token(String),
    /// HTTP basic authentication
    Password(String),
}

/// Client for one server account.
pub struct NuxeoClient {
    http: Client,
    server_url: String,
    user: String,
    credentials: Credentials,
}

#[derive(Debug, Deserialize)]
struct DocumentEntity {
    uid: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    properties: DocumentProperties,
}

#[derive(Debug, Default, Deserialize)]
struct DocumentProperties {
    #[serde(rename = "file:content")]
    content: Option<BlobProperty>,
}

#[derive(Debug, Deserialize)]
struct BlobProperty {
    name: Option<String>,
    digest: Option<String>,
    #[serde(rename = "digestAlgorithm")]
    digest_algorithm: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchInfo {
    batch_id: String,
}

fn transfer_error(e: reqwest::Error) -> EditError {
    EditError::Transfer(e.to_string())
}

/// Map a non-success status to an error. 404 means the document is gone.
fn status_error(status: StatusCode, what: &str) -> Option<EditError> {
    if status.is_success() {
        None
    } else if status == StatusCode::NOT_FOUND {
        Some(EditError::NotFound(what.to_string()))
    } else {
        Some(EditError::Transfer(format!("{} failed with HTTP {}", what, status)))
    }
}

fn check(response: Response, what: &str) -> Result<Response> {
    match status_error(response.status(), what) {
        Some(e) => Err(e),
        None => Ok(response),
    }
}

/// Extract the staging metadata from a document entity.
///
/// Documents without a main blob fall back to their title and an empty digest.
/// A digest in an algorithm we cannot compute is dropped, so it never matches.
fn parse_doc_info(body: &str) -> Result<DocInfo> {
    let entity: DocumentEntity = serde_json::from_str(body)
        .map_err(|e| EditError::Transfer(format!("invalid document entity: {}", e)))?;
    let blob = entity.properties.content;
    let name = blob
        .as_ref()
        .and_then(|b| b.name.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or(entity.title);
    let (mut digest, algorithm) = match blob {
        Some(b) => (b.digest.unwrap_or_default(), b.digest_algorithm),
        None => (String::new(), None),
    };
    let digest_algorithm = match algorithm.as_deref() {
        None => DigestAlgorithm::default(),
        Some(reported) => DigestAlgorithm::from_name(reported).unwrap_or_else(|| {
            warn!("Unsupported digest algorithm {:?} for {}", reported, entity.uid);
            digest.clear();
            DigestAlgorithm::default()
        }),
    };

    Ok(DocInfo {
        name,
        digest,
        digest_algorithm,
        uid: entity.uid,
    })
}

impl NuxeoClient {
    pub fn new(
        server_url: &str,
        user: &str,
        credentials: Credentials,
        device_id: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("x-application-name", HeaderValue::from_static(APPLICATION_NAME));
        headers.insert("x-user-id", header_value(user)?);
        headers.insert("x-device-id", header_value(device_id)?);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(transfer_error)?;

        Ok(Self {
            http,
            server_url: server_url.trim_end_matches('/').to_string(),
            user: user.to_string(),
            credentials,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.server_url, path)
    }

    fn blob_url(&self, uid: &str) -> String {
        format!("{}/nxfile/default/{}/blobholder:0", self.server_url, uid)
    }

    fn authenticated(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::Token(token) => request.header("X-Authentication-Token", token),
            Credentials::Password(password) => request.basic_auth(&self.user, Some(password)),
        }
    }

    /// Stream the body of a GET into `file_out`.
    async fn download(&self, url: &str, file_out: &Path) -> Result<()> {
        debug!("Downloading {} to {:?}", url, file_out);
        let response = self
            .authenticated(self.http.get(url))
            .send()
            .await
            .map_err(transfer_error)?;
        let response = check(response, url)?;

        let mut stream = response.bytes_stream();
        let mut file = File::create(file_out).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(transfer_error)?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn new_batch(&self) -> Result<String> {
        let response = self
            .authenticated(self.http.post(self.api_url("upload")))
            .send()
            .await
            .map_err(transfer_error)?;
        let batch: BatchInfo = check(response, "batch creation")?
            .json()
            .await
            .map_err(transfer_error)?;
        Ok(batch.batch_id)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| EditError::Transfer(format!("invalid header value {:?}: {}", value, e)))
}

#[async_trait]
impl RemoteDocClient for NuxeoClient {
    async fn get_info(&self, doc_id: &str) -> Result<DocInfo> {
        let url = self.api_url(&format!("id/{}", doc_id));
        let response = self
            .authenticated(self.http.get(&url))
            .header("X-NXproperties", "*")
            .send()
            .await
            .map_err(transfer_error)?;
        let body = check(response, doc_id)?
            .text()
            .await
            .map_err(transfer_error)?;
        parse_doc_info(&body)
    }

    async fn get_blob(&self, uid: &str, file_out: &Path) -> Result<()> {
        self.download(&self.blob_url(uid), file_out).await
    }

    async fn do_get(&self, url: &str, file_out: &Path) -> Result<()> {
        self.download(url, file_out).await
    }

    async fn stream_update(&self, uid: &str, path: &Path) -> Result<()> {
        let name = edit_core::local::file_name(path).unwrap_or_default().to_string();
        let size = tokio::fs::metadata(path).await?.len();
        let batch_id = self.new_batch().await?;
        debug!("Uploading {:?} ({} bytes) in batch {}", path, size, batch_id);

        let file = File::open(path).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .authenticated(
                self.http
                    .post(self.api_url(&format!("upload/{}/0", batch_id))),
            )
            .header("X-File-Name", urlencoding::encode(&name).into_owned())
            .header("X-File-Size", size.to_string())
            .header("X-File-Type", "application/octet-stream")
            .header("Content-Type", "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(transfer_error)?;
        check(response, "blob upload")?;

        let update = json!({
            "entity-type": "document",
            "properties": {
                "file:content": {
                    "upload-batch": batch_id,
                    "upload-fileId": "0",
                }
            }
        });
        let response = self
            .authenticated(self.http.put(self.api_url(&format!("id/{}", uid))))
            .json(&update)
            .send()
            .await
            .map_err(transfer_error)?;
        check(response, uid)?;
        Ok(())
    }
}
