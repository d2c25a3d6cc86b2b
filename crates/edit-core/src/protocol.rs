//! Parsing of `nxdrive://edit/...` protocol URLs into edit requests.
//!
//! Two forms are accepted:
//!
//! ```text
//! nxdrive://edit/<scheme>/<server>/user/<user>/repo/<repo>/nxdocid/<doc_id>/filename/<name>[/downloadUrl/<url>]
//! nxdrive://edit/<scheme>/<server>/nxdocid/<doc_id>
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static DOWNLOAD_EDIT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^nxdrive://edit/(?P<scheme>\w+)/(?P<server>.+?)/user/(?P<user>[^/]+)/repo/(?P<repo>[^/]+)/nxdocid/(?P<doc_id>[\w-]+)/filename/(?P<filename>[^/]+)(?:/downloadUrl/(?P<download_url>.+))?$",
    )
    .expect("download edit pattern is valid")
});

static EDIT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^nxdrive://edit/(?P<scheme>\w+)/(?P<server>.+?)/nxdocid/(?P<doc_id>[\w-]+)/?$")
        .expect("edit pattern is valid")
});

/// A request to stage and open one remote document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRequest {
    pub server_url: String,
    pub doc_id: String,
    pub user: Option<String>,
    pub repository: Option<String>,
    /// Filename announced by the caller (informational, the server's wins)
    pub filename: Option<String>,
    /// Download path relative to `server_url`
    pub download_url: Option<String>,
}

impl EditRequest {
    pub fn new(server_url: impl Into<String>, doc_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            doc_id: doc_id.into(),
            user: None,
            repository: None,
            filename: None,
            download_url: None,
        }
    }
}

fn decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// Parse a protocol URL. Returns `None` for anything that is not an edit URL.
pub fn parse_protocol_url(url: &str) -> Option<EditRequest> {
    let url = url.trim();
    if let Some(caps) = DOWNLOAD_EDIT_PATTERN.captures(url) {
        let server_url = format!("{}://{}", &caps["scheme"], &caps["server"]);
        return Some(EditRequest {
            server_url,
            doc_id: caps["doc_id"].to_string(),
            user: Some(decode(&caps["user"])),
            repository: Some(caps["repo"].to_string()),
            filename: Some(decode(&caps["filename"])),
            download_url: caps.name("download_url").map(|m| m.as_str().to_string()),
        });
    }
    if let Some(caps) = EDIT_PATTERN.captures(url) {
        let server_url = format!("{}://{}", &caps["scheme"], &caps["server"]);
        return Some(EditRequest::new(server_url, &caps["doc_id"]));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_download_edit_url() {
        let url = "nxdrive://edit/http/localhost:8080/nuxeo/user/Administrator/repo/default/nxdocid/9f4b2a1c-1111-2222-3333-444455556666/filename/My%20Report.odt/downloadUrl/nxfile/default/9f4b2a1c-1111-2222-3333-444455556666/file:content/My%20Report.odt";
        let request = parse_protocol_url(url).unwrap();

        assert_eq!(request.server_url, "http://localhost:8080/nuxeo");
        assert_eq!(request.doc_id, "9f4b2a1c-1111-2222-3333-444455556666");
        assert_eq!(request.user.as_deref(), Some("Administrator"));
        assert_eq!(request.repository.as_deref(), Some("default"));
        assert_eq!(request.filename.as_deref(), Some("My Report.odt"));
        assert_eq!(
            request.download_url.as_deref(),
            Some("nxfile/default/9f4b2a1c-1111-2222-3333-444455556666/file:content/My%20Report.odt")
        );
    }

    #[test]
    fn test_parse_download_edit_url_without_download_url() {
        let url = "nxdrive://edit/https/nuxeo.example/user/alice/repo/default/nxdocid/doc-42/filename/test.odt";
        let request = parse_protocol_url(url).unwrap();

        assert_eq!(request.server_url, "https://nuxeo.example");
        assert_eq!(request.doc_id, "doc-42");
        assert_eq!(request.download_url, None);
    }

    #[test]
    fn test_parse_short_edit_url() {
        let request = parse_protocol_url("nxdrive://edit/https/nuxeo.example/nxdocid/doc-42").unwrap();

        assert_eq!(request, EditRequest::new("https://nuxeo.example", "doc-42"));
    }

    #[test]
    fn test_rejects_doc_ids_that_are_not_plain_names() {
        assert!(parse_protocol_url("nxdrive://edit/https/nuxeo.example/nxdocid/..").is_none());
        assert!(parse_protocol_url("nxdrive://edit/https/nuxeo.example/nxdocid/.").is_none());
        let url = "nxdrive://edit/https/nuxeo.example/user/alice/repo/default/nxdocid/../filename/test.odt";
        assert!(parse_protocol_url(url).is_none());
    }

    #[test]
    fn test_rejects_other_urls() {
        assert!(parse_protocol_url("https://nuxeo.example/nxdocid/doc-42").is_none());
        assert!(parse_protocol_url("nxdrive://token/abc/user/bob").is_none());
        assert!(parse_protocol_url("").is_none());
    }
}
