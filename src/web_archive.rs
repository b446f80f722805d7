//! Frozen copies of web pages.
//!
//! A page is archived as its main HTML resource plus every image, script,
//! and stylesheet it references, fetched concurrently. The archive is
//! serialized as MessagePack under [`uti::WEB_ARCHIVE`]. URLs that do not
//! point at HTML are stored as the raw response body instead, typed from
//! the response MIME type.

use futures::future::join_all;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{IngestError, IngestResult};
use crate::uti;
use crate::web::{decode_body, WebClient};

const SUBRESOURCE_SELECTORS: &[(&str, &str)] = &[
    ("img[src]", "src"),
    ("script[src]", "src"),
    (r#"link[rel="stylesheet"][href]"#, "href"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebResource {
    pub url: String,
    pub mime_type: String,
    #[serde(default)]
    pub text_encoding: Option<String>,
    /// Frame the resource belongs to; empty for the top-level document.
    #[serde(default)]
    pub frame_name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebArchive {
    pub main_resource: WebResource,
    #[serde(default)]
    pub subresources: Vec<WebResource>,
}

impl WebArchive {
    pub fn encode(&self) -> IngestResult<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|e| IngestError::decode("web archive", e))
    }

    pub fn decode(bytes: &[u8]) -> IngestResult<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| IngestError::decode("web archive", e))
    }
}

/// Absolute URLs of the images, scripts, and stylesheets a page references.
///
/// Only absolute (`http...`), scheme-relative (`//...`), and host-relative
/// (`/...`) references are followed. Document-relative ones are skipped.
pub fn subresource_urls(html: &str, page: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut urls = Vec::new();
    for (css, attr) in SUBRESOURCE_SELECTORS {
        let Ok(sel) = Selector::parse(css) else {
            continue;
        };
        for node in document.select(&sel) {
            let Some(path) = node.value().attr(attr) else {
                continue;
            };
            let resolved = if path.starts_with("http") {
                path.to_string()
            } else if path.starts_with("//") {
                format!("https:{}", path)
            } else if path.starts_with('/') {
                match page.host_str() {
                    Some(host) => format!("{}://{}{}", page.scheme(), host, path),
                    None => continue,
                }
            } else {
                continue;
            };
            if !urls.contains(&resolved) {
                urls.push(resolved);
            }
        }
    }
    urls
}

#[derive(Debug, Clone)]
pub struct WebArchiver {
    client: WebClient,
}

impl WebArchiver {
    pub fn new(client: WebClient) -> Self {
        Self { client }
    }

    /// Fetch `url` and produce the bytes and type identifier to store.
    pub async fn archive_from_url(&self, url: &Url) -> IngestResult<(Vec<u8>, String)> {
        let page = self.client.get(url).await?;
        if page.status != 200 {
            return Err(IngestError::WebArchive {
                url: url.to_string(),
                message: format!("status {}", page.status),
            });
        }
        if page.body.is_empty() {
            return Err(IngestError::BlankResponse(url.to_string()));
        }

        let mime = page.mime_type.clone();
        if mime.as_deref() != Some("text/html") {
            let type_identifier = mime
                .as_deref()
                .and_then(uti::from_mime)
                .unwrap_or(uti::DATA)
                .to_string();
            tracing::debug!(%url, %type_identifier, "archived non-HTML response");
            return Ok((page.body, type_identifier));
        }

        let paths = subresource_urls(&decode_body(&page.body), url);
        tracing::debug!(%url, subresources = paths.len(), "archiving page");
        let subresources = self.fetch_subresources(paths).await;

        let archive = WebArchive {
            main_resource: WebResource {
                url: url.to_string(),
                mime_type: mime.unwrap_or_else(|| "text/html".to_string()),
                text_encoding: page.text_encoding,
                frame_name: String::new(),
                data: page.body,
            },
            subresources,
        };
        Ok((archive.encode()?, uti::WEB_ARCHIVE.to_string()))
    }

    async fn fetch_subresources(&self, paths: Vec<String>) -> Vec<WebResource> {
        let fetches = paths.into_iter().filter_map(|path| Url::parse(&path).ok()).map(
            |resource_url| async move {
                match self.client.get(&resource_url).await {
                    Ok(fetched) if fetched.status == 200 && !fetched.body.is_empty() => {
                        Some(WebResource {
                            url: resource_url.to_string(),
                            mime_type: fetched
                                .mime_type
                                .unwrap_or_else(|| "application/octet-stream".to_string()),
                            text_encoding: fetched.text_encoding,
                            frame_name: String::new(),
                            data: fetched.body,
                        })
                    }
                    Ok(fetched) => {
                        tracing::debug!(url = %resource_url, status = fetched.status, "subresource skipped");
                        None
                    }
                    Err(e) => {
                        tracing::debug!(url = %resource_url, error = %e, "subresource failed");
                        None
                    }
                }
            },
        );
        join_all(fetches).await.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn subresources_follow_absolute_and_host_relative_paths() {
        let page = Url::parse("http://example.com/blog/post").unwrap();
        let html = r#"<html><head>
            <link rel="stylesheet" href="/site.css">
            <link rel="icon" href="/ignored.ico">
            <script src="//cdn.example.net/app.js"></script>
        </head><body>
            <img src="https://images.example.com/a.png">
            <img src="relative.png">
            <img src="/a/b.jpg">
            <img src="/a/b.jpg">
        </body></html>"#;
        assert_eq!(
            subresource_urls(html, &page),
            vec![
                "https://images.example.com/a.png".to_string(),
                "http://example.com/a/b.jpg".to_string(),
                "https://cdn.example.net/app.js".to_string(),
                "http://example.com/site.css".to_string(),
            ]
        );
    }

    #[test]
    fn archive_survives_encoding() {
        let archive = WebArchive {
            main_resource: WebResource {
                url: "https://example.com/".into(),
                mime_type: "text/html".into(),
                text_encoding: Some("utf-8".into()),
                frame_name: String::new(),
                data: b"<html></html>".to_vec(),
            },
            subresources: vec![],
        };
        let bytes = archive.encode().unwrap();
        assert_eq!(WebArchive::decode(&bytes).unwrap(), archive);
    }
}
