//! Web preview fetching.
//!
//! A remote URL gets a best-effort preview in two phases:
//!
//! ```text
//! HEAD url ──▶ text/html? ──no──▶ no preview (body never downloaded)
//!                 │yes
//!                 ▼
//!            GET url ──▶ parse ──▶ title (og:title, then <title>)
//!                          │
//!                          ├──▶ og:image / meta thumbnail ──fetch──▶ image?
//!                          │                                   │ no
//!                          └──▶ best scored site icon ◀────────┘
//! ```
//!
//! Site icons are scored from `<link rel=...>` candidates: touch icons rank
//! 10, plain icons 1, and a declared `WxH` size replaces the rank with
//! `W × H` (× 100 for touch icons). The first candidate wins ties. With no
//! candidates, `/favicon.ico` on the page's host is used.
//!
//! HTML parsing is synchronous and finishes before any further request is
//! issued, since the parsed document cannot cross an await.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use scraper::{Html, Selector};
use url::Url;

use crate::config::WebConfig;
use crate::error::IngestResult;
use crate::thumbnail;

const FALLBACK_ICON_PATH: &str = "/favicon.ico";
const ICON_RELATIONS: &[&str] = &[
    "apple-touch-icon",
    "apple-touch-icon-precomposed",
    "icon",
    "shortcut icon",
];

/// A fetched HTTP response body with the parts of its headers we use.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub url: Url,
    pub status: u16,
    /// MIME essence, e.g. `text/html`.
    pub mime_type: Option<String>,
    /// `charset` parameter of the content type.
    pub text_encoding: Option<String>,
    pub body: Vec<u8>,
}

/// Image chosen to represent a page.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Came from a page thumbnail rather than a site icon.
    pub is_thumbnail: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebPreview {
    pub title: Option<String>,
    pub image: Option<PreviewImage>,
}

impl WebPreview {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.image.is_none()
    }
}

/// What the HTML of a page says about its preview.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub thumbnail_path: Option<String>,
    pub icon_path: String,
}

/// Split a `Content-Type` value into MIME essence and charset.
pub fn parse_content_type(value: &str) -> (Option<String>, Option<String>) {
    let mut parts = value.split(';');
    let mime = parts
        .next()
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty());
    let charset = parts.find_map(|p| {
        let (key, val) = p.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| val.trim().trim_matches('"').to_string())
    });
    (mime, charset)
}

/// Decode an HTML body as UTF-8, falling back to its ASCII bytes.
pub fn decode_body(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes
            .iter()
            .filter(|b| b.is_ascii())
            .map(|b| *b as char)
            .collect(),
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Pull title, thumbnail, and site icon out of a page.
pub fn parse_page(html: &str) -> PageMetadata {
    let document = Html::parse_document(html);

    let first_content = |css: &str| -> Option<String> {
        let sel = selector(css)?;
        document
            .select(&sel)
            .find_map(|node| node.value().attr("content"))
            .map(|c| c.trim().to_string())
    };

    let mut title = first_content(r#"meta[property="og:title"]"#).filter(|t| !t.is_empty());
    if title.is_none() {
        title = selector("title")
            .and_then(|sel| document.select(&sel).next())
            .map(|node| node.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());
    }

    let thumbnail_path = first_content(r#"meta[property="og:image"]"#)
        .or_else(|| first_content(r#"meta[name="thumbnail"], meta[name="image"]"#))
        .filter(|p| !p.is_empty());

    let candidates: Vec<(String, Option<String>, Option<String>)> = selector("link[rel]")
        .map(|sel| {
            document
                .select(&sel)
                .map(|node| {
                    let el = node.value();
                    (
                        el.attr("rel").unwrap_or_default().to_string(),
                        el.attr("sizes").map(str::to_string),
                        el.attr("href").map(str::to_string),
                    )
                })
                .collect()
        })
        .unwrap_or_default();
    let icon_path = select_site_icon(
        candidates
            .iter()
            .map(|(rel, sizes, href)| (rel.as_str(), sizes.as_deref(), href.as_deref())),
    );

    PageMetadata {
        title,
        thumbnail_path,
        icon_path,
    }
}

/// Rank of one icon candidate, or `None` if its relation is not an icon.
pub fn icon_rank(rel: &str, sizes: Option<&str>) -> Option<u64> {
    let rel = rel.trim().to_ascii_lowercase();
    if !ICON_RELATIONS.contains(&rel.as_str()) {
        return None;
    }
    let is_touch = rel.starts_with("apple-touch-icon");
    let mut rank = if is_touch { 10 } else { 1 };
    if let Some(first) = sizes.and_then(|s| s.split_whitespace().next()) {
        let dims: Vec<&str> = first.split(['x', 'X']).collect();
        if dims.len() > 1 {
            let w: u64 = dims[0].trim().parse().unwrap_or(1);
            let h: u64 = dims[1].trim().parse().unwrap_or(1);
            rank = w
                .saturating_mul(h)
                .saturating_mul(if is_touch { 100 } else { 1 });
        }
    }
    Some(rank)
}

/// Best icon href among `(rel, sizes, href)` candidates, in document order.
pub fn select_site_icon<'a>(
    candidates: impl IntoIterator<Item = (&'a str, Option<&'a str>, Option<&'a str>)>,
) -> String {
    let mut best_rank = 0;
    let mut best = FALLBACK_ICON_PATH.to_string();
    for (rel, sizes, href) in candidates {
        let (Some(rank), Some(href)) = (icon_rank(rel, sizes), href) else {
            continue;
        };
        if rank > best_rank {
            best_rank = rank;
            best = href.to_string();
        }
    }
    best
}

/// Resolve a path found in a page against the page URL.
///
/// Absolute URLs are kept. Anything else replaces the page's path (a missing
/// leading `/` is added), dropping the page's query and fragment.
pub fn repair_url(path: &str, base: &Url) -> Option<Url> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    if let Ok(absolute) = Url::parse(path) {
        if !absolute.cannot_be_a_base() || absolute.scheme() == "data" {
            return Some(absolute);
        }
    }
    if path.starts_with("//") {
        return base.join(path).ok();
    }
    let (path_part, query) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    };
    let mut repaired = base.clone();
    if path_part.starts_with('/') {
        repaired.set_path(path_part);
    } else {
        repaired.set_path(&format!("/{}", path_part));
    }
    repaired.set_query(query);
    repaired.set_fragment(None);
    Some(repaired)
}

// ═══════════════════════════════════════════════════════════════════════
// HTTP client
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct WebClient {
    client: reqwest::Client,
}

impl WebClient {
    pub fn new(config: &WebConfig) -> IngestResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        if let Ok(lang) = HeaderValue::from_str(&config.accept_language) {
            headers.insert(ACCEPT_LANGUAGE, lang);
        }
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .timeout(config.timeout())
            .build()?;
        Ok(Self { client })
    }

    /// Headers only. The body of a HEAD response is always empty.
    pub async fn head(&self, url: &Url) -> IngestResult<FetchedResource> {
        let response = self.client.head(url.clone()).send().await?;
        Ok(Self::resource(url, response, Vec::new()))
    }

    pub async fn get(&self, url: &Url) -> IngestResult<FetchedResource> {
        let response = self.client.get(url.clone()).send().await?;
        let (status, mime, encoding) = Self::meta(&response);
        let final_url = response.url().clone();
        let body = response.bytes().await?.to_vec();
        tracing::debug!(url = %url, status, bytes = body.len(), "fetched");
        Ok(FetchedResource {
            url: final_url,
            status,
            mime_type: mime,
            text_encoding: encoding,
            body,
        })
    }

    fn meta(response: &reqwest::Response) -> (u16, Option<String>, Option<String>) {
        let (mime, charset) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(parse_content_type)
            .unwrap_or((None, None));
        (response.status().as_u16(), mime, charset)
    }

    fn resource(url: &Url, response: reqwest::Response, body: Vec<u8>) -> FetchedResource {
        let (status, mime_type, text_encoding) = Self::meta(&response);
        FetchedResource {
            url: url.clone(),
            status,
            mime_type,
            text_encoding,
            body,
        }
    }

    /// Two-phase preview fetch. Non-HTML pages yield an empty preview
    /// without downloading the body.
    pub async fn fetch_preview(&self, url: &Url) -> IngestResult<WebPreview> {
        tracing::debug!(%url, "probing for HTML preview");
        let probe = self.head(url).await?;
        let is_html = probe
            .mime_type
            .as_deref()
            .is_some_and(|m| m.starts_with("text/html"));
        if !is_html {
            tracing::debug!(%url, mime = ?probe.mime_type, "not HTML, no preview");
            return Ok(WebPreview::default());
        }

        let page = self.get(url).await?;
        let metadata = parse_page(&decode_body(&page.body));
        match &metadata.title {
            Some(title) => tracing::debug!(%url, %title, "title located"),
            None => tracing::debug!(%url, "no title located"),
        }

        if let Some(thumb_url) = metadata
            .thumbnail_path
            .as_deref()
            .and_then(|p| repair_url(p, url))
        {
            if let Some(image) = self.fetch_image(&thumb_url, true).await {
                return Ok(WebPreview {
                    title: metadata.title,
                    image: Some(image),
                });
            }
            tracing::debug!(%thumb_url, "thumbnail fetch failed, falling back to site icon");
        }

        let image = match repair_url(&metadata.icon_path, url) {
            Some(icon_url) => self.fetch_image(&icon_url, false).await,
            None => None,
        };
        Ok(WebPreview {
            title: metadata.title,
            image,
        })
    }

    /// Fetch an image and read its size. Failures are logged and yield `None`.
    async fn fetch_image(&self, url: &Url, is_thumbnail: bool) -> Option<PreviewImage> {
        let fetched = match self.get(url).await {
            Ok(fetched) if fetched.status == 200 => fetched,
            Ok(fetched) => {
                tracing::debug!(%url, status = fetched.status, "image request failed");
                return None;
            }
            Err(e) => {
                tracing::debug!(%url, error = %e, "image request failed");
                return None;
            }
        };
        let Some((width, height)) = thumbnail::image_dimensions(&fetched.body) else {
            tracing::debug!(%url, "image header unreadable");
            return None;
        };
        Some(PreviewImage {
            bytes: fetched.body,
            width,
            height,
            is_thumbnail,
        })
    }
}
