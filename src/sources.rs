//! Concrete content sources and source-level preprocessing.
//!
//! - [`MemorySource`]: bytes already in memory, one blob per type identifier.
//! - [`FileSource`]: a file on disk, offered as its contents and as a file URL.
//! - [`LinkSource`]: a synthetic source serving one detected URL.
//!
//! [`sanitize_identifiers`] and [`extract_link`] run before components are
//! created.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

use crate::archive::{self, ArchivedObject};
use crate::traits::ContentSource;
use crate::uti;

/// Suffixes of internal transfer formats that are never archived.
const BLOCKED_SUFFIXES: &[&str] = &[
    ".useractivity",
    ".internalMessageTransfer",
    ".internalEMMessageListItemTransfer",
    "itemprovider",
    ".rtfd",
    ".persisted",
];

/// Representations dropped in favour of a mail message.
const SUPERSEDED_BY_MAIL: &[&str] = &[
    uti::UTF8_PLAIN_TEXT,
    uti::FLAT_RTFD,
    uti::ATTRIBUTED_STRING,
];

/// Drop unusable identifiers, keeping first-seen order.
///
/// Removes dynamic (`dyn.`) identifiers, identifiers containing spaces,
/// duplicates, and blocked internal formats. When a mail message is present
/// its competing text representations go too.
pub fn sanitize_identifiers(identifiers: &[String]) -> Vec<String> {
    let mut kept: Vec<String> = Vec::with_capacity(identifiers.len());
    for id in identifiers {
        if id.is_empty() || id.starts_with("dyn.") || id.contains(' ') {
            continue;
        }
        if BLOCKED_SUFFIXES.iter().any(|suffix| id.ends_with(suffix)) {
            continue;
        }
        if !kept.contains(id) {
            kept.push(id.clone());
        }
    }
    if kept.iter().any(|id| id == uti::MAIL_EMAIL) {
        kept.retain(|id| !SUPERSEDED_BY_MAIL.contains(&id.as_str()));
    }
    kept
}

/// A bare http(s) URL held by a text payload, if that is all it holds.
pub fn extract_link(bytes: &[u8], max_bytes: usize) -> Option<String> {
    if bytes.len() >= max_bytes {
        return None;
    }
    let text = match archive::unarchive(bytes) {
        Some(ArchivedObject::String(s)) | Some(ArchivedObject::Url(s)) => s,
        Some(ArchivedObject::AttributedText { text, .. }) => text,
        Some(_) => return None,
        None => std::str::from_utf8(bytes).ok()?.to_string(),
    };
    let text = text.trim();
    if !(text.starts_with("http://") || text.starts_with("https://")) {
        return None;
    }
    if text.chars().any(char::is_whitespace) {
        return None;
    }
    let parsed = url::Url::parse(text).ok()?;
    parsed.host_str()?;
    Some(text.to_string())
}

/// Swap the text representations of a source for a single `public.url`
/// entry served by `link`, at the position of the first text entry. Other
/// representations keep their own source.
pub fn replace_text_with_link<S: Clone>(entries: Vec<(String, S)>, link: S) -> Vec<(String, S)> {
    let mut replaced = Vec::with_capacity(entries.len());
    let mut link = Some(link);
    for (type_identifier, source) in entries {
        if !uti::conforms_to(&type_identifier, uti::TEXT) {
            replaced.push((type_identifier, source));
        } else if let Some(link) = link.take() {
            replaced.push((uti::URL.to_string(), link));
        }
    }
    replaced
}

// ═══════════════════════════════════════════════════════════════════════
// Memory Source
// ═══════════════════════════════════════════════════════════════════════

/// In-memory source serving fixed bytes per type identifier.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    entries: Vec<(String, Vec<u8>)>,
    suggested_name: Option<String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-representation source.
    pub fn single(type_identifier: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new().with(type_identifier, bytes)
    }

    pub fn with(mut self, type_identifier: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.entries.push((type_identifier.into(), bytes.into()));
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.suggested_name = Some(name.into());
        self
    }
}

#[async_trait]
impl ContentSource for MemorySource {
    fn type_identifiers(&self) -> Vec<String> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }

    fn suggested_name(&self) -> Option<String> {
        self.suggested_name.clone()
    }

    async fn fetch(&self, type_identifier: &str) -> Result<Vec<u8>> {
        self.entries
            .iter()
            .find(|(id, _)| id == type_identifier)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| anyhow!("no representation for {}", type_identifier))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// File Source
// ═══════════════════════════════════════════════════════════════════════

/// A local file, offered as its contents and as a `public.file-url`.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn content_type(&self) -> &'static str {
        if self.path.is_dir() {
            return uti::FOLDER;
        }
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(uti::from_extension)
            .unwrap_or(uti::DATA)
    }

    fn file_url(&self) -> Result<String> {
        let absolute = std::path::absolute(&self.path)
            .with_context(|| format!("Failed to resolve {}", self.path.display()))?;
        url::Url::from_file_path(&absolute)
            .map(|u| u.to_string())
            .map_err(|_| anyhow!("not a file path: {}", absolute.display()))
    }
}

#[async_trait]
impl ContentSource for FileSource {
    fn type_identifiers(&self) -> Vec<String> {
        if self.path.is_dir() {
            vec![uti::FILE_URL.to_string()]
        } else {
            vec![self.content_type().to_string(), uti::FILE_URL.to_string()]
        }
    }

    fn suggested_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    async fn fetch(&self, type_identifier: &str) -> Result<Vec<u8>> {
        if type_identifier == uti::FILE_URL {
            return Ok(self.file_url()?.into_bytes());
        }
        if type_identifier != self.content_type() {
            anyhow::bail!("{} is not offered by {}", type_identifier, self.path.display());
        }
        tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Link Source
// ═══════════════════════════════════════════════════════════════════════

/// Serves one URL under `public.url`. Substituted for a text source whose
/// only content is a link.
#[derive(Debug, Clone)]
pub struct LinkSource {
    url: String,
    suggested_name: Option<String>,
}

impl LinkSource {
    pub fn new(url: impl Into<String>, suggested_name: Option<String>) -> Self {
        Self {
            url: url.into(),
            suggested_name,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ContentSource for LinkSource {
    fn type_identifiers(&self) -> Vec<String> {
        vec![uti::URL.to_string()]
    }

    fn suggested_name(&self) -> Option<String> {
        self.suggested_name.clone()
    }

    async fn fetch(&self, type_identifier: &str) -> Result<Vec<u8>> {
        if type_identifier != uti::URL {
            anyhow::bail!("link source only serves {}", uti::URL);
        }
        Ok(self.url.clone().into_bytes())
    }
}
