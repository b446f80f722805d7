//! Content classification.
//!
//! Each component runs through a small state machine that always ends in
//! one of [`ComponentOutcome`]'s terminal states:
//!
//! ```text
//!   fetch ──▶ unwrap ──wrapped──▶ branch by payload kind ─┐
//!     │         │                                          │
//!     │         └──raw──▶ raw-data branch table ───────────┤
//!     │                    (first match wins)              ▼
//!     │                                               commit blob
//!     │                                             + thumbnail
//!     ├── cancelled at any await ──▶ Aborted (nothing persisted)
//!     └── error ──▶ paperclip icon + last_error ──▶ Failed
//! ```
//!
//! Titles and icons are assigned through [`ComponentRecord::set_title`] and
//! [`ComponentRecord::set_icon`], which only accept a strictly higher
//! priority. Every branch can therefore assign freely; the highest-confidence
//! assignment sticks.
//!
//! Classification works on a private copy of the component record and only
//! writes it back once the blob is committed, so a cancelled run leaves the
//! component exactly as it was.

use chrono::Utc;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::archive::{self, ArchivedObject};
use crate::error::{IngestError, IngestResult};
use crate::extract;
use crate::gate::IngestGate;
use crate::models::{
    outranks, BuiltinIcon, Component, ComponentRecord, DisplayMode, IconRef, RepresentedClass,
};
use crate::progress::{ComponentOutcome, ComponentProgress};
use crate::store::BlobStore;
use crate::thumbnail::{self, RenderedThumbnail};
use crate::traits::{ContentSource, FrameExtractor};
use crate::uti;
use crate::web::WebClient;
use crate::web_archive::WebArchiver;

/// Site icons taller or wider than this are letterboxed. Page thumbnails fill.
const PREVIEW_MAX_HEIGHT: u32 = 100;
const PREVIEW_MAX_WIDTH: u32 = 200;

/// Await `fut` unless `token` fires first.
///
/// The future is dropped on cancellation, so whatever it would have produced
/// is never seen.
pub async fn until_cancelled<F: Future>(
    token: &CancellationToken,
    fut: F,
) -> IngestResult<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(IngestError::Cancelled),
        out = fut => Ok(out),
    }
}

fn check_cancelled(token: &CancellationToken) -> IngestResult<()> {
    if token.is_cancelled() {
        Err(IngestError::Cancelled)
    } else {
        Ok(())
    }
}

/// URL held by a URL-typed payload: a wrapped URL, the first string in a
/// wrapped array that parses with a scheme, or raw UTF-8 text.
pub fn encoded_url(type_identifier: &str, bytes: &[u8]) -> Option<Url> {
    if !uti::conforms_to(type_identifier, uti::URL) {
        return None;
    }
    match archive::unarchive(bytes) {
        Some(ArchivedObject::Url(text)) => parse_with_scheme(&text),
        Some(ArchivedObject::Array(items)) => items.iter().find_map(|item| match item {
            ArchivedObject::String(text) => parse_with_scheme(text),
            _ => None,
        }),
        Some(_) => None,
        None => std::str::from_utf8(bytes).ok().and_then(parse_with_scheme),
    }
}

fn parse_with_scheme(text: &str) -> Option<Url> {
    Url::parse(text.trim())
        .ok()
        .filter(|url| !url.scheme().is_empty())
}

// ═══════════════════════════════════════════════════════════════════════
// Raw-data branch table
// ═══════════════════════════════════════════════════════════════════════

/// Branches tried for payloads that are not wrapped objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawBranch {
    Image,
    Contact,
    Utf8Text,
    Utf16Text,
    Email,
    MapItem,
    RichText,
    Url,
    Text,
    ImageType,
    Audiovisual,
    Audio,
    Pdf,
    Content,
    Archive,
    Other,
}

/// What the branch predicates look at.
#[derive(Debug, Clone, Copy)]
pub struct Probe<'a> {
    pub type_identifier: &'a str,
    pub bytes: &'a [u8],
    pub resolve_urls: bool,
}

impl Probe<'_> {
    fn conforms_to(&self, parent: &str) -> bool {
        uti::conforms_to(self.type_identifier, parent)
    }
}

type Predicate = fn(&Probe<'_>) -> bool;

fn looks_like_image(p: &Probe<'_>) -> bool {
    thumbnail::has_image_signature(p.bytes)
}
fn is_contact(p: &Probe<'_>) -> bool {
    p.type_identifier == uti::VCARD
}
fn is_utf8_text(p: &Probe<'_>) -> bool {
    p.type_identifier == uti::UTF8_PLAIN_TEXT
}
fn is_utf16_text(p: &Probe<'_>) -> bool {
    p.type_identifier == uti::UTF16_PLAIN_TEXT
}
fn is_email(p: &Probe<'_>) -> bool {
    p.type_identifier == uti::EMAIL_MESSAGE
}
fn is_map_item(p: &Probe<'_>) -> bool {
    p.type_identifier == uti::MAP_ITEM
}
fn is_rich_text(p: &Probe<'_>) -> bool {
    [".rtf", ".rtfd", ".flat-rtfd"]
        .iter()
        .any(|suffix| p.type_identifier.ends_with(suffix))
}
fn carries_url(p: &Probe<'_>) -> bool {
    p.resolve_urls && encoded_url(p.type_identifier, p.bytes).is_some()
}
fn is_text(p: &Probe<'_>) -> bool {
    p.conforms_to(uti::TEXT)
}
fn is_image_type(p: &Probe<'_>) -> bool {
    p.conforms_to(uti::IMAGE)
}
fn is_audiovisual(p: &Probe<'_>) -> bool {
    p.conforms_to(uti::AUDIOVISUAL) && !p.conforms_to(uti::AUDIO)
}
fn is_audio(p: &Probe<'_>) -> bool {
    p.conforms_to(uti::AUDIO)
}
fn is_pdf(p: &Probe<'_>) -> bool {
    p.conforms_to(uti::PDF)
}
fn is_content(p: &Probe<'_>) -> bool {
    p.conforms_to(uti::CONTENT)
}
fn is_archive(p: &Probe<'_>) -> bool {
    p.conforms_to(uti::ARCHIVE)
}
fn always(_: &Probe<'_>) -> bool {
    true
}

static RAW_BRANCHES: &[(RawBranch, Predicate)] = &[
    (RawBranch::Image, looks_like_image),
    (RawBranch::Contact, is_contact),
    (RawBranch::Utf8Text, is_utf8_text),
    (RawBranch::Utf16Text, is_utf16_text),
    (RawBranch::Email, is_email),
    (RawBranch::MapItem, is_map_item),
    (RawBranch::RichText, is_rich_text),
    (RawBranch::Url, carries_url),
    (RawBranch::Text, is_text),
    (RawBranch::ImageType, is_image_type),
    (RawBranch::Audiovisual, is_audiovisual),
    (RawBranch::Audio, is_audio),
    (RawBranch::Pdf, is_pdf),
    (RawBranch::Content, is_content),
    (RawBranch::Archive, is_archive),
    (RawBranch::Other, always),
];

/// Every branch whose predicate accepts the probe, in evaluation order.
///
/// The first entry is the branch taken. Later entries are only reached when
/// a handler finds the bytes unusable (an image signature that does not
/// decode, a PDF without a preview).
pub fn matching_branches<'p>(probe: &'p Probe<'p>) -> impl Iterator<Item = RawBranch> + 'p {
    RAW_BRANCHES
        .iter()
        .filter(move |(_, matches)| matches(probe))
        .map(|(branch, _)| *branch)
}

/// Folder or generic data with a zip signature is really a zip archive.
pub fn relabel_zip(type_identifier: &str, bytes: &[u8]) -> Option<&'static str> {
    let generic = type_identifier == uti::FOLDER || type_identifier == uti::DATA;
    (generic && extract::is_zip(bytes)).then_some(uti::ZIP_ARCHIVE)
}

// ═══════════════════════════════════════════════════════════════════════
// Classifier
// ═══════════════════════════════════════════════════════════════════════

/// Where a component's bytes come from.
pub enum Payload<'a> {
    /// Fetch the component's type identifier from the source.
    Source(&'a dyn ContentSource),
    /// Fetch the source's URL and freeze the page behind it.
    WebArchive(&'a dyn ContentSource),
    /// Re-read the blob already in the store.
    Stored,
}

/// Classification in progress.
struct Work {
    record: ComponentRecord,
    bytes: Vec<u8>,
    thumbnail: Option<Vec<u8>>,
    encode_image: bool,
}

impl Work {
    fn icon(&mut self, icon: BuiltinIcon, priority: i32) {
        if self
            .record
            .set_builtin_icon(icon, priority, DisplayMode::Center)
        {
            self.thumbnail = None;
        }
    }

    /// Skip rendering work that could not win arbitration anyway.
    fn icon_would_win(&self, priority: i32) -> bool {
        outranks(priority, self.record.display_icon_priority)
    }

    fn thumbnail(&mut self, rendered: RenderedThumbnail, priority: i32, mode: DisplayMode) {
        let icon = IconRef::Thumbnail {
            width: rendered.width,
            height: rendered.height,
            template: false,
        };
        if self.record.set_icon(icon, priority, mode) {
            self.thumbnail = Some(rendered.png);
        }
    }

    fn mark_raw(&mut self, type_identifier: &str, bytes: Vec<u8>) {
        self.record.type_identifier = type_identifier.to_string();
        self.record.represented_class = RepresentedClass::Data;
        self.record.class_was_wrapped = false;
        self.bytes = bytes;
    }
}

enum Next {
    Done,
    Raw { resolve_urls: bool },
}

enum Applied {
    Handled,
    FallThrough,
    Reclassify,
}

#[derive(Clone)]
pub struct Classifier {
    store: BlobStore,
    gate: IngestGate,
    web: WebClient,
    archiver: WebArchiver,
    frame_extractor: Option<Arc<dyn FrameExtractor>>,
    read_local_files: bool,
}

impl Classifier {
    pub fn new(
        store: BlobStore,
        gate: IngestGate,
        web: WebClient,
        frame_extractor: Option<Arc<dyn FrameExtractor>>,
        read_local_files: bool,
    ) -> Self {
        Self {
            store,
            gate,
            archiver: WebArchiver::new(web.clone()),
            web,
            frame_extractor,
            read_local_files,
        }
    }

    /// Classify one component and report its completion exactly once.
    pub async fn run(
        &self,
        component: &Component,
        payload: Payload<'_>,
        encode_image: bool,
        mut progress: ComponentProgress,
    ) -> ComponentOutcome {
        let id = component.id();
        let outcome = match self
            .ingest(component, payload, encode_image, &mut progress)
            .await
        {
            Ok(()) => ComponentOutcome::Classified,
            Err(e) if e.is_cancelled() => {
                tracing::info!(component = %id, "ingest cancelled");
                ComponentOutcome::Aborted
            }
            Err(e) => {
                tracing::warn!(component = %id, error = %e, "ingest failed");
                component.update(|record| {
                    record.set_builtin_icon(BuiltinIcon::Paperclip, 0, DisplayMode::Center);
                    record.last_error = Some(e.to_string());
                });
                ComponentOutcome::Failed
            }
        };
        component.set_transferring(false);
        progress.finish(outcome);
        outcome
    }

    async fn ingest(
        &self,
        component: &Component,
        payload: Payload<'_>,
        encode_image: bool,
        progress: &mut ComponentProgress,
    ) -> IngestResult<()> {
        let token = component.cancellation_token();
        check_cancelled(&token)?;
        component.set_transferring(true);

        let mut record = component.snapshot();
        tracing::debug!(
            component = %record.id,
            type_identifier = %record.type_identifier,
            "ingesting"
        );

        let is_web_archive = matches!(payload, Payload::WebArchive(_));
        let bytes = match payload {
            Payload::Source(source) => {
                let fetched = until_cancelled(&token, source.fetch(&record.type_identifier)).await?;
                fetched.map_err(|e| IngestError::SourceFetch {
                    type_identifier: record.type_identifier.clone(),
                    message: format!("{:#}", e),
                })?
            }
            Payload::WebArchive(source) => {
                let link = until_cancelled(&token, source.fetch(uti::URL))
                    .await?
                    .map_err(|e| IngestError::SourceFetch {
                        type_identifier: uti::URL.to_string(),
                        message: format!("{:#}", e),
                    })?;
                match encoded_url(uti::URL, &link)
                    .filter(|url| matches!(url.scheme(), "http" | "https"))
                {
                    Some(url) => {
                        let (bytes, type_identifier) =
                            until_cancelled(&token, self.archiver.archive_from_url(&url))
                                .await??;
                        record.type_identifier = type_identifier;
                        bytes
                    }
                    None => Vec::new(),
                }
            }
            Payload::Stored => self
                .store
                .read_blob(record.parent_id, record.id)
                .await
                .map_err(|e| IngestError::Storage(std::io::Error::other(format!("{:#}", e))))?
                .ok_or(IngestError::NoData)?,
        };
        check_cancelled(&token)?;
        progress.advance(1);

        if bytes.is_empty() {
            if is_web_archive {
                // Nothing to freeze. The component is dropped with the other
                // blobless ones once the item finishes.
                tracing::debug!(component = %record.id, "no web page to archive");
                return Ok(());
            }
            return Err(IngestError::NoData);
        }

        let mut work = Work {
            record,
            bytes,
            thumbnail: None,
            encode_image,
        };
        self.classify(&mut work, &token, !is_web_archive).await?;
        check_cancelled(&token)?;
        self.commit(component, work).await;
        Ok(())
    }

    async fn commit(&self, component: &Component, work: Work) {
        let Work {
            mut record,
            bytes,
            thumbnail,
            ..
        } = work;
        let (item_id, id) = (record.parent_id, record.id);

        match self.store.write_blob(item_id, id, &bytes).await {
            Ok(()) => record.blob_updated_at = Some(Utc::now()),
            Err(e) => tracing::warn!(component = %id, error = %format!("{:#}", e), "could not store blob"),
        }
        match (thumbnail, &record.display_icon) {
            (Some(png), _) => {
                if let Err(e) = self.store.write_thumbnail(item_id, id, &png).await {
                    tracing::warn!(component = %id, error = %format!("{:#}", e), "could not store thumbnail");
                }
            }
            (None, Some(IconRef::Builtin { .. })) => {
                if let Err(e) = self.store.remove_thumbnail(item_id, id).await {
                    tracing::debug!(component = %id, error = %format!("{:#}", e), "stale thumbnail left behind");
                }
            }
            _ => {}
        }
        record.last_error = None;
        component.update(move |current| *current = record);
    }

    /// Run CPU-heavy work on a blocking thread while holding a gate pass.
    async fn heavy<T, F>(&self, token: &CancellationToken, job: F) -> IngestResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _pass = until_cancelled(token, self.gate.acquire()).await??;
        check_cancelled(token)?;
        tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| IngestError::decode("background task", e))
    }

    async fn classify(
        &self,
        work: &mut Work,
        token: &CancellationToken,
        resolve_urls: bool,
    ) -> IngestResult<()> {
        work.record.represented_class = RepresentedClass::Data;
        work.record.class_was_wrapped = false;

        let resolve_urls = match archive::unarchive(&work.bytes) {
            Some(object) => {
                work.record.class_was_wrapped = true;
                match self.classify_wrapped(work, object, token).await? {
                    Next::Done => return Ok(()),
                    Next::Raw { resolve_urls } => resolve_urls,
                }
            }
            None => resolve_urls,
        };
        self.classify_raw(work, token, resolve_urls).await
    }

    // ─── Wrapped objects ────────────────────────────────────────────────

    async fn classify_wrapped(
        &self,
        work: &mut Work,
        object: ArchivedObject,
        token: &CancellationToken,
    ) -> IngestResult<Next> {
        let id = work.record.id;
        match object {
            ArchivedObject::String(text) => {
                tracing::debug!(component = %id, "received string");
                work.record.represented_class = RepresentedClass::Text;
                work.record.set_title(&text, 10);
                work.icon(BuiltinIcon::Text, 5);
            }
            ArchivedObject::AttributedText { text, .. } => {
                tracing::debug!(component = %id, "received attributed text");
                work.record.represented_class = RepresentedClass::AttributedText;
                work.record.set_title(&text, 7);
                work.icon(BuiltinIcon::Text, 5);
            }
            color @ ArchivedObject::Color { .. } => {
                tracing::debug!(component = %id, "received color");
                work.record.represented_class = RepresentedClass::Color;
                work.record.accessory_title = color.hex_color();
                if let ArchivedObject::Color {
                    red,
                    green,
                    blue,
                    alpha,
                } = color
                {
                    if work.icon_would_win(0) {
                        if let Some(swatch) = thumbnail::color_swatch(red, green, blue, alpha) {
                            work.thumbnail(swatch, 0, DisplayMode::Center);
                        }
                    }
                }
            }
            ArchivedObject::Image(bytes) => {
                tracing::debug!(component = %id, "received image");
                let encode = work.encode_image;
                let rendered = self
                    .heavy(token, move || {
                        let img = thumbnail::decode_image(&bytes)?;
                        let thumb = thumbnail::render(&img, DisplayMode::Fill)?;
                        let jpeg = if encode {
                            thumbnail::encode_jpeg(&img)
                        } else {
                            None
                        };
                        Some((thumb, jpeg))
                    })
                    .await?;
                let Some((thumb, jpeg)) = rendered else {
                    tracing::debug!(component = %id, "wrapped image does not decode");
                    return Ok(Next::Raw { resolve_urls: true });
                };
                work.record.represented_class = RepresentedClass::Image;
                work.thumbnail(thumb, 50, DisplayMode::Fill);
                if let Some(jpeg) = jpeg {
                    tracing::debug!(component = %id, "encoding sole image as JPEG");
                    work.mark_raw(uti::JPEG, jpeg);
                }
            }
            ArchivedObject::MapItem { .. } => {
                tracing::debug!(component = %id, "received map item");
                work.record.represented_class = RepresentedClass::MapLocation;
                work.icon(BuiltinIcon::Map, 10);
            }
            ArchivedObject::Url(text) => {
                if let Some(url) = parse_with_scheme(&text) {
                    return self.handle_url(work, url, token).await;
                }
                work.record.represented_class = RepresentedClass::Url;
            }
            ArchivedObject::Array(items) => {
                if let Some(url) = encoded_url(&work.record.type_identifier, &work.bytes) {
                    return self.handle_url(work, url, token).await;
                }
                work.record.represented_class = RepresentedClass::Array;
                let title = match items.len() {
                    1 => "1 Item".to_string(),
                    n => format!("{} Items", n),
                };
                work.record.set_title(&title, 1);
                work.icon(BuiltinIcon::StickyNote, 0);
            }
            ArchivedObject::Dictionary(entries) => {
                work.record.represented_class = RepresentedClass::Dictionary;
                let title = match entries.len() {
                    1 => "1 Entry".to_string(),
                    n => format!("{} Entries", n),
                };
                work.record.set_title(&title, 1);
                work.icon(BuiltinIcon::StickyNote, 0);
            }
            ArchivedObject::Date(date) => {
                work.record.represented_class = RepresentedClass::Unknown("date".to_string());
                work.record.set_title(&date.to_rfc3339(), 1);
                work.icon(BuiltinIcon::StickyNote, 0);
            }
        }
        Ok(Next::Done)
    }

    // ─── Raw data ───────────────────────────────────────────────────────

    async fn classify_raw(
        &self,
        work: &mut Work,
        token: &CancellationToken,
        resolve_urls: bool,
    ) -> IngestResult<()> {
        let mut resolve_urls = resolve_urls;
        'reclassify: loop {
            if let Some(zip) = relabel_zip(&work.record.type_identifier, &work.bytes) {
                work.record.type_identifier = zip.to_string();
            }
            let branches: Vec<RawBranch> = {
                let probe = Probe {
                    type_identifier: &work.record.type_identifier,
                    bytes: &work.bytes,
                    resolve_urls,
                };
                matching_branches(&probe).collect()
            };
            for branch in branches {
                tracing::debug!(component = %work.record.id, ?branch, "raw data branch");
                match self.apply_raw(branch, work, token).await? {
                    Applied::Handled => return Ok(()),
                    Applied::FallThrough => continue,
                    Applied::Reclassify => {
                        resolve_urls = false;
                        continue 'reclassify;
                    }
                }
            }
            return Ok(());
        }
    }

    async fn apply_raw(
        &self,
        branch: RawBranch,
        work: &mut Work,
        token: &CancellationToken,
    ) -> IngestResult<Applied> {
        match branch {
            RawBranch::Image => {
                let bytes = work.bytes.clone();
                let encode = work.encode_image;
                let rendered = self
                    .heavy(token, move || {
                        let img = thumbnail::decode_image(&bytes)?;
                        let thumb = thumbnail::render(&img, DisplayMode::Fill)?;
                        let jpeg = if encode {
                            thumbnail::encode_jpeg(&img)
                        } else {
                            None
                        };
                        Some((thumb, jpeg))
                    })
                    .await?;
                let Some((thumb, jpeg)) = rendered else {
                    return Ok(Applied::FallThrough);
                };
                work.thumbnail(thumb, 50, DisplayMode::Fill);
                if let Some(jpeg) = jpeg {
                    work.mark_raw(uti::JPEG, jpeg);
                }
            }
            RawBranch::Contact => {
                let Some(card) = extract::parse_vcard(&work.bytes) else {
                    return Ok(Applied::Handled);
                };
                let summary = card.summary();
                if !summary.is_empty() {
                    work.record.accessory_title = Some(summary);
                }
                let photo = match card.photo {
                    Some(photo) if work.icon_would_win(9) => {
                        self.heavy(token, move || {
                            thumbnail::render_bytes(&photo, DisplayMode::Circle)
                        })
                        .await?
                    }
                    _ => None,
                };
                match photo {
                    Some(rendered) => work.thumbnail(rendered, 9, DisplayMode::Circle),
                    None => work.icon(BuiltinIcon::Person, 5),
                }
            }
            RawBranch::Utf8Text => {
                if let Some(text) = extract::decode_utf8(&work.bytes) {
                    work.record.set_title(&text, 9);
                }
                work.icon(BuiltinIcon::Text, 5);
            }
            RawBranch::Utf16Text => {
                if let Some(text) = extract::decode_utf16(&work.bytes) {
                    work.record.set_title(&text, 8);
                }
                work.icon(BuiltinIcon::Text, 5);
            }
            RawBranch::Email => work.icon(BuiltinIcon::Email, 10),
            RawBranch::MapItem => work.icon(BuiltinIcon::Map, 5),
            RawBranch::RichText => {
                if let Some(text) = extract::rtf_to_text(&work.bytes) {
                    work.record.set_title(&text, 4);
                }
                work.icon(BuiltinIcon::Text, 5);
            }
            RawBranch::Url => {
                let Some(url) = encoded_url(&work.record.type_identifier, &work.bytes) else {
                    return Ok(Applied::FallThrough);
                };
                return Ok(match self.handle_url(work, url, token).await? {
                    Next::Done => Applied::Handled,
                    Next::Raw { .. } => Applied::Reclassify,
                });
            }
            RawBranch::Text => {
                if let Some(text) = extract::decode_utf8(&work.bytes) {
                    work.record.set_title(&text, 5);
                }
                work.icon(BuiltinIcon::Text, 5);
            }
            RawBranch::ImageType => work.icon(BuiltinIcon::Image, 5),
            RawBranch::Audiovisual => {
                let frame = match &self.frame_extractor {
                    Some(extractor) if work.icon_would_win(50) => {
                        let extractor = Arc::clone(extractor);
                        let bytes = work.bytes.clone();
                        let type_identifier = work.record.type_identifier.clone();
                        self.heavy(token, move || {
                            let frame = extractor.first_frame(&bytes, &type_identifier)?;
                            thumbnail::render_bytes(&frame, DisplayMode::Fill)
                        })
                        .await?
                    }
                    _ => None,
                };
                match frame {
                    Some(rendered) => work.thumbnail(rendered, 50, DisplayMode::Fill),
                    None => work.icon(BuiltinIcon::Movie, 30),
                }
            }
            RawBranch::Audio => work.icon(BuiltinIcon::Audio, 30),
            RawBranch::Pdf => {
                let bytes = work.bytes.clone();
                let scanned = self
                    .heavy(token, move || {
                        let preview = match extract::pdf_first_page_image(&bytes) {
                            Ok(Some(image)) => {
                                thumbnail::render_bytes(&image, DisplayMode::Fill)
                            }
                            Ok(None) => None,
                            Err(e) => {
                                tracing::debug!(error = %e, "PDF preview unavailable");
                                None
                            }
                        };
                        let title = extract::pdf_title(&bytes).ok().flatten();
                        (preview, title)
                    })
                    .await?;
                let (preview, title) = scanned;
                if let Some(title) = title.filter(|t| !t.is_empty()) {
                    work.record.set_title(&title, 11);
                }
                // Without a first-page image the block icon still applies.
                let Some(preview) = preview else {
                    return Ok(Applied::FallThrough);
                };
                work.thumbnail(preview, 50, DisplayMode::Fill);
            }
            RawBranch::Content => work.icon(BuiltinIcon::Block, 5),
            RawBranch::Archive => work.icon(BuiltinIcon::Zip, 30),
            RawBranch::Other => work.icon(BuiltinIcon::StickyNote, 0),
        }
        Ok(Applied::Handled)
    }

    // ─── URLs ───────────────────────────────────────────────────────────

    /// Returns `Next::Raw` when a local file was read in and its contents
    /// need classifying in turn.
    async fn handle_url(
        &self,
        work: &mut Work,
        url: Url,
        token: &CancellationToken,
    ) -> IngestResult<Next> {
        work.record.link = Some(url.to_string());
        if url.scheme() == "file" {
            return self.handle_file_url(work, &url, token).await;
        }

        tracing::debug!(component = %work.record.id, %url, "received remote url");
        work.record.represented_class = RepresentedClass::Url;
        work.record.set_title(url.as_str(), 6);
        work.icon(BuiltinIcon::Link, 5);
        if !matches!(url.scheme(), "http" | "https") {
            return Ok(Next::Done);
        }

        let preview = match until_cancelled(token, self.web.fetch_preview(&url)).await? {
            Ok(preview) => preview,
            Err(e) => {
                tracing::debug!(%url, error = %e, "no web preview");
                return Ok(Next::Done);
            }
        };
        check_cancelled(token)?;

        if let Some(title) = preview.title {
            work.record.set_title(&title, 30);
        }
        if let Some(image) = preview.image {
            if work.icon_would_win(30) {
                let mode = if image.is_thumbnail {
                    DisplayMode::Fill
                } else if image.height > PREVIEW_MAX_HEIGHT || image.width > PREVIEW_MAX_WIDTH {
                    DisplayMode::Fit
                } else {
                    DisplayMode::Center
                };
                let bytes = image.bytes;
                let rendered = self
                    .heavy(token, move || thumbnail::render_bytes(&bytes, mode))
                    .await?;
                if let Some(rendered) = rendered {
                    work.thumbnail(rendered, 30, mode);
                }
            }
        }
        Ok(Next::Done)
    }

    async fn handle_file_url(
        &self,
        work: &mut Work,
        url: &Url,
        token: &CancellationToken,
    ) -> IngestResult<Next> {
        let path = url.to_file_path().ok();
        let name = path
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned());
        if let Some(name) = &name {
            work.record.set_title(name, 6);
            work.record.accessory_title = Some(name.clone());
        }
        work.record.represented_class = RepresentedClass::Url;
        work.icon(BuiltinIcon::Block, 5);

        let Some(path) = path.filter(|_| self.read_local_files) else {
            return Ok(Next::Done);
        };
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(_) => {
                tracing::debug!(%url, "local file url for non-existent file");
                return Ok(Next::Done);
            }
        };
        check_cancelled(token)?;

        if metadata.is_dir() {
            let dir = path.clone();
            let poll = token.clone();
            let zipped = self
                .heavy(token, move || {
                    extract::zip_directory(&dir, || !poll.is_cancelled())
                })
                .await?;
            match zipped {
                Ok(Some(bytes)) => {
                    tracing::debug!(%url, bytes = bytes.len(), "zipped directory");
                    work.mark_raw(uti::ZIP_ARCHIVE, bytes);
                    work.icon(BuiltinIcon::Zip, 30);
                }
                Ok(None) => {
                    tracing::info!(%url, "cancelled zip since ingest was aborted");
                    return Err(IngestError::Cancelled);
                }
                Err(e) => {
                    tracing::debug!(%url, error = %e, "could not zip directory, keeping the url");
                }
            }
            return Ok(Next::Done);
        }

        match until_cancelled(token, tokio::fs::read(&path)).await? {
            Ok(contents) => {
                let type_identifier = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .and_then(uti::from_extension)
                    .unwrap_or(uti::DATA);
                tracing::debug!(%url, %type_identifier, "read local file");
                work.mark_raw(type_identifier, contents);
                Ok(Next::Raw {
                    resolve_urls: false,
                })
            }
            Err(e) => {
                tracing::debug!(%url, error = %e, "could not read local file, keeping the url");
                Ok(Next::Done)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebConfig;
    use crate::models::Item;
    use crate::progress::{IngestProgress, NoProgress};
    use crate::sources::MemorySource;
    use crate::thumbnail::sample_png;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn first_branch(type_identifier: &str, bytes: &[u8]) -> RawBranch {
        let probe = Probe {
            type_identifier,
            bytes,
            resolve_urls: true,
        };
        let first = matching_branches(&probe).next();
        first.unwrap()
    }

    // ─── Branch table ───────────────────────────────────────────────────

    #[test]
    fn image_signature_beats_type_identifier() {
        assert_eq!(first_branch(uti::UTF8_PLAIN_TEXT, &sample_png(2, 2)), RawBranch::Image);
    }

    #[test]
    fn branch_order_follows_the_table() {
        assert_eq!(first_branch(uti::UTF8_PLAIN_TEXT, b"hi"), RawBranch::Utf8Text);
        assert_eq!(first_branch(uti::UTF16_PLAIN_TEXT, b"\0h"), RawBranch::Utf16Text);
        assert_eq!(first_branch(uti::VCARD, b"BEGIN:VCARD"), RawBranch::Contact);
        assert_eq!(first_branch("public.rtf", b"{\\rtf1}"), RawBranch::RichText);
        assert_eq!(first_branch("public.html", b"<p>"), RawBranch::Text);
        assert_eq!(first_branch(uti::URL, b"https://example.com"), RawBranch::Url);
        assert_eq!(first_branch(uti::PNG, b"not png"), RawBranch::ImageType);
        assert_eq!(first_branch("public.mpeg-4", b"...."), RawBranch::Audiovisual);
        assert_eq!(first_branch("public.mp3", b"...."), RawBranch::Audio);
        assert_eq!(first_branch(uti::PDF, b"%PDF"), RawBranch::Pdf);
        assert_eq!(first_branch(uti::ZIP_ARCHIVE, b"...."), RawBranch::Archive);
        assert_eq!(first_branch("com.example.custom", b"...."), RawBranch::Other);
    }

    #[test]
    fn pdf_falls_through_to_content() {
        let probe = Probe {
            type_identifier: uti::PDF,
            bytes: b"%PDF-1.4",
            resolve_urls: true,
        };
        let branches: Vec<_> = matching_branches(&probe).collect();
        assert_eq!(
            branches,
            vec![RawBranch::Pdf, RawBranch::Content, RawBranch::Other]
        );
    }

    #[test]
    fn urls_are_only_resolved_when_asked() {
        let probe = Probe {
            type_identifier: uti::URL,
            bytes: b"https://example.com",
            resolve_urls: false,
        };
        assert_ne!(matching_branches(&probe).next(), Some(RawBranch::Url));
    }

    #[test]
    fn zip_signature_relabels_generic_data() {
        let zip = b"PK\x03\x04rest";
        assert_eq!(relabel_zip(uti::DATA, zip), Some(uti::ZIP_ARCHIVE));
        assert_eq!(relabel_zip(uti::FOLDER, zip), Some(uti::ZIP_ARCHIVE));
        assert_eq!(relabel_zip(uti::PDF, zip), None);
        assert_eq!(relabel_zip(uti::DATA, b"plain"), None);
    }

    #[test]
    fn encoded_url_sources() {
        assert_eq!(
            encoded_url(uti::URL, b" https://example.com/a ").map(String::from),
            Some("https://example.com/a".to_string())
        );
        assert_eq!(encoded_url(uti::UTF8_PLAIN_TEXT, b"https://example.com"), None);
        let array = archive::archive(&ArchivedObject::Array(vec![
            ArchivedObject::String("not a url".into()),
            ArchivedObject::String("https://example.org/".into()),
        ]))
        .unwrap();
        assert_eq!(
            encoded_url(uti::URL, &array).map(String::from),
            Some("https://example.org/".to_string())
        );
    }

    // ─── Running components ─────────────────────────────────────────────

    fn classifier(tmp: &TempDir) -> Classifier {
        Classifier::new(
            BlobStore::new(tmp.path()),
            IngestGate::new(2),
            WebClient::new(&WebConfig::default()).unwrap(),
            None,
            false,
        )
    }

    async fn run_one(
        classifier: &Classifier,
        type_identifier: &str,
        bytes: Vec<u8>,
    ) -> (Arc<Component>, ComponentOutcome) {
        let item = Item::new();
        let component = Component::new(item.id(), type_identifier, 0);
        let source = MemorySource::single(type_identifier, bytes);
        let progress = IngestProgress::new(item.id(), 1, Arc::new(NoProgress));
        let outcome = classifier
            .run(
                &component,
                Payload::Source(&source),
                false,
                progress.component(component.id()),
            )
            .await;
        assert!(progress.is_finished());
        (component, outcome)
    }

    #[tokio::test]
    async fn plain_text_gets_a_title() {
        let tmp = TempDir::new().unwrap();
        let classifier = classifier(&tmp);
        let (component, outcome) =
            run_one(&classifier, uti::UTF8_PLAIN_TEXT, b"  shopping list \n".to_vec()).await;
        assert_eq!(outcome, ComponentOutcome::Classified);
        let record = component.snapshot();
        assert_eq!(record.display_title.as_deref(), Some("shopping list"));
        assert_eq!(record.display_title_priority, Some(9));
        assert_eq!(
            record.display_icon,
            Some(IconRef::Builtin {
                icon: BuiltinIcon::Text
            })
        );
        assert!(record.blob_updated_at.is_some());
        let store = BlobStore::new(tmp.path());
        assert!(store.has_blob(record.parent_id, record.id).await);
    }

    #[tokio::test]
    async fn text_only_pdf_keeps_its_title_with_a_block_icon() {
        let tmp = TempDir::new().unwrap();
        let classifier = classifier(&tmp);
        let pdf = extract::sample_pdf(Some("Quarterly Report"));
        let (component, outcome) = run_one(&classifier, uti::PDF, pdf).await;
        assert_eq!(outcome, ComponentOutcome::Classified);
        let record = component.snapshot();
        assert_eq!(record.display_title.as_deref(), Some("Quarterly Report"));
        assert_eq!(record.display_title_priority, Some(11));
        assert_eq!(
            record.display_icon,
            Some(IconRef::Builtin {
                icon: BuiltinIcon::Block
            })
        );
        assert_eq!(record.display_icon_priority, Some(5));
    }

    #[tokio::test]
    async fn wrapped_string_outranks_raw_text() {
        let tmp = TempDir::new().unwrap();
        let classifier = classifier(&tmp);
        let bytes = archive::archive(&ArchivedObject::String("wrapped".into())).unwrap();
        let (component, _) = run_one(&classifier, uti::UTF8_PLAIN_TEXT, bytes).await;
        let record = component.snapshot();
        assert!(record.class_was_wrapped);
        assert_eq!(record.represented_class, RepresentedClass::Text);
        assert_eq!(record.display_title_priority, Some(10));
    }

    #[tokio::test]
    async fn color_gets_hex_accessory_and_swatch() {
        let tmp = TempDir::new().unwrap();
        let classifier = classifier(&tmp);
        let bytes = archive::archive(&ArchivedObject::Color {
            red: 1.0,
            green: 0.5,
            blue: 0.0,
            alpha: 1.0,
        })
        .unwrap();
        let (component, _) = run_one(&classifier, "com.apple.uikit.color", bytes).await;
        let record = component.snapshot();
        assert_eq!(record.represented_class, RepresentedClass::Color);
        assert_eq!(record.accessory_title.as_deref(), Some("#FF8000"));
        assert_eq!(record.display_icon_priority, Some(0));
        let store = BlobStore::new(tmp.path());
        assert!(store
            .read_thumbnail(record.parent_id, record.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn raw_png_renders_a_fill_thumbnail() {
        let tmp = TempDir::new().unwrap();
        let classifier = classifier(&tmp);
        let (component, _) = run_one(&classifier, uti::PNG, sample_png(600, 300)).await;
        let record = component.snapshot();
        assert_eq!(record.display_icon_priority, Some(50));
        assert_eq!(record.display_icon_content_mode, DisplayMode::Fill);
        assert_eq!(
            record.display_icon,
            Some(IconRef::Thumbnail {
                width: 256,
                height: 128,
                template: false
            })
        );
    }

    #[tokio::test]
    async fn arrays_are_counted() {
        let tmp = TempDir::new().unwrap();
        let classifier = classifier(&tmp);
        let bytes = archive::archive(&ArchivedObject::Array(vec![
            ArchivedObject::String("a".into()),
            ArchivedObject::String("b".into()),
        ]))
        .unwrap();
        let (component, _) = run_one(&classifier, "com.example.list", bytes).await;
        let record = component.snapshot();
        assert_eq!(record.represented_class, RepresentedClass::Array);
        assert_eq!(record.display_title.as_deref(), Some("2 Items"));
    }

    #[tokio::test]
    async fn non_http_urls_skip_the_preview() {
        let tmp = TempDir::new().unwrap();
        let classifier = classifier(&tmp);
        let (component, outcome) =
            run_one(&classifier, uti::URL, b"mailto:someone@example.com".to_vec()).await;
        assert_eq!(outcome, ComponentOutcome::Classified);
        let record = component.snapshot();
        assert_eq!(record.represented_class, RepresentedClass::Url);
        assert_eq!(record.link.as_deref(), Some("mailto:someone@example.com"));
        assert_eq!(record.display_title_priority, Some(6));
        assert_eq!(
            record.display_icon,
            Some(IconRef::Builtin {
                icon: BuiltinIcon::Link
            })
        );
    }

    #[tokio::test]
    async fn file_urls_show_the_file_name() {
        let tmp = TempDir::new().unwrap();
        let classifier = classifier(&tmp);
        let (component, _) =
            run_one(&classifier, uti::FILE_URL, b"file:///tmp/report.pdf".to_vec()).await;
        let record = component.snapshot();
        assert_eq!(record.accessory_title.as_deref(), Some("report.pdf"));
        assert_eq!(
            record.display_icon,
            Some(IconRef::Builtin {
                icon: BuiltinIcon::Block
            })
        );
    }

    #[tokio::test]
    async fn empty_payload_fails_with_paperclip() {
        let tmp = TempDir::new().unwrap();
        let classifier = classifier(&tmp);
        let (component, outcome) = run_one(&classifier, uti::UTF8_PLAIN_TEXT, Vec::new()).await;
        assert_eq!(outcome, ComponentOutcome::Failed);
        let record = component.snapshot();
        assert!(record.last_error.is_some());
        assert_eq!(
            record.display_icon,
            Some(IconRef::Builtin {
                icon: BuiltinIcon::Paperclip
            })
        );
        assert_eq!(record.display_icon_priority, Some(0));
    }

    #[tokio::test]
    #[traced_test]
    async fn cancelled_component_is_aborted_without_a_blob() {
        let tmp = TempDir::new().unwrap();
        let classifier = classifier(&tmp);
        let item = Item::new();
        let component = Component::new(item.id(), uti::UTF8_PLAIN_TEXT, 0);
        component.cancel();
        let source = MemorySource::single(uti::UTF8_PLAIN_TEXT, "text");
        let progress = IngestProgress::new(item.id(), 1, Arc::new(NoProgress));
        let outcome = classifier
            .run(
                &component,
                Payload::Source(&source),
                false,
                progress.component(component.id()),
            )
            .await;
        assert_eq!(outcome, ComponentOutcome::Aborted);
        assert!(progress.is_finished());
        assert!(component.snapshot().last_error.is_none());
        let store = BlobStore::new(tmp.path());
        assert!(!store.has_blob(item.id(), component.id()).await);
        assert!(logs_contain("ingest cancelled"));
    }
}
