//! Extension seams of the ingestion pipeline.
//!
//! ```text
//!  ContentSource ──▶ Ingestor ──▶ classifier ──▶ store
//!   (bytes by type)     │             │
//!                       │             └── FrameExtractor (movie previews)
//!                       ▼
//!               LabelContributor (post-ingest labelling)
//! ```
//!
//! Sources are supplied by the host (a drop, a share sheet, a test fixture).
//! Label contributors and frame extractors are optional; the pipeline runs
//! without them.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Item;

// ═══════════════════════════════════════════════════════════════════════
// Content Source
// ═══════════════════════════════════════════════════════════════════════

/// Something that offers content in one or more representations.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use clipvault::traits::ContentSource;
///
/// struct Clipboard(String);
///
/// #[async_trait]
/// impl ContentSource for Clipboard {
///     fn type_identifiers(&self) -> Vec<String> {
///         vec!["public.utf8-plain-text".to_string()]
///     }
///
///     async fn fetch(&self, _type_identifier: &str) -> Result<Vec<u8>> {
///         Ok(self.0.clone().into_bytes())
///     }
/// }
/// ```
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Type identifiers this source can serve, most faithful first.
    fn type_identifiers(&self) -> Vec<String>;

    /// A file name or title the source suggests for its content.
    fn suggested_name(&self) -> Option<String> {
        None
    }

    /// Fetch the bytes for one of the advertised type identifiers.
    ///
    /// May suspend on I/O. Callers stop awaiting the result when the
    /// component is cancelled, so implementations need not poll for it.
    async fn fetch(&self, type_identifier: &str) -> Result<Vec<u8>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Label Contributor
// ═══════════════════════════════════════════════════════════════════════

/// Post-ingest pass that proposes labels for a fully ingested item
/// (image tagging, transcription keywords, ...).
#[async_trait]
pub trait LabelContributor: Send + Sync {
    fn name(&self) -> &str;

    /// Labels to merge into the item. Errors are logged and ignored.
    async fn contribute(&self, item: &Item) -> Result<Vec<String>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Frame Extractor
// ═══════════════════════════════════════════════════════════════════════

/// Renders a still preview from audiovisual content.
///
/// Runs on a blocking thread while holding an ingest gate slot.
pub trait FrameExtractor: Send + Sync {
    /// Encoded image bytes of a representative frame, if one can be produced.
    fn first_frame(&self, bytes: &[u8], type_identifier: &str) -> Option<Vec<u8>>;
}
