//! # clipvault
//!
//! Local-first content archiving: dropped or shared content is ingested,
//! classified, thumbnailed, and stored per item on disk.
//!
//! A drop arrives as one or more content sources, each offering the same
//! content in several representations (plain text, a URL, an image, ...).
//! Every representation becomes a component of one item. Components are
//! fetched and classified concurrently, each deriving a title and an icon
//! through priority arbitration, and the item is finalized once all of them
//! have reported in.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌────────────┐
//! │ContentSource │──▶│   Ingestor   │──▶│  Classifier  │──▶│ BlobStore  │
//! │ memory/file/ │   │ plan, fan-out│   │ unwrap, rank │   │ blob/thumb │
//! │ link         │   │ fan-in       │   │ branch table │   │ item.json  │
//! └──────────────┘   └──────┬───────┘   └──────┬───────┘   └────────────┘
//!                           │                  │
//!                    ┌──────┴──────┐    ┌──────┴──────┐
//!                    │  progress,  │    │ IngestGate  │
//!                    │  events     │    │ WebClient   │
//!                    └─────────────┘    └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use clipvault::config::IngestConfig;
//! use clipvault::ingest::{ImportOverrides, Ingestor};
//! use clipvault::sources::MemorySource;
//! use clipvault::traits::ContentSource;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let ingestor = Ingestor::new(IngestConfig::with_root("/tmp/clipvault"))?;
//! let source: Arc<dyn ContentSource> =
//!     Arc::new(MemorySource::single("public.utf8-plain-text", "remember the milk"));
//! let items = ingestor.import(vec![source], &ImportOverrides::default()).await?;
//! println!("{:?}", items[0].display_text());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Items, components, display state |
//! | [`uti`] | Type identifier conformance |
//! | [`archive`] | Wrapped object codec |
//! | [`store`] | Blob, thumbnail, and item record storage |
//! | [`sync_state`] | Sync descriptors and dirty flags |
//! | [`gate`] | Concurrency gate for heavy decoding |
//! | [`traits`] | Extension seams |
//! | [`sources`] | Built-in content sources and sanitization |
//! | [`extract`] | Text, vCard, PDF, and zip helpers |
//! | [`thumbnail`] | Thumbnail rendering |
//! | [`classify`] | Content classifier |
//! | [`web`] | Web preview fetching |
//! | [`web_archive`] | Frozen web pages |
//! | [`progress`] | Progress and completion reporting |
//! | [`registry`] | Live component lookup |
//! | [`ingest`] | Ingestion coordinator |

pub mod archive;
pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod gate;
pub mod ingest;
pub mod models;
pub mod progress;
pub mod registry;
pub mod sources;
pub mod store;
pub mod sync_state;
pub mod thumbnail;
pub mod traits;
pub mod uti;
pub mod web;
pub mod web_archive;
