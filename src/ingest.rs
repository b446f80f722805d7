//! Ingestion coordination.
//!
//! The [`Ingestor`] turns content sources into items:
//!
//! ```text
//! sources ──▶ plan ──────────────▶ begin ──────────▶ fan-out ─────────▶ finish
//!             sanitize ids         register           one task per      drop blobless
//!             detect links         save as            component,        aggregate labels
//!             encoded image        being-ingested     bounded by the    contributors
//!             web archive                             ingest gate       save + notify
//! ```
//!
//! Re-ingest runs the same fan-out against each component's stored blob
//! without touching the original source. Component failures never fail the
//! item; only an import where nothing at all could be classified reports
//! [`IngestError::ImportFailed`].

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::classify::{Classifier, Payload};
use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::gate::IngestGate;
use crate::models::{Component, Item, ItemStatus};
use crate::progress::{ComponentOutcome, IngestProgress, NoProgress, ProgressReporter};
use crate::registry::ComponentRegistry;
use crate::sources::{extract_link, replace_text_with_link, sanitize_identifiers, LinkSource};
use crate::store::BlobStore;
use crate::sync_state::{DescriptorSlot, SyncState};
use crate::traits::{ContentSource, FrameExtractor, LabelContributor};
use crate::uti;
use crate::web::WebClient;

const EVENT_CAPACITY: usize = 256;

/// Notifications for consumers that cache derived state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEvent {
    /// Cached renderings of the item are stale.
    ItemModified { item: Uuid },
    /// Every component of the item has reported completion.
    IngestComplete { item: Uuid },
}

/// User-supplied values applied to every item of an import.
#[derive(Debug, Clone, Default)]
pub struct ImportOverrides {
    pub title: Option<String>,
    pub note: Option<String>,
    pub labels: Vec<String>,
}

/// Per-item tally of one ingest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub item: Uuid,
    pub classified: usize,
    pub failed: usize,
    pub aborted: usize,
    /// Components removed because they ended without a blob.
    pub dropped: usize,
}

impl IngestSummary {
    fn record(&mut self, outcome: ComponentOutcome) {
        match outcome {
            ComponentOutcome::Classified => self.classified += 1,
            ComponentOutcome::Failed => self.failed += 1,
            ComponentOutcome::Aborted => self.aborted += 1,
        }
    }
}

/// A component about to be ingested and where its bytes come from.
struct Planned {
    component: Arc<Component>,
    origin: Origin,
    encode_image: bool,
}

enum Origin {
    Source(Arc<dyn ContentSource>),
    WebArchive(Arc<dyn ContentSource>),
}

impl Origin {
    fn payload(&self) -> Payload<'_> {
        match self {
            Origin::Source(source) => Payload::Source(source.as_ref()),
            Origin::WebArchive(source) => Payload::WebArchive(source.as_ref()),
        }
    }
}

/// A running ingest started with [`Ingestor::start_ingest`].
pub struct IngestHandle {
    item_id: Uuid,
    progress: Arc<IngestProgress>,
    components: Vec<Arc<Component>>,
    task: JoinHandle<(Item, IngestSummary)>,
}

impl IngestHandle {
    pub fn item_id(&self) -> Uuid {
        self.item_id
    }

    pub fn progress(&self) -> &Arc<IngestProgress> {
        &self.progress
    }

    /// Abort every component. Each still reports completion.
    pub fn cancel(&self) {
        for component in &self.components {
            component.cancel();
        }
    }

    pub async fn wait(self) -> IngestResult<(Item, IngestSummary)> {
        let item_id = self.item_id;
        self.task.await.map_err(|e| {
            tracing::warn!(item = %item_id, error = %e, "ingest task did not complete");
            IngestError::Cancelled
        })
    }
}

pub struct Ingestor {
    config: IngestConfig,
    store: BlobStore,
    sync: SyncState,
    gate: IngestGate,
    web: WebClient,
    classifier: Classifier,
    registry: ComponentRegistry,
    reporter: Arc<dyn ProgressReporter>,
    contributors: Vec<Arc<dyn LabelContributor>>,
    events: broadcast::Sender<IngestEvent>,
}

impl Ingestor {
    pub fn new(config: IngestConfig) -> Result<Self> {
        let store = BlobStore::new(&config.storage.root);
        let gate = IngestGate::new(config.ingest.gate_capacity);
        let web = WebClient::new(&config.web)?;
        let classifier = Classifier::new(
            store.clone(),
            gate.clone(),
            web.clone(),
            None,
            config.ingest.read_local_files,
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            sync: SyncState::new(store.clone()),
            store,
            gate,
            web,
            classifier,
            registry: ComponentRegistry::new(),
            reporter: Arc::new(NoProgress),
            contributors: Vec::new(),
            events,
            config,
        })
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_label_contributor(mut self, contributor: Arc<dyn LabelContributor>) -> Self {
        self.contributors.push(contributor);
        self
    }

    pub fn with_frame_extractor(mut self, extractor: Arc<dyn FrameExtractor>) -> Self {
        self.classifier = Classifier::new(
            self.store.clone(),
            self.gate.clone(),
            self.web.clone(),
            Some(extractor),
            self.config.ingest.read_local_files,
        );
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: IngestEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ═══════════════════════════════════════════════════════════════════
    // New ingest
    // ═══════════════════════════════════════════════════════════════════

    /// Ingest `sources` into `item` and wait for every component.
    pub async fn ingest(
        &self,
        item: &mut Item,
        sources: &[Arc<dyn ContentSource>],
        limit_to_type: Option<&str>,
    ) -> IngestSummary {
        let planned = self.plan(item, sources, limit_to_type).await;
        let progress = self.begin(item, &planned).await;
        self.run_planned(item, planned, &progress).await
    }

    /// Plan and register the components, then ingest them in the background.
    pub async fn start_ingest(
        self: &Arc<Self>,
        mut item: Item,
        sources: Vec<Arc<dyn ContentSource>>,
        limit_to_type: Option<String>,
    ) -> IngestHandle {
        let planned = self.plan(&mut item, &sources, limit_to_type.as_deref()).await;
        let progress = self.begin(&mut item, &planned).await;
        let components = planned.iter().map(|p| Arc::clone(&p.component)).collect();
        let item_id = item.id();
        let this = Arc::clone(self);
        let task_progress = Arc::clone(&progress);
        let task = tokio::spawn(async move {
            let summary = this.run_planned(&mut item, planned, &task_progress).await;
            (item, summary)
        });
        IngestHandle {
            item_id,
            progress,
            components,
            task,
        }
    }

    /// Decide which components `sources` produce, in creation order.
    async fn plan(
        &self,
        item: &mut Item,
        sources: &[Arc<dyn ContentSource>],
        limit_to_type: Option<&str>,
    ) -> Vec<Planned> {
        let options = &self.config.ingest;
        let mut planned = Vec::new();

        for source in sources {
            let mut identifiers = sanitize_identifiers(&source.type_identifiers());
            if let Some(limit) = limit_to_type {
                identifiers.retain(|id| id == limit);
            }
            let mut entries: Vec<(String, Arc<dyn ContentSource>)> = identifiers
                .iter()
                .map(|id| (id.clone(), Arc::clone(source)))
                .collect();

            if options.auto_detect_links
                && !identifiers.iter().any(|id| uti::conforms_to(id, uti::URL))
            {
                if let Some(link) = self.detect_link(source.as_ref(), &identifiers).await {
                    tracing::debug!(item = %item.id(), %link, "text holds a bare link");
                    let link: Arc<dyn ContentSource> =
                        Arc::new(LinkSource::new(link, source.suggested_name()));
                    entries = replace_text_with_link(entries, link);
                }
            }

            if item.record.suggested_name.is_none() {
                item.record.suggested_name = source.suggested_name();
            }

            let item_id = item.id();
            let mut order = 0;
            let mut next_component = |type_identifier: &str| {
                let component = Component::new(item_id, type_identifier, order);
                order += 1;
                component
            };

            let encode_generic_image = !entries
                .iter()
                .any(|(id, _)| id != uti::IMAGE && uti::conforms_to(id, uti::IMAGE));
            let archive_urls = options.auto_archive_urls
                && !entries.iter().any(|(id, _)| id == uti::WEB_ARCHIVE);
            let mut archived = false;
            for (type_identifier, origin) in &entries {
                if encode_generic_image && type_identifier == uti::IMAGE {
                    planned.push(Planned {
                        component: next_component(uti::IMAGE),
                        origin: Origin::Source(Arc::clone(origin)),
                        encode_image: true,
                    });
                }
                planned.push(Planned {
                    component: next_component(type_identifier),
                    origin: Origin::Source(Arc::clone(origin)),
                    encode_image: false,
                });
                if archive_urls && !archived && type_identifier == uti::URL {
                    archived = true;
                    planned.push(Planned {
                        component: next_component(uti::WEB_ARCHIVE),
                        origin: Origin::WebArchive(Arc::clone(origin)),
                        encode_image: false,
                    });
                }
            }
        }
        planned
    }

    async fn detect_link(
        &self,
        source: &dyn ContentSource,
        identifiers: &[String],
    ) -> Option<String> {
        let text = identifiers
            .iter()
            .find(|id| uti::conforms_to(id, uti::TEXT))?;
        match source.fetch(text).await {
            Ok(bytes) => extract_link(&bytes, self.config.web.max_link_bytes),
            Err(e) => {
                tracing::debug!(type_identifier = %text, error = %format!("{:#}", e), "link detection fetch failed");
                None
            }
        }
    }

    /// Attach and register planned components and persist the item as
    /// being ingested, so an interrupted run resumes after a restart.
    async fn begin(&self, item: &mut Item, planned: &[Planned]) -> Arc<IngestProgress> {
        for p in planned {
            self.registry.register(&p.component);
            item.components.push(Arc::clone(&p.component));
        }
        item.record.status = ItemStatus::IsBeingIngested;
        item.record.updated_at = Utc::now();
        if let Err(e) = self.store.save_item(item).await {
            tracing::warn!(item = %item.id(), error = %format!("{:#}", e), "could not save item");
        }
        IngestProgress::new(item.id(), planned.len(), Arc::clone(&self.reporter))
    }

    async fn run_planned(
        &self,
        item: &mut Item,
        planned: Vec<Planned>,
        progress: &Arc<IngestProgress>,
    ) -> IngestSummary {
        let runs = planned.iter().map(|p| {
            self.classifier.run(
                &p.component,
                p.origin.payload(),
                p.encode_image,
                progress.component(p.component.id()),
            )
        });
        let outcomes = join_all(runs).await;

        let mut summary = IngestSummary {
            item: item.id(),
            ..Default::default()
        };
        for outcome in outcomes {
            summary.record(outcome);
        }
        self.finish(item, &mut summary).await;
        summary
    }

    // ═══════════════════════════════════════════════════════════════════
    // Re-ingest
    // ═══════════════════════════════════════════════════════════════════

    /// Reclassify every component from its stored blob.
    ///
    /// Components that failed before or have no blob are skipped and count
    /// as complete. When any component has an explicit order they run one at
    /// a time in ascending order; otherwise they run concurrently.
    pub async fn reingest(&self, item: &mut Item) -> IngestSummary {
        let mut components = item.components.clone();
        let ordered = components.iter().any(|c| c.order() != 0);
        if ordered {
            components.sort_by_key(|c| c.order());
        }

        item.record.status = ItemStatus::IsBeingIngested;
        if let Err(e) = self.store.save_item(item).await {
            tracing::warn!(item = %item.id(), error = %format!("{:#}", e), "could not save item");
        }
        let progress = IngestProgress::new(item.id(), components.len(), Arc::clone(&self.reporter));
        let mut summary = IngestSummary {
            item: item.id(),
            ..Default::default()
        };

        let mut runnable = Vec::new();
        for component in components {
            let mut handle = progress.component(component.id());
            if component.snapshot().last_error.is_some() {
                handle.finish(ComponentOutcome::Failed);
                summary.record(ComponentOutcome::Failed);
                continue;
            }
            if !self.store.has_blob(item.id(), component.id()).await {
                handle.finish(ComponentOutcome::Aborted);
                summary.record(ComponentOutcome::Aborted);
                continue;
            }
            component.rearm();
            runnable.push((component, handle));
        }

        if ordered {
            for (component, handle) in runnable {
                let outcome = self
                    .classifier
                    .run(&component, Payload::Stored, false, handle)
                    .await;
                summary.record(outcome);
            }
        } else {
            let runs = runnable.into_iter().map(|(component, handle)| async move {
                self.classifier
                    .run(&component, Payload::Stored, false, handle)
                    .await
            });
            for outcome in join_all(runs).await {
                summary.record(outcome);
            }
        }

        self.finish(item, &mut summary).await;
        summary
    }

    /// Re-ingest every loaded item left mid-ingest by a previous run.
    pub async fn resume_pending(&self, items: &mut [Item]) -> Vec<IngestSummary> {
        let mut summaries = Vec::new();
        for item in items
            .iter_mut()
            .filter(|item| item.record.status == ItemStatus::NeedsIngest)
        {
            tracing::info!(item = %item.id(), "resuming interrupted ingest");
            summaries.push(self.reingest(item).await);
        }
        summaries
    }

    // ═══════════════════════════════════════════════════════════════════
    // Completion
    // ═══════════════════════════════════════════════════════════════════

    /// Item-level work once every component has reported in.
    async fn finish(&self, item: &mut Item, summary: &mut IngestSummary) {
        let item_id = item.id();

        let mut kept = Vec::with_capacity(item.components.len());
        for component in std::mem::take(&mut item.components) {
            let errored = component.snapshot().last_error.is_some();
            if errored || self.store.has_blob(item_id, component.id()).await {
                kept.push(component);
                continue;
            }
            tracing::debug!(item = %item_id, component = %component.id(), "dropping component without data");
            self.registry.evict(component.id());
            if let Err(e) = self.store.remove_component(item_id, component.id()).await {
                tracing::warn!(component = %component.id(), error = %format!("{:#}", e), "could not remove component");
            }
            summary.dropped += 1;
        }
        item.components = kept;

        for record in item.component_records() {
            merge_labels(&mut item.record.labels, record.contributed_labels);
        }
        for contributor in &self.contributors {
            match contributor.contribute(item).await {
                Ok(labels) => merge_labels(&mut item.record.labels, labels),
                Err(e) => tracing::warn!(
                    item = %item_id,
                    contributor = contributor.name(),
                    error = %format!("{:#}", e),
                    "label contributor failed"
                ),
            }
        }

        item.record.status = ItemStatus::Nominal;
        item.record.updated_at = Utc::now();
        if let Err(e) = self.store.save_item(item).await {
            tracing::warn!(item = %item_id, error = %format!("{:#}", e), "could not save item");
        }
        let ids: Vec<Uuid> = item.components.iter().map(|c| c.id()).collect();
        if let Err(e) = self.sync.mark_modified(item_id, &ids).await {
            tracing::warn!(item = %item_id, error = %format!("{:#}", e), "could not mark item for sync");
        }

        tracing::info!(
            item = %item_id,
            classified = summary.classified,
            failed = summary.failed,
            aborted = summary.aborted,
            dropped = summary.dropped,
            "ingest complete"
        );
        self.emit(IngestEvent::ItemModified { item: item_id });
        self.emit(IngestEvent::IngestComplete { item: item_id });
    }

    // ═══════════════════════════════════════════════════════════════════
    // Import
    // ═══════════════════════════════════════════════════════════════════

    /// Import sources as new items: one per source, or one per source and
    /// type identifier with `separate_items`.
    ///
    /// Fails only when no component of any item could be classified; the
    /// partial items are removed in that case.
    pub async fn import(
        &self,
        sources: Vec<Arc<dyn ContentSource>>,
        overrides: &ImportOverrides,
    ) -> IngestResult<Vec<Item>> {
        if sources.is_empty() {
            return Err(IngestError::NoData);
        }

        let mut items = Vec::new();
        let mut classified = 0;
        for source in sources {
            let limits: Vec<Option<String>> = if self.config.ingest.separate_items {
                sanitize_identifiers(&source.type_identifiers())
                    .into_iter()
                    .map(Some)
                    .collect()
            } else {
                vec![None]
            };
            for limit in limits {
                let mut item = Item::new();
                apply_overrides(&mut item, overrides);
                let summary = self
                    .ingest(&mut item, std::slice::from_ref(&source), limit.as_deref())
                    .await;
                classified += summary.classified;
                items.push(item);
            }
        }

        if classified == 0 {
            tracing::warn!(items = items.len(), "import failed, nothing could be read");
            for item in &items {
                self.purge(item).await;
            }
            return Err(IngestError::ImportFailed);
        }
        Ok(items)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════

    /// Abort every component of `item`. In-flight work stops at its next
    /// suspension point and nothing it fetched is persisted.
    pub fn cancel_ingest(&self, item: &Item) {
        tracing::info!(item = %item.id(), "cancelling ingest");
        for component in &item.components {
            component.cancel();
        }
    }

    /// Load every stored item and register its components.
    pub async fn load_items(&self) -> Result<Vec<Item>> {
        let items = self.store.load_all().await?;
        for item in &items {
            for component in &item.components {
                self.registry.register(component);
            }
        }
        tracing::info!(items = items.len(), "loaded items");
        Ok(items)
    }

    /// Flag an item as deleted and pending a sync push. Its files stay until
    /// [`Ingestor::purge`].
    pub async fn mark_deleted(&self, item: &mut Item) -> Result<()> {
        self.cancel_ingest(item);
        item.record.status = ItemStatus::Deleted;
        item.record.updated_at = Utc::now();
        self.store.save_item(item).await?;
        self.sync
            .set_needs_push(item.id(), DescriptorSlot::Item, true)
            .await?;
        self.emit(IngestEvent::ItemModified { item: item.id() });
        Ok(())
    }

    /// Remove an item and everything stored for it.
    pub async fn purge(&self, item: &Item) {
        self.cancel_ingest(item);
        self.registry.evict_item(item.id());
        self.sync.forget(item.id());
        if let Err(e) = self.store.remove_item(item.id()).await {
            tracing::warn!(item = %item.id(), error = %format!("{:#}", e), "could not remove item");
        }
    }

    /// Remove one component from an item.
    pub async fn discard_component(&self, item: &mut Item, component_id: Uuid) -> Result<()> {
        let Some(index) = item.components.iter().position(|c| c.id() == component_id) else {
            return Ok(());
        };
        let component = item.components.remove(index);
        component.cancel();
        self.registry.evict(component_id);
        self.store.remove_component(item.id(), component_id).await?;
        item.record.updated_at = Utc::now();
        self.store.save_item(item).await?;
        let ids: Vec<Uuid> = item.components.iter().map(|c| c.id()).collect();
        self.sync.mark_modified(item.id(), &ids).await?;
        self.emit(IngestEvent::ItemModified { item: item.id() });
        Ok(())
    }

    /// Stored size of a component's content in bytes.
    pub async fn component_size(&self, component: &Component) -> u64 {
        self.store
            .blob_size(component.parent_id(), component.id())
            .await
    }
}

fn apply_overrides(item: &mut Item, overrides: &ImportOverrides) {
    if let Some(title) = &overrides.title {
        item.record.title_override = title.clone();
    }
    if let Some(note) = &overrides.note {
        item.record.note = note.clone();
    }
    merge_labels(&mut item.record.labels, overrides.labels.iter().cloned());
}

fn merge_labels(labels: &mut Vec<String>, incoming: impl IntoIterator<Item = String>) {
    for label in incoming {
        let label = label.trim();
        if !label.is_empty() && !labels.iter().any(|l| l == label) {
            labels.push(label.to_string());
        }
    }
}
