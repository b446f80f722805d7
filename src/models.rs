//! Core data models: items, their components, and the display state the
//! classifier derives for them.
//!
//! Persisted state lives in [`ItemRecord`] and [`ComponentRecord`] (serde,
//! written as JSON by the [`store`](crate::store)). Transient state such as
//! the transferring flag and the cancellation token lives in
//! [`ComponentFlags`] and never crosses the serialization boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::uti;

/// Titles longer than this are flattened to one line and justified.
pub const LONG_TITLE_CHARS: usize = 200;

// ═══════════════════════════════════════════════════════════════════════
// Display enums
// ═══════════════════════════════════════════════════════════════════════

/// Decoded payload kind of a component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RepresentedClass {
    Data,
    Text,
    AttributedText,
    Color,
    Image,
    MapLocation,
    Url,
    Array,
    Dictionary,
    Unknown(String),
}

impl RepresentedClass {
    pub fn name(&self) -> &str {
        match self {
            RepresentedClass::Data => "raw-data",
            RepresentedClass::Text => "text",
            RepresentedClass::AttributedText => "attributed-text",
            RepresentedClass::Color => "color",
            RepresentedClass::Image => "image",
            RepresentedClass::MapLocation => "map-location",
            RepresentedClass::Url => "url",
            RepresentedClass::Array => "array",
            RepresentedClass::Dictionary => "dictionary",
            RepresentedClass::Unknown(name) => name,
        }
    }

    pub fn description(&self) -> String {
        match self {
            RepresentedClass::Data => "Data".to_string(),
            RepresentedClass::Text => "Text".to_string(),
            RepresentedClass::AttributedText => "Rich Text".to_string(),
            RepresentedClass::Color => "Color".to_string(),
            RepresentedClass::Image => "Image".to_string(),
            RepresentedClass::MapLocation => "Map Location".to_string(),
            RepresentedClass::Url => "Link".to_string(),
            RepresentedClass::Array => "List".to_string(),
            RepresentedClass::Dictionary => "Associative List".to_string(),
            RepresentedClass::Unknown(name) => format!("Other ({})", name),
        }
    }
}

impl From<String> for RepresentedClass {
    fn from(name: String) -> Self {
        match name.as_str() {
            "raw-data" => RepresentedClass::Data,
            "text" => RepresentedClass::Text,
            "attributed-text" => RepresentedClass::AttributedText,
            "color" => RepresentedClass::Color,
            "image" => RepresentedClass::Image,
            "map-location" => RepresentedClass::MapLocation,
            "url" => RepresentedClass::Url,
            "array" => RepresentedClass::Array,
            "dictionary" => RepresentedClass::Dictionary,
            _ => RepresentedClass::Unknown(name),
        }
    }
}

impl From<RepresentedClass> for String {
    fn from(class: RepresentedClass) -> Self {
        class.name().to_string()
    }
}

impl fmt::Display for RepresentedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a thumbnail is laid out inside its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    Fit,
    Fill,
    #[default]
    Center,
    Circle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TitleAlignment {
    #[default]
    Center,
    Justified,
}

/// Fixed icons used when no rendered preview exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuiltinIcon {
    Paperclip,
    Text,
    Link,
    Map,
    StickyNote,
    Person,
    Email,
    Block,
    Image,
    Movie,
    Audio,
    Zip,
}

/// The icon a component displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum IconRef {
    Builtin { icon: BuiltinIcon },
    /// A rendered image stored in the component's `thumbnail` file.
    Thumbnail {
        width: u32,
        height: u32,
        #[serde(default)]
        template: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemColor {
    #[default]
    None,
    Blue,
    Red,
    Purple,
    Green,
    Cyan,
    Yellow,
    Gray,
}

/// Persisted lifecycle state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    #[default]
    Nominal,
    IsBeingConstructed,
    Deleted,
    IsBeingIngested,
    NeedsIngest,
}

/// `true` when `priority` beats `current`. An unset priority loses to anything.
pub fn outranks(priority: i32, current: Option<i32>) -> bool {
    current.map_or(true, |existing| priority > existing)
}

// ═══════════════════════════════════════════════════════════════════════
// Component
// ═══════════════════════════════════════════════════════════════════════

/// Persisted state of one typed representation inside an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub id: Uuid,
    pub parent_id: Uuid,
    pub type_identifier: String,
    pub represented_class: RepresentedClass,
    pub class_was_wrapped: bool,
    pub accessory_title: Option<String>,
    pub display_title: Option<String>,
    #[serde(default)]
    pub display_title_alignment: TitleAlignment,
    pub display_title_priority: Option<i32>,
    pub display_icon: Option<IconRef>,
    #[serde(default)]
    pub display_icon_content_mode: DisplayMode,
    pub display_icon_priority: Option<i32>,
    /// Absolute URL the payload resolved to, when it is a link.
    #[serde(default)]
    pub link: Option<String>,
    pub order: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub blob_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub contributed_labels: Vec<String>,
}

impl ComponentRecord {
    pub fn new(parent_id: Uuid, type_identifier: impl Into<String>, order: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            parent_id,
            type_identifier: type_identifier.into(),
            represented_class: RepresentedClass::Data,
            class_was_wrapped: false,
            accessory_title: None,
            display_title: None,
            display_title_alignment: TitleAlignment::Center,
            display_title_priority: None,
            display_icon: None,
            display_icon_content_mode: DisplayMode::Center,
            display_icon_priority: None,
            link: None,
            order,
            created_at: now,
            updated_at: now,
            blob_updated_at: None,
            last_error: None,
            contributed_labels: Vec::new(),
        }
    }

    /// Assign a title if `priority` outranks the current one.
    ///
    /// Long text is flattened to a single justified line. Whitespace is
    /// trimmed and NULs dropped; a title that ends up empty is cleared.
    pub fn set_title(&mut self, text: &str, priority: i32) -> bool {
        if !outranks(priority, self.display_title_priority) {
            return false;
        }
        let (flattened, alignment) = if text.chars().count() > LONG_TITLE_CHARS {
            (text.replace('\n', " "), TitleAlignment::Justified)
        } else {
            (text.to_string(), TitleAlignment::Center)
        };
        let cleaned: String = flattened.trim().chars().filter(|c| *c != '\0').collect();
        self.display_title = if cleaned.is_empty() {
            None
        } else {
            Some(cleaned)
        };
        self.display_title_alignment = alignment;
        self.display_title_priority = Some(priority);
        true
    }

    /// Assign an icon if `priority` outranks the current one.
    pub fn set_icon(&mut self, icon: IconRef, priority: i32, mode: DisplayMode) -> bool {
        if !outranks(priority, self.display_icon_priority) {
            return false;
        }
        self.display_icon = Some(icon);
        self.display_icon_priority = Some(priority);
        self.display_icon_content_mode = mode;
        true
    }

    pub fn set_builtin_icon(&mut self, icon: BuiltinIcon, priority: i32, mode: DisplayMode) -> bool {
        self.set_icon(IconRef::Builtin { icon }, priority, mode)
    }

    pub fn conforms_to(&self, parent: &str) -> bool {
        uti::conforms_to(&self.type_identifier, parent)
    }

    pub fn is_web_url(&self) -> bool {
        self.link
            .as_deref()
            .is_some_and(|l| l.starts_with("http://") || l.starts_with("https://"))
    }

    pub fn is_file_url(&self) -> bool {
        self.link.as_deref().is_some_and(|l| l.starts_with("file:"))
    }

    /// How representative this component is of its item's content.
    pub fn content_priority(&self) -> i32 {
        if self.type_identifier == uti::MAP_ITEM {
            90
        } else if self.conforms_to(uti::VCARD) {
            80
        } else if self.is_web_url() {
            70
        } else if self.conforms_to(uti::VIDEO) || self.conforms_to(uti::MOVIE) {
            60
        } else if self.conforms_to(uti::AUDIO) {
            50
        } else if self.conforms_to(uti::PDF) {
            40
        } else if self.conforms_to(uti::IMAGE) {
            30
        } else if self.conforms_to(uti::TEXT) {
            20
        } else if self.is_file_url() {
            10
        } else {
            0
        }
    }

    /// Human-readable name for the type, falling back to the payload kind.
    pub fn type_description(&self) -> String {
        match uti::description(&self.type_identifier) {
            Some(text) => text.to_string(),
            None => self.represented_class.description(),
        }
    }
}

/// Transient per-component flags. Never persisted.
#[derive(Debug, Default)]
pub struct ComponentFlags {
    transferring: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

/// One typed representation within an item, shared between the item and
/// the tasks classifying it.
#[derive(Debug)]
pub struct Component {
    id: Uuid,
    parent_id: Uuid,
    record: RwLock<ComponentRecord>,
    flags: ComponentFlags,
}

impl Component {
    pub fn new(parent_id: Uuid, type_identifier: impl Into<String>, order: usize) -> Arc<Self> {
        Self::from_record(ComponentRecord::new(parent_id, type_identifier, order))
    }

    pub fn from_record(record: ComponentRecord) -> Arc<Self> {
        Arc::new(Self {
            id: record.id,
            parent_id: record.parent_id,
            record: RwLock::new(record),
            flags: ComponentFlags::default(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn parent_id(&self) -> Uuid {
        self.parent_id
    }

    /// Copy of the current persisted state.
    pub fn snapshot(&self) -> ComponentRecord {
        match self.record.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Mutate the persisted state under the write lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut ComponentRecord) -> R) -> R {
        let mut guard = match self.record.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let out = f(&mut guard);
        guard.updated_at = Utc::now();
        out
    }

    pub fn type_identifier(&self) -> String {
        self.snapshot().type_identifier
    }

    pub fn order(&self) -> usize {
        self.snapshot().order
    }

    pub fn is_transferring(&self) -> bool {
        self.flags.transferring.load(Ordering::Acquire)
    }

    pub fn set_transferring(&self, value: bool) {
        self.flags.transferring.store(value, Ordering::Release);
    }

    fn token_guard(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        match self.flags.cancel.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Token observed by every suspension point of this component's ingest.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token_guard().clone()
    }

    pub fn cancel(&self) {
        self.token_guard().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token_guard().is_cancelled()
    }

    /// Replace a spent token so a later re-ingest can run.
    pub fn rearm(&self) {
        let mut guard = self.token_guard();
        if guard.is_cancelled() {
            *guard = CancellationToken::new();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Item
// ═══════════════════════════════════════════════════════════════════════

/// Persisted state of a user-visible archived entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub title_override: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub lock_password: Option<String>,
    #[serde(default)]
    pub lock_hint: Option<String>,
    #[serde(default)]
    pub highlight_color: ItemColor,
    #[serde(default)]
    pub suggested_name: Option<String>,
    #[serde(default)]
    pub status: ItemStatus,
}

impl ItemRecord {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            note: String::new(),
            title_override: String::new(),
            labels: Vec::new(),
            lock_password: None,
            lock_hint: None,
            highlight_color: ItemColor::None,
            suggested_name: None,
            status: ItemStatus::IsBeingConstructed,
        }
    }
}

impl Default for ItemRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Transient item flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemFlags {
    /// A locked item the user has unlocked for this session.
    pub temporarily_unlocked: bool,
}

/// An item with its live components.
#[derive(Debug, Clone)]
pub struct Item {
    pub record: ItemRecord,
    pub components: Vec<Arc<Component>>,
    pub flags: ItemFlags,
}

/// Attributes a search indexer would register for an item.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchAttributes {
    pub id: Uuid,
    pub title: Option<String>,
    pub note: String,
    pub labels: Vec<String>,
    pub keywords: Vec<String>,
    pub thumbnail_component: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn new() -> Self {
        Self {
            record: ItemRecord::new(),
            components: Vec::new(),
            flags: ItemFlags::default(),
        }
    }

    pub fn from_parts(record: ItemRecord, components: Vec<Arc<Component>>) -> Self {
        Self {
            record,
            components,
            flags: ItemFlags::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.record.id
    }

    pub fn is_locked(&self) -> bool {
        self.record.lock_password.is_some() && !self.flags.temporarily_unlocked
    }

    pub fn is_deleted(&self) -> bool {
        self.record.status == ItemStatus::Deleted
    }

    pub fn is_pending_ingest(&self) -> bool {
        matches!(
            self.record.status,
            ItemStatus::IsBeingIngested | ItemStatus::NeedsIngest | ItemStatus::IsBeingConstructed
        )
    }

    /// Visible only when not deleted, not locked, and not waiting on ingest.
    pub fn is_visible(&self) -> bool {
        !self.is_deleted() && !self.is_locked() && !self.is_pending_ingest()
    }

    pub fn component_records(&self) -> Vec<ComponentRecord> {
        self.components.iter().map(|c| c.snapshot()).collect()
    }

    /// Text shown for the item in lists.
    pub fn display_text(&self) -> Option<String> {
        let override_title = self.record.title_override.trim();
        if !override_title.is_empty() {
            return Some(override_title.to_string());
        }
        let records = self.component_records();
        if let Some(accessory) = records.iter().find_map(|r| r.accessory_title.clone()) {
            return Some(accessory);
        }
        let titled = best_by(&records, |r| {
            r.display_title.as_ref().and(r.display_title_priority)
        });
        if let Some(title) = titled.and_then(|r| r.display_title.clone()) {
            return Some(title);
        }
        self.record.suggested_name.clone()
    }

    /// Component whose icon represents the item. Ties go to the earliest.
    pub fn thumbnail_component(&self) -> Option<ComponentRecord> {
        let records = self.component_records();
        best_by(&records, |r| r.display_icon.as_ref().and(r.display_icon_priority)).cloned()
    }

    /// Component most representative of the item's content.
    pub fn most_relevant_component(&self) -> Option<ComponentRecord> {
        let records = self.component_records();
        best_by(&records, |r| Some(r.content_priority())).cloned()
    }

    pub fn search_attributes(&self) -> SearchAttributes {
        let mut keywords = BTreeSet::new();
        for record in self.component_records() {
            keywords.insert(record.type_description());
            if let Some(accessory) = record.accessory_title {
                keywords.insert(accessory);
            }
        }
        SearchAttributes {
            id: self.id(),
            title: self.display_text(),
            note: self.record.note.clone(),
            labels: self.record.labels.clone(),
            keywords: keywords.into_iter().collect(),
            thumbnail_component: self.thumbnail_component().map(|r| r.id),
            created_at: self.record.created_at,
            updated_at: self.record.updated_at,
        }
    }
}

impl Default for Item {
    fn default() -> Self {
        Self::new()
    }
}

/// Highest-scoring record, first one winning ties. Records scoring `None`
/// are skipped.
fn best_by<'a>(
    records: &'a [ComponentRecord],
    score: impl Fn(&ComponentRecord) -> Option<i32>,
) -> Option<&'a ComponentRecord> {
    let mut best: Option<(&ComponentRecord, i32)> = None;
    for record in records {
        let Some(value) = score(record) else {
            continue;
        };
        if best.map_or(true, |(_, top)| value > top) {
            best = Some((record, value));
        }
    }
    best.map(|(record, _)| record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_arbitration_is_strict() {
        let mut record = ComponentRecord::new(Uuid::new_v4(), uti::UTF8_PLAIN_TEXT, 0);
        assert!(record.set_title("first", 5));
        assert!(!record.set_title("same", 5));
        assert!(!record.set_title("lower", 4));
        assert_eq!(record.display_title.as_deref(), Some("first"));
        assert!(record.set_title("higher", 9));
        assert_eq!(record.display_title.as_deref(), Some("higher"));
    }

    #[test]
    fn unset_priority_loses_to_zero() {
        let mut record = ComponentRecord::new(Uuid::new_v4(), uti::DATA, 0);
        assert!(record.set_builtin_icon(BuiltinIcon::Paperclip, 0, DisplayMode::Center));
        assert!(!record.set_builtin_icon(BuiltinIcon::StickyNote, 0, DisplayMode::Center));
        assert_eq!(
            record.display_icon,
            Some(IconRef::Builtin {
                icon: BuiltinIcon::Paperclip
            })
        );
    }

    #[test]
    fn long_titles_are_flattened_and_justified() {
        let mut record = ComponentRecord::new(Uuid::new_v4(), uti::TEXT, 0);
        let text = format!("{}\n{}", "a".repeat(150), "b".repeat(100));
        record.set_title(&text, 7);
        let title = record.display_title.unwrap();
        assert!(!title.contains('\n'));
        assert_eq!(record.display_title_alignment, TitleAlignment::Justified);
    }

    #[test]
    fn blank_titles_are_cleared() {
        let mut record = ComponentRecord::new(Uuid::new_v4(), uti::TEXT, 0);
        record.set_title("  \0 \n", 3);
        assert_eq!(record.display_title, None);
        assert_eq!(record.display_title_priority, Some(3));
        assert_eq!(record.display_title_alignment, TitleAlignment::Center);
    }

    #[test]
    fn represented_class_names_are_stable() {
        let json = serde_json::to_string(&RepresentedClass::MapLocation).unwrap();
        assert_eq!(json, "\"map-location\"");
        let other: RepresentedClass = serde_json::from_str("\"NSSet\"").unwrap();
        assert_eq!(other, RepresentedClass::Unknown("NSSet".to_string()));
        assert_eq!(other.description(), "Other (NSSet)");
    }

    #[test]
    fn content_priority_ranks_maps_first() {
        let parent = Uuid::new_v4();
        let map = ComponentRecord::new(parent, uti::MAP_ITEM, 0);
        let card = ComponentRecord::new(parent, uti::VCARD, 1);
        let mut link = ComponentRecord::new(parent, uti::URL, 2);
        link.link = Some("https://example.com/".into());
        let jpeg = ComponentRecord::new(parent, uti::JPEG, 3);
        let blob = ComponentRecord::new(parent, "com.example.blob", 4);
        assert_eq!(map.content_priority(), 90);
        assert_eq!(card.content_priority(), 80);
        assert_eq!(link.content_priority(), 70);
        assert_eq!(jpeg.content_priority(), 30);
        assert_eq!(blob.content_priority(), 0);
    }

    #[test]
    fn display_text_prefers_override_then_accessory_then_title() {
        let mut item = Item::new();
        let plain = Component::new(item.id(), uti::UTF8_PLAIN_TEXT, 0);
        plain.update(|r| r.set_title("body text", 9));
        let card = Component::new(item.id(), uti::VCARD, 1);
        item.components = vec![plain.clone(), card.clone()];
        assert_eq!(item.display_text().as_deref(), Some("body text"));

        card.update(|r| r.accessory_title = Some("Jane Doe".into()));
        assert_eq!(item.display_text().as_deref(), Some("Jane Doe"));

        item.record.title_override = "Pinned".into();
        assert_eq!(item.display_text().as_deref(), Some("Pinned"));
    }

    #[test]
    fn equal_icon_priorities_favor_first_component() {
        let mut item = Item::new();
        let a = Component::new(item.id(), uti::TEXT, 0);
        let b = Component::new(item.id(), uti::TEXT, 1);
        a.update(|r| r.set_builtin_icon(BuiltinIcon::Text, 5, DisplayMode::Center));
        b.update(|r| r.set_builtin_icon(BuiltinIcon::Block, 5, DisplayMode::Center));
        item.components = vec![a.clone(), b];
        assert_eq!(item.thumbnail_component().map(|r| r.id), Some(a.id()));
    }

    #[test]
    fn locked_items_are_hidden_until_unlocked() {
        let mut item = Item::new();
        item.record.status = ItemStatus::Nominal;
        assert!(item.is_visible());
        item.record.lock_password = Some("hash".into());
        assert!(!item.is_visible());
        item.flags.temporarily_unlocked = true;
        assert!(item.is_visible());
        item.record.status = ItemStatus::Deleted;
        assert!(!item.is_visible());
    }

    #[test]
    fn rearm_replaces_cancelled_token() {
        let component = Component::new(Uuid::new_v4(), uti::DATA, 0);
        component.cancel();
        assert!(component.is_cancelled());
        component.rearm();
        assert!(!component.is_cancelled());
    }
}
