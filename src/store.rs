//! Blob and thumbnail storage.
//!
//! Every component owns a directory under its item:
//!
//! ```text
//! <root>/
//!   <itemId>/
//!     item.json            item record + component records
//!     ck-record            (sync_state)
//!     ck-share             (sync_state)
//!     <componentId>/
//!       blob               raw content bytes (always a file; folders are zipped first)
//!       thumbnail          rendered icon (PNG)
//!       ck-record          (sync_state)
//! ```
//!
//! This module is plain file I/O. Callers guarantee a single writer per
//! component id.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::models::{Component, ComponentRecord, Item, ItemRecord, ItemStatus};

const BLOB_FILE: &str = "blob";
const THUMBNAIL_FILE: &str = "thumbnail";
const ITEM_FILE: &str = "item.json";

/// Serialized form of `item.json`.
#[derive(Debug, Serialize, Deserialize)]
struct StoredItem {
    item: ItemRecord,
    components: Vec<ComponentRecord>,
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn item_dir(&self, item_id: Uuid) -> PathBuf {
        self.root.join(item_id.to_string())
    }

    pub fn component_dir(&self, item_id: Uuid, component_id: Uuid) -> PathBuf {
        self.item_dir(item_id).join(component_id.to_string())
    }

    pub fn blob_path(&self, item_id: Uuid, component_id: Uuid) -> PathBuf {
        self.component_dir(item_id, component_id).join(BLOB_FILE)
    }

    pub fn thumbnail_path(&self, item_id: Uuid, component_id: Uuid) -> PathBuf {
        self.component_dir(item_id, component_id).join(THUMBNAIL_FILE)
    }

    // ─── Blobs ──────────────────────────────────────────────────────────

    pub async fn write_blob(&self, item_id: Uuid, component_id: Uuid, bytes: &[u8]) -> Result<()> {
        let path = self.blob_path(item_id, component_id);
        write_file(&path, bytes).await
    }

    pub async fn read_blob(&self, item_id: Uuid, component_id: Uuid) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(item_id, component_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read blob: {}", path.display())),
        }
    }

    pub async fn has_blob(&self, item_id: Uuid, component_id: Uuid) -> bool {
        tokio::fs::try_exists(self.blob_path(item_id, component_id))
            .await
            .unwrap_or(false)
    }

    /// Remove the blob if present.
    pub async fn remove_blob(&self, item_id: Uuid, component_id: Uuid) -> Result<()> {
        remove_path(&self.blob_path(item_id, component_id)).await
    }

    /// Size of the blob in bytes, or 0 when there is none.
    pub async fn blob_size(&self, item_id: Uuid, component_id: Uuid) -> u64 {
        tokio::fs::metadata(self.blob_path(item_id, component_id))
            .await
            .map(|meta| meta.len())
            .unwrap_or(0)
    }

    // ─── Thumbnails ─────────────────────────────────────────────────────

    pub async fn write_thumbnail(
        &self,
        item_id: Uuid,
        component_id: Uuid,
        png: &[u8],
    ) -> Result<()> {
        write_file(&self.thumbnail_path(item_id, component_id), png).await
    }

    pub async fn read_thumbnail(
        &self,
        item_id: Uuid,
        component_id: Uuid,
    ) -> Result<Option<Vec<u8>>> {
        let path = self.thumbnail_path(item_id, component_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read thumbnail: {}", path.display()))
            }
        }
    }

    pub async fn remove_thumbnail(&self, item_id: Uuid, component_id: Uuid) -> Result<()> {
        remove_path(&self.thumbnail_path(item_id, component_id)).await
    }

    // ─── Directories ────────────────────────────────────────────────────

    pub async fn remove_component(&self, item_id: Uuid, component_id: Uuid) -> Result<()> {
        remove_path(&self.component_dir(item_id, component_id)).await
    }

    pub async fn remove_item(&self, item_id: Uuid) -> Result<()> {
        remove_path(&self.item_dir(item_id)).await
    }

    // ─── Item records ───────────────────────────────────────────────────

    pub async fn save_item(&self, item: &Item) -> Result<()> {
        let stored = StoredItem {
            item: item.record.clone(),
            components: item.component_records(),
        };
        let json = serde_json::to_vec_pretty(&stored).context("Failed to serialize item")?;
        let path = self.item_dir(item.id()).join(ITEM_FILE);
        let tmp = path.with_extension("json.tmp");
        write_file(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))
    }

    pub async fn load_item(&self, item_id: Uuid) -> Result<Option<Item>> {
        let path = self.item_dir(item_id).join(ITEM_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let stored: StoredItem = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        let mut record = stored.item;
        // An ingest that was interrupted by a restart has to run again.
        if record.status == ItemStatus::IsBeingIngested {
            record.status = ItemStatus::NeedsIngest;
        }
        let components = stored
            .components
            .into_iter()
            .map(Component::from_record)
            .collect();
        Ok(Some(Item::from_parts(record, components)))
    }

    /// Every item with a readable record under the root. Unreadable records
    /// are logged and skipped.
    pub async fn load_all(&self) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(items),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to list {}", self.root.display()))
            }
        };
        while let Some(entry) = entries.next_entry().await? {
            let Some(item_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
            else {
                continue;
            };
            match self.load_item(item_id).await {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                Err(e) => tracing::warn!(item = %item_id, error = %e, "skipping unreadable item"),
            }
        }
        items.sort_by_key(|item| item.record.created_at);
        Ok(items)
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

async fn remove_path(path: &Path) -> Result<()> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("Failed to stat {}", path.display())),
    };
    let result = if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    result.with_context(|| format!("Failed to remove {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn blob_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path());
        let (item, comp) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(!store.has_blob(item, comp).await);
        assert_eq!(store.read_blob(item, comp).await.unwrap(), None);

        store.write_blob(item, comp, b"hello").await.unwrap();
        assert!(store.has_blob(item, comp).await);
        assert_eq!(store.blob_size(item, comp).await, 5);
        assert_eq!(
            store.read_blob(item, comp).await.unwrap().as_deref(),
            Some(&b"hello"[..])
        );

        store.remove_blob(item, comp).await.unwrap();
        assert!(!store.has_blob(item, comp).await);
        // removing twice is fine
        store.remove_blob(item, comp).await.unwrap();
    }

    #[tokio::test]
    async fn blob_size_is_the_file_length() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path());
        let (item, comp) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(store.blob_size(item, comp).await, 0);
        store.write_blob(item, comp, &[0u8; 17]).await.unwrap();
        assert!(store.blob_path(item, comp).is_file());
        assert_eq!(store.blob_size(item, comp).await, 17);
    }

    #[tokio::test]
    async fn item_records_survive_reload() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path());
        let mut item = Item::new();
        item.record.note = "remember".into();
        item.record.status = ItemStatus::IsBeingIngested;
        let component = Component::new(item.id(), "public.utf8-plain-text", 0);
        component.update(|r| r.set_title("hi", 9));
        item.components.push(component.clone());
        store.save_item(&item).await.unwrap();

        let loaded = store.load_item(item.id()).await.unwrap().unwrap();
        assert_eq!(loaded.record.note, "remember");
        assert_eq!(loaded.record.status, ItemStatus::NeedsIngest);
        assert_eq!(loaded.components.len(), 1);
        assert_eq!(loaded.components[0].id(), component.id());
        assert_eq!(
            loaded.components[0].snapshot().display_title.as_deref(),
            Some("hi")
        );

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn removing_an_item_drops_its_tree() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path());
        let (item, comp) = (Uuid::new_v4(), Uuid::new_v4());
        store.write_blob(item, comp, b"x").await.unwrap();
        store.write_thumbnail(item, comp, b"png").await.unwrap();
        store.remove_item(item).await.unwrap();
        assert!(!store.item_dir(item).exists());
    }
}
