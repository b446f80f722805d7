//! Opaque sync descriptors and the out-of-band dirty flag.
//!
//! The remote sync collaborator owns the descriptor bytes; this module only
//! stores them (`ck-record` per item and per component, `ck-share` per item)
//! and tracks whether the record needs pushing.
//!
//! The dirty flag is a sidecar marker next to the descriptor, so checking it
//! never reads the descriptor itself:
//!
//! | descriptor | `.clean` marker | needs push |
//! |------------|-----------------|------------|
//! | absent     | any             | yes        |
//! | present    | absent          | yes        |
//! | present    | present         | no         |
//!
//! All writes for one item go through that item's async mutex.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::store::BlobStore;

const RECORD_FILE: &str = "ck-record";
const SHARE_FILE: &str = "ck-share";
const CLEAN_SUFFIX: &str = ".clean";

/// Which descriptor slot of an item to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorSlot {
    Item,
    Share,
    Component(Uuid),
}

pub struct SyncState {
    store: BlobStore,
    writers: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl SyncState {
    pub fn new(store: BlobStore) -> Self {
        Self {
            store,
            writers: Mutex::new(HashMap::new()),
        }
    }

    fn path(&self, item_id: Uuid, slot: DescriptorSlot) -> PathBuf {
        match slot {
            DescriptorSlot::Item => self.store.item_dir(item_id).join(RECORD_FILE),
            DescriptorSlot::Share => self.store.item_dir(item_id).join(SHARE_FILE),
            DescriptorSlot::Component(id) => {
                self.store.component_dir(item_id, id).join(RECORD_FILE)
            }
        }
    }

    fn writer(&self, item_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut writers = match self.writers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        writers.entry(item_id).or_default().clone()
    }

    /// Drop the writer lock of an item that no longer exists.
    pub fn forget(&self, item_id: Uuid) {
        let mut writers = match self.writers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        writers.remove(&item_id);
    }

    pub async fn descriptor(&self, item_id: Uuid, slot: DescriptorSlot) -> Result<Option<Vec<u8>>> {
        let path = self.path(item_id, slot);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub async fn has_descriptor(&self, item_id: Uuid, slot: DescriptorSlot) -> bool {
        tokio::fs::try_exists(self.path(item_id, slot))
            .await
            .unwrap_or(false)
    }

    /// Store (or with `None`, delete) a descriptor.
    ///
    /// Storing a record descriptor means the remote side just acknowledged it,
    /// so the slot becomes clean. Deleting one makes it dirty again.
    pub async fn set_descriptor(
        &self,
        item_id: Uuid,
        slot: DescriptorSlot,
        bytes: Option<&[u8]>,
    ) -> Result<()> {
        let writer = self.writer(item_id);
        let _guard = writer.lock().await;
        let path = self.path(item_id, slot);
        match bytes {
            Some(bytes) => {
                if let Some(dir) = path.parent() {
                    tokio::fs::create_dir_all(dir)
                        .await
                        .with_context(|| format!("Failed to create {}", dir.display()))?;
                }
                tokio::fs::write(&path, bytes)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                if slot != DescriptorSlot::Share {
                    write_marker(&path, true).await?;
                }
            }
            None => {
                remove_if_present(&path).await?;
                write_marker(&path, false).await?;
            }
        }
        Ok(())
    }

    /// Whether the slot's record has local changes the remote has not seen.
    pub async fn needs_push(&self, item_id: Uuid, slot: DescriptorSlot) -> bool {
        let path = self.path(item_id, slot);
        let has_descriptor = tokio::fs::try_exists(&path).await.unwrap_or(false);
        if !has_descriptor {
            return true;
        }
        !tokio::fs::try_exists(marker_path(&path))
            .await
            .unwrap_or(false)
    }

    pub async fn set_needs_push(
        &self,
        item_id: Uuid,
        slot: DescriptorSlot,
        needs_push: bool,
    ) -> Result<()> {
        let writer = self.writer(item_id);
        let _guard = writer.lock().await;
        write_marker(&self.path(item_id, slot), !needs_push).await
    }

    /// Flag an item and all of the given components as locally modified.
    pub async fn mark_modified(&self, item_id: Uuid, component_ids: &[Uuid]) -> Result<()> {
        let writer = self.writer(item_id);
        let _guard = writer.lock().await;
        write_marker(&self.path(item_id, DescriptorSlot::Item), false).await?;
        for id in component_ids {
            write_marker(&self.path(item_id, DescriptorSlot::Component(*id)), false).await?;
        }
        Ok(())
    }
}

fn marker_path(descriptor: &Path) -> PathBuf {
    let mut name = descriptor
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(CLEAN_SUFFIX);
    descriptor.with_file_name(name)
}

async fn write_marker(descriptor: &Path, clean: bool) -> Result<()> {
    let marker = marker_path(descriptor);
    if clean {
        if let Some(dir) = marker.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        tokio::fs::write(&marker, b"")
            .await
            .with_context(|| format!("Failed to write {}", marker.display()))
    } else {
        remove_if_present(&marker).await
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn state(tmp: &TempDir) -> SyncState {
        SyncState::new(BlobStore::new(tmp.path()))
    }

    #[tokio::test]
    async fn missing_descriptor_means_dirty() {
        let tmp = TempDir::new().unwrap();
        let sync = state(&tmp);
        let item = Uuid::new_v4();
        assert!(sync.needs_push(item, DescriptorSlot::Item).await);
        assert!(!sync.has_descriptor(item, DescriptorSlot::Item).await);
        // a stray clean marker without a descriptor still reads dirty
        sync.set_needs_push(item, DescriptorSlot::Item, false)
            .await
            .unwrap();
        assert!(sync.needs_push(item, DescriptorSlot::Item).await);
    }

    #[tokio::test]
    async fn storing_a_descriptor_clears_dirty() {
        let tmp = TempDir::new().unwrap();
        let sync = state(&tmp);
        let (item, comp) = (Uuid::new_v4(), Uuid::new_v4());
        let slot = DescriptorSlot::Component(comp);

        sync.set_descriptor(item, slot, Some(b"opaque")).await.unwrap();
        assert!(!sync.needs_push(item, slot).await);
        assert_eq!(
            sync.descriptor(item, slot).await.unwrap().as_deref(),
            Some(&b"opaque"[..])
        );

        sync.mark_modified(item, &[comp]).await.unwrap();
        assert!(sync.needs_push(item, slot).await);
        assert_eq!(
            sync.descriptor(item, slot).await.unwrap().as_deref(),
            Some(&b"opaque"[..])
        );

        sync.set_descriptor(item, slot, None).await.unwrap();
        assert!(sync.needs_push(item, slot).await);
        assert_eq!(sync.descriptor(item, slot).await.unwrap(), None);
    }

    #[tokio::test]
    async fn share_descriptor_is_stored_at_item_level() {
        let tmp = TempDir::new().unwrap();
        let sync = state(&tmp);
        let item = Uuid::new_v4();
        sync.set_descriptor(item, DescriptorSlot::Share, Some(b"share"))
            .await
            .unwrap();
        assert!(tmp.path().join(item.to_string()).join("ck-share").exists());
        assert!(sync.needs_push(item, DescriptorSlot::Item).await);
    }

    #[tokio::test]
    async fn concurrent_flag_flips_are_serialized() {
        let tmp = TempDir::new().unwrap();
        let sync = Arc::new(state(&tmp));
        let item = Uuid::new_v4();
        sync.set_descriptor(item, DescriptorSlot::Item, Some(b"r"))
            .await
            .unwrap();
        let mut handles = Vec::new();
        for i in 0..16 {
            let sync = sync.clone();
            handles.push(tokio::spawn(async move {
                sync.set_needs_push(item, DescriptorSlot::Item, i % 2 == 0)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        sync.set_needs_push(item, DescriptorSlot::Item, false)
            .await
            .unwrap();
        assert!(!sync.needs_push(item, DescriptorSlot::Item).await);
    }
}
