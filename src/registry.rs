//! Live component lookup.
//!
//! Drag-and-drop and other in-process consumers resolve a component id back
//! to the live [`Component`] without owning it. The registry holds only weak
//! references and every mutation goes through one mutex. Entries are evicted
//! explicitly when a component is discarded; a lookup that finds a dead weak
//! reference also drops it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use uuid::Uuid;

use crate::models::Component;

#[derive(Default)]
pub struct ComponentRegistry {
    entries: Mutex<HashMap<Uuid, Weak<Component>>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Uuid, Weak<Component>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn register(&self, component: &Arc<Component>) {
        self.entries()
            .insert(component.id(), Arc::downgrade(component));
    }

    pub fn lookup(&self, id: Uuid) -> Option<Arc<Component>> {
        let mut entries = self.entries();
        let live = entries.get(&id).and_then(Weak::upgrade);
        if live.is_none() {
            entries.remove(&id);
        }
        live
    }

    pub fn evict(&self, id: Uuid) {
        self.entries().remove(&id);
    }

    /// Drop every entry belonging to `parent_id`.
    pub fn evict_item(&self, parent_id: Uuid) {
        self.entries().retain(|_, weak| {
            weak.upgrade()
                .is_some_and(|component| component.parent_id() != parent_id)
        });
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uti;

    #[test]
    fn lookup_returns_live_components() {
        let registry = ComponentRegistry::new();
        let component = Component::new(Uuid::new_v4(), uti::TEXT, 0);
        registry.register(&component);
        let found = registry.lookup(component.id()).unwrap();
        assert!(Arc::ptr_eq(&found, &component));
    }

    #[test]
    fn registry_does_not_keep_components_alive() {
        let registry = ComponentRegistry::new();
        let component = Component::new(Uuid::new_v4(), uti::TEXT, 0);
        let id = component.id();
        registry.register(&component);
        drop(component);
        assert!(registry.lookup(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn explicit_eviction() {
        let registry = ComponentRegistry::new();
        let parent = Uuid::new_v4();
        let a = Component::new(parent, uti::TEXT, 0);
        let b = Component::new(parent, uti::IMAGE, 1);
        let other = Component::new(Uuid::new_v4(), uti::URL, 0);
        for c in [&a, &b, &other] {
            registry.register(c);
        }
        registry.evict(a.id());
        assert!(registry.lookup(a.id()).is_none());
        registry.evict_item(parent);
        assert!(registry.lookup(b.id()).is_none());
        assert!(registry.lookup(other.id()).is_some());
        assert_eq!(registry.len(), 1);
    }
}
