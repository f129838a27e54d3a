//! Snapshot cache for one resolved type.

use std::sync::Arc;

use kawait_core::{SourceEvent, WatchedObject};
use rustc_hash::FxHashMap;

// Cluster-scoped objects live under the empty namespace key.
type ByName = FxHashMap<String, Arc<WatchedObject>>;

/// Immutable view of a type's cache at one epoch.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    pub epoch: u64,
    objects: FxHashMap<String, ByName>,
}

impl CacheSnapshot {
    pub fn get(&self, namespace: Option<&str>, name: &str) -> Option<&Arc<WatchedObject>> {
        self.objects.get(namespace.unwrap_or(""))?.get(name)
    }

    pub fn namespace(&self, namespace: Option<&str>) -> impl Iterator<Item = &Arc<WatchedObject>> {
        self.objects.get(namespace.unwrap_or("")).into_iter().flat_map(|m| m.values())
    }

    pub fn len(&self) -> usize {
        self.objects.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applies source events in delivery order. Owned by exactly one sync task.
#[derive(Debug, Default)]
pub struct CacheBuilder {
    epoch: u64,
    objects: FxHashMap<String, ByName>,
}

impl CacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Apply a batch; the epoch advances once per batch.
    pub fn apply(&mut self, batch: Vec<SourceEvent>) {
        for ev in batch {
            match ev {
                SourceEvent::Applied(o) => self.insert(o),
                SourceEvent::Deleted(o) => {
                    let ns = o.namespace.as_deref().unwrap_or("");
                    if let Some(m) = self.objects.get_mut(ns) {
                        m.remove(&o.name);
                        if m.is_empty() {
                            self.objects.remove(ns);
                        }
                    }
                }
                SourceEvent::Restarted(list) => {
                    self.objects.clear();
                    for o in list {
                        self.insert(o);
                    }
                }
            }
        }
        self.epoch = self.epoch.saturating_add(1);
    }

    fn insert(&mut self, o: WatchedObject) {
        let ns = o.namespace.clone().unwrap_or_default();
        self.objects.entry(ns).or_default().insert(o.name.clone(), Arc::new(o));
    }

    pub fn freeze(&self) -> Arc<CacheSnapshot> {
        Arc::new(CacheSnapshot { epoch: self.epoch, objects: self.objects.clone() })
    }
}
