/**
 * ÉTAT PARTAGÉ - Primitives de partage et cache des dernières mesures
 *
 * - Shared<T> : Arc<Mutex<T>> utilisé pour l'état du scheduler
 * - SnapshotCache : une case par type de métrique, remplacée d'un bloc.
 *   Un lecteur voit soit l'ancienne mesure soit la nouvelle, jamais un mélange.
 */

use crate::models::{MetricKind, Reading, Snapshot};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

#[derive(Clone, Default)]
pub struct SnapshotCache {
    slots: Arc<RwLock<HashMap<MetricKind, Arc<Reading>>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vue agrégée : tous les types, `None` si jamais mesuré
    pub fn get(&self) -> Snapshot {
        let slots = self.slots.read();
        MetricKind::ALL
            .into_iter()
            .map(|kind| (kind, slots.get(&kind).map(|r| (**r).clone())))
            .collect()
    }

    pub fn latest(&self, kind: MetricKind) -> Option<Arc<Reading>> {
        self.slots.read().get(&kind).cloned()
    }

    pub fn set(&self, reading: Reading) {
        let reading = Arc::new(reading);
        self.slots.write().insert(reading.kind, reading);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Fields;

    #[test]
    fn test_cache_starts_empty() {
        let cache = SnapshotCache::new();
        let snapshot = cache.get();
        assert_eq!(snapshot.len(), MetricKind::ALL.len());
        assert!(snapshot.values().all(Option::is_none));
    }

    #[test]
    fn test_set_replaces_one_slot() {
        let cache = SnapshotCache::new();
        cache.set(Reading::new(MetricKind::Cpu, Fields::new()));
        let mut fields = Fields::new();
        fields.insert("usage".into(), crate::models::FieldValue::Number(50.0));
        cache.set(Reading::new(MetricKind::Cpu, fields));

        let snapshot = cache.get();
        assert_eq!(snapshot[&MetricKind::Cpu].as_ref().unwrap().number("usage"), Some(50.0));
        assert!(snapshot[&MetricKind::Memory].is_none());
    }
}
