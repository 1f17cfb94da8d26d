/**
 * QUERY SERVICE - Lecture de l'historique
 *
 * history(kind, range_ms) = store.query(kind, now - range_ms).
 * Chaque requête tourne sur le pool bloquant ; plusieurs types demandés
 * par un même client partent en parallèle, sans verrou propre au service.
 * Un échec de lecture remonte en erreur explicite, jamais en liste vide.
 */

use crate::error::{QueryError, StoreError};
use crate::models::{MetricKind, Reading};
use crate::store::RetentionStore;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;

/// Fenêtre par défaut : une heure
pub const DEFAULT_RANGE_MS: i64 = 3_600_000;

#[derive(Clone)]
pub struct QueryService {
    store: Arc<RetentionStore>,
}

impl QueryService {
    pub fn new(store: Arc<RetentionStore>) -> Self {
        Self { store }
    }

    pub async fn history(&self, kind: MetricKind, range_ms: i64) -> Result<Vec<Reading>, QueryError> {
        // négatif ou avant l'an -9999 : rejeté plutôt que paniquer dans `time`
        let since = (range_ms >= 0)
            .then(|| OffsetDateTime::now_utc().checked_sub(time::Duration::milliseconds(range_ms)))
            .flatten()
            .ok_or(QueryError::InvalidRange(range_ms))?;
        let store = self.store.clone();
        let records = tokio::task::spawn_blocking(move || store.query(kind, since))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;
        Ok(records.into_iter().map(|r| r.reading).collect())
    }

    /// Historique d'un seul périphérique (disque ou interface réseau).
    /// Les champs `disk.<name>.x` deviennent `x` ; les mesures sans ce périphérique sont écartées.
    pub async fn device_history(
        &self,
        kind: MetricKind,
        range_ms: i64,
        name: &str,
    ) -> Result<Vec<Reading>, QueryError> {
        let group = device_group(kind).ok_or(QueryError::NotNarrowable(kind))?;
        let prefix = format!("{group}.{name}.");
        let readings = self.history(kind, range_ms).await?;

        Ok(readings
            .into_iter()
            .filter_map(|reading| {
                let fields: crate::models::Fields = reading
                    .fields
                    .iter()
                    .filter_map(|(key, value)| {
                        key.strip_prefix(&prefix).map(|k| (k.to_string(), value.clone()))
                    })
                    .collect();
                (!fields.is_empty()).then(|| Reading::at(kind, reading.timestamp, fields))
            })
            .collect())
    }

    /// Plusieurs types en parallèle pour un même demandeur
    pub async fn history_many(
        &self,
        kinds: &[MetricKind],
        range_ms: i64,
    ) -> Result<BTreeMap<MetricKind, Vec<Reading>>, QueryError> {
        let results = join_all(kinds.iter().map(|&kind| async move {
            self.history(kind, range_ms).await.map(|readings| (kind, readings))
        }))
        .await;
        results.into_iter().collect()
    }
}

fn device_group(kind: MetricKind) -> Option<&'static str> {
    match kind {
        MetricKind::Disk => Some("disk"),
        MetricKind::Network => Some("iface"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldValue, Fields};

    fn disk_reading(ago_secs: i64, disks: &[(&str, f64)]) -> Reading {
        let mut fields = Fields::new();
        fields.insert("count".into(), FieldValue::Number(disks.len() as f64));
        for (name, used) in disks {
            fields.insert(format!("disk.{name}.used_gb"), FieldValue::Number(*used));
        }
        Reading::at(
            MetricKind::Disk,
            OffsetDateTime::now_utc() - time::Duration::seconds(ago_secs),
            fields,
        )
    }

    #[tokio::test]
    async fn test_history_on_empty_store() {
        let service = QueryService::new(Arc::new(RetentionStore::open_in_memory().unwrap()));
        let readings = service.history(MetricKind::Memory, DEFAULT_RANGE_MS).await.unwrap();
        assert!(readings.is_empty());
    }

    #[tokio::test]
    async fn test_history_respects_range() {
        let store = Arc::new(RetentionStore::open_in_memory().unwrap());
        store.append(&disk_reading(7200, &[("/dev/sda1", 1.0)])).unwrap();
        store.append(&disk_reading(60, &[("/dev/sda1", 2.0)])).unwrap();
        let service = QueryService::new(store);

        let readings = service.history(MetricKind::Disk, DEFAULT_RANGE_MS).await.unwrap();
        assert_eq!(readings.len(), 1);
        assert!(matches!(
            service.history(MetricKind::Disk, -1).await,
            Err(QueryError::InvalidRange(-1))
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_window_is_rejected() {
        let store = Arc::new(RetentionStore::open_in_memory().unwrap());
        store.append(&disk_reading(60, &[("/dev/sda1", 2.0)])).unwrap();
        let service = QueryService::new(store);

        assert!(matches!(
            service.history(MetricKind::Cpu, i64::MAX).await,
            Err(QueryError::InvalidRange(i64::MAX))
        ));
        assert!(matches!(
            service.history_many(&[MetricKind::Cpu, MetricKind::Disk], i64::MAX).await,
            Err(QueryError::InvalidRange(_))
        ));
        // dix ans tiennent encore dans la plage de `time`
        let decade = 10 * 365 * 24 * 3_600_000;
        assert_eq!(service.history(MetricKind::Disk, decade).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_device_history_narrows_fields() {
        let store = Arc::new(RetentionStore::open_in_memory().unwrap());
        store.append(&disk_reading(30, &[("/dev/sda1", 10.0), ("/dev/sdb1", 99.0)])).unwrap();
        store.append(&disk_reading(20, &[("/dev/sdb1", 98.0)])).unwrap();
        store.append(&disk_reading(10, &[("/dev/sda1", 11.0)])).unwrap();
        let service = QueryService::new(store);

        let readings = service
            .device_history(MetricKind::Disk, DEFAULT_RANGE_MS, "/dev/sda1")
            .await
            .unwrap();
        let used: Vec<f64> = readings.iter().filter_map(|r| r.number("used_gb")).collect();
        assert_eq!(used, vec![10.0, 11.0]);
        assert!(readings.iter().all(|r| r.fields.len() == 1));

        assert!(matches!(
            service.device_history(MetricKind::Cpu, DEFAULT_RANGE_MS, "x").await,
            Err(QueryError::NotNarrowable(MetricKind::Cpu))
        ));
    }

    #[tokio::test]
    async fn test_history_many_keeps_kinds_apart() {
        let store = Arc::new(RetentionStore::open_in_memory().unwrap());
        for kind in [MetricKind::Cpu, MetricKind::Cpu, MetricKind::Memory] {
            store.append(&Reading::new(kind, Fields::new())).unwrap();
        }
        let service = QueryService::new(store);

        let kinds = [MetricKind::Cpu, MetricKind::Memory, MetricKind::Network];
        let all = service.history_many(&kinds, DEFAULT_RANGE_MS).await.unwrap();
        assert_eq!(all[&MetricKind::Cpu].len(), 2);
        assert_eq!(all[&MetricKind::Memory].len(), 1);
        assert!(all[&MetricKind::Network].is_empty());
        assert!(all[&MetricKind::Cpu].iter().all(|r| r.kind == MetricKind::Cpu));
    }
}
