use devkit::{fast_options, wait_until, TestHarness};
use pulse_kernel::query::DEFAULT_RANGE_MS;
use pulse_kernel::store::RetentionStore;
use pulse_kernel::MetricKind;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("monitoring.db");

    let last_before = {
        let store = Arc::new(RetentionStore::open(&path).unwrap());
        let mut harness = TestHarness::with_store(store.clone(), fast_options()).started();
        assert!(wait_until(WAIT, || store.count(MetricKind::Cpu).unwrap_or(0) >= 3).await);
        harness.kernel.shutdown();
        // laisse une écriture en vol se terminer
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.last_timestamp(MetricKind::Cpu).unwrap().unwrap()
    };

    let store = Arc::new(RetentionStore::open(&path).unwrap());
    let before = store.count(MetricKind::Cpu).unwrap();
    assert!(before >= 3);

    let harness = TestHarness::with_store(store.clone(), fast_options()).started();
    let history = harness
        .kernel
        .query
        .history(MetricKind::Cpu, DEFAULT_RANGE_MS)
        .await
        .unwrap();
    assert!(history.len() as u64 >= before);

    assert!(wait_until(WAIT, || store.count(MetricKind::Cpu).unwrap_or(0) >= before + 2).await);
    let records = store
        .query(MetricKind::Cpu, last_before - time::Duration::hours(1))
        .unwrap();
    // séquence croissante par identifiant et par horodatage à travers le redémarrage
    assert!(records.windows(2).all(|w| w[0].id < w[1].id));
    assert!(records
        .windows(2)
        .all(|w| w[0].reading.timestamp <= w[1].reading.timestamp));
}

#[tokio::test]
async fn test_disabled_kind_keeps_its_history() {
    let harness = TestHarness::new().unwrap().started();
    let scheduler = &harness.kernel.scheduler;
    scheduler.enable(MetricKind::Disk, devkit::FAST_PERIOD);

    let store = harness.kernel.store.clone();
    assert!(wait_until(WAIT, || store.count(MetricKind::Disk).unwrap_or(0) >= 2).await);
    scheduler.disable(MetricKind::Disk).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stored = store.count(MetricKind::Disk).unwrap();
    let history = harness
        .kernel
        .query
        .history(MetricKind::Disk, DEFAULT_RANGE_MS)
        .await
        .unwrap();
    assert_eq!(history.len() as u64, stored);
}
