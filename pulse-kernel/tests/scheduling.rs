use devkit::{fast_cadence, fast_options, wait_until, Behavior, TestHarness, FAST_PERIOD};
use pulse_kernel::error::ScheduleError;
use pulse_kernel::scheduler::SettingsUpdate;
use pulse_kernel::store::RetentionStore;
use pulse_kernel::MetricKind;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_start_runs_only_essentials() {
    let harness = TestHarness::new().unwrap().started();
    for kind in MetricKind::essential() {
        assert!(harness.wait_for_reading(kind, WAIT).await.is_some(), "{kind} never sampled");
    }
    assert_eq!(harness.kernel.scheduler.live_tasks(), 3);
    for kind in MetricKind::optional() {
        assert!(!harness.kernel.scheduler.is_running(kind));
        assert_eq!(harness.probe.calls(kind), 0);
    }
}

#[tokio::test]
async fn test_enable_is_duplicate_free() {
    let harness = TestHarness::new().unwrap().started();
    let scheduler = &harness.kernel.scheduler;

    assert!(scheduler.enable(MetricKind::Disk, FAST_PERIOD));
    assert!(!scheduler.enable(MetricKind::Disk, FAST_PERIOD));
    assert!(!scheduler.enable(MetricKind::Disk, FAST_PERIOD));
    assert_eq!(scheduler.live_tasks(), 4);

    tokio::time::sleep(Duration::from_millis(400)).await;
    // une seule tâche : au plus un appel par période (+ le tick immédiat et un peu de marge)
    let calls = harness.probe.calls(MetricKind::Disk);
    assert!(calls >= 1);
    assert!(calls <= 400 / 40 + 3, "disk sampled {calls} times, duplicate task?");

    // nouvelle période = remplacement, toujours une seule tâche
    assert!(scheduler.enable(MetricKind::Disk, Duration::from_millis(80)));
    assert_eq!(scheduler.live_tasks(), 4);
    let status = scheduler
        .entries()
        .into_iter()
        .find(|e| e.kind == MetricKind::Disk)
        .unwrap();
    assert_eq!(status.period_ms, 80);
}

#[tokio::test]
async fn test_essentials_are_never_cancelled() {
    let harness = TestHarness::new().unwrap().started();
    let scheduler = &harness.kernel.scheduler;

    assert_eq!(scheduler.disable(MetricKind::Cpu), Err(ScheduleError::Essential(MetricKind::Cpu)));
    assert_eq!(
        SettingsUpdate::new([(MetricKind::Gpu, false)]),
        Err(ScheduleError::Essential(MetricKind::Gpu))
    );

    // requête mixte rejetée en bloc : network ne démarre pas
    let err = scheduler
        .apply_settings(&json!({"networkEnabled": true, "memory": false}))
        .unwrap_err();
    assert_eq!(err, ScheduleError::Essential(MetricKind::Memory));
    assert!(!scheduler.is_running(MetricKind::Network));

    // nommer un essentiel à true ne change rien
    let changed = scheduler.apply_settings(&json!({"cpu": true})).unwrap();
    assert!(changed.is_empty());

    for kind in MetricKind::essential() {
        assert!(scheduler.is_running(kind));
    }
}

#[tokio::test]
async fn test_failure_keeps_last_good_reading() {
    let harness = TestHarness::new().unwrap().started();
    let kernel = &harness.kernel;
    harness.wait_for_reading(MetricKind::Memory, WAIT).await.unwrap();

    harness.probe.set(MetricKind::Memory, Behavior::Fail("meminfo unreadable".into()));
    let failures = kernel.scheduler.failures().clone();
    assert!(wait_until(WAIT, || failures.consecutive(MetricKind::Memory) >= 2).await);

    let frozen = kernel.cache.latest(MetricKind::Memory).unwrap();
    let stored = kernel.store.count(MetricKind::Memory).unwrap();
    let cpu_calls = harness.probe.calls(MetricKind::Cpu);

    assert!(wait_until(WAIT, || failures.consecutive(MetricKind::Memory) >= 5).await);
    assert_eq!(*kernel.cache.latest(MetricKind::Memory).unwrap(), *frozen);
    assert_eq!(kernel.store.count(MetricKind::Memory).unwrap(), stored);
    // les autres types continuent
    assert!(harness.probe.calls(MetricKind::Cpu) > cpu_calls);
    assert!(kernel.scheduler.is_running(MetricKind::Memory));

    // retour à la normale
    harness.probe.set(MetricKind::Memory, Behavior::Ok);
    assert!(wait_until(WAIT, || failures.consecutive(MetricKind::Memory) == 0).await);
    let recovered = kernel.cache.latest(MetricKind::Memory).unwrap();
    assert!(recovered.timestamp >= frozen.timestamp);
}

#[tokio::test]
async fn test_unavailable_gpu_stays_empty() {
    let harness = TestHarness::new().unwrap();
    harness.probe.set(MetricKind::Gpu, Behavior::Unavailable("no DRM card".into()));
    let harness = harness.started();

    harness.wait_for_reading(MetricKind::Cpu, WAIT).await.unwrap();
    let failures = harness.kernel.scheduler.failures().clone();
    assert!(wait_until(WAIT, || failures.consecutive(MetricKind::Gpu) >= 2).await);

    let snapshot = harness.kernel.cache.get();
    assert!(snapshot[&MetricKind::Gpu].is_none());
    assert!(snapshot[&MetricKind::Cpu].is_some());
    assert_eq!(harness.kernel.store.count(MetricKind::Gpu).unwrap(), 0);
    assert!(harness.kernel.scheduler.is_running(MetricKind::Gpu));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hung_probe_does_not_stall_other_kinds() {
    let store = Arc::new(RetentionStore::open_in_memory().unwrap());
    let mut options = fast_options();
    options.cadence = fast_cadence().with_timeout(MetricKind::Gpu, Duration::from_millis(30));
    let harness = TestHarness::with_store(store, options);
    harness.probe.set(MetricKind::Gpu, Behavior::Hang(Duration::from_millis(400)));
    let harness = harness.started();

    let failures = harness.kernel.scheduler.failures().clone();
    assert!(wait_until(WAIT, || failures.consecutive(MetricKind::Gpu) >= 3).await);
    let cpu_before = harness.probe.calls(MetricKind::Cpu);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(harness.probe.calls(MetricKind::Cpu) > cpu_before);

    // l'appel bloqué n'est jamais doublé : pas plus d'un thread par tranche de 400 ms
    assert!(harness.probe.calls(MetricKind::Gpu) <= 3);
    assert!(harness.kernel.cache.latest(MetricKind::Gpu).is_none());
}

#[tokio::test]
async fn test_network_toggle_end_to_end() {
    let harness = TestHarness::new().unwrap().started();
    let scheduler = &harness.kernel.scheduler;
    harness.wait_for_reading(MetricKind::Cpu, WAIT).await.unwrap();
    assert!(harness.kernel.cache.get()[&MetricKind::Network].is_none());

    let changed = scheduler.apply_settings(&json!({"networkEnabled": true})).unwrap();
    assert_eq!(changed, vec![(MetricKind::Network, true)]);
    assert!(scheduler.settings().is_enabled(MetricKind::Network));

    let reading = harness.wait_for_reading(MetricKind::Network, WAIT).await.unwrap();
    assert_eq!(reading.kind, MetricKind::Network);
    let store = harness.kernel.store.clone();
    assert!(wait_until(WAIT, || store.count(MetricKind::Network).unwrap_or(0) >= 2).await);

    let history = harness.kernel.query.history(MetricKind::Network, 60_000).await.unwrap();
    assert!(history.len() >= 2);
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    // désactivation : plus aucun appel, l'historique reste
    let changed = scheduler.apply_settings(&json!({"networkEnabled": false})).unwrap();
    assert_eq!(changed, vec![(MetricKind::Network, false)]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let calls = harness.probe.calls(MetricKind::Network);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.probe.calls(MetricKind::Network), calls);
    assert!(store.count(MetricKind::Network).unwrap() >= 2);

    // déjà désactivé : aucun changement
    assert!(scheduler.apply_settings(&json!({"network": false})).unwrap().is_empty());
}

#[tokio::test]
async fn test_direct_disable_is_visible_to_reconfigure() {
    let harness = TestHarness::new().unwrap().started();
    let scheduler = &harness.kernel.scheduler;

    scheduler.apply_settings(&json!({"network": true})).unwrap();
    assert!(scheduler.disable(MetricKind::Network).unwrap());
    assert!(!scheduler.settings().is_enabled(MetricKind::Network));

    // le drapeau a suivi la tâche : la réactivation redémarre bien l'échantillonnage
    let changed = scheduler.apply_settings(&json!({"network": true})).unwrap();
    assert_eq!(changed, vec![(MetricKind::Network, true)]);
    assert!(scheduler.is_running(MetricKind::Network));
    assert!(harness.wait_for_reading(MetricKind::Network, WAIT).await.is_some());
}

#[tokio::test]
async fn test_direct_enable_can_be_stopped_by_reconfigure() {
    let harness = TestHarness::new().unwrap().started();
    let scheduler = &harness.kernel.scheduler;

    assert!(scheduler.enable(MetricKind::Disk, FAST_PERIOD));
    assert!(scheduler.settings().is_enabled(MetricKind::Disk));

    let changed = scheduler.apply_settings(&json!({"disk": false})).unwrap();
    assert_eq!(changed, vec![(MetricKind::Disk, false)]);
    assert!(!scheduler.is_running(MetricKind::Disk));
    assert_eq!(scheduler.live_tasks(), 3);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let calls = harness.probe.calls(MetricKind::Disk);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.probe.calls(MetricKind::Disk), calls);
}

#[tokio::test]
async fn test_reconfigure_preserves_unrelated_tasks() {
    let store = Arc::new(RetentionStore::open_in_memory().unwrap());
    let mut options = fast_options();
    options.cadence = fast_cadence().with_period(MetricKind::Disk, Duration::from_secs(5));
    let harness = TestHarness::with_store(store, options).started();
    let scheduler = &harness.kernel.scheduler;

    scheduler.apply_settings(&json!({"diskEnabled": true})).unwrap();
    harness.wait_for_reading(MetricKind::Disk, WAIT).await.unwrap();
    assert_eq!(harness.probe.calls(MetricKind::Disk), 1);

    // une tâche relancée referait son tick immédiat
    let changed = scheduler
        .apply_settings(&json!({"networkEnabled": true, "processesEnabled": true, "diskEnabled": true}))
        .unwrap();
    assert_eq!(changed.len(), 2);
    harness.wait_for_reading(MetricKind::Processes, WAIT).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.probe.calls(MetricKind::Disk), 1);
    assert_eq!(scheduler.live_tasks(), 6);

    // systemEnabled couvre system, usb et audio
    let changed = scheduler.apply_settings(&json!({"systemEnabled": true})).unwrap();
    assert_eq!(
        changed,
        vec![(MetricKind::System, true), (MetricKind::Usb, true), (MetricKind::Audio, true)]
    );
    assert_eq!(scheduler.live_tasks(), 9);
    assert_eq!(harness.probe.calls(MetricKind::Disk), 1);
}

#[tokio::test]
async fn test_coalesced_push_reaches_subscribers() {
    let harness = TestHarness::new().unwrap();
    let mut sub = harness.kernel.broadcaster.subscribe();
    let harness = harness.started();

    let snapshot = tokio::time::timeout(WAIT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(snapshot.len(), MetricKind::ALL.len());
    assert!(snapshot.values().any(Option::is_some));
    assert!(harness.kernel.broadcaster.push_count() >= 1);
}

#[tokio::test]
async fn test_shutdown_stops_all_sampling() {
    let mut harness = TestHarness::new().unwrap().started();
    harness.wait_for_reading(MetricKind::Cpu, WAIT).await.unwrap();

    harness.kernel.shutdown();
    assert_eq!(harness.kernel.scheduler.live_tasks(), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let calls = harness.probe.total_calls();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.probe.total_calls(), calls);
}
