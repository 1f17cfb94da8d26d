/*!
Harness de test pour le kernel Pulse

Monte un kernel complet sur une base SQLite en mémoire (ou un fichier
temporaire) avec une sonde scriptable et des cadences courtes, plus les
attentes à échéance utilisées par les tests d'intégration.
*/

use crate::fake_probe::FakeProbe;
use anyhow::Result;
use pulse_kernel::config::Cadence;
use pulse_kernel::models::{MetricKind, Reading};
use pulse_kernel::scheduler::Configuration;
use pulse_kernel::store::RetentionStore;
use pulse_kernel::{http, Kernel, KernelOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

/// Cadence des tests : 40 ms pour tous les types
pub const FAST_PERIOD: Duration = Duration::from_millis(40);

pub struct TestHarness {
    pub kernel: Kernel,
    pub probe: FakeProbe,
}

impl TestHarness {
    /// Kernel non démarré sur une base en mémoire
    pub fn new() -> Result<Self> {
        let store = Arc::new(RetentionStore::open_in_memory()?);
        Ok(Self::with_store(store, fast_options()))
    }

    pub fn with_store(store: Arc<RetentionStore>, options: KernelOptions) -> Self {
        init_tracing();
        let probe = FakeProbe::new();
        let kernel = Kernel::new(Arc::new(probe.clone()), store, options);
        Self { kernel, probe }
    }

    pub fn started(mut self) -> Self {
        self.kernel.start();
        self
    }

    /// Attend qu'une mesure du type apparaisse dans le cache
    pub async fn wait_for_reading(&self, kind: MetricKind, timeout: Duration) -> Option<Reading> {
        let cache = self.kernel.cache.clone();
        if wait_until(timeout, || cache.latest(kind).is_some()).await {
            cache.latest(kind).map(|r| r.as_ref().clone())
        } else {
            None
        }
    }

    /// Sert l'API sur un port éphémère local, renvoie l'adresse
    pub async fn serve(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = http::build_router(self.kernel.app_state());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!("test server stopped: {e}");
            }
        });
        Ok(addr)
    }
}

/// 40 ms partout, timeout d'une seconde pour ne pas dépendre de la charge de la machine
pub fn fast_cadence() -> Cadence {
    MetricKind::ALL
        .into_iter()
        .fold(Cadence::uniform(FAST_PERIOD), |cadence, kind| {
            cadence.with_timeout(kind, Duration::from_secs(1))
        })
}

/// Options courtes : échantillonnage rapide, coalescence de 10 ms, rien d'optionnel activé
pub fn fast_options() -> KernelOptions {
    KernelOptions {
        cadence: fast_cadence(),
        initial: Configuration::defaults(),
        coalesce_window: Duration::from_millis(10),
        broadcast_capacity: 16,
        horizon: Duration::from_secs(24 * 3600),
        prune_interval: Duration::from_secs(3600),
    }
}

/// Sonde la condition toutes les 10 ms jusqu'à l'échéance
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn init_tracing() {
    // plusieurs harness dans le même binaire de test : seul le premier gagne
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
