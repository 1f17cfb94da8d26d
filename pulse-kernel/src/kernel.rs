/**
 * KERNEL - Assemblage des composants Pulse
 *
 * RÔLE :
 * Relie sonde, sampler, cache, gateway, scheduler, rétention et requêtes.
 * Utilisé tel quel par le binaire et par les tests d'intégration.
 *
 * FONCTIONNEMENT :
 * - new() : construit tout, ne démarre rien
 * - start() : coalescence du push, tâches d'échantillonnage, balayage de rétention
 * - shutdown() : annule les tâches, la base reste cohérente
 */

use crate::config::{Cadence, PulseConfig};
use crate::gateway::Broadcaster;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::query::QueryService;
use crate::sampler::{Probe, Sampler};
use crate::scheduler::{Configuration, ScheduleManager};
use crate::state::SnapshotCache;
use crate::store::{spawn_retention_sweeper, RetentionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Clone)]
pub struct KernelOptions {
    pub cadence: Cadence,
    pub initial: Configuration,
    pub coalesce_window: Duration,
    pub broadcast_capacity: usize,
    pub horizon: Duration,
    pub prune_interval: Duration,
}

impl KernelOptions {
    pub fn from_config(cfg: &PulseConfig) -> Self {
        Self {
            cadence: cfg.schedule.cadence(),
            initial: cfg.schedule.initial_settings(),
            coalesce_window: cfg.coalesce_window(),
            broadcast_capacity: cfg.broadcast.capacity,
            horizon: cfg.horizon(),
            prune_interval: cfg.prune_interval(),
        }
    }
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self::from_config(&PulseConfig::default())
    }
}

pub struct Kernel {
    pub scheduler: ScheduleManager,
    pub store: Arc<RetentionStore>,
    pub query: QueryService,
    pub cache: SnapshotCache,
    pub broadcaster: Broadcaster,
    pub health_tracker: HealthTracker,
    horizon: Duration,
    prune_interval: Duration,
    background: Vec<JoinHandle<()>>,
}

impl Kernel {
    pub fn new(probe: Arc<dyn Probe>, store: Arc<RetentionStore>, options: KernelOptions) -> Self {
        let cache = SnapshotCache::new();
        let broadcaster = Broadcaster::new(
            cache.clone(),
            options.coalesce_window,
            options.broadcast_capacity,
        );
        let sampler = Arc::new(Sampler::new(probe, options.cadence));
        let scheduler = ScheduleManager::new(
            sampler,
            store.clone(),
            cache.clone(),
            broadcaster.clone(),
            options.initial,
        );

        Self {
            scheduler,
            query: QueryService::new(store.clone()),
            store,
            cache,
            broadcaster,
            health_tracker: HealthTracker::new(),
            horizon: options.horizon,
            prune_interval: options.prune_interval,
            background: Vec::new(),
        }
    }

    /// À appeler depuis le runtime tokio
    pub fn start(&mut self) {
        self.background.push(self.broadcaster.spawn_coalescer());
        self.scheduler.start();
        self.background.push(spawn_retention_sweeper(
            self.store.clone(),
            self.horizon,
            self.prune_interval,
        ));
        info!(
            horizon_hours = self.horizon.as_secs() / 3600,
            "kernel started"
        );
    }

    /// Rattache une tâche annexe (bridge MQTT...) au cycle de vie du kernel
    pub fn attach(&mut self, task: JoinHandle<()>) {
        self.background.push(task);
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            scheduler: self.scheduler.clone(),
            store: self.store.clone(),
            query: self.query.clone(),
            cache: self.cache.clone(),
            broadcaster: self.broadcaster.clone(),
            health_tracker: self.health_tracker.clone(),
        }
    }

    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
        for task in self.background.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.shutdown();
    }
}
