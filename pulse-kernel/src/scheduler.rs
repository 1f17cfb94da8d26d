/**
 * SCHEDULE MANAGER - Tâches d'échantillonnage multi-cadence
 *
 * RÔLE :
 * Possède l'ensemble des tâches périodiques, au plus une par type.
 * Les types essentiels (cpu, gpu, memory) tournent dès start() et ne
 * sont jamais annulables ; les optionnels suivent la Configuration.
 *
 * FONCTIONNEMENT :
 * - SchedulerState (entrées vivantes + Configuration) derrière un seul verrou,
 *   toute mutation passe par enable / disable / reconfigure ; chacune
 *   met à jour le drapeau et la tâche ensemble, les deux ne divergent jamais
 * - enable identique = no-op ; période différente = abort puis respawn
 * - reconfigure = différence symétrique : seuls les types dont le drapeau
 *   change sont touchés, les autres gardent leur phase
 * - Corps de tâche : sample → cache → append SQLite → notify gateway ;
 *   un échec ne touche pas le cache et n'arrête jamais la tâche
 */

use crate::error::{SampleError, ScheduleError};
use crate::gateway::Broadcaster;
use crate::models::{MetricKind, Tier};
use crate::sampler::Sampler;
use crate::state::{new_state, Shared, SnapshotCache};
use crate::store::RetentionStore;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Drapeaux des types optionnels ; un type essentiel n'y figure jamais
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Configuration(BTreeMap<MetricKind, bool>);

impl Configuration {
    /// Tous les optionnels désactivés
    pub fn defaults() -> Self {
        Self(MetricKind::optional().map(|k| (k, false)).collect())
    }

    pub fn merged(mut self, update: impl IntoIterator<Item = (MetricKind, bool)>) -> Self {
        for (kind, on) in update {
            if !kind.is_essential() {
                self.0.insert(kind, on);
            }
        }
        self
    }

    pub fn is_enabled(&self, kind: MetricKind) -> bool {
        kind.is_essential() || self.0.get(&kind).copied().unwrap_or(false)
    }

    pub fn enabled_kinds(&self) -> impl Iterator<Item = MetricKind> + '_ {
        self.0.iter().filter(|(_, on)| **on).map(|(kind, _)| *kind)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Requête de réglage partielle, validée à la frontière
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate(BTreeMap<MetricKind, bool>);

impl SettingsUpdate {
    /// Rejette la requête entière si elle coupe un type essentiel
    pub fn new(entries: impl IntoIterator<Item = (MetricKind, bool)>) -> Result<Self, ScheduleError> {
        let mut map = BTreeMap::new();
        for (kind, on) in entries {
            if kind.is_essential() {
                if !on {
                    return Err(ScheduleError::Essential(kind));
                }
                continue;
            }
            map.insert(kind, on);
        }
        Ok(Self(map))
    }

    /// `{"network": true}` ou la forme du dashboard `{"networkEnabled": true}`
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ScheduleError> {
        let object = value.as_object().ok_or(ScheduleError::NotAnObject)?;
        let mut entries = Vec::new();
        for (key, value) in object {
            let on = value
                .as_bool()
                .ok_or_else(|| ScheduleError::InvalidValue { key: key.clone() })?;
            for kind in MetricKind::from_settings_key(key)? {
                entries.push((kind, on));
            }
        }
        Self::new(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricKind, bool)> + '_ {
        self.0.iter().map(|(k, on)| (*k, *on))
    }
}

/// Compteurs d'échecs consécutifs par type, pour le diagnostic
#[derive(Clone, Default)]
pub struct FailureCounters {
    inner: Arc<Mutex<BTreeMap<MetricKind, FailureState>>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FailureState {
    pub consecutive: u32,
    pub total: u64,
    pub last_error: Option<String>,
    #[serde(skip)]
    unavailable_reported: bool,
}

impl FailureCounters {
    pub fn record(&self, err: &SampleError) {
        let mut map = self.inner.lock();
        let state = map.entry(err.kind).or_default();
        state.consecutive += 1;
        state.total += 1;
        state.last_error = Some(err.cause.to_string());

        let kind = err.kind;
        if err.cause.is_unavailable() {
            // matériel absent : un seul warning pour la vie du processus
            if state.unavailable_reported {
                debug!(%kind, "{}", err.cause);
            } else {
                state.unavailable_reported = true;
                warn!(%kind, "probe unavailable, readings stay empty: {}", err.cause);
            }
        } else if state.consecutive == 1 {
            warn!(%kind, "sample failed: {}", err.cause);
        } else {
            debug!(%kind, consecutive = state.consecutive, "sample failed: {}", err.cause);
        }
    }

    pub fn reset(&self, kind: MetricKind) {
        if let Some(state) = self.inner.lock().get_mut(&kind) {
            if state.consecutive > 0 {
                info!(%kind, after = state.consecutive, "sampling recovered");
                state.consecutive = 0;
            }
        }
    }

    pub fn consecutive(&self, kind: MetricKind) -> u32 {
        self.inner.lock().get(&kind).map(|s| s.consecutive).unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<MetricKind, FailureState> {
        self.inner.lock().clone()
    }
}

/// Vue d'une entrée pour /api/settings et /system/health
#[derive(Debug, Clone, Serialize)]
pub struct EntryStatus {
    pub kind: MetricKind,
    pub tier: Tier,
    pub period_ms: u64,
    pub running: bool,
}

struct LiveEntry {
    period: Duration,
    task: JoinHandle<()>,
}

/// État possédé par le ScheduleManager
pub struct SchedulerState {
    entries: BTreeMap<MetricKind, LiveEntry>,
    config: Configuration,
}

struct TaskContext {
    sampler: Arc<Sampler>,
    store: Arc<RetentionStore>,
    cache: SnapshotCache,
    broadcaster: Broadcaster,
    failures: FailureCounters,
}

#[derive(Clone)]
pub struct ScheduleManager {
    state: Shared<SchedulerState>,
    ctx: Arc<TaskContext>,
}

impl ScheduleManager {
    pub fn new(
        sampler: Arc<Sampler>,
        store: Arc<RetentionStore>,
        cache: SnapshotCache,
        broadcaster: Broadcaster,
        initial: Configuration,
    ) -> Self {
        Self {
            state: new_state(SchedulerState { entries: BTreeMap::new(), config: initial }),
            ctx: Arc::new(TaskContext {
                sampler,
                store,
                cache,
                broadcaster,
                failures: FailureCounters::default(),
            }),
        }
    }

    fn period(&self, kind: MetricKind) -> Duration {
        self.ctx.sampler.cadence().period(kind)
    }

    /// Essentiels + optionnels activés dans la configuration initiale
    pub fn start(&self) {
        let mut state = self.state.lock();
        let kinds: Vec<MetricKind> = MetricKind::essential()
            .chain(state.config.enabled_kinds())
            .collect();
        for kind in kinds {
            let period = self.period(kind);
            self.enable_locked(&mut state, kind, period);
        }
        info!(tasks = state.entries.len(), "scheduler started");
    }

    /// Démarre (ou remplace) la tâche de `kind` ; `false` si rien n'a changé
    pub fn enable(&self, kind: MetricKind, period: Duration) -> bool {
        let mut state = self.state.lock();
        self.enable_locked(&mut state, kind, period)
    }

    fn enable_locked(&self, state: &mut SchedulerState, kind: MetricKind, period: Duration) -> bool {
        state.config = std::mem::take(&mut state.config).merged([(kind, true)]);
        if let Some(entry) = state.entries.get(&kind) {
            if entry.period == period && !entry.task.is_finished() {
                return false;
            }
        }
        if let Some(previous) = state.entries.remove(&kind) {
            previous.task.abort();
        }

        let task = tokio::spawn(run_entry(self.ctx.clone(), kind, period));
        state.entries.insert(kind, LiveEntry { period, task });
        info!(%kind, period_ms = period.as_millis() as u64, "sampling started");
        true
    }

    /// Arrête la tâche de `kind` ; `false` si elle ne tournait pas
    pub fn disable(&self, kind: MetricKind) -> Result<bool, ScheduleError> {
        if kind.is_essential() {
            return Err(ScheduleError::Essential(kind));
        }
        let mut state = self.state.lock();
        Ok(Self::disable_locked(&mut state, kind))
    }

    fn disable_locked(state: &mut SchedulerState, kind: MetricKind) -> bool {
        state.config = std::mem::take(&mut state.config).merged([(kind, false)]);
        match state.entries.remove(&kind) {
            Some(entry) => {
                entry.task.abort();
                info!(%kind, "sampling stopped");
                true
            }
            None => false,
        }
    }

    /// Applique une mise à jour partielle ; renvoie les types réellement basculés
    pub fn reconfigure(&self, update: &SettingsUpdate) -> Vec<(MetricKind, bool)> {
        let mut state = self.state.lock();
        let changes: Vec<(MetricKind, bool)> = update
            .iter()
            .filter(|(kind, on)| state.config.is_enabled(*kind) != *on)
            .collect();

        for &(kind, on) in &changes {
            if on {
                let period = self.period(kind);
                self.enable_locked(&mut state, kind, period);
            } else {
                Self::disable_locked(&mut state, kind);
            }
        }

        if !changes.is_empty() {
            info!(changed = changes.len(), "schedule reconfigured");
        }
        changes
    }

    /// Forme JSON reçue par REST, WebSocket et MQTT
    pub fn apply_settings(&self, value: &serde_json::Value) -> Result<Vec<(MetricKind, bool)>, ScheduleError> {
        let update = SettingsUpdate::from_json(value)?;
        Ok(self.reconfigure(&update))
    }

    pub fn settings(&self) -> Configuration {
        self.state.lock().config.clone()
    }

    pub fn entries(&self) -> Vec<EntryStatus> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(kind, entry)| EntryStatus {
                kind: *kind,
                tier: kind.tier(),
                period_ms: entry.period.as_millis() as u64,
                running: !entry.task.is_finished(),
            })
            .collect()
    }

    pub fn is_running(&self, kind: MetricKind) -> bool {
        self.state
            .lock()
            .entries
            .get(&kind)
            .map(|e| !e.task.is_finished())
            .unwrap_or(false)
    }

    /// Nombre de tâches périodiques vivantes
    pub fn live_tasks(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .filter(|e| !e.task.is_finished())
            .count()
    }

    pub fn failures(&self) -> &FailureCounters {
        &self.ctx.failures
    }

    pub fn sampler(&self) -> &Arc<Sampler> {
        &self.ctx.sampler
    }

    /// Annule toutes les tâches
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        for (_, entry) in std::mem::take(&mut state.entries) {
            entry.task.abort();
        }
        info!("scheduler stopped");
    }
}

async fn run_entry(ctx: Arc<TaskContext>, kind: MetricKind, period: Duration) {
    let mut last = last_timestamp(&ctx, kind).await;

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match ctx.sampler.sample(kind).await {
            Ok(mut reading) => {
                // horloge murale reculée : on garde la séquence croissante
                if let Some(prev) = last {
                    if reading.timestamp < prev {
                        reading.timestamp = prev;
                    }
                }
                last = Some(reading.timestamp);
                ctx.cache.set(reading.clone());
                ctx.failures.reset(kind);

                let store = ctx.store.clone();
                match tokio::task::spawn_blocking(move || store.append(&reading)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(%kind, "storage write failed, sample dropped: {e}"),
                    Err(e) => warn!(%kind, "storage task failed, sample dropped: {e}"),
                }
            }
            Err(err) => ctx.failures.record(&err),
        }
        ctx.broadcaster.notify();
    }
}

/// Dernier horodatage connu : cache, sinon base (après redémarrage)
async fn last_timestamp(ctx: &TaskContext, kind: MetricKind) -> Option<OffsetDateTime> {
    if let Some(reading) = ctx.cache.latest(kind) {
        return Some(reading.timestamp);
    }
    let store = ctx.store.clone();
    match tokio::task::spawn_blocking(move || store.last_timestamp(kind)).await {
        Ok(Ok(ts)) => ts,
        Ok(Err(e)) => {
            warn!(%kind, "could not read last stored timestamp: {e}");
            None
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SampleFailure;
    use serde_json::json;

    #[test]
    fn test_settings_update_accepts_both_key_forms() {
        let update = SettingsUpdate::from_json(&json!({
            "networkEnabled": true,
            "disk": false,
            "systemEnabled": true,
        }))
        .unwrap();
        let entries: Vec<_> = update.iter().collect();
        assert!(entries.contains(&(MetricKind::Network, true)));
        assert!(entries.contains(&(MetricKind::Disk, false)));
        assert!(entries.contains(&(MetricKind::Usb, true)));
        assert!(entries.contains(&(MetricKind::Audio, true)));
    }

    #[test]
    fn test_settings_update_rejects_bad_requests() {
        assert_eq!(
            SettingsUpdate::from_json(&json!({"network": true, "cpu": false})),
            Err(ScheduleError::Essential(MetricKind::Cpu))
        );
        assert!(matches!(
            SettingsUpdate::from_json(&json!({"fans": true})),
            Err(ScheduleError::UnknownKind(_))
        ));
        assert!(matches!(
            SettingsUpdate::from_json(&json!({"network": "yes"})),
            Err(ScheduleError::InvalidValue { .. })
        ));
        assert_eq!(SettingsUpdate::from_json(&json!([1])), Err(ScheduleError::NotAnObject));

        // activer un essentiel ne change rien
        let update = SettingsUpdate::from_json(&json!({"gpu": true})).unwrap();
        assert!(update.is_empty());
    }

    #[test]
    fn test_configuration_never_disables_essentials() {
        let config = Configuration::defaults().merged([(MetricKind::Memory, false), (MetricKind::Disk, true)]);
        assert!(config.is_enabled(MetricKind::Memory));
        assert!(config.is_enabled(MetricKind::Disk));
        assert_eq!(config.enabled_kinds().collect::<Vec<_>>(), vec![MetricKind::Disk]);
        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("memory").is_none());
        assert_eq!(json["disk"], true);
    }

    #[test]
    fn test_failure_counters_reset_on_success() {
        let counters = FailureCounters::default();
        let err = SampleError::new(MetricKind::Network, SampleFailure::Transient("down".into()));
        counters.record(&err);
        counters.record(&err);
        assert_eq!(counters.consecutive(MetricKind::Network), 2);
        counters.reset(MetricKind::Network);
        assert_eq!(counters.consecutive(MetricKind::Network), 0);
        assert_eq!(counters.snapshot()[&MetricKind::Network].total, 2);
    }
}
