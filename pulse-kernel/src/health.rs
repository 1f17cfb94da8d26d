/**
 * HEALTH - Diagnostic du kernel Pulse
 *
 * Expose via /system/health : uptime, tâches actives, échecs consécutifs
 * par type, volume stocké par type, abonnés connectés, mémoire du processus
 * et état du bridge MQTT quand il est configuré.
 */

use crate::gateway::Broadcaster;
use crate::models::MetricKind;
use crate::scheduler::{EntryStatus, FailureState, ScheduleManager};
use crate::store::RetentionStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub active_tasks: usize,
    pub schedule: Vec<EntryStatus>,
    pub failures: BTreeMap<MetricKind, FailureState>,
    /// Absent si la base n'a pas pu être lue
    pub stored_records: Option<BTreeMap<MetricKind, u64>>,
    pub subscribers: usize,
    pub pushes: u64,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<parking_lot::Mutex<String>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(parking_lot::Mutex::new("disabled".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn mqtt_status(&self) -> String {
        self.mqtt_status.lock().clone()
    }

    /// Lit aussi les compteurs SQLite : à appeler hors du runtime async
    pub fn get_health(
        &self,
        scheduler: &ScheduleManager,
        store: &RetentionStore,
        broadcaster: &Broadcaster,
    ) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            active_tasks: scheduler.live_tasks(),
            schedule: scheduler.entries(),
            failures: scheduler.failures().snapshot(),
            stored_records: store.counts().ok(),
            subscribers: broadcaster.subscriber_count(),
            pushes: broadcaster.push_count(),
            memory_usage_mb: get_memory_usage_mb(),
            mqtt_status: self.mqtt_status(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            return parse_vm_rss_mb(&status).unwrap_or(0.0);
        }
    }
    0.0
}

fn parse_vm_rss_mb(status: &str) -> Option<f32> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb = line.split_whitespace().nth(1)?.parse::<u64>().ok()?;
    Some(kb as f32 / 1024.0)
}
