/**
 * CONFIGURATION PULSE - Chargement de pulse.yaml
 *
 * RÔLE :
 * Adresse d'écoute, base SQLite, horizon de rétention, cadences par type,
 * fenêtre de coalescence du push et bridge MQTT optionnel.
 *
 * FONCTIONNEMENT :
 * - Chemin via PULSE_CONFIG (défaut pulse.yaml), .env chargé au démarrage
 * - Fichier absent ou invalide → configuration par défaut + warning
 * - Types inconnus dans `schedule` ignorés avec un warning
 */

use crate::error::ConfigError;
use crate::models::MetricKind;
use crate::scheduler::Configuration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PulseConfig {
    pub listen: String,
    pub database: PathBuf,
    pub retention: RetentionConf,
    pub schedule: ScheduleConf,
    pub broadcast: BroadcastConf,
    pub mqtt: Option<MqttConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RetentionConf {
    pub horizon_hours: u64,
    pub prune_interval_secs: u64,
    /// Lignes supprimées par transaction lors de la purge
    pub prune_chunk: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ScheduleConf {
    pub essential_period_ms: u64,
    pub periods_ms: HashMap<String, u64>,
    pub timeouts_ms: HashMap<String, u64>,
    pub enabled: HashMap<String, bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BroadcastConf {
    pub coalesce_window_ms: u64,
    pub capacity: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_client_id() -> String {
    "pulse-kernel".into()
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9800".into(),
            database: PathBuf::from("./data/monitoring.db"),
            retention: RetentionConf::default(),
            schedule: ScheduleConf::default(),
            broadcast: BroadcastConf::default(),
            mqtt: None,
        }
    }
}

impl Default for RetentionConf {
    fn default() -> Self {
        Self { horizon_hours: 24, prune_interval_secs: 3600, prune_chunk: 5000 }
    }
}

impl Default for ScheduleConf {
    fn default() -> Self {
        Self {
            essential_period_ms: 2000,
            periods_ms: HashMap::new(),
            timeouts_ms: HashMap::new(),
            enabled: HashMap::new(),
        }
    }
}

impl Default for BroadcastConf {
    fn default() -> Self {
        Self { coalesce_window_ms: 250, capacity: 16 }
    }
}

/// Cadences et timeouts résolus par type
#[derive(Debug, Clone)]
pub struct Cadence {
    periods: BTreeMap<MetricKind, Duration>,
    timeouts: BTreeMap<MetricKind, Duration>,
}

impl Cadence {
    pub fn period(&self, kind: MetricKind) -> Duration {
        self.periods.get(&kind).copied().unwrap_or_else(|| kind.default_period())
    }

    pub fn timeout(&self, kind: MetricKind) -> Duration {
        self.timeouts.get(&kind).copied().unwrap_or_else(|| self.period(kind))
    }

    /// Même période pour tous les types, utile en test
    pub fn uniform(period: Duration) -> Self {
        Self {
            periods: MetricKind::ALL.into_iter().map(|k| (k, period)).collect(),
            timeouts: BTreeMap::new(),
        }
    }

    pub fn with_period(mut self, kind: MetricKind, period: Duration) -> Self {
        self.periods.insert(kind, period);
        self
    }

    pub fn with_timeout(mut self, kind: MetricKind, timeout: Duration) -> Self {
        self.timeouts.insert(kind, timeout);
        self
    }
}

impl Default for Cadence {
    fn default() -> Self {
        ScheduleConf::default().cadence()
    }
}

impl ScheduleConf {
    pub fn cadence(&self) -> Cadence {
        let mut periods = BTreeMap::new();
        for kind in MetricKind::essential() {
            periods.insert(kind, Duration::from_millis(self.essential_period_ms.max(1)));
        }
        for (kind, ms) in known_kinds("periods_ms", &self.periods_ms) {
            if kind.is_essential() {
                warn!(%kind, "periods_ms ignored for essential kind, use essential_period_ms");
                continue;
            }
            periods.insert(kind, Duration::from_millis(ms.max(1)));
        }

        let timeouts = known_kinds("timeouts_ms", &self.timeouts_ms)
            .map(|(kind, ms)| (kind, Duration::from_millis(ms.max(1))))
            .collect();

        Cadence { periods, timeouts }
    }

    /// Réglages optionnels initiaux, les entrées invalides sont ignorées
    pub fn initial_settings(&self) -> Configuration {
        let mut valid = BTreeMap::new();
        for (key, &on) in &self.enabled {
            match MetricKind::from_settings_key(key) {
                Ok(kinds) => {
                    for kind in kinds {
                        if kind.is_essential() {
                            warn!(%kind, "essential kind is always enabled, entry ignored");
                        } else {
                            valid.insert(kind, on);
                        }
                    }
                }
                Err(e) => warn!(key = %key, "schedule.enabled: {e}"),
            }
        }
        Configuration::defaults().merged(valid)
    }
}

fn known_kinds<'a>(
    section: &'static str,
    map: &'a HashMap<String, u64>,
) -> impl Iterator<Item = (MetricKind, u64)> + 'a {
    map.iter().filter_map(move |(key, &value)| match key.parse::<MetricKind>() {
        Ok(kind) => Some((kind, value)),
        Err(e) => {
            warn!(section, "{e}, entry ignored");
            None
        }
    })
}

impl PulseConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen.parse().map_err(|_| ConfigError::Listen(self.listen.clone()))
    }

    pub fn horizon(&self) -> Duration {
        Duration::from_secs(self.retention.horizon_hours * 3600)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.retention.prune_interval_secs.max(1))
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.broadcast.coalesce_window_ms)
    }
}

pub fn parse_config(txt: &str) -> Result<PulseConfig, ConfigError> {
    if txt.trim().is_empty() {
        return Ok(PulseConfig::default());
    }
    Ok(serde_yaml::from_str(txt)?)
}

pub async fn load_config() -> PulseConfig {
    let path = std::env::var("PULSE_CONFIG").unwrap_or_else(|_| "pulse.yaml".into());
    load_config_from(Path::new(&path)).await
}

pub async fn load_config_from(path: &Path) -> PulseConfig {
    if !path.exists() {
        info!(path = %path.display(), "no config file, using defaults");
        return PulseConfig::default();
    }
    let txt = match fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) => {
            warn!(path = %path.display(), "config unreadable: {e}");
            return PulseConfig::default();
        }
    };
    parse_config(&txt).unwrap_or_else(|e| {
        warn!(path = %path.display(), "config invalid: {e}");
        PulseConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.listen_addr().unwrap().port(), 9800);
        assert_eq!(cfg.horizon(), Duration::from_secs(24 * 3600));
        assert_eq!(cfg.prune_interval(), Duration::from_secs(3600));

        let cadence = cfg.schedule.cadence();
        assert_eq!(cadence.period(MetricKind::Cpu), Duration::from_secs(2));
        assert_eq!(cadence.period(MetricKind::Network), Duration::from_secs(5));
        assert_eq!(cadence.period(MetricKind::Disk), Duration::from_secs(10));
        assert_eq!(cadence.timeout(MetricKind::Disk), Duration::from_secs(10));
        assert!(cfg.schedule.initial_settings().enabled_kinds().next().is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
listen: "127.0.0.1:9900"
schedule:
  essential_period_ms: 1000
  periods_ms:
    network: 3000
    cpu: 500
    fans: 100
  timeouts_ms:
    gpu: 800
  enabled:
    networkEnabled: true
    disk: true
    memory: false
    bogus: true
mqtt:
  host: broker.lan
  port: 1883
"#;
        let cfg = parse_config(yaml).unwrap();
        assert_eq!(cfg.retention.horizon_hours, 24);
        assert_eq!(cfg.broadcast.capacity, 16);
        assert_eq!(cfg.mqtt.as_ref().unwrap().client_id, "pulse-kernel");

        let cadence = cfg.schedule.cadence();
        assert_eq!(cadence.period(MetricKind::Cpu), Duration::from_secs(1));
        assert_eq!(cadence.period(MetricKind::Network), Duration::from_secs(3));
        assert_eq!(cadence.timeout(MetricKind::Gpu), Duration::from_millis(800));

        let settings = cfg.schedule.initial_settings();
        assert!(settings.is_enabled(MetricKind::Network));
        assert!(settings.is_enabled(MetricKind::Disk));
        assert!(!settings.is_enabled(MetricKind::Usb));
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        assert!(matches!(parse_config("listen: [1, 2"), Err(ConfigError::Yaml(_))));
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.yaml")).await;
        assert_eq!(cfg.listen, "0.0.0.0:9800");
    }
}
