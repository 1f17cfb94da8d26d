/**
 * MODÈLE DE DONNÉES PULSE - Types partagés par tout le kernel
 *
 * RÔLE :
 * Définit les types de métriques, leur tier (essentiel / optionnel),
 * la forme d'une mesure (Reading) et d'un enregistrement persisté.
 *
 * FONCTIONNEMENT :
 * - MetricKind = énumération fermée des catégories de télémétrie
 * - Reading = {kind, timestamp, fields} avec champs plats clé → valeur
 * - FieldValue::Absent pour toute valeur indisponible (null en JSON, jamais -1)
 * - Snapshot = dernière mesure par type, null tant qu'aucun succès
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Gpu,
    Memory,
    Disk,
    Network,
    System,
    Processes,
    Usb,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Toujours échantillonné, non désactivable
    Essential,
    /// Échantillonné seulement si activé
    Optional,
}

impl MetricKind {
    pub const ALL: [MetricKind; 9] = [
        MetricKind::Cpu,
        MetricKind::Gpu,
        MetricKind::Memory,
        MetricKind::Disk,
        MetricKind::Network,
        MetricKind::System,
        MetricKind::Processes,
        MetricKind::Usb,
        MetricKind::Audio,
    ];

    pub fn tier(self) -> Tier {
        match self {
            MetricKind::Cpu | MetricKind::Gpu | MetricKind::Memory => Tier::Essential,
            _ => Tier::Optional,
        }
    }

    pub fn is_essential(self) -> bool {
        self.tier() == Tier::Essential
    }

    pub fn essential() -> impl Iterator<Item = MetricKind> {
        Self::ALL.into_iter().filter(|k| k.is_essential())
    }

    pub fn optional() -> impl Iterator<Item = MetricKind> {
        Self::ALL.into_iter().filter(|k| !k.is_essential())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Gpu => "gpu",
            MetricKind::Memory => "memory",
            MetricKind::Disk => "disk",
            MetricKind::Network => "network",
            MetricKind::System => "system",
            MetricKind::Processes => "processes",
            MetricKind::Usb => "usb",
            MetricKind::Audio => "audio",
        }
    }

    /// Table SQLite de l'historique de ce type
    pub fn table(self) -> String {
        format!("{}_history", self.as_str())
    }

    /// Cadence par défaut, étagée selon le coût de la sonde
    pub fn default_period(self) -> Duration {
        match self {
            MetricKind::Cpu | MetricKind::Gpu | MetricKind::Memory => Duration::from_secs(2),
            MetricKind::Network | MetricKind::Processes => Duration::from_secs(5),
            MetricKind::Disk | MetricKind::System | MetricKind::Usb | MetricKind::Audio => {
                Duration::from_secs(10)
            }
        }
    }

    /// Clé de réglage du dashboard : `network` ou la forme historique `networkEnabled`.
    /// `systemEnabled` couvre aussi usb et audio.
    pub fn from_settings_key(key: &str) -> Result<Vec<MetricKind>, UnknownKind> {
        match key.strip_suffix("Enabled") {
            Some("system") => Ok(vec![MetricKind::System, MetricKind::Usb, MetricKind::Audio]),
            Some(name) => Ok(vec![name.parse()?]),
            None => Ok(vec![key.parse()?]),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown metric kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for MetricKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Valeur d'un champ de mesure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Absent,
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }

    /// NaN et infinis deviennent Absent
    pub fn normalized(self) -> Self {
        match self {
            FieldValue::Number(n) if !n.is_finite() => FieldValue::Absent,
            other => other,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Absent)
    }
}

pub type Fields = BTreeMap<String, FieldValue>;

/// Une mesure horodatée pour un type de métrique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub kind: MetricKind,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub fields: Fields,
}

impl Reading {
    pub fn new(kind: MetricKind, fields: Fields) -> Self {
        Self::at(kind, OffsetDateTime::now_utc(), fields)
    }

    pub fn at(kind: MetricKind, timestamp: OffsetDateTime, fields: Fields) -> Self {
        Self { kind, timestamp, fields }
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.field(key).and_then(FieldValue::as_f64)
    }
}

/// Mesure persistée avec son identifiant de séquence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionRecord {
    pub id: i64,
    #[serde(flatten)]
    pub reading: Reading,
}

/// Dernière mesure réussie par type, `None` tant qu'aucun succès
pub type Snapshot = BTreeMap<MetricKind, Option<Reading>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers() {
        let essential: Vec<_> = MetricKind::essential().collect();
        assert_eq!(essential, vec![MetricKind::Cpu, MetricKind::Gpu, MetricKind::Memory]);
        assert_eq!(MetricKind::optional().count(), 6);
        assert_eq!(MetricKind::Disk.default_period(), Duration::from_secs(10));
    }

    #[test]
    fn test_settings_keys() {
        assert_eq!(MetricKind::from_settings_key("network").unwrap(), vec![MetricKind::Network]);
        assert_eq!(MetricKind::from_settings_key("diskEnabled").unwrap(), vec![MetricKind::Disk]);
        assert_eq!(MetricKind::from_settings_key("systemEnabled").unwrap().len(), 3);
        assert!(MetricKind::from_settings_key("fanEnabled").is_err());
        assert!(MetricKind::from_settings_key("CPU").is_err());
    }

    #[test]
    fn test_absent_serializes_as_null() {
        let mut fields = Fields::new();
        fields.insert("usage".into(), FieldValue::Number(12.5));
        fields.insert("temperature".into(), FieldValue::from(None::<f64>));
        fields.insert("model".into(), "Ryzen".into());
        fields.insert("broken".into(), FieldValue::Number(f64::NAN).normalized());

        let json = serde_json::to_value(&fields).unwrap();
        assert_eq!(json["usage"], 12.5);
        assert!(json["temperature"].is_null());
        assert!(json["broken"].is_null());
        assert_eq!(json["model"], "Ryzen");

        let back: Fields = serde_json::from_value(json).unwrap();
        assert_eq!(back["temperature"], FieldValue::Absent);
        assert_eq!(back["usage"], FieldValue::Number(12.5));
    }

    #[test]
    fn test_snapshot_keys_are_kind_names() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(MetricKind::Network, None);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"network":null}"#);
    }
}
