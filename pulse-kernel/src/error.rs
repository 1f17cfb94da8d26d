/**
 * ERREURS DU KERNEL PULSE
 *
 * RÔLE :
 * Taxonomie des échecs par composant. Aucune de ces erreurs n'est fatale
 * au processus : un type en échec se dégrade en données périmées/absentes
 * pendant que les autres continuent.
 *
 * - ProbeError : renvoyée par une sonde (indisponible = permanent, transitoire = réessai au tick suivant)
 * - SampleError : échec d'un échantillon, porte le type et la cause
 * - StoreError : échec SQLite (écriture = log + mesure perdue, lecture = remontée au demandeur)
 * - ScheduleError / ConfigError : requêtes de réglage rejetées à la frontière
 */

use crate::models::{MetricKind, UnknownKind};
use std::time::Duration;

/// Échec d'une sonde matérielle
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// La plateforme n'a pas ce capteur, inutile d'insister
    #[error("probe unavailable: {0}")]
    Unavailable(String),
    #[error("probe failed: {0}")]
    Transient(String),
}

impl From<pulse_probes::ProbeError> for ProbeError {
    fn from(err: pulse_probes::ProbeError) -> Self {
        match err {
            pulse_probes::ProbeError::Unavailable(msg) => ProbeError::Unavailable(msg),
            other => ProbeError::Transient(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SampleFailure {
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Transient(String),
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    /// L'appel précédent de la sonde n'est toujours pas revenu
    #[error("previous probe call still running")]
    Busy,
}

impl SampleFailure {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SampleFailure::Unavailable(_))
    }
}

impl From<ProbeError> for SampleFailure {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Unavailable(msg) => SampleFailure::Unavailable(msg),
            ProbeError::Transient(msg) => SampleFailure::Transient(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} sample failed: {cause}")]
pub struct SampleError {
    pub kind: MetricKind,
    pub cause: SampleFailure,
}

impl SampleError {
    pub fn new(kind: MetricKind, cause: impl Into<SampleFailure>) -> Self {
        Self { kind, cause: cause.into() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored timestamp out of range: {0}")]
    Timestamp(i64),
    #[error("storage task failed: {0}")]
    Task(String),
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("history query failed: {0}")]
    Store(#[from] StoreError),
    #[error("invalid time range: {0} ms")]
    InvalidRange(i64),
    #[error("{0} history cannot be narrowed to one device")]
    NotNarrowable(MetricKind),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("{0} is an essential metric and cannot be disabled")]
    Essential(MetricKind),
    #[error(transparent)]
    UnknownKind(#[from] UnknownKind),
    #[error("invalid value for {key}: expected a boolean")]
    InvalidValue { key: String },
    #[error("settings must be a JSON object")]
    NotAnObject,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid listen address {0}")]
    Listen(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_error_mapping() {
        let unavailable: ProbeError = pulse_probes::ProbeError::Unavailable("no drm".into()).into();
        assert_eq!(unavailable, ProbeError::Unavailable("no drm".into()));

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let transient: ProbeError = pulse_probes::ProbeError::Io(io).into();
        assert!(matches!(transient, ProbeError::Transient(_)));

        let err = SampleError::new(MetricKind::Gpu, unavailable);
        assert!(err.cause.is_unavailable());
        assert_eq!(err.to_string(), "gpu sample failed: no drm");
    }
}
