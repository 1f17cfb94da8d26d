/**
 * SAMPLER - Adaptateur entre le scheduler et les sondes matérielles
 *
 * RÔLE :
 * Transforme un appel de sonde bloquant et faillible en une mesure
 * normalisée, bornée dans le temps, sans jamais paniquer l'appelant.
 *
 * FONCTIONNEMENT :
 * - Trait Probe = frontière plateforme, substituable en test
 * - Chaque appel tourne sur le pool bloquant sous tokio::time::timeout
 * - Un appel encore bloqué d'un tick précédent → échec immédiat (Busy)
 *   au lieu d'empiler un deuxième thread bloqué
 * - Faits statiques (modèle CPU, adaptateurs GPU, OS) mémorisés une seule
 *   fois par type dans un OnceCell, même sous appels concurrents
 * - NaN / infinis → Absent
 * - Identité réseau (/api/network-info) : même frontière, même timeout
 */

pub mod host;

use crate::config::Cadence;
use crate::error::{ProbeError, SampleError, SampleFailure};
use crate::models::{Fields, MetricKind, Reading};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

pub use host::HostSampler;
pub use pulse_probes::discovery::{InterfaceAddress, NetworkInfo};

/// Frontière plateforme : seule porte d'entrée des spécificités OS/matériel
pub trait Probe: Send + Sync + 'static {
    /// Une mesure brute du type demandé
    fn probe(&self, kind: MetricKind) -> Result<Fields, ProbeError>;

    /// Faits immuables pendant la vie du processus
    fn static_facts(&self, _kind: MetricKind) -> Result<Fields, ProbeError> {
        Ok(Fields::new())
    }

    /// Adresses IPv4 joignables depuis le LAN, hostname et plateforme
    fn network_info(&self) -> Result<NetworkInfo, ProbeError> {
        Err(ProbeError::Unavailable("network identity not provided".into()))
    }
}

#[derive(Default)]
struct KindSlot {
    probe_busy: Arc<AtomicBool>,
    facts_busy: Arc<AtomicBool>,
    facts: OnceCell<Arc<Fields>>,
}

/// Libère le drapeau d'occupation quand l'appel bloquant se termine, panique comprise
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Sampler {
    probe: Arc<dyn Probe>,
    cadence: Cadence,
    slots: [KindSlot; MetricKind::ALL.len()],
    network_busy: Arc<AtomicBool>,
}

impl Sampler {
    pub fn new(probe: Arc<dyn Probe>, cadence: Cadence) -> Self {
        Self {
            probe,
            cadence,
            slots: std::array::from_fn(|_| KindSlot::default()),
            network_busy: Arc::default(),
        }
    }

    pub fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    fn slot(&self, kind: MetricKind) -> &KindSlot {
        &self.slots[kind as usize]
    }

    pub async fn sample(&self, kind: MetricKind) -> Result<Reading, SampleError> {
        let slot = self.slot(kind);
        let mut fields = self
            .run_blocking(kind, &slot.probe_busy, move |probe| probe.probe(kind))
            .await?;

        match self.static_facts(kind).await {
            Ok(facts) => {
                for (key, value) in facts.iter() {
                    fields.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
            Err(e) => debug!(%kind, "static facts not merged: {e}"),
        }

        let fields = fields.into_iter().map(|(k, v)| (k, v.normalized())).collect();
        Ok(Reading::new(kind, fields))
    }

    /// Faits statiques mémorisés ; un échec laisse la cellule vide pour réessayer
    pub async fn static_facts(&self, kind: MetricKind) -> Result<Arc<Fields>, SampleError> {
        let slot = self.slot(kind);
        slot.facts
            .get_or_try_init(|| async {
                let fields = self
                    .run_blocking(kind, &slot.facts_busy, move |probe| probe.static_facts(kind))
                    .await?;
                debug!(%kind, count = fields.len(), "static facts cached");
                Ok::<_, SampleError>(Arc::new(fields))
            })
            .await
            .cloned()
    }

    /// Identité réseau, jamais mise en cache (DHCP, VPN)
    pub async fn network_info(&self) -> Result<NetworkInfo, SampleError> {
        self.run_blocking(MetricKind::Network, &self.network_busy, |probe| probe.network_info())
            .await
    }

    async fn run_blocking<T, F>(
        &self,
        kind: MetricKind,
        busy: &Arc<AtomicBool>,
        call: F,
    ) -> Result<T, SampleError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Probe) -> Result<T, ProbeError> + Send + 'static,
    {
        if busy.swap(true, Ordering::AcqRel) {
            return Err(SampleError::new(kind, SampleFailure::Busy));
        }
        let guard = BusyGuard(busy.clone());
        let probe = self.probe.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            call(probe.as_ref())
        });

        let timeout = self.cadence.timeout(kind);
        match tokio::time::timeout(timeout, handle).await {
            // le thread bloquant garde le drapeau jusqu'à son retour
            Err(_) => Err(SampleError::new(kind, SampleFailure::Timeout(timeout))),
            Ok(Err(join)) => Err(SampleError::new(
                kind,
                SampleFailure::Transient(format!("probe task failed: {join}")),
            )),
            Ok(Ok(result)) => result.map_err(|e| SampleError::new(kind, e)),
        }
    }
}
