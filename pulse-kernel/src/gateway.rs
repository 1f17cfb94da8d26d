/**
 * BROADCAST GATEWAY - Diffusion coalescée du snapshot aux abonnés
 *
 * RÔLE :
 * Les tâches d'échantillonnage signalent "du nouveau" sans jamais attendre
 * les abonnés. Une tâche de coalescence regroupe les signaux d'une même
 * fenêtre (250 ms par défaut) en un seul push du snapshot agrégé.
 *
 * FONCTIONNEMENT :
 * - notify() : pose un drapeau + réveille la coalescence, non bloquant
 * - coalescer : attend un signal, dort la fenêtre, pousse si le drapeau est levé
 * - tokio::sync::broadcast : au plus une fois par push, un abonné en retard
 *   saute des frames au lieu de freiner les autres
 */

use crate::models::Snapshot;
use crate::state::SnapshotCache;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

struct Inner {
    tx: broadcast::Sender<Arc<Snapshot>>,
    cache: SnapshotCache,
    wake: Notify,
    dirty: AtomicBool,
    window: Duration,
    pushes: AtomicU64,
}

/// Abonnement au flux de snapshots ; se désabonne en étant droppé
pub struct Subscription {
    rx: broadcast::Receiver<Arc<Snapshot>>,
}

impl Subscription {
    /// Prochain snapshot, `None` si la diffusion est terminée
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "slow subscriber skipped snapshots");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Broadcaster {
    pub fn new(cache: SnapshotCache, window: Duration, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                tx,
                cache,
                wake: Notify::new(),
                dirty: AtomicBool::new(false),
                window,
                pushes: AtomicU64::new(0),
            }),
        }
    }

    /// Signale qu'un type vient d'être mis à jour
    pub fn notify(&self) {
        self.inner.dirty.store(true, Ordering::Release);
        self.inner.wake.notify_one();
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription { rx: self.inner.tx.subscribe() }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }

    /// Nombre de pushes agrégés émis depuis le démarrage
    pub fn push_count(&self) -> u64 {
        self.inner.pushes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.cache.get()
    }

    /// Pousse le snapshot courant, renvoie le nombre d'abonnés atteints
    pub fn push_now(&self) -> usize {
        let snapshot = Arc::new(self.inner.cache.get());
        self.inner.pushes.fetch_add(1, Ordering::Relaxed);
        // personne n'écoute : pas une erreur
        self.inner.tx.send(snapshot).unwrap_or(0)
    }

    pub fn spawn_coalescer(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                this.inner.wake.notified().await;
                tokio::time::sleep(this.inner.window).await;
                if this.inner.dirty.swap(false, Ordering::AcqRel) {
                    let reached = this.push_now();
                    debug!(reached, "snapshot pushed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fields, MetricKind, Reading};

    #[tokio::test]
    async fn test_burst_of_updates_is_one_push() {
        let cache = SnapshotCache::new();
        let gateway = Broadcaster::new(cache.clone(), Duration::from_millis(50), 8);
        let _task = gateway.spawn_coalescer();
        let mut sub = gateway.subscribe();
        assert_eq!(gateway.subscriber_count(), 1);

        for kind in [MetricKind::Cpu, MetricKind::Gpu, MetricKind::Memory] {
            cache.set(Reading::new(kind, Fields::new()));
            gateway.notify();
        }

        let snapshot = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(snapshot[&MetricKind::Cpu].is_some());
        assert!(snapshot[&MetricKind::Memory].is_some());
        assert!(snapshot[&MetricKind::Network].is_none());

        // pas de second push pour la même rafale
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(gateway.push_count(), 1);
        assert!(tokio::time::timeout(Duration::from_millis(50), sub.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_push_without_subscribers_is_harmless() {
        let gateway = Broadcaster::new(SnapshotCache::new(), Duration::from_millis(10), 4);
        assert_eq!(gateway.push_now(), 0);
        let sub = gateway.subscribe();
        drop(sub);
        assert_eq!(gateway.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_frames() {
        let gateway = Broadcaster::new(SnapshotCache::new(), Duration::from_millis(10), 2);
        let mut sub = gateway.subscribe();
        for _ in 0..5 {
            gateway.push_now();
        }
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_some());
        assert!(tokio::time::timeout(Duration::from_millis(20), sub.recv()).await.is_err());
    }
}
