/**
 * RETENTION STORE - Historique SQLite borné par type de métrique
 *
 * RÔLE :
 * Persiste chaque mesure réussie et la garde `horizon` (24h) avant purge.
 * Survit au redémarrage du processus.
 *
 * FONCTIONNEMENT :
 * - Une table `<kind>_history (id, timestamp, fields)` par type, index sur timestamp
 * - timestamp en millisecondes Unix, fields en JSON
 * - WAL + auto_vacuum INCREMENTAL : la compaction rend l'espace par petites étapes
 * - Purge par lots de `prune_chunk` lignes, verrou repris à chaque lot :
 *   un append ou une requête concurrente n'attend jamais plus d'un lot
 * - Tâche de balayage périodique (horaire) indépendante de l'échantillonnage
 */

use crate::error::StoreError;
use crate::models::{Fields, MetricKind, Reading, RetentionRecord};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn};

const DEFAULT_PRUNE_CHUNK: usize = 5000;
const VACUUM_STEP_PAGES: i64 = 512;

pub struct RetentionStore {
    conn: Mutex<Connection>,
    prune_chunk: usize,
}

/// Résultat d'un balayage de rétention
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: u64,
    pub reclaimed_pages: u64,
}

impl RetentionStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let _span = info_span!("store_open", path = %path.display()).entered();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        let auto_vacuum: i64 = conn.query_row("PRAGMA auto_vacuum", [], |row| row.get(0))?;
        if auto_vacuum != 2 {
            // le mode ne change qu'au prochain VACUUM, hors WAL
            conn.execute_batch(
                "PRAGMA journal_mode=DELETE; PRAGMA auto_vacuum=INCREMENTAL; VACUUM;",
            )?;
        }
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        for kind in MetricKind::ALL {
            let table = kind.table();
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp INTEGER NOT NULL,
                    fields TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_timestamp ON {table}(timestamp);"
            ))?;
        }

        Ok(Self { conn: Mutex::new(conn), prune_chunk: DEFAULT_PRUNE_CHUNK })
    }

    pub fn with_prune_chunk(mut self, chunk: usize) -> Self {
        self.prune_chunk = chunk.max(1);
        self
    }

    /// Ajoute une mesure, renvoie son identifiant de séquence
    pub fn append(&self, reading: &Reading) -> Result<i64, StoreError> {
        let fields = serde_json::to_string(&reading.fields)?;
        let conn = self.conn.lock();
        conn.prepare_cached(&format!(
            "INSERT INTO {} (timestamp, fields) VALUES (?1, ?2)",
            reading.kind.table()
        ))?
        .execute(params![to_millis(reading.timestamp), fields])?;
        Ok(conn.last_insert_rowid())
    }

    /// Mesures de `kind` avec `timestamp > since`, ordre croissant
    pub fn query(
        &self,
        kind: MetricKind,
        since: OffsetDateTime,
    ) -> Result<Vec<RetentionRecord>, StoreError> {
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT id, timestamp, fields FROM {} WHERE timestamp > ?1 ORDER BY timestamp, id",
                kind.table()
            ))?;
            let rows = stmt.query_map(params![to_millis(since)], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        // décodage JSON hors verrou
        rows.into_iter()
            .map(|(id, ms, json)| -> Result<RetentionRecord, StoreError> {
                let fields: Fields = serde_json::from_str(&json)?;
                Ok(RetentionRecord { id, reading: Reading::at(kind, from_millis(ms)?, fields) })
            })
            .collect()
    }

    pub fn last_timestamp(&self, kind: MetricKind) -> Result<Option<OffsetDateTime>, StoreError> {
        let ms: Option<i64> = self
            .conn
            .lock()
            .query_row(&format!("SELECT MAX(timestamp) FROM {}", kind.table()), [], |row| row.get(0))
            .optional()?
            .flatten();
        ms.map(from_millis).transpose()
    }

    /// Supprime tout ce qui est plus vieux que `now - horizon`
    pub fn prune(&self, horizon: Duration) -> Result<u64, StoreError> {
        self.prune_before(OffsetDateTime::now_utc() - horizon)
    }

    /// Supprime les mesures avec `timestamp < cutoff`, tous types confondus
    pub fn prune_before(&self, cutoff: OffsetDateTime) -> Result<u64, StoreError> {
        let cutoff = to_millis(cutoff);
        let mut total = 0u64;
        for kind in MetricKind::ALL {
            let table = kind.table();
            let sql = format!(
                "DELETE FROM {table} WHERE id IN \
                 (SELECT id FROM {table} WHERE timestamp < ?1 ORDER BY id LIMIT ?2)"
            );
            loop {
                let deleted = self
                    .conn
                    .lock()
                    .execute(&sql, params![cutoff, self.prune_chunk as i64])?;
                total += deleted as u64;
                if deleted < self.prune_chunk {
                    break;
                }
            }
        }
        Ok(total)
    }

    /// Rend au système les pages libérées, par étapes courtes
    pub fn compact(&self) -> Result<u64, StoreError> {
        let mut reclaimed = 0u64;
        loop {
            let conn = self.conn.lock();
            let free: i64 = conn.query_row("PRAGMA freelist_count", [], |row| row.get(0))?;
            if free == 0 {
                break;
            }
            let mut stmt =
                conn.prepare(&format!("PRAGMA incremental_vacuum({VACUUM_STEP_PAGES})"))?;
            let mut rows = stmt.query([])?;
            while rows.next()?.is_some() {}
            drop(rows);
            drop(stmt);

            let after: i64 = conn.query_row("PRAGMA freelist_count", [], |row| row.get(0))?;
            let step = (free - after).max(0) as u64;
            reclaimed += step;
            if step == 0 {
                break;
            }
        }
        Ok(reclaimed)
    }

    /// Purge puis compaction si quelque chose a été supprimé
    pub fn sweep(&self, horizon: Duration) -> Result<SweepReport, StoreError> {
        let deleted = self.prune(horizon)?;
        let reclaimed_pages = if deleted > 0 { self.compact()? } else { 0 };
        Ok(SweepReport { deleted, reclaimed_pages })
    }

    pub fn count(&self, kind: MetricKind) -> Result<u64, StoreError> {
        let count: i64 = self.conn.lock().query_row(
            &format!("SELECT COUNT(*) FROM {}", kind.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn counts(&self) -> Result<BTreeMap<MetricKind, u64>, StoreError> {
        MetricKind::ALL
            .into_iter()
            .map(|kind| -> Result<(MetricKind, u64), StoreError> { Ok((kind, self.count(kind)?)) })
            .collect()
    }
}

impl std::fmt::Debug for RetentionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionStore").field("prune_chunk", &self.prune_chunk).finish()
    }
}

fn to_millis(ts: OffsetDateTime) -> i64 {
    (ts.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_millis(ms: i64) -> Result<OffsetDateTime, StoreError> {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .map_err(|_| StoreError::Timestamp(ms))
}

/// Démarre le balayage de rétention ; le premier passage a lieu tout de suite
pub fn spawn_retention_sweeper(
    store: Arc<RetentionStore>,
    horizon: Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let store = store.clone();
            match tokio::task::spawn_blocking(move || store.sweep(horizon)).await {
                Ok(Ok(report)) if report.deleted > 0 => info!(
                    deleted = report.deleted,
                    reclaimed_pages = report.reclaimed_pages,
                    "retention sweep"
                ),
                Ok(Ok(_)) => debug!("retention sweep: nothing to delete"),
                Ok(Err(e)) => warn!("retention sweep failed: {e}"),
                Err(e) => warn!("retention sweep task failed: {e}"),
            }
        }
    })
}
