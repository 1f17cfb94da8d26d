/**
 * API REST PULSE - Serveur HTTP du kernel
 *
 * RÔLE :
 * Interface entre le dashboard et le kernel : snapshot courant, historique,
 * informations statiques de la machine, réglages et flux WebSocket.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum (port 9800 par défaut), CORS ouvert, pas d'authentification
 * - Routes : /health, /system/health, /api/metrics, /api/history/{kind},
 *   /api/system-info, /api/network-info, /api/settings, /ws
 * - Erreurs : 400 `{error}` pour une requête invalide, 500 `{error}` si la base échoue
 */

use crate::error::QueryError;
use crate::gateway::Broadcaster;
use crate::health::{HealthTracker, KernelHealth};
use crate::models::{MetricKind, Reading, Snapshot};
use crate::sampler::NetworkInfo;
use crate::query::{QueryService, DEFAULT_RANGE_MS};
use crate::scheduler::{EntryStatus, ScheduleManager};
use crate::state::SnapshotCache;
use crate::store::RetentionStore;
use crate::ws;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: ScheduleManager,
    pub store: Arc<RetentionStore>,
    pub query: QueryService,
    pub cache: SnapshotCache,
    pub broadcaster: Broadcaster,
    pub health_tracker: HealthTracker,
}

type ApiError = (StatusCode, Json<Value>);

fn error_response(code: StatusCode, message: impl Into<String>) -> ApiError {
    (code, Json(json!({ "error": message.into() })))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    range: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct SettingsView {
    settings: crate::scheduler::Configuration,
    schedule: Vec<EntryStatus>,
}

pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/api/metrics", get(get_metrics))
        .route("/api/history/{kind}", get(get_history))
        .route("/api/system-info", get(get_system_info))
        .route("/api/network-info", get(get_network_info))
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/ws", get(ws::ws_upgrade))
        .with_state(app_state)
        .layer(cors)
}

// GET /system/health (diagnostic du kernel)
async fn get_system_health(State(app): State<AppState>) -> Result<Json<KernelHealth>, StatusCode> {
    tokio::task::spawn_blocking(move || {
        app.health_tracker
            .get_health(&app.scheduler, &app.store, &app.broadcaster)
    })
    .await
    .map(Json)
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// GET /api/metrics (dernier snapshot, null pour un type jamais échantillonné)
async fn get_metrics(State(app): State<AppState>) -> Json<Snapshot> {
    Json(app.cache.get())
}

// GET /api/history/{kind}?range=<ms>&name=<périphérique>
async fn get_history(
    State(app): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<Reading>>, ApiError> {
    let kind: MetricKind = kind
        .parse()
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid type"))?;
    // range illisible = fenêtre par défaut
    let range_ms = params
        .range
        .as_deref()
        .and_then(|r| r.parse::<i64>().ok())
        .unwrap_or(DEFAULT_RANGE_MS);

    let result = match params.name.as_deref() {
        Some(name) => app.query.device_history(kind, range_ms, name).await,
        None => app.query.history(kind, range_ms).await,
    };

    result.map(Json).map_err(|err| match err {
        QueryError::Store(_) => {
            warn!(%kind, "history query failed: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
        QueryError::InvalidRange(_) | QueryError::NotNarrowable(_) => {
            error_response(StatusCode::BAD_REQUEST, err.to_string())
        }
    })
}

// GET /api/system-info (faits statiques + système, USB, audio)
async fn get_system_info(State(app): State<AppState>) -> Json<Value> {
    let sampler = app.scheduler.sampler();
    let mut facts = serde_json::Map::new();
    for kind in [MetricKind::Cpu, MetricKind::Gpu, MetricKind::System] {
        let value = match sampler.static_facts(kind).await {
            Ok(fields) => serde_json::to_value(fields.as_ref()).unwrap_or(Value::Null),
            Err(e) => {
                warn!(%kind, "static facts unavailable: {e}");
                Value::Null
            }
        };
        facts.insert(kind.to_string(), value);
    }

    let system = current_reading(&app, MetricKind::System).await;
    let usb = current_reading(&app, MetricKind::Usb).await;
    let audio = current_reading(&app, MetricKind::Audio).await;
    Json(json!({
        "static": facts,
        "system": system,
        "usb": usb,
        "audio": audio,
    }))
}

/// Dernière mesure en cache, sinon un échantillon à la demande
async fn current_reading(app: &AppState, kind: MetricKind) -> Option<Reading> {
    if let Some(reading) = app.cache.latest(kind) {
        return Some(reading.as_ref().clone());
    }
    app.scheduler.sampler().sample(kind).await.ok()
}

// GET /api/network-info (adresses IPv4 externes, hostname, plateforme)
async fn get_network_info(State(app): State<AppState>) -> Result<Json<NetworkInfo>, ApiError> {
    app.scheduler.sampler().network_info().await.map(Json).map_err(|e| {
        warn!("network info unavailable: {e}");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

// GET /api/settings (drapeaux optionnels + tâches planifiées)
async fn get_settings(State(app): State<AppState>) -> Json<SettingsView> {
    Json(SettingsView {
        settings: app.scheduler.settings(),
        schedule: app.scheduler.entries(),
    })
}

// POST /api/settings (mise à jour partielle)
async fn update_settings(
    State(app): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let changed = app
        .scheduler
        .apply_settings(&body)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;

    let changed: Vec<Value> = changed
        .into_iter()
        .map(|(kind, enabled)| json!({ "kind": kind, "enabled": enabled }))
        .collect();
    Ok(Json(json!({
        "ok": true,
        "changed": changed,
        "settings": app.scheduler.settings(),
    })))
}
