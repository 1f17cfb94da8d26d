/**
 * WEBSOCKET DASHBOARD - Canal temps réel
 *
 * Enveloppe JSON `{"event": ..., "data": ...}` dans les deux sens.
 *
 * Sortant : `metrics` (snapshot à la connexion puis à chaque push coalescé),
 * `history-data` / `history-error`, `settings-error`.
 * Entrant : `update-settings` (réglage partiel), `request-history`
 * (`{timeRange, kinds?}`, une heure et cpu/gpu/memory/network par défaut).
 */

use crate::http::AppState;
use crate::models::MetricKind;
use crate::query::DEFAULT_RANGE_MS;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

const DEFAULT_HISTORY_KINDS: [MetricKind; 4] = [
    MetricKind::Cpu,
    MetricKind::Gpu,
    MetricKind::Memory,
    MetricKind::Network,
];

#[derive(Debug, Deserialize)]
struct ClientEvent {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRequest {
    #[serde(default)]
    time_range: Option<i64>,
    #[serde(default)]
    kinds: Option<Vec<MetricKind>>,
}

// GET /ws
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(app): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

async fn handle_socket(mut socket: WebSocket, app: AppState) {
    let mut updates = app.broadcaster.subscribe();
    info!(subscribers = app.broadcaster.subscriber_count(), "dashboard connected");

    // le client n'attend pas le prochain push pour afficher quelque chose
    if send_event(&mut socket, "metrics", &app.cache.get()).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if handle_event(&mut socket, &app, text.as_str()).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("websocket error: {e}");
                    break;
                }
                Some(Ok(_)) => {}
            },
            snapshot = updates.recv() => match snapshot {
                Some(snapshot) => {
                    if send_event(&mut socket, "metrics", snapshot.as_ref()).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    info!("dashboard disconnected");
}

async fn handle_event(socket: &mut WebSocket, app: &AppState, text: &str) -> Result<(), axum::Error> {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!("ignoring malformed client message: {e}");
            return Ok(());
        }
    };

    match event.event.as_str() {
        "update-settings" => match app.scheduler.apply_settings(&event.data) {
            Ok(changed) => {
                debug!(changed = changed.len(), "settings updated from dashboard");
                Ok(())
            }
            Err(e) => {
                send_event(socket, "settings-error", &json!({ "message": e.to_string() })).await
            }
        },
        "request-history" => {
            let request = if event.data.is_null() {
                HistoryRequest::default()
            } else {
                match serde_json::from_value::<HistoryRequest>(event.data) {
                    Ok(request) => request,
                    Err(e) => {
                        return send_event(socket, "history-error", &json!({ "message": e.to_string() }))
                            .await;
                    }
                }
            };
            let kinds = request.kinds.unwrap_or_else(|| DEFAULT_HISTORY_KINDS.to_vec());
            let range_ms = request.time_range.unwrap_or(DEFAULT_RANGE_MS);

            match app.query.history_many(&kinds, range_ms).await {
                Ok(history) => send_event(socket, "history-data", &history).await,
                Err(e) => {
                    warn!("history request failed: {e}");
                    send_event(socket, "history-error", &json!({ "message": e.to_string() })).await
                }
            }
        }
        other => {
            debug!(event = other, "unknown client event");
            Ok(())
        }
    }
}

async fn send_event<T: Serialize + ?Sized>(
    socket: &mut WebSocket,
    event: &str,
    data: &T,
) -> Result<(), axum::Error> {
    let payload = json!({ "event": event, "data": data });
    socket.send(Message::Text(payload.to_string().into())).await
}
