/**
 * PULSE KERNEL - Point d'entrée du service de monitoring
 *
 * RÔLE : charge la config, ouvre l'historique SQLite, démarre le scheduler,
 * la rétention et le bridge MQTT optionnel, puis sert l'API sur le port 9800.
 * Ctrl+C / SIGTERM : arrêt propre des tâches avant de quitter.
 */

use anyhow::Context;
use pulse_kernel::config::load_config;
use pulse_kernel::sampler::HostSampler;
use pulse_kernel::store::RetentionStore;
use pulse_kernel::{http, mqtt, Kernel, KernelOptions};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel (PULSE_CONFIG, RUST_LOG...)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pulse_kernel=info,pulse_probes=info")),
        )
        .init();

    let cfg = load_config().await;
    let addr = cfg.listen_addr()?;

    let store = RetentionStore::open(&cfg.database)
        .with_context(|| format!("failed to open {}", cfg.database.display()))?
        .with_prune_chunk(cfg.retention.prune_chunk);
    info!(path = %cfg.database.display(), "history store ready");

    let mut kernel = Kernel::new(
        Arc::new(HostSampler::new()),
        Arc::new(store),
        KernelOptions::from_config(&cfg),
    );
    kernel.start();

    if let Some(mqtt_conf) = cfg.mqtt.clone() {
        let bridge = mqtt::spawn_mqtt_bridge(
            mqtt_conf,
            kernel.scheduler.clone(),
            kernel.broadcaster.clone(),
            kernel.health_tracker.clone(),
        );
        kernel.attach(bridge);
    }

    let app = http::build_router(kernel.app_state());
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    kernel.shutdown();
    info!("pulse kernel stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
