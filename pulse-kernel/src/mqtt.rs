/**
 * MQTT BRIDGE - Relais optionnel vers un broker
 *
 * Actif seulement si la section `mqtt` est présente dans la config.
 * - publie chaque snapshot coalescé sur pulse/metrics@v1 (QoS 0, jamais bloquant)
 * - écoute pulse/settings@v1 : même JSON partiel que le dashboard
 * - l'état de connexion remonte dans /system/health
 */

use crate::config::MqttConf;
use crate::gateway::Broadcaster;
use crate::health::HealthTracker;
use crate::scheduler::{ScheduleManager, SettingsUpdate};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const METRICS_TOPIC: &str = "pulse/metrics@v1";
pub const SETTINGS_TOPIC: &str = "pulse/settings@v1";

pub fn spawn_mqtt_bridge(
    conf: MqttConf,
    scheduler: ScheduleManager,
    broadcaster: Broadcaster,
    health: HealthTracker,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut opts = MqttOptions::new(conf.client_id.as_str(), conf.host.as_str(), conf.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 10);
        let mut updates = broadcaster.subscribe();
        info!(host = %conf.host, port = conf.port, "MQTT bridge starting");

        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        health.mark_mqtt_connected();
                        info!("MQTT connected");
                        // session propre : l'abonnement est à refaire à chaque connexion
                        if let Err(e) = client.try_subscribe(SETTINGS_TOPIC, QoS::AtLeastOnce) {
                            warn!("MQTT subscribe failed: {e}");
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == SETTINGS_TOPIC => {
                        match settings_from_payload(&p.payload) {
                            Ok(update) => {
                                let changed = scheduler.reconfigure(&update);
                                debug!(changed = changed.len(), "settings updated over MQTT");
                            }
                            Err(e) => warn!("rejected MQTT settings: {e}"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT error: {e}");
                        health.increment_reconnects();
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                },
                snapshot = updates.recv() => match snapshot {
                    Some(snapshot) => match serde_json::to_vec(snapshot.as_ref()) {
                        Ok(payload) => {
                            // file pleine ou broker absent : on saute ce snapshot
                            if let Err(e) = client.try_publish(METRICS_TOPIC, QoS::AtMostOnce, false, payload) {
                                debug!("snapshot not published: {e}");
                            }
                        }
                        Err(e) => warn!("snapshot serialization failed: {e}"),
                    },
                    None => break,
                },
            }
        }
    })
}

fn settings_from_payload(payload: &[u8]) -> anyhow::Result<SettingsUpdate> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    Ok(SettingsUpdate::from_json(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricKind;

    #[test]
    fn test_settings_payload_decoding() {
        let update = settings_from_payload(br#"{"diskEnabled": true}"#).unwrap();
        assert_eq!(update.iter().collect::<Vec<_>>(), vec![(MetricKind::Disk, true)]);

        assert!(settings_from_payload(b"not json").is_err());
        let err = settings_from_payload(br#"{"memory": false}"#).unwrap_err();
        assert!(err.to_string().contains("essential"));
    }
}
