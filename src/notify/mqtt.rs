//! Bridges the notification bus to MQTT for Home Assistant integration
//! (spec §6 External Interfaces).

use anyhow::{anyhow, Result};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{Notification, SharedBus};

const DEFAULT_TOPIC_PREFIX: &str = "snapdog";

struct MqttState {
    client: Option<AsyncClient>,
    connected: bool,
    running: bool,
}

impl Default for MqttState {
    fn default() -> Self {
        MqttState {
            client: None,
            connected: false,
            running: false,
        }
    }
}

pub struct MqttSink {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    topic_prefix: String,
    state: Arc<RwLock<MqttState>>,
    bus: SharedBus,
    shutdown: RwLock<CancellationToken>,
}

impl MqttSink {
    pub fn new(bus: SharedBus, host: String, port: u16, username: Option<String>, password: Option<String>) -> Self {
        MqttSink {
            host,
            port,
            username,
            password,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            state: Arc::new(RwLock::new(MqttState::default())),
            bus,
            shutdown: RwLock::new(CancellationToken::new()),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }

    async fn start_internal(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.running {
                return Ok(());
            }
            state.running = true;
        }

        let shutdown = {
            let mut token = self.shutdown.write().await;
            *token = CancellationToken::new();
            token.clone()
        };

        if self.host.trim().is_empty() {
            return Err(anyhow!("mqtt host not configured"));
        }

        let mut options = MqttOptions::new("snapdog", &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 100);
        {
            let mut state = self.state.write().await;
            state.client = Some(client);
        }

        let state = self.state.clone();
        let bus = self.bus.clone();
        let prefix = self.topic_prefix.clone();
        let shutdown_for_loop = shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_for_loop.cancelled() => {
                        info!("mqtt event loop shutting down");
                        break;
                    }
                    result = eventloop.poll() => {
                        match result {
                            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                                info!("mqtt connected to {prefix}");
                                state.write().await.connected = true;
                            }
                            Ok(Event::Incoming(Incoming::Disconnect)) => {
                                warn!("mqtt disconnected");
                                state.write().await.connected = false;
                            }
                            Err(e) => {
                                error!("mqtt error: {e}");
                                state.write().await.connected = false;
                                tokio::select! {
                                    _ = shutdown_for_loop.cancelled() => break,
                                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        let state = self.state.clone();
        let prefix = self.topic_prefix.clone();
        let mut rx = self.bus.subscribe();
        let shutdown_for_forwarder = shutdown;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_for_forwarder.cancelled() => {
                        info!("mqtt bus forwarder shutting down");
                        break;
                    }
                    result = rx.recv() => {
                        match result {
                            Ok(envelope) => {
                                let client = state.read().await.client.clone();
                                if let Some(client) = client {
                                    let _ = publish_notification(&client, &prefix, &envelope.notification).await;
                                }
                            }
                            Err(_) => continue,
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop_internal(&self) {
        self.shutdown.read().await.cancel();
        let mut state = self.state.write().await;
        if let Some(client) = state.client.take() {
            let _ = client.disconnect().await;
        }
        state.connected = false;
        state.running = false;
        info!("mqtt sink stopped");
    }
}

async fn publish_notification(client: &AsyncClient, prefix: &str, notification: &Notification) -> Result<()> {
    let (suffix, payload) = match notification {
        Notification::ZonePlaybackChanged { zone_index, state } => {
            (format!("zones/{zone_index}/playback"), serde_json::json!({ "state": state }))
        }
        Notification::ZoneVolumeChanged { zone_index, volume } => {
            (format!("zones/{zone_index}/volume"), serde_json::json!({ "volume": volume }))
        }
        Notification::ZoneMuteChanged { zone_index, muted } => {
            (format!("zones/{zone_index}/mute"), serde_json::json!({ "muted": muted }))
        }
        Notification::ZoneTrackMetadataChanged { zone_index, track } => {
            (format!("zones/{zone_index}/track"), serde_json::json!(track))
        }
        Notification::ZoneProgressChanged {
            zone_index,
            position_ms,
            progress_percent,
        } => (
            format!("zones/{zone_index}/progress"),
            serde_json::json!({ "position_ms": position_ms, "progress_percent": progress_percent }),
        ),
        Notification::ClientVolumeChanged { client_index, volume } => {
            (format!("clients/{client_index}/volume"), serde_json::json!({ "volume": volume }))
        }
        Notification::ClientMuteChanged { client_index, is_muted } => {
            (format!("clients/{client_index}/mute"), serde_json::json!({ "muted": is_muted }))
        }
        Notification::ClientZoneChanged {
            client_index,
            old_zone,
            new_zone,
        } => (
            format!("clients/{client_index}/zone"),
            serde_json::json!({ "old_zone": old_zone, "new_zone": new_zone }),
        ),
        Notification::ClientConnectionChanged {
            client_index,
            is_connected,
        } => (
            format!("clients/{client_index}/connection"),
            serde_json::json!({ "connected": is_connected }),
        ),
        Notification::SystemStatus { connected, message } => {
            ("system/status".to_string(), serde_json::json!({ "connected": connected, "message": message }))
        }
        Notification::ShuttingDown => ("system/shutdown".to_string(), serde_json::json!({ "shutting_down": true })),
        // Remaining variants are thin/internal and intentionally not bridged to MQTT.
        _ => return Ok(()),
    };

    let topic = format!("{prefix}/{suffix}");
    let payload_str = serde_json::to_string(&payload)?;
    client.publish(&topic, QoS::AtMostOnce, false, payload_str.as_bytes()).await?;
    Ok(())
}

crate::impl_startable!(MqttSink, "notify-mqtt");

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_without_host_fails() {
        let bus = crate::bus::create_bus();
        let sink = MqttSink::new(bus, String::new(), 1883, None, None);
        let err = sink.start_internal().await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
