//! Maps configured clients (by MAC) to live Snapcast clients, owns
//! per-client `ClientState`, and implements the zone-assignment algorithm
//! (spec §4.3).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::bus::{NotificationBuilder, SharedBus};
use crate::config::ClientConfig;
use crate::domain::{ClientIndex, ClientState, ZoneIndex};
use crate::error::{Result, SnapDogError};
use crate::snapcast::types::{Group, SnapClient};
use crate::snapcast::{SharedSnapcastRepository, SnapcastTransport};
use crate::store::ClientStateStore;

pub struct ClientManager {
    configs: Vec<ClientConfig>,
    /// Stream id each configured zone resolves to, 1-based, used only to
    /// validate `zoneIndex` ranges and resolve `assignClientToZone` targets.
    zone_streams: Vec<String>,
    store: ClientStateStore,
    repository: SharedSnapcastRepository,
    transport: Arc<SnapcastTransport>,
    bus: SharedBus,
    /// One mutex per `clientIndex`, guarding mutation of that client only.
    locks: HashMap<ClientIndex, Arc<Mutex<()>>>,
}

impl ClientManager {
    pub fn new(
        configs: Vec<ClientConfig>,
        zone_streams: Vec<String>,
        repository: SharedSnapcastRepository,
        transport: Arc<SnapcastTransport>,
        bus: SharedBus,
    ) -> Arc<Self> {
        let mut locks = HashMap::new();
        let store = ClientStateStore::new();
        for (i, cfg) in configs.iter().enumerate() {
            let index = (i + 1) as ClientIndex;
            locks.insert(index, Arc::new(Mutex::new(())));
        }
        let manager = Arc::new(ClientManager {
            configs,
            zone_streams,
            store,
            repository,
            transport,
            bus,
            locks,
        });
        manager
    }

    /// Seeds the state store from configuration; call once at startup.
    pub async fn hydrate(&self) {
        for (i, cfg) in self.configs.iter().enumerate() {
            let index = (i + 1) as ClientIndex;
            let state = ClientState::from_config(
                index,
                cfg.name.clone(),
                cfg.mac.clone(),
                cfg.default_zone,
                cfg.icon.clone(),
            );
            self.store.initialize(index, state).await;
        }
    }

    fn validate_index(&self, index: ClientIndex) -> Result<()> {
        if index == 0 || index as usize > self.configs.len() {
            return Err(SnapDogError::InvalidArgument(format!(
                "client index {index} out of range 1..={}",
                self.configs.len()
            )));
        }
        Ok(())
    }

    fn validate_zone_index(&self, zone: ZoneIndex) -> Result<()> {
        if zone == 0 || zone as usize > self.zone_streams.len() {
            return Err(SnapDogError::InvalidArgument(format!(
                "zone index {zone} out of range 1..={}",
                self.zone_streams.len()
            )));
        }
        Ok(())
    }

    fn lock_for(&self, index: ClientIndex) -> Result<Arc<Mutex<()>>> {
        self.locks
            .get(&index)
            .cloned()
            .ok_or_else(|| SnapDogError::InvalidArgument(format!("no such client {index}")))
    }

    pub async fn get_client_state(&self, index: ClientIndex) -> Result<ClientState> {
        self.validate_index(index)?;
        self.store
            .get(index)
            .await
            .ok_or_else(|| SnapDogError::NotFound(format!("client {index} not found")))
    }

    pub async fn get_all_clients(&self) -> Vec<ClientState> {
        let mut all: Vec<_> = self.store.get_all().await.into_values().collect();
        all.sort_by_key(|c| c.client_index);
        all
    }

    pub async fn get_clients_by_zone(&self, zone: ZoneIndex) -> Vec<ClientState> {
        self.get_all_clients()
            .await
            .into_iter()
            .filter(|c| c.zone_index == zone)
            .collect()
    }

    /// Returns `(clientIndex, client?)` via MAC lookup, used by event
    /// handlers translating a Snapcast-id-keyed event into a domain index.
    pub async fn get_client_by_snapcast_id(&self, id: &str) -> (Option<ClientIndex>, Option<SnapClient>) {
        let client = self.repository.get_client(id).await;
        let index = self.repository.index_for_snapcast_id(id).await;
        (index, client)
    }

    /// Folds a repository-applied Snapcast event into the configured
    /// client's local state, publishing the field-level notification(s)
    /// that actually changed plus the canonical `ClientStateChanged`
    /// (spec §4.2 "changed" signal, §4.3 event handlers). A no-op for
    /// events about clients outside the configured set, or for
    /// group/stream/server-level changes the Client Manager doesn't own.
    pub async fn handle_snapcast_change(&self, change: crate::snapcast::repository::AppliedChange) {
        use crate::snapcast::repository::AppliedChange;
        let snapcast_id = match &change {
            AppliedChange::ClientConnection(id) | AppliedChange::ClientProperty(id) => id.clone(),
            _ => return,
        };
        let Some(index) = self.repository.index_for_snapcast_id(&snapcast_id).await else {
            return;
        };
        let Some(snap) = self.repository.get_client(&snapcast_id).await else {
            return;
        };
        let Some(lock) = self.locks.get(&index).cloned() else {
            return;
        };
        let _guard = lock.lock().await;
        let Ok(mut state) = self.get_client_state(index).await else {
            return;
        };

        let was_connected = state.connected;
        let was_volume = state.volume;
        let was_mute = state.mute;
        let was_latency = state.latency_ms;

        state.connected = snap.connected;
        state.snapcast_id = snap.id.clone();
        state.volume = snap.config.volume.percent;
        state.mute = snap.config.volume.muted;
        state.latency_ms = snap.config.latency;
        state.host_ip_address = Some(snap.host.ip.clone());
        state.host_name = Some(snap.host.name.clone());
        state.host_os = Some(snap.host.os.clone());
        state.host_arch = Some(snap.host.arch.clone());
        if snap.connected {
            state.last_seen_utc = Some(chrono::Utc::now());
        }
        self.store.set(index, state.clone()).await;

        if was_connected != state.connected {
            self.bus.publish(NotificationBuilder::client_connection(index, state.connected));
        }
        if was_volume != state.volume {
            self.bus.publish(NotificationBuilder::client_volume(index, state.volume));
        }
        if was_mute != state.mute {
            self.bus.publish(NotificationBuilder::client_mute(index, state.mute));
        }
        if was_latency != state.latency_ms {
            self.bus.publish(NotificationBuilder::client_latency(index, state.latency_ms));
        }
        self.bus.publish(NotificationBuilder::client_state_changed(index));
    }

    async fn resolve_live_client(&self, index: ClientIndex) -> Result<SnapClient> {
        self.repository
            .get_client_by_index(index)
            .await
            .ok_or_else(|| SnapDogError::NotFound(format!("client {index} not currently live")))
    }

    pub async fn set_client_volume(&self, index: ClientIndex, volume: i32) -> Result<()> {
        self.validate_index(index)?;
        let lock = self.lock_for(index)?;
        let _guard = lock.lock().await;

        let snap_client = self.resolve_live_client(index).await?;
        let clamped = crate::domain::ZoneState::clamp_volume(volume);

        self.transport
            .request(
                "Client.SetVolume",
                Some(serde_json::json!({
                    "id": snap_client.id,
                    "volume": { "percent": clamped, "muted": snap_client.config.volume.muted },
                })),
            )
            .await?;

        let mut state = self.get_client_state(index).await?;
        state.volume = clamped;
        self.store.set(index, state).await;
        self.bus.publish(NotificationBuilder::client_volume(index, clamped));
        Ok(())
    }

    pub async fn set_client_mute(&self, index: ClientIndex, muted: bool) -> Result<()> {
        self.validate_index(index)?;
        let lock = self.lock_for(index)?;
        let _guard = lock.lock().await;

        let snap_client = self.resolve_live_client(index).await?;

        self.transport
            .request(
                "Client.SetVolume",
                Some(serde_json::json!({
                    "id": snap_client.id,
                    "volume": { "percent": snap_client.config.volume.percent, "muted": muted },
                })),
            )
            .await?;

        let mut state = self.get_client_state(index).await?;
        state.mute = muted;
        self.store.set(index, state).await;
        self.bus.publish(NotificationBuilder::client_mute(index, muted));
        Ok(())
    }

    pub async fn set_client_latency(&self, index: ClientIndex, latency_ms: i32) -> Result<()> {
        self.validate_index(index)?;
        let lock = self.lock_for(index)?;
        let _guard = lock.lock().await;

        let snap_client = self.resolve_live_client(index).await?;
        self.transport
            .request(
                "Client.SetLatency",
                Some(serde_json::json!({ "id": snap_client.id, "latency": latency_ms })),
            )
            .await?;

        let mut state = self.get_client_state(index).await?;
        state.latency_ms = latency_ms;
        self.store.set(index, state).await;
        self.bus.publish(NotificationBuilder::client_latency(index, latency_ms));
        Ok(())
    }

    pub async fn set_client_name(&self, index: ClientIndex, name: String) -> Result<()> {
        self.validate_index(index)?;
        let lock = self.lock_for(index)?;
        let _guard = lock.lock().await;

        let snap_client = self.resolve_live_client(index).await?;
        self.transport
            .request(
                "Client.SetName",
                Some(serde_json::json!({ "id": snap_client.id, "name": name })),
            )
            .await?;

        let mut state = self.get_client_state(index).await?;
        state.configured_snapcast_name = name.clone();
        self.store.set(index, state).await;
        self.bus.publish(NotificationBuilder::client_name(index, name));
        Ok(())
    }

    /// The central zone-assignment algorithm (spec §4.3). Idempotent:
    /// re-issuing with the same inputs yields no state change and no error
    /// beyond the already-current assignment.
    pub async fn assign_client_to_zone(&self, index: ClientIndex, zone: ZoneIndex) -> Result<()> {
        self.validate_index(index)?;
        self.validate_zone_index(zone)?;
        let lock = self.lock_for(index)?;
        let _guard = lock.lock().await;

        let snap_client = self.resolve_live_client(index).await?;
        let target_stream = self.zone_streams[(zone - 1) as usize].clone();

        let mut state = self.get_client_state(index).await?;
        if state.assigned && state.zone_index == zone {
            // Idempotent no-op: same assignment, no RPC, no notification.
            return Ok(());
        }

        let target_group = self.find_or_create_group_for_stream(&target_stream).await?;

        let mut client_ids: Vec<String> = target_group.clients.iter().map(|c| c.id.clone()).collect();
        if !client_ids.contains(&snap_client.id) {
            client_ids.push(snap_client.id.clone());
        }
        self.transport
            .request(
                "Group.SetClients",
                Some(serde_json::json!({ "id": target_group.id, "clients": client_ids })),
            )
            .await?;

        let old_zone = state.zone_index;
        state.zone_index = zone;
        state.assigned = true;
        self.store.set(index, state).await;

        info!("client {index} assigned to zone {zone}");
        self.bus.publish(NotificationBuilder::client_zone(index, old_zone, zone));
        self.bus.publish(NotificationBuilder::client_state_changed(index));
        Ok(())
    }

    async fn find_or_create_group_for_stream(&self, target_stream: &str) -> Result<Group> {
        if let Some(group) = self.repository.get_group_for_stream(target_stream).await {
            return Ok(group);
        }
        let group = match self.repository.get_group_with_empty_stream().await {
            Some(g) => g,
            None => self
                .repository
                .get_any_group()
                .await
                .ok_or_else(|| SnapDogError::Unavailable("no snapcast groups available".into()))?,
        };
        self.transport
            .request(
                "Group.SetStream",
                Some(serde_json::json!({ "id": group.id, "stream_id": target_stream })),
            )
            .await?;
        let mut updated = group;
        updated.stream_id = target_stream.to_string();
        Ok(updated)
    }
}

/// Minimal capability `ZoneService` needs from the Client Manager, so the
/// two components reference each other only through a narrow interface
/// rather than holding a direct cyclic reference (design note in spec §9).
#[async_trait]
pub trait ClientAssigner: Send + Sync {
    async fn assign_client_to_zone(&self, client_index: ClientIndex, zone_index: ZoneIndex) -> Result<()>;
    async fn get_clients_by_zone(&self, zone_index: ZoneIndex) -> Vec<ClientState>;
    async fn set_client_volume(&self, client_index: ClientIndex, volume: i32) -> Result<()>;
    async fn set_client_mute(&self, client_index: ClientIndex, muted: bool) -> Result<()>;
}

#[async_trait]
impl ClientAssigner for ClientManager {
    async fn assign_client_to_zone(&self, client_index: ClientIndex, zone_index: ZoneIndex) -> Result<()> {
        self.assign_client_to_zone(client_index, zone_index).await
    }

    async fn get_clients_by_zone(&self, zone_index: ZoneIndex) -> Vec<ClientState> {
        self.get_clients_by_zone(zone_index).await
    }

    async fn set_client_volume(&self, client_index: ClientIndex, volume: i32) -> Result<()> {
        self.set_client_volume(client_index, volume).await
    }

    async fn set_client_mute(&self, client_index: ClientIndex, muted: bool) -> Result<()> {
        self.set_client_mute(client_index, muted).await
    }
}

/// Proportional volume scaling across a group's clients (spec §4.3).
/// Preserves relative balance; `v_g` is the arithmetic mean of current
/// volumes.
pub fn scale_group_volumes(current: &[u8], target: u8) -> Vec<u8> {
    if current.is_empty() {
        return Vec::new();
    }
    let target = target as f64;
    let v_g = current.iter().map(|&v| v as f64).sum::<f64>() / current.len() as f64;
    let delta = target - v_g;

    if v_g == 0.0 && delta > 0.0 {
        return vec![target.round().clamp(0.0, 100.0) as u8; current.len()];
    }
    if v_g == 100.0 && delta < 0.0 {
        return vec![target.round().clamp(0.0, 100.0) as u8; current.len()];
    }

    current
        .iter()
        .map(|&v_c| {
            let v_c = v_c as f64;
            let scaled = if delta < 0.0 {
                v_c - (delta.abs() / v_g) * v_c
            } else if delta > 0.0 {
                v_c + (delta / (100.0 - v_g)) * (100.0 - v_c)
            } else {
                v_c
            };
            scaled.round().clamp(0.0, 100.0) as u8
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proportional_scaling_matches_scenario_2() {
        // 3 clients at 20/40/60, v_g=40, target=80 ⇒ 73/80/87.
        let scaled = scale_group_volumes(&[20, 40, 60], 80);
        assert_eq!(scaled, vec![73, 80, 87]);
    }

    #[test]
    fn zero_group_volume_with_positive_delta_sets_all_to_target() {
        let scaled = scale_group_volumes(&[0, 0, 0], 50);
        assert_eq!(scaled, vec![50, 50, 50]);
    }

    #[test]
    fn full_group_volume_with_negative_delta_sets_all_to_target() {
        let scaled = scale_group_volumes(&[100, 100], 30);
        assert_eq!(scaled, vec![30, 30]);
    }

    #[test]
    fn empty_group_is_a_no_op() {
        let scaled = scale_group_volumes(&[], 50);
        assert!(scaled.is_empty());
    }

    #[test]
    fn invariant_one_volume_always_in_bounds() {
        for target in [0u8, 5, 50, 95, 100] {
            for &v_g_sample in &[[10u8, 90], [0, 0], [100, 100], [33, 66]] {
                let scaled = scale_group_volumes(&v_g_sample, target);
                for v in scaled {
                    assert!(v <= 100);
                }
            }
        }
    }

    use crate::snapcast::repository::AppliedChange;
    use crate::snapcast::types::{Group, HostInfo, Server};
    use crate::snapcast::SnapcastStateRepository;

    async fn manager_with_one_client() -> (Arc<ClientManager>, SharedSnapcastRepository) {
        let repository = Arc::new(SnapcastStateRepository::new(vec!["aa:bb:cc:dd:ee:01".into()]));
        repository
            .replace_server(Server {
                groups: vec![Group {
                    id: "g1".into(),
                    stream_id: "Zone1".into(),
                    clients: vec![SnapClient {
                        id: "snap-1".into(),
                        host: HostInfo {
                            mac: "aa:bb:cc:dd:ee:01".into(),
                            ..Default::default()
                        },
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            })
            .await;
        let transport = crate::snapcast::SnapcastTransport::new("127.0.0.1".into(), 1, std::time::Duration::from_millis(50));
        let manager = ClientManager::new(
            vec![ClientConfig {
                name: "Living Room".into(),
                mac: "aa:bb:cc:dd:ee:01".into(),
                default_zone: 1,
                icon: None,
            }],
            vec!["Zone1".into()],
            repository.clone(),
            transport,
            crate::bus::create_bus(),
        );
        manager.hydrate().await;
        (manager, repository)
    }

    #[tokio::test]
    async fn handle_snapcast_change_applies_volume_to_configured_client() {
        let (manager, repository) = manager_with_one_client().await;
        repository
            .apply_event(&crate::snapcast::SnapcastNotification {
                kind: crate::snapcast::SnapcastEventKind::ClientOnVolumeChanged,
                params: Some(serde_json::json!({ "id": "snap-1", "volume": { "percent": 77, "muted": false } })),
            })
            .await;
        manager
            .handle_snapcast_change(AppliedChange::ClientProperty("snap-1".into()))
            .await;
        let state = manager.get_client_state(1).await.unwrap();
        assert_eq!(state.volume, 77);
    }

    #[tokio::test]
    async fn handle_snapcast_change_ignores_client_outside_configured_set() {
        let (manager, repository) = manager_with_one_client().await;
        repository
            .apply_event(&crate::snapcast::SnapcastNotification {
                kind: crate::snapcast::SnapcastEventKind::ClientOnDisconnect,
                params: Some(serde_json::json!({ "id": "ghost" })),
            })
            .await;
        // Should not panic or touch client 1's state.
        manager
            .handle_snapcast_change(AppliedChange::ClientConnection("ghost".into()))
            .await;
        let state = manager.get_client_state(1).await.unwrap();
        assert!(!state.connected);
    }
}
