//! Builds one `ZoneService` per configured zone and exposes a flat
//! lookup surface for the JSON-RPC/HTTP front doors (spec §4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::SharedBus;
use crate::client::manager::ClientAssigner;
use crate::config::{stream_id_from_sink, ZoneConfig};
use crate::domain::{ZoneIndex, ZoneState};
use crate::error::{Result, SnapDogError};
use crate::media::MediaPlayerSupervisor;
use crate::playlist::PlaylistProvider;
use crate::snapcast::{SharedSnapcastRepository, SnapcastTransport};
use crate::store::ZoneStateStore;
use crate::zone::service::{ZoneService, ZoneStateSnapshot};

pub struct ZoneManager {
    services: HashMap<ZoneIndex, Arc<ZoneService>>,
    order: Vec<ZoneIndex>,
    seed: Vec<(ZoneIndex, String, String)>,
    media: Arc<MediaPlayerSupervisor>,
}

impl ZoneManager {
    pub fn new(
        configs: &[ZoneConfig],
        client_assigner: Arc<dyn ClientAssigner>,
        playlist: Arc<dyn PlaylistProvider>,
        repository: SharedSnapcastRepository,
        transport: Arc<SnapcastTransport>,
        bus: SharedBus,
        progress_interval: Duration,
    ) -> Arc<Self> {
        let media = MediaPlayerSupervisor::new(progress_interval);
        let mut services = HashMap::new();
        let mut order = Vec::new();
        let mut seed = Vec::new();

        for (i, cfg) in configs.iter().enumerate() {
            let zone_index = (i + 1) as ZoneIndex;
            let store = Arc::new(ZoneStateStore::new());
            let service = Arc::new(ZoneService::new(
                zone_index,
                store,
                client_assigner.clone(),
                media.clone(),
                playlist.clone(),
                repository.clone(),
                transport.clone(),
                bus.clone(),
            ));
            services.insert(zone_index, service);
            order.push(zone_index);
            seed.push((zone_index, cfg.name.clone(), stream_id_from_sink(&cfg.sink)));
        }

        Arc::new(ZoneManager { services, order, seed, media })
    }

    /// The media supervisor shared by every zone's service, exposed so the
    /// top-level supervisor can bridge its events into zone handlers.
    pub fn media(&self) -> Arc<MediaPlayerSupervisor> {
        self.media.clone()
    }

    /// Seeds every zone's default state from configuration; call once at
    /// startup before serving any request.
    pub async fn hydrate(&self) {
        for (zone_index, name, stream_id) in &self.seed {
            if let Ok(service) = self.get(*zone_index) {
                service.seed_default(name.clone(), stream_id.clone()).await;
            }
        }
    }

    pub async fn initialize_all(&self) {
        for zone_index in &self.order {
            if let Some(service) = self.services.get(zone_index) {
                service.initialize().await;
            }
        }
    }

    /// Re-derives every zone's Snapcast group binding. Called after any
    /// Group/Stream/Server-level event and after reconnect snapshot
    /// hydration (spec §4.2 "changed" signal fan-out).
    pub async fn resync_all_from_snapcast(&self) {
        for zone_index in &self.order {
            if let Some(service) = self.services.get(zone_index) {
                service.sync_from_snapcast().await;
            }
        }
    }

    fn get(&self, zone_index: ZoneIndex) -> Result<&Arc<ZoneService>> {
        self.services.get(&zone_index).ok_or_else(|| {
            SnapDogError::InvalidArgument(format!("zone {zone_index} out of range 1..={}", self.order.len()))
        })
    }

    pub fn service(&self, zone_index: ZoneIndex) -> Result<Arc<ZoneService>> {
        self.get(zone_index).cloned()
    }

    pub async fn get_zone_state(&self, zone_index: ZoneIndex) -> Result<ZoneStateSnapshot> {
        self.get(zone_index)?.get_state().await
    }

    pub async fn get_all_zone_states(&self) -> Vec<ZoneState> {
        let mut all = Vec::new();
        for zone_index in &self.order {
            if let Some(service) = self.services.get(zone_index) {
                if let Ok(snapshot) = service.get_state().await {
                    all.push(snapshot.state);
                }
            }
        }
        all
    }

    pub fn zone_count(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::create_bus;
    use crate::domain::ClientState;
    use async_trait::async_trait;

    struct NoClients;
    #[async_trait]
    impl ClientAssigner for NoClients {
        async fn assign_client_to_zone(&self, _c: u32, _z: u32) -> Result<()> {
            Ok(())
        }
        async fn get_clients_by_zone(&self, _z: u32) -> Vec<ClientState> {
            vec![]
        }
        async fn set_client_volume(&self, _c: u32, _v: i32) -> Result<()> {
            Ok(())
        }
        async fn set_client_mute(&self, _c: u32, _m: bool) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn builds_one_service_per_configured_zone_and_hydrates_names() {
        let configs = vec![
            ZoneConfig {
                name: "Living Room".into(),
                sink: "/snapsinks/zone1".into(),
                default_stream: None,
            },
            ZoneConfig {
                name: "Kitchen".into(),
                sink: "/snapsinks/zone2".into(),
                default_stream: None,
            },
        ];
        let manager = ZoneManager::new(
            &configs,
            Arc::new(NoClients),
            Arc::new(crate::playlist::NullPlaylistProvider),
            Arc::new(crate::snapcast::SnapcastStateRepository::new(vec![])),
            crate::snapcast::SnapcastTransport::new("127.0.0.1".into(), 1, Duration::from_millis(50)),
            create_bus(),
            Duration::from_millis(50),
        );
        manager.hydrate().await;
        assert_eq!(manager.zone_count(), 2);
        let states = manager.get_all_zone_states().await;
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].name, "Living Room");
    }

    #[tokio::test]
    async fn out_of_range_zone_index_is_invalid_argument() {
        let manager = ZoneManager::new(
            &[ZoneConfig {
                name: "Living Room".into(),
                sink: "/snapsinks/zone1".into(),
                default_stream: None,
            }],
            Arc::new(NoClients),
            Arc::new(crate::playlist::NullPlaylistProvider),
            Arc::new(crate::snapcast::SnapcastStateRepository::new(vec![])),
            crate::snapcast::SnapcastTransport::new("127.0.0.1".into(), 1, Duration::from_millis(50)),
            create_bus(),
            Duration::from_millis(50),
        );
        manager.hydrate().await;
        let err = manager.get_zone_state(99).await.unwrap_err();
        assert!(matches!(err, SnapDogError::InvalidArgument(_)));
    }
}
