//! One Zone Service per configured zone: owns per-zone `ZoneState`,
//! coordinates playback lifecycle, volume scaling, track/playlist
//! navigation, and Snapcast group binding (spec §4.4).

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::bus::{NotificationBuilder, SharedBus};
use crate::client::manager::{scale_group_volumes, ClientAssigner};
use crate::domain::{PlaybackState, TrackInfo, ZoneIndex, ZoneState};
use crate::error::{Result, SnapDogError};
use crate::media::MediaPlayerSupervisor;
use crate::playlist::PlaylistProvider;
use crate::snapcast::{SharedSnapcastRepository, SnapcastTransport};
use crate::store::ZoneStateStore;

pub struct ZoneStateSnapshot {
    pub state: ZoneState,
    pub stale: bool,
}

pub struct ZoneService {
    pub zone_index: ZoneIndex,
    store: Arc<ZoneStateStore>,
    lock: Mutex<()>,
    client_assigner: Arc<dyn ClientAssigner>,
    media: Arc<MediaPlayerSupervisor>,
    playlist: Arc<dyn PlaylistProvider>,
    repository: SharedSnapcastRepository,
    transport: Arc<SnapcastTransport>,
    bus: SharedBus,
}

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const STALE_READ_TIMEOUT: Duration = Duration::from_secs(3);

impl ZoneService {
    pub fn new(
        zone_index: ZoneIndex,
        store: Arc<ZoneStateStore>,
        client_assigner: Arc<dyn ClientAssigner>,
        media: Arc<MediaPlayerSupervisor>,
        playlist: Arc<dyn PlaylistProvider>,
        repository: SharedSnapcastRepository,
        transport: Arc<SnapcastTransport>,
        bus: SharedBus,
    ) -> Self {
        ZoneService {
            zone_index,
            store,
            lock: Mutex::new(()),
            client_assigner,
            media,
            playlist,
            repository,
            transport,
            bus,
        }
    }

    /// Seeds the zone's default state from configuration. Only takes
    /// effect on first call per zone; re-hydrating never clobbers live
    /// state (mirrors `ClientManager::hydrate`).
    pub async fn seed_default(&self, name: String, stream_id: String) {
        self.store
            .initialize(self.zone_index, ZoneState::new(self.zone_index, name, stream_id))
            .await;
    }

    /// Binds the zone to its Snapcast group if one already references its
    /// stream. Errors are logged, not propagated, so the manager can keep
    /// initialising the remaining zones (spec §7 "partial-success startup").
    pub async fn initialize(&self) {
        // A fresh deployment may have no matching group yet; that is not
        // an error, just an unbound zone until the first client joins.
        self.sync_from_snapcast().await;
        info!("zone {} initialized", self.zone_index);
    }

    /// Re-derives `snapcast_group_id`/`mute` from whichever group (if any)
    /// currently carries this zone's stream. Called on `initialize()` and
    /// whenever a Snapcast group-level event lands (spec §4.2 "changed"
    /// signal fan-out into the Zone Manager).
    pub async fn sync_from_snapcast(&self) {
        let Ok(mut state) = self.current().await else {
            return;
        };
        let group = self.repository.get_group_for_stream(&state.snapcast_stream_id).await;
        let new_group_id = group.as_ref().map(|g| g.id.clone());
        let new_mute = group.as_ref().map(|g| g.muted).unwrap_or(state.mute);
        if state.snapcast_group_id == new_group_id && state.mute == new_mute {
            return;
        }
        let mute_changed = state.mute != new_mute;
        state.snapcast_group_id = new_group_id;
        state.mute = new_mute;
        self.save(state).await;
        if mute_changed {
            self.bus.publish(NotificationBuilder::zone_mute(self.zone_index, new_mute));
        }
    }

    async fn acquire(&self) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        tokio::time::timeout(LOCK_TIMEOUT, self.lock.lock())
            .await
            .map_err(|_| SnapDogError::DeadlineExceeded(format!("zone {} lock timed out", self.zone_index)))
    }

    async fn current(&self) -> Result<ZoneState> {
        self.store
            .get(self.zone_index)
            .await
            .ok_or_else(|| SnapDogError::NotFound(format!("zone {} not found", self.zone_index)))
    }

    /// `getState` takes the lock with a timeout and returns the last known
    /// state (marked stale) rather than blocking indefinitely.
    pub async fn get_state(&self) -> Result<ZoneStateSnapshot> {
        match tokio::time::timeout(STALE_READ_TIMEOUT, self.lock.lock()).await {
            Ok(_guard) => Ok(ZoneStateSnapshot {
                state: self.current().await?,
                stale: false,
            }),
            Err(_) => Ok(ZoneStateSnapshot {
                state: self.current().await?,
                stale: true,
            }),
        }
    }

    async fn save(&self, state: ZoneState) {
        self.store.set(self.zone_index, state).await;
    }

    /// `play()` — requires `state.track` to be playable.
    pub async fn play(&self) -> Result<()> {
        let _guard = self.acquire().await?;
        let mut state = self.current().await?;
        let track = state
            .track
            .clone()
            .filter(|t| t.is_playable())
            .ok_or_else(|| SnapDogError::FailedPrecondition("No track available to play…".into()))?;

        self.media.play(self.zone_index, track).await?;
        state.playback_state = PlaybackState::Playing;
        self.save(state).await;
        self.bus
            .publish(NotificationBuilder::zone_playback(self.zone_index, PlaybackState::Playing));
        Ok(())
    }

    /// `playTrack(i)` — resolves track `i` from the current playlist.
    pub async fn play_track(&self, index: u32) -> Result<()> {
        let playlist_index = {
            let guard = self.acquire().await?;
            let state = self.current().await?;
            drop(guard);
            state
                .playlist
                .ok_or_else(|| SnapDogError::FailedPrecondition("No playlist selected".into()))?
                .index
        };
        let track = self.playlist.get_track(playlist_index, index).await?;

        let _guard = self.acquire().await?;
        let mut state = self.current().await?;
        state.track = Some(track.clone());
        self.save(state).await;
        drop(_guard);

        self.bus.publish(NotificationBuilder::zone_track(self.zone_index, track));
        self.play().await
    }

    /// `playUrl(url)` — plays a synthetic stream track.
    pub async fn play_url(&self, url: String) -> Result<()> {
        if url.trim().is_empty() {
            return Err(SnapDogError::InvalidArgument("empty url".into()));
        }
        let track = TrackInfo::synthetic_stream(url);
        {
            let _guard = self.acquire().await?;
            let mut state = self.current().await?;
            state.track = Some(track);
            self.save(state).await;
        }
        self.play().await
    }

    pub async fn pause(&self) -> Result<()> {
        let _guard = self.acquire().await?;
        self.media.pause(self.zone_index).await?;
        let mut state = self.current().await?;
        state.playback_state = PlaybackState::Paused;
        self.save(state).await;
        self.bus
            .publish(NotificationBuilder::zone_playback(self.zone_index, PlaybackState::Paused));
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let _guard = self.acquire().await?;
        self.media.stop(self.zone_index).await?;
        let mut state = self.current().await?;
        state.playback_state = PlaybackState::Stopped;
        self.save(state).await;
        self.bus
            .publish(NotificationBuilder::zone_playback(self.zone_index, PlaybackState::Stopped));
        Ok(())
    }

    pub async fn seek_to_position(&self, ms: u64) -> Result<()> {
        let _guard = self.acquire().await?;
        self.media.seek_to_position_ms(self.zone_index, ms).await
    }

    pub async fn seek_to_progress(&self, fraction: f32) -> Result<()> {
        let fraction = fraction.clamp(0.0, 1.0);
        let _guard = self.acquire().await?;
        self.media.seek_to_progress(self.zone_index, fraction).await
    }

    /// `setVolume(v)` — proportional scaling of every client currently in
    /// this zone's group (spec §4.3). An empty group is a no-op success.
    pub async fn set_volume(&self, volume: i32) -> Result<()> {
        let target = ZoneState::clamp_volume(volume);
        let _guard = self.acquire().await?;

        let clients = self.client_assigner.get_clients_by_zone(self.zone_index).await;
        if !clients.is_empty() {
            let current: Vec<u8> = clients.iter().map(|c| c.volume).collect();
            let scaled = scale_group_volumes(&current, target);
            for (client, new_volume) in clients.iter().zip(scaled) {
                if let Err(e) = self
                    .client_assigner
                    .set_client_volume(client.client_index, new_volume as i32)
                    .await
                {
                    warn!("failed to scale client {} volume: {e}", client.client_index);
                }
            }
        }

        let mut state = self.current().await?;
        state.volume = target;
        self.save(state).await;
        self.bus.publish(NotificationBuilder::zone_volume(self.zone_index, target));
        Ok(())
    }

    pub async fn volume_up(&self, step: u8) -> Result<()> {
        let current = self.current().await?.volume;
        self.set_volume(current as i32 + step as i32).await
    }

    pub async fn volume_down(&self, step: u8) -> Result<()> {
        let current = self.current().await?.volume;
        self.set_volume(current as i32 - step as i32).await
    }

    pub async fn set_mute(&self, muted: bool) -> Result<()> {
        let _guard = self.acquire().await?;
        let mut state = self.current().await?;
        if let Some(group_id) = state.snapcast_group_id.clone() {
            self.transport
                .request("Group.SetMute", Some(serde_json::json!({ "id": group_id, "mute": muted })))
                .await?;
        }
        // Redundant re-application of the same value still emits one
        // confirmation but never toggles (spec §8 round-trip property).
        state.mute = muted;
        self.save(state).await;
        self.bus.publish(NotificationBuilder::zone_mute(self.zone_index, muted));
        Ok(())
    }

    pub async fn toggle_mute(&self) -> Result<()> {
        let current = self.current().await?.mute;
        self.set_mute(!current).await
    }

    /// `next`/`previous` navigate via the Playlist Provider; previous is
    /// floor-clamped at index 1.
    pub async fn next_track(&self) -> Result<()> {
        let state = self.current().await?;
        let idx = state.track.map(|t| t.index).unwrap_or(0);
        self.set_track(idx + 1).await
    }

    pub async fn previous_track(&self) -> Result<()> {
        let state = self.current().await?;
        let idx = state.track.map(|t| t.index).unwrap_or(1);
        let target = idx.saturating_sub(1).max(1);
        self.set_track(target).await
    }

    pub async fn set_track(&self, index: u32) -> Result<()> {
        let was_playing = {
            let guard = self.acquire().await?;
            let state = self.current().await?;
            drop(guard);
            state.playback_state == PlaybackState::Playing
        };
        if was_playing {
            self.play_track(index).await
        } else {
            let playlist_index = self
                .current()
                .await?
                .playlist
                .ok_or_else(|| SnapDogError::FailedPrecondition("No playlist selected".into()))?
                .index;
            let track = self.playlist.get_track(playlist_index, index).await?;
            let _guard = self.acquire().await?;
            let mut state = self.current().await?;
            state.track = Some(track.clone());
            self.save(state).await;
            drop(_guard);
            self.bus.publish(NotificationBuilder::zone_track(self.zone_index, track));
            Ok(())
        }
    }

    /// `setPlaylist(i|id)` — resolves via the provider; does not auto-play.
    pub async fn set_playlist(&self, index_or_id: &str) -> Result<()> {
        let playlist = self.playlist.get_playlist(index_or_id).await?;
        let _guard = self.acquire().await?;
        let mut state = self.current().await?;
        let has_current_track = match &state.track {
            Some(t) if !t.is_none() => self
                .playlist
                .get_track(playlist.index, t.index)
                .await
                .is_ok(),
            _ => true,
        };
        if !has_current_track {
            state.track = Some(TrackInfo::none());
        }
        state.playlist = Some(playlist.clone());
        self.save(state).await;
        self.bus
            .publish(NotificationBuilder::zone_playlist(self.zone_index, playlist));
        Ok(())
    }

    pub async fn set_track_repeat(&self, enabled: bool) -> Result<()> {
        let mut state = self.current().await?;
        state.track_repeat = enabled;
        self.save(state).await;
        Ok(())
    }

    pub async fn set_playlist_repeat(&self, enabled: bool) -> Result<()> {
        let mut state = self.current().await?;
        state.playlist_repeat = enabled;
        self.save(state).await;
        Ok(())
    }

    pub async fn set_shuffle(&self, enabled: bool) -> Result<()> {
        let mut state = self.current().await?;
        state.playlist_shuffle = enabled;
        self.save(state).await;
        Ok(())
    }

    /// Reconciles the position pump's `PositionChanged` feed into zone
    /// state (spec §4.4 event integration).
    pub async fn on_player_position_changed(&self, position_ms: u64, progress: f32, duration_ms: Option<u64>) {
        if let Ok(mut state) = self.current().await {
            let changed = state.track.as_ref().map(|t| t.position_ms) != Some(position_ms);
            if let Some(track) = state.track.as_mut() {
                track.position_ms = position_ms;
                track.progress = progress;
                if duration_ms.is_some() {
                    track.duration_ms = duration_ms;
                }
            }
            self.save(state).await;
            if changed {
                self.bus.publish(NotificationBuilder::zone_progress(
                    self.zone_index,
                    position_ms,
                    progress * 100.0,
                ));
            }
        }
    }

    pub async fn on_player_state_changed(&self, is_playing: bool, vendor_state: PlaybackState) {
        if let Ok(mut state) = self.current().await {
            let previous = state.playback_state;
            state.playback_state = vendor_state;
            self.save(state).await;
            if previous != vendor_state {
                self.bus
                    .publish(NotificationBuilder::zone_track_playing_status(self.zone_index, is_playing));
            }
        }
    }

    pub async fn on_player_track_info_changed(&self, track: TrackInfo) {
        if let Ok(mut state) = self.current().await {
            state.track = Some(track.clone());
            self.save(state).await;
            self.bus.publish(NotificationBuilder::zone_track(self.zone_index, track));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::create_bus;
    use crate::domain::ClientState;
    use async_trait::async_trait;
    use std::sync::Arc;

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

    async fn zone_service() -> (ZoneService, Arc<ZoneStateStore>) {
        let store = Arc::new(ZoneStateStore::new());
        store
            .initialize(1, ZoneState::new(1, "Living Room".into(), "Zone1".into()))
            .await;
        let bus = create_bus();
        let media = MediaPlayerSupervisor::new(Duration::from_millis(20));
        let repository = Arc::new(crate::snapcast::SnapcastStateRepository::new(vec![]));
        let transport = crate::snapcast::SnapcastTransport::new("127.0.0.1".into(), 1, Duration::from_millis(50));
        let service = ZoneService::new(
            1,
            store.clone(),
            Arc::new(NoClients),
            media,
            Arc::new(crate::playlist::NullPlaylistProvider),
            repository,
            transport,
            bus,
        );
        (service, store)
    }

    #[tokio::test]
    async fn play_without_track_fails_precondition() {
        let (svc, _store) = zone_service().await;
        let err = svc.play().await.unwrap_err();
        assert!(matches!(err, SnapDogError::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn play_url_then_play_succeeds_and_sets_playing() {
        let (svc, store) = zone_service().await;
        svc.play_url("http://example/stream".into()).await.unwrap();
        let state = store.get(1).await.unwrap();
        assert_eq!(state.playback_state, PlaybackState::Playing);
        assert!(state.invariant_holds());
    }

    #[tokio::test]
    async fn empty_group_volume_set_is_a_no_op_success() {
        let (svc, store) = zone_service().await;
        svc.set_volume(55).await.unwrap();
        assert_eq!(store.get(1).await.unwrap().volume, 55);
    }

    #[tokio::test]
    async fn set_volume_clamps_bounds() {
        let (svc, store) = zone_service().await;
        svc.set_volume(-5).await.unwrap();
        assert_eq!(store.get(1).await.unwrap().volume, 0);
        svc.set_volume(150).await.unwrap();
        assert_eq!(store.get(1).await.unwrap().volume, 100);
    }

    #[tokio::test]
    async fn volume_up_then_down_returns_to_start_without_clamp() {
        let (svc, store) = zone_service().await;
        svc.set_volume(50).await.unwrap();
        svc.volume_up(10).await.unwrap();
        svc.volume_down(10).await.unwrap();
        assert_eq!(store.get(1).await.unwrap().volume, 50);
    }

    #[tokio::test]
    async fn previous_track_floor_clamped_at_one() {
        let (svc, store) = zone_service().await;
        let mut state = store.get(1).await.unwrap();
        state.playlist = Some(crate::domain::PlaylistInfo {
            source: "x".into(),
            index: 1,
            playlist_id: "p1".into(),
            name: "P".into(),
            track_count: 1,
        });
        store.set(1, state).await;
        // NullPlaylistProvider errors on get_track, so previous_track at
        // the floor should propagate NotFound rather than underflow.
        let result = svc.previous_track().await;
        assert!(result.is_err());
    }
}
