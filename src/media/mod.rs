//! One logical media player per zone: plays a URL into the zone's sink,
//! emits position/state/track events, supports seeking (spec §4.5).
//!
//! Actual PCM decoding/writing is Snapcast's concern (spec §1 Non-goals);
//! this supervisor models the player's *control surface* and timing
//! behaviour so `ZoneService` can drive playback without knowing how a
//! given track is ultimately decoded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::domain::{PlaybackState, TrackInfo, ZoneIndex};
use crate::error::{Result, SnapDogError};

#[derive(Debug, Clone)]
pub enum PlayerEvent {
    PositionChanged {
        zone_index: ZoneIndex,
        position_ms: u64,
        progress: f32,
        duration_ms: Option<u64>,
    },
    PlaybackStateChanged {
        zone_index: ZoneIndex,
        state: PlaybackState,
        is_playing: bool,
    },
    TrackInfoChanged {
        zone_index: ZoneIndex,
        track: TrackInfo,
    },
}

#[derive(Debug, Clone)]
pub struct PlayerStatus {
    pub is_playing: bool,
    pub current_track: Option<TrackInfo>,
    pub position_ms: u64,
}

struct ZonePlayer {
    track: Option<TrackInfo>,
    is_playing: bool,
    position_ms: u64,
    last_tick: Instant,
    ticker: Option<JoinHandle<()>>,
}

impl Default for ZonePlayer {
    fn default() -> Self {
        ZonePlayer {
            track: None,
            is_playing: false,
            position_ms: 0,
            last_tick: Instant::now(),
            ticker: None,
        }
    }
}

/// Per-zone playback supervisor. Internally simulates position advance at
/// real time while playing — a stand-in for whatever out-of-scope decoder
/// process actually writes PCM into the sink.
pub struct MediaPlayerSupervisor {
    players: Mutex<HashMap<ZoneIndex, Arc<Mutex<ZonePlayer>>>>,
    events_tx: broadcast::Sender<PlayerEvent>,
    tick_interval: Duration,
}

impl MediaPlayerSupervisor {
    pub fn new(tick_interval: Duration) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(1024);
        Arc::new(MediaPlayerSupervisor {
            players: Mutex::new(HashMap::new()),
            events_tx,
            tick_interval,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events_tx.subscribe()
    }

    async fn player_for(&self, zone_index: ZoneIndex) -> Arc<Mutex<ZonePlayer>> {
        let mut players = self.players.lock().await;
        players
            .entry(zone_index)
            .or_insert_with(|| Arc::new(Mutex::new(ZonePlayer::default())))
            .clone()
    }

    /// `play(track)` — no-op (no spurious events) if already playing the
    /// same URL.
    pub async fn play(&self, zone_index: ZoneIndex, track: TrackInfo) -> Result<()> {
        if !track.is_playable() {
            return Err(SnapDogError::FailedPrecondition(
                "no track available to play".into(),
            ));
        }
        let player = self.player_for(zone_index).await;
        {
            let guard = player.lock().await;
            if guard.is_playing && guard.track.as_ref().map(|t| &t.url) == Some(&track.url) {
                return Ok(());
            }
        }

        {
            let mut guard = player.lock().await;
            guard.track = Some(track.clone());
            guard.is_playing = true;
            guard.position_ms = track.position_ms;
            guard.last_tick = Instant::now();
            if let Some(handle) = guard.ticker.take() {
                handle.abort();
            }
        }

        let _ = self.events_tx.send(PlayerEvent::TrackInfoChanged {
            zone_index,
            track: track.clone(),
        });
        let _ = self.events_tx.send(PlayerEvent::PlaybackStateChanged {
            zone_index,
            state: PlaybackState::Playing,
            is_playing: true,
        });

        self.spawn_ticker(zone_index, player).await;
        Ok(())
    }

    async fn spawn_ticker(&self, zone_index: ZoneIndex, player: Arc<Mutex<ZonePlayer>>) {
        let events_tx = self.events_tx.clone();
        let interval = self.tick_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let mut guard = player.lock().await;
                if !guard.is_playing {
                    return;
                }
                let elapsed = guard.last_tick.elapsed();
                guard.last_tick = Instant::now();
                guard.position_ms += elapsed.as_millis() as u64;

                let duration_ms = guard.track.as_ref().and_then(|t| t.duration_ms);
                if let Some(dur) = duration_ms {
                    if guard.position_ms >= dur {
                        guard.position_ms = dur;
                    }
                }
                let progress = duration_ms
                    .filter(|d| *d > 0)
                    .map(|d| (guard.position_ms as f32 / d as f32).clamp(0.0, 1.0))
                    .unwrap_or(0.0);

                let _ = events_tx.send(PlayerEvent::PositionChanged {
                    zone_index,
                    position_ms: guard.position_ms,
                    progress,
                    duration_ms,
                });
            }
        });
        player.lock().await.ticker = Some(handle);
    }

    /// `pause(zone)` — halts the ticker, keeps position.
    pub async fn pause(&self, zone_index: ZoneIndex) -> Result<()> {
        let player = self.player_for(zone_index).await;
        let mut guard = player.lock().await;
        if !guard.is_playing {
            return Ok(());
        }
        guard.is_playing = false;
        if let Some(handle) = guard.ticker.take() {
            handle.abort();
        }
        drop(guard);
        let _ = self.events_tx.send(PlayerEvent::PlaybackStateChanged {
            zone_index,
            state: PlaybackState::Paused,
            is_playing: false,
        });
        Ok(())
    }

    /// `stop(zone)` — idempotent; `stop` after `stop` is a no-op.
    pub async fn stop(&self, zone_index: ZoneIndex) -> Result<()> {
        let player = self.player_for(zone_index).await;
        let mut guard = player.lock().await;
        let was_playing = guard.is_playing;
        guard.is_playing = false;
        guard.position_ms = 0;
        if let Some(handle) = guard.ticker.take() {
            handle.abort();
        }
        if !was_playing && guard.track.is_none() {
            return Ok(());
        }
        drop(guard);
        let _ = self.events_tx.send(PlayerEvent::PlaybackStateChanged {
            zone_index,
            state: PlaybackState::Stopped,
            is_playing: false,
        });
        Ok(())
    }

    pub async fn get_status(&self, zone_index: ZoneIndex) -> PlayerStatus {
        let player = self.player_for(zone_index).await;
        let guard = player.lock().await;
        PlayerStatus {
            is_playing: guard.is_playing,
            current_track: guard.track.clone(),
            position_ms: guard.position_ms,
        }
    }

    pub async fn get_all_status(&self) -> HashMap<ZoneIndex, PlayerStatus> {
        let players = self.players.lock().await;
        let mut out = HashMap::new();
        for (&zone, player) in players.iter() {
            let guard = player.lock().await;
            out.insert(
                zone,
                PlayerStatus {
                    is_playing: guard.is_playing,
                    current_track: guard.track.clone(),
                    position_ms: guard.position_ms,
                },
            );
        }
        out
    }

    pub async fn stop_all(&self) {
        let zones: Vec<ZoneIndex> = self.players.lock().await.keys().copied().collect();
        for zone in zones {
            let _ = self.stop(zone).await;
        }
    }

    pub async fn get_statistics(&self) -> (usize, usize) {
        let players = self.players.lock().await;
        let mut playing = 0;
        for player in players.values() {
            if player.lock().await.is_playing {
                playing += 1;
            }
        }
        (players.len(), playing)
    }

    /// Seeks are clamped to `[0, duration]`; outcome arrives via the usual
    /// `PositionChanged` event.
    pub async fn seek_to_position_ms(&self, zone_index: ZoneIndex, ms: u64) -> Result<()> {
        let player = self.player_for(zone_index).await;
        let mut guard = player.lock().await;
        let duration = guard.track.as_ref().and_then(|t| t.duration_ms);
        let clamped = duration.map(|d| ms.min(d)).unwrap_or(ms);
        guard.position_ms = clamped;
        guard.last_tick = Instant::now();
        let progress = duration
            .filter(|d| *d > 0)
            .map(|d| (clamped as f32 / d as f32).clamp(0.0, 1.0))
            .unwrap_or(0.0);
        drop(guard);
        let _ = self.events_tx.send(PlayerEvent::PositionChanged {
            zone_index,
            position_ms: clamped,
            progress,
            duration_ms: duration,
        });
        Ok(())
    }

    pub async fn seek_to_progress(&self, zone_index: ZoneIndex, fraction: f32) -> Result<()> {
        let fraction = fraction.clamp(0.0, 1.0);
        let player = self.player_for(zone_index).await;
        let duration = player.lock().await.track.as_ref().and_then(|t| t.duration_ms);
        let ms = duration.map(|d| (d as f32 * fraction) as u64).unwrap_or(0);
        self.seek_to_position_ms(zone_index, ms).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(url: &str) -> TrackInfo {
        TrackInfo {
            duration_ms: Some(10_000),
            ..TrackInfo::synthetic_stream(url.to_string())
        }
    }

    #[tokio::test]
    async fn play_without_track_fails_precondition() {
        let sup = MediaPlayerSupervisor::new(Duration::from_millis(10));
        let mut bad = TrackInfo::none();
        bad.url = None;
        let err = sup.play(1, bad).await.unwrap_err();
        assert!(matches!(err, SnapDogError::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn replaying_same_url_is_idempotent_no_events() {
        let sup = MediaPlayerSupervisor::new(Duration::from_millis(10));
        let mut rx = sup.subscribe();
        sup.play(1, track("http://x/a")).await.unwrap();
        // Drain the two events from the first play.
        let _ = rx.recv().await;
        let _ = rx.recv().await;

        sup.play(1, track("http://x/a")).await.unwrap();
        // No further events should have been queued.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_after_stop_is_a_no_op() {
        let sup = MediaPlayerSupervisor::new(Duration::from_millis(10));
        sup.stop(1).await.unwrap();
        let mut rx = sup.subscribe();
        sup.stop(1).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn seek_clamps_to_duration() {
        let sup = MediaPlayerSupervisor::new(Duration::from_millis(10));
        sup.play(1, track("http://x/a")).await.unwrap();
        sup.seek_to_position_ms(1, 999_999).await.unwrap();
        let status = sup.get_status(1).await;
        assert_eq!(status.current_track.unwrap().duration_ms, Some(10_000));
    }

    #[tokio::test]
    async fn seek_to_progress_clamps_fraction() {
        let sup = MediaPlayerSupervisor::new(Duration::from_millis(10));
        sup.play(1, track("http://x/a")).await.unwrap();
        sup.seek_to_progress(1, -0.5).await.unwrap();
        sup.seek_to_progress(1, 5.0).await.unwrap();
        // Both calls should have succeeded without panicking on bounds.
    }
}
