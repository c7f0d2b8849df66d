//! In-process publish/subscribe for typed state-change notifications
//! (spec §4.7). `Notification` is the single canonical record type every
//! protocol surface (MQTT, KNX, WebSocket hub) fans out — the Status
//! Factory's output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::domain::{ClientIndex, PlaybackState, PlaylistInfo, TrackInfo, ZoneIndex};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    ZonePlaybackChanged {
        zone_index: ZoneIndex,
        state: PlaybackState,
    },
    ZoneVolumeChanged {
        zone_index: ZoneIndex,
        volume: u8,
    },
    ZoneMuteChanged {
        zone_index: ZoneIndex,
        muted: bool,
    },
    ZoneTrackMetadataChanged {
        zone_index: ZoneIndex,
        track: TrackInfo,
    },
    ZoneTrackPlayingStatusChanged {
        zone_index: ZoneIndex,
        is_playing: bool,
    },
    ZoneProgressChanged {
        zone_index: ZoneIndex,
        position_ms: u64,
        progress_percent: f32,
    },
    ZonePlaylistChanged {
        zone_index: ZoneIndex,
        playlist: PlaylistInfo,
    },
    ClientVolumeChanged {
        client_index: ClientIndex,
        volume: u8,
    },
    ClientMuteChanged {
        client_index: ClientIndex,
        is_muted: bool,
    },
    ClientLatencyChanged {
        client_index: ClientIndex,
        latency_ms: i32,
    },
    ClientZoneChanged {
        client_index: ClientIndex,
        old_zone: ZoneIndex,
        new_zone: ZoneIndex,
    },
    ClientConnectionChanged {
        client_index: ClientIndex,
        is_connected: bool,
    },
    ClientNameChanged {
        client_index: ClientIndex,
        name: String,
    },
    ClientStateChanged {
        client_index: ClientIndex,
    },
    SystemStatus {
        connected: bool,
        message: String,
    },
    SystemError {
        message: String,
    },
    /// Broadcast before shutdown so supervised tasks can ack and exit
    /// cleanly, per the structured-shutdown design note.
    ShuttingDown,
}

/// The Status Factory: the single point where typed notification records
/// are constructed, so every protocol surface observes the same schema.
pub struct NotificationBuilder;

impl NotificationBuilder {
    pub fn zone_playback(zone_index: ZoneIndex, state: PlaybackState) -> Notification {
        Notification::ZonePlaybackChanged { zone_index, state }
    }

    pub fn zone_volume(zone_index: ZoneIndex, volume: u8) -> Notification {
        Notification::ZoneVolumeChanged { zone_index, volume }
    }

    pub fn zone_mute(zone_index: ZoneIndex, muted: bool) -> Notification {
        Notification::ZoneMuteChanged { zone_index, muted }
    }

    pub fn zone_track(zone_index: ZoneIndex, track: TrackInfo) -> Notification {
        Notification::ZoneTrackMetadataChanged { zone_index, track }
    }

    pub fn zone_progress(zone_index: ZoneIndex, position_ms: u64, progress_percent: f32) -> Notification {
        Notification::ZoneProgressChanged {
            zone_index,
            position_ms,
            progress_percent,
        }
    }

    pub fn client_volume(client_index: ClientIndex, volume: u8) -> Notification {
        Notification::ClientVolumeChanged { client_index, volume }
    }

    pub fn client_zone(client_index: ClientIndex, old_zone: ZoneIndex, new_zone: ZoneIndex) -> Notification {
        Notification::ClientZoneChanged {
            client_index,
            old_zone,
            new_zone,
        }
    }

    pub fn client_state_changed(client_index: ClientIndex) -> Notification {
        Notification::ClientStateChanged { client_index }
    }

    pub fn zone_track_playing_status(zone_index: ZoneIndex, is_playing: bool) -> Notification {
        Notification::ZoneTrackPlayingStatusChanged { zone_index, is_playing }
    }

    pub fn zone_playlist(zone_index: ZoneIndex, playlist: PlaylistInfo) -> Notification {
        Notification::ZonePlaylistChanged { zone_index, playlist }
    }

    pub fn client_mute(client_index: ClientIndex, is_muted: bool) -> Notification {
        Notification::ClientMuteChanged { client_index, is_muted }
    }

    pub fn client_latency(client_index: ClientIndex, latency_ms: i32) -> Notification {
        Notification::ClientLatencyChanged { client_index, latency_ms }
    }

    pub fn client_connection(client_index: ClientIndex, is_connected: bool) -> Notification {
        Notification::ClientConnectionChanged { client_index, is_connected }
    }

    pub fn client_name(client_index: ClientIndex, name: String) -> Notification {
        Notification::ClientNameChanged { client_index, name }
    }

    pub fn system_status(connected: bool, message: impl Into<String>) -> Notification {
        Notification::SystemStatus { connected, message: message.into() }
    }

    pub fn system_error(message: impl Into<String>) -> Notification {
        Notification::SystemError { message: message.into() }
    }
}

/// Envelope actually carried on the bus, so subscribers can order/log
/// without re-deriving a timestamp from the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub notification: Notification,
    pub timestamp_utc: DateTime<Utc>,
}

const CHANNEL_CAPACITY: usize = 1024;

/// Broadcast-backed event bus. Delivery to independent subscribers is
/// concurrent; per-subscriber order matches publish order.
pub struct EventBus {
    sender: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        EventBus { sender }
    }

    pub fn publish(&self, notification: Notification) {
        let envelope = Envelope {
            notification,
            timestamp_utc: Utc::now(),
        };
        // A publish with zero current subscribers is not an error: it is
        // fire-and-forget, matching the bus's best-effort contract.
        let _ = self.sender.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedBus = Arc<EventBus>;

pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pubsub() {
        let bus = create_bus();
        let mut rx = bus.subscribe();
        bus.publish(NotificationBuilder::zone_volume(1, 42));
        let env = rx.recv().await.unwrap();
        match env.notification {
            Notification::ZoneVolumeChanged { zone_index, volume } => {
                assert_eq!(zone_index, 1);
                assert_eq!(volume, 42);
            }
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive_in_order() {
        let bus = create_bus();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(NotificationBuilder::zone_volume(1, 10));
        bus.publish(NotificationBuilder::zone_volume(1, 20));

        for rx in [&mut rx1, &mut rx2] {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert!(matches!(
                first.notification,
                Notification::ZoneVolumeChanged { volume: 10, .. }
            ));
            assert!(matches!(
                second.notification,
                Notification::ZoneVolumeChanged { volume: 20, .. }
            ));
        }
    }

    #[test]
    fn subscriber_count_reflects_live_receivers() {
        let bus = create_bus();
        assert_eq!(bus.subscriber_count(), 0);
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
