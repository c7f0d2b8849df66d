//! Core data model: `ZoneState`, `ClientState`, and the track/playlist
//! records they embed. See spec §3.
//!
//! These are plain, `Clone`-able records swapped atomically in and out of
//! the [`crate::store::StateStore`] rather than mutated in place, per the
//! copy-on-write update style called for in the design notes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ZoneIndex = u32;
pub type ClientIndex = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

impl Default for PlaybackState {
    fn default() -> Self {
        PlaybackState::Stopped
    }
}

/// A track the Playlist Provider (or a synthetic `playUrl` call) produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub source: String,
    pub index: u32,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub url: Option<String>,
    pub duration_ms: Option<u64>,
    pub position_ms: u64,
    pub progress: f32,
    pub is_playing: bool,
    pub cover_url: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    pub rating: Option<f32>,
}

impl TrackInfo {
    /// The "none" sentinel used when a zone has no current track.
    pub fn none() -> Self {
        TrackInfo {
            source: "none".to_string(),
            index: 0,
            title: String::new(),
            artist: None,
            album: None,
            url: None,
            duration_ms: None,
            position_ms: 0,
            progress: 0.0,
            is_playing: false,
            cover_url: None,
            genre: None,
            year: None,
            rating: None,
        }
    }

    pub fn is_none(&self) -> bool {
        self.source == "none"
    }

    /// A synthetic track for `playUrl` calls, per spec §4.4.
    pub fn synthetic_stream(url: String) -> Self {
        TrackInfo {
            source: "stream".to_string(),
            index: 0,
            title: "Stream".to_string(),
            artist: None,
            album: None,
            url: Some(url),
            duration_ms: None,
            position_ms: 0,
            progress: 0.0,
            is_playing: false,
            cover_url: None,
            genre: None,
            year: None,
            rating: None,
        }
    }

    pub fn is_playable(&self) -> bool {
        !self.is_none() && self.url.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistInfo {
    pub source: String,
    pub index: u32,
    pub playlist_id: String,
    pub name: String,
    pub track_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneState {
    pub zone_index: ZoneIndex,
    pub name: String,
    pub playback_state: PlaybackState,
    pub volume: u8,
    pub mute: bool,
    pub track_repeat: bool,
    pub playlist_repeat: bool,
    pub playlist_shuffle: bool,
    pub snapcast_group_id: Option<String>,
    pub snapcast_stream_id: String,
    pub track: Option<TrackInfo>,
    pub playlist: Option<PlaylistInfo>,
    pub clients: Vec<ClientIndex>,
    pub timestamp_utc: DateTime<Utc>,
}

impl ZoneState {
    pub fn new(zone_index: ZoneIndex, name: String, stream_id: String) -> Self {
        ZoneState {
            zone_index,
            name,
            playback_state: PlaybackState::Stopped,
            volume: 100,
            mute: false,
            track_repeat: false,
            playlist_repeat: false,
            playlist_shuffle: false,
            snapcast_group_id: None,
            snapcast_stream_id: stream_id,
            track: None,
            playlist: None,
            clients: Vec::new(),
            timestamp_utc: Utc::now(),
        }
    }

    /// Invariant: `Playing ⇒ track is playable`. Checked at every
    /// transition into `Playing` by the zone service before it commits.
    pub fn invariant_holds(&self) -> bool {
        if self.playback_state == PlaybackState::Playing {
            return self.track.as_ref().is_some_and(|t| t.is_playable());
        }
        true
    }

    pub fn clamp_volume(v: i32) -> u8 {
        v.clamp(0, 100) as u8
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientState {
    pub client_index: ClientIndex,
    pub name: String,
    pub icon: Option<String>,
    pub mac: String,
    pub snapcast_id: String,
    pub connected: bool,
    pub volume: u8,
    pub mute: bool,
    pub latency_ms: i32,
    pub zone_index: ZoneIndex,
    /// Whether `zone_index` reflects an explicit `assignClientToZone` call
    /// rather than the configured default (see DESIGN.md Open Question 1).
    pub assigned: bool,
    pub configured_snapcast_name: String,
    pub last_seen_utc: Option<DateTime<Utc>>,
    pub host_ip_address: Option<String>,
    pub host_name: Option<String>,
    pub host_os: Option<String>,
    pub host_arch: Option<String>,
    pub timestamp_utc: DateTime<Utc>,
}

impl ClientState {
    pub fn from_config(
        client_index: ClientIndex,
        name: String,
        mac: String,
        default_zone: ZoneIndex,
        icon: Option<String>,
    ) -> Self {
        ClientState {
            client_index,
            name: name.clone(),
            icon,
            mac,
            snapcast_id: String::new(),
            connected: false,
            volume: 100,
            mute: false,
            latency_ms: 0,
            zone_index: default_zone,
            assigned: false,
            configured_snapcast_name: name,
            last_seen_utc: None,
            host_ip_address: None,
            host_name: None,
            host_os: None,
            host_arch: None,
            timestamp_utc: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_none_sentinel_is_not_playable() {
        let t = TrackInfo::none();
        assert!(t.is_none());
        assert!(!t.is_playable());
    }

    #[test]
    fn playing_zone_without_playable_track_violates_invariant() {
        let mut z = ZoneState::new(1, "Living Room".into(), "Zone1".into());
        z.playback_state = PlaybackState::Playing;
        z.track = Some(TrackInfo::none());
        assert!(!z.invariant_holds());
        z.track = Some(TrackInfo::synthetic_stream("http://x/stream".into()));
        assert!(z.invariant_holds());
    }

    #[test]
    fn volume_always_clamped() {
        assert_eq!(ZoneState::clamp_volume(-5), 0);
        assert_eq!(ZoneState::clamp_volume(150), 100);
        assert_eq!(ZoneState::clamp_volume(42), 42);
    }
}
