//! Playlist Provider interface (spec §4.6 component table). Returns
//! `PlaylistInfo` and ordered `TrackInfo` lists by 1-based index. A real
//! implementation (Subsonic or otherwise) is explicitly out of scope; only
//! the narrow capability interface and a placeholder are provided here.

use async_trait::async_trait;

use crate::domain::{PlaylistInfo, TrackInfo};
use crate::error::Result;

#[async_trait]
pub trait PlaylistProvider: Send + Sync {
    async fn get_playlist(&self, index_or_id: &str) -> Result<PlaylistInfo>;
    async fn get_track(&self, playlist_index: u32, track_index: u32) -> Result<TrackInfo>;
    async fn get_tracks(&self, playlist_index: u32) -> Result<Vec<TrackInfo>>;
}

/// Always reports "no playlist source configured". Lets `ZoneService`
/// exercise its `FailedPrecondition`/`NotFound` paths without a real
/// playlist backend.
pub struct NullPlaylistProvider;

#[async_trait]
impl PlaylistProvider for NullPlaylistProvider {
    async fn get_playlist(&self, index_or_id: &str) -> Result<PlaylistInfo> {
        Err(crate::error::SnapDogError::NotFound(format!(
            "no playlist provider configured (requested '{index_or_id}')"
        )))
    }

    async fn get_track(&self, _playlist_index: u32, _track_index: u32) -> Result<TrackInfo> {
        Err(crate::error::SnapDogError::NotFound(
            "no playlist provider configured".into(),
        ))
    }

    async fn get_tracks(&self, _playlist_index: u32) -> Result<Vec<TrackInfo>> {
        Err(crate::error::SnapDogError::NotFound(
            "no playlist provider configured".into(),
        ))
    }
}
