//! KNX group-address bridge. Real group-address wiring is building
//! automation hardware integration and out of scope; only the capability
//! interface and a no-op implementation live here (spec §6, §1 Non-goals).

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait KnxBridge: Send + Sync {
    async fn send_zone_volume(&self, zone_index: u32, volume: u8) -> Result<()>;
    async fn send_zone_playback(&self, zone_index: u32, is_playing: bool) -> Result<()>;
}

pub struct NullKnxBridge;

#[async_trait]
impl KnxBridge for NullKnxBridge {
    async fn send_zone_volume(&self, _zone_index: u32, _volume: u8) -> Result<()> {
        Ok(())
    }

    async fn send_zone_playback(&self, _zone_index: u32, _is_playing: bool) -> Result<()> {
        Ok(())
    }
}
