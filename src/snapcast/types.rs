//! The Snapcast server mirror entity schema (spec §3 "Snapcast mirror").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeInfo {
    #[serde(default)]
    pub percent: u8,
    #[serde(default)]
    pub muted: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfigInfo {
    #[serde(default)]
    pub volume: VolumeInfo,
    #[serde(default)]
    pub latency: i32,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapClient {
    pub id: String,
    #[serde(default)]
    pub host: HostInfo,
    #[serde(default)]
    pub config: ClientConfigInfo,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub last_seen: Option<i64>,
}

impl SnapClient {
    pub fn mac_lower(&self) -> String {
        self.host.mac.to_lowercase()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub stream_id: String,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub clients: Vec<SnapClient>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub uri: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Server {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub streams: Vec<Stream>,
}
