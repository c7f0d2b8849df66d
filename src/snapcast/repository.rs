//! Authoritative local mirror of the Snapcast server (spec §4.2).

use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::debug;

use crate::snapcast::protocol::{SnapcastEventKind, SnapcastNotification};
use crate::snapcast::types::{Group, Server, SnapClient, Stream, VolumeInfo};

/// Thread-safe read/write store of the mirror, plus a "changed" signal
/// the Client Manager and Zone Manager subscribe to for recomputation.
pub struct SnapcastStateRepository {
    server: RwLock<Server>,
    /// Configured MACs in 1-based-index order, used by `get_client_by_index`.
    configured_macs: Vec<String>,
    changed_tx: watch::Sender<u64>,
    changed_rx: watch::Receiver<u64>,
}

impl SnapcastStateRepository {
    pub fn new(configured_macs: Vec<String>) -> Self {
        let (changed_tx, changed_rx) = watch::channel(0);
        SnapcastStateRepository {
            server: RwLock::new(Server::default()),
            configured_macs: configured_macs.into_iter().map(|m| m.to_lowercase()).collect(),
            changed_tx,
            changed_rx,
        }
    }

    pub fn subscribe_changed(&self) -> watch::Receiver<u64> {
        self.changed_rx.clone()
    }

    fn signal_changed(&self) {
        self.changed_tx.send_modify(|v| *v = v.wrapping_add(1));
    }

    pub async fn replace_server(&self, server: Server) {
        *self.server.write().await = server;
        self.signal_changed();
    }

    pub async fn upsert_client(&self, group_id: &str, client: SnapClient) {
        let mut server = self.server.write().await;
        if let Some(group) = server.groups.iter_mut().find(|g| g.id == group_id) {
            if let Some(existing) = group.clients.iter_mut().find(|c| c.id == client.id) {
                *existing = client;
            } else {
                group.clients.push(client);
            }
        }
        drop(server);
        self.signal_changed();
    }

    pub async fn remove_client(&self, id: &str) {
        let mut server = self.server.write().await;
        for group in &mut server.groups {
            group.clients.retain(|c| c.id != id);
        }
        drop(server);
        self.signal_changed();
    }

    pub async fn upsert_group(&self, group: Group) {
        let mut server = self.server.write().await;
        if let Some(existing) = server.groups.iter_mut().find(|g| g.id == group.id) {
            *existing = group;
        } else {
            server.groups.push(group);
        }
        drop(server);
        self.signal_changed();
    }

    pub async fn remove_group(&self, id: &str) {
        let mut server = self.server.write().await;
        server.groups.retain(|g| g.id != id);
        drop(server);
        self.signal_changed();
    }

    pub async fn upsert_stream(&self, stream: Stream) {
        let mut server = self.server.write().await;
        if let Some(existing) = server.streams.iter_mut().find(|s| s.id == stream.id) {
            *existing = stream;
        } else {
            server.streams.push(stream);
        }
        drop(server);
        self.signal_changed();
    }

    pub async fn remove_stream(&self, id: &str) {
        let mut server = self.server.write().await;
        server.streams.retain(|s| s.id != id);
        drop(server);
        self.signal_changed();
    }

    pub async fn get_client(&self, id: &str) -> Option<SnapClient> {
        let server = self.server.read().await;
        server
            .groups
            .iter()
            .flat_map(|g| g.clients.iter())
            .find(|c| c.id == id)
            .cloned()
    }

    /// Resolves `ClientConfig[index-1].mac` to the first live `SnapClient`
    /// with a matching MAC (case-insensitive). This is the only place the
    /// 1-based domain index crosses into the Snapcast namespace.
    pub async fn get_client_by_index(&self, index: u32) -> Option<SnapClient> {
        let mac = self.configured_macs.get((index.checked_sub(1))? as usize)?;
        let server = self.server.read().await;
        server
            .groups
            .iter()
            .flat_map(|g| g.clients.iter())
            .find(|c| &c.mac_lower() == mac)
            .cloned()
    }

    /// Finds which configured index (if any) a live Snapcast client id maps
    /// back to, used by event handlers translating server events into
    /// domain operations.
    pub async fn index_for_snapcast_id(&self, id: &str) -> Option<u32> {
        let client = self.get_client(id).await?;
        let mac = client.mac_lower();
        self.configured_macs
            .iter()
            .position(|m| *m == mac)
            .map(|pos| (pos + 1) as u32)
    }

    pub async fn get_group_containing_client(&self, snapcast_id: &str) -> Option<Group> {
        let server = self.server.read().await;
        server
            .groups
            .iter()
            .find(|g| g.clients.iter().any(|c| c.id == snapcast_id))
            .cloned()
    }

    pub async fn get_group_for_stream(&self, stream_id: &str) -> Option<Group> {
        let server = self.server.read().await;
        server.groups.iter().find(|g| g.stream_id == stream_id).cloned()
    }

    pub async fn get_group_with_empty_stream(&self) -> Option<Group> {
        let server = self.server.read().await;
        server
            .groups
            .iter()
            .find(|g| g.stream_id.is_empty())
            .cloned()
    }

    pub async fn get_any_group(&self) -> Option<Group> {
        self.server.read().await.groups.first().cloned()
    }

    pub async fn get_all_clients(&self) -> Vec<SnapClient> {
        let server = self.server.read().await;
        server.groups.iter().flat_map(|g| g.clients.clone()).collect()
    }

    pub async fn get_all_groups(&self) -> Vec<Group> {
        self.server.read().await.groups.clone()
    }

    pub async fn get_all_streams(&self) -> Vec<Stream> {
        self.server.read().await.streams.clone()
    }

    pub async fn get_server_info(&self) -> Server {
        self.server.read().await.clone()
    }

    async fn update_client<F: FnOnce(&mut SnapClient)>(&self, id: &str, f: F) -> bool {
        let found = {
            let mut server = self.server.write().await;
            let mut found = false;
            for group in &mut server.groups {
                if let Some(c) = group.clients.iter_mut().find(|c| c.id == id) {
                    f(c);
                    found = true;
                    break;
                }
            }
            found
        };
        if found {
            self.signal_changed();
        }
        found
    }

    async fn update_group<F: FnOnce(&mut Group)>(&self, id: &str, f: F) -> bool {
        let found = {
            let mut server = self.server.write().await;
            match server.groups.iter_mut().find(|g| g.id == id) {
                Some(g) => {
                    f(g);
                    true
                }
                None => false,
            }
        };
        if found {
            self.signal_changed();
        }
        found
    }

    /// Applies a decoded Snapcast notification to the mirror atomically
    /// (spec §4.2 "Event application"). Returns a descriptor of what
    /// changed so the caller can decide which domain-level notification,
    /// if any, to publish on the bus. A notification for a client/group
    /// this repository does not yet know about (e.g. received before the
    /// next reconnect snapshot) is logged and otherwise ignored.
    pub async fn apply_event(&self, notification: &SnapcastNotification) -> AppliedChange {
        let Some(params) = notification.params.clone() else {
            return AppliedChange::Ignored;
        };

        match notification.kind {
            SnapcastEventKind::ClientOnConnect => {
                let Ok(p) = serde_json::from_value::<ClientConnectPayload>(params) else {
                    return AppliedChange::Ignored;
                };
                let id = p.id.clone();
                if !self
                    .update_client(&id, |c| {
                        c.connected = true;
                        c.last_seen = Some(chrono::Utc::now().timestamp());
                        if let Some(fresh) = &p.client {
                            c.host = fresh.host.clone();
                            c.config = fresh.config.clone();
                        }
                    })
                    .await
                {
                    debug!("Client.OnConnect for unseen client {id}, awaiting next resync");
                }
                AppliedChange::ClientConnection(id)
            }
            SnapcastEventKind::ClientOnDisconnect => {
                let Ok(p) = serde_json::from_value::<ClientConnectPayload>(params) else {
                    return AppliedChange::Ignored;
                };
                let id = p.id.clone();
                self.update_client(&id, |c| {
                    c.connected = false;
                    c.last_seen = Some(chrono::Utc::now().timestamp());
                })
                .await;
                AppliedChange::ClientConnection(id)
            }
            SnapcastEventKind::ClientOnVolumeChanged => {
                let Ok(p) = serde_json::from_value::<ClientVolumePayload>(params) else {
                    return AppliedChange::Ignored;
                };
                let id = p.id.clone();
                self.update_client(&id, |c| c.config.volume = p.volume.clone()).await;
                AppliedChange::ClientProperty(id)
            }
            SnapcastEventKind::ClientOnLatencyChanged => {
                let Ok(p) = serde_json::from_value::<ClientLatencyPayload>(params) else {
                    return AppliedChange::Ignored;
                };
                let id = p.id.clone();
                self.update_client(&id, |c| c.config.latency = p.latency).await;
                AppliedChange::ClientProperty(id)
            }
            SnapcastEventKind::ClientOnNameChanged => {
                let Ok(p) = serde_json::from_value::<NamePayload>(params) else {
                    return AppliedChange::Ignored;
                };
                let id = p.id.clone();
                self.update_client(&id, |c| c.config.name = p.name.clone()).await;
                AppliedChange::ClientProperty(id)
            }
            SnapcastEventKind::GroupOnMute => {
                let Ok(p) = serde_json::from_value::<GroupMutePayload>(params) else {
                    return AppliedChange::Ignored;
                };
                let id = p.id.clone();
                self.update_group(&id, |g| g.muted = p.mute).await;
                AppliedChange::GroupChanged(id)
            }
            SnapcastEventKind::GroupOnStreamChanged => {
                let Ok(p) = serde_json::from_value::<GroupStreamPayload>(params) else {
                    return AppliedChange::Ignored;
                };
                let id = p.id.clone();
                self.update_group(&id, |g| g.stream_id = p.stream_id.clone()).await;
                AppliedChange::GroupChanged(id)
            }
            SnapcastEventKind::GroupOnNameChanged => {
                let Ok(p) = serde_json::from_value::<NamePayload>(params) else {
                    return AppliedChange::Ignored;
                };
                let id = p.id.clone();
                self.update_group(&id, |g| g.name = p.name.clone()).await;
                AppliedChange::GroupChanged(id)
            }
            SnapcastEventKind::StreamOnUpdate => {
                let Ok(p) = serde_json::from_value::<StreamUpdatePayload>(params) else {
                    return AppliedChange::Ignored;
                };
                let id = p.stream.id.clone();
                self.upsert_stream(p.stream).await;
                AppliedChange::StreamChanged(id)
            }
            SnapcastEventKind::ServerOnUpdate => {
                let Ok(p) = serde_json::from_value::<ServerUpdatePayload>(params) else {
                    return AppliedChange::Ignored;
                };
                self.replace_server(p.server).await;
                AppliedChange::ServerReplaced
            }
            SnapcastEventKind::Unknown => AppliedChange::Ignored,
        }
    }
}

/// What `apply_event` actually mutated, so the Client/Zone Managers know
/// which derived state (if any) to recompute and which notification (if
/// any) to publish — the internal "changed" signal made concrete per
/// event rather than left as an opaque counter bump.
#[derive(Debug, Clone)]
pub enum AppliedChange {
    /// A configured client's connect/disconnect state flipped.
    ClientConnection(String),
    /// A configured client's volume/mute/latency/name changed.
    ClientProperty(String),
    /// A group's mute/stream/name changed; zones bound to it may need
    /// rebinding.
    GroupChanged(String),
    StreamChanged(String),
    ServerReplaced,
    Ignored,
}

#[derive(serde::Deserialize)]
struct ClientConnectPayload {
    id: String,
    #[serde(default)]
    client: Option<SnapClient>,
}

#[derive(serde::Deserialize)]
struct ClientVolumePayload {
    id: String,
    volume: VolumeInfo,
}

#[derive(serde::Deserialize)]
struct ClientLatencyPayload {
    id: String,
    latency: i32,
}

#[derive(serde::Deserialize)]
struct NamePayload {
    id: String,
    name: String,
}

#[derive(serde::Deserialize)]
struct GroupMutePayload {
    id: String,
    mute: bool,
}

#[derive(serde::Deserialize)]
struct GroupStreamPayload {
    id: String,
    #[serde(rename = "stream_id")]
    stream_id: String,
}

#[derive(serde::Deserialize)]
struct StreamUpdatePayload {
    stream: Stream,
}

#[derive(serde::Deserialize)]
struct ServerUpdatePayload {
    server: Server,
}

pub type SharedSnapcastRepository = Arc<SnapcastStateRepository>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapcast::types::HostInfo;

    fn client(id: &str, mac: &str) -> SnapClient {
        SnapClient {
            id: id.to_string(),
            host: HostInfo {
                mac: mac.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn get_client_by_index_resolves_via_mac() {
        let repo = SnapcastStateRepository::new(vec!["AA:BB:CC:DD:EE:01".to_string()]);
        repo.replace_server(Server {
            groups: vec![Group {
                id: "g1".into(),
                clients: vec![client("snap-1", "aa:bb:cc:dd:ee:01")],
                ..Default::default()
            }],
            ..Default::default()
        })
        .await;

        let found = repo.get_client_by_index(1).await.unwrap();
        assert_eq!(found.id, "snap-1");
        // property: getClientByIndex(i) agrees with getClient(getClientByIndex(i).id)
        let via_id = repo.get_client(&found.id).await.unwrap();
        assert_eq!(via_id.id, found.id);
    }

    #[tokio::test]
    async fn get_client_by_index_returns_none_when_mac_absent() {
        let repo = SnapcastStateRepository::new(vec!["aa:bb:cc:dd:ee:01".to_string()]);
        assert!(repo.get_client_by_index(1).await.is_none());
    }

    async fn repo_with_client() -> SnapcastStateRepository {
        let repo = SnapcastStateRepository::new(vec![]);
        repo.replace_server(Server {
            groups: vec![Group {
                id: "g1".into(),
                stream_id: "Zone1".into(),
                clients: vec![client("snap-1", "aa:bb:cc:dd:ee:01")],
                ..Default::default()
            }],
            ..Default::default()
        })
        .await;
        repo
    }

    #[tokio::test]
    async fn apply_event_volume_changed_mutates_client_config() {
        let repo = repo_with_client().await;
        let notification = SnapcastNotification {
            kind: SnapcastEventKind::ClientOnVolumeChanged,
            params: Some(serde_json::json!({ "id": "snap-1", "volume": { "percent": 42, "muted": true } })),
        };
        let change = repo.apply_event(&notification).await;
        assert!(matches!(change, AppliedChange::ClientProperty(id) if id == "snap-1"));
        let client = repo.get_client("snap-1").await.unwrap();
        assert_eq!(client.config.volume.percent, 42);
        assert!(client.config.volume.muted);
    }

    #[tokio::test]
    async fn apply_event_disconnect_toggles_connected() {
        let repo = repo_with_client().await;
        let notification = SnapcastNotification {
            kind: SnapcastEventKind::ClientOnDisconnect,
            params: Some(serde_json::json!({ "id": "snap-1" })),
        };
        repo.apply_event(&notification).await;
        let client = repo.get_client("snap-1").await.unwrap();
        assert!(!client.connected);
        assert!(client.last_seen.is_some());
    }

    #[tokio::test]
    async fn apply_event_group_stream_changed_rebinds_group() {
        let repo = repo_with_client().await;
        let notification = SnapcastNotification {
            kind: SnapcastEventKind::GroupOnStreamChanged,
            params: Some(serde_json::json!({ "id": "g1", "stream_id": "Zone2" })),
        };
        let change = repo.apply_event(&notification).await;
        assert!(matches!(change, AppliedChange::GroupChanged(id) if id == "g1"));
        let group = repo.get_group_for_stream("Zone2").await.unwrap();
        assert_eq!(group.id, "g1");
    }

    #[tokio::test]
    async fn apply_event_for_unknown_client_is_ignored_not_an_error() {
        let repo = SnapcastStateRepository::new(vec![]);
        let notification = SnapcastNotification {
            kind: SnapcastEventKind::ClientOnVolumeChanged,
            params: Some(serde_json::json!({ "id": "ghost", "volume": { "percent": 1, "muted": false } })),
        };
        let change = repo.apply_event(&notification).await;
        assert!(matches!(change, AppliedChange::ClientProperty(id) if id == "ghost"));
        assert!(repo.get_client("ghost").await.is_none());
    }

    #[tokio::test]
    async fn applying_snapshot_twice_yields_same_content() {
        let repo = SnapcastStateRepository::new(vec![]);
        let server = Server {
            groups: vec![Group {
                id: "g1".into(),
                stream_id: "Zone1".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        repo.replace_server(server.clone()).await;
        let first = repo.get_server_info().await;
        repo.replace_server(server).await;
        let second = repo.get_server_info().await;
        assert_eq!(first.groups.len(), second.groups.len());
        assert_eq!(first.groups[0].stream_id, second.groups[0].stream_id);
    }

    #[tokio::test]
    async fn signals_changed_on_mutation() {
        let repo = SnapcastStateRepository::new(vec![]);
        let mut rx = repo.subscribe_changed();
        let before = *rx.borrow();
        repo.upsert_stream(Stream {
            id: "Zone1".into(),
            ..Default::default()
        })
        .await;
        rx.changed().await.unwrap();
        assert_ne!(*rx.borrow(), before);
    }
}
