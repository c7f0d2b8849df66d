//! End-to-end scenario against a fake in-process Snapcast server speaking
//! the real newline-delimited JSON-RPC wire protocol (SPEC_FULL §D).

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use snapdog::bus::create_bus;
use snapdog::client::ClientManager;
use snapdog::config::ZoneConfig;
use snapdog::coordinator::SnapDogSupervisor;
use snapdog::playlist::NullPlaylistProvider;
use snapdog::snapcast::{SnapcastStateRepository, SnapcastTransport};
use snapdog::zone::ZoneManager;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// A minimal fake snapserver: answers `Server.GetStatus` with one group
/// bound to `Zone1` containing one client, then keeps the connection open
/// so the transport's reconnect-watch sees a stable "connected" state.
async fn spawn_fake_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake server");
    let port = listener.local_addr().expect("local addr").port();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) => return,
                        Ok(_) => {}
                        Err(_) => return,
                    }
                    let Ok(req) = serde_json::from_str::<serde_json::Value>(line.trim_end()) else {
                        continue;
                    };
                    let id = req.get("id").cloned().unwrap_or(json!(null));
                    let method = req.get("method").and_then(|m| m.as_str()).unwrap_or("");
                    if method == "Server.GetStatus" {
                        let response = json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": {
                                "server": {
                                    "groups": [{
                                        "id": "g1",
                                        "name": "",
                                        "stream_id": "Zone1",
                                        "muted": false,
                                        "clients": [{
                                            "id": "snap-1",
                                            "connected": true,
                                            "last_seen": 0,
                                            "host": { "mac": "aa:bb:cc:dd:ee:01", "ip": "", "name": "", "os": "", "arch": "" },
                                            "config": { "volume": { "percent": 40, "muted": false }, "latency": 0, "name": "" }
                                        }]
                                    }],
                                    "streams": []
                                }
                            }
                        });
                        let mut out = response.to_string();
                        out.push('\n');
                        if write_half.write_all(out.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });

    port
}

#[tokio::test]
async fn zone_binds_to_group_after_reconnect_snapshot() {
    let port = spawn_fake_server().await;

    let bus = create_bus();
    let repository = Arc::new(SnapcastStateRepository::new(vec!["aa:bb:cc:dd:ee:01".into()]));
    let transport = SnapcastTransport::new("127.0.0.1".into(), port, Duration::from_secs(2));

    let client_manager = ClientManager::new(
        vec![snapdog::config::ClientConfig {
            name: "Living Room".into(),
            mac: "aa:bb:cc:dd:ee:01".into(),
            default_zone: 1,
            icon: None,
        }],
        vec!["Zone1".into()],
        repository.clone(),
        transport.clone(),
        bus.clone(),
    );
    client_manager.hydrate().await;

    let zone_manager = ZoneManager::new(
        &[ZoneConfig {
            name: "Living Room".into(),
            sink: "/snapsinks/zone1".into(),
            default_stream: None,
        }],
        client_manager.clone(),
        Arc::new(NullPlaylistProvider),
        repository.clone(),
        transport.clone(),
        bus.clone(),
        Duration::from_millis(200),
    );
    zone_manager.hydrate().await;
    zone_manager.initialize_all().await;

    let supervisor = Arc::new(SnapDogSupervisor::new(transport.clone(), vec![], bus.clone()));
    let media = zone_manager.media();
    supervisor
        .start(repository.clone(), client_manager.clone(), zone_manager.clone(), media)
        .await;

    let bound = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = zone_manager.get_zone_state(1).await.unwrap();
            if snapshot.state.snapcast_group_id.as_deref() == Some("g1") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(bound.is_ok(), "zone never bound to the group from the reconnect snapshot");

    let clients = client_manager.get_all_clients().await;
    assert_eq!(clients[0].volume, 40);
    assert!(clients[0].connected);

    supervisor.shutdown().await;
}
