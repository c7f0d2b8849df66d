//! Central supervisor: owns every long-lived background task (the
//! Snapcast transport's connection loop, reconnect-snapshot hydration,
//! Snapcast event application, the media-player event bridge) plus the
//! notification sinks, and coordinates startup/graceful shutdown.
//!
//! This generalises the teacher's `AdapterCoordinator` registry — a
//! dynamic set of adapters enabled/disabled at runtime — to SnapDog's
//! fixed subsystem set, fixed at construction rather than registered by
//! name, but keeping the same cancellation-token-per-task and
//! `ShuttingDown`-then-join shutdown shape.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast::error::RecvError, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::Startable;
use crate::bus::{Notification, NotificationBuilder, SharedBus};
use crate::client::ClientManager;
use crate::media::{MediaPlayerSupervisor, PlayerEvent};
use crate::snapcast::repository::AppliedChange;
use crate::snapcast::types::Server;
use crate::snapcast::{SharedSnapcastRepository, SnapcastTransport};
use crate::zone::ZoneManager;

const SHUTDOWN_TASK_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the Snapcast transport, the tasks that fold its notifications
/// into core state, and the outward-facing notification sinks (MQTT,
/// and anything else registered via [`Startable`]).
pub struct SnapDogSupervisor {
    transport: Arc<SnapcastTransport>,
    sinks: Vec<Arc<dyn Startable>>,
    shutdown: CancellationToken,
    bus: SharedBus,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl SnapDogSupervisor {
    pub fn new(transport: Arc<SnapcastTransport>, sinks: Vec<Arc<dyn Startable>>, bus: SharedBus) -> Self {
        SnapDogSupervisor {
            transport,
            sinks,
            shutdown: CancellationToken::new(),
            bus,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawns every background task and starts every configured
    /// notification sink. Idempotent only in the sense that calling it
    /// twice would double-spawn; callers invoke it once at startup.
    pub async fn start(
        &self,
        repository: SharedSnapcastRepository,
        client_manager: Arc<ClientManager>,
        zone_manager: Arc<ZoneManager>,
        media: Arc<MediaPlayerSupervisor>,
    ) {
        let mut tasks = self.tasks.lock().await;

        let transport = self.transport.clone();
        tasks.push(("snapcast-transport", tokio::spawn(async move { transport.run().await })));

        tasks.push((
            "snapcast-reconnect-hydration",
            tokio::spawn(reconnect_hydration_task(
                self.transport.clone(),
                repository.clone(),
                zone_manager.clone(),
                self.bus.clone(),
                self.shutdown.clone(),
            )),
        ));

        tasks.push((
            "snapcast-event-application",
            tokio::spawn(event_application_task(
                self.transport.clone(),
                repository,
                client_manager,
                zone_manager.clone(),
                self.shutdown.clone(),
            )),
        ));

        tasks.push((
            "media-player-bridge",
            tokio::spawn(media_bridge_task(media, zone_manager, self.shutdown.clone())),
        ));

        drop(tasks);

        for sink in &self.sinks {
            if !sink.can_start().await {
                debug!("{} cannot start (not configured), skipping", sink.name());
                continue;
            }
            match sink.start().await {
                Ok(()) => info!("started {}", sink.name()),
                Err(e) => warn!("failed to start {}: {e}", sink.name()),
            }
        }
    }

    /// Publishes `ShuttingDown`, stops every sink, cancels the transport
    /// and every background task, then joins them with a bounded timeout
    /// so one stuck task cannot hang process exit (spec §7).
    pub async fn shutdown(&self) {
        info!("supervisor initiating shutdown");
        self.bus.publish(Notification::ShuttingDown);

        for sink in &self.sinks {
            sink.stop().await;
        }

        self.transport.close().await;
        self.shutdown.cancel();

        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for (name, handle) in handles {
            match tokio::time::timeout(SHUTDOWN_TASK_TIMEOUT, handle).await {
                Ok(Ok(())) => debug!("{name} task joined"),
                Ok(Err(e)) => warn!("{name} task panicked: {e}"),
                Err(_) => warn!("{name} task did not join within timeout, abandoning"),
            }
        }
        info!("supervisor shutdown complete");
    }
}

#[derive(serde::Deserialize)]
struct ServerStatusResult {
    server: Server,
}

/// On every reconnect, issues `Server.GetStatus` and hands the full
/// snapshot to the repository before group/zone state is trusted again
/// (spec §4.1 "On reconnect... before releasing subscribers").
async fn reconnect_hydration_task(
    transport: Arc<SnapcastTransport>,
    repository: SharedSnapcastRepository,
    zone_manager: Arc<ZoneManager>,
    bus: SharedBus,
    shutdown: CancellationToken,
) {
    let mut watch = transport.connection_watch();
    let mut was_connected = *watch.borrow();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            changed = watch.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        let connected = *watch.borrow();
        if connected && !was_connected {
            match transport.request("Server.GetStatus", None).await {
                Ok(value) => match serde_json::from_value::<ServerStatusResult>(value) {
                    Ok(result) => {
                        repository.replace_server(result.server).await;
                        zone_manager.resync_all_from_snapcast().await;
                        bus.publish(NotificationBuilder::system_status(true, "snapcast server connected"));
                    }
                    Err(e) => warn!("Server.GetStatus returned an unexpected shape: {e}"),
                },
                Err(e) => warn!("Server.GetStatus failed after reconnect: {e}"),
            }
        } else if !connected && was_connected {
            bus.publish(NotificationBuilder::system_status(false, "snapcast server disconnected"));
        }
        was_connected = connected;
    }
}

/// Folds every Snapcast notification into the repository, then routes
/// the applied change to whichever manager owns that derived state
/// (spec §4.2 "the repository emits an internal changed signal that the
/// Client Manager and Zone Manager use to recompute derived state").
async fn event_application_task(
    transport: Arc<SnapcastTransport>,
    repository: SharedSnapcastRepository,
    client_manager: Arc<ClientManager>,
    zone_manager: Arc<ZoneManager>,
    shutdown: CancellationToken,
) {
    let mut rx = transport.subscribe();
    loop {
        let notification = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = rx.recv() => result,
        };
        match notification {
            Ok(notification) => {
                let change = repository.apply_event(&notification).await;
                match change {
                    AppliedChange::ClientConnection(_) | AppliedChange::ClientProperty(_) => {
                        client_manager.handle_snapcast_change(change).await;
                    }
                    AppliedChange::GroupChanged(_) | AppliedChange::StreamChanged(_) | AppliedChange::ServerReplaced => {
                        zone_manager.resync_all_from_snapcast().await;
                    }
                    AppliedChange::Ignored => {}
                }
            }
            Err(RecvError::Lagged(n)) => warn!("event application lagged by {n} snapcast notifications"),
            Err(RecvError::Closed) => return,
        }
    }
}

/// Bridges the Media Player Supervisor's position/state/track events
/// into the owning zone's event-integration handlers (spec §4.4 "Event
/// integration").
async fn media_bridge_task(media: Arc<MediaPlayerSupervisor>, zone_manager: Arc<ZoneManager>, shutdown: CancellationToken) {
    let mut rx = media.subscribe();
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = rx.recv() => result,
        };
        match event {
            Ok(PlayerEvent::PositionChanged {
                zone_index,
                position_ms,
                progress,
                duration_ms,
            }) => {
                if let Ok(zone) = zone_manager.service(zone_index) {
                    zone.on_player_position_changed(position_ms, progress, duration_ms).await;
                }
            }
            Ok(PlayerEvent::PlaybackStateChanged {
                zone_index,
                state,
                is_playing,
            }) => {
                if let Ok(zone) = zone_manager.service(zone_index) {
                    zone.on_player_state_changed(is_playing, state).await;
                }
            }
            Ok(PlayerEvent::TrackInfoChanged { zone_index, track }) => {
                if let Ok(zone) = zone_manager.service(zone_index) {
                    zone.on_player_track_info_changed(track).await;
                }
            }
            Err(RecvError::Lagged(n)) => warn!("media bridge lagged by {n} player events"),
            Err(RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::create_bus;
    use crate::playlist::NullPlaylistProvider;
    use crate::snapcast::SnapcastStateRepository;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn shutdown_publishes_shutting_down_and_stops_sinks() {
        let bus = create_bus();
        let transport = SnapcastTransport::new("127.0.0.1".into(), 1, StdDuration::from_millis(50));
        let supervisor = SnapDogSupervisor::new(transport.clone(), vec![], bus.clone());

        let repository: SharedSnapcastRepository = Arc::new(SnapcastStateRepository::new(vec![]));
        let client_manager =
            ClientManager::new(vec![], vec![], repository.clone(), transport.clone(), bus.clone());
        let zone_manager = ZoneManager::new(
            &[],
            client_manager.clone(),
            Arc::new(NullPlaylistProvider),
            repository.clone(),
            transport.clone(),
            bus.clone(),
            StdDuration::from_millis(500),
        );
        let media = MediaPlayerSupervisor::new(StdDuration::from_millis(500));

        let mut rx = bus.subscribe();
        supervisor.start(repository, client_manager, zone_manager, media).await;
        supervisor.shutdown().await;

        let mut saw_shutting_down = false;
        while let Ok(envelope) = rx.try_recv() {
            if matches!(envelope.notification, Notification::ShuttingDown) {
                saw_shutting_down = true;
            }
        }
        assert!(saw_shutting_down);
    }
}
