//! SnapDog - control-plane core for a Snapcast-based multi-room audio
//! installation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use snapdog::adapters::Startable;
use snapdog::client::ClientManager;
use snapdog::config::{self, stream_id_from_sink};
use snapdog::coordinator::SnapDogSupervisor;
use snapdog::notify::MqttSink;
use snapdog::snapcast::{SnapcastStateRepository, SnapcastTransport};
use snapdog::{api, bus};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn print_version() {
    println!("snapdog {} ({})", env!("SNAPDOG_VERSION"), env!("SNAPDOG_GIT_SHA"));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        print_version();
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_version();
        println!();
        println!("Control-plane core for a Snapcast-based multi-room audio installation.");
        println!();
        println!("USAGE:");
        println!("    snapdog [OPTIONS]");
        println!();
        println!("OPTIONS:");
        println!("    -h, --help       Print help information");
        println!("    -V, --version    Print version information");
        println!();
        println!("ENVIRONMENT VARIABLES:");
        println!("    SNAPDOG_CONFIG_DIR                Configuration directory");
        println!("    SNAPDOG_LOG / RUST_LOG            Log filter");
        println!("    SNAPDOG__SYSTEM__SNAPCAST_HOST     Snapcast server host");
        println!("    SNAPDOG__SYSTEM__SNAPCAST_PORT     Snapcast server port");
        println!("    SNAPDOG__SYSTEM__MQTT_HOST         MQTT broker host (empty disables)");
        return Ok(());
    }

    let log_filter = std::env::var("SNAPDOG_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "snapdog=info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting snapdog v{} ({})", env!("SNAPDOG_VERSION"), env!("SNAPDOG_GIT_SHA"));

    let config = config::load_config()?;
    tracing::info!(
        "configuration loaded: {} zone(s), {} client(s)",
        config.zone_count(),
        config.client_count()
    );

    let bus = bus::create_bus();

    let configured_macs: Vec<String> = config.clients.iter().map(|c| c.mac.clone()).collect();
    let repository = Arc::new(SnapcastStateRepository::new(configured_macs));
    let transport = SnapcastTransport::new(
        config.system.snapcast_host.clone(),
        config.system.snapcast_port,
        Duration::from_millis(config.system.request_timeout_ms),
    );

    let zone_streams: Vec<String> = config.zones.iter().map(|z| stream_id_from_sink(&z.sink)).collect();
    let client_manager = ClientManager::new(
        config.clients.clone(),
        zone_streams,
        repository.clone(),
        transport.clone(),
        bus.clone(),
    );
    client_manager.hydrate().await;

    let zone_manager = snapdog::zone::ZoneManager::new(
        &config.zones,
        client_manager.clone(),
        Arc::new(snapdog::playlist::NullPlaylistProvider),
        repository.clone(),
        transport.clone(),
        bus.clone(),
        Duration::from_millis(config.system.progress_update_interval_ms),
    );
    zone_manager.hydrate().await;

    let mut sinks: Vec<Arc<dyn Startable>> = Vec::new();
    if !config.system.mqtt_host.trim().is_empty() {
        sinks.push(Arc::new(MqttSink::new(
            bus.clone(),
            config.system.mqtt_host.clone(),
            config.system.mqtt_port,
            config.system.mqtt_username.clone(),
            config.system.mqtt_password.clone(),
        )));
        tracing::info!("MQTT sink configured for {}:{}", config.system.mqtt_host, config.system.mqtt_port);
    } else {
        tracing::info!("MQTT host not configured, sink disabled");
    }

    let supervisor = Arc::new(SnapDogSupervisor::new(transport.clone(), sinks, bus.clone()));

    // No snapshot exists yet at this point; the reconnect-hydration task
    // (started below) performs the real `Server.GetStatus` resync as soon
    // as the transport connects. This just seeds an unbound baseline.
    zone_manager.initialize_all().await;

    let media = zone_manager.media();
    supervisor
        .start(repository.clone(), client_manager.clone(), zone_manager.clone(), media)
        .await;

    let state = api::AppState::new(zone_manager.clone(), client_manager.clone(), bus.clone());
    let router = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.system.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{addr}");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    supervisor.shutdown().await;
    tracing::info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("received SIGTERM, shutting down..."),
    }
}
