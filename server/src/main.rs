use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use momentum_realtime::config::{generate_config_template, Config};
use momentum_realtime::events::EventRouter;
use momentum_realtime::fleet::{self, FleetAdapter, FleetDirectory, FleetEnvelope, FleetEvent};
use momentum_realtime::presence::{self, PresenceTracker};
use momentum_realtime::queue::{self, OfflineQueue};
use momentum_realtime::state::AppState;
use momentum_realtime::ws::rate_limit::{RateLimitConfig, RateLimiter};
use momentum_realtime::ws::registry::ConnectionRegistry;
use momentum_realtime::{auth, db, routes};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "momentum_realtime=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "momentum_realtime=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!(
        "momentum-realtime v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    // Initialize SQLite: membership tables + offline queue
    let db = db::init_db(&config.data_dir)?;

    // Load or generate the JWT verification key (256-bit random, in data_dir)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // Process-local delivery state
    let registry = Arc::new(ConnectionRegistry::new());
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        window: Duration::from_millis(config.rate_limit.window_ms),
        max_events: config.rate_limit.max_events,
        disconnect_after_violations: config.rate_limit.disconnect_after_violations,
    }));

    // Durable offline queue + hygiene sweep
    let offline_queue = Arc::new(OfflineQueue::new(db.clone()));
    queue::spawn_expiry_sweep(
        db.clone(),
        Duration::from_secs(config.queue.sweep_interval_secs),
    );

    // --- Fleet Setup ---
    let fleet_directory = Arc::new(FleetDirectory::new());

    let (fleet_adapter, fleet_peer_id, fleet_evt_rx) = if config.fleet.enabled {
        // Load or generate this process's fleet identity keypair
        let keypair = fleet::identity::fleet_identity_keypair(&config.data_dir);
        let peer_id = libp2p::PeerId::from(keypair.public()).to_string();

        let swarm = fleet::swarm::build_swarm(keypair, &config.fleet);

        // Channels between the adapter/consumer and the swarm event loop
        let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel::<fleet::FleetCommand>();
        let (evt_tx, evt_rx) = tokio::sync::mpsc::unbounded_channel::<FleetEvent>();

        let listen_addr: libp2p::Multiaddr =
            format!("/ip4/0.0.0.0/tcp/{}", config.fleet.port).parse()?;
        let bootstrap_peers: Vec<libp2p::Multiaddr> = config
            .fleet
            .peers
            .iter()
            .filter_map(|p| match p.parse() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    tracing::warn!(peer = %p, error = %e, "ignoring unparseable fleet peer");
                    None
                }
            })
            .collect();

        // Spawn the swarm event loop
        let directory_for_swarm = fleet_directory.clone();
        tokio::spawn(async move {
            fleet::swarm::run_fleet_loop(
                swarm,
                cmd_rx,
                evt_tx,
                directory_for_swarm,
                listen_addr,
                bootstrap_peers,
            )
            .await;
        });

        (FleetAdapter::new(cmd_tx), Some(peer_id), Some(evt_rx))
    } else {
        tracing::info!("Fleet disabled: single process, offline queue is the only fallback");
        (FleetAdapter::disabled(), None, None)
    };

    // Delivery façade over registry + fleet + queue
    let router = Arc::new(EventRouter::new(
        registry.clone(),
        fleet_adapter.clone(),
        offline_queue.clone(),
        config.queue.default_ttl_secs,
    ));

    // Presence updates travel on their own room; every process subscribes.
    fleet_adapter.subscribe_room(presence::PRESENCE_ROOM);

    // Spawn the consumer task: fleet gossip -> local delivery only. The
    // owning process of each connection is the only one that acts on it.
    if let Some(mut evt_rx) = fleet_evt_rx {
        let consumer_router = router.clone();
        tokio::spawn(async move {
            while let Some(event) = evt_rx.recv().await {
                match event {
                    FleetEvent::Message { source, topic, data } => {
                        let Some(room) = fleet::room_from_topic(&topic) else {
                            tracing::debug!(topic = %topic, "gossip outside our namespace ignored");
                            continue;
                        };
                        match FleetEnvelope::decode(room, &data) {
                            Ok(envelope) => {
                                consumer_router.deliver_from_fleet(
                                    &envelope.room,
                                    &envelope.event,
                                    envelope.payload,
                                );
                            }
                            Err(e) => {
                                tracing::warn!(
                                    source = %source,
                                    topic = %topic,
                                    error = %e,
                                    "undecodable fleet envelope"
                                );
                            }
                        }
                    }
                    FleetEvent::PeerConnected(peer_id) => {
                        tracing::info!(peer_id = %peer_id, "fleet peer connected");
                    }
                    FleetEvent::PeerDisconnected(peer_id) => {
                        tracing::info!(peer_id = %peer_id, "fleet peer disconnected");
                    }
                }
            }
        });
    }

    // Build application state
    let app_state = AppState {
        db,
        jwt_secret,
        registry,
        limiter,
        queue: offline_queue,
        fleet: fleet_adapter,
        router,
        presence: Arc::new(PresenceTracker::new()),
        fleet_directory,
        fleet_peer_id,
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
