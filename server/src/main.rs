mod config;
mod connection;
mod dispatch;
mod error;
mod registry;
mod stats;
mod world;
mod ws;

use crate::config::WorldConfig;
use crate::connection::ConnectionEvent;
use crate::registry::PlayerRegistry;
use crate::stats::Stats;
use crate::world::World;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Bind address for the game server's raw TCP/WebSocket listener.
const BIND_ADDR: &str = "0.0.0.0:6970";
/// Target tick rate. The scheduler owns `PlayerRegistry` and `World`
/// exclusively, so every tick's reconciliation runs without locking.
const TICK_RATE_HZ: u32 = 60;
/// Backlog of connection events the scheduler will buffer before a
/// connection task blocks trying to report in.
const EVENT_QUEUE_CAPACITY: usize = 4096;

#[tokio::main]
/// Loads the world config, starts the TCP accept loop, and runs the
/// fixed-rate tick scheduler that is the sole owner of the game state.
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=trace", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();

    let world_config = WorldConfig::load().await;
    let mut world = World::new(
        world_config.scene,
        world_config
            .items
            .into_iter()
            .map(|(kind, x, y)| world::Item { kind, x, y, alive: true })
            .collect(),
    );

    let (events_tx, mut events_rx) = mpsc::channel::<ConnectionEvent>(EVENT_QUEUE_CAPACITY);

    let listener = tokio::net::TcpListener::bind(BIND_ADDR)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {BIND_ADDR}: {e}"));
    tracing::info!(addr = BIND_ADDR, "listening");

    tokio::spawn(accept_loop(listener, events_tx));

    let mut registry = PlayerRegistry::default();
    let mut stats = Stats::default();
    let dt = 1.0 / TICK_RATE_HZ as f32;
    let mut interval = tokio::time::interval(Duration::from_secs_f32(dt));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let tick_started = tokio::time::Instant::now();

        while let Ok(event) = events_rx.try_recv() {
            handle_event(&mut registry, &mut stats, event);
        }

        registry.run_tick(&mut world, &mut stats, dt);
        stats.end_tick(tick_started.elapsed().as_secs_f32());
    }
}

/// Accepts inbound TCP connections forever, spawning one `connection::run`
/// task per socket. Accept errors are logged and do not stop the loop.
async fn accept_loop(listener: tokio::net::TcpListener, events: mpsc::Sender<ConnectionEvent>) {
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                let _ = socket.set_nodelay(true);
                let remote = Some(addr.ip().to_string());
                let events = events.clone();
                tokio::spawn(connection::run(socket, remote, events));
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }
}

/// Folds one connection event into the registry/stats, run exclusively on
/// the scheduler task between ticks.
fn handle_event(registry: &mut PlayerRegistry, stats: &mut Stats, event: ConnectionEvent) {
    match event {
        ConnectionEvent::Connected {
            remote,
            outbound,
            kick,
            responder,
        } => {
            let id = registry.register_with_kick(remote, outbound, Some(kick));
            if id.is_some() {
                stats.record_joined();
            } else {
                stats.record_rejected();
            }
            let _ = responder.send(id);
        }
        ConnectionEvent::Frame { player_id, payload } => {
            stats.record_received(payload.len());
            let current_moving = registry.pending_moving(player_id);
            if !dispatch::dispatch(registry, stats, player_id, current_moving, &payload) {
                registry.kick(player_id);
            }
        }
        ConnectionEvent::Disconnected { player_id } => {
            registry.unregister(player_id);
            stats.record_left();
        }
    }
}
