mod connection;
mod handler;
mod hub;
mod server;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::RwLock;

use menumatch_core::clock::SystemClock;
use menumatch_core::{
    ExpirySweeper, MemoryStore, MenuBallot, RoomCoordinator, RoomRegistry, RoomStateOps,
};

use crate::hub::ConnectionHub;
use crate::server::ServerState;

/// MenuMatch Server - room-based lunch menu coordination
#[derive(Parser, Debug)]
#[command(name = "menumatch-server", version, about)]
struct Args {
    /// Address to bind the server to
    #[arg(short, long, default_value = "0.0.0.0:9321")]
    bind: String,

    /// Maximum simultaneous connections allowed
    #[arg(short, long, default_value_t = 100)]
    max_connections: usize,

    /// Seconds a draw result stays on screen before the room is forced
    /// back to the input phase
    #[arg(long, default_value_t = 10)]
    result_view_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "menumatch_server=debug,menumatch_core=debug".into()),
        )
        .init();

    let args = Args::parse();
    let addr: SocketAddr = args.bind.parse()?;

    let store = Arc::new(MemoryStore::new());
    let hub = Arc::new(ConnectionHub::new());
    let clock = Arc::new(SystemClock);
    let registry = RoomRegistry::new(store);
    let states = RoomStateOps::new(registry.clone(), hub.clone());
    let coordinator = Arc::new(RoomCoordinator::new(
        registry.clone(),
        states.clone(),
        hub.clone(),
        clock.clone(),
    ));
    let ballot = Arc::new(MenuBallot::new(
        registry.clone(),
        states.clone(),
        hub.clone(),
        clock.clone(),
    ));

    let sweeper = ExpirySweeper::new(
        registry,
        states.clone(),
        clock,
        Duration::from_secs(args.result_view_secs),
    );
    tokio::spawn(sweeper.run());

    let state = Arc::new(ServerState {
        coordinator,
        ballot,
        states,
        hub,
        connections: RwLock::new(HashMap::new()),
        max_connections: args.max_connections,
    });

    tracing::info!(
        "Starting menumatch server on {} (max {} connections)",
        addr,
        args.max_connections
    );
    server::run(addr, state).await
}
