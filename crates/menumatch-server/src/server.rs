use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::RwLock;

use menumatch_core::{MenuBallot, RoomCoordinator, RoomStateOps};

use crate::connection::{self, ConnectionHandle};
use crate::hub::ConnectionHub;

pub struct ServerState {
    pub coordinator: Arc<RoomCoordinator>,
    pub ballot: Arc<MenuBallot>,
    pub states: RoomStateOps,
    pub hub: Arc<ConnectionHub>,
    pub connections: RwLock<HashMap<String, ConnectionHandle>>,
    pub max_connections: usize,
}

pub type SharedState = Arc<ServerState>;

impl ServerState {
    /// Reserve a username for a connection. Check and insert happen under
    /// one write lock, so of two racing handshakes for the same username
    /// exactly one wins.
    pub async fn register_connection(&self, handle: ConnectionHandle) -> bool {
        let mut conns = self.connections.write().await;
        if conns.contains_key(&handle.username) {
            return false;
        }
        conns.insert(handle.username.clone(), handle);
        true
    }
}

pub async fn run(addr: SocketAddr, state: SharedState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    loop {
        let (stream, peer_addr) = listener.accept().await?;

        // Enforce max connections
        let conn_count = state.connections.read().await.len();
        if conn_count >= state.max_connections {
            tracing::warn!(
                "Rejecting connection from {} (max {} reached)",
                peer_addr,
                state.max_connections
            );
            drop(stream);
            continue;
        }

        tracing::info!(
            "New connection from {} ({}/{})",
            peer_addr,
            conn_count + 1,
            state.max_connections
        );

        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = connection::handle_connection(stream, peer_addr, state).await {
                tracing::warn!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    use menumatch_core::clock::SystemClock;
    use menumatch_core::{MemoryStore, MenuBallot, RoomCoordinator, RoomRegistry, RoomStateOps};

    fn state() -> SharedState {
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
        let ballot = Arc::new(MenuBallot::new(registry, states.clone(), hub.clone(), clock));
        Arc::new(ServerState {
            coordinator,
            ballot,
            states,
            hub,
            connections: RwLock::new(HashMap::new()),
            max_connections: 16,
        })
    }

    fn handle(username: &str) -> ConnectionHandle {
        let (tx, _rx) = mpsc::unbounded_channel();
        ConnectionHandle {
            username: username.to_string(),
            endpoint: "10.0.0.1:4000".to_string(),
            tx,
        }
    }

    #[tokio::test]
    async fn registration_rejects_a_taken_username() {
        let state = state();
        assert!(state.register_connection(handle("alice")).await);
        assert!(!state.register_connection(handle("alice")).await);
        assert!(state.register_connection(handle("bob")).await);
        assert_eq!(state.connections.read().await.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_logins_for_one_username_admit_exactly_one() {
        let state = state();
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                state.register_connection(handle("alice")).await
            }));
        }

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(state.connections.read().await.len(), 1);
    }
}
