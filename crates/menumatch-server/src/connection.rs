use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use menumatch_core::protocol::{
    self, framed_transport, serialize_message, ClientMessage, ServerMessage,
};

use crate::handler;
use crate::server::SharedState;

pub struct ConnectionHandle {
    pub username: String,
    pub endpoint: String,
    pub tx: mpsc::UnboundedSender<ServerMessage>,
}

pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: SharedState,
) -> anyhow::Result<()> {
    let mut transport = framed_transport(stream);

    // Step 1: Handshake -- expect Hello
    let hello: ClientMessage = match protocol::recv_message(&mut transport).await? {
        Some(msg) => msg,
        None => return Ok(()),
    };

    let (username, version) = match hello {
        ClientMessage::Hello { username, version } => {
            if username.trim().is_empty() {
                protocol::send_message(
                    &mut transport,
                    &ServerMessage::HandshakeError {
                        reason: "Username must not be empty".into(),
                    },
                )
                .await?;
                return Ok(());
            }
            (username, version)
        }
        _ => {
            protocol::send_message(
                &mut transport,
                &ServerMessage::HandshakeError {
                    reason: "Expected Hello message".into(),
                },
            )
            .await?;
            return Ok(());
        }
    };

    // Step 2: Create mpsc channel for outbound messages and reserve the
    // username before anything is sent. The reservation is atomic, so a
    // second simultaneous login for the same name loses here and never
    // clobbers the winner's handle.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let registered = state
        .register_connection(ConnectionHandle {
            username: username.clone(),
            endpoint: peer_addr.to_string(),
            tx: tx.clone(),
        })
        .await;
    if !registered {
        tracing::warn!("Rejecting duplicate login for '{}'", username);
        protocol::send_message(
            &mut transport,
            &ServerMessage::HandshakeError {
                reason: format!("User '{}' is already connected", username),
            },
        )
        .await?;
        return Ok(());
    }

    tracing::info!(
        "User '{}' connected from {} (client version: {})",
        username,
        peer_addr,
        version
    );
    if let Err(e) = protocol::send_message(
        &mut transport,
        &ServerMessage::Welcome {
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        },
    )
    .await
    {
        state.connections.write().await.remove(&username);
        return Err(e);
    }

    // Step 3: Split transport for independent read/write
    let (mut sink, mut stream) = transport.split();

    // Writer task: drains rx and writes to sink
    let write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serialize_message(&msg) {
                Ok(bytes) => {
                    if sink.send(bytes.into()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize message: {}", e);
                }
            }
        }
    });

    // Step 4: Reader loop
    loop {
        match stream.next().await {
            Some(Ok(frame)) => match protocol::deserialize_message::<ClientMessage>(&frame) {
                Ok(msg) => {
                    if let Err(e) = handler::handle_message(&username, msg, &state).await {
                        tracing::error!("Handler error for {}: {}", username, e);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to parse message from {}: {}", username, e);
                }
            },
            Some(Err(e)) => {
                tracing::warn!("Read error from {}: {}", username, e);
                break;
            }
            None => {
                tracing::info!("User '{}' disconnected", username);
                break;
            }
        }
    }

    // Cleanup
    handler::handle_disconnect(&username, &state).await;
    write_task.abort();
    Ok(())
}
