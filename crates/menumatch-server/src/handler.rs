use menumatch_core::broadcast::room_topic;
use menumatch_core::coordinator::{CreateRoomParams, LeaveOutcome};
use menumatch_core::error::RoomError;
use menumatch_core::protocol::{ClientMessage, ErrorCode, ServerMessage};
use menumatch_core::room::RoomState;

use crate::server::SharedState;

pub async fn handle_message(
    username: &str,
    msg: ClientMessage,
    state: &SharedState,
) -> anyhow::Result<()> {
    match msg {
        ClientMessage::ListRooms => match state.coordinator.list_rooms() {
            Ok(rooms) => {
                send_to_user(username, ServerMessage::RoomList { rooms }, state).await;
            }
            Err(e) => send_error(username, &e, state).await,
        },

        ClientMessage::CreateRoom {
            name,
            max_users,
            is_private,
            password,
            nickname,
        } => {
            let endpoint = endpoint_of(username, state).await;
            let params = CreateRoomParams {
                name,
                max_users,
                is_private,
                password,
            };
            match state
                .coordinator
                .create_room(username, params, &endpoint, &nickname)
            {
                Ok(details) => {
                    subscribe(username, &details.room_id, state).await;
                    send_to_user(username, ServerMessage::RoomJoined { details }, state).await;
                }
                Err(e) => send_error(username, &e, state).await,
            }
        }

        ClientMessage::JoinRoom {
            room_id,
            password,
            nickname,
        } => {
            let endpoint = endpoint_of(username, state).await;
            // Subscribe first so the join's own broadcasts reach this user.
            subscribe(username, &room_id, state).await;
            match state
                .coordinator
                .join_room(username, &room_id, password.as_deref(), &endpoint, &nickname)
                .await
            {
                Ok(details) => {
                    send_to_user(username, ServerMessage::RoomJoined { details }, state).await;
                }
                Err(e) => {
                    state.hub.unsubscribe(&room_topic(&room_id), username);
                    send_error(username, &e, state).await;
                }
            }
        }

        ClientMessage::LeaveRoom => {
            match state.coordinator.leave_room(username) {
                Ok(outcome) => {
                    apply_leave_outcome(username, &outcome, state);
                    send_to_user(username, ServerMessage::RoomLeft, state).await;
                }
                Err(e) => send_error(username, &e, state).await,
            }
        }

        ClientMessage::SubmitMenus { menus } => {
            let Some(room_id) = room_of(username, state).await else {
                return Ok(());
            };
            match state.ballot.submit_menus(username, &room_id, &menus) {
                Ok(outcome) => {
                    if outcome.next_state == Some(RoomState::Submitted) {
                        state.states.mark_all_submitted(&room_id)?;
                    }
                    send_to_user(
                        username,
                        ServerMessage::MenuStatus {
                            status: outcome.status,
                            next_state: outcome.next_state,
                        },
                        state,
                    )
                    .await;
                }
                Err(e) => send_error(username, &e, state).await,
            }
        }

        ClientMessage::RecommendMenu { menu_key } => {
            let Some(room_id) = room_of(username, state).await else {
                return Ok(());
            };
            match state.ballot.recommend_menu(username, &room_id, &menu_key) {
                Ok(status) => {
                    send_to_user(
                        username,
                        ServerMessage::MenuStatus {
                            status,
                            next_state: None,
                        },
                        state,
                    )
                    .await;
                }
                Err(e) => send_error(username, &e, state).await,
            }
        }

        ClientMessage::DislikeMenu { menu_key } => {
            let Some(room_id) = room_of(username, state).await else {
                return Ok(());
            };
            match state.ballot.dislike_menu(username, &room_id, &menu_key) {
                Ok(status) => {
                    send_to_user(
                        username,
                        ServerMessage::MenuStatus {
                            status,
                            next_state: None,
                        },
                        state,
                    )
                    .await;
                }
                Err(e) => send_error(username, &e, state).await,
            }
        }

        ClientMessage::StartDraw => {
            let Some(room_id) = room_of(username, state).await else {
                return Ok(());
            };
            match state.ballot.start_draw(username, &room_id) {
                Ok(outcome) => {
                    send_to_user(
                        username,
                        ServerMessage::DrawStarted {
                            selected_menu: outcome.selected_menu,
                        },
                        state,
                    )
                    .await;
                }
                Err(e) => send_error(username, &e, state).await,
            }
        }

        ClientMessage::ResetRoom => {
            let Some(room_id) = room_of(username, state).await else {
                return Ok(());
            };
            match state.ballot.reset(username, &room_id) {
                Ok(status) => {
                    send_to_user(
                        username,
                        ServerMessage::MenuStatus {
                            status,
                            next_state: Some(RoomState::Inputting),
                        },
                        state,
                    )
                    .await;
                }
                Err(e) => send_error(username, &e, state).await,
            }
        }

        ClientMessage::Ping => {
            send_to_user(username, ServerMessage::Pong, state).await;
        }

        ClientMessage::Disconnect => {
            handle_disconnect(username, state).await;
        }

        ClientMessage::Hello { .. } => {
            // Handshake is over by the time messages reach this dispatch.
            tracing::warn!(username, "unexpected Hello after handshake");
        }
    }

    Ok(())
}

pub async fn handle_disconnect(username: &str, state: &SharedState) {
    match state.coordinator.leave_room(username) {
        Ok(outcome) => apply_leave_outcome(username, &outcome, state),
        Err(e) => {
            tracing::warn!(username, error = %e, "error while leaving on disconnect");
        }
    }
    state.hub.unsubscribe_all(username);
    state.connections.write().await.remove(username);
}

fn apply_leave_outcome(username: &str, outcome: &LeaveOutcome, state: &SharedState) {
    match outcome {
        LeaveOutcome::NotInRoom => {}
        LeaveOutcome::Left { room_id } => {
            state.hub.unsubscribe(&room_topic(room_id), username);
        }
        LeaveOutcome::RoomClosed { room_id } => {
            // The closing broadcast already went out; the topic is dead.
            state.hub.remove_topic(&room_topic(room_id));
        }
    }
}

async fn subscribe(username: &str, room_id: &str, state: &SharedState) {
    let conns = state.connections.read().await;
    if let Some(conn) = conns.get(username) {
        state
            .hub
            .subscribe(&room_topic(room_id), username, conn.tx.clone());
    }
}

async fn room_of(username: &str, state: &SharedState) -> Option<String> {
    match state.coordinator.registry().find_room_of_user(username) {
        Ok(Some(room_id)) => Some(room_id),
        Ok(None) => {
            send_error(username, &RoomError::Unauthorized, state).await;
            None
        }
        Err(e) => {
            send_error(username, &e, state).await;
            None
        }
    }
}

async fn endpoint_of(username: &str, state: &SharedState) -> String {
    state
        .connections
        .read()
        .await
        .get(username)
        .map(|c| c.endpoint.clone())
        .unwrap_or_default()
}

async fn send_to_user(username: &str, msg: ServerMessage, state: &SharedState) {
    let conns = state.connections.read().await;
    if let Some(conn) = conns.get(username) {
        let _ = conn.tx.send(msg);
    }
}

async fn send_error(username: &str, err: &RoomError, state: &SharedState) {
    send_to_user(
        username,
        ServerMessage::Error {
            code: ErrorCode::from(err),
            message: err.to_string(),
        },
        state,
    )
    .await;
}
