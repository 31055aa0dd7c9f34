use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::broadcast::RoomEvent;
use crate::error::RoomError;
use crate::room::{MenuStatus, RoomDetails, RoomState, RoomSummary};

// -- Framing --

pub type Transport = Framed<TcpStream, LengthDelimitedCodec>;

pub fn framed_transport(stream: TcpStream) -> Transport {
    LengthDelimitedCodec::builder()
        .max_frame_length(64 * 1024)
        .new_framed(stream)
}

// -- Client -> Server Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    // Handshake
    Hello {
        username: String,
        version: String,
    },

    // Rooms
    CreateRoom {
        name: String,
        max_users: u32,
        is_private: bool,
        password: Option<String>,
        nickname: String,
    },
    JoinRoom {
        room_id: String,
        password: Option<String>,
        nickname: String,
    },
    LeaveRoom,
    ListRooms,

    // Menus
    SubmitMenus {
        menus: Vec<String>,
    },
    RecommendMenu {
        menu_key: String,
    },
    DislikeMenu {
        menu_key: String,
    },
    StartDraw,
    ResetRoom,

    // Connection
    Ping,
    Disconnect,
}

// -- Server -> Client Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    // Handshake
    Welcome {
        server_version: String,
    },
    HandshakeError {
        reason: String,
    },

    // Rooms
    RoomList {
        rooms: Vec<RoomSummary>,
    },
    RoomJoined {
        details: RoomDetails,
    },
    RoomLeft,

    // Menus
    MenuStatus {
        status: MenuStatus,
        next_state: Option<RoomState>,
    },
    DrawStarted {
        selected_menu: String,
    },

    // Push notifications
    Event {
        topic: String,
        event: RoomEvent,
    },

    // Errors
    Error {
        code: ErrorCode,
        message: String,
    },

    // Connection
    Pong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    RoomNotFound,
    RoomFull,
    AlreadyInRoom,
    BadPassword,
    Unauthorized,
    InvalidState,
    InvalidSubmission,
    NoDrawableMenus,
    QuotaExhausted,
    Conflict,
    InternalError,
}

impl From<&RoomError> for ErrorCode {
    fn from(err: &RoomError) -> Self {
        match err {
            RoomError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            RoomError::RoomFull => ErrorCode::RoomFull,
            RoomError::AlreadyInRoom | RoomError::AlreadyInOtherRoom(_) => ErrorCode::AlreadyInRoom,
            RoomError::BadPassword => ErrorCode::BadPassword,
            RoomError::Unauthorized => ErrorCode::Unauthorized,
            RoomError::InvalidState(_) => ErrorCode::InvalidState,
            RoomError::InvalidSubmission(_) => ErrorCode::InvalidSubmission,
            RoomError::NoDrawableMenus => ErrorCode::NoDrawableMenus,
            RoomError::QuotaExhausted => ErrorCode::QuotaExhausted,
            RoomError::WatchConflict => ErrorCode::Conflict,
            RoomError::IdSpaceExhausted(_)
            | RoomError::Inconsistency(_)
            | RoomError::Store(_)
            | RoomError::Unknown(_) => ErrorCode::InternalError,
        }
    }
}

// -- Serialization helpers --

pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    Ok(Bytes::from(json))
}

pub fn deserialize_message<T: for<'de> Deserialize<'de>>(
    data: &[u8],
) -> Result<T, serde_json::Error> {
    serde_json::from_slice(data)
}

// -- Transport helpers --

pub async fn send_message<T: Serialize>(
    transport: &mut Transport,
    msg: &T,
) -> anyhow::Result<()> {
    let bytes = serialize_message(msg).map_err(|e| anyhow::anyhow!("serialize error: {}", e))?;
    transport
        .send(bytes.into())
        .await
        .map_err(|e| anyhow::anyhow!("send error: {}", e))
}

pub async fn recv_message<T: for<'de> Deserialize<'de>>(
    transport: &mut Transport,
) -> anyhow::Result<Option<T>> {
    match transport.next().await {
        Some(Ok(frame)) => {
            let msg = deserialize_message(&frame)
                .map_err(|e| anyhow::anyhow!("deserialize error: {}", e))?;
            Ok(Some(msg))
        }
        Some(Err(e)) => Err(anyhow::anyhow!("recv error: {}", e)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::Hello {
            username: "alice".into(),
            version: "0.1.0".into(),
        };
        let bytes = serialize_message(&msg).unwrap();
        let deserialized: ClientMessage = deserialize_message(&bytes).unwrap();
        match deserialized {
            ClientMessage::Hello { username, version } => {
                assert_eq!(username, "alice");
                assert_eq!(version, "0.1.0");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_server_message_serialization() {
        let msg = ServerMessage::DrawStarted {
            selected_menu: "Pizza".into(),
        };
        let bytes = serialize_message(&msg).unwrap();
        let deserialized: ServerMessage = deserialize_message(&bytes).unwrap();
        match deserialized {
            ServerMessage::DrawStarted { selected_menu } => {
                assert_eq!(selected_menu, "Pizza");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            ErrorCode::from(&RoomError::RoomFull),
            ErrorCode::RoomFull
        );
        assert_eq!(
            ErrorCode::from(&RoomError::AlreadyInOtherRoom("room-aa11bb".into())),
            ErrorCode::AlreadyInRoom
        );
        assert_eq!(
            ErrorCode::from(&RoomError::WatchConflict),
            ErrorCode::Conflict
        );
        assert_eq!(
            ErrorCode::from(&RoomError::Inconsistency("dangling location".into())),
            ErrorCode::InternalError
        );
    }

    #[test]
    fn test_all_client_messages_serialize() {
        let messages = vec![
            ClientMessage::Hello {
                username: "test".into(),
                version: "0.1.0".into(),
            },
            ClientMessage::CreateRoom {
                name: "lunch".into(),
                max_users: 4,
                is_private: true,
                password: Some("hunter2".into()),
                nickname: "Tess".into(),
            },
            ClientMessage::JoinRoom {
                room_id: "room-aa11bb".into(),
                password: None,
                nickname: "Tess".into(),
            },
            ClientMessage::LeaveRoom,
            ClientMessage::ListRooms,
            ClientMessage::SubmitMenus {
                menus: vec!["Pizza".into(), "Chicken".into()],
            },
            ClientMessage::RecommendMenu {
                menu_key: "Pizza".into(),
            },
            ClientMessage::DislikeMenu {
                menu_key: "Chicken".into(),
            },
            ClientMessage::StartDraw,
            ClientMessage::ResetRoom,
            ClientMessage::Ping,
            ClientMessage::Disconnect,
        ];

        for msg in &messages {
            let bytes = serialize_message(msg).unwrap();
            let _: ClientMessage = deserialize_message(&bytes).unwrap();
        }
    }
}
