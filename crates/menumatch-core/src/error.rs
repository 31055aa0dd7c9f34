use thiserror::Error;

/// Failures reported by the key/value store itself (transport, infra).
/// These are always surfaced to the caller, never retried indefinitely.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("stored value for '{key}' has the wrong shape")]
    WrongType { key: String },

    #[error("corrupt record at '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Condition codes for every way a room operation can fail.
///
/// Validation and authorization failures are terminal. `WatchConflict` is
/// retryable by the caller; join retries it internally up to a bound.
/// `Inconsistency` means the location map and a room's member set disagree --
/// it is logged loudly, partially self-healed, and still surfaced.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room '{0}' not found")]
    RoomNotFound(String),

    #[error("user is already a member of this room")]
    AlreadyInRoom,

    #[error("user is already in room '{0}'")]
    AlreadyInOtherRoom(String),

    #[error("room is full")]
    RoomFull,

    #[error("wrong room password")]
    BadPassword,

    #[error("user is not authorized for this room")]
    Unauthorized,

    #[error("operation not valid in room state '{0}'")]
    InvalidState(String),

    #[error("invalid menu submission: {0}")]
    InvalidSubmission(String),

    #[error("no drawable menus remain")]
    NoDrawableMenus,

    #[error("recommend quota exhausted")]
    QuotaExhausted,

    #[error("optimistic transaction conflict, try again")]
    WatchConflict,

    #[error("room data inconsistency: {0}")]
    Inconsistency(String),

    #[error("could not generate a unique room id after {0} attempts")]
    IdSpaceExhausted(u32),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unknown error: {0}")]
    Unknown(String),
}

pub type RoomResult<T> = Result<T, RoomError>;

impl RoomError {
    /// Whether a second attempt of the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RoomError::WatchConflict)
    }
}
