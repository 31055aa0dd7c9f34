pub mod ballot;
pub mod broadcast;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod keys;
pub mod memory_store;
pub mod password;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod states;
pub mod store;
pub mod sweeper;
pub mod view;

pub use ballot::{DrawOutcome, MenuBallot, SubmitOutcome};
pub use broadcast::{Broadcaster, RoomEvent};
pub use clock::{Clock, SystemClock};
pub use coordinator::{CreateRoomParams, LeaveOutcome, RoomCoordinator};
pub use error::{RoomError, RoomResult, StoreError};
pub use memory_store::MemoryStore;
pub use registry::RoomRegistry;
pub use room::{MenuStatus, RoomDetails, RoomState, RoomSummary};
pub use states::RoomStateOps;
pub use store::KeyedStore;
pub use sweeper::ExpirySweeper;
