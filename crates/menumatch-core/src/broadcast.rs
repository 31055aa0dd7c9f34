use serde::{Deserialize, Serialize};

use crate::room::{MenuStatus, Participant, RoomDetails, RoomState};

/// Topic carrying all room and menu state changes for one room.
pub fn room_topic(room_id: &str) -> String {
    format!("room/{room_id}/events")
}

/// State-change events fanned out to room subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RoomEvent {
    ParticipantUpdate { participants: Vec<Participant> },
    RoomStateUpdate { state: RoomState, details: RoomDetails },
    MenuStatusUpdate { status: MenuStatus },
    DrawResult { selected_menu: String },
    RoomClosed { closed_by: String },
}

/// Fan-out seam. Delivery is at-most-once, best-effort; the engine never
/// waits for acknowledgment and ignores delivery failures.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, topic: &str, event: &RoomEvent);
}

/// Broadcaster that drops everything. Useful for tools and benchmarks.
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn publish(&self, _topic: &str, _event: &RoomEvent) {}
}

/// Test double that records every published event.
#[derive(Default)]
pub struct RecordingBroadcaster {
    events: std::sync::Mutex<Vec<(String, RoomEvent)>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, RoomEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<(String, RoomEvent)> {
        std::mem::take(&mut self.events.lock().unwrap())
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn publish(&self, topic: &str, event: &RoomEvent) {
        self.events
            .lock()
            .unwrap()
            .push((topic.to_string(), event.clone()));
    }
}
