//! Room state transitions and the bookkeeping each one drags along.
//! Shared by the coordinator (create/join), the ballot (draw/reset) and the
//! sweeper (forced recovery), so every path through a transition behaves
//! identically.

use std::sync::Arc;

use crate::broadcast::{room_topic, Broadcaster, RoomEvent};
use crate::error::RoomResult;
use crate::registry::RoomRegistry;
use crate::room::RoomState;
use crate::view;

/// Recommend credits each member starts an input phase with.
pub const RECOMMEND_QUOTA: i64 = 4;

#[derive(Clone)]
pub struct RoomStateOps {
    registry: RoomRegistry,
    broadcaster: Arc<dyn Broadcaster>,
}

impl RoomStateOps {
    pub fn new(registry: RoomRegistry, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            registry,
            broadcaster,
        }
    }

    /// Enter the input phase. Clearing policy: wipes menu entries, last-draw
    /// fields and submit statuses, and reinitializes every current member's
    /// quota -- forced recovery behaves exactly like a manual reset.
    pub fn begin_input_phase(&self, room_id: &str) -> RoomResult<()> {
        self.registry.clear_menus(room_id)?;
        self.registry.clear_last_draw(room_id)?;
        for username in self.registry.members(room_id)? {
            self.registry.set_submit_status(room_id, &username, false)?;
            self.registry
                .init_quota(room_id, &username, RECOMMEND_QUOTA)?;
        }
        self.registry
            .update_room_state(room_id, RoomState::Inputting)?;
        tracing::info!(room_id, "room entered input phase");

        let topic = room_topic(room_id);
        let status = view::build_menu_status(&self.registry, room_id)?;
        self.broadcaster
            .publish(&topic, &RoomEvent::MenuStatusUpdate { status });
        let details = view::build_room_details(&self.registry, room_id)?;
        self.broadcaster.publish(
            &topic,
            &RoomEvent::RoomStateUpdate {
                state: RoomState::Inputting,
                details,
            },
        );
        Ok(())
    }

    /// All members have submitted; lock submissions in.
    pub fn mark_all_submitted(&self, room_id: &str) -> RoomResult<()> {
        self.registry
            .update_room_state(room_id, RoomState::Submitted)?;
        tracing::info!(room_id, "all members submitted");
        let details = view::build_room_details(&self.registry, room_id)?;
        self.broadcaster.publish(
            &room_topic(room_id),
            &RoomEvent::RoomStateUpdate {
                state: RoomState::Submitted,
                details,
            },
        );
        Ok(())
    }

    /// Record a draw result and show it to the room.
    pub fn begin_result_viewing(
        &self,
        room_id: &str,
        selected_menu: &str,
        drawn_at: i64,
    ) -> RoomResult<()> {
        self.registry
            .save_last_draw(room_id, selected_menu, drawn_at)?;
        self.registry
            .update_room_state(room_id, RoomState::ResultViewing)?;

        let topic = room_topic(room_id);
        self.broadcaster.publish(
            &topic,
            &RoomEvent::DrawResult {
                selected_menu: selected_menu.to_string(),
            },
        );
        let details = view::build_room_details(&self.registry, room_id)?;
        self.broadcaster.publish(
            &topic,
            &RoomEvent::RoomStateUpdate {
                state: RoomState::ResultViewing,
                details,
            },
        );
        Ok(())
    }
}
