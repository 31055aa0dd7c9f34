//! Background recovery for rooms stuck in result viewing. A draw result is
//! shown for a bounded window; once it elapses the sweeper forces the room
//! back into the input phase so a host who disconnected mid-view cannot
//! strand the other members.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::registry::RoomRegistry;
use crate::room::RoomState;
use crate::states::RoomStateOps;

/// How long a draw result stays on screen before the room is forced back
/// into the input phase. Also the scan cadence: sweeping faster than the
/// display window buys nothing, since the elapsed check gates the force.
pub const DEFAULT_DISPLAY_DURATION: Duration = Duration::from_secs(10);

pub struct ExpirySweeper {
    registry: RoomRegistry,
    states: RoomStateOps,
    clock: Arc<dyn Clock>,
    display_duration: Duration,
}

impl ExpirySweeper {
    pub fn new(
        registry: RoomRegistry,
        states: RoomStateOps,
        clock: Arc<dyn Clock>,
        display_duration: Duration,
    ) -> Self {
        Self {
            registry,
            states,
            clock,
            display_duration,
        }
    }

    fn display_millis(&self) -> i64 {
        self.display_duration.as_millis() as i64
    }

    /// Scan forever. Intended to be spawned once per process.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.display_duration);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let forced = self.sweep_once();
            if forced > 0 {
                tracing::debug!(forced, "sweep pass forced rooms back to input");
            }
        }
    }

    /// One pass over every active room. Returns how many rooms were forced
    /// back into the input phase. Failures on individual rooms are logged
    /// and skipped; one broken room must not shield the rest from recovery.
    pub fn sweep_once(&self) -> usize {
        let ids = match self.registry.active_room_ids() {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(%err, "sweep could not list active rooms");
                return 0;
            }
        };

        let mut forced = 0;
        for room_id in ids {
            match self.sweep_room(&room_id) {
                Ok(true) => forced += 1,
                Ok(false) => {}
                Err(err) => tracing::warn!(room_id, %err, "sweep skipped room"),
            }
        }
        forced
    }

    fn sweep_room(&self, room_id: &str) -> crate::error::RoomResult<bool> {
        match self.registry.room_state(room_id)? {
            Some(RoomState::ResultViewing) => {}
            _ => return Ok(false),
        }

        match self.registry.last_draw_at(room_id)? {
            Some(drawn_at) => {
                let elapsed = self.clock.now_millis() - drawn_at;
                if elapsed < self.display_millis() {
                    return Ok(false);
                }
                tracing::info!(room_id, elapsed, "display window expired, forcing input phase");
            }
            // Viewing with no timestamp means a half-written draw; recover
            // immediately instead of waiting on a clock that never started.
            None => {
                tracing::warn!(room_id, "result viewing without draw timestamp, forcing input phase");
            }
        }

        self.states.begin_input_phase(room_id)?;
        Ok(true)
    }
}
