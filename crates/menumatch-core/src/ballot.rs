//! Menu submission, voting, quota bookkeeping and the draw.
//!
//! Every operation authorizes against the caller's current location -- the
//! engine never trusts upstream authentication to have checked room
//! membership. Vote and quota mutations are single atomic operations against
//! one logical record; no multi-key transaction is needed here.

use std::sync::Arc;

use rand::Rng;

use crate::broadcast::{room_topic, Broadcaster, RoomEvent};
use crate::clock::Clock;
use crate::error::{RoomError, RoomResult};
use crate::registry::{fields, RoomRegistry};
use crate::room::{MenuStatus, RoomState, VoteField};
use crate::states::RoomStateOps;
use crate::view;

/// Most menus one user may have submitted at a time.
pub const MAX_MENUS_PER_USER: usize = 4;

/// Result of a submission: the fresh aggregate view, plus a signal that the
/// room is ready to transition (applying that transition is the caller's
/// job, via [`RoomStateOps::mark_all_submitted`]).
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub status: MenuStatus,
    pub next_state: Option<RoomState>,
}

#[derive(Debug, Clone)]
pub struct DrawOutcome {
    pub selected_menu: String,
    pub drawn_at: i64,
}

pub struct MenuBallot {
    registry: RoomRegistry,
    states: RoomStateOps,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
}

impl MenuBallot {
    pub fn new(
        registry: RoomRegistry,
        states: RoomStateOps,
        broadcaster: Arc<dyn Broadcaster>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            states,
            broadcaster,
            clock,
        }
    }

    fn authorize(&self, username: &str, room_id: &str) -> RoomResult<()> {
        match self.registry.find_room_of_user(username)? {
            Some(located) if located == room_id => Ok(()),
            _ => Err(RoomError::Unauthorized),
        }
    }

    fn broadcast_status(&self, room_id: &str) -> RoomResult<MenuStatus> {
        let status = view::build_menu_status(&self.registry, room_id)?;
        self.broadcaster.publish(
            &room_topic(room_id),
            &RoomEvent::MenuStatusUpdate {
                status: status.clone(),
            },
        );
        Ok(status)
    }

    /// Replace the caller's submitted menu set with `menus` (1..=4 after
    /// dedup). Entries the user dropped lose them as submitter; new ones
    /// gain them. Reports `next_state = Submitted` once every member has
    /// submitted.
    pub fn submit_menus(
        &self,
        username: &str,
        room_id: &str,
        menus: &[String],
    ) -> RoomResult<SubmitOutcome> {
        self.authorize(username, room_id)?;

        let mut distinct: Vec<String> = Vec::with_capacity(menus.len());
        for menu in menus {
            let menu = menu.trim();
            if !menu.is_empty() && !distinct.iter().any(|m| m == menu) {
                distinct.push(menu.to_string());
            }
        }
        if distinct.is_empty() {
            return Err(RoomError::InvalidSubmission(
                "at least one menu is required".to_string(),
            ));
        }
        if distinct.len() > MAX_MENUS_PER_USER {
            return Err(RoomError::InvalidSubmission(format!(
                "at most {MAX_MENUS_PER_USER} distinct menus may be submitted"
            )));
        }

        let details = self.registry.room_details_map(room_id)?;
        if details.is_empty() {
            return Err(RoomError::RoomNotFound(room_id.to_string()));
        }
        let state: RoomState = details
            .get(fields::STATE)
            .map(String::as_str)
            .unwrap_or("waiting")
            .parse()
            .map_err(RoomError::Inconsistency)?;
        if !state.accepts_submissions() {
            return Err(RoomError::InvalidState(state.to_string()));
        }

        let previous = self.registry.submitted_menus_of(room_id, username)?;
        for menu in previous.iter().filter(|m| !distinct.contains(m)) {
            self.registry
                .update_menu_vote(room_id, menu, VoteField::Submitters, username, false)?;
        }
        for menu in &distinct {
            self.registry
                .update_menu_vote(room_id, menu, VoteField::Submitters, username, true)?;
        }
        self.registry.set_submit_status(room_id, username, true)?;
        tracing::info!(room_id, username, menus = ?distinct, "menus submitted");

        let next_state = if self.registry.all_submitted(room_id)? {
            Some(RoomState::Submitted)
        } else {
            None
        };

        let status = self.broadcast_status(room_id)?;
        Ok(SubmitOutcome { status, next_state })
    }

    /// Spend one recommend credit on a menu. The decrement is conditional
    /// and atomic, so an exhausted quota mutates nothing.
    pub fn recommend_menu(
        &self,
        username: &str,
        room_id: &str,
        menu_key: &str,
    ) -> RoomResult<MenuStatus> {
        self.authorize(username, room_id)?;

        let Some(remaining) = self.registry.try_consume_quota(room_id, username)? else {
            return Err(RoomError::QuotaExhausted);
        };
        if let Err(e) =
            self.registry
                .update_menu_vote(room_id, menu_key, VoteField::Recommenders, username, true)
        {
            // The decrement already landed; give the credit back rather
            // than charging for a vote that was never recorded.
            if let Err(refund_err) = self.registry.refund_quota(room_id, username) {
                tracing::error!(
                    room_id, username, error = %refund_err,
                    "could not refund quota after failed recommend"
                );
            }
            return Err(e);
        }
        tracing::info!(room_id, username, menu_key, remaining, "menu recommended");

        self.broadcast_status(room_id)
    }

    /// A single dislike excludes a menu from the draw for the rest of the
    /// cycle. There is no un-dislike.
    pub fn dislike_menu(
        &self,
        username: &str,
        room_id: &str,
        menu_key: &str,
    ) -> RoomResult<MenuStatus> {
        self.authorize(username, room_id)?;

        self.registry
            .update_menu_vote(room_id, menu_key, VoteField::DislikedBy, username, true)?;
        self.registry.set_menu_excluded(room_id, menu_key)?;
        tracing::info!(room_id, username, menu_key, "menu disliked and excluded");

        self.broadcast_status(room_id)
    }

    /// Host-only: pick uniformly among the non-excluded submitted menus and
    /// move the room into result viewing. An empty candidate set is
    /// `NoDrawableMenus`; callers react by forcing the room back to input
    /// rather than treating it as fatal.
    pub fn start_draw(&self, username: &str, room_id: &str) -> RoomResult<DrawOutcome> {
        self.authorize(username, room_id)?;

        let details = self.registry.room_details_map(room_id)?;
        if details.is_empty() {
            return Err(RoomError::RoomNotFound(room_id.to_string()));
        }
        if details.get(fields::HOST).map(String::as_str) != Some(username) {
            return Err(RoomError::Unauthorized);
        }
        if !self.registry.all_submitted(room_id)? {
            return Err(RoomError::InvalidState(
                "not all members have submitted".to_string(),
            ));
        }
        let state: RoomState = details
            .get(fields::STATE)
            .map(String::as_str)
            .unwrap_or("waiting")
            .parse()
            .map_err(RoomError::Inconsistency)?;
        if !state.allows_draw() {
            return Err(RoomError::InvalidState(state.to_string()));
        }

        let mut candidates: Vec<String> = self
            .registry
            .menu_entries(room_id)?
            .into_iter()
            .filter(|(_, entry)| !entry.excluded)
            .map(|(key, _)| key)
            .collect();
        if candidates.is_empty() {
            return Err(RoomError::NoDrawableMenus);
        }
        candidates.sort();

        let selected_menu =
            candidates[rand::thread_rng().gen_range(0..candidates.len())].clone();
        let drawn_at = self.clock.now_millis();
        tracing::info!(room_id, selected_menu, "draw completed");

        self.states
            .begin_result_viewing(room_id, &selected_menu, drawn_at)?;
        Ok(DrawOutcome {
            selected_menu,
            drawn_at,
        })
    }

    /// Host-only full reset: wipes menu data, draw fields and statuses,
    /// restores quotas, and returns the room to the input phase.
    pub fn reset(&self, username: &str, room_id: &str) -> RoomResult<MenuStatus> {
        self.authorize(username, room_id)?;

        let details = self.registry.room_details_map(room_id)?;
        if details.is_empty() {
            return Err(RoomError::RoomNotFound(room_id.to_string()));
        }
        if details.get(fields::HOST).map(String::as_str) != Some(username) {
            return Err(RoomError::Unauthorized);
        }

        self.states.begin_input_phase(room_id)?;
        tracing::info!(room_id, host = username, "room reset");
        view::build_menu_status(&self.registry, room_id)
    }

    /// Current aggregate view without mutating anything.
    pub fn menu_status(&self, room_id: &str) -> RoomResult<MenuStatus> {
        view::build_menu_status(&self.registry, room_id)
    }
}
