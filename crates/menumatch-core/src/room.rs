use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Room lifecycle states.
///
/// `Waiting` is transient: it exists only between the creation commit and the
/// first input phase. Transitions: Waiting -> Inputting -> Submitted ->
/// ResultViewing, ResultViewing -> Inputting (reset or sweep), any state ->
/// room deleted (host or last member leaves).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    Waiting,
    Inputting,
    Submitted,
    ResultViewing,
}

impl RoomState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomState::Waiting => "waiting",
            RoomState::Inputting => "inputting",
            RoomState::Submitted => "submitted",
            RoomState::ResultViewing => "result_viewing",
        }
    }

    /// States in which menu submission is accepted.
    pub fn accepts_submissions(&self) -> bool {
        matches!(self, RoomState::Waiting | RoomState::Inputting)
    }

    /// States from which a draw may start.
    pub fn allows_draw(&self) -> bool {
        matches!(self, RoomState::Inputting | RoomState::Submitted)
    }
}

impl fmt::Display for RoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(RoomState::Waiting),
            "inputting" => Ok(RoomState::Inputting),
            "submitted" => Ok(RoomState::Submitted),
            "result_viewing" => Ok(RoomState::ResultViewing),
            other => Err(format!("unknown room state '{other}'")),
        }
    }
}

/// Derived per-member view: membership joined with nickname, endpoint and
/// submission status. Never stored, always recomputed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub username: String,
    pub nickname: String,
    pub endpoint: Option<String>,
    pub submitted_menu: bool,
}

/// Full room projection returned to callers and broadcast on state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomDetails {
    pub room_id: String,
    pub name: String,
    pub host_username: String,
    pub host_endpoint: Option<String>,
    pub max_users: u32,
    pub state: RoomState,
    pub is_private: bool,
    pub created_at: i64,
    pub last_draw_result: Option<String>,
    pub last_draw_at: Option<i64>,
    pub participants: Vec<Participant>,
}

/// Compact per-room line for the lobby listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: String,
    pub name: String,
    pub user_count: u32,
    pub max_users: u32,
    pub state: RoomState,
    pub is_private: bool,
}

/// Vote bookkeeping for one submitted menu, stored as a single JSON record
/// per (room, menuKey).
///
/// `excluded` is monotonic within a draw cycle: one dislike sets it, and only
/// a full input-phase reset clears it (by wiping the entry).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MenuEntry {
    #[serde(default)]
    pub submitters: BTreeSet<String>,
    #[serde(default)]
    pub recommenders: BTreeSet<String>,
    #[serde(default)]
    pub disliked_by: BTreeSet<String>,
    #[serde(default)]
    pub excluded: bool,
}

/// Which voter set of a [`MenuEntry`] an update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteField {
    Submitters,
    Recommenders,
    DislikedBy,
}

impl VoteField {
    pub fn set_of<'a>(&self, entry: &'a mut MenuEntry) -> &'a mut BTreeSet<String> {
        match self {
            VoteField::Submitters => &mut entry.submitters,
            VoteField::Recommenders => &mut entry.recommenders,
            VoteField::DislikedBy => &mut entry.disliked_by,
        }
    }
}

/// Externally visible slice of a menu entry: recommenders and dislikers only.
/// Submitters are intentionally omitted from the vote view.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MenuVotes {
    pub recommenders: BTreeSet<String>,
    pub disliked_by: BTreeSet<String>,
}

/// Aggregate menu status broadcast to a room after every ballot mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MenuStatus {
    /// Each current member's submitted menu list.
    pub submitted_menus_by_user: HashMap<String, Vec<String>>,
    /// Per-menu vote view.
    pub menu_votes: HashMap<String, MenuVotes>,
    /// Menu keys excluded from the draw.
    pub excluded_menu_keys: BTreeSet<String>,
    /// Submit status per current member, defaulted to false.
    pub user_submit_status: HashMap<String, bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_roundtrip() {
        for state in [
            RoomState::Waiting,
            RoomState::Inputting,
            RoomState::Submitted,
            RoomState::ResultViewing,
        ] {
            assert_eq!(state.as_str().parse::<RoomState>().unwrap(), state);
        }
        assert!("limbo".parse::<RoomState>().is_err());
    }

    #[test]
    fn menu_entry_json_is_lossless() {
        let mut entry = MenuEntry::default();
        entry.submitters.insert("alice".into());
        entry.recommenders.insert("bob".into());
        entry.disliked_by.insert("carol".into());
        entry.excluded = true;

        let json = serde_json::to_string(&entry).unwrap();
        let back: MenuEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn menu_entry_defaults_missing_fields() {
        let entry: MenuEntry = serde_json::from_str("{}").unwrap();
        assert!(entry.submitters.is_empty());
        assert!(!entry.excluded);
    }
}
