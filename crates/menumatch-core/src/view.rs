//! Projection builders: joins across the per-room keyspaces into the
//! `RoomDetails` and `MenuStatus` views callers and broadcasts consume.
//! Derived, never stored.

use crate::error::{RoomError, RoomResult};
use crate::registry::{fields, RoomRegistry};
use crate::room::{MenuStatus, MenuVotes, Participant, RoomDetails, RoomState, RoomSummary};

pub fn build_room_details(registry: &RoomRegistry, room_id: &str) -> RoomResult<RoomDetails> {
    let details = registry.room_details_map(room_id)?;
    if details.is_empty() {
        return Err(RoomError::RoomNotFound(room_id.to_string()));
    }
    build_room_details_from(registry, room_id, &details)
}

pub fn build_room_details_from(
    registry: &RoomRegistry,
    room_id: &str,
    details: &std::collections::HashMap<String, String>,
) -> RoomResult<RoomDetails> {
    let mut members: Vec<String> = registry.members(room_id)?.into_iter().collect();
    members.sort();

    let endpoints = registry.user_endpoints(&members)?;
    let nicknames = registry.nicknames(room_id)?;
    let statuses = registry.submit_status_map(room_id)?;

    let participants = members
        .iter()
        .map(|username| Participant {
            username: username.clone(),
            nickname: nicknames
                .get(username)
                .cloned()
                .unwrap_or_else(|| username.clone()),
            endpoint: endpoints.get(username).cloned(),
            submitted_menu: statuses.get(username).copied().unwrap_or(false),
        })
        .collect();

    let host_username = details.get(fields::HOST).cloned().unwrap_or_default();
    let state = details
        .get(fields::STATE)
        .map(String::as_str)
        .unwrap_or("waiting")
        .parse::<RoomState>()
        .map_err(RoomError::Inconsistency)?;

    Ok(RoomDetails {
        room_id: room_id.to_string(),
        name: details.get(fields::NAME).cloned().unwrap_or_default(),
        host_endpoint: endpoints.get(&host_username).cloned(),
        host_username,
        max_users: parse_max_users(room_id, details.get(fields::MAX_USERS))?,
        state,
        is_private: details
            .get(fields::IS_PRIVATE)
            .map(|raw| raw == "true")
            .unwrap_or(false),
        created_at: details
            .get(fields::CREATED_AT)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0),
        last_draw_result: details.get(fields::LAST_DRAW_RESULT).cloned(),
        last_draw_at: details
            .get(fields::LAST_DRAW_AT)
            .and_then(|raw| raw.parse().ok()),
        participants,
    })
}

/// A missing or non-numeric `max_users` field is drift, never a
/// zero-capacity room.
pub fn parse_max_users(room_id: &str, raw: Option<&String>) -> RoomResult<u32> {
    raw.and_then(|raw| raw.parse().ok()).ok_or_else(|| {
        RoomError::Inconsistency(format!(
            "room '{room_id}' has a missing or non-numeric max_users"
        ))
    })
}

pub fn build_room_summary(
    room_id: &str,
    details: &std::collections::HashMap<String, String>,
    user_count: usize,
) -> RoomResult<RoomSummary> {
    Ok(RoomSummary {
        room_id: room_id.to_string(),
        name: details.get(fields::NAME).cloned().unwrap_or_default(),
        user_count: user_count as u32,
        max_users: parse_max_users(room_id, details.get(fields::MAX_USERS))?,
        state: details
            .get(fields::STATE)
            .map(String::as_str)
            .unwrap_or("waiting")
            .parse::<RoomState>()
            .map_err(RoomError::Inconsistency)?,
        is_private: details
            .get(fields::IS_PRIVATE)
            .map(|raw| raw == "true")
            .unwrap_or(false),
    })
}

pub fn build_menu_status(registry: &RoomRegistry, room_id: &str) -> RoomResult<MenuStatus> {
    let members = registry.members(room_id)?;
    let entries = registry.menu_entries(room_id)?;
    let recorded = registry.submit_status_map(room_id)?;

    let mut status = MenuStatus::default();

    for username in &members {
        let mut menus: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.submitters.contains(username))
            .map(|(key, _)| key.clone())
            .collect();
        menus.sort();
        status.submitted_menus_by_user.insert(username.clone(), menus);
        status
            .user_submit_status
            .insert(username.clone(), recorded.get(username).copied().unwrap_or(false));
    }

    for (menu_key, entry) in entries {
        if entry.excluded {
            status.excluded_menu_keys.insert(menu_key.clone());
        }
        status.menu_votes.insert(
            menu_key,
            MenuVotes {
                recommenders: entry.recommenders,
                disliked_by: entry.disliked_by,
            },
        );
    }

    Ok(status)
}
