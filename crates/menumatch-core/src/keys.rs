//! Store key layout. One hash per room for details / nicknames / menus /
//! submit status / quotas, one set per room for members, plus the global
//! active-room set and the global location and endpoint hashes.

/// Set of all live room ids.
pub const ACTIVE_ROOMS: &str = "rooms:active";

/// Global hash: username -> "ip:port".
pub const USER_ENDPOINTS: &str = "users:endpoint";

/// Field inside a [`user_location`] hash holding the room id.
pub const LOCATION_FIELD: &str = "room_id";

/// Per-user location record: which room the user is in, if any. Keyed per
/// user (not one global map) so create/join/leave can watch exactly one
/// user's location without contending across unrelated rooms.
pub fn user_location(username: &str) -> String {
    format!("user:{username}:location")
}

pub fn room_details(room_id: &str) -> String {
    format!("room:{room_id}:details")
}

pub fn room_members(room_id: &str) -> String {
    format!("room:{room_id}:members")
}

pub fn room_nicknames(room_id: &str) -> String {
    format!("room:{room_id}:nicknames")
}

pub fn room_menus(room_id: &str) -> String {
    format!("room:{room_id}:menus")
}

pub fn room_submit_status(room_id: &str) -> String {
    format!("room:{room_id}:submit_status")
}

pub fn room_quotas(room_id: &str) -> String {
    format!("room:{room_id}:quotas")
}

/// Every keyspace owned by a single room. Deleting these plus the
/// active-index entry erases the room completely.
pub fn all_room_keys(room_id: &str) -> Vec<String> {
    vec![
        room_details(room_id),
        room_members(room_id),
        room_nicknames(room_id),
        room_menus(room_id),
        room_submit_status(room_id),
        room_quotas(room_id),
    ]
}
