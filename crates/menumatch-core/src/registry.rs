//! Typed accessor layer over the store: room lifecycle keys, the global
//! location/endpoint maps, menu entries, submit statuses and quotas.
//!
//! Everything here is a plain (per-key atomic) operation. The multi-key
//! optimistic protocols live in the coordinator, which builds its own
//! watch/commit batches from [`crate::keys`] and [`crate::store::TxOp`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{RoomError, RoomResult};
use crate::keys;
use crate::room::{MenuEntry, RoomState, VoteField};
use crate::store::{KeyedStore, TxOp, TxOutcome};

/// Details-hash field names.
pub mod fields {
    pub const NAME: &str = "name";
    pub const HOST: &str = "host";
    pub const MAX_USERS: &str = "max_users";
    pub const STATE: &str = "state";
    pub const IS_PRIVATE: &str = "is_private";
    pub const PASSWORD: &str = "password";
    pub const CREATED_AT: &str = "created_at";
    pub const LAST_DRAW_RESULT: &str = "last_draw_result";
    pub const LAST_DRAW_AT: &str = "last_draw_at";
}

const MAX_ID_GENERATION_ATTEMPTS: u32 = 10;

/// Bounded internal retry for single-record read-modify-write updates
/// (menu entry JSON). Conflicts here are rare and invisible to callers.
const MAX_RECORD_UPDATE_ATTEMPTS: u32 = 5;

#[derive(Clone)]
pub struct RoomRegistry {
    store: Arc<dyn KeyedStore>,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyedStore> {
        &self.store
    }

    // -- User location & endpoints --

    pub fn find_room_of_user(&self, username: &str) -> RoomResult<Option<String>> {
        Ok(self
            .store
            .hash_get(&keys::user_location(username), keys::LOCATION_FIELD)?)
    }

    pub fn remove_user_location(&self, username: &str) -> RoomResult<()> {
        self.store.delete(&[keys::user_location(username)])?;
        Ok(())
    }

    pub fn save_user_endpoint(&self, username: &str, endpoint: &str) -> RoomResult<()> {
        self.store
            .hash_put(keys::USER_ENDPOINTS, username, endpoint)?;
        Ok(())
    }

    pub fn remove_user_endpoint(&self, username: &str) -> RoomResult<()> {
        self.store.hash_delete(keys::USER_ENDPOINTS, &[username])?;
        Ok(())
    }

    /// Endpoints for the given users; users with no recorded endpoint are
    /// absent from the result.
    pub fn user_endpoints(&self, usernames: &[String]) -> RoomResult<HashMap<String, String>> {
        if usernames.is_empty() {
            return Ok(HashMap::new());
        }
        let values = self.store.hash_multi_get(keys::USER_ENDPOINTS, usernames)?;
        Ok(usernames
            .iter()
            .zip(values)
            .filter_map(|(user, ep)| ep.map(|ep| (user.clone(), ep)))
            .collect())
    }

    // -- Nicknames --

    pub fn save_nickname(&self, room_id: &str, username: &str, nickname: &str) -> RoomResult<()> {
        self.store
            .hash_put(&keys::room_nicknames(room_id), username, nickname)?;
        tracing::debug!(room_id, username, nickname, "saved nickname");
        Ok(())
    }

    pub fn remove_nickname(&self, room_id: &str, username: &str) -> RoomResult<()> {
        self.store
            .hash_delete(&keys::room_nicknames(room_id), &[username])?;
        Ok(())
    }

    pub fn nicknames(&self, room_id: &str) -> RoomResult<HashMap<String, String>> {
        Ok(self.store.hash_get_all(&keys::room_nicknames(room_id))?)
    }

    // -- Room lifecycle --

    /// Produce a collision-checked room id. Exhausting the attempt bound is
    /// fatal and not retryable; with a 24-bit suffix per attempt it is
    /// effectively unreachable.
    pub fn generate_room_id(&self) -> RoomResult<String> {
        for attempt in 1..=MAX_ID_GENERATION_ATTEMPTS {
            let candidate = format!(
                "room-{}",
                &uuid::Uuid::new_v4().simple().to_string()[..6]
            );
            if !self.store.exists(&keys::room_details(&candidate))? {
                tracing::debug!(room_id = %candidate, attempt, "generated room id");
                return Ok(candidate);
            }
            tracing::warn!(
                candidate = %candidate,
                attempt,
                "room id collision, retrying generation"
            );
        }
        tracing::error!(
            attempts = MAX_ID_GENERATION_ATTEMPTS,
            "room id space exhausted"
        );
        Err(RoomError::IdSpaceExhausted(MAX_ID_GENERATION_ATTEMPTS))
    }

    pub fn active_room_ids(&self) -> RoomResult<HashSet<String>> {
        Ok(self.store.set_members(keys::ACTIVE_ROOMS)?)
    }

    pub fn remove_from_active(&self, room_id: &str) -> RoomResult<()> {
        self.store.set_remove(keys::ACTIVE_ROOMS, room_id)?;
        Ok(())
    }

    pub fn room_details_map(&self, room_id: &str) -> RoomResult<HashMap<String, String>> {
        Ok(self.store.hash_get_all(&keys::room_details(room_id))?)
    }

    pub fn bulk_details(
        &self,
        room_ids: &HashSet<String>,
    ) -> RoomResult<HashMap<String, HashMap<String, String>>> {
        let mut out = HashMap::with_capacity(room_ids.len());
        for id in room_ids {
            out.insert(id.clone(), self.room_details_map(id)?);
        }
        Ok(out)
    }

    pub fn bulk_members(
        &self,
        room_ids: &HashSet<String>,
    ) -> RoomResult<HashMap<String, HashSet<String>>> {
        let mut out = HashMap::with_capacity(room_ids.len());
        for id in room_ids {
            out.insert(id.clone(), self.members(id)?);
        }
        Ok(out)
    }

    pub fn members(&self, room_id: &str) -> RoomResult<HashSet<String>> {
        Ok(self.store.set_members(&keys::room_members(room_id))?)
    }

    pub fn member_count(&self, room_id: &str) -> RoomResult<usize> {
        Ok(self.store.set_len(&keys::room_members(room_id))?)
    }

    pub fn room_state(&self, room_id: &str) -> RoomResult<Option<RoomState>> {
        match self
            .store
            .hash_get(&keys::room_details(room_id), fields::STATE)?
        {
            None => Ok(None),
            Some(raw) => raw
                .parse::<RoomState>()
                .map(Some)
                .map_err(RoomError::Inconsistency),
        }
    }

    pub fn update_room_state(&self, room_id: &str, state: RoomState) -> RoomResult<()> {
        self.store
            .hash_put(&keys::room_details(room_id), fields::STATE, state.as_str())?;
        Ok(())
    }

    /// Remove every per-room keyspace. The active-index entry is removed
    /// separately so the caller controls ordering.
    pub fn delete_room(&self, room_id: &str) -> RoomResult<()> {
        self.store.delete(&keys::all_room_keys(room_id))?;
        tracing::info!(room_id, "deleted all room keyspaces");
        Ok(())
    }

    // -- Last draw --

    pub fn save_last_draw(&self, room_id: &str, menu_key: &str, at_millis: i64) -> RoomResult<()> {
        self.store.hash_put_all(
            &keys::room_details(room_id),
            &[
                (fields::LAST_DRAW_RESULT.to_string(), menu_key.to_string()),
                (fields::LAST_DRAW_AT.to_string(), at_millis.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn last_draw_at(&self, room_id: &str) -> RoomResult<Option<i64>> {
        match self
            .store
            .hash_get(&keys::room_details(room_id), fields::LAST_DRAW_AT)?
        {
            None => Ok(None),
            Some(raw) => raw.parse::<i64>().map(Some).map_err(|_| {
                RoomError::Inconsistency(format!(
                    "room '{room_id}' has a non-numeric last draw timestamp"
                ))
            }),
        }
    }

    pub fn clear_last_draw(&self, room_id: &str) -> RoomResult<()> {
        self.store.hash_delete(
            &keys::room_details(room_id),
            &[fields::LAST_DRAW_RESULT, fields::LAST_DRAW_AT],
        )?;
        Ok(())
    }

    // -- Menu entries --

    /// All menu entries of a room. Corrupt records are logged and skipped
    /// rather than failing the whole read.
    pub fn menu_entries(&self, room_id: &str) -> RoomResult<HashMap<String, MenuEntry>> {
        let raw = self.store.hash_get_all(&keys::room_menus(room_id))?;
        let mut out = HashMap::with_capacity(raw.len());
        for (menu_key, json) in raw {
            match serde_json::from_str::<MenuEntry>(&json) {
                Ok(entry) => {
                    out.insert(menu_key, entry);
                }
                Err(e) => {
                    tracing::error!(room_id, menu_key, error = %e, "corrupt menu entry, skipping");
                }
            }
        }
        Ok(out)
    }

    /// Menus the given user currently has submitted, sorted for stable output.
    pub fn submitted_menus_of(&self, room_id: &str, username: &str) -> RoomResult<Vec<String>> {
        let mut menus: Vec<String> = self
            .menu_entries(room_id)?
            .into_iter()
            .filter(|(_, entry)| entry.submitters.contains(username))
            .map(|(key, _)| key)
            .collect();
        menus.sort();
        Ok(menus)
    }

    /// Add or remove a user in one voter set of a menu entry, creating the
    /// entry lazily. Read-modify-write on a single record, made atomic with
    /// a bounded invisible compare-and-retry on the menus key.
    pub fn update_menu_vote(
        &self,
        room_id: &str,
        menu_key: &str,
        field: VoteField,
        username: &str,
        add: bool,
    ) -> RoomResult<()> {
        self.update_menu_entry(room_id, menu_key, |entry| {
            let set = field.set_of(entry);
            if add {
                set.insert(username.to_string());
            } else {
                set.remove(username);
            }
        })
    }

    /// Mark a menu excluded from the draw. Monotonic within a cycle: nothing
    /// ever clears it short of a full input-phase reset.
    pub fn set_menu_excluded(&self, room_id: &str, menu_key: &str) -> RoomResult<()> {
        self.update_menu_entry(room_id, menu_key, |entry| entry.excluded = true)
    }

    fn update_menu_entry(
        &self,
        room_id: &str,
        menu_key: &str,
        mutate: impl Fn(&mut MenuEntry),
    ) -> RoomResult<()> {
        let menus_key = keys::room_menus(room_id);
        for _ in 0..MAX_RECORD_UPDATE_ATTEMPTS {
            let token = self.store.watch(std::slice::from_ref(&menus_key))?;
            let mut entry = match self.store.hash_get(&menus_key, menu_key)? {
                Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                    tracing::error!(room_id, menu_key, error = %e, "corrupt menu entry, resetting");
                    MenuEntry::default()
                }),
                None => MenuEntry::default(),
            };
            mutate(&mut entry);
            let json = serde_json::to_string(&entry)
                .map_err(|e| RoomError::Unknown(format!("menu entry encode failed: {e}")))?;
            let outcome = self.store.commit_if_unchanged(
                token,
                vec![TxOp::HashPut {
                    key: menus_key.clone(),
                    field: menu_key.to_string(),
                    value: json,
                }],
            )?;
            if let TxOutcome::Applied(_) = outcome {
                return Ok(());
            }
        }
        tracing::warn!(room_id, menu_key, "menu entry update kept conflicting");
        Err(RoomError::WatchConflict)
    }

    pub fn clear_menus(&self, room_id: &str) -> RoomResult<()> {
        self.store.delete(&[keys::room_menus(room_id)])?;
        Ok(())
    }

    // -- Submit status --

    pub fn set_submit_status(
        &self,
        room_id: &str,
        username: &str,
        submitted: bool,
    ) -> RoomResult<()> {
        self.store.hash_put(
            &keys::room_submit_status(room_id),
            username,
            if submitted { "true" } else { "false" },
        )?;
        Ok(())
    }

    pub fn has_submitted(&self, room_id: &str, username: &str) -> RoomResult<bool> {
        Ok(self
            .store
            .hash_get(&keys::room_submit_status(room_id), username)?
            .map(|raw| raw == "true")
            .unwrap_or(false))
    }

    pub fn submit_status_map(&self, room_id: &str) -> RoomResult<HashMap<String, bool>> {
        Ok(self
            .store
            .hash_get_all(&keys::room_submit_status(room_id))?
            .into_iter()
            .map(|(user, raw)| (user, raw == "true"))
            .collect())
    }

    /// True when every current member has a true submit status. Members with
    /// no recorded status count as not submitted.
    pub fn all_submitted(&self, room_id: &str) -> RoomResult<bool> {
        let members = self.members(room_id)?;
        if members.is_empty() {
            return Ok(true);
        }
        let statuses = self.submit_status_map(room_id)?;
        Ok(members
            .iter()
            .all(|user| statuses.get(user).copied().unwrap_or(false)))
    }

    // -- Quotas --

    pub fn init_quota(&self, room_id: &str, username: &str, quota: i64) -> RoomResult<()> {
        self.store
            .hash_put(&keys::room_quotas(room_id), username, &quota.to_string())?;
        Ok(())
    }

    /// Atomically consume one recommend credit. `None` means the quota was
    /// already exhausted and nothing changed.
    pub fn try_consume_quota(&self, room_id: &str, username: &str) -> RoomResult<Option<i64>> {
        Ok(self
            .store
            .hash_decr_if_positive(&keys::room_quotas(room_id), username)?)
    }

    /// Return one recommend credit. Used when the recommend fails after its
    /// quota decrement already landed.
    pub fn refund_quota(&self, room_id: &str, username: &str) -> RoomResult<i64> {
        Ok(self
            .store
            .hash_incr(&keys::room_quotas(room_id), username, 1)?)
    }

    pub fn quota(&self, room_id: &str, username: &str) -> RoomResult<i64> {
        Ok(self
            .store
            .hash_get(&keys::room_quotas(room_id), username)?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn generated_ids_have_room_prefix() {
        let reg = registry();
        let id = reg.generate_room_id().unwrap();
        assert!(id.starts_with("room-"));
        assert_eq!(id.len(), "room-".len() + 6);
    }

    #[test]
    fn delete_room_wipes_every_keyspace() {
        let reg = registry();
        let store = reg.store().clone();
        store.set_add(&keys::room_members("r1"), "alice").unwrap();
        reg.save_nickname("r1", "alice", "Al").unwrap();
        reg.update_menu_vote("r1", "Pizza", VoteField::Submitters, "alice", true)
            .unwrap();
        reg.set_submit_status("r1", "alice", true).unwrap();
        reg.init_quota("r1", "alice", 4).unwrap();
        reg.update_room_state("r1", RoomState::Inputting).unwrap();

        reg.delete_room("r1").unwrap();
        for key in keys::all_room_keys("r1") {
            assert!(!store.exists(&key).unwrap(), "{key} should be gone");
        }
    }

    #[test]
    fn vote_updates_create_entries_lazily() {
        let reg = registry();
        reg.update_menu_vote("r1", "Pizza", VoteField::Recommenders, "bob", true)
            .unwrap();
        let entries = reg.menu_entries("r1").unwrap();
        assert!(entries["Pizza"].recommenders.contains("bob"));
        assert!(entries["Pizza"].submitters.is_empty());
    }

    #[test]
    fn submitted_menus_follow_the_submitters_set() {
        let reg = registry();
        reg.update_menu_vote("r1", "Pizza", VoteField::Submitters, "alice", true)
            .unwrap();
        reg.update_menu_vote("r1", "Sushi", VoteField::Submitters, "alice", true)
            .unwrap();
        reg.update_menu_vote("r1", "Sushi", VoteField::Submitters, "alice", false)
            .unwrap();
        assert_eq!(reg.submitted_menus_of("r1", "alice").unwrap(), vec!["Pizza"]);
    }

    #[test]
    fn all_submitted_defaults_missing_members_to_false() {
        let reg = registry();
        let store = reg.store().clone();
        store.set_add(&keys::room_members("r1"), "alice").unwrap();
        store.set_add(&keys::room_members("r1"), "bob").unwrap();
        reg.set_submit_status("r1", "alice", true).unwrap();
        assert!(!reg.all_submitted("r1").unwrap());
        reg.set_submit_status("r1", "bob", true).unwrap();
        assert!(reg.all_submitted("r1").unwrap());
    }

    #[test]
    fn excluded_is_preserved_across_vote_updates() {
        let reg = registry();
        reg.set_menu_excluded("r1", "Pizza").unwrap();
        reg.update_menu_vote("r1", "Pizza", VoteField::Recommenders, "bob", true)
            .unwrap();
        assert!(reg.menu_entries("r1").unwrap()["Pizza"].excluded);
    }
}
