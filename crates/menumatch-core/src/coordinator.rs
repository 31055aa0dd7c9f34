//! Room create/join/leave protocols over the store's optimistic
//! transactions, plus the lobby listing.
//!
//! No in-process locks: every protocol watches the keys its preconditions
//! depend on, re-checks them inside the watch, and commits a single batch.
//! Preconditions checked before the watch are advisory only.

use std::sync::Arc;
use std::time::Duration;

use crate::broadcast::{room_topic, Broadcaster, RoomEvent};
use crate::clock::Clock;
use crate::error::{RoomError, RoomResult};
use crate::keys;
use crate::password;
use crate::registry::{fields, RoomRegistry};
use crate::room::{RoomDetails, RoomState, RoomSummary};
use crate::states::{RoomStateOps, RECOMMEND_QUOTA};
use crate::store::{TxOp, TxOutcome, TxReply};
use crate::view;

const MAX_JOIN_ATTEMPTS: u32 = 3;
const JOIN_BACKOFF_INITIAL: Duration = Duration::from_millis(50);

pub const MIN_ROOM_USERS: u32 = 2;
pub const MAX_ROOM_USERS: u32 = 10;

#[derive(Debug, Clone)]
pub struct CreateRoomParams {
    pub name: String,
    pub max_users: u32,
    pub is_private: bool,
    pub password: Option<String>,
}

/// What happened when a user left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The user was not in any room; stray endpoint data was cleaned up.
    NotInRoom,
    /// The user left; the room lives on.
    Left { room_id: String },
    /// The user was the host or the last member; the room was erased.
    RoomClosed { room_id: String },
}

pub struct RoomCoordinator {
    registry: RoomRegistry,
    states: RoomStateOps,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
}

impl RoomCoordinator {
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

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Whether `username` is currently located in `room_id`. Every ballot
    /// operation authorizes against this, independent of upstream auth.
    pub fn is_user_in_room(&self, username: &str, room_id: &str) -> RoomResult<bool> {
        Ok(self.registry.find_room_of_user(username)?.as_deref() == Some(room_id))
    }

    // -- Create --

    /// Create a room with the caller as host.
    ///
    /// The host's location key is watched; a conflict means another actor
    /// moved this user mid-create, and the caller observes `WatchConflict`
    /// rather than an internal retry -- failing closed here avoids
    /// double-room creation races.
    pub fn create_room(
        &self,
        host: &str,
        params: CreateRoomParams,
        endpoint: &str,
        nickname: &str,
    ) -> RoomResult<RoomDetails> {
        let room_id = self.registry.generate_room_id()?;
        let max_users = params.max_users.clamp(MIN_ROOM_USERS, MAX_ROOM_USERS);

        let password_hash = match (&params.password, params.is_private) {
            (Some(pw), true) if !pw.is_empty() => {
                Some(password::hash_room_password(&room_id, pw))
            }
            _ => None,
        };

        let location_key = keys::user_location(host);
        let store = self.registry.store();
        let token = store.watch(std::slice::from_ref(&location_key))?;
        if let Some(existing) = self.registry.find_room_of_user(host)? {
            return Err(RoomError::AlreadyInOtherRoom(existing));
        }

        let mut details = vec![
            (fields::NAME.to_string(), params.name.clone()),
            (fields::HOST.to_string(), host.to_string()),
            (fields::MAX_USERS.to_string(), max_users.to_string()),
            (fields::STATE.to_string(), RoomState::Waiting.as_str().to_string()),
            (
                fields::IS_PRIVATE.to_string(),
                params.is_private.to_string(),
            ),
            (
                fields::CREATED_AT.to_string(),
                self.clock.now_millis().to_string(),
            ),
        ];
        if let Some(hash) = password_hash {
            details.push((fields::PASSWORD.to_string(), hash));
        }

        let ops = vec![
            TxOp::HashPutAll {
                key: keys::room_details(&room_id),
                entries: details,
            },
            TxOp::SetAdd {
                key: keys::ACTIVE_ROOMS.to_string(),
                member: room_id.clone(),
            },
            TxOp::SetAdd {
                key: keys::room_members(&room_id),
                member: host.to_string(),
            },
            TxOp::HashPut {
                key: location_key,
                field: keys::LOCATION_FIELD.to_string(),
                value: room_id.clone(),
            },
            TxOp::HashPut {
                key: keys::USER_ENDPOINTS.to_string(),
                field: host.to_string(),
                value: endpoint.to_string(),
            },
            TxOp::HashPut {
                key: keys::room_nicknames(&room_id),
                field: host.to_string(),
                value: nickname.to_string(),
            },
        ];

        match store.commit_if_unchanged(token, ops)? {
            TxOutcome::Conflict => {
                tracing::warn!(host, "create conflicted on the host's location key");
                Err(RoomError::WatchConflict)
            }
            TxOutcome::Applied(_) => {
                tracing::info!(
                    room_id,
                    name = %params.name,
                    host,
                    max_users,
                    is_private = params.is_private,
                    "room created"
                );
                // Waiting is transient: begin the first input phase at once.
                // This also initializes the host's quota and broadcasts the
                // state change.
                self.states.begin_input_phase(&room_id)?;
                let details = view::build_room_details(&self.registry, &room_id)?;
                self.broadcaster.publish(
                    &room_topic(&room_id),
                    &RoomEvent::ParticipantUpdate {
                        participants: details.participants.clone(),
                    },
                );
                Ok(details)
            }
        }
    }

    // -- Join --

    /// Join an existing room.
    ///
    /// Pre-watch checks (location, existence, password) are advisory; room
    /// existence, membership and capacity are re-checked inside the watch.
    /// Conflicts retry up to 3 times with doubling backoff, then surface
    /// `WatchConflict` -- still retryable at a higher level.
    pub async fn join_room(
        &self,
        username: &str,
        room_id: &str,
        provided_password: Option<&str>,
        endpoint: &str,
        nickname: &str,
    ) -> RoomResult<RoomDetails> {
        if let Some(existing) = self.registry.find_room_of_user(username)? {
            return Err(RoomError::AlreadyInOtherRoom(existing));
        }

        let details = self.registry.room_details_map(room_id)?;
        if details.is_empty() {
            return Err(RoomError::RoomNotFound(room_id.to_string()));
        }
        if details.get(fields::IS_PRIVATE).map(String::as_str) == Some("true") {
            let stored = details
                .get(fields::PASSWORD)
                .ok_or_else(|| {
                    RoomError::Inconsistency(format!(
                        "private room '{room_id}' has no stored password hash"
                    ))
                })?;
            match provided_password {
                Some(pw) if password::verify_room_password(room_id, pw, stored) => {}
                _ => return Err(RoomError::BadPassword),
            }
        }

        let details_key = keys::room_details(room_id);
        let members_key = keys::room_members(room_id);
        let location_key = keys::user_location(username);
        let store = self.registry.store();

        let mut backoff = JOIN_BACKOFF_INITIAL;
        let mut was_waiting = false;
        let mut attempt = 1;
        loop {
            let token = store.watch(&[
                details_key.clone(),
                members_key.clone(),
                location_key.clone(),
            ])?;

            let details = store.hash_get_all(&details_key)?;
            if details.is_empty() {
                return Err(RoomError::RoomNotFound(room_id.to_string()));
            }
            if let Some(existing) = self.registry.find_room_of_user(username)? {
                // Lost a race against a concurrent create/join by this user.
                return Err(RoomError::AlreadyInOtherRoom(existing));
            }
            if store.set_contains(&members_key, username)? {
                return Err(RoomError::AlreadyInRoom);
            }
            let count = store.set_len(&members_key)?;
            let max_users = view::parse_max_users(room_id, details.get(fields::MAX_USERS))?;
            if count as u32 >= max_users {
                return Err(RoomError::RoomFull);
            }
            was_waiting = details.get(fields::STATE).map(String::as_str)
                == Some(RoomState::Waiting.as_str());

            let ops = vec![
                TxOp::SetAdd {
                    key: members_key.clone(),
                    member: username.to_string(),
                },
                TxOp::HashPut {
                    key: location_key.clone(),
                    field: keys::LOCATION_FIELD.to_string(),
                    value: room_id.to_string(),
                },
                TxOp::HashPut {
                    key: keys::USER_ENDPOINTS.to_string(),
                    field: username.to_string(),
                    value: endpoint.to_string(),
                },
            ];

            match store.commit_if_unchanged(token, ops)? {
                TxOutcome::Applied(_) => break,
                TxOutcome::Conflict => {
                    tracing::warn!(
                        room_id,
                        username,
                        attempt,
                        max_attempts = MAX_JOIN_ATTEMPTS,
                        "join conflicted, backing off"
                    );
                    if attempt >= MAX_JOIN_ATTEMPTS {
                        return Err(RoomError::WatchConflict);
                    }
                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }

        // Display-only data lands outside the transaction: eventually
        // consistent relative to membership is acceptable here.
        self.registry.save_nickname(room_id, username, nickname)?;
        self.registry
            .init_quota(room_id, username, RECOMMEND_QUOTA)?;
        tracing::info!(room_id, username, endpoint, "user joined room");

        let details = view::build_room_details(&self.registry, room_id)?;
        self.broadcaster.publish(
            &room_topic(room_id),
            &RoomEvent::ParticipantUpdate {
                participants: details.participants.clone(),
            },
        );

        if was_waiting {
            self.states.begin_input_phase(room_id)?;
            return view::build_room_details(&self.registry, room_id);
        }
        Ok(details)
    }

    // -- Leave --

    /// Leave whatever room the user is in. Idempotent when the user is in no
    /// room. The "last member / host" decision is read inside the commit;
    /// the destructive keyspace deletion deliberately happens outside it,
    /// because deletion is not safe to re-issue blindly under conflict
    /// whereas membership removal is.
    pub fn leave_room(&self, username: &str) -> RoomResult<LeaveOutcome> {
        let Some(room_id) = self.registry.find_room_of_user(username)? else {
            tracing::debug!(username, "leave with no location, cleaning stray endpoint");
            self.registry.remove_user_endpoint(username)?;
            return Ok(LeaveOutcome::NotInRoom);
        };

        let details_key = keys::room_details(&room_id);
        let members_key = keys::room_members(&room_id);
        let store = self.registry.store();

        let token = store.watch(&[details_key.clone(), members_key.clone()])?;

        if !store.exists(&details_key)? {
            let msg = format!(
                "user '{username}' location points to non-existent room '{room_id}'"
            );
            tracing::error!("{msg}");
            self.cleanup_after_inconsistency(username, &room_id);
            return Err(RoomError::Inconsistency(msg));
        }
        if !store.set_contains(&members_key, username)? {
            let msg = format!(
                "user '{username}' located in room '{room_id}' but absent from its member set"
            );
            tracing::error!("{msg}");
            self.cleanup_after_inconsistency(username, &room_id);
            return Err(RoomError::Inconsistency(msg));
        }
        let host = store.hash_get(&details_key, fields::HOST)?.unwrap_or_default();

        let ops = vec![
            TxOp::Delete {
                keys: vec![keys::user_location(username)],
            },
            TxOp::HashDelete {
                key: keys::USER_ENDPOINTS.to_string(),
                fields: vec![username.to_string()],
            },
            TxOp::HashDelete {
                key: keys::room_nicknames(&room_id),
                fields: vec![username.to_string()],
            },
            TxOp::SetRemove {
                key: members_key.clone(),
                member: username.to_string(),
            },
            TxOp::SetLen {
                key: members_key.clone(),
            },
        ];

        let replies = match store.commit_if_unchanged(token, ops)? {
            TxOutcome::Conflict => {
                // Cheap and safe for the caller to try again.
                tracing::warn!(room_id, username, "leave conflicted");
                return Err(RoomError::WatchConflict);
            }
            TxOutcome::Applied(replies) => replies,
        };

        let remaining = match replies.last() {
            Some(TxReply::Len(n)) => *n,
            _ => {
                return Err(RoomError::Unknown(
                    "leave commit returned no member count".to_string(),
                ))
            }
        };

        if username == host || remaining == 0 {
            tracing::info!(room_id, username, "host or last member left, closing room");
            self.registry.delete_room(&room_id)?;
            self.registry.remove_from_active(&room_id)?;
            self.broadcaster.publish(
                &room_topic(&room_id),
                &RoomEvent::RoomClosed {
                    closed_by: username.to_string(),
                },
            );
            Ok(LeaveOutcome::RoomClosed { room_id })
        } else {
            tracing::info!(room_id, username, remaining, "user left room");
            let details = view::build_room_details(&self.registry, &room_id)?;
            self.broadcaster.publish(
                &room_topic(&room_id),
                &RoomEvent::ParticipantUpdate {
                    participants: details.participants,
                },
            );
            Ok(LeaveOutcome::Left { room_id })
        }
    }

    /// Best-effort repair when location and membership disagree: clear the
    /// user's location, endpoint and nickname so the system converges, then
    /// let the caller see the error anyway.
    fn cleanup_after_inconsistency(&self, username: &str, room_id: &str) {
        tracing::warn!(username, room_id, "manual cleanup after inconsistency");
        if let Err(e) = self.registry.remove_user_location(username) {
            tracing::error!(username, error = %e, "cleanup: location removal failed");
        }
        if let Err(e) = self.registry.remove_user_endpoint(username) {
            tracing::error!(username, error = %e, "cleanup: endpoint removal failed");
        }
        if let Err(e) = self.registry.remove_nickname(room_id, username) {
            tracing::error!(username, error = %e, "cleanup: nickname removal failed");
        }
    }

    // -- Lobby --

    /// All active rooms. An id in the active index whose details are gone is
    /// an inconsistency: it is evicted from the index instead of failing the
    /// listing.
    pub fn list_rooms(&self) -> RoomResult<Vec<RoomSummary>> {
        let ids = self.registry.active_room_ids()?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let all_details = self.registry.bulk_details(&ids)?;
        let all_members = self.registry.bulk_members(&ids)?;

        let mut rooms = Vec::with_capacity(ids.len());
        for id in &ids {
            let details = all_details.get(id);
            match details {
                Some(details) if !details.is_empty() => {
                    let count = all_members.get(id).map(|m| m.len()).unwrap_or(0);
                    match view::build_room_summary(id, details, count) {
                        Ok(summary) => rooms.push(summary),
                        Err(e) => {
                            tracing::warn!(room_id = %id, error = %e, "skipping unreadable room")
                        }
                    }
                }
                _ => {
                    tracing::warn!(room_id = %id, "active room without details, evicting");
                    self.registry.remove_from_active(id)?;
                }
            }
        }
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        Ok(rooms)
    }

    /// Details for one room, or `None` (plus index eviction) if it is gone.
    pub fn get_room_details(&self, room_id: &str) -> RoomResult<Option<RoomDetails>> {
        let details = self.registry.room_details_map(room_id)?;
        if details.is_empty() {
            self.registry.remove_from_active(room_id)?;
            return Ok(None);
        }
        view::build_room_details_from(&self.registry, room_id, &details).map(Some)
    }

    /// Disconnect handling: leave the room, downgrading errors to logs.
    pub fn handle_disconnect(&self, username: &str) {
        match self.leave_room(username) {
            Ok(outcome) => {
                tracing::debug!(username, ?outcome, "disconnect handled");
            }
            Err(e) => {
                tracing::warn!(username, error = %e, "error while leaving on disconnect");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::RecordingBroadcaster;
    use crate::clock::ManualClock;
    use crate::memory_store::MemoryStore;

    fn harness() -> (Arc<RoomCoordinator>, Arc<RecordingBroadcaster>) {
        let store = Arc::new(MemoryStore::new());
        let broadcaster = Arc::new(RecordingBroadcaster::new());
        let registry = RoomRegistry::new(store);
        let states = RoomStateOps::new(registry.clone(), broadcaster.clone());
        let clock = ManualClock::new(1_000_000);
        let coordinator = Arc::new(RoomCoordinator::new(
            registry,
            states,
            broadcaster.clone(),
            clock,
        ));
        (coordinator, broadcaster)
    }

    fn params(name: &str, max_users: u32) -> CreateRoomParams {
        CreateRoomParams {
            name: name.to_string(),
            max_users,
            is_private: false,
            password: None,
        }
    }

    #[test]
    fn create_room_enters_input_phase() {
        let (coord, _) = harness();
        let details = coord
            .create_room("alice", params("lunch", 4), "10.0.0.1:4000", "Al")
            .unwrap();
        assert_eq!(details.state, RoomState::Inputting);
        assert_eq!(details.host_username, "alice");
        assert_eq!(details.participants.len(), 1);
        assert_eq!(details.participants[0].nickname, "Al");
        assert_eq!(
            coord.registry().find_room_of_user("alice").unwrap(),
            Some(details.room_id.clone())
        );
        // Host quota is ready before any recommend.
        assert_eq!(coord.registry().quota(&details.room_id, "alice").unwrap(), 4);
    }

    #[test]
    fn max_users_is_clamped() {
        let (coord, _) = harness();
        let details = coord
            .create_room("alice", params("big", 50), "10.0.0.1:4000", "Al")
            .unwrap();
        assert_eq!(details.max_users, MAX_ROOM_USERS);
        let details = coord
            .create_room("bob", params("small", 0), "10.0.0.2:4000", "Bo")
            .unwrap();
        assert_eq!(details.max_users, MIN_ROOM_USERS);
    }

    #[test]
    fn create_twice_is_rejected() {
        let (coord, _) = harness();
        coord
            .create_room("alice", params("one", 4), "10.0.0.1:4000", "Al")
            .unwrap();
        let err = coord
            .create_room("alice", params("two", 4), "10.0.0.1:4000", "Al")
            .unwrap_err();
        assert!(matches!(err, RoomError::AlreadyInOtherRoom(_)));
    }

    #[tokio::test]
    async fn join_and_leave_roundtrip() {
        let (coord, _) = harness();
        let room = coord
            .create_room("alice", params("lunch", 4), "10.0.0.1:4000", "Al")
            .unwrap();

        let details = coord
            .join_room("bob", &room.room_id, None, "10.0.0.2:4000", "Bo")
            .await
            .unwrap();
        assert_eq!(details.participants.len(), 2);
        assert_eq!(
            coord.registry().find_room_of_user("bob").unwrap(),
            Some(room.room_id.clone())
        );

        let outcome = coord.leave_room("bob").unwrap();
        assert_eq!(
            outcome,
            LeaveOutcome::Left {
                room_id: room.room_id.clone()
            }
        );
        assert_eq!(coord.registry().find_room_of_user("bob").unwrap(), None);
        assert_eq!(coord.registry().member_count(&room.room_id).unwrap(), 1);
    }

    #[tokio::test]
    async fn join_missing_room_fails() {
        let (coord, _) = harness();
        let err = coord
            .join_room("bob", "room-nope00", None, "10.0.0.2:4000", "Bo")
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn private_room_requires_matching_password() {
        let (coord, _) = harness();
        let room = coord
            .create_room(
                "alice",
                CreateRoomParams {
                    name: "secret".into(),
                    max_users: 4,
                    is_private: true,
                    password: Some("kimchi".into()),
                },
                "10.0.0.1:4000",
                "Al",
            )
            .unwrap();
        assert!(room.is_private);

        let err = coord
            .join_room("bob", &room.room_id, Some("wrong"), "10.0.0.2:4000", "Bo")
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::BadPassword));
        let err = coord
            .join_room("bob", &room.room_id, None, "10.0.0.2:4000", "Bo")
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::BadPassword));

        coord
            .join_room("bob", &room.room_id, Some("kimchi"), "10.0.0.2:4000", "Bo")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn join_own_room_is_already_in_other_room() {
        let (coord, _) = harness();
        let room = coord
            .create_room("alice", params("lunch", 4), "10.0.0.1:4000", "Al")
            .unwrap();
        let err = coord
            .join_room("alice", &room.room_id, None, "10.0.0.1:4000", "Al")
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::AlreadyInOtherRoom(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn capacity_is_never_exceeded_under_concurrent_joins() {
        let (coord, _) = harness();
        let room = coord
            .create_room("host", params("tight", 2), "10.0.0.1:4000", "H")
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let coord = coord.clone();
            let room_id = room.room_id.clone();
            handles.push(tokio::spawn(async move {
                let user = format!("user{i}");
                coord
                    .join_room(&user, &room_id, None, "10.0.0.9:4000", &user)
                    .await
            }));
        }

        let mut successes = 0;
        let mut full = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(RoomError::RoomFull) => full += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        // Host occupies one of two seats: exactly one join can win.
        assert_eq!(successes, 1);
        assert_eq!(full, 3);
        assert_eq!(coord.registry().member_count(&room.room_id).unwrap(), 2);
    }

    #[tokio::test]
    async fn corrupt_max_users_is_an_inconsistency_not_a_full_room() {
        let (coord, _) = harness();
        let room = coord
            .create_room("alice", params("lunch", 4), "10.0.0.1:4000", "Al")
            .unwrap();
        coord
            .registry()
            .store()
            .hash_put(&keys::room_details(&room.room_id), fields::MAX_USERS, "lots")
            .unwrap();

        let err = coord
            .join_room("bob", &room.room_id, None, "10.0.0.2:4000", "Bo")
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::Inconsistency(_)));
    }

    #[tokio::test]
    async fn host_leaving_erases_the_room() {
        let (coord, broadcaster) = harness();
        let room = coord
            .create_room("alice", params("lunch", 4), "10.0.0.1:4000", "Al")
            .unwrap();
        coord
            .join_room("bob", &room.room_id, None, "10.0.0.2:4000", "Bo")
            .await
            .unwrap();

        let outcome = coord.leave_room("alice").unwrap();
        assert_eq!(
            outcome,
            LeaveOutcome::RoomClosed {
                room_id: room.room_id.clone()
            }
        );
        assert!(coord
            .registry()
            .active_room_ids()
            .unwrap()
            .is_empty());
        for key in keys::all_room_keys(&room.room_id) {
            assert!(!coord.registry().store().exists(&key).unwrap());
        }
        assert!(broadcaster
            .events()
            .iter()
            .any(|(_, e)| matches!(e, RoomEvent::RoomClosed { closed_by } if closed_by == "alice")));
        // Bob's membership went with the room, but his location record did
        // not -- that dangling entry is detected as an inconsistency and
        // self-healed on his next leave.
        let err = coord.leave_room("bob").unwrap_err();
        assert!(matches!(err, RoomError::Inconsistency(_)));
        assert_eq!(coord.registry().find_room_of_user("bob").unwrap(), None);
        assert_eq!(coord.leave_room("bob").unwrap(), LeaveOutcome::NotInRoom);
    }

    #[tokio::test]
    async fn last_member_leaving_erases_the_room() {
        let (coord, _) = harness();
        let room = coord
            .create_room("alice", params("lunch", 4), "10.0.0.1:4000", "Al")
            .unwrap();
        coord
            .join_room("bob", &room.room_id, None, "10.0.0.2:4000", "Bo")
            .await
            .unwrap();

        // Drop the host from membership behind the coordinator's back so bob
        // becomes the last member; his departure must take the count-zero
        // close path even though he is not host.
        coord
            .registry()
            .store()
            .set_remove(&keys::room_members(&room.room_id), "alice")
            .unwrap();
        coord.registry().remove_user_location("alice").unwrap();

        let outcome = coord.leave_room("bob").unwrap();
        assert_eq!(
            outcome,
            LeaveOutcome::RoomClosed {
                room_id: room.room_id.clone()
            }
        );
        assert!(coord.registry().room_details_map(&room.room_id).unwrap().is_empty());
    }

    #[test]
    fn leave_when_not_in_a_room_is_a_noop() {
        let (coord, _) = harness();
        assert_eq!(coord.leave_room("ghost").unwrap(), LeaveOutcome::NotInRoom);
    }

    #[tokio::test]
    async fn listing_evicts_rooms_without_details() {
        let (coord, _) = harness();
        let room = coord
            .create_room("alice", params("lunch", 4), "10.0.0.1:4000", "Al")
            .unwrap();
        // Simulate drift: details vanish but the index entry stays.
        coord
            .registry()
            .store()
            .delete(&[keys::room_details(&room.room_id)])
            .unwrap();

        let rooms = coord.list_rooms().unwrap();
        assert!(rooms.is_empty());
        assert!(coord.registry().active_room_ids().unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_shows_live_rooms() {
        let (coord, _) = harness();
        let a = coord
            .create_room("alice", params("a", 4), "10.0.0.1:4000", "Al")
            .unwrap();
        let b = coord
            .create_room("bob", params("b", 6), "10.0.0.2:4000", "Bo")
            .unwrap();

        let mut rooms = coord.list_rooms().unwrap();
        rooms.sort_by(|x, y| x.name.cmp(&y.name));
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].room_id, a.room_id);
        assert_eq!(rooms[0].user_count, 1);
        assert_eq!(rooms[1].room_id, b.room_id);
        assert_eq!(rooms[1].max_users, 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn one_user_cannot_end_up_in_two_rooms() {
        let (coord, _) = harness();
        let target = coord
            .create_room("host", params("target", 6), "10.0.0.1:4000", "H")
            .unwrap();

        // The same user races a join against a create, many rounds.
        for round in 0..20 {
            let user = format!("racer{round}");
            let join = {
                let coord = coord.clone();
                let room_id = target.room_id.clone();
                let user = user.clone();
                tokio::spawn(async move {
                    coord
                        .join_room(&user, &room_id, None, "10.0.0.5:4000", &user)
                        .await
                        .is_ok()
                })
            };
            let create = {
                let coord = coord.clone();
                let user = user.clone();
                tokio::spawn(async move {
                    coord
                        .create_room(&user, params("own", 4), "10.0.0.5:4000", &user)
                        .is_ok()
                })
            };
            let (joined, created) = (join.await.unwrap(), create.await.unwrap());
            assert!(
                !(joined && created),
                "user {user} is in two rooms at once"
            );

            // Membership and location must agree whichever side won.
            let location = coord.registry().find_room_of_user(&user).unwrap();
            match location {
                Some(room_id) => {
                    assert!(coord
                        .registry()
                        .members(&room_id)
                        .unwrap()
                        .contains(&user));
                }
                None => assert!(!joined && !created),
            }
            // Clean up for the next round.
            coord.handle_disconnect(&user);
        }
    }
}
