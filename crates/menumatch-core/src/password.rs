//! Room password hashing. Room passcodes gate entry to an ephemeral lobby,
//! so a salted SHA-256 digest is stored rather than the plaintext; account
//! credentials are an external collaborator and never pass through here.

use sha2::{Digest, Sha256};

/// Hash a room password, salted with the room id so equal passwords in
/// different rooms store different digests.
pub fn hash_room_password(room_id: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(room_id.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex_encode(&hasher.finalize())
}

pub fn verify_room_password(room_id: &str, password: &str, stored_hash: &str) -> bool {
    hash_room_password(room_id, password) == stored_hash
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_matching_password() {
        let hash = hash_room_password("room-abc123", "hunter2");
        assert!(verify_room_password("room-abc123", "hunter2", &hash));
        assert!(!verify_room_password("room-abc123", "hunter3", &hash));
    }

    #[test]
    fn salt_differs_per_room() {
        assert_ne!(
            hash_room_password("room-a", "pw"),
            hash_room_password("room-b", "pw")
        );
    }
}
