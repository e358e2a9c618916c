//! Time-based Range Key Codec
//!
//! News rows within a topic are sorted by a composite binary range key:
//!
//! ```text
//! ┌────────────────────────────┬──────────────────────────────┐
//! │ epoch seconds (8 bytes,    │ xxh64(user_id) (8 bytes,     │
//! │ big-endian)                │ native-endian)               │
//! └────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! The big-endian time prefix is what makes the scheme work: lexicographic
//! byte ordering of keys equals chronological ordering of their timestamps,
//! so a plain range scan walks news in posting order. The hash suffix keeps
//! two users posting in the same second from colliding on the key.
//!
//! An empty user id hashes to all zeroes, which sorts first among keys with
//! the same time prefix. `make_range_key(t, "")` is therefore the canonical
//! lower bound of every key with time >= t.

use xxhash_rust::xxh64::xxh64;

/// Length of the composite key: time prefix plus hash suffix.
pub const RANGE_KEY_LEN: usize = 16;

/// Build the range key for a news row posted by `user_id` at `epoch_secs`.
pub fn make_range_key(epoch_secs: i64, user_id: &str) -> [u8; RANGE_KEY_LEN] {
    let mut key = [0u8; RANGE_KEY_LEN];
    key[..8].copy_from_slice(&epoch_secs.to_be_bytes());

    if !user_id.is_empty() {
        let hash = xxh64(user_id.as_bytes(), 0);
        key[8..].copy_from_slice(&hash.to_ne_bytes());
    }

    key
}

/// Decode the time prefix of a range key.
///
/// The caller is responsible for handing in at least the 8-byte prefix.
pub fn time_from_range_key(key: &[u8]) -> i64 {
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&key[..8]);
    i64::from_be_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for t in [0, 1, 60, 1_700_000_000, i64::MAX] {
            let key = make_range_key(t, "alice");
            assert_eq!(time_from_range_key(&key), t);
        }
    }

    #[test]
    fn test_chronological_order_is_lexicographic() {
        // Later timestamps must sort after earlier ones regardless of which
        // user posted.
        let earlier = make_range_key(1_700_000_000, "zzz-last-user");
        let later = make_range_key(1_700_000_001, "aaa-first-user");
        assert!(earlier < later);

        let much_later = make_range_key(1_800_000_000, "");
        assert!(later < much_later);
    }

    #[test]
    fn test_empty_user_is_lower_bound_for_its_second() {
        let bound = make_range_key(1_700_000_000, "");
        assert_eq!(&bound[8..], &[0u8; 8]);

        for user in ["alice", "bob", "carol"] {
            let key = make_range_key(1_700_000_000, user);
            assert!(bound <= key);
        }
    }

    #[test]
    fn test_same_second_different_users_do_not_collide() {
        let alice = make_range_key(1_700_000_000, "alice");
        let bob = make_range_key(1_700_000_000, "bob");
        assert_ne!(alice, bob);
        // Same time prefix, different hash suffix.
        assert_eq!(&alice[..8], &bob[..8]);
    }

    #[test]
    fn test_hash_is_stable_for_a_given_user() {
        assert_eq!(make_range_key(42, "alice"), make_range_key(42, "alice"));
    }
}
