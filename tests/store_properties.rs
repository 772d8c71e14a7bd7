//! Property-based tests for the invariants the store is meant to uphold
//! regardless of which keys and values a caller happens to exercise it with.

use cairn::{Store, StoreOptions};
use proptest::prelude::*;
use tempfile::TempDir;

fn small_key() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..16)
}

fn small_value() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

proptest! {
    /// After `set(k, v)`, `get(k)` returns exactly `v` until `k` is written
    /// again or deleted.
    #[test]
    fn set_then_get_round_trips(key in small_key(), value in small_value()) {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path().join("db")).unwrap();
        store.set(&key, &value).unwrap();
        prop_assert_eq!(store.get(&key).unwrap(), Some(value));
    }

    /// The last write among any sequence of sets to the same key wins.
    #[test]
    fn last_write_wins(key in small_key(), values in prop::collection::vec(small_value(), 1..8)) {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path().join("db")).unwrap();
        for value in &values {
            store.set(&key, value).unwrap();
        }
        prop_assert_eq!(store.get(&key).unwrap(), Some(values.last().unwrap().clone()));
    }

    /// Deleting a key always makes it unreadable, regardless of prior history.
    #[test]
    fn delete_always_hides_the_key(
        key in small_key(),
        values in prop::collection::vec(small_value(), 0..5),
    ) {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path().join("db")).unwrap();
        for value in &values {
            store.set(&key, value).unwrap();
        }
        store.del(&key).unwrap();
        prop_assert_eq!(store.get(&key).unwrap(), None);
    }

    /// Closing and reopening a store never changes the value visible for any
    /// key that was written before the close.
    #[test]
    fn reopen_preserves_every_value(
        entries in prop::collection::vec((small_key(), small_value()), 1..20),
        num_buckets in 1u32..64,
    ) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");

        let mut expected = std::collections::HashMap::new();
        {
            let mut store = StoreOptions::new().num_buckets(num_buckets).open(&path).unwrap();
            for (key, value) in &entries {
                store.set(key, value).unwrap();
                expected.insert(key.clone(), value.clone());
            }
            store.close().unwrap();
        }

        let reopened = StoreOptions::new().num_buckets(num_buckets).open(&path).unwrap();
        for (key, value) in &expected {
            prop_assert_eq!(reopened.get(key).unwrap(), Some(value.clone()));
        }
    }
}
