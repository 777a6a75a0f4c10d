//! Unit tests for the grouping map

use super::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

fn sorted<T: Ord>(mut items: Vec<T>) -> Vec<T> {
    items.sort();
    items
}

#[test]
fn test_new_map_is_empty_with_default_buckets() {
    let map: GroupingMap<String, Vec<u32>> = GroupingMap::new();
    assert!(map.is_empty());
    assert_eq!(map.bucket_count(), DEFAULT_BUCKET_COUNT);
    assert_eq!(map.entries().count(), 0);
}

#[test]
fn test_zero_buckets_is_clamped_to_one() {
    let map: GroupingMap<u32, u32> = GroupingMap::with_buckets(0);
    assert_eq!(map.bucket_count(), 1);
    map.set(1, 10);
    map.set(2, 20);
    assert_eq!(map.get(&2), Ok(20));
}

#[test]
fn test_insert_does_not_deduplicate() {
    let map = GroupingMap::with_buckets(7);
    map.insert("car", 1);
    map.insert("car", 2);

    assert_eq!(map.len(), 2);
    // Lookups see the first entry in the chain.
    assert_eq!(map.try_get(&"car"), Some(1));
    assert_eq!(sorted(map.entries().map(|(_, v)| v).collect()), vec![1, 2]);
}

#[test]
fn test_try_get_and_get_on_missing_key() {
    let map: GroupingMap<&str, u32> = GroupingMap::new();
    assert_eq!(map.try_get(&"deer"), None);
    assert!(!map.contains(&"deer"));
    assert_eq!(map.get(&"deer"), Err(GroupingError::KeyNotFound));
}

#[test]
fn test_set_inserts_then_replaces() {
    let map = GroupingMap::new();
    map.set("bear", 1);
    assert!(map.contains(&"bear"));
    map.set("bear", 5);

    assert_eq!(map.len(), 1);
    assert_eq!(map.get(&"bear"), Ok(5));
}

#[test]
fn test_upsert_creates_then_appends() {
    let map = GroupingMap::new();
    for value in [1, 2, 3] {
        map.upsert("river", || vec![value], |bucket: &mut Vec<i32>| bucket.push(value));
    }
    map.upsert("deer", || vec![9], |bucket| bucket.push(9));

    assert_eq!(map.len(), 2);
    assert_eq!(map.get(&"river"), Ok(vec![1, 2, 3]));
    assert_eq!(map.get(&"deer"), Ok(vec![9]));
}

#[test]
fn test_remove_is_not_implemented() {
    let map = GroupingMap::new();
    map.set(1u8, 1u8);
    assert_eq!(
        map.remove(&1),
        Err(GroupingError::NotImplemented {
            operation: "remove"
        })
    );
    assert!(map.contains(&1));
}

#[test]
fn test_single_bucket_chains_every_key() {
    let map = GroupingMap::with_buckets(1);
    for key in 0..50u32 {
        map.set(key, key * 2);
    }
    assert_eq!(map.len(), 50);
    for key in 0..50u32 {
        assert_eq!(map.get(&key), Ok(key * 2));
    }
    // One chain, so entries come back in insertion order.
    let keys: Vec<u32> = map.entries().map(|(k, _)| k).collect();
    assert_eq!(keys, (0..50).collect::<Vec<_>>());
}

#[test]
fn test_entries_is_lazy_and_finite() {
    let map = GroupingMap::with_buckets(3);
    for key in 0..10u32 {
        map.set(key, ());
    }

    let mut entries = map.entries();
    let first_two: Vec<_> = entries.by_ref().take(2).collect();
    let rest: Vec<_> = entries.collect();
    assert_eq!(first_two.len() + rest.len(), 10);
}

#[test]
fn test_entries_walks_a_long_chain_in_order() {
    let map = GroupingMap::with_buckets(1);
    for key in 0..5_000u32 {
        map.insert(key, key + 1);
    }

    let mut expected = 0u32;
    for (key, value) in map.entries() {
        assert_eq!(key, expected);
        assert_eq!(value, expected + 1);
        expected += 1;
    }
    assert_eq!(expected, 5_000);
}

#[test]
fn test_entries_spans_every_bucket() {
    let map = GroupingMap::with_buckets(4);
    for key in 0..40u32 {
        map.set(key, key);
    }
    // Every key is reported once, whichever bucket it landed in.
    assert_eq!(sorted(map.entries().map(|(k, _)| k).collect()), (0..40).collect::<Vec<_>>());
}

#[test]
fn test_keys_and_values_follow_entry_order() {
    let map = GroupingMap::with_buckets(3);
    for word in ["deer", "bear", "river", "car"] {
        map.set(word, word.len());
    }

    let entries: Vec<_> = map.entries().collect();
    let keys: Vec<_> = map.keys().collect();
    let values: Vec<_> = map.values().collect();

    assert_eq!(keys, entries.iter().map(|(k, _)| *k).collect::<Vec<_>>());
    assert_eq!(values, entries.iter().map(|(_, v)| *v).collect::<Vec<_>>());
    assert_eq!(sorted(keys), vec!["bear", "car", "deer", "river"]);
}

#[test]
fn test_into_iter_yields_every_entry() {
    let map = GroupingMap::with_buckets(5);
    for key in ["a", "b", "c", "d"] {
        map.set(key.to_string(), key.len());
    }
    let keys = sorted(map.into_iter().map(|(k, _)| k).collect::<Vec<_>>());
    assert_eq!(keys, vec!["a", "b", "c", "d"]);
}

#[test]
fn test_clear_keeps_bucket_count() {
    let map = GroupingMap::with_buckets(11);
    map.set("x", 1);
    map.clear();
    assert!(map.is_empty());
    assert_eq!(map.bucket_count(), 11);
    map.set("y", 2);
    assert_eq!(map.get(&"y"), Ok(2));
}

#[test]
fn test_long_chain_drops_without_overflow() {
    let map = GroupingMap::with_buckets(1);
    for key in 0..10_000u32 {
        map.insert(key, key);
    }
    drop(map);

    let map = GroupingMap::with_buckets(1);
    for key in 0..10_000u32 {
        map.insert(key, key);
    }
    let mut iter = map.into_iter();
    assert_eq!(iter.next(), Some((0, 0)));
    drop(iter);
}

#[test]
fn test_custom_comparer_groups_case_insensitively() {
    let comparer = FnComparer::new(
        |key: &String| {
            key.bytes()
                .fold(7u64, |acc, b| acc.wrapping_mul(131).wrapping_add(b.to_ascii_lowercase() as u64))
        },
        |a: &String, b: &String| a.eq_ignore_ascii_case(b),
    );
    let map = GroupingMap::with_comparer(17, comparer);
    for word in ["Car", "car", "CAR", "River"] {
        map.upsert(word.to_string(), || 1u32, |count: &mut u32| *count += 1);
    }

    assert_eq!(map.len(), 2);
    assert_eq!(map.get(&"car".to_string()), Ok(3));
    // The first spelling seen is the one stored.
    let keys = sorted(map.into_iter().map(|(k, _)| k).collect::<Vec<_>>());
    assert_eq!(keys, vec!["Car".to_string(), "River".to_string()]);
}

#[test]
fn test_concurrent_upserts_match_sequential_reference() {
    let workers = 8;
    let per_worker = 2_000usize;
    let key_space = 37usize;

    let map = Arc::new(GroupingMap::with_buckets(13));
    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for i in 0..per_worker {
                    let key = (worker * 7 + i) % key_space;
                    let value = worker * per_worker + i;
                    map.upsert(key, || vec![value], |bucket: &mut Vec<usize>| {
                        bucket.push(value)
                    });
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut reference: HashMap<usize, Vec<usize>> = HashMap::new();
    for worker in 0..workers {
        for i in 0..per_worker {
            let key = (worker * 7 + i) % key_space;
            reference
                .entry(key)
                .or_default()
                .push(worker * per_worker + i);
        }
    }

    let map = Arc::try_unwrap(map).unwrap();
    assert_eq!(map.len(), reference.len());
    let grouped: HashMap<usize, Vec<usize>> = map
        .into_iter()
        .map(|(key, bucket)| (key, sorted(bucket)))
        .collect();
    let reference: HashMap<usize, Vec<usize>> = reference
        .into_iter()
        .map(|(key, bucket)| (key, sorted(bucket)))
        .collect();
    assert_eq!(grouped, reference);
}

#[test]
fn test_panicking_update_does_not_break_map() {
    let map = Arc::new(GroupingMap::with_buckets(5));
    map.set("k", 1i32);

    let poisoner = Arc::clone(&map);
    let result = thread::spawn(move || {
        poisoner.upsert("k", || 0, |_| panic!("update failed"));
    })
    .join();
    assert!(result.is_err());

    map.upsert("k", || 0, |v: &mut i32| *v += 1);
    assert_eq!(map.get(&"k"), Ok(2));
}

#[test]
fn test_debug_reports_shape() {
    let map = GroupingMap::with_buckets(4);
    map.set(1, 1);
    let rendered = format!("{:?}", map);
    assert!(rendered.contains("bucket_count: 4"));
    assert!(rendered.contains("len: 1"));
}
