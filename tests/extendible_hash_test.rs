//! Integration tests for the extendible hash table

use marmot::container::ExtendibleHashTable;

#[test]
fn test_hash_basic_operations() {
    let table = ExtendibleHashTable::new(4);

    table.insert("a", 1);
    table.insert("b", 2);
    table.insert("c", 3);

    assert_eq!(table.find(&"a"), Some(1));
    assert_eq!(table.find(&"b"), Some(2));
    assert_eq!(table.find(&"c"), Some(3));
    assert_eq!(table.find(&"d"), None);

    assert!(table.remove(&"b"));
    assert_eq!(table.find(&"b"), None);
    assert!(!table.remove(&"b"));
}

#[test]
fn test_hash_insert_overwrites() {
    let table = ExtendibleHashTable::new(4);

    table.insert(7u32, "old");
    table.insert(7u32, "new");
    assert_eq!(table.find(&7), Some("new"));
}

#[test]
fn test_hash_overflow_triggers_split() {
    // Three entries never fit one bucket of two: the directory must have
    // doubled at least once and every key must still resolve
    let table = ExtendibleHashTable::new(2);

    table.insert(0u32, 0u32);
    table.insert(4, 40);
    table.insert(8, 80);

    assert!(table.global_depth() >= 1);
    assert!(table.num_buckets() >= 2);
    assert_eq!(table.find(&0), Some(0));
    assert_eq!(table.find(&4), Some(40));
    assert_eq!(table.find(&8), Some(80));
}

#[test]
fn test_hash_local_depth_never_exceeds_global() {
    let table = ExtendibleHashTable::new(1);

    for i in 0..128u32 {
        table.insert(i, i);
    }

    let global = table.global_depth();
    for slot in 0..(1usize << global) {
        assert!(table.local_depth(slot) <= global);
    }
    for i in 0..128u32 {
        assert_eq!(table.find(&i), Some(i));
    }
}

#[test]
fn test_hash_grow_shrink_workload() {
    let table = ExtendibleHashTable::new(4);

    for i in 0..1000u32 {
        table.insert(i, i as u64 * 3);
    }
    for i in 0..1000u32 {
        assert_eq!(table.find(&i), Some(i as u64 * 3), "missing key {i}");
    }

    for i in (0..1000u32).filter(|i| i % 3 == 0) {
        assert!(table.remove(&i));
    }
    for i in 0..1000u32 {
        if i % 3 == 0 {
            assert_eq!(table.find(&i), None);
        } else {
            assert_eq!(table.find(&i), Some(i as u64 * 3));
        }
    }
}

#[test]
fn test_hash_concurrent_mixed_workload() {
    use std::sync::Arc;
    use std::thread;

    let table = Arc::new(ExtendibleHashTable::new(4));

    let handles: Vec<_> = (0..8u32)
        .map(|t| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let base = t * 10_000;
                for i in 0..500 {
                    table.insert(base + i, i);
                }
                for i in (0..500).step_by(2) {
                    assert!(table.remove(&(base + i)));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..8u32 {
        let base = t * 10_000;
        for i in 0..500 {
            let expected = if i % 2 == 0 { None } else { Some(i) };
            assert_eq!(table.find(&(base + i)), expected);
        }
    }
}
