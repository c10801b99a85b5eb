//! Concurrency tests for the B+ tree: latch crabbing must keep readers
//! and writers consistent under contention.

use std::sync::Arc;
use std::thread;

use marmot::buffer::BufferPoolManager;
use marmot::index::BPlusTree;
use marmot::storage::disk::DiskManager;

use tempfile::NamedTempFile;

fn create_tree(pool_size: usize) -> (Arc<BPlusTree>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, 2, disk_manager));
    let tree = Arc::new(BPlusTree::new("idx", bpm, 8, 8).unwrap());
    (tree, temp_file)
}

#[test]
fn test_concurrent_disjoint_inserts() {
    let (tree, _temp) = create_tree(200);

    let handles: Vec<_> = (0..4i64)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for i in 0..250 {
                    let key = t * 1000 + i;
                    assert!(tree.insert(key, BPlusTree::rid_for_key(key)).unwrap());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4i64 {
        for i in 0..250 {
            let key = t * 1000 + i;
            assert_eq!(
                tree.get_value(key).unwrap(),
                Some(BPlusTree::rid_for_key(key)),
                "lost key {key}"
            );
        }
    }
}

#[test]
fn test_concurrent_insert_and_read() {
    let (tree, _temp) = create_tree(200);

    let writer = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for key in 1..=1000i64 {
                tree.insert(key, BPlusTree::rid_for_key(key)).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for key in 1..=1000i64 {
                    // A value is either absent or exactly what the writer
                    // inserted; nothing in between
                    if let Some(rid) = tree.get_value(key).unwrap() {
                        assert_eq!(rid, BPlusTree::rid_for_key(key));
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    // Final sweep: every insert survived
    for key in 1..=1000i64 {
        assert_eq!(
            tree.get_value(key).unwrap(),
            Some(BPlusTree::rid_for_key(key)),
            "lost update for key {key}"
        );
    }
}

#[test]
fn test_concurrent_interleaved_inserts() {
    let (tree, _temp) = create_tree(200);

    // Threads insert interleaved key ranges so splits collide
    let handles: Vec<_> = (0..4i64)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut key = t;
                while key < 2000 {
                    assert!(tree.insert(key, BPlusTree::rid_for_key(key)).unwrap());
                    key += 4;
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let keys: Vec<i64> = tree.iter().unwrap().map(|e| e.unwrap().0).collect();
    assert_eq!(keys, (0..2000).collect::<Vec<_>>());
}

#[test]
fn test_concurrent_removes() {
    let (tree, _temp) = create_tree(200);

    for key in 0..1000i64 {
        tree.insert(key, BPlusTree::rid_for_key(key)).unwrap();
    }

    // Each thread removes its own residue class
    let handles: Vec<_> = (0..4i64)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut key = t;
                while key < 1000 {
                    tree.remove(key).unwrap();
                    key += 4;
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(tree.is_empty());
    for key in 0..1000i64 {
        assert_eq!(tree.get_value(key).unwrap(), None);
    }
}

#[test]
fn test_concurrent_mixed_workload() {
    let (tree, _temp) = create_tree(200);

    for key in 0..500i64 {
        tree.insert(key, BPlusTree::rid_for_key(key)).unwrap();
    }

    let inserter = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for key in 500..1000i64 {
                tree.insert(key, BPlusTree::rid_for_key(key)).unwrap();
            }
        })
    };
    let remover = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for key in 0..250i64 {
                tree.remove(key).unwrap();
            }
        })
    };

    inserter.join().unwrap();
    remover.join().unwrap();

    for key in 0..1000i64 {
        let expected = if key < 250 {
            None
        } else {
            Some(BPlusTree::rid_for_key(key))
        };
        assert_eq!(tree.get_value(key).unwrap(), expected, "key {key}");
    }
}
