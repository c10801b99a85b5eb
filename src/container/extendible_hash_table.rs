use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

/// A bucket holds up to `bucket_size` key/value pairs plus its local depth.
#[derive(Debug)]
struct Bucket<K, V> {
    depth: usize,
    items: Vec<(K, V)>,
}

impl<K: Eq, V> Bucket<K, V> {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            items: Vec::new(),
        }
    }

    fn find(&self, key: &K) -> Option<&V> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn remove(&mut self, key: &K) -> bool {
        match self.items.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Overwrites an existing key, appends when there is room, or reports
    /// a full bucket. `capacity` is the table-wide bucket size.
    fn insert(&mut self, key: K, value: V, capacity: usize) -> bool {
        if let Some(pair) = self.items.iter_mut().find(|(k, _)| *k == key) {
            pair.1 = value;
            return true;
        }
        if self.items.len() >= capacity {
            return false;
        }
        self.items.push((key, value));
        true
    }
}

/// Mutable table state. The directory stores indices into `buckets`;
/// several directory slots alias the same bucket while its local depth is
/// below the global depth.
struct Inner<K, V> {
    global_depth: usize,
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

/// A concurrent extendible hash table.
///
/// Keys are routed to buckets through the low `global_depth` bits of their
/// hash. A full bucket splits: its local depth is incremented, a sibling
/// bucket is allocated at the same depth, the directory slots that pointed
/// at it are re-pointed by the new depth bit, and the entries are
/// redistributed by re-hashing. When the splitting bucket was already at
/// the global depth the directory doubles first.
///
/// One table-wide mutex serialises all operations.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a table with a single empty bucket at depth 0.
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0);
        Self {
            bucket_size,
            inner: Mutex::new(Inner {
                global_depth: 0,
                dir: vec![0],
                buckets: vec![Bucket::new(0)],
            }),
        }
    }

    fn index_of(key: &K, global_depth: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & ((1 << global_depth) - 1)
    }

    /// Looks up the value mapped to `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let idx = Self::index_of(key, inner.global_depth);
        inner.buckets[inner.dir[idx]].find(key).cloned()
    }

    /// Removes the pair mapped to `key`, reporting whether it was present.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let idx = Self::index_of(key, inner.global_depth);
        let bucket = inner.dir[idx];
        inner.buckets[bucket].remove(key)
    }

    /// Inserts `key -> value`, overwriting any existing mapping. Splits
    /// the target bucket (cascading if needed) until the pair fits.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        loop {
            let idx = Self::index_of(&key, inner.global_depth);
            let target = inner.dir[idx];
            if inner.buckets[target].insert(key.clone(), value.clone(), self.bucket_size) {
                return;
            }

            if inner.buckets[target].depth == inner.global_depth {
                // Double the directory, each new slot aliasing its low-half twin
                inner.global_depth += 1;
                let half = inner.dir.clone();
                inner.dir.extend(half);
            }

            let local_depth = inner.buckets[target].depth;
            inner.buckets[target].depth = local_depth + 1;
            let spilled = std::mem::take(&mut inner.buckets[target].items);

            let sibling = inner.buckets.len();
            inner.buckets.push(Bucket::new(local_depth + 1));

            // Re-point every aliasing slot: the local_depth-th hash bit now
            // selects between the old bucket and its new sibling
            let start = idx & ((1 << local_depth) - 1);
            let dir_len = inner.dir.len();
            let mut i = start;
            while i < dir_len {
                inner.dir[i] = target;
                inner.dir[i + (1 << local_depth)] = sibling;
                i += 1 << (local_depth + 1);
            }

            // Redistribute; at most bucket_size entries land on either side
            for (k, v) in spilled {
                let slot = Self::index_of(&k, inner.global_depth);
                let dest = inner.dir[slot];
                inner.buckets[dest].insert(k, v, self.bucket_size);
            }
        }
    }

    /// Current global depth of the directory.
    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    /// Local depth of the bucket behind the given directory slot.
    pub fn local_depth(&self, dir_index: usize) -> usize {
        let inner = self.inner.lock();
        inner.buckets[inner.dir[dir_index]].depth
    }

    /// Number of allocated buckets.
    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_table_insert_find() {
        let table = ExtendibleHashTable::new(4);

        table.insert(1, "a");
        table.insert(2, "b");
        table.insert(3, "c");

        assert_eq!(table.find(&1), Some("a"));
        assert_eq!(table.find(&2), Some("b"));
        assert_eq!(table.find(&3), Some("c"));
        assert_eq!(table.find(&4), None);
    }

    #[test]
    fn test_hash_table_overwrite() {
        let table = ExtendibleHashTable::new(4);

        table.insert(1, "a");
        table.insert(1, "z");

        assert_eq!(table.find(&1), Some("z"));
    }

    #[test]
    fn test_hash_table_remove() {
        let table = ExtendibleHashTable::new(4);

        table.insert(1, "a");
        assert!(table.remove(&1));
        assert!(!table.remove(&1));
        assert_eq!(table.find(&1), None);
    }

    #[test]
    fn test_hash_table_split_grows_directory() {
        let table = ExtendibleHashTable::new(2);

        // Three entries cannot fit in a single bucket of two, so at least
        // one split (and one directory doubling) must have happened
        table.insert(0u32, 0u32);
        table.insert(4, 4);
        table.insert(8, 8);

        assert!(table.global_depth() >= 1);
        assert!(table.num_buckets() >= 2);
        assert_eq!(table.find(&0), Some(0));
        assert_eq!(table.find(&4), Some(4));
        assert_eq!(table.find(&8), Some(8));
    }

    #[test]
    fn test_hash_table_many_inserts() {
        let table = ExtendibleHashTable::new(4);

        for i in 0..512u32 {
            table.insert(i, i * 2);
        }
        for i in 0..512u32 {
            assert_eq!(table.find(&i), Some(i * 2), "missing key {i}");
        }

        for i in (0..512u32).step_by(2) {
            assert!(table.remove(&i));
        }
        for i in 0..512u32 {
            if i % 2 == 0 {
                assert_eq!(table.find(&i), None);
            } else {
                assert_eq!(table.find(&i), Some(i * 2));
            }
        }
    }

    #[test]
    fn test_hash_table_local_depth_bounded_by_global() {
        let table = ExtendibleHashTable::new(1);

        for i in 0..64u32 {
            table.insert(i, i);
        }

        let depth = table.global_depth();
        for slot in 0..(1usize << depth) {
            assert!(table.local_depth(slot) <= depth);
        }
    }

    #[test]
    fn test_hash_table_concurrent_inserts() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(ExtendibleHashTable::new(4));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for i in 0..256u32 {
                        table.insert(t * 1000 + i, i);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        for t in 0..4u32 {
            for i in 0..256u32 {
                assert_eq!(table.find(&(t * 1000 + i)), Some(i));
            }
        }
    }
}
