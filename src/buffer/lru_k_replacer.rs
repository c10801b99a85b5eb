use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::{FrameId, Timestamp};

/// Access history for a single frame: up to k timestamps, oldest at the
/// front, plus the evictable flag.
#[derive(Debug)]
struct FrameRecord {
    history: VecDeque<Timestamp>,
    is_evictable: bool,
}

impl FrameRecord {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: true,
        }
    }

    fn record(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        while self.history.len() > k {
            self.history.pop_front();
        }
    }

    /// Oldest retained timestamp. With the history capped at k entries
    /// this is the k-th most recent access once the history is full.
    fn oldest(&self) -> Timestamp {
        *self.history.front().expect("tracked frame has a history")
    }
}

struct ReplacerInner {
    records: HashMap<FrameId, FrameRecord>,
    num_evictable: usize,
}

impl ReplacerInner {
    /// Selects and removes the victim frame, if any: frames with fewer
    /// than k recorded accesses are preferred over frames with a full
    /// history; within each class the smallest oldest-retained timestamp
    /// wins.
    fn evict(&mut self, k: usize) -> Option<FrameId> {
        let mut victim: Option<FrameId> = None;
        let mut victim_short = false;
        let mut victim_oldest = Timestamp::MAX;

        for (&frame_id, record) in &self.records {
            if !record.is_evictable {
                continue;
            }
            let short = record.history.len() < k;
            let oldest = record.oldest();

            let better = match (victim_short, short) {
                (false, true) => true,
                (true, false) => false,
                _ => oldest < victim_oldest,
            };
            if victim.is_none() || better {
                victim = Some(frame_id);
                victim_short = short;
                victim_oldest = oldest;
            }
        }

        if let Some(frame_id) = victim {
            self.records.remove(&frame_id);
            self.num_evictable -= 1;
        }
        victim
    }
}

/// LRU-K replacement policy.
///
/// The replacer evicts the frame whose k-th most recent access lies
/// furthest in the past. A frame with fewer than k recorded accesses is
/// treated as infinitely distant and is always preferred as a victim;
/// ties resolve to the frame with the earliest retained timestamp.
pub struct LruKReplacer {
    k: usize,
    replacer_size: usize,
    current_timestamp: AtomicU64,
    inner: Mutex<ReplacerInner>,
}

impl LruKReplacer {
    /// Creates a replacer tracking at most `replacer_size` frames with the
    /// given k.
    pub fn new(k: usize, replacer_size: usize) -> Self {
        assert!(k > 0);
        Self {
            k,
            replacer_size,
            current_timestamp: AtomicU64::new(0),
            inner: Mutex::new(ReplacerInner {
                records: HashMap::new(),
                num_evictable: 0,
            }),
        }
    }

    /// Evicts the frame with the largest backward k-distance.
    /// Returns None if there are no evictable frames.
    pub fn evict(&self) -> Option<FrameId> {
        self.inner.lock().evict(self.k)
    }

    /// Records an access to the given frame at the next clock tick.
    /// A frame seen for the first time starts out evictable; if the
    /// replacer is already tracking `replacer_size` frames, a victim is
    /// evicted first, under the same lock.
    pub fn record_access(&self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.replacer_size {
            return;
        }

        let timestamp = self.current_timestamp.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();

        let is_new = !inner.records.contains_key(&frame_id);
        if is_new && inner.records.len() == self.replacer_size {
            inner.evict(self.k);
        }

        let record = inner
            .records
            .entry(frame_id)
            .or_insert_with(FrameRecord::new);
        record.record(timestamp, self.k);

        if is_new {
            inner.num_evictable += 1;
        }
    }

    /// Toggles a frame's evictability. Untracked frames are ignored.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.records.get_mut(&frame_id) {
            if record.is_evictable != is_evictable {
                record.is_evictable = is_evictable;
                if is_evictable {
                    inner.num_evictable += 1;
                } else {
                    inner.num_evictable -= 1;
                }
            }
        }
    }

    /// Drops all state for an evictable frame. Removing a non-evictable
    /// frame violates the contract; untracked frames are ignored.
    pub fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.records.remove(&frame_id) {
            debug_assert!(record.is_evictable, "removed frame must be evictable");
            if record.is_evictable {
                inner.num_evictable -= 1;
            }
        }
    }

    /// Number of currently evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().num_evictable
    }

    pub fn k(&self) -> usize {
        self.k
    }
}
