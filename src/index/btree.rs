use std::path::Path;
use std::sync::Arc;

use log::debug;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{
    MarmotError, PageId, RecordId, Result, SlotId, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::btree_page::{
    internal_min_size, leaf_min_size, page_is_leaf, page_max_size, page_parent_id, page_size,
    set_page_parent_id, InternalPageMut, InternalPageRef, LeafPageMut, LeafPageRef,
};
use super::BPlusTreeIter;

#[derive(Clone, Copy, PartialEq, Eq)]
enum WriteOp {
    Insert,
    Delete,
}

enum Descent {
    Key(i64),
    Leftmost,
}

/// Exclusive latches held by one structural operation: the root-id latch
/// sentinel plus every retained page latch, root-most first. Dropping the
/// context releases the sentinel and then the page guards in order; each
/// guard's drop releases its latch before unpinning.
struct Context<'a> {
    root: Option<RwLockWriteGuard<'a, PageId>>,
    pages: Vec<WritePageGuard>,
    /// Pages merged away, physically deleted after every latch is released
    deleted: Vec<PageId>,
}

impl<'a> Context<'a> {
    fn new(root: RwLockWriteGuard<'a, PageId>) -> Self {
        Self {
            root: Some(root),
            pages: Vec::new(),
            deleted: Vec::new(),
        }
    }

    fn set_root(&mut self, page_id: PageId) {
        **self.root.as_mut().expect("root latch held across a re-root") = page_id;
    }

    fn release_all(&mut self) {
        self.root = None;
        self.pages.clear();
    }

    fn index_of(&self, page_id: PageId) -> Option<usize> {
        self.pages.iter().position(|g| g.page_id() == page_id)
    }

    fn page(&self, page_id: PageId) -> &WritePageGuard {
        &self.pages[self.index_of(page_id).expect("page latched in this context")]
    }

    fn page_mut(&mut self, page_id: PageId) -> &mut WritePageGuard {
        let idx = self.index_of(page_id).expect("page latched in this context");
        &mut self.pages[idx]
    }

    fn try_page_mut(&mut self, page_id: PageId) -> Option<&mut WritePageGuard> {
        let idx = self.index_of(page_id)?;
        Some(&mut self.pages[idx])
    }

    /// Two distinct held guards at once, for node-to-node transfers.
    fn pair_mut(
        &mut self,
        a: PageId,
        b: PageId,
    ) -> (&mut WritePageGuard, &mut WritePageGuard) {
        let i = self.index_of(a).expect("page latched in this context");
        let j = self.index_of(b).expect("page latched in this context");
        assert_ne!(i, j);
        if i < j {
            let (lo, hi) = self.pages.split_at_mut(j);
            (&mut lo[i], &mut hi[0])
        } else {
            let (lo, hi) = self.pages.split_at_mut(i);
            (&mut hi[0], &mut lo[j])
        }
    }
}

/// A concurrent B+ tree index over the buffer pool.
///
/// Unique i64 keys map to record ids. Readers descend with shared-mode
/// latch crabbing; writers latch the whole path in exclusive mode and
/// release ancestors as soon as a node is known safe for the operation.
/// The root page id sits behind its own reader/writer latch, represented
/// in the write path by the context's sentinel slot.
pub struct BPlusTree {
    index_name: String,
    root_page_id: RwLock<PageId>,
    bpm: Arc<BufferPoolManager>,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl BPlusTree {
    /// Creates an empty tree and registers it in the header page.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        assert!(leaf_max_size >= 3, "leaf_max_size must be at least 3");
        assert!(internal_max_size >= 3, "internal_max_size must be at least 3");
        let index_name = index_name.into();

        {
            let mut guard = bpm.write_page(HEADER_PAGE_ID)?;
            let mut header = HeaderPage::new(guard.data_mut());
            if !header.is_valid() {
                header.init();
            }
            header.insert_record(&index_name, INVALID_PAGE_ID)?;
        }

        Ok(Self {
            index_name,
            root_page_id: RwLock::new(INVALID_PAGE_ID),
            bpm,
            leaf_max_size,
            internal_max_size,
        })
    }

    /// Opens a tree previously registered in the header page.
    pub fn open(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let index_name = index_name.into();
        let root = {
            let guard = bpm.read_page(HEADER_PAGE_ID)?;
            let header = HeaderPageRef::new(guard.data());
            if !header.is_valid() {
                return Err(MarmotError::InvalidDatabaseFile);
            }
            header
                .get_root_id(&index_name)
                .ok_or_else(|| MarmotError::IndexNotFound(index_name.clone()))?
        };

        Ok(Self {
            index_name,
            root_page_id: RwLock::new(root),
            bpm,
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Point lookup. Descends with shared latch crabbing.
    pub fn get_value(&self, key: i64) -> Result<Option<RecordId>> {
        let root_latch = self.root_page_id.read();
        if *root_latch == INVALID_PAGE_ID {
            return Ok(None);
        }
        let leaf = self.find_leaf_read(root_latch, Descent::Key(key))?;
        Ok(LeafPageRef::new(leaf.data()).lookup(key))
    }

    /// Inserts a key/value pair. Returns false on a duplicate key.
    pub fn insert(&self, key: i64, rid: RecordId) -> Result<bool> {
        let mut ctx = Context::new(self.root_page_id.write());

        if **ctx.root.as_ref().unwrap() == INVALID_PAGE_ID {
            self.start_new_tree(&mut ctx, key, rid)?;
            return Ok(true);
        }

        self.find_leaf_write(&mut ctx, key, WriteOp::Insert)?;
        let leaf_id = ctx.pages.last().unwrap().page_id();

        let (old_size, new_size) = {
            let guard = ctx.pages.last_mut().unwrap();
            let mut leaf = LeafPageMut::new(guard.data_mut());
            let old = leaf.size();
            (old, leaf.insert(key, rid))
        };
        if new_size == old_size {
            return Ok(false);
        }
        if new_size < self.leaf_max_size {
            return Ok(true);
        }

        // Split: sibling takes the upper half and slots into the chain
        let sibling_id = {
            let guard = self.bpm.new_page()?;
            let id = guard.page_id();
            ctx.pages.push(guard);
            id
        };
        let separator = {
            let (leaf_guard, sib_guard) = ctx.pair_mut(leaf_id, sibling_id);
            let mut leaf = LeafPageMut::new(leaf_guard.data_mut());
            let mut sibling = LeafPageMut::new(sib_guard.data_mut());
            sibling.init(sibling_id, leaf.parent_page_id(), self.leaf_max_size);
            leaf.move_half_to(&mut sibling);
            sibling.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(sibling_id);
            sibling.key_at(0)
        };
        debug!("split leaf {leaf_id} into {sibling_id}");
        self.insert_into_parent(&mut ctx, leaf_id, sibling_id, separator)?;
        Ok(true)
    }

    /// Removes a key. Absent keys are a no-op.
    pub fn remove(&self, key: i64) -> Result<()> {
        let mut ctx = Context::new(self.root_page_id.write());

        if **ctx.root.as_ref().unwrap() == INVALID_PAGE_ID {
            return Ok(());
        }

        self.find_leaf_write(&mut ctx, key, WriteOp::Delete)?;
        let leaf_id = ctx.pages.last().unwrap().page_id();

        let (old_size, new_size) = {
            let guard = ctx.pages.last_mut().unwrap();
            let mut leaf = LeafPageMut::new(guard.data_mut());
            let old = leaf.size();
            (old, leaf.remove(key))
        };
        if new_size == old_size {
            return Ok(());
        }

        if self.coalesce_or_redistribute(&mut ctx, leaf_id)? {
            ctx.deleted.push(leaf_id);
        }

        // Physical deletion only after every latch is released
        ctx.release_all();
        for page_id in std::mem::take(&mut ctx.deleted) {
            self.bpm.delete_page(page_id)?;
        }
        Ok(())
    }

    /// Iterator over the whole key range, leftmost leaf first.
    pub fn iter(&self) -> Result<BPlusTreeIter> {
        let root_latch = self.root_page_id.read();
        if *root_latch == INVALID_PAGE_ID {
            return Ok(BPlusTreeIter::empty(Arc::clone(&self.bpm)));
        }
        let leaf = self.find_leaf_read(root_latch, Descent::Leftmost)?;
        Ok(BPlusTreeIter::new(Arc::clone(&self.bpm), leaf, 0))
    }

    /// Iterator positioned at the first entry with key >= `key`.
    pub fn iter_from(&self, key: i64) -> Result<BPlusTreeIter> {
        let root_latch = self.root_page_id.read();
        if *root_latch == INVALID_PAGE_ID {
            return Ok(BPlusTreeIter::empty(Arc::clone(&self.bpm)));
        }
        let leaf = self.find_leaf_read(root_latch, Descent::Key(key))?;
        let index = LeafPageRef::new(leaf.data()).find_pos(key);
        Ok(BPlusTreeIter::new(Arc::clone(&self.bpm), leaf, index))
    }

    /// Inserts whitespace-separated integer keys read from a file; each
    /// key's record id is derived from the key itself.
    pub fn insert_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        for token in content.split_whitespace() {
            let key: i64 = token.parse().map_err(|_| {
                MarmotError::IndexCorrupted(format!("bad key in bulk file: {token}"))
            })?;
            self.insert(key, Self::rid_for_key(key))?;
        }
        Ok(())
    }

    /// Removes whitespace-separated integer keys read from a file.
    pub fn remove_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        for token in content.split_whitespace() {
            let key: i64 = token.parse().map_err(|_| {
                MarmotError::IndexCorrupted(format!("bad key in bulk file: {token}"))
            })?;
            self.remove(key)?;
        }
        Ok(())
    }

    pub fn rid_for_key(key: i64) -> RecordId {
        RecordId::new(PageId::new(key as u32), SlotId::new(0))
    }

    // ---------------------------------------------------------------
    // descent
    // ---------------------------------------------------------------

    /// Shared-mode crabbing: the root-id latch is released once the root
    /// page is latched, and each parent latch once its child is.
    fn find_leaf_read(
        &self,
        root_latch: RwLockReadGuard<'_, PageId>,
        target: Descent,
    ) -> Result<ReadPageGuard> {
        let mut guard = self.bpm.read_page(*root_latch)?;
        drop(root_latch);

        loop {
            if page_is_leaf(guard.data()) {
                return Ok(guard);
            }
            let child_id = {
                let node = InternalPageRef::new(guard.data());
                match target {
                    Descent::Key(key) => node.lookup(key),
                    Descent::Leftmost => node.child_at(0),
                }
            };
            let child = self.bpm.read_page(child_id)?;
            guard = child;
        }
    }

    /// Exclusive-mode crabbing: the full path is latched top-down, and
    /// all ancestors (sentinel included) are released whenever a node is
    /// safe for `op`. On return the path sits in `ctx.pages`, leaf last.
    fn find_leaf_write(&self, ctx: &mut Context<'_>, key: i64, op: WriteOp) -> Result<()> {
        let root_id = **ctx.root.as_ref().unwrap();
        let guard = self.bpm.write_page(root_id)?;
        if Self::is_safe(guard.data(), op, true) {
            ctx.root = None;
        }

        let mut current = guard;
        loop {
            if page_is_leaf(current.data()) {
                ctx.pages.push(current);
                return Ok(());
            }
            let child_id = InternalPageRef::new(current.data()).lookup(key);
            let child = self.bpm.write_page(child_id)?;
            ctx.pages.push(current);
            if Self::is_safe(child.data(), op, false) {
                ctx.root = None;
                ctx.pages.clear();
            }
            current = child;
        }
    }

    /// A node is insert-safe while an insertion cannot split it, and
    /// delete-safe while a removal cannot underflow it.
    fn is_safe(data: &[u8], op: WriteOp, is_root: bool) -> bool {
        let size = page_size(data);
        let max_size = page_max_size(data);
        match op {
            WriteOp::Insert => {
                if page_is_leaf(data) {
                    size < max_size - 1
                } else {
                    size < max_size
                }
            }
            WriteOp::Delete => {
                if is_root {
                    size > 2
                } else if page_is_leaf(data) {
                    size > leaf_min_size(max_size)
                } else {
                    size > internal_min_size(max_size)
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // insertion
    // ---------------------------------------------------------------

    fn start_new_tree(&self, ctx: &mut Context<'_>, key: i64, rid: RecordId) -> Result<()> {
        let mut guard = self.bpm.new_page()?;
        let root_id = guard.page_id();
        let mut leaf = LeafPageMut::new(guard.data_mut());
        leaf.init(root_id, INVALID_PAGE_ID, self.leaf_max_size);
        leaf.insert(key, rid);
        drop(guard);

        ctx.set_root(root_id);
        self.sync_root_to_header(root_id)?;
        debug!("started new tree at root {root_id}");
        Ok(())
    }

    /// Links a freshly split-off sibling into the tree above. `old` and
    /// `new` are both latched in `ctx`; the parent latch, when one
    /// exists, was retained by the descent because `old` was unsafe.
    fn insert_into_parent(
        &self,
        ctx: &mut Context<'_>,
        old_id: PageId,
        new_id: PageId,
        key: i64,
    ) -> Result<()> {
        let parent_id = page_parent_id(ctx.page(old_id).data());

        if parent_id == INVALID_PAGE_ID {
            // The old node was the root: grow a new one above it
            let mut guard = self.bpm.new_page()?;
            let root_id = guard.page_id();
            {
                let mut root = InternalPageMut::new(guard.data_mut());
                root.init(root_id, INVALID_PAGE_ID, self.internal_max_size);
                root.populate_new_root(old_id, key, new_id);
            }
            drop(guard);

            set_page_parent_id(ctx.page_mut(old_id).data_mut(), root_id);
            set_page_parent_id(ctx.page_mut(new_id).data_mut(), root_id);
            ctx.set_root(root_id);
            self.sync_root_to_header(root_id)?;
            debug!("grew new root {root_id}");
            return Ok(());
        }

        let parent_size = page_size(ctx.page(parent_id).data());
        if parent_size < self.internal_max_size {
            let guard = ctx.page_mut(parent_id);
            let mut parent = InternalPageMut::new(guard.data_mut());
            parent.insert(key, new_id);
            return Ok(());
        }

        // Full parent: insert into an over-sized scratch copy, split that
        // at the min_size boundary, and recurse with the new sibling
        let mut entries = {
            let guard = ctx.page_mut(parent_id);
            InternalPageMut::new(guard.data_mut()).entries()
        };
        let pos = entries[1..].partition_point(|&(k, _)| k < key) + 1;
        entries.insert(pos, (key, new_id));

        let split_at = internal_min_size(self.internal_max_size);
        {
            let guard = ctx.page_mut(parent_id);
            let mut parent = InternalPageMut::new(guard.data_mut());
            parent.set_entries(&entries[..split_at]);
        }

        let sibling_id = {
            let guard = self.bpm.new_page()?;
            let id = guard.page_id();
            ctx.pages.push(guard);
            id
        };
        let parent_parent = page_parent_id(ctx.page(parent_id).data());
        {
            let guard = ctx.page_mut(sibling_id);
            let mut sibling = InternalPageMut::new(guard.data_mut());
            sibling.init(sibling_id, parent_parent, self.internal_max_size);
            sibling.set_entries(&entries[split_at..]);
        }
        for &(_, child) in &entries[split_at..] {
            self.set_child_parent(ctx, child, sibling_id)?;
        }

        let separator = entries[split_at].0;
        debug!("split internal {parent_id} into {sibling_id}");
        self.insert_into_parent(ctx, parent_id, sibling_id, separator)
    }

    /// Rewrites a child's parent pointer, going through the latch already
    /// held in `ctx` when there is one.
    fn set_child_parent(
        &self,
        ctx: &mut Context<'_>,
        child_id: PageId,
        parent_id: PageId,
    ) -> Result<()> {
        if let Some(guard) = ctx.try_page_mut(child_id) {
            set_page_parent_id(guard.data_mut(), parent_id);
            return Ok(());
        }
        let mut guard = self.bpm.write_page(child_id)?;
        set_page_parent_id(guard.data_mut(), parent_id);
        Ok(())
    }

    // ---------------------------------------------------------------
    // deletion
    // ---------------------------------------------------------------

    /// Restores the minimum-occupancy invariant for an underflowing node.
    /// Returns whether the node itself became garbage.
    fn coalesce_or_redistribute(&self, ctx: &mut Context<'_>, node_id: PageId) -> Result<bool> {
        let (is_leaf, size, parent_id) = {
            let data = ctx.page(node_id).data();
            (page_is_leaf(data), page_size(data), page_parent_id(data))
        };

        if parent_id == INVALID_PAGE_ID {
            return self.adjust_root(ctx, node_id);
        }

        let min_size = if is_leaf {
            leaf_min_size(self.leaf_max_size)
        } else {
            internal_min_size(self.internal_max_size)
        };
        if size >= min_size {
            return Ok(false);
        }

        // Prefer the left sibling; the leftmost child takes its right one
        let (index, sibling_id) = {
            let parent = InternalPageRef::new(ctx.page(parent_id).data());
            let index = parent
                .value_index(node_id)
                .expect("underflowing node registered in its parent");
            let sibling = if index > 0 {
                parent.child_at(index - 1)
            } else {
                parent.child_at(index + 1)
            };
            (index, sibling)
        };
        let sibling_guard = self.bpm.write_page(sibling_id)?;
        ctx.pages.push(sibling_guard);

        let sibling_size = page_size(ctx.page(sibling_id).data());
        if sibling_size > min_size {
            self.redistribute(ctx, node_id, sibling_id, parent_id, index)?;
            return Ok(false);
        }

        // Coalesce, always merging the right node into the left
        let node_is_garbage = if index > 0 {
            self.coalesce(ctx, sibling_id, node_id, parent_id, index)?;
            true
        } else {
            self.coalesce(ctx, node_id, sibling_id, parent_id, index + 1)?;
            ctx.deleted.push(sibling_id);
            false
        };

        if self.coalesce_or_redistribute(ctx, parent_id)? {
            ctx.deleted.push(parent_id);
        }
        Ok(node_is_garbage)
    }

    /// Merges `right_id` into `left_id` and drops the separator at
    /// `sep_index` from the parent. Internal merges pull the separator
    /// down and reparent every moved child.
    fn coalesce(
        &self,
        ctx: &mut Context<'_>,
        left_id: PageId,
        right_id: PageId,
        parent_id: PageId,
        sep_index: usize,
    ) -> Result<()> {
        let middle_key = InternalPageRef::new(ctx.page(parent_id).data()).key_at(sep_index);

        if page_is_leaf(ctx.page(left_id).data()) {
            let (left_guard, right_guard) = ctx.pair_mut(left_id, right_id);
            let mut left = LeafPageMut::new(left_guard.data_mut());
            let mut right = LeafPageMut::new(right_guard.data_mut());
            right.move_all_to(&mut left);
        } else {
            let moved_children: Vec<PageId> = {
                let right = InternalPageRef::new(ctx.page(right_id).data());
                (0..right.size()).map(|i| right.child_at(i)).collect()
            };
            {
                let (left_guard, right_guard) = ctx.pair_mut(left_id, right_id);
                let mut left = InternalPageMut::new(left_guard.data_mut());
                let mut right = InternalPageMut::new(right_guard.data_mut());
                right.move_all_to(&mut left, middle_key);
            }
            for child in moved_children {
                self.set_child_parent(ctx, child, left_id)?;
            }
        }

        let guard = ctx.page_mut(parent_id);
        let mut parent = InternalPageMut::new(guard.data_mut());
        parent.remove(sep_index);
        debug!("coalesced {right_id} into {left_id}");
        Ok(())
    }

    /// Moves one entry from the sibling into the underflowing node and
    /// refreshes the parent separator.
    fn redistribute(
        &self,
        ctx: &mut Context<'_>,
        node_id: PageId,
        sibling_id: PageId,
        parent_id: PageId,
        index: usize,
    ) -> Result<()> {
        let from_left = index > 0;
        let is_leaf = page_is_leaf(ctx.page(node_id).data());

        if is_leaf {
            let new_separator = {
                let (node_guard, sib_guard) = ctx.pair_mut(node_id, sibling_id);
                let mut node = LeafPageMut::new(node_guard.data_mut());
                let mut sibling = LeafPageMut::new(sib_guard.data_mut());
                if from_left {
                    sibling.move_last_to_front_of(&mut node);
                    node.key_at(0)
                } else {
                    sibling.move_first_to_end_of(&mut node);
                    sibling.key_at(0)
                }
            };
            let guard = ctx.page_mut(parent_id);
            let mut parent = InternalPageMut::new(guard.data_mut());
            let sep_index = if from_left { index } else { index + 1 };
            parent.set_key_at(sep_index, new_separator);
        } else {
            let sep_index = if from_left { index } else { index + 1 };
            let middle_key = InternalPageRef::new(ctx.page(parent_id).data()).key_at(sep_index);

            let (new_separator, moved_child) = {
                let (node_guard, sib_guard) = ctx.pair_mut(node_id, sibling_id);
                let mut node = InternalPageMut::new(node_guard.data_mut());
                let mut sibling = InternalPageMut::new(sib_guard.data_mut());
                if from_left {
                    sibling.move_last_to_front_of(&mut node, middle_key);
                    (node.key_at(0), node.child_at(0))
                } else {
                    sibling.move_first_to_end_of(&mut node, middle_key);
                    (sibling.key_at(0), node.child_at(node.size() - 1))
                }
            };
            {
                let guard = ctx.page_mut(parent_id);
                let mut parent = InternalPageMut::new(guard.data_mut());
                parent.set_key_at(sep_index, new_separator);
            }
            self.set_child_parent(ctx, moved_child, node_id)?;
        }
        debug!("redistributed between {node_id} and {sibling_id}");
        Ok(())
    }

    /// Handles underflow at the root: an internal root with a single
    /// child promotes that child; an empty leaf root empties the tree.
    /// Returns whether the old root page is garbage.
    fn adjust_root(&self, ctx: &mut Context<'_>, old_root_id: PageId) -> Result<bool> {
        let (is_leaf, size) = {
            let data = ctx.page(old_root_id).data();
            (page_is_leaf(data), page_size(data))
        };

        if !is_leaf && size == 1 {
            let child_id = InternalPageRef::new(ctx.page(old_root_id).data()).child_at(0);
            self.set_child_parent(ctx, child_id, INVALID_PAGE_ID)?;
            ctx.set_root(child_id);
            self.sync_root_to_header(child_id)?;
            debug!("root collapsed to {child_id}");
            return Ok(true);
        }
        if is_leaf && size == 0 {
            ctx.set_root(INVALID_PAGE_ID);
            self.sync_root_to_header(INVALID_PAGE_ID)?;
            debug!("tree emptied");
            return Ok(true);
        }
        Ok(false)
    }

    // ---------------------------------------------------------------
    // header page bookkeeping
    // ---------------------------------------------------------------

    /// Rewrites this index's root record on the header page. Callers hold
    /// the root-id latch, so updates are serialised.
    fn sync_root_to_header(&self, root: PageId) -> Result<()> {
        let mut guard = self.bpm.write_page(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.is_valid() {
            header.init();
        }
        if header.get_root_id(&self.index_name).is_some() {
            header.update_record(&self.index_name, root)
        } else {
            header.insert_record(&self.index_name, root)
        }
    }
}
