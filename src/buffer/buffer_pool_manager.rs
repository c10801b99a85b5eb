use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::common::{
    FrameId, MarmotError, PageId, Result, DEFAULT_BUCKET_SIZE, INVALID_PAGE_ID, PAGE_SIZE,
};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// Shared pool state. The pool-wide mutex wraps the free list and is
/// taken by every public operation; the page table and the replacer carry
/// their own locks and are only ever locked while the pool mutex is held,
/// so the acquisition order is fixed.
pub(crate) struct PoolState {
    frames: Vec<Arc<FrameHeader>>,
    /// Pool-wide mutex, owning the list of never-used frames
    latch: Mutex<VecDeque<FrameId>>,
    /// Maps resident page IDs to their frames
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    disk_scheduler: DiskScheduler,
}

impl PoolState {
    /// Decrements a page's pin count; at zero the frame becomes
    /// evictable. The dirty flag only ever ORs in. Returns false when the
    /// page is not resident or was not pinned.
    pub(crate) fn unpin(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _guard = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];
        if frame.pin_count() == 0 {
            return false;
        }
        if is_dirty {
            frame.mark_dirty();
        }
        if frame.unpin() == Some(0) {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }
}

/// BufferPoolManager caches disk pages in a fixed set of frames.
///
/// Frames come from the free list while it lasts, then from the LRU-K
/// replacer; dirty victims are written back before their frame is reused.
/// Successful `new_page`/`read_page`/`write_page` calls return RAII
/// guards that hold both the page latch and a pin; dropping the guard is
/// the paired unpin.
pub struct BufferPoolManager {
    pool_size: usize,
    state: Arc<PoolState>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, replacer_k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(PoolState {
            frames,
            latch: Mutex::new(free_list),
            page_table: ExtendibleHashTable::new(DEFAULT_BUCKET_SIZE),
            replacer: LruKReplacer::new(replacer_k, pool_size),
            disk_scheduler: DiskScheduler::new(disk_manager),
        });

        Self { pool_size, state }
    }

    /// Allocates a fresh page and returns a write guard over its zeroed
    /// frame, pinned once. Fails with `BufferPoolFull` when every frame
    /// is pinned.
    pub fn new_page(&self) -> Result<WritePageGuard> {
        let state = &self.state;
        let (page_id, frame) = {
            let mut free_list = state.latch.lock();
            let frame_id = Self::acquire_frame(state, &mut free_list)?;

            let page_id = state.disk_scheduler.disk_manager().allocate_page()?;
            let frame = &state.frames[frame_id.as_usize()];
            frame.set_page_id(page_id);
            frame.pin();

            state.page_table.insert(page_id, frame_id);
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);

            (page_id, Arc::clone(frame))
        };

        // The page latch is taken outside the pool mutex; the pin taken
        // above keeps the frame from being evicted in between.
        Ok(unsafe { WritePageGuard::new(page_id, frame, Arc::clone(state)) })
    }

    /// Fetches a page for shared access.
    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.fetch_frame(page_id)?;
        Ok(unsafe { ReadPageGuard::new(page_id, frame, Arc::clone(&self.state)) })
    }

    /// Fetches a page for exclusive access.
    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.fetch_frame(page_id)?;
        Ok(unsafe { WritePageGuard::new(page_id, frame, Arc::clone(&self.state)) })
    }

    /// Public unpin with the classic contract; guard drops route here.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.state.unpin(page_id, is_dirty)
    }

    /// Writes a resident page to disk and clears its dirty flag.
    /// Returns false for non-resident pages.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(MarmotError::InvalidPageId(page_id));
        }
        let state = &self.state;
        let _guard = state.latch.lock();

        let Some(frame_id) = state.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        state.disk_scheduler.write_sync(page_id, &data)?;
        frame.clear_dirty();
        Ok(true)
    }

    /// Writes every resident dirty page back to disk. Frames holding no
    /// page are skipped.
    pub fn flush_all_pages(&self) -> Result<()> {
        let state = &self.state;
        let _guard = state.latch.lock();

        for frame in &state.frames {
            let page_id = frame.page_id();
            if page_id == INVALID_PAGE_ID || !frame.is_dirty() {
                continue;
            }
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            state.disk_scheduler.write_sync(page_id, &data)?;
            frame.clear_dirty();
        }
        Ok(())
    }

    /// Drops a page from the pool and deallocates it on disk. A page that
    /// is not resident counts as deleted; a pinned page cannot be deleted.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let state = &self.state;
        let mut free_list = state.latch.lock();

        let Some(frame_id) = state.page_table.find(&page_id) else {
            return Ok(true);
        };
        let frame = &state.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        state.page_table.remove(&page_id);
        state.replacer.remove(frame_id);
        frame.reset();
        free_list.push_back(frame_id);
        state.disk_scheduler.disk_manager().deallocate_page(page_id)?;
        Ok(true)
    }

    /// Pin count of a resident page, for tests and assertions.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = &self.state;
        let _guard = state.latch.lock();
        state
            .page_table
            .find(&page_id)
            .map(|frame_id| state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.latch.lock().len()
    }

    /// Number of evictable frames in the replacer.
    pub fn replacer_size(&self) -> usize {
        self.state.replacer.size()
    }

    /// Resolves a page to its pinned frame, reading it from disk on a
    /// miss. Runs entirely under the pool mutex.
    fn fetch_frame(&self, page_id: PageId) -> Result<Arc<FrameHeader>> {
        if page_id == INVALID_PAGE_ID {
            return Err(MarmotError::InvalidPageId(page_id));
        }
        let state = &self.state;
        let mut free_list = state.latch.lock();

        if let Some(frame_id) = state.page_table.find(&page_id) {
            let frame = &state.frames[frame_id.as_usize()];
            frame.pin();
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            return Ok(Arc::clone(frame));
        }

        let frame_id = Self::acquire_frame(state, &mut free_list)?;
        let frame = &state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        state.disk_scheduler.read_sync(page_id, &mut data)?;
        frame.set_page_id(page_id);
        frame.copy_from(&data);
        frame.pin();

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        Ok(Arc::clone(frame))
    }

    /// Hands out a frame from the free list, or evicts a victim: the
    /// victim's mapping is dropped, its bytes are written back when dirty,
    /// and the frame is zeroed for its next tenant.
    fn acquire_frame(state: &PoolState, free_list: &mut VecDeque<FrameId>) -> Result<FrameId> {
        if let Some(frame_id) = free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = state.replacer.evict().ok_or(MarmotError::BufferPoolFull)?;
        let frame = &state.frames[frame_id.as_usize()];
        let victim_page_id = frame.page_id();

        state.page_table.remove(&victim_page_id);
        if frame.is_dirty() {
            debug!("evicting dirty page {victim_page_id}, writing back");
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            state.disk_scheduler.write_sync(victim_page_id, &data)?;
        }
        frame.reset();
        Ok(frame_id)
    }
}
