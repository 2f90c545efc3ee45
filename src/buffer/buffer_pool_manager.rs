use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::common::{BurrowError, FrameId, PageId, Result, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{Frame, LruReplacer, ReadPageGuard, WritePageGuard};

/// Resident-set map and free list, guarded together by the pool mutex.
struct PoolState {
    /// Page table: maps page IDs to frame IDs
    page_table: HashMap<PageId, FrameId>,
    /// Frames that are not currently holding a page
    free_list: VecDeque<FrameId>,
}

/// State shared with the release callbacks of outstanding page guards.
struct PoolShared {
    /// The buffer pool frames
    frames: Vec<Arc<Frame>>,
    /// Pool mutex: serializes residency, free-list and pin transitions
    state: Mutex<PoolState>,
    /// LRU replacer for eviction decisions
    replacer: LruReplacer,
}

impl PoolShared {
    /// Core of the unpin contract: true for pages that are not resident,
    /// false when the pin count is already zero. The dirty hint is
    /// OR-merged into the frame's dirty flag, and the replacer is notified
    /// on the 1 -> 0 transition.
    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let state = self.state.lock();
        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return true,
        };

        let frame = &self.frames[frame_id.as_usize()];
        match frame.unpin() {
            None => false,
            Some(remaining) => {
                if is_dirty {
                    frame.set_dirty(true);
                }
                if remaining == 0 {
                    self.replacer.unpin(frame_id);
                }
                true
            }
        }
    }
}

/// BufferPoolManager mediates between a fixed array of in-memory frames
/// and the disk-resident page file. Pages are fetched through RAII guards
/// that combine the page latch with the pin; eviction follows the LRU
/// policy over unpinned frames, writing dirty victims back first.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// Shared state
    shared: Arc<PoolShared>,
    /// Disk scheduler for I/O
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size and disk
    /// manager. All frames start on the free list.
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(Frame::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let shared = Arc::new(PoolShared {
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
            }),
            replacer: LruReplacer::new(pool_size),
        });

        Self {
            pool_size,
            shared,
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Allocates a new page and returns it write-latched with pin count 1.
    /// The frame contents start zeroed.
    pub fn new_page(&self) -> Result<WritePageGuard> {
        let frame = {
            let mut state = self.shared.state.lock();
            let frame_id = self.acquire_frame(&mut state)?;
            let frame = &self.shared.frames[frame_id.as_usize()];

            let page_id = match self.disk_scheduler.disk_manager().allocate_page() {
                Ok(page_id) => page_id,
                Err(e) => {
                    state.free_list.push_back(frame_id);
                    return Err(e);
                }
            };

            frame.reset();
            frame.set_page_id(page_id);
            frame.pin();
            state.page_table.insert(page_id, frame_id);
            self.shared.replacer.pin(frame_id);
            Arc::clone(frame)
        };

        let page_id = frame.page_id();
        Ok(self.make_write_guard(page_id, frame))
    }

    /// Fetches a page for read access, taking its shared latch.
    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.fetch_frame(page_id)?;
        let shared = Arc::clone(&self.shared);

        // Safety: the Arc inside the guard keeps the frame alive
        let guard = unsafe {
            ReadPageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, is_dirty| {
                    shared.unpin_page(pid, is_dirty);
                }),
            )
        };
        Ok(guard)
    }

    /// Fetches a page for write access, taking its exclusive latch.
    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.fetch_frame(page_id)?;
        Ok(self.make_write_guard(page_id, frame))
    }

    /// Decrements a page's pin count. Returns true even when the page is
    /// not resident; returns false only if the pin count was already zero.
    /// Guards call this on drop; it is public for callers that manage pins
    /// by hand.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.shared.unpin_page(page_id, is_dirty)
    }

    /// Flushes a specific page to disk, clearing its dirty flag.
    /// Returns whether the page was resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(BurrowError::InvalidPageId(page_id));
        }

        let state = self.shared.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.shared.frames[frame_id.as_usize()];

            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_scheduler.schedule_write_sync(page_id, &data)?;
            frame.set_dirty(false);

            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Flushes all dirty resident pages to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let state = self.shared.state.lock();

        for (&page_id, &frame_id) in state.page_table.iter() {
            let frame = &self.shared.frames[frame_id.as_usize()];

            if frame.is_dirty() {
                let mut data = [0u8; PAGE_SIZE];
                frame.copy_to(&mut data);
                self.disk_scheduler.schedule_write_sync(page_id, &data)?;
                frame.set_dirty(false);
            }
        }

        Ok(())
    }

    /// Deletes a page from the buffer pool and returns its id to the disk
    /// manager. Returns true for pages that are not resident, false for
    /// pages that are still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.shared.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(true),
        };

        let frame = &self.shared.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        state.page_table.remove(&page_id);
        self.shared.replacer.pin(frame_id);
        frame.reset();
        state.free_list.push_back(frame_id);

        self.disk_scheduler.disk_manager().deallocate_page(page_id)?;
        Ok(true)
    }

    /// Returns the pin count for a page, or None if it is not resident.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.shared.state.lock();

        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.shared.frames[frame_id.as_usize()].pin_count())
    }

    /// Returns the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.shared.state.lock().free_list.len()
    }

    /// Returns the underlying disk manager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    fn make_write_guard(&self, page_id: PageId, frame: Arc<Frame>) -> WritePageGuard {
        let shared = Arc::clone(&self.shared);

        // Safety: the Arc inside the guard keeps the frame alive
        unsafe {
            WritePageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, is_dirty| {
                    shared.unpin_page(pid, is_dirty);
                }),
            )
        }
    }

    /// Pins the frame holding `page_id`, reading the page in from disk if
    /// it is not resident. The returned frame has its pin count already
    /// incremented; the caller wraps it in a guard (which acquires the
    /// latch outside the pool mutex).
    fn fetch_frame(&self, page_id: PageId) -> Result<Arc<Frame>> {
        if page_id == INVALID_PAGE_ID {
            return Err(BurrowError::InvalidPageId(page_id));
        }

        let mut state = self.shared.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.shared.frames[frame_id.as_usize()];
            frame.pin();
            self.shared.replacer.pin(frame_id);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = &self.shared.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        if let Err(e) = self.disk_scheduler.schedule_read_sync(page_id, &mut data) {
            state.free_list.push_back(frame_id);
            return Err(e);
        }

        frame.set_page_id(page_id);
        frame.copy_from(&data);
        frame.set_dirty(false);
        frame.pin();
        state.page_table.insert(page_id, frame_id);
        self.shared.replacer.pin(frame_id);

        Ok(Arc::clone(frame))
    }

    /// Gets a usable frame, from the free list first, else by evicting the
    /// LRU victim (writing it back if dirty). The victim's frame is left
    /// reset and unmapped.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self
            .shared
            .replacer
            .victim()
            .ok_or(BurrowError::BufferPoolFull)?;
        let frame = &self.shared.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            trace!(page = %old_page_id, frame = %frame_id, "writing back dirty victim");
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            if let Err(e) = self.disk_scheduler.schedule_write_sync(old_page_id, &data) {
                self.shared.replacer.unpin(frame_id);
                return Err(e);
            }
        }

        state.page_table.remove(&old_page_id);
        frame.reset();

        Ok(frame_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = BufferPoolManager::new(pool_size, dm);
        (bpm, temp_file)
    }

    #[test]
    fn test_buffer_pool_manager_new() {
        let (bpm, _temp) = create_bpm(10);
        assert_eq!(bpm.pool_size(), 10);
        assert_eq!(bpm.free_frame_count(), 10);
    }

    #[test]
    fn test_buffer_pool_manager_new_page() {
        let (bpm, _temp) = create_bpm(10);

        let guard = bpm.new_page().unwrap();
        let page_id = guard.page_id();
        assert_eq!(page_id, PageId::new(1)); // page 0 is the header page
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        assert_eq!(bpm.free_frame_count(), 9);

        drop(guard);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn test_buffer_pool_manager_read_write() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = {
            let mut guard = bpm.new_page().unwrap();
            guard.data_mut()[0] = 42;
            guard.data_mut()[100] = 255;
            guard.page_id()
        };

        // The page should now be unpinned
        assert_eq!(bpm.get_pin_count(page_id), Some(0));

        // Read back
        {
            let guard = bpm.read_page(page_id).unwrap();
            assert_eq!(guard.data()[0], 42);
            assert_eq!(guard.data()[100], 255);
        }
    }

    #[test]
    fn test_buffer_pool_manager_unpin_contract() {
        let (bpm, _temp) = create_bpm(10);

        let guard = bpm.new_page().unwrap();
        let page_id = guard.page_id();
        drop(guard);

        // Pin count is zero: a second unpin fails
        assert!(!bpm.unpin_page(page_id, false));

        // Unpinning a page that was never fetched reports success
        assert!(bpm.unpin_page(PageId::new(999), false));
    }

    #[test]
    fn test_buffer_pool_manager_flush() {
        let (bpm, temp) = create_bpm(10);

        let page_id = {
            let mut guard = bpm.new_page().unwrap();
            guard.data_mut()[0] = 42;
            guard.page_id()
        };

        bpm.flush_page(page_id).unwrap();

        // Verify data persisted by reading from a new pool
        drop(bpm);

        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let bpm2 = BufferPoolManager::new(10, dm);

        let guard = bpm2.read_page(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
    }

    #[test]
    fn test_buffer_pool_manager_flush_missing() {
        let (bpm, _temp) = create_bpm(10);
        assert!(!bpm.flush_page(PageId::new(50)).unwrap());
    }

    #[test]
    fn test_buffer_pool_manager_eviction() {
        let (bpm, _temp) = create_bpm(3);

        let page_ids: Vec<_> = (0..3)
            .map(|i| {
                let mut guard = bpm.new_page().unwrap();
                guard.data_mut()[0] = i as u8;
                guard.page_id()
            })
            .collect();

        // All pages are unpinned and the pool is full
        assert_eq!(bpm.free_frame_count(), 0);

        // Creating a new page evicts the oldest unpinned frame
        let guard = bpm.new_page().unwrap();
        assert_eq!(guard.page_id(), PageId::new(4));
        drop(guard);

        // The evicted pages round-trip through disk intact
        for (i, &pid) in page_ids.iter().enumerate() {
            let guard = bpm.read_page(pid).unwrap();
            assert_eq!(guard.data()[0], i as u8);
        }
    }

    #[test]
    fn test_buffer_pool_manager_delete_page() {
        let (bpm, _temp) = create_bpm(10);

        let guard = bpm.new_page().unwrap();
        let page_id = guard.page_id();

        // Cannot delete while pinned
        assert!(!bpm.delete_page(page_id).unwrap());
        drop(guard);

        // Can delete after unpinning
        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.get_pin_count(page_id), None);
        assert_eq!(bpm.free_frame_count(), 10);

        // Deleting a non-resident page reports success
        assert!(bpm.delete_page(PageId::new(77)).unwrap());
    }

    #[test]
    fn test_buffer_pool_manager_deleted_page_id_reused() {
        let (bpm, _temp) = create_bpm(10);

        let guard = bpm.new_page().unwrap();
        let page_id = guard.page_id();
        drop(guard);

        bpm.delete_page(page_id).unwrap();

        let guard = bpm.new_page().unwrap();
        assert_eq!(guard.page_id(), page_id);
    }

    #[test]
    fn test_buffer_pool_manager_full() {
        let (bpm, _temp) = create_bpm(2);

        let _guard1 = bpm.new_page().unwrap();
        let _guard2 = bpm.new_page().unwrap();

        // Both frames pinned: a third page cannot be materialized
        assert!(matches!(bpm.new_page(), Err(BurrowError::BufferPoolFull)));
    }

    #[test]
    fn test_buffer_pool_manager_shared_readers() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = {
            let mut guard = bpm.new_page().unwrap();
            guard.data_mut()[0] = 7;
            guard.page_id()
        };

        let g1 = bpm.read_page(page_id).unwrap();
        let g2 = bpm.read_page(page_id).unwrap();
        assert_eq!(g1.data()[0], 7);
        assert_eq!(g2.data()[0], 7);
        assert_eq!(bpm.get_pin_count(page_id), Some(2));

        drop(g1);
        drop(g2);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }
}
