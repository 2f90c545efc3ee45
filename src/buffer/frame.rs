use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::RwLock;

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// One slot of the buffer pool: the cached page bytes plus the residency
/// metadata the pool needs to pin, evict and write back the page.
///
/// The reader/writer lock on `data` doubles as the page latch of the
/// index: tree descents take it shared for lookups and exclusive for
/// structural changes, so there is no separate latch table. The pin
/// count and dirty flag are atomics because guards release them through
/// a callback that runs without the pool mutex.
pub struct Frame {
    /// Index of this slot in the pool's frame array
    frame_id: FrameId,
    /// Which page currently occupies the slot (INVALID_PAGE_ID when free)
    page_id: AtomicU32,
    /// Outstanding guards on this frame; nonzero blocks eviction
    pin_count: AtomicU32,
    /// Set when the cached bytes diverge from the on-disk page
    is_dirty: AtomicBool,
    /// Page bytes; the lock is the page latch (pub(crate) for the guards)
    pub(crate) data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl Frame {
    /// Creates a free slot holding no page.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicU32::new(INVALID_PAGE_ID.as_u32()),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    pub fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.as_u32(), Ordering::Release);
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Takes one pin and returns the new count.
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drops one pin and returns the remaining count. Returns None when
    /// the frame was not pinned, which marks a double release by the
    /// caller.
    pub fn unpin(&self) -> Option<u32> {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .ok()
            .map(|previous| previous - 1)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Fills the slot with freshly read page bytes. Takes the latch
    /// exclusively; the pool only calls this on frames no guard can
    /// still reach.
    pub fn copy_from(&self, data: &[u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        self.data.write().copy_from_slice(data);
    }

    /// Snapshots the page bytes for eviction write-back or flushing.
    pub fn copy_to(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        data.copy_from_slice(&**self.data.read());
    }

    /// Returns the slot to its free state: no page, no pins, clean,
    /// zeroed bytes.
    pub fn reset(&self) {
        self.page_id
            .store(INVALID_PAGE_ID.as_u32(), Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_starts_free() {
        let frame = Frame::new(FrameId::new(0));
        assert_eq!(frame.frame_id(), FrameId::new(0));
        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_frame_pin_unpin() {
        let frame = Frame::new(FrameId::new(0));

        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert_eq!(frame.pin_count(), 2);

        assert_eq!(frame.unpin(), Some(1));
        assert_eq!(frame.unpin(), Some(0));

        // releasing an unpinned frame is reported, not wrapped around
        assert_eq!(frame.unpin(), None);
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    fn test_frame_dirty() {
        let frame = Frame::new(FrameId::new(0));

        assert!(!frame.is_dirty());
        frame.set_dirty(true);
        assert!(frame.is_dirty());
        frame.set_dirty(false);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_frame_data_round_trip() {
        let frame = Frame::new(FrameId::new(0));

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 42;
        data[100] = 255;
        frame.copy_from(&data);

        let mut read_data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut read_data);

        assert_eq!(read_data[0], 42);
        assert_eq!(read_data[100], 255);
    }

    #[test]
    fn test_frame_data_lock_is_the_page_latch() {
        let frame = Frame::new(FrameId::new(0));

        // shared latches coexist, exclusive waits
        let shared = frame.data.read();
        assert!(frame.data.try_read().is_some());
        assert!(frame.data.try_write().is_none());
        drop(shared);

        assert!(frame.data.try_write().is_some());
    }

    #[test]
    fn test_frame_reset() {
        let frame = Frame::new(FrameId::new(0));

        frame.set_page_id(PageId::new(5));
        frame.pin();
        frame.set_dirty(true);
        let mut data = [1u8; PAGE_SIZE];
        frame.copy_from(&data);

        frame.reset();

        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());

        frame.copy_to(&mut data);
        assert_eq!(data[0], 0);
    }
}
