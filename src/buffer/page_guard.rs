use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::Frame;

/// Callback type for releasing a page guard
type ReleaseCallback = Box<dyn FnOnce(PageId, bool) + Send + Sync>;

/// Base page guard that manages the common functionality
struct PageGuardBase {
    /// The page ID being guarded
    page_id: PageId,
    /// Reference to the frame (kept alive for the guard's lifetime)
    _frame: Arc<Frame>,
    /// Callback to release the guard
    release_callback: Option<ReleaseCallback>,
    /// Whether the page was marked dirty
    is_dirty: bool,
}

impl PageGuardBase {
    fn new(page_id: PageId, frame: Arc<Frame>, release_callback: ReleaseCallback) -> Self {
        Self {
            page_id,
            _frame: frame,
            release_callback: Some(release_callback),
            is_dirty: false,
        }
    }

    fn drop_impl(&mut self) {
        if let Some(callback) = self.release_callback.take() {
            callback(self.page_id, self.is_dirty);
        }
    }
}

/// RAII guard for read access to a page: a shared page latch plus a pin.
/// The latch is released and the page unpinned when the guard drops.
pub struct ReadPageGuard {
    base: PageGuardBase,
    /// Read lock on the page data
    data_guard: Option<RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl ReadPageGuard {
    /// Creates a new ReadPageGuard.
    /// # Safety
    /// The caller must ensure that the frame outlives this guard.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<Frame>,
        release_callback: ReleaseCallback,
    ) -> Self {
        // Acquire the shared latch
        let data_guard = frame.data.read();
        // Transmute to static lifetime - the frame is kept alive via Arc
        let data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            base: PageGuardBase::new(page_id, frame, release_callback),
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }

    /// Drops this guard, releasing the page.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Release the latch before the unpin callback runs: once the pin
        // drops, the frame may be victimized and its latch must be free.
        self.data_guard.take();
        self.base.drop_impl();
    }
}

/// RAII guard for write access to a page: an exclusive page latch plus a
/// pin. Mutable access marks the page dirty; the latch is released and the
/// page unpinned (with the dirty hint) when the guard drops.
pub struct WritePageGuard {
    base: PageGuardBase,
    /// Write lock on the page data
    data_guard: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl WritePageGuard {
    /// Creates a new WritePageGuard.
    /// # Safety
    /// The caller must ensure that the frame outlives this guard.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<Frame>,
        release_callback: ReleaseCallback,
    ) -> Self {
        // Acquire the exclusive latch
        let data_guard = frame.data.write();
        // Transmute to static lifetime - the frame is kept alive via Arc
        let data_guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            base: PageGuardBase::new(page_id, frame, release_callback),
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }

    /// Returns a mutable reference to the page data.
    /// Automatically marks the page as dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.base.is_dirty = true;
        &mut self.data_guard.as_mut().unwrap()[..]
    }

    /// Drops this guard, releasing the page.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        // Latch first, then the unpin callback (see ReadPageGuard::drop)
        self.data_guard.take();
        self.base.drop_impl();
    }
}
