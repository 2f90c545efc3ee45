use std::sync::Arc;

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{KeyBytes, PageId, RecordId, Result, INVALID_PAGE_ID};

use super::btree_page::LeafPageRef;

/// Forward iterator over the leaf chain. Holds an exclusive latch and a
/// pin on exactly one leaf at a time; stepping to the next leaf acquires
/// its latch before the current one is released. Dropping the iterator
/// releases the held leaf.
///
/// Invariant: while a leaf is held, the offset points at a valid entry.
/// An exhausted iterator holds nothing and equals `end()`.
pub struct IndexIterator {
    bpm: Arc<BufferPoolManager>,
    leaf: Option<WritePageGuard>,
    offset: usize,
}

impl IndexIterator {
    /// Iterator over `guard` starting at `offset`. An offset past the last
    /// entry (possible when positioning at a probe key larger than every
    /// key in the leaf) rolls over to the next leaf.
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        guard: WritePageGuard,
        offset: usize,
    ) -> Result<Self> {
        let mut iter = Self {
            bpm,
            leaf: Some(guard),
            offset,
        };
        let size = LeafPageRef::new(iter.leaf.as_ref().unwrap().data()).size();
        if offset >= size {
            iter.move_to_next_leaf()?;
        }
        Ok(iter)
    }

    /// The exhausted sentinel.
    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            leaf: None,
            offset: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }

    /// The entry under the cursor. Panics on an exhausted iterator.
    pub fn entry(&self) -> (KeyBytes, RecordId) {
        let guard = self.leaf.as_ref().expect("iterator is exhausted");
        let leaf = LeafPageRef::new(guard.data());
        (leaf.key_at(self.offset), leaf.value_at(self.offset))
    }

    /// Steps to the next entry, following the leaf chain when the current
    /// leaf is exhausted.
    pub fn advance(&mut self) -> Result<()> {
        let guard = self.leaf.as_ref().expect("iterator is exhausted");
        let size = LeafPageRef::new(guard.data()).size();
        if self.offset + 1 < size {
            self.offset += 1;
            return Ok(());
        }
        self.move_to_next_leaf()
    }

    /// Latches the next leaf (before releasing the current one), or
    /// becomes the end sentinel when the chain runs out. Skips leaves with
    /// no entry at the cursor.
    fn move_to_next_leaf(&mut self) -> Result<()> {
        loop {
            let next_page_id = {
                let guard = self.leaf.as_ref().expect("iterator is exhausted");
                LeafPageRef::new(guard.data()).next_page_id()
            };
            if next_page_id == INVALID_PAGE_ID {
                self.leaf = None;
                self.offset = 0;
                return Ok(());
            }

            let next_guard = self.bpm.write_page(next_page_id)?;
            // assignment drops the previous guard after the next latch is held
            self.leaf = Some(next_guard);
            self.offset = 0;

            let size = LeafPageRef::new(self.leaf.as_ref().unwrap().data()).size();
            if size > 0 {
                return Ok(());
            }
        }
    }

    fn position(&self) -> Option<(PageId, usize)> {
        self.leaf
            .as_ref()
            .map(|guard| (guard.page_id(), self.offset))
    }
}

impl PartialEq for IndexIterator {
    fn eq(&self, other: &Self) -> bool {
        self.position() == other.position()
    }
}

impl Iterator for IndexIterator {
    type Item = Result<(KeyBytes, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_end() {
            return None;
        }
        let item = self.entry();
        match self.advance() {
            Ok(()) => Some(Ok(item)),
            Err(e) => Some(Err(e)),
        }
    }
}
