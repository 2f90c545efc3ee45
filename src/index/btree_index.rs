use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{
    BurrowError, KeyBytes, PageId, RecordId, Result, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::btree_iterator::IndexIterator;
use super::btree_page::{
    set_page_parent, BTreePageRef, InternalPage, InternalPageRef, LeafPage, LeafPageRef,
    INTERNAL_MAX_SIZE, LEAF_MAX_SIZE,
};
use super::key_comparator::KeyComparator;

/// Root page id and cached entry count, guarded by the tree mutex.
struct TreeState {
    root_page_id: PageId,
    size: usize,
}

/// A concurrent B+ tree index over buffer pool pages.
///
/// Point operations descend with latch crabbing: writers push each
/// exclusively latched page onto a per-operation stack and release every
/// ancestor as soon as the just-latched child cannot split (insert) or
/// underflow (delete). The tree mutex protects the root page id and is
/// held only while the root is still on the stack. Readers couple shared
/// latches hand over hand.
pub struct BPlusTree<C: KeyComparator> {
    index_name: String,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
    state: Mutex<TreeState>,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Creates an empty tree. No pages are touched until the first insert.
    pub fn new(
        name: &str,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        assert!((2..=LEAF_MAX_SIZE).contains(&leaf_max_size));
        assert!((3..=INTERNAL_MAX_SIZE).contains(&internal_max_size));

        Self {
            index_name: name.to_string(),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            state: Mutex::new(TreeState {
                root_page_id: INVALID_PAGE_ID,
                size: 0,
            }),
        }
    }

    /// Opens an index persisted under `name`: the root comes from the
    /// registry page and the entry count from a walk of the leaf chain.
    pub fn open(
        name: &str,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let root_page_id = {
            let guard = bpm.read_page(HEADER_PAGE_ID)?;
            HeaderPageRef::new(guard.data())
                .get_root_id(name)
                .ok_or_else(|| BurrowError::IndexNotFound(name.to_string()))?
        };

        let mut size = 0;
        if root_page_id != INVALID_PAGE_ID {
            let mut guard = bpm.read_page(root_page_id)?;
            loop {
                let page = BTreePageRef::new(guard.data());
                if page.is_leaf() {
                    break;
                }
                if !page.is_internal() {
                    return Err(BurrowError::IndexCorrupted(format!(
                        "page {} has no valid node tag",
                        page.page_id()
                    )));
                }
                let child = InternalPageRef::new(guard.data()).child_at(0);
                guard = bpm.read_page(child)?;
            }
            loop {
                let leaf = LeafPageRef::new(guard.data());
                size += leaf.size();
                let next = leaf.next_page_id();
                if next == INVALID_PAGE_ID {
                    break;
                }
                guard = bpm.read_page(next)?;
            }
        }

        Ok(Self {
            index_name: name.to_string(),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            state: Mutex::new(TreeState {
                root_page_id,
                size,
            }),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().size == 0
    }

    /// Number of entries in the tree.
    pub fn len(&self) -> usize {
        self.state.lock().size
    }

    pub fn root_page_id(&self) -> PageId {
        self.state.lock().root_page_id
    }

    /// Point lookup. Shared latches, coupled hand over hand.
    pub fn get(&self, key: &KeyBytes) -> Result<Option<RecordId>> {
        let root_page_id = self.state.lock().root_page_id;
        if root_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.bpm.read_page(root_page_id)?;
        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                let leaf = LeafPageRef::new(guard.data());
                return Ok(leaf.lookup(key, &self.comparator));
            }
            let child = InternalPageRef::new(guard.data()).lookup(key, &self.comparator);
            // latch the child before the parent guard is dropped
            let child_guard = self.bpm.read_page(child)?;
            guard = child_guard;
        }
    }

    /// Inserts the entry. Returns false (leaving the tree untouched) if
    /// the key is already present.
    pub fn insert(&self, key: &KeyBytes, value: RecordId) -> Result<bool> {
        let mut tree = Some(self.state.lock());

        if tree.as_ref().unwrap().root_page_id == INVALID_PAGE_ID {
            self.start_new_tree(tree.as_mut().unwrap(), key, value)?;
            return Ok(true);
        }

        let root_page_id = tree.as_ref().unwrap().root_page_id;
        let mut path: Vec<WritePageGuard> = vec![self.bpm.write_page(root_page_id)?];

        // Crabbing descent: drop all ancestors (and the tree mutex once
        // the root leaves the stack) as soon as the child cannot split.
        loop {
            let child = {
                let data = path.last().unwrap().data();
                if BTreePageRef::new(data).is_leaf() {
                    break;
                }
                InternalPageRef::new(data).lookup(key, &self.comparator)
            };

            let child_guard = self.bpm.write_page(child)?;
            path.push(child_guard);

            let child_is_safe = {
                let page = BTreePageRef::new(path.last().unwrap().data());
                page.size() < page.max_size()
            };
            if child_is_safe {
                path.drain(..path.len() - 1);
                tree = None;
            }
        }

        let leaf_level = path.len() - 1;

        let duplicate = {
            let leaf = LeafPageRef::new(path[leaf_level].data());
            leaf.lookup(key, &self.comparator).is_some()
        };
        if duplicate {
            path.clear();
            drop(tree);
            return Ok(false);
        }

        let mut extra: Vec<WritePageGuard> = Vec::new();

        let leaf_is_full = {
            let leaf = LeafPageRef::new(path[leaf_level].data());
            leaf.size() == leaf.max_size()
        };

        if !leaf_is_full {
            let mut leaf = LeafPage::new(path[leaf_level].data_mut());
            leaf.insert(key, value, &self.comparator);
        } else {
            self.split_leaf_and_insert(&mut path, leaf_level, key, value, &mut extra, &mut tree)?;
        }

        // release the operation stack in push order, then the tree mutex
        path.clear();
        extra.clear();
        drop(tree);

        self.state.lock().size += 1;
        Ok(true)
    }

    /// Removes the entry for the key, if present. Missing keys are a
    /// no-op.
    pub fn remove(&self, key: &KeyBytes) -> Result<()> {
        let mut tree = Some(self.state.lock());

        let root_page_id = tree.as_ref().unwrap().root_page_id;
        if root_page_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut path: Vec<WritePageGuard> = vec![self.bpm.write_page(root_page_id)?];

        loop {
            let child = {
                let data = path.last().unwrap().data();
                if BTreePageRef::new(data).is_leaf() {
                    break;
                }
                InternalPageRef::new(data).lookup(key, &self.comparator)
            };

            let child_guard = self.bpm.write_page(child)?;
            path.push(child_guard);

            let child_is_safe = {
                let page = BTreePageRef::new(path.last().unwrap().data());
                page.size() > page.min_size()
            };
            if child_is_safe {
                path.drain(..path.len() - 1);
                tree = None;
            }
        }

        let leaf_level = path.len() - 1;

        let (old_size, new_size, leaf_min) = {
            let mut leaf = LeafPage::new(path[leaf_level].data_mut());
            let old_size = leaf.size();
            let new_size = leaf.remove_and_delete(key, &self.comparator);
            (old_size, new_size, leaf.min_size())
        };
        let removed = new_size < old_size;

        let mut extra: Vec<WritePageGuard> = Vec::new();
        let mut to_delete: Vec<PageId> = Vec::new();

        if removed && new_size < leaf_min {
            self.coalesce_or_redistribute(
                &mut path,
                leaf_level,
                &mut extra,
                &mut to_delete,
                &mut tree,
            )?;
        }

        path.clear();
        extra.clear();
        drop(tree);

        for page_id in to_delete {
            self.bpm.delete_page(page_id)?;
        }

        if removed {
            self.state.lock().size -= 1;
        }
        Ok(())
    }

    /// Iterator positioned at the first entry of the tree.
    pub fn begin(&self) -> Result<IndexIterator> {
        match self.find_leaf(None)? {
            Some(guard) => IndexIterator::new(Arc::clone(&self.bpm), guard, 0),
            None => Ok(IndexIterator::end(Arc::clone(&self.bpm))),
        }
    }

    /// Iterator positioned at the first entry with key >= the probe.
    pub fn begin_at(&self, key: &KeyBytes) -> Result<IndexIterator> {
        match self.find_leaf(Some(key))? {
            Some(guard) => {
                let offset = LeafPageRef::new(guard.data()).key_index(key, &self.comparator);
                IndexIterator::new(Arc::clone(&self.bpm), guard, offset)
            }
            None => Ok(IndexIterator::end(Arc::clone(&self.bpm))),
        }
    }

    /// The exhausted-iterator sentinel.
    pub fn end(&self) -> IndexIterator {
        IndexIterator::end(Arc::clone(&self.bpm))
    }

    /// Descends to the leaf for `key`, or to the leftmost leaf when no key
    /// is given. The leaf comes back exclusively latched; interior latches
    /// are coupled hand over hand.
    fn find_leaf(&self, key: Option<&KeyBytes>) -> Result<Option<WritePageGuard>> {
        let root_page_id = self.state.lock().root_page_id;
        if root_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.bpm.write_page(root_page_id)?;
        loop {
            let child = {
                let data = guard.data();
                if BTreePageRef::new(data).is_leaf() {
                    break;
                }
                let internal = InternalPageRef::new(data);
                match key {
                    Some(key) => internal.lookup(key, &self.comparator),
                    None => internal.child_at(0),
                }
            };
            let child_guard = self.bpm.write_page(child)?;
            guard = child_guard;
        }
        Ok(Some(guard))
    }

    /// First insert into an empty tree: a single leaf becomes the root.
    fn start_new_tree(
        &self,
        tree: &mut MutexGuard<'_, TreeState>,
        key: &KeyBytes,
        value: RecordId,
    ) -> Result<()> {
        let mut guard = self.bpm.new_page()?;
        let root_page_id = guard.page_id();
        {
            let mut leaf = LeafPage::new(guard.data_mut());
            leaf.init(root_page_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert(key, value, &self.comparator);
        }
        drop(guard);

        tree.root_page_id = root_page_id;
        tree.size = 1;
        self.update_root_record(root_page_id)?;
        debug!(index = %self.index_name, root = %root_page_id, "started new tree");
        Ok(())
    }

    /// Splits a full leaf with the incoming entry folded in: the left node
    /// keeps the ceiling half of the combined entries, the new right
    /// sibling is spliced into the leaf chain, and the separator bubbles
    /// into the parent.
    fn split_leaf_and_insert<'g>(
        &'g self,
        path: &mut Vec<WritePageGuard>,
        level: usize,
        key: &KeyBytes,
        value: RecordId,
        extra: &mut Vec<WritePageGuard>,
        tree: &mut Option<MutexGuard<'g, TreeState>>,
    ) -> Result<()> {
        let mut new_guard = self.bpm.new_page()?;
        let new_page_id = new_guard.page_id();

        let separator = {
            let mut old_leaf = LeafPage::new(path[level].data_mut());
            let mut new_leaf = LeafPage::new(new_guard.data_mut());
            new_leaf.init(new_page_id, INVALID_PAGE_ID, self.leaf_max_size);

            let total = old_leaf.size() + 1;
            let keep = (total + 1) / 2;
            let position = old_leaf.key_index(key, &self.comparator);
            if position < keep {
                old_leaf.move_tail_to(&mut new_leaf, keep - 1);
                old_leaf.insert(key, value, &self.comparator);
            } else {
                old_leaf.move_tail_to(&mut new_leaf, keep);
                new_leaf.insert(key, value, &self.comparator);
            }

            new_leaf.set_next_page_id(old_leaf.next_page_id());
            old_leaf.set_next_page_id(new_page_id);
            new_leaf.key_at(0)
        };

        debug!(
            index = %self.index_name,
            left = %path[level].page_id(),
            right = %new_page_id,
            "split leaf"
        );
        self.insert_into_parent(path, level, new_guard, separator, extra, tree)
    }

    /// Hooks a freshly split-off node into the tree: grows a new root when
    /// the split reached it, inserts into the parent when it has room, and
    /// otherwise splits the parent and recurses. Below-minimum halves are
    /// rebalanced first and the separator refreshed.
    fn insert_into_parent<'g>(
        &'g self,
        path: &mut Vec<WritePageGuard>,
        level: usize,
        mut new_guard: WritePageGuard,
        separator: KeyBytes,
        extra: &mut Vec<WritePageGuard>,
        tree: &mut Option<MutexGuard<'g, TreeState>>,
    ) -> Result<()> {
        let mut separator = separator;
        let new_page_id = new_guard.page_id();
        let is_leaf = BTreePageRef::new(new_guard.data()).is_leaf();

        // Rebalance a lopsided split before publishing the separator.
        let (old_size, old_min, new_size, new_min) = {
            let old = BTreePageRef::new(path[level].data());
            let new = BTreePageRef::new(new_guard.data());
            (old.size(), old.min_size(), new.size(), new.min_size())
        };
        if new_size < new_min {
            if is_leaf {
                let mut old = LeafPage::new(path[level].data_mut());
                let mut new = LeafPage::new(new_guard.data_mut());
                old.move_last_to_front_of(&mut new);
                separator = new.key_at(0);
            } else {
                let moved_child = {
                    let old = InternalPageRef::new(path[level].data());
                    old.child_at(old.size() - 1)
                };
                {
                    let mut old = InternalPage::new(path[level].data_mut());
                    let mut new = InternalPage::new(new_guard.data_mut());
                    old.move_last_to_front_of(&mut new, &separator);
                    separator = new.key_at(0);
                }
                self.reparent_held(moved_child, new_page_id, path, extra)?;
            }
        } else if old_size < old_min {
            if is_leaf {
                let mut old = LeafPage::new(path[level].data_mut());
                let mut new = LeafPage::new(new_guard.data_mut());
                new.move_first_to_end_of(&mut old);
                separator = new.key_at(0);
            } else {
                let moved_child = { InternalPageRef::new(new_guard.data()).child_at(0) };
                let old_page_id = {
                    let mut old = InternalPage::new(path[level].data_mut());
                    let mut new = InternalPage::new(new_guard.data_mut());
                    new.move_first_to_end_of(&mut old, &separator);
                    separator = new.key_at(0);
                    old.page_id()
                };
                self.reparent_held(moved_child, old_page_id, path, extra)?;
            }
        }

        let (old_page_id, old_is_root) = {
            let old = BTreePageRef::new(path[level].data());
            (old.page_id(), old.is_root())
        };

        if old_is_root {
            let mut root_guard = self.bpm.new_page()?;
            let root_page_id = root_guard.page_id();
            {
                let mut root = InternalPage::new(root_guard.data_mut());
                root.init(root_page_id, INVALID_PAGE_ID, self.internal_max_size);
                root.populate_new_root(old_page_id, &separator, new_page_id);
            }
            set_page_parent(path[level].data_mut(), root_page_id);
            set_page_parent(new_guard.data_mut(), root_page_id);

            let state = tree
                .as_mut()
                .expect("tree mutex is held while the root is on the stack");
            state.root_page_id = root_page_id;

            extra.push(new_guard);
            extra.push(root_guard);
            self.update_root_record(root_page_id)?;
            debug!(index = %self.index_name, root = %root_page_id, "root grew");
            return Ok(());
        }

        assert!(level > 0, "a non-root node keeps its parent on the stack");

        let (parent_size, parent_max, parent_page_id) = {
            let parent = BTreePageRef::new(path[level - 1].data());
            (parent.size(), parent.max_size(), parent.page_id())
        };

        if parent_size < parent_max {
            {
                let mut parent = InternalPage::new(path[level - 1].data_mut());
                parent.insert_after(old_page_id, &separator, new_page_id);
            }
            set_page_parent(new_guard.data_mut(), parent_page_id);
            extra.push(new_guard);
            return Ok(());
        }

        // Parent is full: split it first, then insert into whichever half
        // now owns the old node.
        let mut new_parent_guard = self.bpm.new_page()?;
        let new_parent_id = new_parent_guard.page_id();
        {
            let mut new_parent = InternalPage::new(new_parent_guard.data_mut());
            new_parent.init(new_parent_id, INVALID_PAGE_ID, self.internal_max_size);
        }

        let moved_children = {
            let parent = InternalPageRef::new(path[level - 1].data());
            let start = (parent.size() + 1) / 2;
            (start..parent.size())
                .map(|i| parent.child_at(i))
                .collect::<Vec<_>>()
        };
        {
            let mut parent = InternalPage::new(path[level - 1].data_mut());
            let mut new_parent = InternalPage::new(new_parent_guard.data_mut());
            parent.move_half_to(&mut new_parent);
        }
        for child in moved_children {
            self.reparent_held(child, new_parent_id, path, extra)?;
        }

        let old_stayed = {
            let parent = InternalPageRef::new(path[level - 1].data());
            parent.value_index(old_page_id).is_some()
        };
        if old_stayed {
            {
                let mut parent = InternalPage::new(path[level - 1].data_mut());
                parent.insert_after(old_page_id, &separator, new_page_id);
            }
            set_page_parent(new_guard.data_mut(), parent_page_id);
        } else {
            {
                let mut new_parent = InternalPage::new(new_parent_guard.data_mut());
                new_parent.insert_after(old_page_id, &separator, new_page_id);
            }
            set_page_parent(new_guard.data_mut(), new_parent_id);
        }
        extra.push(new_guard);

        let parent_separator = { InternalPageRef::new(new_parent_guard.data()).key_at(0) };
        debug!(
            index = %self.index_name,
            left = %parent_page_id,
            right = %new_parent_id,
            "split internal node"
        );
        self.insert_into_parent(path, level - 1, new_parent_guard, parent_separator, extra, tree)
    }

    /// Brings an underfull node back within occupancy bounds by merging
    /// with or borrowing from a sibling; the root is adjusted instead.
    fn coalesce_or_redistribute<'g>(
        &'g self,
        path: &mut Vec<WritePageGuard>,
        level: usize,
        extra: &mut Vec<WritePageGuard>,
        to_delete: &mut Vec<PageId>,
        tree: &mut Option<MutexGuard<'g, TreeState>>,
    ) -> Result<()> {
        let (node_page_id, node_is_root) = {
            let node = BTreePageRef::new(path[level].data());
            (node.page_id(), node.is_root())
        };

        if node_is_root {
            if self.adjust_root(path, level, extra, tree)? {
                to_delete.push(node_page_id);
            }
            return Ok(());
        }

        assert!(level > 0, "a non-root node keeps its parent on the stack");

        // Prefer the left sibling; the leftmost child borrows rightward.
        let (index, sibling_page_id, node_is_right) = {
            let parent = InternalPageRef::new(path[level - 1].data());
            let index = parent
                .value_index(node_page_id)
                .expect("underflowing child must be present in its parent");
            if index >= 1 {
                (index, parent.child_at(index - 1), true)
            } else {
                (index, parent.child_at(index + 1), false)
            }
        };

        let sibling_guard = self.bpm.write_page(sibling_page_id)?;
        extra.push(sibling_guard);
        let sibling = extra.len() - 1;

        let is_leaf = BTreePageRef::new(path[level].data()).is_leaf();
        let (node_size, sibling_size, max_size) = {
            let node = BTreePageRef::new(path[level].data());
            let sib = BTreePageRef::new(extra[sibling].data());
            (node.size(), sib.size(), node.max_size())
        };
        let combined = node_size + sibling_size;
        let fits_in_one = if is_leaf {
            combined < max_size
        } else {
            combined <= max_size
        };

        let index_of_right = if node_is_right { index } else { index + 1 };
        let middle_key = { InternalPageRef::new(path[level - 1].data()).key_at(index_of_right) };

        if fits_in_one {
            self.coalesce(
                path,
                level,
                sibling,
                node_is_right,
                index_of_right,
                &middle_key,
                extra,
                to_delete,
                tree,
            )
        } else {
            self.redistribute(path, level, sibling, node_is_right, index_of_right, &middle_key, extra)
        }
    }

    /// Merges the right node of the pair into the left, drops the
    /// separator from the parent, and recurses if the parent underflows.
    #[allow(clippy::too_many_arguments)]
    fn coalesce<'g>(
        &'g self,
        path: &mut Vec<WritePageGuard>,
        level: usize,
        sibling: usize,
        node_is_right: bool,
        index_of_right: usize,
        middle_key: &KeyBytes,
        extra: &mut Vec<WritePageGuard>,
        to_delete: &mut Vec<PageId>,
        tree: &mut Option<MutexGuard<'g, TreeState>>,
    ) -> Result<()> {
        let is_leaf = BTreePageRef::new(path[level].data()).is_leaf();

        let right_page_id;
        if is_leaf {
            if node_is_right {
                let mut right = LeafPage::new(path[level].data_mut());
                let mut left = LeafPage::new(extra[sibling].data_mut());
                right_page_id = right.page_id();
                right.move_all_to(&mut left);
            } else {
                let mut left = LeafPage::new(path[level].data_mut());
                let mut right = LeafPage::new(extra[sibling].data_mut());
                right_page_id = right.page_id();
                right.move_all_to(&mut left);
            }
        } else {
            let (left_page_id, moved_children);
            if node_is_right {
                let mut right = InternalPage::new(path[level].data_mut());
                let mut left = InternalPage::new(extra[sibling].data_mut());
                right_page_id = right.page_id();
                left_page_id = left.page_id();
                moved_children = right.child_ids();
                right.move_all_to(&mut left, middle_key);
            } else {
                let mut left = InternalPage::new(path[level].data_mut());
                let mut right = InternalPage::new(extra[sibling].data_mut());
                right_page_id = right.page_id();
                left_page_id = left.page_id();
                moved_children = right.child_ids();
                right.move_all_to(&mut left, middle_key);
            }
            for child in moved_children {
                self.reparent_held(child, left_page_id, path, extra)?;
            }
        }

        {
            let mut parent = InternalPage::new(path[level - 1].data_mut());
            parent.remove(index_of_right);
        }
        to_delete.push(right_page_id);
        debug!(index = %self.index_name, page = %right_page_id, "coalesced node");

        let parent_underflows = {
            let parent = BTreePageRef::new(path[level - 1].data());
            parent.size() < parent.min_size()
        };
        if parent_underflows {
            self.coalesce_or_redistribute(path, level - 1, extra, to_delete, tree)?;
        }
        Ok(())
    }

    /// Moves one entry from the sibling into the underfull node and
    /// rewrites the parent separator.
    #[allow(clippy::too_many_arguments)]
    fn redistribute(
        &self,
        path: &mut Vec<WritePageGuard>,
        level: usize,
        sibling: usize,
        node_is_right: bool,
        index_of_right: usize,
        middle_key: &KeyBytes,
        extra: &mut Vec<WritePageGuard>,
    ) -> Result<()> {
        let is_leaf = BTreePageRef::new(path[level].data()).is_leaf();
        let node_page_id = BTreePageRef::new(path[level].data()).page_id();

        let new_separator;
        if is_leaf {
            if node_is_right {
                let mut left = LeafPage::new(extra[sibling].data_mut());
                let mut right = LeafPage::new(path[level].data_mut());
                left.move_last_to_front_of(&mut right);
                new_separator = right.key_at(0);
            } else {
                let mut left = LeafPage::new(path[level].data_mut());
                let mut right = LeafPage::new(extra[sibling].data_mut());
                right.move_first_to_end_of(&mut left);
                new_separator = right.key_at(0);
            }
        } else {
            let moved_child;
            if node_is_right {
                moved_child = {
                    let left = InternalPageRef::new(extra[sibling].data());
                    left.child_at(left.size() - 1)
                };
                let mut left = InternalPage::new(extra[sibling].data_mut());
                let mut right = InternalPage::new(path[level].data_mut());
                left.move_last_to_front_of(&mut right, middle_key);
                new_separator = right.key_at(0);
            } else {
                moved_child = { InternalPageRef::new(extra[sibling].data()).child_at(0) };
                let mut left = InternalPage::new(path[level].data_mut());
                let mut right = InternalPage::new(extra[sibling].data_mut());
                right.move_first_to_end_of(&mut left, middle_key);
                new_separator = right.key_at(0);
            }
            self.reparent_held(moved_child, node_page_id, path, extra)?;
        }

        {
            let mut parent = InternalPage::new(path[level - 1].data_mut());
            parent.set_key_at(index_of_right, &new_separator);
        }
        debug!(index = %self.index_name, page = %node_page_id, "redistributed entry");
        Ok(())
    }

    /// Shrinks the tree at the root: an empty leaf root empties the tree,
    /// an internal root with one child promotes that child. Returns true
    /// when the old root page should be deleted.
    fn adjust_root<'g>(
        &'g self,
        path: &mut [WritePageGuard],
        level: usize,
        extra: &mut [WritePageGuard],
        tree: &mut Option<MutexGuard<'g, TreeState>>,
    ) -> Result<bool> {
        let (is_leaf, size) = {
            let root = BTreePageRef::new(path[level].data());
            (root.is_leaf(), root.size())
        };

        if is_leaf {
            if size == 0 {
                let state = tree
                    .as_mut()
                    .expect("tree mutex is held while the root is on the stack");
                state.root_page_id = INVALID_PAGE_ID;
                self.update_root_record(INVALID_PAGE_ID)?;
                debug!(index = %self.index_name, "tree emptied");
                return Ok(true);
            }
            return Ok(false);
        }

        if size == 1 {
            let child = { InternalPageRef::new(path[level].data()).child_at(0) };
            let state = tree
                .as_mut()
                .expect("tree mutex is held while the root is on the stack");
            state.root_page_id = child;
            self.update_root_record(child)?;
            self.reparent_held(child, INVALID_PAGE_ID, path, extra)?;
            debug!(index = %self.index_name, root = %child, "root collapsed");
            return Ok(true);
        }

        Ok(false)
    }

    /// Rewrites a child's parent pointer. The child may already be
    /// exclusively latched by this very operation, in which case the write
    /// goes through the held guard; otherwise the page is latched afresh.
    fn reparent_held(
        &self,
        child: PageId,
        parent: PageId,
        path: &mut [WritePageGuard],
        extra: &mut [WritePageGuard],
    ) -> Result<()> {
        for guard in path.iter_mut().chain(extra.iter_mut()) {
            if guard.page_id() == child {
                set_page_parent(guard.data_mut(), parent);
                return Ok(());
            }
        }

        let mut guard = self.bpm.write_page(child)?;
        set_page_parent(guard.data_mut(), parent);
        Ok(())
    }

    /// Publishes a root change to the registry on the header page.
    fn update_root_record(&self, root_page_id: PageId) -> Result<()> {
        let mut guard = self.bpm.write_page(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.update_record(&self.index_name, root_page_id)
            && !header.insert_record(&self.index_name, root_page_id)
        {
            return Err(BurrowError::RegistryFull);
        }
        Ok(())
    }
}
