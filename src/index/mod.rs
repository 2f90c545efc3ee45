pub mod btree_index;
pub mod btree_iterator;
pub mod btree_page;
pub mod key_comparator;

pub use btree_index::BPlusTree;
pub use btree_iterator::IndexIterator;
pub use btree_page::{
    BTreePageRef, InternalPage, InternalPageRef, LeafPage, LeafPageRef, INTERNAL_MAX_SIZE,
    LEAF_MAX_SIZE,
};
pub use key_comparator::{BytewiseComparator, IntegerComparator, KeyComparator};
