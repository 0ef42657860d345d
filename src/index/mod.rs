pub mod btree;
pub mod hash;

pub use btree::{BTreeError, BTreeIndex, BTreeIterator};
pub use hash::{HashIndex, HashIndexError};
