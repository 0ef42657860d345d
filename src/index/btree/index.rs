mod base;
mod deletion;
mod insertion;
mod iterator;

pub use base::{BTreeIndex, BTreeStats};
pub use iterator::BTreeIterator;
