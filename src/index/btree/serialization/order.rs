use std::mem;

use super::{HEADER_SIZE, RID_SIZE};
use crate::common::types::{PAGE_SIZE, PageId};

/// Smallest order that keeps the B+Tree shape rules meaningful
pub const MIN_BTREE_ORDER: usize = 3;

/// Calculate the order of the B+Tree based on key size.
///
/// Each slot costs a length prefix, the key, its RID and (in internal nodes)
/// a child pointer. Keys with heap data (e.g. `String`) are only estimated
/// by their inline size; inserts that overflow a page report `NodeTooLarge`.
pub fn calculate_btree_order<K>() -> usize {
    let slot_size = 2 + mem::size_of::<K>() + RID_SIZE + mem::size_of::<PageId>();
    // One slot of slack for the transient overflow entry before a split
    let order = (PAGE_SIZE - HEADER_SIZE) / slot_size - 1;
    order.max(MIN_BTREE_ORDER)
}
