mod decoding;
mod encoding;
mod order;
#[cfg(test)]
mod tests;

pub use decoding::deserialize_node;
pub use encoding::serialize_node;
pub use order::{MIN_BTREE_ORDER, calculate_btree_order};

use crate::common::types::COMMON_HEADER_SIZE;

// Node header, after the common page header:
// - is_leaf: u8
// - key_count: u16
// - next_leaf: u32 (INVALID_PAGE_ID if None)
// - children_offset: u16
pub(crate) const IS_LEAF_OFFSET: usize = COMMON_HEADER_SIZE;
pub(crate) const KEY_COUNT_OFFSET: usize = IS_LEAF_OFFSET + 1;
pub(crate) const NEXT_LEAF_OFFSET: usize = KEY_COUNT_OFFSET + 2;
pub(crate) const CHILDREN_OFFSET_OFFSET: usize = NEXT_LEAF_OFFSET + 4;
pub(crate) const HEADER_SIZE: usize = CHILDREN_OFFSET_OFFSET + 2;

/// Bytes of an encoded RID following each key
pub(crate) const RID_SIZE: usize = 8;
