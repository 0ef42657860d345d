use byteorder::{ByteOrder, LittleEndian};
use serde::de::DeserializeOwned;

use super::{CHILDREN_OFFSET_OFFSET, HEADER_SIZE, IS_LEAF_OFFSET, KEY_COUNT_OFFSET, NEXT_LEAF_OFFSET, RID_SIZE};
use crate::common::types::{INVALID_PAGE_ID, PAGE_SIZE, Page, Rid};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, IndexKey};

/// Bounds-checked slice of the page body
fn bytes(page: &Page, offset: usize, len: usize) -> Result<&[u8], BTreeError> {
    page.data.get(offset..offset + len).ok_or(BTreeError::InvalidPageFormat)
}

/// Deserialize a B+Tree node from a page
pub fn deserialize_node<K>(page: &Page) -> Result<BTreeNode<K>, BTreeError>
where
    K: DeserializeOwned + Clone + Ord,
{
    let is_leaf = match page.data[IS_LEAF_OFFSET] {
        0 => false,
        1 => true,
        _ => return Err(BTreeError::InvalidPageFormat),
    };
    let key_count = LittleEndian::read_u16(&page.data[KEY_COUNT_OFFSET..NEXT_LEAF_OFFSET]) as usize;
    let next_leaf_val = LittleEndian::read_u32(&page.data[NEXT_LEAF_OFFSET..CHILDREN_OFFSET_OFFSET]);
    let next_leaf = (next_leaf_val != INVALID_PAGE_ID).then_some(next_leaf_val);
    let children_offset = LittleEndian::read_u16(&page.data[CHILDREN_OFFSET_OFFSET..HEADER_SIZE]) as usize;

    let mut offset = HEADER_SIZE;
    let mut keys = Vec::with_capacity(key_count);
    for _ in 0..key_count {
        let key_len = LittleEndian::read_u16(bytes(page, offset, 2)?) as usize;
        offset += 2;

        let key = bincode::deserialize(bytes(page, offset, key_len)?)
            .map_err(|e| BTreeError::DeserializationError(e.to_string()))?;
        offset += key_len;

        let rid_bytes = bytes(page, offset, RID_SIZE)?;
        let rid = Rid::new(
            LittleEndian::read_u32(&rid_bytes[0..4]),
            LittleEndian::read_u32(&rid_bytes[4..RID_SIZE]),
        );
        offset += RID_SIZE;

        keys.push(IndexKey::new(key, rid));
    }

    if children_offset != offset {
        return Err(BTreeError::InvalidPageFormat);
    }

    let mut children = Vec::new();
    if !is_leaf {
        let child_count = key_count + 1;
        if offset + child_count * 4 > PAGE_SIZE {
            return Err(BTreeError::InvalidPageFormat);
        }
        children.reserve(child_count);
        for _ in 0..child_count {
            children.push(LittleEndian::read_u32(&page.data[offset..offset + 4]));
            offset += 4;
        }
    }

    Ok(BTreeNode {
        is_leaf,
        keys,
        children,
        next_leaf,
    })
}
