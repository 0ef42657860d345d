use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use super::{CHILDREN_OFFSET_OFFSET, HEADER_SIZE, IS_LEAF_OFFSET, KEY_COUNT_OFFSET, NEXT_LEAF_OFFSET, RID_SIZE};
use crate::common::types::{COMMON_HEADER_SIZE, INVALID_PAGE_ID, PAGE_SIZE, Page};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;

/// Serialize a B+Tree node to a page.
///
/// The common header (page id, LSN) is preserved; everything after it is
/// rewritten. Fails with `NodeTooLarge` if the encoded node does not fit.
pub fn serialize_node<K>(node: &BTreeNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Serialize + Clone + Ord,
{
    if node.keys.len() > u16::MAX as usize {
        return Err(BTreeError::NodeTooLarge);
    }

    // Encode into a scratch buffer first so a failure leaves the page intact
    let mut body = [0u8; PAGE_SIZE];

    body[IS_LEAF_OFFSET] = u8::from(node.is_leaf);
    LittleEndian::write_u16(&mut body[KEY_COUNT_OFFSET..NEXT_LEAF_OFFSET], node.keys.len() as u16);
    LittleEndian::write_u32(
        &mut body[NEXT_LEAF_OFFSET..CHILDREN_OFFSET_OFFSET],
        node.next_leaf.unwrap_or(INVALID_PAGE_ID),
    );

    let mut offset = HEADER_SIZE;
    for entry in &node.keys {
        let key_bytes = bincode::serialize(&entry.key)
            .map_err(|e| BTreeError::SerializationError(e.to_string()))?;
        if key_bytes.len() > u16::MAX as usize || offset + 2 + key_bytes.len() + RID_SIZE > PAGE_SIZE {
            return Err(BTreeError::NodeTooLarge);
        }

        LittleEndian::write_u16(&mut body[offset..offset + 2], key_bytes.len() as u16);
        offset += 2;
        body[offset..offset + key_bytes.len()].copy_from_slice(&key_bytes);
        offset += key_bytes.len();
        LittleEndian::write_u32(&mut body[offset..offset + 4], entry.rid.page_id);
        LittleEndian::write_u32(&mut body[offset + 4..offset + RID_SIZE], entry.rid.slot);
        offset += RID_SIZE;
    }

    let children_offset = offset;
    if !node.is_leaf {
        if children_offset + node.children.len() * 4 > PAGE_SIZE {
            return Err(BTreeError::NodeTooLarge);
        }
        for child in &node.children {
            LittleEndian::write_u32(&mut body[offset..offset + 4], *child);
            offset += 4;
        }
    }
    LittleEndian::write_u16(
        &mut body[CHILDREN_OFFSET_OFFSET..HEADER_SIZE],
        children_offset as u16,
    );

    page.data[COMMON_HEADER_SIZE..].copy_from_slice(&body[COMMON_HEADER_SIZE..]);
    Ok(())
}
