use byteorder::{ByteOrder, LittleEndian};

use super::{IS_LEAF_OFFSET, KEY_COUNT_OFFSET, NEXT_LEAF_OFFSET, calculate_btree_order, deserialize_node, serialize_node};
use crate::common::types::{Page, Rid};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, IndexKey};

fn entry(key: i32, slot: u32) -> IndexKey<i32> {
    IndexKey::new(key, Rid::new(0, slot))
}

#[test]
fn test_calculate_btree_order() {
    let i32_order = calculate_btree_order::<i32>();
    let i64_order = calculate_btree_order::<i64>();
    let string_order = calculate_btree_order::<String>();

    // Larger keys give a smaller order
    assert!(i32_order >= i64_order);
    assert!(i64_order >= string_order);
    assert!(string_order >= 3);
}

#[test]
fn test_full_node_of_computed_order_fits() {
    let order = calculate_btree_order::<i64>();
    let mut node = BTreeNode::<i64>::new_leaf();
    for key in 0..=order as i64 {
        node.keys.push(IndexKey::new(key, Rid::new(1, key as u32)));
    }

    let mut page = Page::new(1);
    serialize_node(&node, &mut page).unwrap();
}

#[test]
fn test_serialize_deserialize_leaf_node() {
    let mut node = BTreeNode::<i32>::new_leaf();
    node.keys = vec![entry(5, 1005), entry(10, 1010), entry(15, 1015), entry(20, 1020)];
    node.next_leaf = Some(999);

    let mut page = Page::new(1);
    serialize_node(&node, &mut page).unwrap();
    let deserialized = deserialize_node::<i32>(&page).unwrap();

    assert_eq!(deserialized, node);
    assert!(deserialized.children.is_empty());
}

#[test]
fn test_serialize_deserialize_internal_node() {
    let mut node = BTreeNode::<i32>::new_internal();
    node.keys = vec![entry(10, 1), entry(20, 2), entry(30, 3)];
    node.children = vec![100, 200, 300, 400];

    let mut page = Page::new(2);
    serialize_node(&node, &mut page).unwrap();
    let deserialized = deserialize_node::<i32>(&page).unwrap();

    assert!(!deserialized.is_leaf);
    assert_eq!(deserialized.keys, node.keys);
    assert_eq!(deserialized.children, vec![100, 200, 300, 400]);
    assert_eq!(deserialized.next_leaf, None);
}

#[test]
fn test_serialize_deserialize_empty_leaf() {
    let node = BTreeNode::<i32>::new_leaf();

    let mut page = Page::new(3);
    serialize_node(&node, &mut page).unwrap();
    let deserialized = deserialize_node::<i32>(&page).unwrap();

    assert!(deserialized.is_leaf);
    assert!(deserialized.keys.is_empty());
    assert_eq!(deserialized.next_leaf, None);
}

#[test]
fn test_common_header_preserved() {
    let mut node = BTreeNode::<i32>::new_leaf();
    node.keys = vec![entry(1, 1)];

    let mut page = Page::new(4);
    page.set_lsn(77);
    serialize_node(&node, &mut page).unwrap();

    assert_eq!(page.lsn(), 77);
    assert_eq!(LittleEndian::read_u32(&page.data[0..4]), 4);
}

#[test]
fn test_string_keys() {
    let mut node = BTreeNode::<String>::new_leaf();
    node.keys = vec![
        IndexKey::new("apple".to_string(), Rid::new(0, 2001)),
        IndexKey::new("banana".to_string(), Rid::new(0, 2002)),
    ];
    node.next_leaf = Some(789);

    let mut page = Page::new(5);
    serialize_node(&node, &mut page).unwrap();
    let deserialized = deserialize_node::<String>(&page).unwrap();

    assert_eq!(deserialized, node);
}

#[test]
fn test_oversized_node_is_rejected_and_page_untouched() {
    let mut node = BTreeNode::<String>::new_leaf();
    for i in 0..4 {
        node.keys.push(IndexKey::new(format!("{i}{}", "x".repeat(1500)), Rid::new(0, i)));
    }

    let mut page = Page::new(6);
    let before = page.data;
    assert!(matches!(serialize_node(&node, &mut page), Err(BTreeError::NodeTooLarge)));
    assert_eq!(page.data[..], before[..]);
}

#[test]
fn test_garbage_page_is_rejected() {
    let mut page = Page::new(7);
    page.data[IS_LEAF_OFFSET] = 9;
    assert!(matches!(deserialize_node::<i32>(&page), Err(BTreeError::InvalidPageFormat)));

    let mut page = Page::new(8);
    page.data[IS_LEAF_OFFSET] = 1;
    LittleEndian::write_u16(&mut page.data[KEY_COUNT_OFFSET..NEXT_LEAF_OFFSET], 5000);
    assert!(deserialize_node::<i32>(&page).is_err());
}
