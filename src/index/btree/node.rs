use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, Rid};

/// A leaf entry or separator: the user key plus the RID it points at.
///
/// Ordering is by key, then RID, so equal keys with different RIDs stay
/// strictly ordered and a non-unique index behaves like a unique one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKey<K> {
    pub key: K,
    pub rid: Rid,
}

impl<K> IndexKey<K> {
    pub fn new(key: K, rid: Rid) -> Self {
        Self { key, rid }
    }
}

impl<K: Ord> PartialOrd for IndexKey<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for IndexKey<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then_with(|| self.rid.cmp(&other.rid))
    }
}

/// B+Tree node implementation
/// - Leaf nodes store sorted entries and a link to the next leaf
/// - Internal nodes store separators and child page ids (keys = children - 1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeNode<K> {
    pub is_leaf: bool,
    pub keys: Vec<IndexKey<K>>,
    pub children: Vec<PageId>,      // For internal nodes
    pub next_leaf: Option<PageId>,  // For leaf nodes
}

impl<K: Clone + Ord> BTreeNode<K> {
    pub fn new_leaf() -> Self {
        Self {
            is_leaf: true,
            keys: Vec::new(),
            children: Vec::new(),
            next_leaf: None,
        }
    }

    pub fn new_internal() -> Self {
        Self {
            is_leaf: false,
            keys: Vec::new(),
            children: Vec::new(),
            next_leaf: None,
        }
    }

    /// Entries for a leaf, children for an internal node
    pub fn size(&self) -> usize {
        if self.is_leaf {
            self.keys.len()
        } else {
            self.children.len()
        }
    }

    /// Smallest size a non-root node may have
    pub fn min_size(max_size: usize) -> usize {
        max_size.div_ceil(2)
    }

    pub fn is_overflow(&self, max_size: usize) -> bool {
        self.size() > max_size
    }

    pub fn is_underflow(&self, max_size: usize) -> bool {
        self.size() < Self::min_size(max_size)
    }

    /// Find the index of the child that should contain the entry
    pub fn find_child_index(&self, entry: &IndexKey<K>) -> usize {
        match self.keys.binary_search(entry) {
            Ok(i) => i + 1, // Separators are the first entry of their right subtree
            Err(i) => i,
        }
    }

    /// Position of the first entry not less than `entry`
    pub fn lower_bound(&self, entry: &IndexKey<K>) -> usize {
        match self.keys.binary_search(entry) {
            Ok(i) | Err(i) => i,
        }
    }

    /// Insert an entry into a leaf node.
    /// Returns false if the exact (key, rid) pair is already present.
    pub fn insert_into_leaf(&mut self, entry: IndexKey<K>) -> bool {
        debug_assert!(self.is_leaf, "insert_into_leaf called on non-leaf node");

        match self.keys.binary_search(&entry) {
            Ok(_) => false,
            Err(pos) => {
                self.keys.insert(pos, entry);
                true
            }
        }
    }

    /// Insert a separator and the child to its right, after child `child_index`
    pub fn insert_into_internal(&mut self, child_index: usize, separator: IndexKey<K>, right_child: PageId) {
        debug_assert!(!self.is_leaf, "insert_into_internal called on leaf node");

        self.keys.insert(child_index, separator);
        self.children.insert(child_index + 1, right_child);
    }

    /// Remove an entry from a leaf node
    /// Returns whether the entry was found and removed
    pub fn remove_from_leaf(&mut self, entry: &IndexKey<K>) -> bool {
        debug_assert!(self.is_leaf, "remove_from_leaf called on non-leaf node");

        match self.keys.binary_search(entry) {
            Ok(i) => {
                self.keys.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    /// Split an overflowing leaf. The new right node takes the upper half and
    /// inherits the next-leaf link; the caller points this node at it.
    /// Returns the new node and its first entry, the separator for the parent.
    pub fn split_leaf(&mut self) -> (Self, IndexKey<K>) {
        debug_assert!(self.is_leaf, "split_leaf called on non-leaf node");

        let split_point = self.keys.len() / 2;
        let mut new_node = Self::new_leaf();
        new_node.keys = self.keys.split_off(split_point);
        new_node.next_leaf = self.next_leaf;

        let separator = new_node.keys[0].clone();
        (new_node, separator)
    }

    /// Split an overflowing internal node. This node keeps the lower half of
    /// the children; the middle separator moves up to the parent.
    pub fn split_internal(&mut self) -> (Self, IndexKey<K>) {
        debug_assert!(!self.is_leaf, "split_internal called on leaf node");

        let left_children = self.children.len().div_ceil(2);
        let mut new_node = Self::new_internal();
        new_node.children = self.children.split_off(left_children);

        // The first key past the left half is the middle separator
        let mut upper = self.keys.split_off(left_children - 1);
        let middle = upper.remove(0);
        new_node.keys = upper;
        (new_node, middle)
    }

    /// Count the number of entries in a leaf node
    pub fn count(&self) -> usize {
        if self.is_leaf { self.keys.len() } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: i32) -> IndexKey<i32> {
        IndexKey::new(key, Rid::new(0, key as u32))
    }

    #[test]
    fn test_leaf_node_creation() {
        let node = BTreeNode::<i32>::new_leaf();
        assert!(node.is_leaf);
        assert!(node.keys.is_empty());
        assert!(node.children.is_empty());
        assert!(node.next_leaf.is_none());
        assert_eq!(node.size(), 0);
    }

    #[test]
    fn test_composite_ordering() {
        let a = IndexKey::new(5, Rid::new(1, 0));
        let b = IndexKey::new(5, Rid::new(1, 1));
        let c = IndexKey::new(6, Rid::MIN);
        assert!(a < b);
        assert!(b < c);
        assert!(IndexKey::new(5, Rid::MIN) <= a);
    }

    #[test]
    fn test_find_child_index() {
        // Create internal node with separators [10, 20, 30]
        let mut node = BTreeNode::<i32>::new_internal();
        node.keys = vec![entry(10), entry(20), entry(30)];
        node.children = vec![1, 2, 3, 4];

        assert_eq!(node.find_child_index(&entry(5)), 0);
        assert_eq!(node.find_child_index(&entry(15)), 1);
        assert_eq!(node.find_child_index(&entry(35)), 3);

        // Equal to a separator: the separator lives in its right subtree
        assert_eq!(node.find_child_index(&entry(20)), 2);

        // A search key with the smallest RID sorts before the separator
        assert_eq!(node.find_child_index(&IndexKey::new(20, Rid::MIN)), 1);
    }

    #[test]
    fn test_insert_into_leaf_rejects_exact_duplicate() {
        let mut node = BTreeNode::<i32>::new_leaf();
        assert!(node.insert_into_leaf(entry(10)));
        assert!(node.insert_into_leaf(entry(5)));
        assert!(!node.insert_into_leaf(entry(10)));

        // Same key, different rid
        assert!(node.insert_into_leaf(IndexKey::new(10, Rid::new(9, 9))));
        assert_eq!(node.keys.len(), 3);
        assert_eq!(node.keys[0], entry(5));
    }

    #[test]
    fn test_split_leaf() {
        let mut node = BTreeNode::<i32>::new_leaf();
        for key in 1..=5 {
            node.insert_into_leaf(entry(key));
        }
        node.next_leaf = Some(77);

        let (right, separator) = node.split_leaf();
        assert_eq!(node.keys, vec![entry(1), entry(2)]);
        assert_eq!(right.keys, vec![entry(3), entry(4), entry(5)]);
        assert_eq!(separator, entry(3));
        assert_eq!(right.next_leaf, Some(77));
    }

    #[test]
    fn test_split_internal() {
        // max_size 3 overflowed to 4 children
        let mut node = BTreeNode::<i32>::new_internal();
        node.keys = vec![entry(10), entry(20), entry(30)];
        node.children = vec![1, 2, 3, 4];

        let (right, middle) = node.split_internal();
        assert_eq!(node.keys, vec![entry(10)]);
        assert_eq!(node.children, vec![1, 2]);
        assert_eq!(middle, entry(20));
        assert_eq!(right.keys, vec![entry(30)]);
        assert_eq!(right.children, vec![3, 4]);

        assert!(!node.is_underflow(3));
        assert!(!right.is_underflow(3));
    }

    #[test]
    fn test_insert_into_internal() {
        let mut node = BTreeNode::<i32>::new_internal();
        node.children.push(100);

        node.insert_into_internal(0, entry(10), 110);
        node.insert_into_internal(0, entry(5), 105);
        assert_eq!(node.keys, vec![entry(5), entry(10)]);
        assert_eq!(node.children, vec![100, 105, 110]);
    }

    #[test]
    fn test_remove_and_underflow() {
        let mut node = BTreeNode::<i32>::new_leaf();
        for key in 1..=3 {
            node.insert_into_leaf(entry(key));
        }
        assert!(!node.is_underflow(4));
        assert!(node.remove_from_leaf(&entry(2)));
        assert!(!node.remove_from_leaf(&entry(2)));
        assert!(!node.is_underflow(4));
        assert!(node.remove_from_leaf(&entry(1)));
        assert!(node.is_underflow(4));
    }
}
