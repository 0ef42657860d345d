use std::mem;

use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::base::BTreeIndex;
use crate::common::types::{PageId, Rid};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, IndexKey};

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Remove a `(key, rid)` pair. Returns whether it was present.
    pub fn remove(&self, key: &K, rid: &Rid) -> Result<bool, BTreeError> {
        let mut root = self.root_page_id.write();
        let entry = IndexKey::new(key.clone(), *rid);

        let (found, _) = self.remove_from(*root, &entry)?;
        if found {
            self.adjust_root(&mut root)?;
        }
        Ok(found)
    }

    /// Returns (found, node now underflows)
    fn remove_from(&self, page_id: PageId, entry: &IndexKey<K>) -> Result<(bool, bool), BTreeError> {
        let mut node = self.read_node(page_id)?;

        if node.is_leaf {
            if !node.remove_from_leaf(entry) {
                return Ok((false, false));
            }
            self.write_node(page_id, &node)?;
            return Ok((true, node.is_underflow(self.max_size)));
        }

        let child_index = node.find_child_index(entry);
        let (found, child_underflow) = self.remove_from(node.children[child_index], entry)?;
        if !child_underflow {
            return Ok((found, false));
        }

        self.coalesce_or_redistribute(page_id, &mut node, child_index)?;
        Ok((found, node.is_underflow(self.max_size)))
    }

    /// Fix an underflowing child of `parent`: borrow one entry from an
    /// adjacent sibling with spare entries, otherwise merge the pair.
    fn coalesce_or_redistribute(
        &self,
        parent_id: PageId,
        parent: &mut BTreeNode<K>,
        child_index: usize,
    ) -> Result<(), BTreeError> {
        if parent.children.len() < 2 {
            return Ok(());
        }

        // Prefer the left sibling; the leftmost child pairs with its right one
        let left_index = child_index.saturating_sub(1).min(parent.children.len() - 2);
        let right_index = left_index + 1;
        let left_id = parent.children[left_index];
        let right_id = parent.children[right_index];
        let mut left = self.read_node(left_id)?;
        let mut right = self.read_node(right_id)?;

        let min_size = BTreeNode::<K>::min_size(self.max_size);
        let underflow_is_right = child_index == right_index;
        let sibling_size = if underflow_is_right { left.size() } else { right.size() };

        if sibling_size > min_size {
            if underflow_is_right {
                Self::borrow_from_left(parent, left_index, &mut left, &mut right);
            } else {
                Self::borrow_from_right(parent, left_index, &mut left, &mut right);
            }
            self.write_node(left_id, &left)?;
            self.write_node(right_id, &right)?;
            self.write_node(parent_id, parent)?;
            return Ok(());
        }

        // Merge the right node into the left one
        let separator = parent.keys.remove(left_index);
        parent.children.remove(right_index);
        if left.is_leaf {
            left.keys.append(&mut right.keys);
            left.next_leaf = right.next_leaf;
        } else {
            left.keys.push(separator);
            left.keys.append(&mut right.keys);
            left.children.append(&mut right.children);
        }

        self.write_node(left_id, &left)?;
        self.write_node(parent_id, parent)?;
        self.buffer_pool.delete_page(right_id)?;
        debug!("B+Tree merged page {} into {}", right_id, left_id);
        Ok(())
    }

    fn borrow_from_left(parent: &mut BTreeNode<K>, sep_index: usize, left: &mut BTreeNode<K>, right: &mut BTreeNode<K>) {
        if left.is_leaf {
            if let Some(entry) = left.keys.pop() {
                right.keys.insert(0, entry);
                parent.keys[sep_index] = right.keys[0].clone();
            }
        } else if let (Some(key), Some(child)) = (left.keys.pop(), left.children.pop()) {
            let separator = mem::replace(&mut parent.keys[sep_index], key);
            right.keys.insert(0, separator);
            right.children.insert(0, child);
        }
    }

    fn borrow_from_right(parent: &mut BTreeNode<K>, sep_index: usize, left: &mut BTreeNode<K>, right: &mut BTreeNode<K>) {
        if right.is_leaf {
            let entry = right.keys.remove(0);
            left.keys.push(entry);
            parent.keys[sep_index] = right.keys[0].clone();
        } else {
            let key = right.keys.remove(0);
            let child = right.children.remove(0);
            let separator = mem::replace(&mut parent.keys[sep_index], key);
            left.keys.push(separator);
            left.children.push(child);
        }
    }

    /// Collapse internal roots left with a single child
    fn adjust_root(&self, root: &mut PageId) -> Result<(), BTreeError> {
        loop {
            let node = self.read_node(*root)?;
            if node.is_leaf || node.children.len() != 1 {
                return Ok(());
            }

            let old_root = *root;
            *root = node.children[0];
            self.buffer_pool.delete_page(old_root)?;
            debug!("B+Tree root {} collapsed into {}", old_root, *root);
        }
    }
}
