use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::base::BTreeIndex;
use crate::common::types::{PageId, Rid};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, IndexKey};

/// What happened below a node during an insert
enum InsertOutcome<K> {
    Duplicate,
    Done,
    /// The child split: push this separator and right sibling into the parent
    Split(IndexKey<K>, PageId),
}

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Insert a `(key, rid)` pair. Returns false if the pair already exists.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let mut root = self.root_page_id.write();
        let entry = IndexKey::new(key, rid);

        match self.insert_into(*root, entry)? {
            InsertOutcome::Duplicate => Ok(false),
            InsertOutcome::Done => Ok(true),
            InsertOutcome::Split(separator, right_id) => {
                let mut new_root = BTreeNode::new_internal();
                new_root.keys.push(separator);
                new_root.children = vec![*root, right_id];
                let new_root_id = self.create_node(&new_root)?;

                debug!("B+Tree root split: {} -> new root {}", *root, new_root_id);
                *root = new_root_id;
                Ok(true)
            }
        }
    }

    fn insert_into(&self, page_id: PageId, entry: IndexKey<K>) -> Result<InsertOutcome<K>, BTreeError> {
        let mut node = self.read_node(page_id)?;

        if node.is_leaf {
            if !node.insert_into_leaf(entry) {
                return Ok(InsertOutcome::Duplicate);
            }
            if !node.is_overflow(self.max_size) {
                self.write_node(page_id, &node)?;
                return Ok(InsertOutcome::Done);
            }

            // The right half is written before the left links to it
            let (right, separator) = node.split_leaf();
            let right_id = self.create_node(&right)?;
            node.next_leaf = Some(right_id);
            self.write_node(page_id, &node)?;
            return Ok(InsertOutcome::Split(separator, right_id));
        }

        let child_index = node.find_child_index(&entry);
        match self.insert_into(node.children[child_index], entry)? {
            InsertOutcome::Split(separator, right_id) => {
                self.insert_into_parent(page_id, node, child_index, separator, right_id)
            }
            outcome => Ok(outcome),
        }
    }

    /// Add a split child's separator to its parent, splitting the parent in turn if it overflows
    fn insert_into_parent(
        &self,
        page_id: PageId,
        mut node: BTreeNode<K>,
        child_index: usize,
        separator: IndexKey<K>,
        right_id: PageId,
    ) -> Result<InsertOutcome<K>, BTreeError> {
        node.insert_into_internal(child_index, separator, right_id);
        if !node.is_overflow(self.max_size) {
            self.write_node(page_id, &node)?;
            return Ok(InsertOutcome::Done);
        }

        let (right, middle) = node.split_internal();
        let new_id = self.create_node(&right)?;
        self.write_node(page_id, &node)?;
        Ok(InsertOutcome::Split(middle, new_id))
    }
}
