use std::collections::VecDeque;

use parking_lot::RwLockReadGuard;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::base::BTreeIndex;
use crate::common::types::{PageId, Rid};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::IndexKey;

/// Ordered scan over `(key, rid)` pairs following the leaf chain.
///
/// Holds the tree latch shared for its whole life, so the tree cannot be
/// modified while it is alive. Do not mutate the tree from the thread that
/// owns the iterator.
pub struct BTreeIterator<'a, K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    index: &'a BTreeIndex<K>,
    _latch: RwLockReadGuard<'a, PageId>,
    entries: VecDeque<IndexKey<K>>,
    next_leaf: Option<PageId>,
}

impl<K> Iterator for BTreeIterator<'_, K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Item = Result<(K, Rid), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.entries.pop_front() {
                return Some(Ok((entry.key, entry.rid)));
            }

            let page_id = self.next_leaf.take()?;
            match self.index.read_node(page_id) {
                Ok(leaf) => {
                    self.entries.extend(leaf.keys);
                    self.next_leaf = leaf.next_leaf;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Scan every entry in order
    pub fn iter(&self) -> Result<BTreeIterator<'_, K>, BTreeError> {
        let latch = self.root_page_id.read();
        let (_, leaf) = self.leftmost_leaf(*latch)?;
        Ok(BTreeIterator {
            index: self,
            _latch: latch,
            next_leaf: leaf.next_leaf,
            entries: leaf.keys.into(),
        })
    }

    /// Scan entries whose key is not less than `key`
    pub fn iter_from(&self, key: &K) -> Result<BTreeIterator<'_, K>, BTreeError> {
        let latch = self.root_page_id.read();
        let lower = IndexKey::new(key.clone(), Rid::MIN);
        let (_, mut leaf) = self.find_leaf(*latch, &lower)?;
        let start = leaf.lower_bound(&lower);
        let entries = leaf.keys.split_off(start);
        Ok(BTreeIterator {
            index: self,
            _latch: latch,
            next_leaf: leaf.next_leaf,
            entries: entries.into(),
        })
    }

    /// All entries with `low <= key <= high`, in order
    pub fn range_scan(&self, low: &K, high: &K) -> Result<Vec<(K, Rid)>, BTreeError> {
        let mut results = Vec::new();
        for item in self.iter_from(low)? {
            let (key, rid) = item?;
            if key > *high {
                break;
            }
            results.push((key, rid));
        }
        Ok(results)
    }
}
