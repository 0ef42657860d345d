use std::marker::PhantomData;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::common::types::{INVALID_PAGE_ID, PageId, Rid};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, IndexKey};
use crate::index::btree::serialization::{MIN_BTREE_ORDER, calculate_btree_order, deserialize_node, serialize_node};
use crate::storage::buffer::BufferPoolManager;
use crate::transaction::concurrency::transaction::Result as TxnResult;
use crate::transaction::concurrency::{IndexUndo, IndexWriteKind, Transaction, WriteRecord};

/// B+Tree index mapping keys to record ids.
///
/// The root page id sits behind an `RwLock` that doubles as the tree latch:
/// mutations hold it exclusively, lookups and iterators hold it shared.
/// Pages are pinned only while a single node is read or written.
pub struct BTreeIndex<K> {
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) root_page_id: RwLock<PageId>,
    pub(crate) max_size: usize,
    _phantom: PhantomData<K>,
}

/// Shape summary of a tree, gathered by a full walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BTreeStats {
    pub height: usize,
    pub entries: usize,
    pub leaf_nodes: usize,
    pub internal_nodes: usize,
    /// Smallest size of any non-root node, if there is one
    pub min_node_size: Option<usize>,
    pub max_node_size: usize,
    /// Whether every leaf sits at the same depth
    pub balanced: bool,
}

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create an empty tree with an order derived from the key size
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Result<Self, BTreeError> {
        Self::with_max_size(buffer_pool, calculate_btree_order::<K>())
    }

    /// Create an empty tree whose nodes hold at most `max_size` entries
    pub fn with_max_size(buffer_pool: Arc<BufferPoolManager>, max_size: usize) -> Result<Self, BTreeError> {
        check_order::<K>(max_size)?;

        let index = Self {
            buffer_pool,
            root_page_id: RwLock::new(INVALID_PAGE_ID),
            max_size,
            _phantom: PhantomData,
        };
        let root_page_id = index.create_node(&BTreeNode::new_leaf())?;
        *index.root_page_id.write() = root_page_id;

        debug!("Created B+Tree with root page {} and max size {}", root_page_id, max_size);
        Ok(index)
    }

    /// Reopen a tree from its root page
    pub fn open(buffer_pool: Arc<BufferPoolManager>, root_page_id: PageId, max_size: usize) -> Result<Self, BTreeError> {
        check_order::<K>(max_size)?;

        let index = Self {
            buffer_pool,
            root_page_id: RwLock::new(root_page_id),
            max_size,
            _phantom: PhantomData,
        };
        // Fail early on a page that is not a node
        index.read_node(root_page_id)?;
        Ok(index)
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// All record ids stored under `key`, in RID order
    pub fn get_value(&self, key: &K) -> Result<Vec<Rid>, BTreeError> {
        let root = self.root_page_id.read();
        let lower = IndexKey::new(key.clone(), Rid::MIN);
        let (_, mut leaf) = self.find_leaf(*root, &lower)?;
        let mut pos = leaf.lower_bound(&lower);

        let mut rids = Vec::new();
        loop {
            for entry in &leaf.keys[pos..] {
                if entry.key != *key {
                    return Ok(rids);
                }
                rids.push(entry.rid);
            }

            match leaf.next_leaf {
                Some(next) => {
                    leaf = self.read_node(next)?;
                    pos = 0;
                }
                None => return Ok(rids),
            }
        }
    }

    /// Number of levels, counting the root
    pub fn height(&self) -> Result<usize, BTreeError> {
        let root = self.root_page_id.read();
        let mut node = self.read_node(*root)?;
        let mut height = 1;
        while !node.is_leaf {
            node = self.read_node(node.children[0])?;
            height += 1;
        }
        Ok(height)
    }

    /// Number of entries, walking the leaf chain
    pub fn count(&self) -> Result<usize, BTreeError> {
        let root = self.root_page_id.read();
        let (_, mut leaf) = self.leftmost_leaf(*root)?;
        let mut count = leaf.count();
        while let Some(next) = leaf.next_leaf {
            leaf = self.read_node(next)?;
            count += leaf.count();
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool, BTreeError> {
        let root = self.root_page_id.read();
        let node = self.read_node(*root)?;
        Ok(node.is_leaf && node.keys.is_empty())
    }

    /// Walk every node and summarize the tree's shape
    pub fn stats(&self) -> Result<BTreeStats, BTreeError> {
        let root = self.root_page_id.read();
        let mut stats = BTreeStats { balanced: true, ..BTreeStats::default() };
        let mut leaf_depth = None;
        let mut stack = vec![(*root, 1usize)];

        while let Some((page_id, depth)) = stack.pop() {
            let node = self.read_node(page_id)?;
            if page_id != *root {
                let size = node.size();
                stats.min_node_size = Some(stats.min_node_size.map_or(size, |m| m.min(size)));
            }
            stats.max_node_size = stats.max_node_size.max(node.size());

            if node.is_leaf {
                stats.leaf_nodes += 1;
                stats.entries += node.keys.len();
                match leaf_depth {
                    None => leaf_depth = Some(depth),
                    Some(d) if d != depth => stats.balanced = false,
                    Some(_) => {}
                }
                stats.height = stats.height.max(depth);
            } else {
                stats.internal_nodes += 1;
                stack.extend(node.children.iter().map(|&child| (child, depth + 1)));
            }
        }
        Ok(stats)
    }

    /// Insert under a transaction; an abort removes the entry again
    pub fn insert_with_txn(self: &Arc<Self>, txn: &Transaction, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let key_bytes = encode_key(&key)?;
        let inserted = self.insert(key, rid)?;
        if inserted {
            txn.push_write(WriteRecord::Index {
                index: Arc::clone(self) as Arc<dyn IndexUndo>,
                key: key_bytes,
                rid,
                kind: IndexWriteKind::Insert,
            });
        }
        Ok(inserted)
    }

    /// Remove under a transaction; an abort puts the entry back
    pub fn remove_with_txn(self: &Arc<Self>, txn: &Transaction, key: &K, rid: Rid) -> Result<bool, BTreeError> {
        let removed = self.remove(key, &rid)?;
        if removed {
            txn.push_write(WriteRecord::Index {
                index: Arc::clone(self) as Arc<dyn IndexUndo>,
                key: encode_key(key)?,
                rid,
                kind: IndexWriteKind::Remove,
            });
        }
        Ok(removed)
    }

    /// Descend from `root` to the leaf that should hold `entry`
    pub(crate) fn find_leaf(&self, root: PageId, entry: &IndexKey<K>) -> Result<(PageId, BTreeNode<K>), BTreeError> {
        let mut page_id = root;
        loop {
            let node = self.read_node(page_id)?;
            if node.is_leaf {
                return Ok((page_id, node));
            }
            page_id = node.children[node.find_child_index(entry)];
        }
    }

    pub(crate) fn leftmost_leaf(&self, root: PageId) -> Result<(PageId, BTreeNode<K>), BTreeError> {
        let mut page_id = root;
        loop {
            let node = self.read_node(page_id)?;
            if node.is_leaf {
                return Ok((page_id, node));
            }
            page_id = node.children[0];
        }
    }

    /// Read a node; the page is unpinned before returning
    pub(crate) fn read_node(&self, page_id: PageId) -> Result<BTreeNode<K>, BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let node = {
            let page_guard = page.read();
            deserialize_node(&page_guard)
        };
        self.buffer_pool.unpin_page(page_id, false)?;
        node
    }

    pub(crate) fn write_node(&self, page_id: PageId, node: &BTreeNode<K>) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let result = {
            let mut page_guard = page.write();
            serialize_node(node, &mut page_guard)
        };
        self.buffer_pool.unpin_page(page_id, result.is_ok())?;
        result
    }

    /// Allocate a page and write `node` to it
    pub(crate) fn create_node(&self, node: &BTreeNode<K>) -> Result<PageId, BTreeError> {
        let (page, page_id) = self.buffer_pool.new_page()?;
        let result = {
            let mut page_guard = page.write();
            serialize_node(node, &mut page_guard)
        };
        self.buffer_pool.unpin_page(page_id, true)?;
        if let Err(e) = result {
            self.buffer_pool.delete_page(page_id)?;
            return Err(e);
        }
        Ok(page_id)
    }
}

/// Orders above what a page can hold would make full nodes unwritable
fn check_order<K>(max_size: usize) -> Result<(), BTreeError> {
    let limit = calculate_btree_order::<K>();
    if max_size < MIN_BTREE_ORDER || max_size > limit {
        return Err(BTreeError::InvalidOrder(max_size, limit));
    }
    Ok(())
}

fn encode_key<K: Serialize>(key: &K) -> Result<Vec<u8>, BTreeError> {
    bincode::serialize(key).map_err(|e| BTreeError::SerializationError(e.to_string()))
}

fn decode_key<K: DeserializeOwned>(bytes: &[u8]) -> Result<K, BTreeError> {
    bincode::deserialize(bytes).map_err(|e| BTreeError::DeserializationError(e.to_string()))
}

impl<K> IndexUndo for BTreeIndex<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn undo_insert(&self, key: &[u8], rid: Rid) -> TxnResult<()> {
        let key: K = decode_key(key)?;
        self.remove(&key, &rid)?;
        Ok(())
    }

    fn undo_remove(&self, key: &[u8], rid: Rid) -> TxnResult<()> {
        let key: K = decode_key(key)?;
        self.insert(key, rid)?;
        Ok(())
    }
}
