use std::marker::PhantomData;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;
use serde::Serialize;

use crate::common::types::{PageId, Rid};
use crate::index::hash::bucket::{
    BucketPage, DEFAULT_BUCKET_COUNT, MAX_BUCKET_COUNT, MAX_KEY_SIZE, bucket_head, directory_bucket_count,
    init_directory, set_bucket_head,
};
use crate::index::hash::error::HashIndexError;
use crate::storage::buffer::BufferPoolManager;
use crate::transaction::concurrency::transaction::Result as TxnResult;
use crate::transaction::concurrency::{IndexUndo, IndexWriteKind, Transaction, WriteRecord};

type Result<T> = std::result::Result<T, HashIndexError>;

/// Hash index mapping keys to record ids, for equality lookups.
///
/// A directory page holds the head page of every bucket; each bucket is a
/// chain of pages allocated on first insert. Keys are hashed and compared in
/// their bincode encoding. One latch per bucket guards its chain, so writers
/// to different buckets never wait on each other.
pub struct HashIndex<K> {
    buffer_pool: Arc<BufferPoolManager>,
    directory_page_id: PageId,
    bucket_count: usize,
    latches: Vec<RwLock<()>>,
    _phantom: PhantomData<K>,
}

impl<K> HashIndex<K>
where
    K: Serialize + Send + Sync + 'static,
{
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Result<Self> {
        Self::with_bucket_count(buffer_pool, DEFAULT_BUCKET_COUNT)
    }

    /// Create an empty index with a fixed number of buckets
    pub fn with_bucket_count(buffer_pool: Arc<BufferPoolManager>, bucket_count: usize) -> Result<Self> {
        if bucket_count == 0 || bucket_count > MAX_BUCKET_COUNT {
            return Err(HashIndexError::InvalidBucketCount(bucket_count, MAX_BUCKET_COUNT));
        }

        let (page, directory_page_id) = buffer_pool.new_page()?;
        init_directory(&mut page.write(), bucket_count);
        buffer_pool.unpin_page(directory_page_id, true)?;

        debug!("Created hash index with {} buckets, directory page {}", bucket_count, directory_page_id);
        Ok(Self::from_parts(buffer_pool, directory_page_id, bucket_count))
    }

    /// Open an index previously created in the same database file
    pub fn open(buffer_pool: Arc<BufferPoolManager>, directory_page_id: PageId) -> Result<Self> {
        let page = buffer_pool.fetch_page(directory_page_id)?;
        let bucket_count = directory_bucket_count(&page.read());
        buffer_pool.unpin_page(directory_page_id, false)?;
        Ok(Self::from_parts(buffer_pool, directory_page_id, bucket_count?))
    }

    fn from_parts(buffer_pool: Arc<BufferPoolManager>, directory_page_id: PageId, bucket_count: usize) -> Self {
        Self {
            buffer_pool,
            directory_page_id,
            bucket_count,
            latches: (0..bucket_count).map(|_| RwLock::new(())).collect(),
            _phantom: PhantomData,
        }
    }

    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Add `(key, rid)`; returns false if that exact pair is already present
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool> {
        self.insert_encoded(&encode_key(&key)?, rid)
    }

    /// Remove `(key, rid)`; returns false if it was not present
    pub fn remove(&self, key: &K, rid: Rid) -> Result<bool> {
        self.remove_encoded(&encode_key(key)?, rid)
    }

    /// Remove every entry for `key`, returning the record ids it mapped to
    pub fn remove_key(&self, key: &K) -> Result<Vec<Rid>> {
        let key = encode_key(key)?;
        let bucket = self.bucket_of(&key);
        let _latch = self.latches[bucket].write();

        let mut removed = Vec::new();
        let mut next = self.bucket_head(bucket)?;
        while let Some(page_id) = next {
            let mut node = self.read_bucket(page_id)?;
            next = node.next;
            let before = node.entries.len();
            node.entries.retain(|(k, rid)| {
                let hit = *k == key;
                if hit {
                    removed.push(*rid);
                }
                !hit
            });
            if node.entries.len() != before {
                self.write_bucket(page_id, &node)?;
            }
        }
        removed.sort();
        Ok(removed)
    }

    /// All record ids stored under `key`, in rid order
    pub fn get_value(&self, key: &K) -> Result<Vec<Rid>> {
        let key = encode_key(key)?;
        let bucket = self.bucket_of(&key);
        let _latch = self.latches[bucket].read();

        let mut rids = Vec::new();
        let mut next = self.bucket_head(bucket)?;
        while let Some(page_id) = next {
            let node = self.read_bucket(page_id)?;
            rids.extend(node.entries.iter().filter(|(k, _)| *k == key).map(|(_, rid)| *rid));
            next = node.next;
        }
        rids.sort();
        Ok(rids)
    }

    /// Number of entries across all buckets
    pub fn len(&self) -> Result<usize> {
        let mut total = 0;
        for bucket in 0..self.bucket_count {
            let _latch = self.latches[bucket].read();
            let mut next = self.bucket_head(bucket)?;
            while let Some(page_id) = next {
                let node = self.read_bucket(page_id)?;
                total += node.entries.len();
                next = node.next;
            }
        }
        Ok(total)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of pages in the chain of the bucket `key` hashes to
    pub fn chain_length(&self, key: &K) -> Result<usize> {
        let key = encode_key(key)?;
        let bucket = self.bucket_of(&key);
        let _latch = self.latches[bucket].read();

        let mut pages = 0;
        let mut next = self.bucket_head(bucket)?;
        while let Some(page_id) = next {
            pages += 1;
            next = self.read_bucket(page_id)?.next;
        }
        Ok(pages)
    }

    /// Insert under a transaction; an abort removes the entry again
    pub fn insert_with_txn(self: &Arc<Self>, txn: &Transaction, key: K, rid: Rid) -> Result<bool> {
        let key = encode_key(&key)?;
        let inserted = self.insert_encoded(&key, rid)?;
        if inserted {
            txn.push_write(WriteRecord::Index {
                index: Arc::clone(self) as Arc<dyn IndexUndo>,
                key,
                rid,
                kind: IndexWriteKind::Insert,
            });
        }
        Ok(inserted)
    }

    /// Remove under a transaction; an abort puts the entry back
    pub fn remove_with_txn(self: &Arc<Self>, txn: &Transaction, key: &K, rid: Rid) -> Result<bool> {
        let key = encode_key(key)?;
        let removed = self.remove_encoded(&key, rid)?;
        if removed {
            txn.push_write(WriteRecord::Index {
                index: Arc::clone(self) as Arc<dyn IndexUndo>,
                key,
                rid,
                kind: IndexWriteKind::Remove,
            });
        }
        Ok(removed)
    }

    fn bucket_of(&self, key: &[u8]) -> usize {
        crc32fast::hash(key) as usize % self.bucket_count
    }

    fn insert_encoded(&self, key: &[u8], rid: Rid) -> Result<bool> {
        if key.len() > MAX_KEY_SIZE {
            return Err(HashIndexError::KeyTooLarge(key.len()));
        }
        let bucket = self.bucket_of(key);
        let _latch = self.latches[bucket].write();

        // First page with room takes the entry; otherwise the chain grows at the tail
        let mut room = None;
        let mut tail = None;
        let mut next = self.bucket_head(bucket)?;
        while let Some(page_id) = next {
            let node = self.read_bucket(page_id)?;
            if node.contains(key, rid) {
                return Ok(false);
            }
            next = node.next;
            if room.is_none() && node.fits(key.len()) {
                room = Some((page_id, node));
            } else {
                tail = Some((page_id, node));
            }
        }

        match room {
            Some((page_id, mut node)) => {
                node.entries.push((key.to_vec(), rid));
                self.write_bucket(page_id, &node)?;
            }
            None => {
                let node = BucketPage { entries: vec![(key.to_vec(), rid)], next: None };
                let page_id = self.create_bucket(&node)?;
                match tail {
                    Some((tail_id, mut tail_node)) => {
                        tail_node.next = Some(page_id);
                        self.write_bucket(tail_id, &tail_node)?;
                    }
                    None => self.set_bucket_head(bucket, page_id)?,
                }
                debug!("Hash bucket {} grew to page {}", bucket, page_id);
            }
        }
        Ok(true)
    }

    fn remove_encoded(&self, key: &[u8], rid: Rid) -> Result<bool> {
        let bucket = self.bucket_of(key);
        let _latch = self.latches[bucket].write();

        let mut next = self.bucket_head(bucket)?;
        while let Some(page_id) = next {
            let mut node = self.read_bucket(page_id)?;
            if let Some(pos) = node.entries.iter().position(|(k, r)| k == key && *r == rid) {
                node.entries.remove(pos);
                self.write_bucket(page_id, &node)?;
                return Ok(true);
            }
            next = node.next;
        }
        Ok(false)
    }

    fn bucket_head(&self, bucket: usize) -> Result<Option<PageId>> {
        let page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let head = bucket_head(&page.read(), bucket);
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(head)
    }

    fn set_bucket_head(&self, bucket: usize, head: PageId) -> Result<()> {
        let page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        set_bucket_head(&mut page.write(), bucket, Some(head));
        self.buffer_pool.unpin_page(self.directory_page_id, true)?;
        Ok(())
    }

    fn read_bucket(&self, page_id: PageId) -> Result<BucketPage> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let node = BucketPage::read_from(&page.read());
        self.buffer_pool.unpin_page(page_id, false)?;
        node
    }

    fn write_bucket(&self, page_id: PageId, node: &BucketPage) -> Result<()> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let result = node.write_to(&mut page.write());
        self.buffer_pool.unpin_page(page_id, result.is_ok())?;
        result
    }

    fn create_bucket(&self, node: &BucketPage) -> Result<PageId> {
        let (page, page_id) = self.buffer_pool.new_page()?;
        let result = node.write_to(&mut page.write());
        self.buffer_pool.unpin_page(page_id, true)?;
        if let Err(e) = result {
            self.buffer_pool.delete_page(page_id)?;
            return Err(e);
        }
        Ok(page_id)
    }
}

fn encode_key<K: Serialize>(key: &K) -> Result<Vec<u8>> {
    bincode::serialize(key).map_err(|e| HashIndexError::SerializationError(e.to_string()))
}

impl<K> IndexUndo for HashIndex<K>
where
    K: Serialize + Send + Sync + 'static,
{
    fn undo_insert(&self, key: &[u8], rid: Rid) -> TxnResult<()> {
        self.remove_encoded(key, rid)?;
        Ok(())
    }

    fn undo_remove(&self, key: &[u8], rid: Rid) -> TxnResult<()> {
        self.insert_encoded(key, rid)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pool(size: usize) -> (Arc<BufferPoolManager>, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = BufferPoolManager::new(size, dir.path().join("hash.db")).unwrap();
        (Arc::new(pool), dir)
    }

    #[test]
    fn test_colliding_keys_stay_apart() {
        let (pool, _file) = pool(16);
        let index: HashIndex<u64> = HashIndex::with_bucket_count(pool, 1).unwrap();

        for key in 0..50u64 {
            assert!(index.insert(key, Rid::new(1, key as u32)).unwrap());
        }
        assert_eq!(index.get_value(&7).unwrap(), vec![Rid::new(1, 7)]);
        assert!(index.get_value(&50).unwrap().is_empty());
        assert_eq!(index.len().unwrap(), 50);
    }

    #[test]
    fn test_rejects_oversized_key() {
        let (pool, _file) = pool(8);
        let index: HashIndex<Vec<u8>> = HashIndex::new(pool).unwrap();

        let result = index.insert(vec![0u8; MAX_KEY_SIZE], Rid::new(1, 1));
        assert!(matches!(result, Err(HashIndexError::KeyTooLarge(_))));
    }
}
