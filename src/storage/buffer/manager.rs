mod basic_operations;
mod frame_management;
mod wal_support;

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LRUReplacer;
use crate::storage::disk::DiskManager;
use crate::transaction::wal::log_manager::LogManager;

pub(crate) use frame_management::Frame;

/// Everything guarded by the pool-wide mutex
pub(crate) struct PoolState {
    pub(crate) page_table: HashMap<PageId, FrameId>,
    pub(crate) free_list: VecDeque<FrameId>,
    pub(crate) replacer: LRUReplacer,
    pub(crate) frames: Vec<Frame>,
}

/// Fixed-size cache of disk pages.
///
/// Frame bookkeeping (page table, free list, replacer, pin counts, dirty
/// flags) sits behind one mutex; page bytes sit behind a per-frame latch.
/// A page's latch is never held while the caller unpins that page, so the
/// pool may latch unpinned pages while holding its mutex.
pub struct BufferPoolManager {
    pub(crate) pool_size: usize,
    pub(crate) pages: Vec<PagePtr>,
    pub(crate) state: Mutex<PoolState>,
    pub(crate) disk_manager: Arc<DiskManager>,
    pub(crate) log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    /// Buffer pool over its own disk manager, without write-ahead logging
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, disk_manager, None))
    }

    /// Create a new buffer pool manager with WAL support
    pub fn new_with_wal(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Arc<LogManager>,
    ) -> Self {
        Self::with_disk_manager(pool_size, disk_manager, Some(log_manager))
    }

    pub fn with_disk_manager(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let mut pages = Vec::with_capacity(pool_size);
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = i as FrameId;
            pages.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            frames.push(Frame::new());
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            pages,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
                replacer: LRUReplacer::new(pool_size),
                frames,
            }),
            disk_manager,
            log_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Get a reference to the log manager, if available
    pub fn log_manager(&self) -> Option<Arc<LogManager>> {
        self.log_manager.clone()
    }

    /// Get a reference to the disk manager
    pub fn disk_manager(&self) -> Arc<DiskManager> {
        self.disk_manager.clone()
    }
}
