use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::common::types::{Lsn, PageId};
use crate::index::btree::{BTreeError, BTreeIndex};
use crate::index::hash::{HashIndex, HashIndexError};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::storage::table::{TableError, TableHeap};
use crate::transaction::concurrency::{
    IsolationLevel, LockManager, LockManagerConfig, Transaction, TransactionError, TransactionManager,
};
use crate::transaction::recovery::{RecoveryError, RecoveryManager, RecoveryStats};
use crate::transaction::wal::checkpoint::{CheckpointConfig, CheckpointError};
use crate::transaction::wal::log_manager::{LogManager, LogManagerConfig, LogManagerError};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Disk error: {0}")]
    DiskError(#[from] DiskManagerError),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),

    #[error("Log manager error: {0}")]
    LogManagerError(#[from] LogManagerError),

    #[error("Recovery error: {0}")]
    RecoveryError(#[from] RecoveryError),

    #[error("Checkpoint error: {0}")]
    CheckpointError(#[from] CheckpointError),

    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Table error: {0}")]
    TableError(#[from] TableError),

    #[error("Index error: {0}")]
    IndexError(#[from] BTreeError),

    #[error("Hash index error: {0}")]
    HashIndexError(#[from] HashIndexError),

    #[error("Failed to start background thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file; the log lives next to it with a `.log` suffix
    pub db_path: PathBuf,
    /// Buffer pool size in pages
    pub buffer_pool_size: usize,
    pub log: LogManagerConfig,
    pub lock: LockManagerConfig,
    pub checkpoint: CheckpointConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("keel.db"),
            buffer_pool_size: 1000,
            log: LogManagerConfig::default(),
            lock: LockManagerConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl DatabaseConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }
}

/// Database instance with all storage and transaction components wired together.
///
/// `close` checkpoints and stops the background threads. Dropping a
/// `Database` without closing it leaves dirty pages unwritten, exactly as a
/// crash would.
pub struct Database {
    disk_manager: Arc<DiskManager>,
    log_manager: Arc<LogManager>,
    buffer_pool: Arc<BufferPoolManager>,
    lock_manager: Arc<LockManager>,
    txn_manager: Arc<TransactionManager>,
    recovery: RecoveryManager,
    recovery_stats: RecoveryStats,
}

impl Database {
    /// Open (or create) a database, run crash recovery and take a checkpoint
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        info!("Opening database {:?}", config.db_path);

        let disk_manager = Arc::new(DiskManager::new(&config.db_path)?);
        let log_manager = Arc::new(LogManager::new(Arc::clone(&disk_manager), config.log.clone())?);
        let buffer_pool = Arc::new(BufferPoolManager::new_with_wal(
            config.buffer_pool_size,
            Arc::clone(&disk_manager),
            Arc::clone(&log_manager),
        ));
        let lock_manager = Arc::new(LockManager::new(config.lock.clone())?);
        let txn_manager = Arc::new(TransactionManager::new(Arc::clone(&log_manager), Arc::clone(&lock_manager)));

        let recovery = RecoveryManager::new(
            Arc::clone(&buffer_pool),
            Arc::clone(&log_manager),
            Arc::clone(&txn_manager),
            config.checkpoint.clone(),
        );
        let recovery_stats = recovery.start_recovery()?;
        recovery.checkpoint()?;

        info!(
            "Database open: {} pages, next LSN {}, next transaction {}",
            disk_manager.num_pages(),
            log_manager.next_lsn(),
            txn_manager.next_txn_id()
        );
        Ok(Self {
            disk_manager,
            log_manager,
            buffer_pool,
            lock_manager,
            txn_manager,
            recovery,
            recovery_stats,
        })
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.buffer_pool
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.txn_manager
    }

    /// What the recovery pass at open did
    pub fn recovery_stats(&self) -> &RecoveryStats {
        &self.recovery_stats
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Result<Arc<Transaction>> {
        Ok(self.txn_manager.begin(isolation_level)?)
    }

    /// Commit, then checkpoint if one is due. The commit is durable once
    /// its record is flushed, so a failed checkpoint is only logged.
    pub fn commit(&self, txn: &Transaction) -> Result<Lsn> {
        let lsn = self.txn_manager.commit(txn)?;
        if let Err(e) = self.recovery.maybe_checkpoint() {
            error!("Checkpoint after commit of transaction {} failed: {}", txn.id(), e);
        }
        Ok(lsn)
    }

    pub fn abort(&self, txn: &Transaction) -> Result<Lsn> {
        Ok(self.txn_manager.abort(txn)?)
    }

    /// Create an empty table; its first page id is the handle for `open_table`
    pub fn create_table(&self, txn: &Transaction) -> Result<Arc<TableHeap>> {
        Ok(TableHeap::create(
            Arc::clone(&self.buffer_pool),
            Arc::clone(&self.log_manager),
            Arc::clone(&self.lock_manager),
            txn,
        )?)
    }

    pub fn open_table(&self, first_page_id: PageId) -> Result<Arc<TableHeap>> {
        Ok(TableHeap::open(
            Arc::clone(&self.buffer_pool),
            Arc::clone(&self.log_manager),
            Arc::clone(&self.lock_manager),
            first_page_id,
        )?)
    }

    /// Create an empty B+Tree index sized for its key type
    pub fn create_index<K>(&self) -> Result<Arc<BTreeIndex<K>>>
    where
        K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        Ok(Arc::new(BTreeIndex::new(Arc::clone(&self.buffer_pool))?))
    }

    pub fn open_index<K>(&self, root_page_id: PageId, max_size: usize) -> Result<Arc<BTreeIndex<K>>>
    where
        K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        Ok(Arc::new(BTreeIndex::open(Arc::clone(&self.buffer_pool), root_page_id, max_size)?))
    }

    /// Create an empty hash index with `bucket_count` buckets
    pub fn create_hash_index<K>(&self, bucket_count: usize) -> Result<Arc<HashIndex<K>>>
    where
        K: Serialize + Send + Sync + 'static,
    {
        Ok(Arc::new(HashIndex::with_bucket_count(Arc::clone(&self.buffer_pool), bucket_count)?))
    }

    pub fn open_hash_index<K>(&self, directory_page_id: PageId) -> Result<Arc<HashIndex<K>>>
    where
        K: Serialize + Send + Sync + 'static,
    {
        Ok(Arc::new(HashIndex::open(Arc::clone(&self.buffer_pool), directory_page_id)?))
    }

    pub fn checkpoint(&self) -> Result<Lsn> {
        Ok(self.recovery.checkpoint()?)
    }

    /// Checkpoint, make the database file durable and stop background threads
    pub fn close(self) -> Result<()> {
        self.recovery.checkpoint()?;
        self.disk_manager.sync()?;
        self.lock_manager.shutdown();
        self.log_manager.shutdown();
        info!("Closed database {:?}", self.disk_manager.db_path());
        Ok(())
    }
}
