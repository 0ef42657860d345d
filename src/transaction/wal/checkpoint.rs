use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, INVALID_LSN, INVALID_TXN_ID};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::transaction::concurrency::TransactionManager;
use crate::transaction::wal::log_manager::{LogManager, LogManagerError};
use crate::transaction::wal::log_record::{CheckpointContent, LogRecordContent};

/// Error type for checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Log manager error: {0}")]
    LogManagerError(#[from] LogManagerError),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
}

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Configuration for checkpoint behavior
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Minimum time between automatic checkpoints
    pub checkpoint_interval: Duration,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Takes checkpoints: everything dirty goes to disk, then a record with the
/// active-transaction and dirty-page tables is logged so analysis can start
/// there instead of at the head of the log.
pub struct CheckpointManager {
    buffer_pool: Arc<BufferPoolManager>,
    log_manager: Arc<LogManager>,
    config: CheckpointConfig,
    last_checkpoint: Mutex<Instant>,
}

impl CheckpointManager {
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        log_manager: Arc<LogManager>,
        config: CheckpointConfig,
    ) -> Self {
        Self {
            buffer_pool,
            log_manager,
            config,
            last_checkpoint: Mutex::new(Instant::now()),
        }
    }

    /// Whether the configured interval has passed since the last checkpoint
    pub fn is_due(&self) -> bool {
        self.last_checkpoint.lock().elapsed() >= self.config.checkpoint_interval
    }

    /// Take a checkpoint and return the LSN of its record.
    ///
    /// The begin LSN is read before pages are flushed, so any change that
    /// races with the flush is at or after it and analysis will see it.
    pub fn checkpoint(&self, txn_manager: &TransactionManager) -> Result<Lsn> {
        let begin_lsn = self.log_manager.next_lsn();

        self.log_manager.flush_all()?;
        self.buffer_pool.flush_all_pages()?;

        let content = CheckpointContent {
            begin_lsn,
            active_transactions: txn_manager.active_transactions(),
            dirty_pages: self.buffer_pool.dirty_page_table(),
        };
        let active = content.active_transactions.len();
        let dirty = content.dirty_pages.len();

        let lsn = self.log_manager.append_log_record(
            INVALID_TXN_ID,
            INVALID_LSN,
            LogRecordContent::Checkpoint(content),
        )?;
        self.log_manager.flush(lsn)?;
        *self.last_checkpoint.lock() = Instant::now();

        info!(
            "Checkpoint at LSN {} (begin {}, {} active transactions, {} dirty pages)",
            lsn, begin_lsn, active, dirty
        );
        Ok(lsn)
    }

    /// Take a checkpoint only when one is due
    pub fn maybe_checkpoint(&self, txn_manager: &TransactionManager) -> Result<Option<Lsn>> {
        if !self.is_due() {
            return Ok(None);
        }
        self.checkpoint(txn_manager).map(Some)
    }
}
