use thiserror::Error;

use crate::common::types::Rid;
use crate::storage::buffer::BufferPoolError;
use crate::storage::page::PageError;
use crate::transaction::concurrency::lock_manager::LockError;
use crate::transaction::wal::log_manager::LogManagerError;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),

    #[error("Page error: {0}")]
    PageError(#[from] PageError),

    #[error("Lock error: {0}")]
    LockError(#[from] LockError),

    #[error("Log error: {0}")]
    LogError(#[from] LogManagerError),

    #[error("Tuple {0} not found")]
    TupleNotFound(Rid),

    #[error("Tuple of {0} bytes does not fit in a page")]
    TupleTooLarge(usize),
}

impl TableError {
    /// Whether the caller lost a deadlock and must abort
    pub fn is_deadlock(&self) -> bool {
        matches!(self, TableError::LockError(LockError::Deadlock(_)))
    }
}

pub type Result<T> = std::result::Result<T, TableError>;
