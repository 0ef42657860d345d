// KeelDB Storage Engine

pub mod common;
pub mod database;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use database::{Database, DatabaseConfig, DatabaseError};
pub use index::btree::{BTreeError, BTreeIndex};
pub use index::hash::{HashIndex, HashIndexError};
pub use storage::buffer::{BufferPoolError, BufferPoolManager};
pub use storage::disk::DiskManager;
pub use storage::page::{PageError, PageManager};
pub use storage::table::{TableError, TableHeap};
pub use transaction::{
    IsolationLevel, LockManager, LogManager, RecoveryManager, Transaction, TransactionError, TransactionManager,
};
