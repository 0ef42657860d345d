pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;

pub use lock_manager::{LockError, LockManager, LockManagerConfig, LockMode, VictimPolicy};
pub use transaction::{
    IndexUndo, IndexWriteKind, IsolationLevel, TableWriteKind, Transaction, TransactionError,
    TransactionState, WriteRecord,
};
pub use transaction_manager::TransactionManager;
