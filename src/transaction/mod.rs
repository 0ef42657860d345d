pub mod concurrency;
pub mod recovery;
pub mod wal;

pub use concurrency::{
    IsolationLevel, LockError, LockManager, LockManagerConfig, Transaction, TransactionError, TransactionManager,
    TransactionState, VictimPolicy,
};
pub use recovery::{RecoveryError, RecoveryManager, RecoveryStats};
pub use wal::{LogManager, LogManagerConfig, LogRecord, LogRecordContent, LogRecordType};
