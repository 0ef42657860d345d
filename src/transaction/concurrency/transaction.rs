// KeelDB Transaction implementation
// Per-transaction state shared by the lock manager, log manager and table heap

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, Rid, TxnId, INVALID_LSN};
use crate::index::btree::BTreeError;
use crate::index::hash::HashIndexError;
use crate::storage::table::{TableError, TableHeap};
use crate::transaction::concurrency::lock_manager::LockError;
use crate::transaction::wal::log_manager::LogManagerError;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// No shared locks at all
    ReadUncommitted,
    /// Shared locks are dropped right after each read
    ReadCommitted,
    /// Shared locks are held until commit or abort
    #[default]
    RepeatableRead,
}

/// Transaction states. A transaction starts growing, moves to shrinking on
/// its first release, and ends committed or aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Errors that can occur during transaction processing
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} was chosen as a deadlock victim")]
    Deadlock(TxnId),

    #[error("Transaction {0} is already committed or aborted")]
    InvalidState(TxnId),

    #[error("Transaction {0} not found")]
    NotFound(TxnId),

    #[error("Lock error: {0}")]
    LockError(LockError),

    #[error("Log error: {0}")]
    LogError(#[from] LogManagerError),

    #[error("Table error: {0}")]
    TableError(#[from] TableError),

    #[error("Index error: {0}")]
    IndexError(#[from] BTreeError),

    #[error("Hash index error: {0}")]
    HashIndexError(#[from] HashIndexError),
}

impl From<LockError> for TransactionError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Deadlock(txn_id) => TransactionError::Deadlock(txn_id),
            other => TransactionError::LockError(other),
        }
    }
}

/// Result type for transaction operations
pub type Result<T> = std::result::Result<T, TransactionError>;

/// An index that can reverse entries made by an aborted transaction.
/// Keys are carried in their serialized form so one write set can hold
/// entries for indexes of different key types.
pub trait IndexUndo: Send + Sync {
    fn undo_insert(&self, key: &[u8], rid: Rid) -> Result<()>;
    fn undo_remove(&self, key: &[u8], rid: Rid) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableWriteKind {
    Insert,
    Delete,
    Update { old: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexWriteKind {
    Insert,
    Remove,
}

/// One change made by a transaction, replayed backwards on abort
pub enum WriteRecord {
    Table {
        table: Arc<TableHeap>,
        rid: Rid,
        kind: TableWriteKind,
        /// The transaction's previous LSN when the change was logged
        undo_next: Lsn,
    },
    Index {
        index: Arc<dyn IndexUndo>,
        key: Vec<u8>,
        rid: Rid,
        kind: IndexWriteKind,
    },
}

impl fmt::Debug for WriteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteRecord::Table { rid, kind, undo_next, .. } => f
                .debug_struct("Table")
                .field("rid", rid)
                .field("kind", kind)
                .field("undo_next", undo_next)
                .finish(),
            WriteRecord::Index { rid, kind, .. } => {
                f.debug_struct("Index").field("rid", rid).field("kind", kind).finish()
            }
        }
    }
}

/// Transaction - represents an active database transaction
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,

    /// LSN of the latest log record written by this transaction
    prev_lsn: AtomicU64,

    /// Set once commit or abort has run to completion
    finished: AtomicBool,

    shared_locks: Mutex<HashSet<Rid>>,
    exclusive_locks: Mutex<HashSet<Rid>>,
    write_set: Mutex<Vec<WriteRecord>>,

    /// Slots holding space for a possible rollback, released once the
    /// transaction ends
    reserved: Mutex<HashMap<Rid, Arc<TableHeap>>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            prev_lsn: AtomicU64::new(INVALID_LSN),
            finished: AtomicBool::new(false),
            shared_locks: Mutex::new(HashSet::new()),
            exclusive_locks: Mutex::new(HashSet::new()),
            write_set: Mutex::new(Vec::new()),
            reserved: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// Growing or shrinking
    pub fn is_active(&self) -> bool {
        matches!(self.state(), TransactionState::Growing | TransactionState::Shrinking)
    }

    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn.load(Ordering::SeqCst)
    }

    pub fn set_prev_lsn(&self, lsn: Lsn) {
        self.prev_lsn.store(lsn, Ordering::SeqCst);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Returns false when the transaction was already finished
    pub(crate) fn mark_finished(&self) -> bool {
        !self.finished.swap(true, Ordering::SeqCst)
    }

    pub fn is_shared_locked(&self, rid: &Rid) -> bool {
        self.shared_locks.lock().contains(rid)
    }

    pub fn is_exclusive_locked(&self, rid: &Rid) -> bool {
        self.exclusive_locks.lock().contains(rid)
    }

    pub fn shared_lock_set(&self) -> HashSet<Rid> {
        self.shared_locks.lock().clone()
    }

    pub fn exclusive_lock_set(&self) -> HashSet<Rid> {
        self.exclusive_locks.lock().clone()
    }

    pub(crate) fn add_shared_lock(&self, rid: Rid) {
        self.shared_locks.lock().insert(rid);
    }

    pub(crate) fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_locks.lock().insert(rid);
    }

    pub(crate) fn remove_shared_lock(&self, rid: &Rid) -> bool {
        self.shared_locks.lock().remove(rid)
    }

    pub(crate) fn remove_exclusive_lock(&self, rid: &Rid) -> bool {
        self.exclusive_locks.lock().remove(rid)
    }

    /// Drop both lock sets, returning every rid that was held
    pub(crate) fn take_all_locks(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self.shared_locks.lock().drain().collect();
        rids.extend(self.exclusive_locks.lock().drain());
        rids.sort();
        rids.dedup();
        rids
    }

    pub fn push_write(&self, record: WriteRecord) {
        self.write_set.lock().push(record);
    }

    pub fn write_count(&self) -> usize {
        self.write_set.lock().len()
    }

    /// Newest change not yet undone
    pub(crate) fn pop_write(&self) -> Option<WriteRecord> {
        self.write_set.lock().pop()
    }

    pub(crate) fn take_write_set(&self) -> Vec<WriteRecord> {
        std::mem::take(&mut *self.write_set.lock())
    }

    pub(crate) fn reserve(&self, rid: Rid, table: Arc<TableHeap>) {
        self.reserved.lock().insert(rid, table);
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved.lock().len()
    }

    /// Reserved slots in RID order
    pub(crate) fn take_reserved(&self) -> Vec<(Rid, Arc<TableHeap>)> {
        let mut reserved: Vec<_> = self.reserved.lock().drain().collect();
        reserved.sort_by_key(|(rid, _)| *rid);
        reserved
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("isolation_level", &self.isolation_level)
            .field("prev_lsn", &self.prev_lsn())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction() {
        let txn = Transaction::new(7, IsolationLevel::ReadCommitted);
        assert_eq!(txn.id(), 7);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.prev_lsn(), INVALID_LSN);
        assert!(txn.is_active());
        assert_eq!(txn.isolation_level(), IsolationLevel::ReadCommitted);
    }

    #[test]
    fn test_lock_sets() {
        let txn = Transaction::new(1, IsolationLevel::default());
        let a = Rid::new(1, 0);
        let b = Rid::new(1, 1);

        txn.add_shared_lock(a);
        txn.add_exclusive_lock(b);
        assert!(txn.is_shared_locked(&a));
        assert!(txn.is_exclusive_locked(&b));

        assert_eq!(txn.take_all_locks(), vec![a, b]);
        assert!(txn.shared_lock_set().is_empty());
        assert!(txn.exclusive_lock_set().is_empty());
    }

    #[test]
    fn test_mark_finished_once() {
        let txn = Transaction::new(1, IsolationLevel::default());
        assert!(!txn.is_finished());
        assert!(txn.mark_finished());
        assert!(!txn.mark_finished());
    }

    #[test]
    fn test_deadlock_lock_error_maps_to_deadlock() {
        let err: TransactionError = LockError::Deadlock(3).into();
        assert!(matches!(err, TransactionError::Deadlock(3)));

        let err: TransactionError = LockError::LockOnShrinking(3).into();
        assert!(matches!(err, TransactionError::LockError(_)));
    }
}
