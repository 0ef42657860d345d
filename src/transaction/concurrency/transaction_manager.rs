use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::common::types::{Lsn, TxnId};
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IndexWriteKind, IsolationLevel, Result, TableWriteKind, Transaction, TransactionError,
    TransactionState, WriteRecord,
};
use crate::transaction::wal::log_manager::LogManager;
use crate::transaction::wal::log_record::LogRecordContent;

/// Transaction manager - responsible for creating, finishing and tracking transactions
pub struct TransactionManager {
    /// Next transaction ID to assign
    next_txn_id: AtomicU32,

    log_manager: Arc<LogManager>,
    lock_manager: Arc<LockManager>,

    /// Running transactions (txn_id -> Transaction)
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(log_manager: Arc<LogManager>, lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1), // Start from 1
            log_manager,
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction and log its `Begin` record
    pub fn begin(&self, isolation_level: IsolationLevel) -> Result<Arc<Transaction>> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));

        // Registered first so a concurrent checkpoint cannot miss it
        self.active_transactions.lock().insert(txn_id, Arc::clone(&txn));
        if let Err(e) = self.log_manager.append_txn_record(&txn, LogRecordContent::Begin) {
            self.active_transactions.lock().remove(&txn_id);
            return Err(e.into());
        }

        debug!("Began transaction {}", txn_id);
        Ok(txn)
    }

    /// Commit: the `Commit` record is durable before any lock is released.
    /// Space held for rollback is released afterwards, still under the
    /// transaction's locks.
    pub fn commit(&self, txn: &Transaction) -> Result<Lsn> {
        if txn.is_finished() || !txn.is_active() {
            return Err(TransactionError::InvalidState(txn.id()));
        }

        let lsn = self.log_manager.append_txn_record(txn, LogRecordContent::Commit)?;
        self.log_manager.flush(lsn)?;

        txn.mark_finished();
        txn.set_state(TransactionState::Committed);
        // Nothing left to undo
        drop(txn.take_write_set());
        self.reclaim_reserved(txn);
        self.lock_manager.release_all(txn);
        self.active_transactions.lock().remove(&txn.id());

        debug!("Committed transaction {} at LSN {}", txn.id(), lsn);
        Ok(lsn)
    }

    /// Abort: undo the write set newest first, log `Abort`, release locks.
    /// Also accepts a transaction the lock manager already marked aborted as
    /// a deadlock victim.
    ///
    /// If an undo step fails, the failed change and everything older stay
    /// in the write set and every lock stays held; calling `abort` again
    /// resumes where the last attempt stopped.
    pub fn abort(&self, txn: &Transaction) -> Result<Lsn> {
        if txn.is_finished() || txn.state() == TransactionState::Committed {
            return Err(TransactionError::InvalidState(txn.id()));
        }
        txn.set_state(TransactionState::Aborted);

        let mut undone = 0;
        while let Some(record) = txn.pop_write() {
            if let Err(e) = self.undo_write(txn, &record) {
                warn!("Rollback of transaction {} stopped at {:?}: {}", txn.id(), record, e);
                txn.push_write(record);
                return Err(e);
            }
            undone += 1;
        }

        self.reclaim_reserved(txn);
        let lsn = self.log_manager.append_txn_record(txn, LogRecordContent::Abort)?;
        txn.mark_finished();
        self.lock_manager.release_all(txn);
        self.active_transactions.lock().remove(&txn.id());

        info!("Aborted transaction {} after undoing {} changes", txn.id(), undone);
        Ok(lsn)
    }

    fn undo_write(&self, txn: &Transaction, record: &WriteRecord) -> Result<()> {
        match record {
            WriteRecord::Table { table, rid, kind, undo_next } => match kind {
                TableWriteKind::Insert => table.rollback_insert(txn, *rid, *undo_next)?,
                TableWriteKind::Delete => table.rollback_delete(txn, *rid, *undo_next)?,
                TableWriteKind::Update { old } => table.rollback_update(txn, *rid, old, *undo_next)?,
            },
            WriteRecord::Index { index, key, rid, kind } => match kind {
                IndexWriteKind::Insert => index.undo_insert(key, *rid)?,
                IndexWriteKind::Remove => index.undo_remove(key, *rid)?,
            },
        }
        Ok(())
    }

    /// Release rollback space of every slot the transaction deleted or
    /// updated. A failure only leaves the space held; restart recovery
    /// releases it.
    fn reclaim_reserved(&self, txn: &Transaction) {
        for (rid, table) in txn.take_reserved() {
            if let Err(e) = table.reclaim(txn, rid) {
                warn!("Transaction {} could not release space of {}: {}", txn.id(), rid, e);
            }
        }
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    pub fn transaction_exists(&self, txn_id: TxnId) -> bool {
        self.active_transactions.lock().contains_key(&txn_id)
    }

    /// Running transactions with the LSN of their latest record, by id
    pub fn active_transactions(&self) -> Vec<(TxnId, Lsn)> {
        let txns = self.active_transactions.lock();
        let mut active: Vec<(TxnId, Lsn)> = txns.values().map(|txn| (txn.id(), txn.prev_lsn())).collect();
        active.sort_unstable();
        active
    }

    /// Never hand out an id at or below one already in the log
    pub fn set_next_txn_id(&self, next: TxnId) {
        self.next_txn_id.fetch_max(next, Ordering::SeqCst);
    }

    pub fn next_txn_id(&self) -> TxnId {
        self.next_txn_id.load(Ordering::SeqCst)
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }
}
