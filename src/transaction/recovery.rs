use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;

use crate::common::types::{Lsn, Page, PageId, Rid, TxnId, INVALID_LSN, INVALID_TXN_ID};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::page::{PageError, PageManager};
use crate::storage::table::{format_table_page, TupleChange};
use crate::transaction::concurrency::TransactionManager;
use crate::transaction::wal::checkpoint::{CheckpointConfig, CheckpointError, CheckpointManager};
use crate::transaction::wal::log_manager::{LogManager, LogManagerError};
use crate::transaction::wal::log_record::{CompensationAction, LogRecord, LogRecordContent};

/// Error type for recovery operations
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Log manager error: {0}")]
    LogManagerError(#[from] LogManagerError),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),

    #[error("Page error: {0}")]
    PageError(#[from] PageError),

    #[error("Checkpoint error: {0}")]
    CheckpointError(#[from] CheckpointError),

    #[error("Log record {0} referenced by an undo chain is missing")]
    MissingRecord(Lsn),
}

/// Result type for recovery operations
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Status of a transaction as reconstructed by analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Commit record seen
    Committed,
    /// Abort record seen; its rollback already completed
    Aborted,
    /// Neither: the transaction was running at crash time
    InProgress,
}

#[derive(Debug, Clone, Copy)]
struct TransactionInfo {
    last_lsn: Lsn,
    status: TransactionStatus,
}

/// What a recovery pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Well-formed records read from the log
    pub records_scanned: usize,
    /// LSN of the checkpoint analysis started from, if any
    pub checkpoint_lsn: Option<Lsn>,
    /// First LSN considered by redo
    pub redo_start_lsn: Lsn,
    /// Page changes actually reapplied
    pub redo_applied: usize,
    /// Transactions rolled back, in id order
    pub losers: Vec<TxnId>,
    /// Changes undone across all losers
    pub undone_changes: usize,
    /// Slots whose rollback space was still held by a finished transaction
    pub reclaimed_slots: usize,
    /// Highest transaction id found in the log
    pub max_txn_id: TxnId,
}

/// ARIES-style restart: analysis, redo, undo.
pub struct RecoveryManager {
    buffer_pool: Arc<BufferPoolManager>,
    log_manager: Arc<LogManager>,
    txn_manager: Arc<TransactionManager>,
    checkpoint_manager: CheckpointManager,
    page_manager: PageManager,
}

impl RecoveryManager {
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        log_manager: Arc<LogManager>,
        txn_manager: Arc<TransactionManager>,
        checkpoint_config: CheckpointConfig,
    ) -> Self {
        let checkpoint_manager =
            CheckpointManager::new(Arc::clone(&buffer_pool), Arc::clone(&log_manager), checkpoint_config);
        Self {
            buffer_pool,
            log_manager,
            txn_manager,
            checkpoint_manager,
            page_manager: PageManager::new(),
        }
    }

    /// Bring the database back to a state holding exactly the effects of
    /// committed transactions. Safe to run on a clean log, and safe to run
    /// again after a crash during recovery.
    pub fn start_recovery(&self) -> Result<RecoveryStats> {
        let records = self.log_manager.read_records_from(INVALID_LSN)?;
        let mut stats = RecoveryStats {
            records_scanned: records.len(),
            max_txn_id: records.iter().map(|r| r.txn_id).max().unwrap_or(INVALID_TXN_ID),
            ..RecoveryStats::default()
        };
        info!("Recovery started: {} log records", records.len());

        let (transactions, dirty_pages) = self.analysis(&records, &mut stats);
        info!(
            "Analysis done: {} transactions, {} dirty pages",
            transactions.len(),
            dirty_pages.len()
        );

        self.redo(&records, &dirty_pages, &mut stats)?;
        info!("Redo done: {} changes reapplied from LSN {}", stats.redo_applied, stats.redo_start_lsn);

        let losers: BTreeMap<TxnId, Lsn> = transactions
            .iter()
            .filter(|(_, info)| info.status == TransactionStatus::InProgress && info.last_lsn != INVALID_LSN)
            .map(|(&txn_id, info)| (txn_id, info.last_lsn))
            .collect();
        let mut last_lsn: HashMap<TxnId, Lsn> = HashMap::new();
        for record in &records {
            last_lsn.insert(record.txn_id, record.lsn);
        }
        self.undo(&records, losers, &mut last_lsn, &mut stats)?;
        info!(
            "Undo done: {} transactions rolled back, {} changes undone",
            stats.losers.len(),
            stats.undone_changes
        );

        self.release_reservations(&records, &mut last_lsn, &mut stats)?;
        self.log_manager.flush_all()?;
        if stats.reclaimed_slots > 0 {
            info!("Released rollback space of {} slots", stats.reclaimed_slots);
        }

        if stats.max_txn_id != INVALID_TXN_ID {
            self.txn_manager.set_next_txn_id(stats.max_txn_id + 1);
        }
        Ok(stats)
    }

    /// Write a checkpoint record
    pub fn checkpoint(&self) -> Result<Lsn> {
        Ok(self.checkpoint_manager.checkpoint(&self.txn_manager)?)
    }

    /// Write a checkpoint record if the configured interval has passed
    pub fn maybe_checkpoint(&self) -> Result<Option<Lsn>> {
        Ok(self.checkpoint_manager.maybe_checkpoint(&self.txn_manager)?)
    }

    /// Rebuild the transaction table and dirty page table, starting from the
    /// last checkpoint when there is one
    fn analysis(
        &self,
        records: &[LogRecord],
        stats: &mut RecoveryStats,
    ) -> (BTreeMap<TxnId, TransactionInfo>, BTreeMap<PageId, Lsn>) {
        let mut transactions = BTreeMap::new();
        let mut dirty_pages = BTreeMap::new();
        let mut start_lsn = INVALID_LSN;

        let checkpoint = records.iter().rev().find_map(|record| match &record.content {
            LogRecordContent::Checkpoint(content) => Some((record.lsn, content)),
            _ => None,
        });
        if let Some((lsn, content)) = checkpoint {
            debug!("Analysis starts at checkpoint {} (begin LSN {})", lsn, content.begin_lsn);
            stats.checkpoint_lsn = Some(lsn);
            start_lsn = content.begin_lsn;
            for &(txn_id, last_lsn) in &content.active_transactions {
                transactions.insert(txn_id, TransactionInfo { last_lsn, status: TransactionStatus::InProgress });
            }
            dirty_pages.extend(content.dirty_pages.iter().copied());
        }

        for record in records.iter().filter(|r| r.lsn >= start_lsn) {
            if record.txn_id != INVALID_TXN_ID {
                let info = transactions.entry(record.txn_id).or_insert(TransactionInfo {
                    last_lsn: record.lsn,
                    status: TransactionStatus::InProgress,
                });
                info.last_lsn = info.last_lsn.max(record.lsn);
                match record.content {
                    LogRecordContent::Commit => info.status = TransactionStatus::Committed,
                    LogRecordContent::Abort => info.status = TransactionStatus::Aborted,
                    _ => {}
                }
            }
            for page_id in record.content.touched_pages() {
                dirty_pages.entry(page_id).or_insert(record.lsn);
            }
        }

        // A checkpoint can list a transaction whose Commit or Abort was
        // logged just before the checkpoint's begin LSN
        let ended: HashMap<TxnId, TransactionStatus> = records
            .iter()
            .filter_map(|record| match record.content {
                LogRecordContent::Commit => Some((record.txn_id, TransactionStatus::Committed)),
                LogRecordContent::Abort => Some((record.txn_id, TransactionStatus::Aborted)),
                _ => None,
            })
            .collect();
        for (txn_id, info) in transactions.iter_mut() {
            if info.status == TransactionStatus::InProgress {
                if let Some(&status) = ended.get(txn_id) {
                    info.status = status;
                }
            }
        }

        (transactions, dirty_pages)
    }

    /// Repeat history: reapply every logged change a page does not yet reflect
    fn redo(&self, records: &[LogRecord], dirty_pages: &BTreeMap<PageId, Lsn>, stats: &mut RecoveryStats) -> Result<()> {
        let Some(&start_lsn) = dirty_pages.values().min() else {
            return Ok(());
        };
        stats.redo_start_lsn = start_lsn;

        for record in records.iter().filter(|r| r.lsn >= start_lsn) {
            for page_id in record.content.touched_pages() {
                match dirty_pages.get(&page_id) {
                    Some(&rec_lsn) if record.lsn >= rec_lsn => {}
                    _ => continue,
                }
                if self.redo_page(record, page_id)? {
                    stats.redo_applied += 1;
                }
            }
        }
        Ok(())
    }

    /// Returns whether the record was applied to the page
    fn redo_page(&self, record: &LogRecord, page_id: PageId) -> Result<bool> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let result = {
            let mut guard = page.write();
            if guard.lsn() >= record.lsn {
                Ok(false)
            } else {
                self.apply_redo(&mut guard, page_id, &record.content).map(|()| {
                    guard.set_lsn(record.lsn);
                    true
                })
            }
        };

        match result {
            Ok(true) => {
                self.buffer_pool.unpin_page_with_lsn(page_id, true, record.lsn)?;
                debug!("Redo LSN {} on page {}", record.lsn, page_id);
                Ok(true)
            }
            Ok(false) => {
                self.buffer_pool.unpin_page(page_id, false)?;
                Ok(false)
            }
            Err(e) => {
                self.buffer_pool.unpin_page(page_id, false)?;
                Err(e)
            }
        }
    }

    fn apply_redo(&self, page: &mut Page, page_id: PageId, content: &LogRecordContent) -> Result<()> {
        let pm = &self.page_manager;
        match content {
            LogRecordContent::Insert { rid, tuple } => TupleChange::Place(tuple).apply(pm, page, rid.slot)?,
            LogRecordContent::Delete { rid, .. } => TupleChange::MarkDelete.apply(pm, page, rid.slot)?,
            LogRecordContent::Update { rid, new_tuple, .. } => {
                TupleChange::Overwrite(new_tuple).apply(pm, page, rid.slot)?
            }
            LogRecordContent::Compensation { rid, action, .. } => {
                TupleChange::from_compensation(action).apply(pm, page, rid.slot)?
            }
            LogRecordContent::Reclaim { rid } => TupleChange::Reclaim.apply(pm, page, rid.slot)?,
            LogRecordContent::NewPage { page_id: new_page_id, prev_page_id } => {
                if page_id == *new_page_id {
                    format_table_page(pm, page, *prev_page_id);
                } else {
                    pm.set_next_page_id(page, Some(*new_page_id));
                }
            }
            LogRecordContent::Begin
            | LogRecordContent::Commit
            | LogRecordContent::Abort
            | LogRecordContent::Checkpoint(_) => {}
        }
        Ok(())
    }

    /// Roll back every loser, always undoing the highest outstanding LSN next
    fn undo(
        &self,
        records: &[LogRecord],
        losers: BTreeMap<TxnId, Lsn>,
        last_lsn: &mut HashMap<TxnId, Lsn>,
        stats: &mut RecoveryStats,
    ) -> Result<()> {
        let by_lsn: HashMap<Lsn, &LogRecord> = records.iter().map(|r| (r.lsn, r)).collect();
        let mut pending: BinaryHeap<(Lsn, TxnId)> = losers.iter().map(|(&txn, &lsn)| (lsn, txn)).collect();
        stats.losers = losers.keys().copied().collect();

        while let Some((lsn, txn_id)) = pending.pop() {
            let record = by_lsn.get(&lsn).ok_or(RecoveryError::MissingRecord(lsn))?;

            let undo = match &record.content {
                LogRecordContent::Insert { rid, .. } => Some((*rid, CompensationAction::RemoveTuple)),
                LogRecordContent::Delete { rid, .. } => Some((*rid, CompensationAction::RestoreTuple)),
                LogRecordContent::Update { rid, old_tuple, .. } => {
                    Some((*rid, CompensationAction::OverwriteTuple(old_tuple.clone())))
                }
                _ => None,
            };
            if let Some((rid, action)) = undo {
                let clr = LogRecordContent::Compensation { rid, undo_next_lsn: record.prev_lsn, action };
                self.log_and_apply(txn_id, last_lsn, rid, clr)?;
                stats.undone_changes += 1;
            }

            // Compensated work is skipped over; new-page records are kept
            let next = match &record.content {
                LogRecordContent::Compensation { undo_next_lsn, .. } => *undo_next_lsn,
                _ => record.prev_lsn,
            };

            if next != INVALID_LSN {
                pending.push((next, txn_id));
            } else {
                let prev = last_lsn.get(&txn_id).copied().unwrap_or(INVALID_LSN);
                let lsn = self.log_manager.append_log_record(txn_id, prev, LogRecordContent::Abort)?;
                last_lsn.insert(txn_id, lsn);
                debug!("Transaction {} rolled back by recovery", txn_id);
            }
        }
        Ok(())
    }

    /// After undo every transaction in the log has finished, so any slot
    /// still holding rollback space for its last deleter or updater can
    /// give it up. Covers a crash between `Commit` and the reclaims that
    /// follow it, and losers rolled back just now.
    fn release_reservations(
        &self,
        records: &[LogRecord],
        last_lsn: &mut HashMap<TxnId, Lsn>,
        stats: &mut RecoveryStats,
    ) -> Result<()> {
        let mut held: BTreeMap<Rid, TxnId> = BTreeMap::new();
        for record in records {
            match &record.content {
                LogRecordContent::Delete { rid, .. } | LogRecordContent::Update { rid, .. } => {
                    held.insert(*rid, record.txn_id);
                }
                LogRecordContent::Reclaim { rid } => {
                    if held.get(rid) == Some(&record.txn_id) {
                        held.remove(rid);
                    }
                }
                _ => {}
            }
        }

        for (rid, txn_id) in held {
            self.log_and_apply(txn_id, last_lsn, rid, LogRecordContent::Reclaim { rid })?;
            stats.reclaimed_slots += 1;
        }
        Ok(())
    }

    /// Apply a page change on behalf of `txn_id` and log it
    fn log_and_apply(
        &self,
        txn_id: TxnId,
        last_lsn: &mut HashMap<TxnId, Lsn>,
        rid: Rid,
        content: LogRecordContent,
    ) -> Result<()> {
        let prev = last_lsn.get(&txn_id).copied().unwrap_or(INVALID_LSN);
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let mut guard = page.write();
            self.apply_redo(&mut guard, rid.page_id, &content).and_then(|()| {
                let lsn = self.log_manager.append_log_record(txn_id, prev, content)?;
                guard.set_lsn(lsn);
                Ok(lsn)
            })
        };

        match result {
            Ok(lsn) => {
                self.buffer_pool.unpin_page_with_lsn(rid.page_id, true, lsn)?;
                last_lsn.insert(txn_id, lsn);
                Ok(())
            }
            Err(e) => {
                self.buffer_pool.unpin_page(rid.page_id, false)?;
                Err(e)
            }
        }
    }
}
