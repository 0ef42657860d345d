use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::common::types::{Lsn, Page, PageId, Rid, INVALID_PAGE_ID};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::layout::MAX_RECORD_SIZE;
use crate::storage::page::{PageError, PageManager};
use crate::storage::table::error::{Result, TableError};
use crate::storage::table::iterator::TableIterator;
use crate::transaction::concurrency::{
    IsolationLevel, LockManager, TableWriteKind, Transaction, WriteRecord,
};
use crate::transaction::wal::log_manager::LogManager;
use crate::transaction::wal::log_record::{CompensationAction, LogRecordContent};

/// Physical change to one tuple slot, shared by normal operation, rollback
/// and recovery
#[derive(Debug, Clone, Copy)]
pub enum TupleChange<'a> {
    /// Fill the slot with a new tuple
    Place(&'a [u8]),
    /// Hide the tuple but keep its bytes (delete)
    MarkDelete,
    /// Unhide a tuple hidden by `MarkDelete` (undo of a delete)
    Restore,
    /// Free the slot (undo of an insert)
    Remove,
    /// Replace the bytes of a live slot
    Overwrite(&'a [u8]),
    /// Give up space held for rollback
    Reclaim,
}

impl<'a> TupleChange<'a> {
    pub fn from_compensation(action: &'a CompensationAction) -> Self {
        match action {
            CompensationAction::RemoveTuple => TupleChange::Remove,
            CompensationAction::RestoreTuple => TupleChange::Restore,
            CompensationAction::OverwriteTuple(tuple) => TupleChange::Overwrite(tuple),
        }
    }

    pub fn apply(self, pm: &PageManager, page: &mut Page, slot: u32) -> std::result::Result<(), PageError> {
        match self {
            TupleChange::Place(data) => pm.insert_record_at(page, slot, data),
            TupleChange::MarkDelete => pm.mark_delete(page, slot),
            TupleChange::Restore => pm.rollback_delete(page, slot),
            TupleChange::Remove => pm.delete_record(page, slot),
            TupleChange::Overwrite(data) => pm.update_record(page, slot, data),
            TupleChange::Reclaim => pm.reclaim_record(page, slot),
        }
    }
}

/// Format `page_id` as an empty table page linked after `prev_page_id`
pub fn format_table_page(pm: &PageManager, page: &mut Page, prev_page_id: PageId) {
    pm.init_page(page);
    let prev = (prev_page_id != INVALID_PAGE_ID).then_some(prev_page_id);
    pm.set_prev_page_id(page, prev);
}

/// A table stored as a doubly linked list of slotted pages.
///
/// Every change follows the same order: exclusive record lock, page latch,
/// log append, apply, page LSN stamp, unlatch, unpin with the LSN.
pub struct TableHeap {
    buffer_pool: Arc<BufferPoolManager>,
    log_manager: Arc<LogManager>,
    lock_manager: Arc<LockManager>,
    page_manager: PageManager,
    first_page_id: PageId,
    /// Held while the heap grows so only one thread extends it
    last_page_id: Mutex<PageId>,
}

impl TableHeap {
    /// Create a table with one empty page
    pub fn create(
        buffer_pool: Arc<BufferPoolManager>,
        log_manager: Arc<LogManager>,
        lock_manager: Arc<LockManager>,
        txn: &Transaction,
    ) -> Result<Arc<Self>> {
        let page_manager = PageManager::new();
        let (page, page_id) = buffer_pool.new_page()?;

        let logged = {
            let mut guard = page.write();
            log_manager
                .append_txn_record(txn, LogRecordContent::NewPage { page_id, prev_page_id: INVALID_PAGE_ID })
                .map(|lsn| {
                    format_table_page(&page_manager, &mut guard, INVALID_PAGE_ID);
                    guard.set_lsn(lsn);
                    lsn
                })
        };
        let lsn = match logged {
            Ok(lsn) => lsn,
            Err(e) => {
                buffer_pool.unpin_page(page_id, false)?;
                return Err(e.into());
            }
        };
        buffer_pool.unpin_page_with_lsn(page_id, true, lsn)?;

        debug!("Created table heap at page {}", page_id);
        Ok(Arc::new(Self {
            buffer_pool,
            log_manager,
            lock_manager,
            page_manager,
            first_page_id: page_id,
            last_page_id: Mutex::new(page_id),
        }))
    }

    /// Open an existing table by its first page
    pub fn open(
        buffer_pool: Arc<BufferPoolManager>,
        log_manager: Arc<LogManager>,
        lock_manager: Arc<LockManager>,
        first_page_id: PageId,
    ) -> Result<Arc<Self>> {
        let heap = Self {
            buffer_pool,
            log_manager,
            lock_manager,
            page_manager: PageManager::new(),
            first_page_id,
            last_page_id: Mutex::new(first_page_id),
        };

        let mut last = first_page_id;
        while let Some(next) = heap.with_page(last, |page| Ok(heap.page_manager.next_page_id(page)))? {
            last = next;
        }
        *heap.last_page_id.lock() = last;

        Ok(Arc::new(heap))
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    pub fn last_page_id(&self) -> PageId {
        *self.last_page_id.lock()
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.buffer_pool
    }

    /// Insert a tuple into the last page, growing the heap when it is full
    pub fn insert_tuple(self: &Arc<Self>, txn: &Transaction, data: &[u8]) -> Result<Rid> {
        if data.is_empty() {
            return Err(PageError::EmptyRecord.into());
        }
        if data.len() > MAX_RECORD_SIZE {
            return Err(TableError::TupleTooLarge(data.len()));
        }

        loop {
            let page_id = self.last_page_id();
            let placed = self.with_page_mut(page_id, |page| {
                if !self.page_manager.can_insert(page, data.len()) {
                    return Ok((None, None));
                }
                // Fresh slot indices are never locked by anyone else, so
                // this cannot block while the latch is held
                let rid = Rid::new(page_id, self.page_manager.slot_count(page));
                self.lock_manager.lock_exclusive(txn, rid)?;

                let undo_next = txn.prev_lsn();
                let lsn = self
                    .log_manager
                    .append_txn_record(txn, LogRecordContent::Insert { rid, tuple: data.to_vec() })?;
                TupleChange::Place(data).apply(&self.page_manager, page, rid.slot)?;
                page.set_lsn(lsn);
                Ok((Some((rid, undo_next)), Some(lsn)))
            })?;

            if let Some((rid, undo_next)) = placed {
                self.record_write(txn, rid, TableWriteKind::Insert, undo_next);
                return Ok(rid);
            }
            self.extend(txn, page_id)?;
        }
    }

    /// Mark a tuple deleted. Its bytes stay reserved on the page until the
    /// transaction ends, so an abort can always bring it back.
    pub fn delete_tuple(self: &Arc<Self>, txn: &Transaction, rid: Rid) -> Result<()> {
        self.check_slot(rid)?;
        self.lock_manager.lock_exclusive(txn, rid)?;

        let undo_next = self.with_page_mut(rid.page_id, |page| {
            let old = self.live_tuple(page, rid)?;
            let undo_next = txn.prev_lsn();
            let lsn = self
                .log_manager
                .append_txn_record(txn, LogRecordContent::Delete { rid, tuple: old })?;
            TupleChange::MarkDelete.apply(&self.page_manager, page, rid.slot)?;
            page.set_lsn(lsn);
            Ok((undo_next, Some(lsn)))
        })?;

        self.record_write(txn, rid, TableWriteKind::Delete, undo_next);
        Ok(())
    }

    /// Replace a tuple's bytes in place. Fails with `InsufficientSpace`
    /// when the page cannot hold the new version. A shrinking update keeps
    /// the old footprint reserved until the transaction ends.
    pub fn update_tuple(self: &Arc<Self>, txn: &Transaction, rid: Rid, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(PageError::EmptyRecord.into());
        }
        self.check_slot(rid)?;
        self.lock_manager.lock_exclusive(txn, rid)?;

        let (old, undo_next) = self.with_page_mut(rid.page_id, |page| {
            let old = self.live_tuple(page, rid)?;
            if !self.page_manager.can_update(page, rid.slot, data.len()) {
                return Err(PageError::InsufficientSpace.into());
            }
            let undo_next = txn.prev_lsn();
            let lsn = self.log_manager.append_txn_record(
                txn,
                LogRecordContent::Update { rid, old_tuple: old.clone(), new_tuple: data.to_vec() },
            )?;
            TupleChange::Overwrite(data).apply(&self.page_manager, page, rid.slot)?;
            page.set_lsn(lsn);
            Ok(((old, undo_next), Some(lsn)))
        })?;

        self.record_write(txn, rid, TableWriteKind::Update { old }, undo_next);
        Ok(())
    }

    /// Read a tuple under the locking rules of the transaction's isolation level
    pub fn get_tuple(&self, txn: &Transaction, rid: Rid) -> Result<Vec<u8>> {
        self.check_slot(rid)?;

        let already_locked = txn.is_shared_locked(&rid) || txn.is_exclusive_locked(&rid);
        let isolation = txn.isolation_level();
        if isolation != IsolationLevel::ReadUncommitted {
            self.lock_manager.lock_shared(txn, rid)?;
        }

        let result = self.with_page(rid.page_id, |page| self.live_tuple(page, rid));

        if isolation == IsolationLevel::ReadCommitted && !already_locked {
            self.lock_manager.unlock(txn, rid)?;
        }
        result
    }

    /// Iterate over live tuples in RID order
    pub fn iter<'a>(&'a self, txn: &'a Transaction) -> TableIterator<'a> {
        TableIterator::new(self, txn)
    }

    /// Undo an insert by emptying its slot
    pub fn rollback_insert(&self, txn: &Transaction, rid: Rid, undo_next: Lsn) -> Result<()> {
        self.compensate(txn, rid, undo_next, CompensationAction::RemoveTuple)
    }

    /// Undo a delete by clearing the slot's delete mark
    pub fn rollback_delete(&self, txn: &Transaction, rid: Rid, undo_next: Lsn) -> Result<()> {
        self.compensate(txn, rid, undo_next, CompensationAction::RestoreTuple)
    }

    /// Undo an update by restoring the old bytes
    pub fn rollback_update(&self, txn: &Transaction, rid: Rid, old: &[u8], undo_next: Lsn) -> Result<()> {
        self.compensate(txn, rid, undo_next, CompensationAction::OverwriteTuple(old.to_vec()))
    }

    fn compensate(&self, txn: &Transaction, rid: Rid, undo_next: Lsn, action: CompensationAction) -> Result<()> {
        self.with_page_mut(rid.page_id, |page| {
            TupleChange::from_compensation(&action).apply(&self.page_manager, page, rid.slot)?;
            let lsn = self.log_manager.append_txn_record(
                txn,
                LogRecordContent::Compensation { rid, undo_next_lsn: undo_next, action: action.clone() },
            )?;
            page.set_lsn(lsn);
            Ok(((), Some(lsn)))
        })?;
        debug!("Transaction {} rolled back change to {}", txn.id(), rid);
        Ok(())
    }

    /// Release the space `rid` held for rollback. Called for every deleted
    /// or updated slot once the transaction's outcome is settled.
    pub fn reclaim(&self, txn: &Transaction, rid: Rid) -> Result<()> {
        self.with_page_mut(rid.page_id, |page| {
            let lsn = self.log_manager.append_txn_record(txn, LogRecordContent::Reclaim { rid })?;
            TupleChange::Reclaim.apply(&self.page_manager, page, rid.slot)?;
            page.set_lsn(lsn);
            Ok(((), Some(lsn)))
        })
    }

    /// Link a new page after `full_page_id`, unless another thread already did.
    /// The full page stays latched while the new-page record is appended so
    /// its LSN only moves forward.
    fn extend(&self, txn: &Transaction, full_page_id: PageId) -> Result<()> {
        let mut last = self.last_page_id.lock();
        if *last != full_page_id {
            return Ok(());
        }

        let new_page_id = self.with_page_mut(full_page_id, |prev| {
            let (page, new_page_id) = self.buffer_pool.new_page()?;
            let logged = {
                let mut guard = page.write();
                let result = self.log_manager.append_txn_record(
                    txn,
                    LogRecordContent::NewPage { page_id: new_page_id, prev_page_id: full_page_id },
                );
                if let Ok(lsn) = result {
                    format_table_page(&self.page_manager, &mut guard, full_page_id);
                    guard.set_lsn(lsn);
                }
                result
            };

            match logged {
                Ok(lsn) => {
                    self.page_manager.set_next_page_id(prev, Some(new_page_id));
                    prev.set_lsn(lsn);
                    self.buffer_pool.unpin_page_with_lsn(new_page_id, true, lsn)?;
                    Ok((new_page_id, Some(lsn)))
                }
                Err(e) => {
                    self.buffer_pool.unpin_page(new_page_id, false)?;
                    Err(e.into())
                }
            }
        })?;

        *last = new_page_id;
        debug!("Extended table {} with page {}", self.first_page_id, new_page_id);
        Ok(())
    }

    fn record_write(self: &Arc<Self>, txn: &Transaction, rid: Rid, kind: TableWriteKind, undo_next: Lsn) {
        if kind != TableWriteKind::Insert {
            txn.reserve(rid, Arc::clone(self));
        }
        txn.push_write(WriteRecord::Table { table: Arc::clone(self), rid, kind, undo_next });
    }

    fn live_tuple(&self, page: &Page, rid: Rid) -> Result<Vec<u8>> {
        match self.page_manager.get_record(page, rid.slot) {
            Ok(tuple) => Ok(tuple),
            Err(PageError::RecordNotFound) | Err(PageError::InvalidRecordId) => Err(TableError::TupleNotFound(rid)),
            Err(e) => Err(e.into()),
        }
    }

    /// Reject RIDs whose slot was never created, before any lock is taken
    fn check_slot(&self, rid: Rid) -> Result<()> {
        if rid.page_id == INVALID_PAGE_ID {
            return Err(TableError::TupleNotFound(rid));
        }
        let exists = self.with_page(rid.page_id, |page| Ok(rid.slot < self.page_manager.slot_count(page)))?;
        if exists { Ok(()) } else { Err(TableError::TupleNotFound(rid)) }
    }

    /// Run `f` on a read-latched page, unpinning afterwards
    pub(crate) fn with_page<T>(&self, page_id: PageId, f: impl FnOnce(&Page) -> Result<T>) -> Result<T> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let result = {
            let guard = page.read();
            f(&guard)
        };
        self.buffer_pool.unpin_page(page_id, false)?;
        result
    }

    /// Run `f` on a write-latched page. When `f` reports an LSN the page is
    /// unpinned dirty with it as the recovery LSN.
    fn with_page_mut<T>(
        &self,
        page_id: PageId,
        f: impl FnOnce(&mut Page) -> Result<(T, Option<Lsn>)>,
    ) -> Result<T> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let result = {
            let mut guard = page.write();
            f(&mut guard)
        };
        match result {
            Ok((value, Some(lsn))) => {
                self.buffer_pool.unpin_page_with_lsn(page_id, true, lsn)?;
                Ok(value)
            }
            Ok((value, None)) => {
                self.buffer_pool.unpin_page(page_id, false)?;
                Ok(value)
            }
            Err(e) => {
                self.buffer_pool.unpin_page(page_id, false)?;
                Err(e)
            }
        }
    }

    pub(crate) fn page_manager(&self) -> &PageManager {
        &self.page_manager
    }
}
