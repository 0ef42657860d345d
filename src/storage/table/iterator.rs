use std::collections::VecDeque;

use crate::common::types::{PageId, Rid};
use crate::storage::table::error::{Result, TableError};
use crate::storage::table::heap::TableHeap;
use crate::transaction::concurrency::Transaction;

/// Iterator over the live tuples of a table heap, in RID order.
///
/// Each page's live slots are snapshotted under its read latch; every tuple
/// is then read through `get_tuple`, so the transaction's locking rules
/// apply. Tuples deleted after the snapshot are skipped.
pub struct TableIterator<'a> {
    heap: &'a TableHeap,
    txn: &'a Transaction,
    page_id: Option<PageId>,
    pending: VecDeque<Rid>,
}

impl<'a> TableIterator<'a> {
    pub(crate) fn new(heap: &'a TableHeap, txn: &'a Transaction) -> Self {
        Self {
            heap,
            txn,
            page_id: Some(heap.first_page_id()),
            pending: VecDeque::new(),
        }
    }

    /// Queue the live slots of the next page; false once the chain ends
    fn load_next_page(&mut self) -> Result<bool> {
        let Some(page_id) = self.page_id else {
            return Ok(false);
        };

        let pm = self.heap.page_manager();
        let (slots, next) = self.heap.with_page(page_id, |page| Ok((pm.live_slots(page), pm.next_page_id(page))))?;
        self.pending.extend(slots.into_iter().map(|slot| Rid::new(page_id, slot)));
        self.page_id = next;
        Ok(true)
    }
}

impl Iterator for TableIterator<'_> {
    type Item = Result<(Rid, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(rid) = self.pending.pop_front() {
                match self.heap.get_tuple(self.txn, rid) {
                    Ok(tuple) => return Some(Ok((rid, tuple))),
                    Err(TableError::TupleNotFound(_)) => continue,
                    Err(e) => return Some(Err(e)),
                }
            }

            match self.load_next_page() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => {
                    self.page_id = None;
                    return Some(Err(e));
                }
            }
        }
    }
}
