use crate::common::types::{Lsn, PageId, INVALID_LSN};
use crate::storage::buffer::error::BufferPoolError;
use super::BufferPoolManager;

impl BufferPoolManager {
    /// Unpin a page that was changed under log record `lsn`. The frame keeps
    /// the oldest such LSN until the page is written out.
    pub fn unpin_page_with_lsn(&self, page_id: PageId, is_dirty: bool, lsn: Lsn) -> Result<(), BufferPoolError> {
        let rec_lsn = if lsn == INVALID_LSN { None } else { Some(lsn) };
        self.unpin_internal(page_id, is_dirty, rec_lsn)
    }

    /// Snapshot of dirty pages and their recovery LSNs, ordered by page id.
    /// Dirty pages that never carried a logged change are left out.
    pub fn dirty_page_table(&self) -> Vec<(PageId, Lsn)> {
        let state = self.state.lock();
        let mut table: Vec<(PageId, Lsn)> = state
            .page_table
            .iter()
            .filter_map(|(&page_id, &frame_id)| {
                let frame = &state.frames[frame_id as usize];
                (frame.is_dirty && frame.rec_lsn != INVALID_LSN).then_some((page_id, frame.rec_lsn))
            })
            .collect();
        table.sort_unstable();
        table
    }
}
