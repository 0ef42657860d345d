use log::debug;

use crate::common::types::{FrameId, Lsn, Page, PageId, INVALID_LSN, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use super::{BufferPoolManager, PoolState};

/// Bookkeeping for one buffer frame
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) page_id: PageId,
    pub(crate) pin_count: u32,
    pub(crate) is_dirty: bool,
    /// LSN of the first logged change since the page was last written out
    pub(crate) rec_lsn: Lsn,
}

impl Frame {
    pub(crate) fn new() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
            rec_lsn: INVALID_LSN,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.pin_count = 0;
        self.is_dirty = false;
        self.rec_lsn = INVALID_LSN;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.is_dirty = false;
        self.rec_lsn = INVALID_LSN;
    }
}

impl BufferPoolManager {
    /// Allocate a frame for a new resident page, either from the free list or
    /// by evicting the least recently unpinned page. Runs under the pool mutex.
    pub(crate) fn allocate_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        // Try to get a frame from the free list first
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        // No frames in free list, need to evict a page
        let frame_id = state.replacer.victim().ok_or(BufferPoolError::NoFreeFrames)?;
        let frame = &state.frames[frame_id as usize];
        debug_assert_eq!(frame.pin_count, 0, "replacer returned a pinned frame");
        let victim_page_id = frame.page_id;

        if frame.is_dirty {
            if let Err(e) = self.write_back(frame_id) {
                state.replacer.unpin(frame_id);
                return Err(e);
            }
            debug!("Evicted dirty page {} from frame {}", victim_page_id, frame_id);
        }

        state.page_table.remove(&victim_page_id);
        state.frames[frame_id as usize].reset();

        Ok(frame_id)
    }

    /// Write a frame's page to disk. The log is forced up to the page LSN
    /// first so no change reaches the data file ahead of its log record.
    pub(crate) fn write_back(&self, frame_id: FrameId) -> Result<(), BufferPoolError> {
        let page = self.pages[frame_id as usize].read();
        self.write_page_image(&page)
    }

    pub(crate) fn write_page_image(&self, page: &Page) -> Result<(), BufferPoolError> {
        if let Some(ref log_manager) = self.log_manager {
            log_manager.flush(page.lsn())?;
        }
        self.disk_manager.write_page(page.page_id, &page.data)?;
        Ok(())
    }
}
