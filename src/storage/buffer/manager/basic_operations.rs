use log::debug;

use crate::common::types::{FrameId, Lsn, PageId, PagePtr, INVALID_LSN, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use super::BufferPoolManager;

impl BufferPoolManager {
    /// Fetch a page from the buffer pool or disk. The returned page is pinned
    /// and must be released with `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation("Cannot fetch invalid page ID".to_string()));
        }

        let mut state = self.state.lock();

        // Check if page is already in the buffer pool
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.frames[frame_id as usize].pin_count += 1;
            state.replacer.pin(frame_id);
            return Ok(self.pages[frame_id as usize].clone());
        }

        // Page not in buffer pool, need to allocate a frame and read from disk
        let frame_id = self.allocate_frame(&mut state)?;
        {
            let mut page = self.pages[frame_id as usize].write();
            page.page_id = page_id;
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page.data) {
                page.page_id = INVALID_PAGE_ID;
                state.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }

        let frame = &mut state.frames[frame_id as usize];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.mark_clean();
        state.page_table.insert(page_id, frame_id);

        Ok(self.pages[frame_id as usize].clone())
    }

    /// Create a new zeroed page, pinned once
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();

        // Take the frame first so a full pool does not leak a page id
        let frame_id = self.allocate_frame(&mut state)?;
        let page_id = match self.disk_manager.allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                state.free_list.push_back(frame_id);
                return Err(e.into());
            }
        };

        {
            let mut page = self.pages[frame_id as usize].write();
            page.page_id = page_id;
            page.reset();
        }

        let frame = &mut state.frames[frame_id as usize];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = true;
        state.page_table.insert(page_id, frame_id);

        Ok((self.pages[frame_id as usize].clone(), page_id))
    }

    /// Unpin a page, potentially marking it as dirty. The pin count never
    /// drops below zero; at zero the frame becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.unpin_internal(page_id, is_dirty, None)
    }

    pub(crate) fn unpin_internal(
        &self,
        page_id: PageId,
        is_dirty: bool,
        rec_lsn: Option<Lsn>,
    ) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let frame = &mut state.frames[frame_id as usize];
        if frame.pin_count > 0 {
            frame.pin_count -= 1;
        }
        if is_dirty {
            frame.is_dirty = true;
            if let Some(lsn) = rec_lsn {
                if frame.rec_lsn == INVALID_LSN || lsn < frame.rec_lsn {
                    frame.rec_lsn = lsn;
                }
            }
        }

        if frame.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page to disk and clear its dirty flag
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation("Cannot flush invalid page ID".to_string()));
        }

        // Pin for the duration of the write so the frame cannot be recycled
        let frame_id = {
            let mut state = self.state.lock();
            let frame_id = *state
                .page_table
                .get(&page_id)
                .ok_or(BufferPoolError::PageNotFound(page_id))?;
            state.frames[frame_id as usize].pin_count += 1;
            state.replacer.pin(frame_id);
            frame_id
        };

        let result = {
            let page = self.pages[frame_id as usize].read();
            let result = self.write_page_image(&page);
            if result.is_ok() {
                // Still latched, so no writer can slip in before the flag clears
                self.state.lock().frames[frame_id as usize].mark_clean();
            }
            result
        };

        self.release_pin(frame_id);
        result
    }

    /// Flush every dirty page, plus every pinned page since a pinned page may
    /// carry changes whose dirty flag has not been set yet
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let page_ids: Vec<PageId> = {
            let state = self.state.lock();
            state
                .page_table
                .iter()
                .filter(|(_, frame_id)| {
                    let frame = &state.frames[**frame_id as usize];
                    frame.is_dirty || frame.pin_count > 0
                })
                .map(|(&page_id, _)| page_id)
                .collect()
        };

        for page_id in page_ids {
            match self.flush_page(page_id) {
                // Evicted since the snapshot, which already wrote it out
                Ok(()) | Err(BufferPoolError::PageNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        debug!("Flushed all pages");
        Ok(())
    }

    /// Drop a page from the pool and hand its id back to the disk manager.
    /// Fails if the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation("Cannot delete invalid page ID".to_string()));
        }

        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            if state.frames[frame_id as usize].pin_count > 0 {
                return Err(BufferPoolError::PagePinned(page_id));
            }

            state.page_table.remove(&page_id);
            state.replacer.pin(frame_id);
            state.frames[frame_id as usize].reset();
            {
                let mut page = self.pages[frame_id as usize].write();
                page.page_id = INVALID_PAGE_ID;
                page.reset();
            }
            state.free_list.push_back(frame_id);
        }

        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    /// Pin count of a resident page
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| state.frames[frame_id as usize].pin_count)
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    /// Frames that are neither pinned nor free
    pub fn evictable_frames(&self) -> usize {
        self.state.lock().replacer.size()
    }

    pub fn free_frames(&self) -> usize {
        self.state.lock().free_list.len()
    }

    fn release_pin(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        let frame = &mut state.frames[frame_id as usize];
        frame.pin_count = frame.pin_count.saturating_sub(1);
        if frame.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }
    }
}
