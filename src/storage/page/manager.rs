use crate::common::types::{Page, PageId, PAGE_SIZE};
use crate::storage::page::error::PageError;
use crate::storage::page::header::PageHeader;
use crate::storage::page::layout::{
    slot_array_start, slot_position, RecordLocation, DELETE_MASK, HEADER_END, RECORD_OFFSET_SIZE,
};

/// Stateless accessor for slotted table pages.
///
/// Records location are stored from the end of the page, actual record data
/// is stored from the beginning of the page (after the header). Slot indices
/// are never renumbered, so a `(page, slot)` RID stays valid across
/// compaction; freed slots keep their index and are only refilled by
/// `insert_record_at`.
///
/// Space given up by an unfinished transaction (a marked delete or the
/// slack of a shrinking update) stays owned by the slot until
/// `reclaim_record`, so a rollback never competes with other writers for
/// bytes on the page.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageManager;

impl PageManager {
    pub fn new() -> Self {
        Self
    }

    /// Format a page as an empty table page. The common header is preserved.
    pub fn init_page(&self, page: &mut Page) {
        page.data[HEADER_END..].fill(0);
        PageHeader::new().write_to(&mut page.data);
    }

    pub fn get_header(&self, page: &Page) -> PageHeader {
        PageHeader::read_from(&page.data)
    }

    fn put_header(&self, page: &mut Page, header: &PageHeader) {
        header.write_to(&mut page.data);
    }

    pub fn get_free_space(&self, page: &Page) -> u32 {
        self.get_header(page).free_space_size
    }

    pub fn slot_count(&self, page: &Page) -> u32 {
        self.get_header(page).record_count
    }

    pub fn next_page_id(&self, page: &Page) -> Option<PageId> {
        self.get_header(page).next_page_id
    }

    pub fn set_next_page_id(&self, page: &mut Page, next: Option<PageId>) {
        let mut header = self.get_header(page);
        header.next_page_id = next;
        self.put_header(page, &header);
    }

    pub fn set_prev_page_id(&self, page: &mut Page, prev: Option<PageId>) {
        let mut header = self.get_header(page);
        header.prev_page_id = prev;
        self.put_header(page, &header);
    }

    /// Append a record in a fresh slot and return the slot index
    pub fn insert_record(&self, page: &mut Page, data: &[u8]) -> Result<u32, PageError> {
        if data.is_empty() {
            return Err(PageError::EmptyRecord);
        }
        let needed = data.len() + RECORD_OFFSET_SIZE;
        self.ensure_space(page, needed)?;

        let mut header = self.get_header(page);
        let slot = header.record_count;
        let offset = self.write_tuple_bytes(page, &mut header, data);
        header.record_count += 1;
        header.free_space_size -= RECORD_OFFSET_SIZE as u32;
        self.put_header(page, &header);
        self.put_location(page, slot, RecordLocation::new(offset as usize, data.len()));

        Ok(slot)
    }

    /// Whether `insert_record` of `len` bytes would succeed, counting space
    /// that compaction would reclaim
    pub fn can_insert(&self, page: &Page, len: usize) -> bool {
        len > 0 && self.reclaimable_space(page) >= len + RECORD_OFFSET_SIZE
    }

    /// Place a record in a specific slot. The slot must either be deleted or
    /// be exactly the next slot to be created.
    pub fn insert_record_at(&self, page: &mut Page, slot: u32, data: &[u8]) -> Result<(), PageError> {
        if data.is_empty() {
            return Err(PageError::EmptyRecord);
        }
        let header = self.get_header(page);

        if slot == header.record_count {
            let inserted = self.insert_record(page, data)?;
            debug_assert_eq!(inserted, slot);
            return Ok(());
        }
        if slot > header.record_count {
            return Err(PageError::InvalidRecordId);
        }
        if !self.get_location(page, slot).is_free() {
            return Err(PageError::DuplicateRecord);
        }

        self.ensure_space(page, data.len())?;
        let mut header = self.get_header(page);
        let offset = self.write_tuple_bytes(page, &mut header, data);
        self.put_header(page, &header);
        self.put_location(page, slot, RecordLocation::new(offset as usize, data.len()));

        Ok(())
    }

    /// Free a slot outright. Used when an insert is rolled back; the bytes
    /// are reclaimed by the next compaction.
    pub fn delete_record(&self, page: &mut Page, slot: u32) -> Result<(), PageError> {
        self.live_location(page, slot)?;
        self.put_location(page, slot, RecordLocation::default());
        Ok(())
    }

    /// Hide a tuple without giving up its bytes. The space stays owned by
    /// the slot until `reclaim_record`, so `rollback_delete` always fits.
    pub fn mark_delete(&self, page: &mut Page, slot: u32) -> Result<(), PageError> {
        let mut location = self.live_location(page, slot)?;
        location.length |= DELETE_MASK;
        self.put_location(page, slot, location);
        Ok(())
    }

    /// Make a tuple hidden by `mark_delete` visible again
    pub fn rollback_delete(&self, page: &mut Page, slot: u32) -> Result<(), PageError> {
        let mut location = self.location(page, slot)?;
        if !location.is_marked() {
            return Err(PageError::RecordNotFound);
        }
        location.length &= !DELETE_MASK;
        self.put_location(page, slot, location);
        Ok(())
    }

    /// Release the bytes a slot holds only for rollback: a marked tuple is
    /// freed and a shrunk tuple gives up its slack. Freed slots are left
    /// alone, so reclaiming twice is harmless.
    pub fn reclaim_record(&self, page: &mut Page, slot: u32) -> Result<(), PageError> {
        let mut location = self.location(page, slot)?;
        if location.is_marked() {
            location = RecordLocation::default();
        } else if !location.is_free() {
            location.capacity = location.length as u16;
        }
        self.put_location(page, slot, location);
        Ok(())
    }

    /// Overwrite a tuple. Values that fit the slot's capacity are written in
    /// place and the capacity is kept, so writing a larger earlier value
    /// back never needs new space.
    pub fn update_record(&self, page: &mut Page, slot: u32, data: &[u8]) -> Result<(), PageError> {
        if data.is_empty() {
            return Err(PageError::EmptyRecord);
        }
        let location = self.live_location(page, slot)?;

        if data.len() <= location.capacity as usize {
            let start = location.offset as usize;
            page.data[start..start + data.len()].copy_from_slice(data);
            self.put_location(page, slot, RecordLocation { length: data.len() as u32, ..location });
            return Ok(());
        }

        // Growing past the capacity moves the tuple to the end of the tuple
        // region. The old copy is released first so compaction can reuse it.
        if self.reclaimable_space(page) + (location.capacity as usize) < data.len() {
            return Err(PageError::InsufficientSpace);
        }
        self.put_location(page, slot, RecordLocation::default());
        if let Err(e) = self.ensure_space(page, data.len()) {
            self.put_location(page, slot, location);
            return Err(e);
        }

        let mut header = self.get_header(page);
        let offset = self.write_tuple_bytes(page, &mut header, data);
        self.put_header(page, &header);
        self.put_location(page, slot, RecordLocation::new(offset as usize, data.len()));

        Ok(())
    }

    /// Whether `update_record` with `len` bytes would succeed
    pub fn can_update(&self, page: &Page, slot: u32, len: usize) -> bool {
        match self.live_location(page, slot) {
            Ok(location) => {
                let capacity = location.capacity as usize;
                len > 0 && (len <= capacity || self.reclaimable_space(page) + capacity >= len)
            }
            Err(_) => false,
        }
    }

    pub fn get_record(&self, page: &Page, slot: u32) -> Result<Vec<u8>, PageError> {
        let location = self.live_location(page, slot)?;
        let start = location.offset as usize;
        Ok(page.data[start..start + location.tuple_len()].to_vec())
    }

    pub fn is_live(&self, page: &Page, slot: u32) -> bool {
        self.live_location(page, slot).is_ok()
    }

    pub fn is_marked(&self, page: &Page, slot: u32) -> bool {
        self.location(page, slot).map(|l| l.is_marked()).unwrap_or(false)
    }

    /// Bytes owned by a slot, including slack held for rollback
    pub fn slot_capacity(&self, page: &Page, slot: u32) -> usize {
        self.location(page, slot).map(|l| l.capacity as usize).unwrap_or(0)
    }

    /// Slot indices holding live records, in ascending order
    pub fn live_slots(&self, page: &Page) -> Vec<u32> {
        let count = self.slot_count(page);
        (0..count)
            .filter(|&slot| self.get_location(page, slot).is_live())
            .collect()
    }

    /// Rewrite the tuple region without the bytes of freed or moved
    /// records. Slot indices are preserved, and so is every byte a slot
    /// owns, marked tuples and rollback slack included.
    pub fn compact_page(&self, page: &mut Page) -> Result<(), PageError> {
        let mut header = self.get_header(page);
        if header.record_count == 0 {
            return Ok(());
        }

        let mut compacted = [0u8; PAGE_SIZE];
        let mut new_offset = HEADER_END;

        for slot in 0..header.record_count {
            let location = self.get_location(page, slot);
            if location.is_free() {
                self.put_location(page, slot, RecordLocation::default());
                continue;
            }

            let start = location.offset as usize;
            let len = location.capacity as usize;
            compacted[new_offset..new_offset + len].copy_from_slice(&page.data[start..start + len]);
            self.put_location(page, slot, RecordLocation { offset: new_offset as u16, ..location });
            new_offset += len;
        }

        page.data[HEADER_END..new_offset].copy_from_slice(&compacted[HEADER_END..new_offset]);
        header.free_space_offset = new_offset as u32;
        header.free_space_size = (slot_array_start(header.record_count) - new_offset) as u32;
        self.put_header(page, &header);

        Ok(())
    }

    /// Free bytes available after a compaction
    pub fn reclaimable_space(&self, page: &Page) -> usize {
        let header = self.get_header(page);
        let owned: usize = (0..header.record_count)
            .map(|slot| self.get_location(page, slot))
            .filter(|location| !location.is_free())
            .map(|location| location.capacity as usize)
            .sum();
        slot_array_start(header.record_count) - HEADER_END - owned
    }

    // Helper methods

    fn ensure_space(&self, page: &mut Page, needed: usize) -> Result<(), PageError> {
        if self.get_header(page).free_space_size as usize >= needed {
            return Ok(());
        }
        if self.reclaimable_space(page) < needed {
            return Err(PageError::InsufficientSpace);
        }
        self.compact_page(page)
    }

    fn write_tuple_bytes(&self, page: &mut Page, header: &mut PageHeader, data: &[u8]) -> u32 {
        let offset = header.free_space_offset;
        let start = offset as usize;
        page.data[start..start + data.len()].copy_from_slice(data);
        header.free_space_offset += data.len() as u32;
        header.free_space_size -= data.len() as u32;
        offset
    }

    fn location(&self, page: &Page, slot: u32) -> Result<RecordLocation, PageError> {
        if slot >= self.slot_count(page) {
            return Err(PageError::InvalidRecordId);
        }
        Ok(self.get_location(page, slot))
    }

    fn live_location(&self, page: &Page, slot: u32) -> Result<RecordLocation, PageError> {
        let location = self.location(page, slot)?;
        if !location.is_live() {
            return Err(PageError::RecordNotFound);
        }
        Ok(location)
    }

    fn get_location(&self, page: &Page, slot: u32) -> RecordLocation {
        let pos = slot_position(slot);
        RecordLocation::from_bytes(&page.data[pos..pos + RECORD_OFFSET_SIZE])
    }

    fn put_location(&self, page: &mut Page, slot: u32, location: RecordLocation) {
        let pos = slot_position(slot);
        page.data[pos..pos + RECORD_OFFSET_SIZE].copy_from_slice(&location.to_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::layout::MAX_RECORD_SIZE;

    fn table_page() -> Page {
        let mut page = Page::new(3);
        PageManager::new().init_page(&mut page);
        page
    }

    #[test]
    fn test_insert_get_delete() {
        let pm = PageManager::new();
        let mut page = table_page();

        let a = pm.insert_record(&mut page, b"alpha").unwrap();
        let b = pm.insert_record(&mut page, b"beta").unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(pm.get_record(&page, b).unwrap(), b"beta");

        pm.delete_record(&mut page, a).unwrap();
        assert_eq!(pm.get_record(&page, a), Err(PageError::RecordNotFound));
        assert_eq!(pm.delete_record(&mut page, a), Err(PageError::RecordNotFound));
        assert_eq!(pm.live_slots(&page), vec![1]);

        // New inserts never reuse a deleted slot
        assert_eq!(pm.insert_record(&mut page, b"gamma").unwrap(), 2);
    }

    #[test]
    fn test_compaction_keeps_slot_numbers() {
        let pm = PageManager::new();
        let mut page = table_page();

        for i in 0..5u8 {
            pm.insert_record(&mut page, &[i; 100]).unwrap();
        }
        pm.delete_record(&mut page, 1).unwrap();
        pm.delete_record(&mut page, 3).unwrap();

        let before = pm.get_free_space(&page);
        pm.compact_page(&mut page).unwrap();
        assert_eq!(pm.get_free_space(&page), before + 200);

        assert_eq!(pm.get_record(&page, 0).unwrap(), vec![0; 100]);
        assert_eq!(pm.get_record(&page, 2).unwrap(), vec![2; 100]);
        assert_eq!(pm.get_record(&page, 4).unwrap(), vec![4; 100]);
        assert!(!pm.is_live(&page, 3));
    }

    #[test]
    fn test_update_in_place_and_grow() {
        let pm = PageManager::new();
        let mut page = table_page();
        let slot = pm.insert_record(&mut page, b"0123456789").unwrap();

        pm.update_record(&mut page, slot, b"short").unwrap();
        assert_eq!(pm.get_record(&page, slot).unwrap(), b"short");

        pm.update_record(&mut page, slot, b"a much longer value").unwrap();
        assert_eq!(pm.get_record(&page, slot).unwrap(), b"a much longer value");
    }

    #[test]
    fn test_insert_record_at_restores_and_appends() {
        let pm = PageManager::new();
        let mut page = table_page();
        let slot = pm.insert_record(&mut page, b"first").unwrap();
        pm.delete_record(&mut page, slot).unwrap();

        pm.insert_record_at(&mut page, slot, b"restored").unwrap();
        assert_eq!(pm.get_record(&page, slot).unwrap(), b"restored");
        assert_eq!(pm.insert_record_at(&mut page, slot, b"again"), Err(PageError::DuplicateRecord));

        pm.insert_record_at(&mut page, 1, b"next").unwrap();
        assert_eq!(pm.slot_count(&page), 2);
        assert_eq!(pm.insert_record_at(&mut page, 5, b"gap"), Err(PageError::InvalidRecordId));
    }

    #[test]
    fn test_marked_delete_holds_space_until_reclaimed() {
        let pm = PageManager::new();
        let mut page = table_page();
        let a = pm.insert_record(&mut page, &[7u8; 2000]).unwrap();
        pm.insert_record(&mut page, &[8u8; 1900]).unwrap();

        pm.mark_delete(&mut page, a).unwrap();
        assert!(!pm.is_live(&page, a));
        assert!(pm.is_marked(&page, a));
        assert_eq!(pm.get_record(&page, a), Err(PageError::RecordNotFound));
        assert_eq!(pm.live_slots(&page), vec![1]);
        assert!(!pm.can_insert(&page, 2000));

        // Compaction must not drop the hidden bytes
        pm.compact_page(&mut page).unwrap();
        pm.rollback_delete(&mut page, a).unwrap();
        assert_eq!(pm.get_record(&page, a).unwrap(), vec![7u8; 2000]);
        assert_eq!(pm.rollback_delete(&mut page, a), Err(PageError::RecordNotFound));

        pm.mark_delete(&mut page, a).unwrap();
        pm.reclaim_record(&mut page, a).unwrap();
        pm.reclaim_record(&mut page, a).unwrap();
        assert!(!pm.is_marked(&page, a));
        assert!(pm.can_insert(&page, 2000));
        assert_eq!(pm.rollback_delete(&mut page, a), Err(PageError::RecordNotFound));
    }

    #[test]
    fn test_shrinking_update_keeps_slack() {
        let pm = PageManager::new();
        let mut page = table_page();
        let a = pm.insert_record(&mut page, &[1u8; 2000]).unwrap();
        pm.insert_record(&mut page, &[2u8; 1900]).unwrap();

        pm.update_record(&mut page, a, b"tiny").unwrap();
        assert_eq!(pm.slot_capacity(&page, a), 2000);
        assert!(!pm.can_insert(&page, 1000));

        pm.compact_page(&mut page).unwrap();
        assert!(pm.can_update(&page, a, 2000));
        pm.update_record(&mut page, a, &[1u8; 2000]).unwrap();
        assert_eq!(pm.get_record(&page, a).unwrap(), vec![1u8; 2000]);

        pm.update_record(&mut page, a, b"tiny").unwrap();
        pm.reclaim_record(&mut page, a).unwrap();
        assert_eq!(pm.slot_capacity(&page, a), 4);
        assert_eq!(pm.get_record(&page, a).unwrap(), b"tiny");
        assert!(pm.can_insert(&page, 1000));
    }

    #[test]
    fn test_slot_array_never_overlaps_tuples() {
        let pm = PageManager::new();
        let mut page = table_page();

        let mut inserted = 0;
        while pm.insert_record(&mut page, &[0xAB; 64]).is_ok() {
            inserted += 1;
        }
        assert!(inserted > 0);

        let header = pm.get_header(&page);
        assert!(header.free_space_offset as usize <= slot_array_start(header.record_count));
        assert!((header.free_space_size as usize) < 64 + RECORD_OFFSET_SIZE);
        for slot in 0..inserted {
            assert_eq!(pm.get_record(&page, slot).unwrap(), vec![0xAB; 64]);
        }
    }

    #[test]
    fn test_full_page_record_fits_once() {
        let pm = PageManager::new();
        let mut page = table_page();
        assert!(pm.can_insert(&page, MAX_RECORD_SIZE));
        pm.insert_record(&mut page, &vec![1u8; MAX_RECORD_SIZE]).unwrap();
        assert!(!pm.can_insert(&page, 1));
        assert_eq!(pm.insert_record(&mut page, b"x"), Err(PageError::InsufficientSpace));
    }
}
