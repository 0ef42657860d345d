use std::fmt;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = u32;

/// Transaction ID type
pub type TxnId = u32;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// LSN (Log Sequence Number) type
pub type Lsn = u64;

/// Sentinel for "no page" in links and parent pointers
pub const INVALID_PAGE_ID: PageId = u32::MAX;

/// Sentinel LSN. Real LSNs start at 1.
pub const INVALID_LSN: Lsn = 0;

/// Transaction id used by records that belong to no transaction (checkpoints)
pub const INVALID_TXN_ID: TxnId = 0;

// Common page header, shared by every page kind:
// - page_id: u32 at [0..4]
// - lsn: u64 at [4..12]
pub const PAGE_ID_OFFSET: usize = 0;
pub const PAGE_LSN_OFFSET: usize = 4;
pub const COMMON_HEADER_SIZE: usize = 12;

/// Record identifier: the stable (page, slot) address of a tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    /// Smallest possible RID, used as a lower bound when searching composite keys
    pub const MIN: Rid = Rid { page_id: 0, slot: 0 };

    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

/// Page structure
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        let mut page = Self {
            data: [0; PAGE_SIZE],
            page_id,
        };
        page.stamp_page_id();
        page
    }

    /// LSN of the last logged change applied to this page
    pub fn lsn(&self) -> Lsn {
        LittleEndian::read_u64(&self.data[PAGE_LSN_OFFSET..COMMON_HEADER_SIZE])
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        LittleEndian::write_u64(&mut self.data[PAGE_LSN_OFFSET..COMMON_HEADER_SIZE], lsn);
    }

    /// Write the in-memory page id into the on-disk header
    pub fn stamp_page_id(&mut self) {
        LittleEndian::write_u32(&mut self.data[PAGE_ID_OFFSET..PAGE_LSN_OFFSET], self.page_id);
    }

    /// Zero the contents, keeping the page id
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.stamp_page_id();
    }
}

/// Smart pointer to a page
pub type PagePtr = Arc<RwLock<Page>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_lsn_lives_in_page_bytes() {
        let mut page = Page::new(7);
        assert_eq!(page.lsn(), INVALID_LSN);

        page.set_lsn(42);
        let copy = page.clone();
        assert_eq!(copy.lsn(), 42);
        assert_eq!(LittleEndian::read_u32(&copy.data[0..4]), 7);

        page.reset();
        assert_eq!(page.lsn(), INVALID_LSN);
        assert_eq!(LittleEndian::read_u32(&page.data[0..4]), 7);
    }

    #[test]
    fn test_rid_ordering() {
        let a = Rid::new(1, 9);
        let b = Rid::new(2, 0);
        assert!(a < b);
        assert!(Rid::MIN <= a);
        assert_eq!(a.to_string(), "(1, 9)");
    }
}
