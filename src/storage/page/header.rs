use byteorder::{ByteOrder, LittleEndian};
use crate::common::types::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::page::layout::{HEADER_END, HEADER_OFFSET, HEADER_SIZE};

/// Header of a slotted table page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    /// End of the tuple region
    pub free_space_offset: u32,
    /// Gap between the tuple region and the slot array
    pub free_space_size: u32,
    /// Number of slots, deleted ones included
    pub record_count: u32,
    pub next_page_id: Option<PageId>,
    pub prev_page_id: Option<PageId>,
}

impl Default for PageHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl PageHeader {
    pub fn new() -> Self {
        Self {
            free_space_offset: HEADER_END as u32,
            free_space_size: (PAGE_SIZE - HEADER_END) as u32,
            record_count: 0,
            next_page_id: None,
            prev_page_id: None,
        }
    }

    // Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];

        LittleEndian::write_u32(&mut bytes[0..4], self.free_space_offset);
        LittleEndian::write_u32(&mut bytes[4..8], self.free_space_size);
        LittleEndian::write_u32(&mut bytes[8..12], self.record_count);
        LittleEndian::write_u32(&mut bytes[12..16], self.next_page_id.unwrap_or(INVALID_PAGE_ID));
        LittleEndian::write_u32(&mut bytes[16..20], self.prev_page_id.unwrap_or(INVALID_PAGE_ID));

        bytes
    }

    // Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let link = |raw: u32| if raw == INVALID_PAGE_ID { None } else { Some(raw) };

        Self {
            free_space_offset: LittleEndian::read_u32(&bytes[0..4]),
            free_space_size: LittleEndian::read_u32(&bytes[4..8]),
            record_count: LittleEndian::read_u32(&bytes[8..12]),
            next_page_id: link(LittleEndian::read_u32(&bytes[12..16])),
            prev_page_id: link(LittleEndian::read_u32(&bytes[16..20])),
        }
    }

    pub fn read_from(data: &[u8]) -> Self {
        Self::from_bytes(&data[HEADER_OFFSET..HEADER_END])
    }

    pub fn write_to(&self, data: &mut [u8]) {
        data[HEADER_OFFSET..HEADER_END].copy_from_slice(&self.to_bytes());
    }
}
