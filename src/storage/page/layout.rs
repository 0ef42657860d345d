use byteorder::{ByteOrder, LittleEndian};
use crate::common::types::{COMMON_HEADER_SIZE, PAGE_SIZE};

/// Table page header starts right after the common (page id, lsn) header
pub const HEADER_OFFSET: usize = COMMON_HEADER_SIZE;
pub const HEADER_SIZE: usize = 20; // 4 bytes per field * 5 fields
pub const HEADER_END: usize = HEADER_OFFSET + HEADER_SIZE;
pub const RECORD_OFFSET_SIZE: usize = 8; // 2 bytes offset + 2 bytes capacity + 4 bytes length

/// Largest tuple a fresh table page can hold
pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - HEADER_END - RECORD_OFFSET_SIZE;

/// High bit of the length field: the tuple is deleted by a transaction that
/// has not finished yet. Its bytes stay on the page until the slot is
/// reclaimed.
pub const DELETE_MASK: u32 = 1 << 31;

/// One slot array entry.
///
/// `capacity` is the number of tuple bytes the slot owns. It equals the
/// tuple length except after an uncommitted shrinking update, where the
/// slack stays owned by the slot so the rollback can write the old value
/// back in place. A length of 0 (without the delete mark) is a freed slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordLocation {
    pub offset: u16,
    pub capacity: u16,
    pub length: u32,
}

impl RecordLocation {
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset: offset as u16, capacity: len as u16, length: len as u32 }
    }

    /// Slot holds no bytes at all
    pub fn is_free(&self) -> bool {
        self.length == 0
    }

    pub fn is_marked(&self) -> bool {
        self.length & DELETE_MASK != 0
    }

    /// Visible tuple: neither freed nor marked for deletion
    pub fn is_live(&self) -> bool {
        !self.is_free() && !self.is_marked()
    }

    /// Tuple length with the delete mark stripped
    pub fn tuple_len(&self) -> usize {
        (self.length & !DELETE_MASK) as usize
    }

    pub fn to_bytes(&self) -> [u8; RECORD_OFFSET_SIZE] {
        let mut bytes = [0u8; RECORD_OFFSET_SIZE];
        LittleEndian::write_u16(&mut bytes[0..2], self.offset);
        LittleEndian::write_u16(&mut bytes[2..4], self.capacity);
        LittleEndian::write_u32(&mut bytes[4..8], self.length);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let offset = LittleEndian::read_u16(&bytes[0..2]);
        let capacity = LittleEndian::read_u16(&bytes[2..4]);
        let length = LittleEndian::read_u32(&bytes[4..8]);
        Self { offset, capacity, length }
    }
}

/// Byte position of a slot entry; the slot array grows down from the page tail
pub fn slot_position(slot: u32) -> usize {
    PAGE_SIZE - RECORD_OFFSET_SIZE * (slot as usize + 1)
}

/// First byte of the slot array for a page holding `record_count` slots
pub fn slot_array_start(record_count: u32) -> usize {
    PAGE_SIZE - RECORD_OFFSET_SIZE * record_count as usize
}
