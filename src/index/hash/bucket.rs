use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{COMMON_HEADER_SIZE, INVALID_PAGE_ID, PAGE_SIZE, Page, PageId, Rid};
use crate::index::hash::error::HashIndexError;

// Directory page, after the common page header:
// - magic: u32
// - bucket_count: u32
// - head page id of each bucket: u32 (INVALID_PAGE_ID while empty)
const DIRECTORY_MAGIC: u32 = 0x4B48_4458;
const MAGIC_OFFSET: usize = COMMON_HEADER_SIZE;
const BUCKET_COUNT_OFFSET: usize = MAGIC_OFFSET + 4;
const HEADS_OFFSET: usize = BUCKET_COUNT_OFFSET + 4;

pub const MAX_BUCKET_COUNT: usize = (PAGE_SIZE - HEADS_OFFSET) / 4;
pub const DEFAULT_BUCKET_COUNT: usize = 256;

// Bucket page, after the common page header:
// - entry_count: u16
// - next: u32 (INVALID_PAGE_ID if last in the chain)
// - entries: key_len u16 | key bytes | rid page u32 | rid slot u32
const ENTRY_COUNT_OFFSET: usize = COMMON_HEADER_SIZE;
const NEXT_OFFSET: usize = ENTRY_COUNT_OFFSET + 2;
const ENTRIES_OFFSET: usize = NEXT_OFFSET + 4;
const RID_SIZE: usize = 8;

/// Largest encoded key a bucket page can hold
pub const MAX_KEY_SIZE: usize = PAGE_SIZE - ENTRIES_OFFSET - 2 - RID_SIZE;

pub(crate) fn init_directory(page: &mut Page, bucket_count: usize) {
    page.data[COMMON_HEADER_SIZE..].fill(0);
    LittleEndian::write_u32(&mut page.data[MAGIC_OFFSET..BUCKET_COUNT_OFFSET], DIRECTORY_MAGIC);
    LittleEndian::write_u32(&mut page.data[BUCKET_COUNT_OFFSET..HEADS_OFFSET], bucket_count as u32);
    for bucket in 0..bucket_count {
        set_bucket_head(page, bucket, None);
    }
}

pub(crate) fn directory_bucket_count(page: &Page) -> Result<usize, HashIndexError> {
    if LittleEndian::read_u32(&page.data[MAGIC_OFFSET..BUCKET_COUNT_OFFSET]) != DIRECTORY_MAGIC {
        return Err(HashIndexError::InvalidPageFormat);
    }
    let count = LittleEndian::read_u32(&page.data[BUCKET_COUNT_OFFSET..HEADS_OFFSET]) as usize;
    if count == 0 || count > MAX_BUCKET_COUNT {
        return Err(HashIndexError::InvalidPageFormat);
    }
    Ok(count)
}

pub(crate) fn bucket_head(page: &Page, bucket: usize) -> Option<PageId> {
    let pos = HEADS_OFFSET + bucket * 4;
    let head = LittleEndian::read_u32(&page.data[pos..pos + 4]);
    (head != INVALID_PAGE_ID).then_some(head)
}

pub(crate) fn set_bucket_head(page: &mut Page, bucket: usize, head: Option<PageId>) {
    let pos = HEADS_OFFSET + bucket * 4;
    LittleEndian::write_u32(&mut page.data[pos..pos + 4], head.unwrap_or(INVALID_PAGE_ID));
}

/// One page of a bucket chain. Keys are kept in their encoded form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketPage {
    pub entries: Vec<(Vec<u8>, Rid)>,
    pub next: Option<PageId>,
}

impl BucketPage {
    fn encoded_len(&self) -> usize {
        ENTRIES_OFFSET + self.entries.iter().map(|(key, _)| 2 + key.len() + RID_SIZE).sum::<usize>()
    }

    /// Whether one more entry with a `key_len`-byte key fits on the page
    pub fn fits(&self, key_len: usize) -> bool {
        self.encoded_len() + 2 + key_len + RID_SIZE <= PAGE_SIZE
    }

    pub fn contains(&self, key: &[u8], rid: Rid) -> bool {
        self.entries.iter().any(|(k, r)| k == key && *r == rid)
    }

    /// Encode into `page`, keeping its common header
    pub fn write_to(&self, page: &mut Page) -> Result<(), HashIndexError> {
        if self.encoded_len() > PAGE_SIZE {
            return Err(HashIndexError::KeyTooLarge(self.encoded_len()));
        }

        page.data[COMMON_HEADER_SIZE..].fill(0);
        LittleEndian::write_u16(&mut page.data[ENTRY_COUNT_OFFSET..NEXT_OFFSET], self.entries.len() as u16);
        LittleEndian::write_u32(
            &mut page.data[NEXT_OFFSET..ENTRIES_OFFSET],
            self.next.unwrap_or(INVALID_PAGE_ID),
        );

        let mut offset = ENTRIES_OFFSET;
        for (key, rid) in &self.entries {
            LittleEndian::write_u16(&mut page.data[offset..offset + 2], key.len() as u16);
            offset += 2;
            page.data[offset..offset + key.len()].copy_from_slice(key);
            offset += key.len();
            LittleEndian::write_u32(&mut page.data[offset..offset + 4], rid.page_id);
            LittleEndian::write_u32(&mut page.data[offset + 4..offset + RID_SIZE], rid.slot);
            offset += RID_SIZE;
        }
        Ok(())
    }

    pub fn read_from(page: &Page) -> Result<Self, HashIndexError> {
        let count = LittleEndian::read_u16(&page.data[ENTRY_COUNT_OFFSET..NEXT_OFFSET]) as usize;
        let next = LittleEndian::read_u32(&page.data[NEXT_OFFSET..ENTRIES_OFFSET]);

        let mut offset = ENTRIES_OFFSET;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let len_bytes = page.data.get(offset..offset + 2).ok_or(HashIndexError::InvalidPageFormat)?;
            let key_len = LittleEndian::read_u16(len_bytes) as usize;
            offset += 2;

            let entry = page
                .data
                .get(offset..offset + key_len + RID_SIZE)
                .ok_or(HashIndexError::InvalidPageFormat)?;
            let key = entry[..key_len].to_vec();
            let rid = Rid::new(
                LittleEndian::read_u32(&entry[key_len..key_len + 4]),
                LittleEndian::read_u32(&entry[key_len + 4..]),
            );
            offset += key_len + RID_SIZE;
            entries.push((key, rid));
        }

        Ok(Self { entries, next: (next != INVALID_PAGE_ID).then_some(next) })
    }
}
