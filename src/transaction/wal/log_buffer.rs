use thiserror::Error;

use crate::common::types::{Lsn, INVALID_LSN};

/// Error type for log buffer operations
#[derive(Error, Debug)]
pub enum LogBufferError {
    #[error("Buffer is full")]
    BufferFull,
}

/// Result type for log buffer operations
pub type Result<T> = std::result::Result<T, LogBufferError>;

/// A buffer segment containing framed log records.
///
/// The log manager keeps two: appenders fill the active one while the flush
/// thread writes out the other.
#[derive(Debug)]
pub struct BufferSegment {
    data: Vec<u8>,
    pos: usize,
    max_lsn: Lsn,
}

impl BufferSegment {
    /// Create a new buffer segment with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            pos: 0,
            max_lsn: INVALID_LSN,
        }
    }

    /// Check if the segment has enough space for the given data
    pub fn has_space(&self, data_len: usize) -> bool {
        self.pos + data_len <= self.data.len()
    }

    /// Append one framed record
    pub fn append(&mut self, lsn: Lsn, frame: &[u8]) -> Result<()> {
        if !self.has_space(frame.len()) {
            return Err(LogBufferError::BufferFull);
        }

        self.data[self.pos..self.pos + frame.len()].copy_from_slice(frame);
        self.pos += frame.len();
        self.max_lsn = self.max_lsn.max(lsn);

        Ok(())
    }

    /// Reset the segment for reuse
    pub fn reset(&mut self) {
        self.pos = 0;
        self.max_lsn = INVALID_LSN;
    }

    /// Get the content of the buffer up to the current position
    pub fn content(&self) -> &[u8] {
        &self.data[0..self.pos]
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Highest LSN held in this segment
    pub fn max_lsn(&self) -> Lsn {
        self.max_lsn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_append_and_reset() {
        let mut segment = BufferSegment::new(16);
        segment.append(3, &[1; 6]).unwrap();
        segment.append(4, &[2; 6]).unwrap();

        assert_eq!(segment.len(), 12);
        assert_eq!(segment.max_lsn(), 4);
        assert!(matches!(segment.append(5, &[3; 6]), Err(LogBufferError::BufferFull)));

        assert_eq!(&segment.content()[6..], &[2; 6]);
        segment.reset();
        assert!(segment.is_empty());
        assert_eq!(segment.max_lsn(), INVALID_LSN);
        assert_eq!(segment.capacity(), 16);
    }
}
