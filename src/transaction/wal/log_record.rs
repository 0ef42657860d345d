use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::types::{Lsn, PageId, Rid, TxnId, INVALID_PAGE_ID};

/// Error type for log record operations
#[derive(Error, Debug)]
pub enum LogRecordError {
    #[error("Failed to serialize log record: {0}")]
    SerializationError(String),

    #[error("Failed to deserialize log record: {0}")]
    DeserializationError(String),

    #[error("Invalid log record format")]
    InvalidFormat,
}

/// Result type for log record operations
pub type Result<T> = std::result::Result<T, LogRecordError>;

/// On-disk frame: `len: u32 | crc32: u32 | payload`
pub const FRAME_HEADER_SIZE: usize = 8;

/// Types of log records supported by the WAL system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogRecordType {
    /// Marks the beginning of a transaction
    Begin,
    /// Marks the successful completion of a transaction
    Commit,
    /// Marks the end of a rolled back transaction
    Abort,
    /// Records an insert operation (adding new data)
    Insert,
    /// Records a delete operation (removing existing data)
    Delete,
    /// Records an update operation (modifying existing data)
    Update,
    /// Records a table page being formatted and linked into its heap
    NewPage,
    /// Marks a checkpoint in the log
    Checkpoint,
    /// Records the undo of an earlier change
    Compensation,
    /// Releases tuple space held for rollback once its transaction ended
    Reclaim,
}

/// Tables captured by a checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointContent {
    /// Every record from this LSN on must be examined by analysis
    pub begin_lsn: Lsn,
    /// Transactions running at checkpoint time with their latest LSN
    pub active_transactions: Vec<(TxnId, Lsn)>,
    /// Dirty pages at checkpoint time with their recovery LSN
    pub dirty_pages: Vec<(PageId, Lsn)>,
}

/// Physical action carried by a compensation record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompensationAction {
    /// Undo of an insert
    RemoveTuple,
    /// Undo of a delete; the tuple bytes never left the page
    RestoreTuple,
    /// Undo of an update
    OverwriteTuple(Vec<u8>),
}

/// Payload of a log record, one variant per record type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecordContent {
    Begin,
    Commit,
    Abort,
    Insert {
        rid: Rid,
        tuple: Vec<u8>,
    },
    Delete {
        rid: Rid,
        tuple: Vec<u8>,
    },
    Update {
        rid: Rid,
        old_tuple: Vec<u8>,
        new_tuple: Vec<u8>,
    },
    NewPage {
        page_id: PageId,
        /// Page whose next link now points at `page_id`, or INVALID_PAGE_ID
        prev_page_id: PageId,
    },
    Checkpoint(CheckpointContent),
    Compensation {
        rid: Rid,
        /// Next record of the same transaction still to be undone
        undo_next_lsn: Lsn,
        action: CompensationAction,
    },
    /// Logged after `Commit`, or before `Abort`, for every slot the
    /// transaction deleted or updated
    Reclaim {
        rid: Rid,
    },
}

impl LogRecordContent {
    pub fn record_type(&self) -> LogRecordType {
        match self {
            LogRecordContent::Begin => LogRecordType::Begin,
            LogRecordContent::Commit => LogRecordType::Commit,
            LogRecordContent::Abort => LogRecordType::Abort,
            LogRecordContent::Insert { .. } => LogRecordType::Insert,
            LogRecordContent::Delete { .. } => LogRecordType::Delete,
            LogRecordContent::Update { .. } => LogRecordType::Update,
            LogRecordContent::NewPage { .. } => LogRecordType::NewPage,
            LogRecordContent::Checkpoint(_) => LogRecordType::Checkpoint,
            LogRecordContent::Compensation { .. } => LogRecordType::Compensation,
            LogRecordContent::Reclaim { .. } => LogRecordType::Reclaim,
        }
    }

    /// Pages whose contents this record changes
    pub fn touched_pages(&self) -> Vec<PageId> {
        match self {
            LogRecordContent::Insert { rid, .. }
            | LogRecordContent::Delete { rid, .. }
            | LogRecordContent::Update { rid, .. }
            | LogRecordContent::Compensation { rid, .. }
            | LogRecordContent::Reclaim { rid } => vec![rid.page_id],
            LogRecordContent::NewPage { page_id, prev_page_id } => {
                if *prev_page_id == INVALID_PAGE_ID {
                    vec![*page_id]
                } else {
                    vec![*page_id, *prev_page_id]
                }
            }
            _ => Vec::new(),
        }
    }
}

/// Main log record structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Log Sequence Number - unique identifier for this log record
    pub lsn: Lsn,
    /// Transaction ID that generated this log record
    pub txn_id: TxnId,
    /// LSN of the previous log record in this transaction
    pub prev_lsn: Lsn,
    /// Content of the log record, depends on the record type
    pub content: LogRecordContent,
}

impl LogRecord {
    pub fn new(lsn: Lsn, txn_id: TxnId, prev_lsn: Lsn, content: LogRecordContent) -> Self {
        Self {
            lsn,
            txn_id,
            prev_lsn,
            content,
        }
    }

    pub fn record_type(&self) -> LogRecordType {
        self.content.record_type()
    }

    /// Serialize the log record to bytes
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| LogRecordError::SerializationError(e.to_string()))
    }

    /// Deserialize bytes into a log record
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| LogRecordError::DeserializationError(e.to_string()))
    }

    /// Size of the framed record. Integers are fixed width, so the LSN value
    /// does not change it.
    pub fn frame_len(&self) -> Result<usize> {
        let payload = bincode::serialized_size(self)
            .map_err(|e| LogRecordError::SerializationError(e.to_string()))?;
        Ok(FRAME_HEADER_SIZE + payload as usize)
    }

    /// Serialize with the length and checksum prefix used in the log file
    pub fn encode_frame(&self) -> Result<Vec<u8>> {
        let payload = self.serialize()?;
        let mut frame = vec![0u8; FRAME_HEADER_SIZE + payload.len()];
        LittleEndian::write_u32(&mut frame[0..4], payload.len() as u32);
        LittleEndian::write_u32(&mut frame[4..8], crc32fast::hash(&payload));
        frame[FRAME_HEADER_SIZE..].copy_from_slice(&payload);
        Ok(frame)
    }

    /// Decode the frame at the start of `buf`, returning the record and the
    /// bytes consumed. Short, checksum-failing or undecodable frames yield
    /// `None`; callers treat that as the end of the log.
    pub fn decode_frame(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }
        let len = LittleEndian::read_u32(&buf[0..4]) as usize;
        let crc = LittleEndian::read_u32(&buf[4..8]);
        if len == 0 || buf.len() - FRAME_HEADER_SIZE < len {
            return None;
        }

        let payload = &buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len];
        if crc32fast::hash(payload) != crc {
            return None;
        }
        let record = Self::deserialize(payload).ok()?;
        Some((record, FRAME_HEADER_SIZE + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update_record() -> LogRecord {
        LogRecord::new(
            4,
            100,
            3,
            LogRecordContent::Update {
                rid: Rid::new(2, 1),
                old_tuple: vec![1, 2, 3],
                new_tuple: vec![4, 5, 6, 7],
            },
        )
    }

    #[test]
    fn test_frame_round_trip() {
        let record = update_record();
        let frame = record.encode_frame().unwrap();
        assert_eq!(frame.len(), record.frame_len().unwrap());

        let (decoded, consumed) = LogRecord::decode_frame(&frame).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(consumed, frame.len());
        assert_eq!(decoded.record_type(), LogRecordType::Update);
    }

    #[test]
    fn test_frame_len_ignores_lsn_value() {
        let mut record = update_record();
        let small = record.frame_len().unwrap();
        record.lsn = u64::MAX - 1;
        assert_eq!(record.frame_len().unwrap(), small);
    }

    #[test]
    fn test_torn_or_corrupt_frame_is_rejected() {
        let frame = update_record().encode_frame().unwrap();

        assert!(LogRecord::decode_frame(&frame[..frame.len() - 1]).is_none());
        assert!(LogRecord::decode_frame(&frame[..4]).is_none());

        let mut flipped = frame.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 0xFF;
        assert!(LogRecord::decode_frame(&flipped).is_none());

        assert!(LogRecord::decode_frame(&[0u8; 64]).is_none());
    }

    #[test]
    fn test_touched_pages() {
        let link = LogRecordContent::NewPage { page_id: 5, prev_page_id: 3 };
        assert_eq!(link.touched_pages(), vec![5, 3]);

        let first = LogRecordContent::NewPage { page_id: 5, prev_page_id: INVALID_PAGE_ID };
        assert_eq!(first.touched_pages(), vec![5]);

        let clr = LogRecordContent::Compensation {
            rid: Rid::new(9, 0),
            undo_next_lsn: 2,
            action: CompensationAction::RemoveTuple,
        };
        assert_eq!(clr.touched_pages(), vec![9]);
        assert_eq!(LogRecordContent::Reclaim { rid: Rid::new(4, 2) }.touched_pages(), vec![4]);
        assert!(LogRecordContent::Commit.touched_pages().is_empty());
    }

    #[test]
    fn test_deserialize_invalid_data() {
        let result = LogRecord::deserialize(&[1, 2, 3, 4]);
        assert!(matches!(result, Err(LogRecordError::DeserializationError(_))));
    }
}
