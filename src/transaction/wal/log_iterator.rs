use crate::common::types::Lsn;
use crate::transaction::wal::log_record::LogRecord;

/// Iterator over the framed records of a log image, in file order.
///
/// Iteration ends at the first frame that is short, fails its checksum or
/// does not decode. Everything from that point on is treated as a torn tail.
pub struct LogRecordIterator {
    data: Vec<u8>,
    offset: usize,
    start_lsn: Lsn,
    done: bool,
}

impl LogRecordIterator {
    pub fn new(data: Vec<u8>) -> Self {
        Self::starting_at(data, 0)
    }

    /// Skip records whose LSN is below `start_lsn`
    pub fn starting_at(data: Vec<u8>, start_lsn: Lsn) -> Self {
        Self {
            data,
            offset: 0,
            start_lsn,
            done: false,
        }
    }

    /// End offset of the last well-formed frame consumed so far
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes following the last well-formed frame
    pub fn trailing_bytes(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Exhaust the iterator and report the length of the valid prefix
    pub fn valid_len(mut self) -> usize {
        while self.next().is_some() {}
        self.offset
    }
}

impl Iterator for LogRecordIterator {
    type Item = LogRecord;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match LogRecord::decode_frame(&self.data[self.offset..]) {
                Some((record, consumed)) => {
                    self.offset += consumed;
                    if record.lsn >= self.start_lsn {
                        return Some(record);
                    }
                }
                None => self.done = true,
            }
        }
        None
    }
}
