use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Lsn, TxnId, INVALID_LSN};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::transaction::concurrency::Transaction;
use crate::transaction::wal::log_buffer::{BufferSegment, LogBufferError};
use crate::transaction::wal::log_iterator::LogRecordIterator;
use crate::transaction::wal::log_record::{LogRecord, LogRecordContent, LogRecordError};

/// Error type for log manager operations
#[derive(Error, Debug)]
pub enum LogManagerError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Disk error: {0}")]
    DiskError(#[from] DiskManagerError),

    #[error("Buffer error: {0}")]
    BufferError(#[from] LogBufferError),

    #[error("Log record error: {0}")]
    LogRecordError(#[from] LogRecordError),

    #[error("Log record of {size} bytes exceeds the {capacity} byte log buffer")]
    RecordTooLarge { size: usize, capacity: usize },

    #[error("Log flush failed; the log is no longer writable")]
    FlushFailed,
}

/// Result type for log manager operations
pub type Result<T> = std::result::Result<T, LogManagerError>;

/// Configuration for the log manager
#[derive(Debug, Clone)]
pub struct LogManagerConfig {
    /// Size of each of the two in-memory log buffers in bytes
    pub buffer_size: usize,

    /// Fill fraction of the active buffer that wakes the flush thread early
    pub flush_threshold: f32,

    /// Longest time a buffered record waits before the flush thread runs
    pub flush_interval: Duration,
}

impl Default for LogManagerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024 * 1024, // 1 MB
            flush_threshold: 0.75,
            flush_interval: Duration::from_millis(20),
        }
    }
}

impl LogManagerConfig {
    fn threshold_bytes(&self) -> usize {
        ((self.buffer_size as f32 * self.flush_threshold) as usize).clamp(1, self.buffer_size)
    }
}

enum FlushSignal {
    Flush,
    Shutdown,
}

struct LogState {
    /// Buffer appenders write into
    active: BufferSegment,
    next_lsn: Lsn,
}

struct LogShared {
    config: LogManagerConfig,
    disk_manager: Arc<DiskManager>,
    state: Mutex<LogState>,
    /// Signalled when the flush thread takes the active buffer
    space_available: Condvar,
    /// Signalled when `persistent_lsn` advances or a flush fails
    flushed: Condvar,
    persistent_lsn: AtomicU64,
    failed: AtomicBool,
    signal: Sender<FlushSignal>,
}

/// Manager for write-ahead logging.
///
/// Appends go to an in-memory buffer and never touch the disk. A dedicated
/// flush thread swaps the filled buffer for its spare and writes it out, so
/// all commits waiting on the same write complete together.
pub struct LogManager {
    shared: Arc<LogShared>,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
}

impl LogManager {
    /// Open the log file of `disk_manager`, drop any torn tail and start the
    /// flush thread
    pub fn new(disk_manager: Arc<DiskManager>, config: LogManagerConfig) -> Result<Self> {
        let image = disk_manager.read_log_all()?;
        let total = image.len();

        let mut iter = LogRecordIterator::new(image);
        let mut max_lsn = INVALID_LSN;
        let mut records = 0usize;
        for record in iter.by_ref() {
            max_lsn = max_lsn.max(record.lsn);
            records += 1;
        }

        let valid = iter.offset();
        if valid < total {
            warn!(
                "Truncating torn log tail: {} bytes after offset {} in {}",
                total - valid,
                valid,
                disk_manager.log_path().display()
            );
            disk_manager.truncate_log(valid as u64)?;
        }
        info!("Opened log with {} records, last LSN {}", records, max_lsn);

        let (signal, signal_rx) = bounded(1);
        let shared = Arc::new(LogShared {
            state: Mutex::new(LogState {
                active: BufferSegment::new(config.buffer_size),
                next_lsn: max_lsn + 1,
            }),
            config,
            disk_manager,
            space_available: Condvar::new(),
            flushed: Condvar::new(),
            persistent_lsn: AtomicU64::new(max_lsn),
            failed: AtomicBool::new(false),
            signal,
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("keeldb-log-flush".to_string())
            .spawn(move || run_flush_thread(thread_shared, signal_rx))?;

        Ok(Self {
            shared,
            flush_thread: Mutex::new(Some(handle)),
        })
    }

    /// Append a record and return its LSN. Only waits when the active
    /// buffer is full.
    pub fn append_log_record(&self, txn_id: TxnId, prev_lsn: Lsn, content: LogRecordContent) -> Result<Lsn> {
        self.append(LogRecord::new(INVALID_LSN, txn_id, prev_lsn, content), None)
    }

    /// Append a record on behalf of `txn`, chaining it to the transaction's
    /// previous record. The chain link is updated under the log lock so the
    /// transaction's last LSN never runs ahead of the log.
    pub fn append_txn_record(&self, txn: &Transaction, content: LogRecordContent) -> Result<Lsn> {
        self.append(LogRecord::new(INVALID_LSN, txn.id(), INVALID_LSN, content), Some(txn))
    }

    fn append(&self, mut record: LogRecord, txn: Option<&Transaction>) -> Result<Lsn> {
        let shared = &self.shared;
        let frame_len = record.frame_len()?;
        let capacity = shared.config.buffer_size;
        if frame_len > capacity {
            return Err(LogManagerError::RecordTooLarge { size: frame_len, capacity });
        }

        let mut state = shared.state.lock();
        while !state.active.has_space(frame_len) {
            if shared.failed.load(Ordering::Acquire) {
                return Err(LogManagerError::FlushFailed);
            }
            shared.wake_flusher();
            shared.space_available.wait(&mut state);
        }

        record.lsn = state.next_lsn;
        if let Some(txn) = txn {
            record.prev_lsn = txn.prev_lsn();
        }
        let frame = record.encode_frame()?;
        state.active.append(record.lsn, &frame)?;
        state.next_lsn += 1;
        if let Some(txn) = txn {
            txn.set_prev_lsn(record.lsn);
        }

        if state.active.len() >= shared.config.threshold_bytes() {
            shared.wake_flusher();
        }
        Ok(record.lsn)
    }

    /// Block until every record up to `lsn` is on disk
    pub fn flush(&self, lsn: Lsn) -> Result<()> {
        let shared = &self.shared;
        if lsn == INVALID_LSN || shared.persistent_lsn.load(Ordering::Acquire) >= lsn {
            return Ok(());
        }

        let mut state = shared.state.lock();
        // Nothing past the last assigned LSN can ever become durable
        let target = lsn.min(state.next_lsn - 1);
        loop {
            if shared.persistent_lsn.load(Ordering::Acquire) >= target {
                return Ok(());
            }
            if shared.failed.load(Ordering::Acquire) {
                return Err(LogManagerError::FlushFailed);
            }
            shared.wake_flusher();
            shared.flushed.wait(&mut state);
        }
    }

    /// Block until everything appended so far is on disk
    pub fn flush_all(&self) -> Result<()> {
        let last = self.shared.state.lock().next_lsn - 1;
        self.flush(last)
    }

    /// LSN the next appended record will get
    pub fn next_lsn(&self) -> Lsn {
        self.shared.state.lock().next_lsn
    }

    /// Highest LSN known to be on disk
    pub fn persistent_lsn(&self) -> Lsn {
        self.shared.persistent_lsn.load(Ordering::Acquire)
    }

    /// Flush, then iterate over everything in the log file
    pub fn iter(&self) -> Result<LogRecordIterator> {
        self.flush_all()?;
        Ok(LogRecordIterator::new(self.shared.disk_manager.read_log_all()?))
    }

    /// Flush, then load every record from `start_lsn` on
    pub fn read_records_from(&self, start_lsn: Lsn) -> Result<Vec<LogRecord>> {
        self.flush_all()?;
        let image = self.shared.disk_manager.read_log_all()?;
        Ok(LogRecordIterator::starting_at(image, start_lsn).collect())
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.shared.disk_manager
    }

    /// Flush what is buffered and stop the flush thread. Called on drop.
    pub fn shutdown(&self) {
        let Some(handle) = self.flush_thread.lock().take() else {
            return;
        };
        // The thread drains the channel, so a blocking send cannot hang
        let _ = self.shared.signal.send(FlushSignal::Shutdown);
        if handle.join().is_err() {
            error!("Log flush thread panicked");
        }
        debug!("Log manager stopped at persistent LSN {}", self.persistent_lsn());
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl LogShared {
    fn wake_flusher(&self) {
        // A full channel means a wake-up is already pending
        let _ = self.signal.try_send(FlushSignal::Flush);
    }

    /// Swap out the active buffer and write it. Only the flush thread calls
    /// this, so writes reach the file in LSN order.
    fn flush_active(&self, spare: &mut BufferSegment) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.active.is_empty() {
                return Ok(());
            }
            std::mem::swap(&mut state.active, spare);
        }
        self.space_available.notify_all();

        let result = self.disk_manager.write_log(spare.content());
        let max_lsn = spare.max_lsn();
        let bytes = spare.len();
        spare.reset();
        result?;

        self.persistent_lsn.fetch_max(max_lsn, Ordering::AcqRel);
        debug!("Flushed {} log bytes up to LSN {}", bytes, max_lsn);

        let _state = self.state.lock();
        self.flushed.notify_all();
        Ok(())
    }

    fn fail(&self, err: LogManagerError) {
        error!("Log flush failed: {}", err);
        self.failed.store(true, Ordering::Release);
        let _state = self.state.lock();
        self.flushed.notify_all();
        self.space_available.notify_all();
    }
}

fn run_flush_thread(shared: Arc<LogShared>, signal: Receiver<FlushSignal>) {
    let mut spare = BufferSegment::new(shared.config.buffer_size);
    loop {
        let shutting_down = match signal.recv_timeout(shared.config.flush_interval) {
            Ok(FlushSignal::Flush) | Err(RecvTimeoutError::Timeout) => false,
            Ok(FlushSignal::Shutdown) | Err(RecvTimeoutError::Disconnected) => true,
        };

        if !shared.failed.load(Ordering::Acquire) {
            if let Err(e) = shared.flush_active(&mut spare) {
                shared.fail(e);
            }
        }

        if shutting_down {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir, buffer_size: usize) -> (Arc<DiskManager>, LogManager) {
        let disk = Arc::new(DiskManager::new(dir.path().join("test.db")).unwrap());
        let config = LogManagerConfig {
            buffer_size,
            ..LogManagerConfig::default()
        };
        let log = LogManager::new(disk.clone(), config).unwrap();
        (disk, log)
    }

    #[test]
    fn test_append_assigns_sequential_lsns() {
        let dir = TempDir::new().unwrap();
        let (_disk, log) = open(&dir, 4096);

        let first = log.append_log_record(1, INVALID_LSN, LogRecordContent::Begin).unwrap();
        let second = log.append_log_record(1, first, LogRecordContent::Commit).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(log.next_lsn(), 3);

        log.flush(second).unwrap();
        assert!(log.persistent_lsn() >= second);

        let records: Vec<_> = log.iter().unwrap().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].prev_lsn, first);
    }

    #[test]
    fn test_record_too_large() {
        let dir = TempDir::new().unwrap();
        let (_disk, log) = open(&dir, 128);

        let content = LogRecordContent::Insert {
            rid: crate::common::types::Rid::new(0, 0),
            tuple: vec![7; 512],
        };
        let result = log.append_log_record(1, INVALID_LSN, content);
        assert!(matches!(result, Err(LogManagerError::RecordTooLarge { .. })));
    }

    #[test]
    fn test_small_buffer_waits_for_space() {
        let dir = TempDir::new().unwrap();
        let (_disk, log) = open(&dir, 256);

        let mut last = INVALID_LSN;
        for _ in 0..200 {
            last = log.append_log_record(1, last, LogRecordContent::Begin).unwrap();
        }
        log.flush_all().unwrap();
        assert_eq!(log.iter().unwrap().count(), 200);
    }

    #[test]
    fn test_lsns_continue_after_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let (_disk, log) = open(&dir, 4096);
            for _ in 0..5 {
                log.append_log_record(1, INVALID_LSN, LogRecordContent::Begin).unwrap();
            }
        }

        let (_disk, log) = open(&dir, 4096);
        assert_eq!(log.persistent_lsn(), 5);
        assert_eq!(log.next_lsn(), 6);
    }

    #[test]
    fn test_flush_of_invalid_lsn_is_noop() {
        let dir = TempDir::new().unwrap();
        let (disk, log) = open(&dir, 4096);
        log.flush(INVALID_LSN).unwrap();
        log.flush_all().unwrap();
        assert_eq!(disk.log_size().unwrap(), 0);
    }
}
