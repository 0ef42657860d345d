use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
    #[error("Buffer of {0} bytes is not one page")]
    InvalidBufferSize(usize),
}

struct DbFile {
    file: File,
    /// Number of page slots the file currently holds
    num_pages: PageId,
    /// Ids handed back by `deallocate_page`, reused before growing the file
    free_pages: Vec<PageId>,
}

/// DiskManager is responsible for handling the actual disk I/O operations:
/// fixed-size page transfers against the database file and appends to the
/// log file that sits next to it.
pub struct DiskManager {
    db_path: PathBuf,
    log_path: PathBuf,
    db_file: Mutex<DbFile>,
    log_file: Mutex<File>,
    num_writes: AtomicU64,
    num_flushes: AtomicU64,
}

impl DiskManager {
    /// Open (or create) the database file and its `<db>.log` companion
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let db_path = db_path.as_ref().to_path_buf();
        let log_path = Self::log_path_for(&db_path);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;
        let num_pages = (file.metadata()?.len() / PAGE_SIZE as u64) as PageId;

        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&log_path)?;

        debug!("Opened database file {:?} with {} pages", db_path, num_pages);

        Ok(Self {
            db_path,
            log_path,
            db_file: Mutex::new(DbFile {
                file,
                num_pages,
                free_pages: Vec::new(),
            }),
            log_file: Mutex::new(log_file),
            num_writes: AtomicU64::new(0),
            num_flushes: AtomicU64::new(0),
        })
    }

    /// Path of the log file belonging to a database file
    pub fn log_path_for(db_path: &Path) -> PathBuf {
        let mut name = OsString::from(db_path.as_os_str());
        name.push(".log");
        PathBuf::from(name)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Read a page from disk. Reading past the end of the file yields zeros.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }
        if buf.len() != PAGE_SIZE {
            return Err(DiskManagerError::InvalidBufferSize(buf.len()));
        }

        let offset = Self::page_offset(page_id);
        let mut db = self.db_file.lock();
        let file_size = db.file.metadata()?.len();

        if offset >= file_size {
            buf.fill(0);
            return Ok(());
        }

        db.file.seek(SeekFrom::Start(offset))?;
        // A short final page (partial write before a crash) reads as zero-padded
        let available = ((file_size - offset) as usize).min(PAGE_SIZE);
        db.file.read_exact(&mut buf[..available])?;
        buf[available..].fill(0);

        Ok(())
    }

    /// Write a page to disk
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }
        if buf.len() != PAGE_SIZE {
            return Err(DiskManagerError::InvalidBufferSize(buf.len()));
        }

        let offset = Self::page_offset(page_id);
        let mut db = self.db_file.lock();
        db.file.seek(SeekFrom::Start(offset))?;
        db.file.write_all(buf)?;
        db.file.flush()?;

        if page_id >= db.num_pages {
            db.num_pages = page_id + 1;
        }
        self.num_writes.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }

    /// Allocate a page id, reusing a deallocated one when available.
    /// Fresh ids extend the file with a zeroed page.
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        let mut db = self.db_file.lock();

        if let Some(page_id) = db.free_pages.pop() {
            return Ok(page_id);
        }

        let new_page_id = db.num_pages;
        db.file.seek(SeekFrom::Start(Self::page_offset(new_page_id)))?;
        db.file.write_all(&[0u8; PAGE_SIZE])?;
        db.file.flush()?;
        db.num_pages += 1;

        Ok(new_page_id)
    }

    /// Mark a page id free for reuse. The free list is not persisted.
    pub fn deallocate_page(&self, page_id: PageId) {
        let mut db = self.db_file.lock();
        if page_id < db.num_pages && !db.free_pages.contains(&page_id) {
            db.free_pages.push(page_id);
        }
    }

    /// Number of page slots in the database file
    pub fn num_pages(&self) -> PageId {
        self.db_file.lock().num_pages
    }

    pub fn file_size(&self) -> Result<u64, DiskManagerError> {
        Ok(self.db_file.lock().file.metadata()?.len())
    }

    /// Force database file contents to stable storage
    pub fn sync(&self) -> Result<(), DiskManagerError> {
        self.db_file.lock().file.sync_data()?;
        Ok(())
    }

    /// Append bytes to the log file and force them to stable storage
    pub fn write_log(&self, data: &[u8]) -> Result<(), DiskManagerError> {
        if data.is_empty() {
            return Ok(());
        }

        let mut log = self.log_file.lock();
        log.seek(SeekFrom::End(0))?;
        log.write_all(data)?;
        log.sync_data()?;
        self.num_flushes.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }

    /// Read log bytes starting at `offset`. Returns the number of bytes read,
    /// which is short only at the end of the file.
    pub fn read_log(&self, offset: u64, buf: &mut [u8]) -> Result<usize, DiskManagerError> {
        let mut log = self.log_file.lock();
        let size = log.metadata()?.len();
        if offset >= size {
            return Ok(0);
        }

        log.seek(SeekFrom::Start(offset))?;
        let len = ((size - offset) as usize).min(buf.len());
        log.read_exact(&mut buf[..len])?;
        Ok(len)
    }

    /// Read the whole log file
    pub fn read_log_all(&self) -> Result<Vec<u8>, DiskManagerError> {
        let mut log = self.log_file.lock();
        let mut bytes = Vec::new();
        log.seek(SeekFrom::Start(0))?;
        log.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    pub fn log_size(&self) -> Result<u64, DiskManagerError> {
        Ok(self.log_file.lock().metadata()?.len())
    }

    /// Cut the log file back to `len` bytes, dropping a torn tail
    pub fn truncate_log(&self, len: u64) -> Result<(), DiskManagerError> {
        let log = self.log_file.lock();
        log.set_len(len)?;
        log.sync_all()?;
        Ok(())
    }

    /// Number of page writes issued so far
    pub fn num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::Relaxed)
    }

    /// Number of log flushes issued so far
    pub fn num_flushes(&self) -> u64 {
        self.num_flushes.load(Ordering::Relaxed)
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id as u64 * PAGE_SIZE as u64
    }
}
