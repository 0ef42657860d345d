use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use keeldb::common::types::{INVALID_LSN, Rid};
use keeldb::storage::disk::DiskManager;
use keeldb::transaction::wal::{LogManager, LogManagerConfig, LogRecordContent};

fn config() -> LogManagerConfig {
    LogManagerConfig {
        flush_interval: Duration::from_millis(5),
        ..LogManagerConfig::default()
    }
}

fn open(db_path: &Path) -> Result<(Arc<DiskManager>, LogManager)> {
    let disk = Arc::new(DiskManager::new(db_path)?);
    let log = LogManager::new(Arc::clone(&disk), config())?;
    Ok((disk, log))
}

// Write ten insert records and return the log size
fn write_ten_records(db_path: &Path) -> Result<u64> {
    let (disk, log) = open(db_path)?;
    let mut prev = INVALID_LSN;
    for i in 0..10u8 {
        prev = log.append_log_record(
            1,
            prev,
            LogRecordContent::Insert { rid: Rid::new(0, i as u32), tuple: vec![i; 16] },
        )?;
    }
    log.flush_all()?;
    log.shutdown();
    Ok(disk.log_size()?)
}

#[test]
fn test_torn_tail_is_truncated_on_open() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("wal.db");
    let valid_len = write_ten_records(&db_path)?;

    // Half of a frame: a length prefix promising more bytes than follow
    {
        let mut file = OpenOptions::new().append(true).open(DiskManager::log_path_for(&db_path))?;
        file.write_all(&[0x40, 0, 0, 0, 1, 2, 3, 4, 9, 9])?;
    }

    let (disk, log) = open(&db_path)?;
    assert_eq!(disk.log_size()?, valid_len);
    assert_eq!(log.persistent_lsn(), 10);
    assert_eq!(log.next_lsn(), 11);

    // Appends continue right after the last good record
    let lsn = log.append_log_record(2, INVALID_LSN, LogRecordContent::Begin)?;
    assert_eq!(lsn, 11);
    log.flush(lsn)?;
    let lsns: Vec<u64> = log.iter()?.map(|r| r.lsn).collect();
    assert_eq!(lsns, (1..=11).collect::<Vec<_>>());

    Ok(())
}

#[test]
fn test_checksum_failure_ends_the_log() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("wal.db");
    let valid_len = write_ten_records(&db_path)?;

    // Flip a payload byte of the last record
    {
        let mut file = OpenOptions::new().write(true).open(DiskManager::log_path_for(&db_path))?;
        file.seek(SeekFrom::Start(valid_len - 2))?;
        file.write_all(&[0xFF])?;
    }

    let (disk, log) = open(&db_path)?;
    assert!(disk.log_size()? < valid_len);
    assert_eq!(log.next_lsn(), 10);
    assert_eq!(log.iter()?.count(), 9);

    Ok(())
}

#[test]
fn test_group_commit() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (disk, log) = open(&dir.path().join("wal.db"))?;
    let log = Arc::new(log);

    const THREADS: u32 = 8;
    const COMMITS: u32 = 25;

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let log = Arc::clone(&log);
            thread::spawn(move || -> Result<()> {
                let mut prev = INVALID_LSN;
                for _ in 0..COMMITS {
                    prev = log.append_log_record(t + 1, prev, LogRecordContent::Commit)?;
                    log.flush(prev)?;
                    assert!(log.persistent_lsn() >= prev);
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("committer panicked")?;
    }

    let total = u64::from(THREADS * COMMITS);
    assert_eq!(log.persistent_lsn(), total);
    assert_eq!(log.iter()?.count() as u64, total);
    // Never more than one log write per commit
    assert!(disk.num_flushes() <= total);

    Ok(())
}

#[test]
fn test_read_records_from_skips_older_lsns() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("wal.db");
    write_ten_records(&db_path)?;

    let (_disk, log) = open(&db_path)?;
    let records = log.read_records_from(7)?;
    assert_eq!(records.iter().map(|r| r.lsn).collect::<Vec<_>>(), vec![7, 8, 9, 10]);
    assert_eq!(records[0].prev_lsn, 6);

    Ok(())
}
