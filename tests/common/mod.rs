#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use keeldb::storage::buffer::BufferPoolManager;
use keeldb::transaction::{LockManagerConfig, LogManagerConfig};
use keeldb::{Database, DatabaseConfig};

// Create a buffer pool manager over a database file in a fresh temp dir
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, TempDir)> {
    let dir = tempfile::tempdir()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, dir.path().join("test.db"))?);
    Ok((buffer_pool, dir))
}

// Database configuration with fast background threads, for tests
pub fn test_db_config(dir: &TempDir) -> DatabaseConfig {
    DatabaseConfig {
        buffer_pool_size: 64,
        log: LogManagerConfig {
            flush_interval: Duration::from_millis(5),
            ..LogManagerConfig::default()
        },
        lock: LockManagerConfig {
            cycle_detection_interval: Duration::from_millis(10),
            ..LockManagerConfig::default()
        },
        ..DatabaseConfig::new(dir.path().join("test.db"))
    }
}

pub fn open_test_db(dir: &TempDir) -> Result<Database> {
    Ok(Database::open(test_db_config(dir))?)
}

// Generate test data of specified size
pub fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}
