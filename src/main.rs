use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use keeldb::storage::disk::DiskManager;
use keeldb::transaction::wal::{LogRecord, LogRecordContent, LogRecordIterator};
use keeldb::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(author, version, about = "KeelDB - inspect and maintain a KeelDB database file")]
struct Cli {
    /// Buffer pool size (number of pages) for commands that open the database
    #[arg(short, long, default_value_t = 1000)]
    buffer_size: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show database and log file information
    Info {
        /// Database file path
        db_path: PathBuf,
    },

    /// Print every well-formed log record
    DumpLog {
        /// Database file path
        db_path: PathBuf,

        /// Skip records below this LSN
        #[arg(long, default_value_t = 0)]
        from: u64,
    },

    /// Run crash recovery and report what it did
    Recover {
        /// Database file path
        db_path: PathBuf,
    },

    /// Open the database and take a checkpoint
    Checkpoint {
        /// Database file path
        db_path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Info { db_path } => info(&db_path),
        Commands::DumpLog { db_path, from } => dump_log(&db_path, from),
        Commands::Recover { db_path } => recover(&db_path, cli.buffer_size),
        Commands::Checkpoint { db_path } => checkpoint(&db_path, cli.buffer_size),
    }
}

fn open_existing(db_path: &Path) -> Result<DiskManager> {
    if !db_path.exists() {
        bail!("Database file {} does not exist", db_path.display());
    }
    DiskManager::new(db_path).with_context(|| format!("Failed to open {}", db_path.display()))
}

fn info(db_path: &Path) -> Result<()> {
    let disk = open_existing(db_path)?;
    let log_image = disk.read_log_all()?;
    let log_len = log_image.len();

    let mut iter = LogRecordIterator::new(log_image);
    let mut records = 0usize;
    let mut last_lsn = None;
    let mut last_checkpoint = None;
    for record in iter.by_ref() {
        records += 1;
        last_lsn = Some(record.lsn);
        if matches!(record.content, LogRecordContent::Checkpoint(_)) {
            last_checkpoint = Some(record.lsn);
        }
    }

    println!("Database file:   {}", disk.db_path().display());
    println!("Pages:           {}", disk.num_pages());
    println!("File size:       {} bytes", disk.file_size()?);
    println!("Log file:        {}", disk.log_path().display());
    println!("Log size:        {} bytes", log_len);
    println!("Log records:     {}", records);
    println!("Last LSN:        {}", last_lsn.map_or("-".to_string(), |l| l.to_string()));
    println!("Last checkpoint: {}", last_checkpoint.map_or("-".to_string(), |l| l.to_string()));
    if iter.trailing_bytes() > 0 {
        println!("Torn tail:       {} bytes (dropped on next open)", iter.trailing_bytes());
    }
    Ok(())
}

fn dump_log(db_path: &Path, from: u64) -> Result<()> {
    let disk = open_existing(db_path)?;
    for record in LogRecordIterator::starting_at(disk.read_log_all()?, from) {
        println!("{}", describe(&record));
    }
    Ok(())
}

fn describe(record: &LogRecord) -> String {
    let head = format!(
        "lsn={} txn={} prev={} {:?}",
        record.lsn,
        record.txn_id,
        record.prev_lsn,
        record.record_type()
    );
    let detail = match &record.content {
        LogRecordContent::Begin | LogRecordContent::Commit | LogRecordContent::Abort => String::new(),
        LogRecordContent::Insert { rid, tuple } | LogRecordContent::Delete { rid, tuple } => {
            format!(" rid={} tuple={}", rid, hex::encode(tuple))
        }
        LogRecordContent::Update { rid, old_tuple, new_tuple } => format!(
            " rid={} old={} new={}",
            rid,
            hex::encode(old_tuple),
            hex::encode(new_tuple)
        ),
        LogRecordContent::NewPage { page_id, prev_page_id } => format!(" page={} prev={}", page_id, prev_page_id),
        LogRecordContent::Checkpoint(content) => format!(
            " begin={} active={:?} dirty={:?}",
            content.begin_lsn, content.active_transactions, content.dirty_pages
        ),
        LogRecordContent::Compensation { rid, undo_next_lsn, action } => {
            format!(" rid={} undo_next={} action={:?}", rid, undo_next_lsn, action)
        }
        LogRecordContent::Reclaim { rid } => format!(" rid={}", rid),
    };
    head + &detail
}

fn open_database(db_path: &Path, buffer_size: usize) -> Result<Database> {
    if !db_path.exists() {
        bail!("Database file {} does not exist", db_path.display());
    }
    let config = DatabaseConfig {
        buffer_pool_size: buffer_size,
        ..DatabaseConfig::new(db_path)
    };
    Database::open(config).with_context(|| format!("Failed to open {}", db_path.display()))
}

fn recover(db_path: &Path, buffer_size: usize) -> Result<()> {
    let db = open_database(db_path, buffer_size)?;
    let stats = db.recovery_stats().clone();
    db.close()?;

    println!("Records scanned:  {}", stats.records_scanned);
    println!(
        "Checkpoint:       {}",
        stats.checkpoint_lsn.map_or("-".to_string(), |l| l.to_string())
    );
    println!("Redo start LSN:   {}", stats.redo_start_lsn);
    println!("Changes redone:   {}", stats.redo_applied);
    println!("Rolled back txns: {:?}", stats.losers);
    println!("Changes undone:   {}", stats.undone_changes);
    Ok(())
}

fn checkpoint(db_path: &Path, buffer_size: usize) -> Result<()> {
    let db = open_database(db_path, buffer_size)?;
    let lsn = db.checkpoint()?;
    db.close()?;
    println!("Checkpoint written at LSN {}", lsn);
    Ok(())
}
