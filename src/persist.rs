//! Flat-file persistence for [`WordStatsDb`].
//!
//! The file holds one line per (channel, user) entry:
//!
//! ```text
//! #lab,2,pizza:2,soup:0
//! ```
//!
//! Channel totals are never written; loading sums them from the records.
//! Flushing writes a snapshot to a temporary file next to the target and
//! renames it into place, so readers only ever see a complete file.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};
use wordstats_types::{UserId, Word};

use crate::store::{SharedStore, WordStatsDb};

const FIELD_SEP: char = ',';
const PAIR_SEP: char = ':';

/// One persisted (channel, user) entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub channel: String,
    pub user: UserId,
    pub counts: Vec<(Word, u64)>,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("corrupt word stats file {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("i/o error on word stats file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PersistError {
    fn io(path: &Path, source: io::Error) -> Self {
        PersistError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub fn format_record(record: &Record) -> String {
    let mut line = format!("{}{FIELD_SEP}{}", record.channel, record.user);
    for (word, count) in &record.counts {
        line.push(FIELD_SEP);
        line.push_str(&format!("{word}{PAIR_SEP}{count}"));
    }
    line
}

pub fn parse_record(line: &str) -> Result<Record, String> {
    let mut fields = line.split(FIELD_SEP);
    let channel = fields
        .next()
        .filter(|c| !c.is_empty())
        .ok_or("missing channel")?;
    let user = fields.next().ok_or("missing user id")?;
    let user = user
        .parse::<UserId>()
        .map_err(|e| format!("invalid user id {user:?}: {e}"))?;

    let mut counts = Vec::new();
    for pair in fields {
        let (word, count) = pair
            .split_once(PAIR_SEP)
            .ok_or_else(|| format!("expected word:count, got {pair:?}"))?;
        let word = Word::parse(word).map_err(|e| e.to_string())?;
        if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid count {count:?} for {word}"));
        }
        let count = count
            .parse::<u64>()
            .map_err(|e| format!("invalid count {count:?} for {word}: {e}"))?;
        counts.push((word, count));
    }

    Ok(Record {
        channel: channel.to_string(),
        user,
        counts,
    })
}

/// Load a store from `path`. A missing file yields an empty store.
pub fn load(path: &Path) -> Result<WordStatsDb, PersistError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("no word stats file at {}, starting empty", path.display());
            return Ok(WordStatsDb::new());
        }
        Err(e) => return Err(PersistError::io(path, e)),
    };

    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| PersistError::io(path, e))?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_record(line).map_err(|reason| PersistError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("line {}: {reason}", idx + 1),
        })?;
        records.push(record);
    }

    let count = records.len();
    let db = WordStatsDb::from_records(records).map_err(|e| PersistError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    info!("loaded {count} word stats records from {}", path.display());
    Ok(db)
}

/// Atomically replace `path` with the given records.
pub fn write_records(path: &Path, records: &[Record]) -> Result<(), PersistError> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| PersistError::io(path, e))?;

    let temp = NamedTempFile::new_in(parent).map_err(|e| PersistError::io(path, e))?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        for record in records {
            writeln!(writer, "{}", format_record(record)).map_err(|e| PersistError::io(path, e))?;
        }
        writer.flush().map_err(|e| PersistError::io(path, e))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|e| PersistError::io(path, e))?;
    temp.persist(path)
        .map_err(|e| PersistError::io(path, e.error))?;
    Ok(())
}

/// Owns the store file and the shared in-memory store.
///
/// Flushes snapshot the store under its read lock and write the file after
/// the lock is released, so ingestion only waits for the copy.
#[derive(Debug)]
pub struct PersistentStore {
    path: PathBuf,
    store: SharedStore,
    flush_lock: Mutex<()>,
    closed: AtomicBool,
}

impl PersistentStore {
    /// Load `path` (or start empty if it does not exist).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistError> {
        let path = path.as_ref().to_path_buf();
        let db = load(&path)?;
        Ok(Self {
            path,
            store: SharedStore::new(db),
            flush_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Write the current state to disk. A no-op once the store is closed.
    pub fn flush(&self) -> Result<(), PersistError> {
        let _guard = self
            .flush_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if self.is_closed() {
            debug!("store closed, skipping flush");
            return Ok(());
        }
        self.write_snapshot()
    }

    /// Flush one last time and refuse further flushes. Safe to call repeatedly.
    /// If the final write fails the store stays open.
    pub fn close(&self) -> Result<(), PersistError> {
        let _guard = self
            .flush_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.write_snapshot() {
            // Stay open so a later close or flush can retry.
            self.closed.store(false, Ordering::Release);
            return Err(e);
        }
        info!("word stats store closed");
        Ok(())
    }

    fn write_snapshot(&self) -> Result<(), PersistError> {
        let start = Instant::now();
        let records = self.store.read().records();
        write_records(&self.path, &records)?;
        debug!(
            "flushed {} records to {} in {} ms",
            records.len(),
            self.path.display(),
            start.elapsed().as_millis()
        );
        Ok(())
    }
}
