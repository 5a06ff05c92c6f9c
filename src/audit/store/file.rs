//! Append-only JSON Lines store
//!
//! One entry per line, written with a single `write_all` followed by
//! `sync_data` on the blocking pool. A failed write truncates the file back
//! to the last committed byte, and a torn trailing line left by a crash is
//! dropped on open. If that truncation itself fails the store refuses further
//! appends until it is reopened.
//!
//! Lines that no longer decode are indexed like any other line and handed to
//! readers as `StoredRecord::Undecodable`.

use async_trait::async_trait;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::audit::entry::LedgerEntry;
use crate::audit::store::{check_next_sequence, LedgerStore, StoredRecord, UndecodableRow};
use crate::error::{LedgerError, Result};

pub struct FileStore {
    path: PathBuf,
    state: Mutex<FileState>,
}

struct FileState {
    file: Arc<File>,
    /// Start offset of each stored line
    offsets: Vec<u64>,
    /// End of committed data
    committed_len: u64,
    last: Option<StoredRecord>,
    /// Set when a failed write could not be rolled back
    poisoned: bool,
    faults: Faults,
}

/// Contents of a ledger file read without touching it
#[derive(Debug, Clone, PartialEq)]
pub struct FileSnapshot {
    pub records: Vec<StoredRecord>,
    /// Bytes after the last newline
    pub torn_tail: u64,
}

/// Write failures forced by tests
#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    #[cfg(test)]
    torn_write: bool,
    #[cfg(test)]
    fail_rollback: bool,
}

struct WriteFailure {
    write: io::Error,
    rollback: Option<io::Error>,
}

struct LineScan {
    offsets: Vec<u64>,
    records: Vec<StoredRecord>,
    committed_len: u64,
}

impl FileStore {
    /// Open (or create) the ledger file and index its entries
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let LineScan {
            offsets,
            mut records,
            committed_len,
        } = scan_lines(&contents);

        if committed_len < contents.len() as u64 {
            warn!(
                "Dropping {} bytes of torn trailing entry from {:?}",
                contents.len() as u64 - committed_len,
                path
            );
            file.set_len(committed_len)?;
            file.sync_data()?;
        }

        let undecodable = records
            .iter()
            .filter(|r| matches!(r, StoredRecord::Undecodable(_)))
            .count();
        if undecodable > 0 {
            warn!(
                "{} entries in {:?} cannot be decoded; run verification",
                undecodable, path
            );
        }

        info!("Opened ledger file {:?} with {} entries", path, offsets.len());

        Ok(Self {
            path,
            state: Mutex::new(FileState {
                file: Arc::new(file),
                offsets,
                committed_len,
                last: records.pop(),
                poisoned: false,
                faults: Faults::default(),
            }),
        })
    }

    /// Read a ledger file without creating, locking, or repairing it
    pub fn inspect(path: impl AsRef<Path>) -> Result<FileSnapshot> {
        let contents = std::fs::read(path.as_ref())?;
        let scan = scan_lines(&contents);
        Ok(FileSnapshot {
            records: scan.records,
            torn_tail: contents.len() as u64 - scan.committed_len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn scan_lines(contents: &[u8]) -> LineScan {
    let committed_len = match contents.iter().rposition(|&b| b == b'\n') {
        Some(pos) => pos as u64 + 1,
        None => 0,
    };

    let mut offsets = Vec::new();
    let mut records = Vec::new();
    let mut start = 0u64;
    for line in contents[..committed_len as usize].split_inclusive(|&b| b == b'\n') {
        if !is_blank(line) {
            records.push(decode_line(line, offsets.len() as u64));
            offsets.push(start);
        }
        start += line.len() as u64;
    }

    LineScan {
        offsets,
        records,
        committed_len,
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| b.is_ascii_whitespace())
}

/// Decode the line at position `sequence`
fn decode_line(line: &[u8], sequence: u64) -> StoredRecord {
    match serde_json::from_slice::<LedgerEntry>(line) {
        Ok(entry) => StoredRecord::Entry(entry),
        Err(e) => StoredRecord::Undecodable(UndecodableRow {
            sequence,
            hash: salvage_hash(line),
            reason: e.to_string(),
        }),
    }
}

/// The `hash` field of a line that is still a JSON object
fn salvage_hash(line: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(line).ok()?;
    value.get("hash")?.as_str().map(str::to_string)
}

/// Append `line` and sync it; on failure cut the file back to `committed_len`
fn write_line(
    file: &File,
    line: &[u8],
    committed_len: u64,
    faults: Faults,
) -> std::result::Result<(), WriteFailure> {
    match write_and_sync(file, line, faults) {
        Ok(()) => Ok(()),
        Err(write) => Err(WriteFailure {
            write,
            rollback: roll_back(file, committed_len, faults).err(),
        }),
    }
}

#[cfg_attr(not(test), allow(unused_variables))]
fn write_and_sync(mut file: &File, line: &[u8], faults: Faults) -> io::Result<()> {
    #[cfg(test)]
    if faults.torn_write {
        file.write_all(&line[..line.len() / 2])?;
        return Err(io::Error::new(io::ErrorKind::Other, "injected torn write"));
    }
    file.write_all(line)?;
    file.sync_data()
}

#[cfg_attr(not(test), allow(unused_variables))]
fn roll_back(file: &File, committed_len: u64, faults: Faults) -> io::Result<()> {
    #[cfg(test)]
    if faults.fail_rollback {
        return Err(io::Error::new(io::ErrorKind::Other, "injected rollback failure"));
    }
    file.set_len(committed_len)?;
    file.sync_data()
}

fn read_span(path: &Path, start: u64, end: u64) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; (end - start) as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

#[async_trait]
impl LedgerStore for FileStore {
    async fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.poisoned {
            return Err(LedgerError::StorageWrite(format!(
                "{:?} has unrolled partial data from an earlier failed write; reopen the store",
                self.path
            )));
        }
        check_next_sequence(state.offsets.len() as u64, entry)?;

        let mut line = serde_json::to_vec(entry)
            .map_err(|e| LedgerError::storage_write("failed to serialize entry", e))?;
        line.push(b'\n');
        let line_len = line.len() as u64;

        let file = state.file.clone();
        let committed = state.committed_len;
        let faults = state.faults;
        let outcome =
            tokio::task::spawn_blocking(move || write_line(&file, &line, committed, faults)).await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(WriteFailure {
                write,
                rollback: None,
            })) => {
                return Err(LedgerError::storage_write("failed to write ledger file", write));
            }
            Ok(Err(WriteFailure {
                write,
                rollback: Some(rollback),
            })) => {
                state.poisoned = true;
                error!(
                    "Failed to roll back partial write to {:?}: {}; refusing further appends",
                    self.path, rollback
                );
                return Err(LedgerError::StorageWrite(format!(
                    "failed to write ledger file: {}; rollback failed: {}",
                    write, rollback
                )));
            }
            Err(join) => {
                state.poisoned = true;
                error!("Ledger write task for {:?} did not finish: {}", self.path, join);
                return Err(LedgerError::storage_write("ledger write task failed", join));
            }
        }

        let offset = state.committed_len;
        state.offsets.push(offset);
        state.committed_len += line_len;
        state.last = Some(StoredRecord::Entry(entry.clone()));

        debug!("Wrote entry {} at offset {}", entry.sequence, offset);
        Ok(())
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.state.lock().await.offsets.len() as u64)
    }

    async fn last_record(&self) -> Result<Option<StoredRecord>> {
        Ok(self.state.lock().await.last.clone())
    }

    async fn read_records(&self, from: u64, to: u64) -> Result<Vec<StoredRecord>> {
        // Only committed bytes are read, so an in-flight append is never seen.
        let (start, end) = {
            let state = self.state.lock().await;
            let count = state.offsets.len() as u64;
            if from > to || from >= count {
                return Ok(Vec::new());
            }
            let start = state.offsets[from as usize];
            let end = if to < count - 1 {
                state.offsets[(to + 1) as usize]
            } else {
                state.committed_len
            };
            (start, end)
        };

        let path = self.path.clone();
        let buf = tokio::task::spawn_blocking(move || read_span(&path, start, end))
            .await
            .map_err(|e| LedgerError::StorageRead(format!("ledger read task failed: {}", e)))??;

        let mut records = Vec::new();
        for line in buf.split_inclusive(|&b| b == b'\n') {
            if !is_blank(line) {
                records.push(decode_line(line, from + records.len() as u64));
            }
        }
        Ok(records)
    }
}
