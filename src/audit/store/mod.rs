//! Ledger Store
//!
//! Durable, append-only holders of the entry sequence. Every backend rejects
//! an entry whose sequence is not exactly the current entry count, so a
//! stored sequence is always gapless even if two coordinators share a store.

pub mod file;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use std::sync::Arc;

use crate::audit::entry::LedgerEntry;
use crate::config::{StorageBackend, StorageConfig};
use crate::error::{LedgerError, Result};

pub use file::{FileSnapshot, FileStore};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A stored row as read back from a backend
#[derive(Debug, Clone, PartialEq)]
pub enum StoredRecord {
    Entry(LedgerEntry),
    /// Row whose stored fields no longer decode into an entry
    Undecodable(UndecodableRow),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndecodableRow {
    pub sequence: u64,
    /// Stored `hash`, when it can still be read
    pub hash: Option<String>,
    pub reason: String,
}

impl StoredRecord {
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Entry(entry) => entry.sequence,
            Self::Undecodable(row) => row.sequence,
        }
    }

    /// The decoded entry, or `Corrupt` for a row that does not decode
    pub fn into_entry(self) -> Result<LedgerEntry> {
        match self {
            Self::Entry(entry) => Ok(entry),
            Self::Undecodable(row) => Err(LedgerError::corrupt_row(row.sequence, row.reason)),
        }
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Durably record `entry`. On error nothing of the entry is persisted.
    async fn append(&self, entry: &LedgerEntry) -> Result<()>;

    /// Number of stored rows, decodable or not
    async fn len(&self) -> Result<u64>;

    /// Row with the highest sequence
    async fn last_record(&self) -> Result<Option<StoredRecord>>;

    /// Rows with `from <= sequence <= to`, ascending. Rows that no longer
    /// decode are returned as `StoredRecord::Undecodable`.
    async fn read_records(&self, from: u64, to: u64) -> Result<Vec<StoredRecord>>;

    /// Entry with the highest sequence
    async fn last(&self) -> Result<Option<LedgerEntry>> {
        self.last_record().await?.map(StoredRecord::into_entry).transpose()
    }

    /// Entries with `from <= sequence <= to`, ascending. Fails with
    /// `Corrupt` if any row in the range does not decode.
    async fn read_range(&self, from: u64, to: u64) -> Result<Vec<LedgerEntry>> {
        self.read_records(from, to)
            .await?
            .into_iter()
            .map(StoredRecord::into_entry)
            .collect()
    }

    async fn get(&self, sequence: u64) -> Result<Option<LedgerEntry>> {
        Ok(self.read_range(sequence, sequence).await?.into_iter().next())
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Reject an entry that would not extend a store of `stored` entries
pub(crate) fn check_next_sequence(stored: u64, entry: &LedgerEntry) -> Result<()> {
    if entry.sequence != stored {
        return Err(LedgerError::SequenceConflict {
            expected: stored,
            found: entry.sequence,
        });
    }
    Ok(())
}

/// Open the backend named in the configuration
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn LedgerStore>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::File => {
            let path = config.path.as_ref().ok_or_else(|| {
                LedgerError::Config("storage.path is required for the file backend".to_string())
            })?;
            Ok(Arc::new(FileStore::open(path)?))
        }
        StorageBackend::Sqlite => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                LedgerError::Config(
                    "storage.database_url is required for the sqlite backend".to_string(),
                )
            })?;
            Ok(Arc::new(SqliteStore::connect(url).await?))
        }
    }
}
