use async_trait::async_trait;
use std::sync::RwLock;

use crate::audit::entry::LedgerEntry;
use crate::audit::store::{check_next_sequence, LedgerStore, StoredRecord};
use crate::error::{LedgerError, Result};

/// In-memory store for tests, local demos, and offline verification
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<Vec<LedgerEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an exported entry sequence as-is. Nothing is checked here; run
    /// the verifier over the result.
    pub fn from_entries(entries: Vec<LedgerEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Copy of every stored entry
    pub fn snapshot(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.read()?.clone())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<LedgerEntry>>> {
        self.entries
            .read()
            .map_err(|_| LedgerError::StorageRead("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| LedgerError::StorageWrite("memory store lock poisoned".to_string()))?;
        check_next_sequence(entries.len() as u64, entry)?;
        entries.push(entry.clone());
        Ok(())
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.read()?.len() as u64)
    }

    async fn last_record(&self) -> Result<Option<StoredRecord>> {
        Ok(self.read()?.last().cloned().map(StoredRecord::Entry))
    }

    async fn read_records(&self, from: u64, to: u64) -> Result<Vec<StoredRecord>> {
        let entries = self.read()?;
        if from > to || from >= entries.len() as u64 {
            return Ok(Vec::new());
        }
        let end = to.min(entries.len() as u64 - 1) as usize;
        Ok(entries[from as usize..=end]
            .iter()
            .cloned()
            .map(StoredRecord::Entry)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::chain::GENESIS_HASH;
    use crate::audit::codec::Payload;
    use chrono::Utc;
    use serde_json::json;

    fn entry(sequence: u64, prev_hash: &str) -> LedgerEntry {
        LedgerEntry::seal(
            sequence,
            Utc::now(),
            Payload::from_value(json!({"n": sequence})).unwrap(),
            prev_hash.to_string(),
        )
    }

    #[tokio::test]
    async fn test_append_and_read() {
        let store = MemoryStore::new();
        let first = entry(0, GENESIS_HASH);
        let second = entry(1, &first.hash);
        store.append(&first).await.unwrap();
        store.append(&second).await.unwrap();

        assert_eq!(store.len().await.unwrap(), 2);
        assert_eq!(store.last().await.unwrap(), Some(second.clone()));
        assert_eq!(store.read_range(0, 10).await.unwrap(), vec![first, second.clone()]);
        assert_eq!(store.get(1).await.unwrap(), Some(second));
        assert_eq!(store.get(2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_out_of_order_sequence() {
        let store = MemoryStore::new();
        let err = store.append(&entry(1, GENESIS_HASH)).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::SequenceConflict { expected: 0, found: 1 }
        ));
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_and_inverted_ranges() {
        let store = MemoryStore::new();
        assert!(store.read_range(0, 0).await.unwrap().is_empty());

        store.append(&entry(0, GENESIS_HASH)).await.unwrap();
        assert!(store.read_range(1, 0).await.unwrap().is_empty());
        assert!(store.read_range(5, 9).await.unwrap().is_empty());
    }
}
