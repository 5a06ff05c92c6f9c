//! Append Coordinator
//!
//! `AuditLedger` is the only write path into a store. The chain head lives
//! behind one async mutex, and "read head, hash, write, advance head" runs
//! as a single critical section inside a spawned task, so dropping the
//! caller's future never abandons an append halfway.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audit::chain::truncate_timestamp;
use crate::audit::clock::{Clock, SystemClock};
use crate::audit::codec::Payload;
use crate::audit::entry::{AppendReceipt, ChainHead, LedgerEntry};
use crate::audit::store::{open_store, LedgerStore, StoredRecord};
use crate::config::{AppendConfig, LedgerConfig, QueryConfig};
use crate::error::{LedgerError, Result};

/// Handle to a single-writer audit ledger. Clones share the same head.
#[derive(Clone)]
pub struct AuditLedger {
    pub(crate) store: Arc<dyn LedgerStore>,
    head: Arc<Mutex<ChainHead>>,
    clock: Arc<dyn Clock>,
    append_config: AppendConfig,
    pub(crate) query_config: QueryConfig,
}

impl AuditLedger {
    /// Open a ledger over `store`, rebuilding the head from its last entry
    pub async fn open(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        config: &LedgerConfig,
    ) -> Result<Self> {
        let head = head_after(store.last_record().await?)?;

        info!(
            "Audit ledger opened at sequence {} (head {})",
            head.next_sequence, head.last_hash
        );

        Ok(Self {
            store,
            head: Arc::new(Mutex::new(head)),
            clock,
            append_config: config.append.clone(),
            query_config: config.query.clone(),
        })
    }

    /// Open the configured backend with the wall clock
    pub async fn from_config(config: &LedgerConfig) -> Result<Self> {
        let store = open_store(&config.storage).await?;
        Self::open(store, Arc::new(SystemClock), config).await
    }

    /// Append a payload and return its assigned sequence, timestamp, and hash
    pub async fn append(&self, payload: Payload) -> Result<AppendReceipt> {
        let size = payload.canonical_bytes().len();
        if size > self.append_config.max_payload_bytes {
            return Err(LedgerError::InvalidPayload(format!(
                "canonical payload is {} bytes, limit is {}",
                size, self.append_config.max_payload_bytes
            )));
        }

        let ledger = self.clone();
        tokio::spawn(async move { ledger.append_exclusive(payload).await })
            .await
            .map_err(|e| LedgerError::StorageWrite(format!("append task aborted: {}", e)))?
    }

    pub async fn append_value(&self, value: Value) -> Result<AppendReceipt> {
        self.append(Payload::from_value(value)?).await
    }

    pub async fn append_serializable<T: Serialize + ?Sized>(
        &self,
        record: &T,
    ) -> Result<AppendReceipt> {
        self.append(Payload::from_serializable(record)?).await
    }

    /// Current chain head
    pub async fn head(&self) -> ChainHead {
        self.head.lock().await.clone()
    }

    /// Number of appended entries
    pub async fn len(&self) -> u64 {
        self.head.lock().await.next_sequence
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn append_exclusive(&self, payload: Payload) -> Result<AppendReceipt> {
        let mut head = self.head.lock().await;
        let mut attempt = 0u32;

        loop {
            let timestamp = self.next_timestamp(&head);
            let entry = LedgerEntry::seal(
                head.next_sequence,
                timestamp,
                payload.clone(),
                head.last_hash.clone(),
            );

            let err = match self.store.append(&entry).await {
                Ok(()) => {
                    *head = ChainHead::after(&entry);
                    debug!("Appended audit entry: {}", entry.summary());
                    return Ok(entry.receipt());
                }
                Err(err) => err,
            };

            // The write may have landed even though it reported failure.
            match self.store.last_record().await {
                Ok(Some(StoredRecord::Entry(last))) if last == entry => {
                    *head = ChainHead::after(&entry);
                    warn!(
                        "Store reported failure but entry {} is durable: {}",
                        entry.sequence, err
                    );
                    return Ok(entry.receipt());
                }
                Ok(last) => match head_after(last) {
                    Ok(resynced) => *head = resynced,
                    Err(resync_err) => warn!("Failed to resynchronize chain head: {}", resync_err),
                },
                Err(read_err) => {
                    warn!("Failed to resynchronize chain head: {}", read_err);
                }
            }

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= self.append_config.max_retries {
                return Err(match err {
                    LedgerError::SequenceConflict { expected, found } => {
                        LedgerError::StorageWrite(format!(
                            "store kept moving under the writer (expected {}, had {}) after {} retries",
                            expected, found, attempt
                        ))
                    }
                    other => other,
                });
            }

            attempt += 1;
            warn!(
                "Append attempt {} of {} failed, retrying: {}",
                attempt,
                self.append_config.max_retries + 1,
                err
            );
            tokio::time::sleep(self.append_config.retry_backoff() * attempt).await;
        }
    }

    /// Clock reading for the next entry, never earlier than the previous one
    fn next_timestamp(&self, head: &ChainHead) -> chrono::DateTime<chrono::Utc> {
        let now = truncate_timestamp(self.clock.now());
        match head.last_timestamp {
            Some(previous) if now < previous => {
                warn!("Clock went backwards; reusing previous timestamp {}", previous);
                previous
            }
            _ => now,
        }
    }
}

/// Head positioned after the store's last row
///
/// A last row that no longer decodes still fixes the position and, when its
/// hash survives, the link for the next entry. Verification reports the row.
fn head_after(last: Option<StoredRecord>) -> Result<ChainHead> {
    match last {
        None => Ok(ChainHead::genesis()),
        Some(StoredRecord::Entry(entry)) => Ok(ChainHead::after(&entry)),
        Some(StoredRecord::Undecodable(row)) => {
            let hash = row
                .hash
                .ok_or_else(|| LedgerError::corrupt_row(row.sequence, &row.reason))?;
            warn!(
                "Last stored entry {} does not decode ({}); continuing from its stored hash",
                row.sequence, row.reason
            );
            Ok(ChainHead {
                next_sequence: row.sequence + 1,
                last_hash: hash,
                last_timestamp: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::chain::{compute_entry_hash, GENESIS_HASH};
    use crate::audit::clock::FixedClock;
    use crate::audit::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    async fn memory_ledger(clock: Arc<FixedClock>) -> (AuditLedger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let ledger = AuditLedger::open(store.clone(), clock, &LedgerConfig::default())
            .await
            .unwrap();
        (ledger, store)
    }

    #[tokio::test]
    async fn test_append_assigns_sequence_and_links() {
        let clock = Arc::new(FixedClock::new(t0()));
        let (ledger, store) = memory_ledger(clock.clone()).await;

        let first = ledger
            .append_value(json!({"action": "approve", "resource": "r1"}))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(1));
        let second = ledger
            .append_value(json!({"action": "deny", "resource": "r2"}))
            .await
            .unwrap();

        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(
            first.hash,
            compute_entry_hash(
                GENESIS_HASH,
                br#"{"action":"approve","resource":"r1"}"#,
                &t0()
            )
        );

        let entries = store.snapshot().unwrap();
        assert_eq!(entries[1].prev_hash, first.hash);
        assert_eq!(ledger.head().await.last_hash, second.hash);
        assert_eq!(ledger.len().await, 2);
    }

    #[tokio::test]
    async fn test_reopen_continues_chain() {
        let clock = Arc::new(FixedClock::new(t0()));
        let (ledger, store) = memory_ledger(clock.clone()).await;
        let receipt = ledger.append_value(json!({"action": "approve"})).await.unwrap();

        let reopened = AuditLedger::open(store.clone(), clock, &LedgerConfig::default())
            .await
            .unwrap();
        let head = reopened.head().await;
        assert_eq!(head.next_sequence, 1);
        assert_eq!(head.last_hash, receipt.hash);
    }

    #[tokio::test]
    async fn test_invalid_payload_leaves_state_unchanged() {
        let clock = Arc::new(FixedClock::new(t0()));
        let (ledger, store) = memory_ledger(clock).await;

        let err = ledger.append_value(json!([1, 2, 3])).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidPayload(_)));

        let mut config = LedgerConfig::default();
        config.append.max_payload_bytes = 16;
        let small = AuditLedger::open(store.clone(), Arc::new(SystemClock), &config)
            .await
            .unwrap();
        let err = small
            .append_value(json!({"reason": "this payload is longer than sixteen bytes"}))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidPayload(_)));

        assert!(ledger.is_empty().await);
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clock_regression_is_clamped() {
        let clock = Arc::new(FixedClock::new(t0()));
        let (ledger, _store) = memory_ledger(clock.clone()).await;

        let first = ledger.append_value(json!({"n": 1})).await.unwrap();
        clock.set(t0() - chrono::Duration::hours(1));
        let second = ledger.append_value(json!({"n": 2})).await.unwrap();

        assert_eq!(second.timestamp, first.timestamp);
    }

    /// Store whose writes fail a fixed number of times before succeeding
    struct FlakyStore {
        inner: MemoryStore,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl LedgerStore for FlakyStore {
        async fn append(&self, entry: &LedgerEntry) -> Result<()> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(LedgerError::StorageWrite("disk full".to_string()));
            }
            self.inner.append(entry).await
        }

        async fn len(&self) -> Result<u64> {
            self.inner.len().await
        }

        async fn last_record(&self) -> Result<Option<StoredRecord>> {
            self.inner.last_record().await
        }

        async fn read_records(&self, from: u64, to: u64) -> Result<Vec<StoredRecord>> {
            self.inner.read_records(from, to).await
        }
    }

    fn flaky(failures: u32) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(failures),
        })
    }

    fn fast_retry_config(max_retries: u32) -> LedgerConfig {
        let mut config = LedgerConfig::default();
        config.append.max_retries = max_retries;
        config.append.retry_backoff_ms = 1;
        config
    }

    #[tokio::test]
    async fn test_transient_write_failure_is_retried() {
        let store = flaky(2);
        let ledger = AuditLedger::open(store.clone(), Arc::new(SystemClock), &fast_retry_config(3))
            .await
            .unwrap();

        let receipt = ledger.append_value(json!({"action": "approve"})).await.unwrap();
        assert_eq!(receipt.sequence, 0);
        assert_eq!(store.inner.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_head_unchanged() {
        let store = flaky(10);
        let ledger = AuditLedger::open(store.clone(), Arc::new(SystemClock), &fast_retry_config(2))
            .await
            .unwrap();

        let err = ledger.append_value(json!({"action": "approve"})).await.unwrap_err();
        assert!(matches!(err, LedgerError::StorageWrite(_)));
        assert_eq!(ledger.head().await, ChainHead::genesis());
        assert!(store.inner.is_empty().await.unwrap());

        // Once the store heals the ledger resumes at sequence 0.
        store.failures_left.store(0, Ordering::SeqCst);
        let receipt = ledger.append_value(json!({"action": "retry"})).await.unwrap();
        assert_eq!(receipt.sequence, 0);
    }

    #[tokio::test]
    async fn test_foreign_write_is_resynchronized() {
        let store = Arc::new(MemoryStore::new());
        let config = fast_retry_config(3);
        let a = AuditLedger::open(store.clone(), Arc::new(SystemClock), &config)
            .await
            .unwrap();
        let b = AuditLedger::open(store.clone(), Arc::new(SystemClock), &config)
            .await
            .unwrap();

        a.append_value(json!({"writer": "a"})).await.unwrap();
        let receipt = b.append_value(json!({"writer": "b"})).await.unwrap();

        assert_eq!(receipt.sequence, 1);
        let entries = store.snapshot().unwrap();
        assert_eq!(entries[1].prev_hash, entries[0].hash);
    }
}
