//! Audit Ledger Verification
//!
//! Replays stored entries, recomputes every hash, and reports the first
//! point where the chain stops being consistent. Entries after that point
//! are untrusted regardless of their own consistency.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::chain::{format_timestamp, GENESIS_HASH};
use crate::audit::entry::LedgerEntry;
use crate::audit::ledger::AuditLedger;
use crate::audit::store::{FileSnapshot, StoredRecord};
use crate::error::{LedgerError, Result};

/// Which check failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Stored sequence differs from its position
    SequenceGap,
    /// `prev_hash` does not match the preceding entry's `hash`
    PrevHashMismatch,
    /// Recomputed hash differs from the stored one
    HashMismatch,
    /// Timestamp earlier than the preceding entry's
    TimestampRegression,
    /// The store returned fewer entries than the range holds
    MissingEntry,
    /// Chain is intact but does not end at the retained checkpoint hash
    CheckpointMismatch,
    /// Stored row can no longer be decoded into an entry
    UndecodableEntry,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SequenceGap => "sequence_gap",
            Self::PrevHashMismatch => "prev_hash_mismatch",
            Self::HashMismatch => "hash_mismatch",
            Self::TimestampRegression => "timestamp_regression",
            Self::MissingEntry => "missing_entry",
            Self::CheckpointMismatch => "checkpoint_mismatch",
            Self::UndecodableEntry => "undecodable_entry",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityFailure {
    pub sequence: u64,
    pub kind: FailureKind,
    pub expected: String,
    pub actual: String,
}

/// Outcome of a verification pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub ok: bool,
    /// Entries that passed every check
    pub checked: u64,
    /// Hash of the last entry that passed (genesis if none did)
    pub last_hash: String,
    pub failure: Option<IntegrityFailure>,
}

impl VerificationReport {
    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match &self.failure {
            None => format!(
                "Ledger is intact ({} entries, head {})",
                self.checked, self.last_hash
            ),
            Some(failure) => format!(
                "Ledger integrity violated at sequence {} ({}): expected {}, found {}",
                failure.sequence, failure.kind, failure.expected, failure.actual
            ),
        }
    }
}

/// Hash anchor retained outside the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub sequence: u64,
    pub hash: String,
}

/// Incremental chain checker carried across batches
#[derive(Debug, Clone)]
pub struct ChainWalker {
    expected_sequence: u64,
    prev_hash: String,
    prev_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    checked: u64,
}

impl ChainWalker {
    /// Walker for a chain starting at sequence 0
    pub fn from_genesis() -> Self {
        Self::resume(0, GENESIS_HASH.to_string(), None)
    }

    /// Walker that continues after an already trusted entry
    pub fn resume(
        first_sequence: u64,
        prev_hash: String,
        prev_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Self {
        Self {
            expected_sequence: first_sequence,
            prev_hash,
            prev_timestamp,
            checked: 0,
        }
    }

    /// Check the next entry in order
    pub fn check(&mut self, entry: &LedgerEntry) -> std::result::Result<(), IntegrityFailure> {
        let sequence = self.expected_sequence;

        if entry.sequence != sequence {
            return Err(IntegrityFailure {
                sequence,
                kind: FailureKind::SequenceGap,
                expected: sequence.to_string(),
                actual: entry.sequence.to_string(),
            });
        }

        if entry.prev_hash != self.prev_hash {
            return Err(IntegrityFailure {
                sequence,
                kind: FailureKind::PrevHashMismatch,
                expected: self.prev_hash.clone(),
                actual: entry.prev_hash.clone(),
            });
        }

        let recomputed = entry.recompute_hash();
        if recomputed != entry.hash {
            return Err(IntegrityFailure {
                sequence,
                kind: FailureKind::HashMismatch,
                expected: recomputed,
                actual: entry.hash.clone(),
            });
        }

        if let Some(previous) = self.prev_timestamp {
            if entry.timestamp < previous {
                return Err(IntegrityFailure {
                    sequence,
                    kind: FailureKind::TimestampRegression,
                    expected: format!(">= {}", format_timestamp(&previous)),
                    actual: format_timestamp(&entry.timestamp),
                });
            }
        }

        self.expected_sequence += 1;
        self.prev_hash = entry.hash.clone();
        self.prev_timestamp = Some(entry.timestamp);
        self.checked += 1;
        Ok(())
    }

    /// Check the next stored row, which may not decode
    pub fn check_record(&mut self, record: &StoredRecord) -> std::result::Result<(), IntegrityFailure> {
        match record {
            StoredRecord::Entry(entry) => self.check(entry),
            StoredRecord::Undecodable(row) if row.sequence != self.expected_sequence => {
                Err(IntegrityFailure {
                    sequence: self.expected_sequence,
                    kind: FailureKind::SequenceGap,
                    expected: self.expected_sequence.to_string(),
                    actual: row.sequence.to_string(),
                })
            }
            StoredRecord::Undecodable(row) => Err(self.undecodable(row.reason.clone())),
        }
    }

    /// Failure for the next row being unreadable
    pub fn undecodable(&self, reason: String) -> IntegrityFailure {
        IntegrityFailure {
            sequence: self.expected_sequence,
            kind: FailureKind::UndecodableEntry,
            expected: "decodable entry".to_string(),
            actual: reason,
        }
    }

    /// Failure for an entry the store should have returned but did not
    pub fn missing(&self) -> IntegrityFailure {
        IntegrityFailure {
            sequence: self.expected_sequence,
            kind: FailureKind::MissingEntry,
            expected: format!("entry {}", self.expected_sequence),
            actual: "none".to_string(),
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.expected_sequence
    }

    pub fn report(&self, failure: Option<IntegrityFailure>) -> VerificationReport {
        VerificationReport {
            ok: failure.is_none(),
            checked: self.checked,
            last_hash: self.prev_hash.clone(),
            failure,
        }
    }
}

/// Verify a complete chain held in memory, starting from genesis
pub fn verify_chain(entries: &[LedgerEntry]) -> VerificationReport {
    verify_entries(entries, ChainWalker::from_genesis())
}

/// Verify `entries` in order with the given walker
pub fn verify_entries(entries: &[LedgerEntry], mut walker: ChainWalker) -> VerificationReport {
    for entry in entries {
        if let Err(failure) = walker.check(entry) {
            return walker.report(Some(failure));
        }
    }
    walker.report(None)
}

/// Verify stored rows in order with the given walker
pub fn verify_records(records: &[StoredRecord], mut walker: ChainWalker) -> VerificationReport {
    for record in records {
        if let Err(failure) = walker.check_record(record) {
            return walker.report(Some(failure));
        }
    }
    walker.report(None)
}

/// Verify a ledger file read with `FileStore::inspect`. A torn trailing
/// line is reported as an undecodable entry after the last complete one.
pub fn verify_snapshot(snapshot: &FileSnapshot) -> VerificationReport {
    let mut walker = ChainWalker::from_genesis();
    for record in &snapshot.records {
        if let Err(failure) = walker.check_record(record) {
            return walker.report(Some(failure));
        }
    }
    if snapshot.torn_tail > 0 {
        let failure = walker.undecodable(format!(
            "{} trailing bytes without a line terminator",
            snapshot.torn_tail
        ));
        return walker.report(Some(failure));
    }
    walker.report(None)
}

impl AuditLedger {
    /// Verify every stored entry
    pub async fn verify_all(&self) -> Result<VerificationReport> {
        self.verify(0, None).await
    }

    /// Verify entries `from..=to` (`to` defaults to the latest entry).
    ///
    /// The upper bound is fixed when the pass starts, so appends that land
    /// meanwhile are not part of the pass. Dropping the returned future
    /// between batches cancels the pass.
    pub async fn verify(&self, from: u64, to: Option<u64>) -> Result<VerificationReport> {
        let stored = self.store.len().await?;

        if stored == 0 {
            if from == 0 && to.is_none() {
                return Ok(ChainWalker::from_genesis().report(None));
            }
            return Err(LedgerError::InvalidRange {
                from,
                to: to.unwrap_or(0),
            });
        }

        let to = to.unwrap_or(stored - 1);
        if from > to || to >= stored {
            return Err(LedgerError::InvalidRange { from, to });
        }

        let mut walker = if from == 0 {
            ChainWalker::from_genesis()
        } else {
            let mut anchor = ChainWalker::resume(from - 1, GENESIS_HASH.to_string(), None);
            match self.store.read_records(from - 1, from - 1).await?.pop() {
                Some(StoredRecord::Entry(entry)) => {
                    ChainWalker::resume(from, entry.hash, Some(entry.timestamp))
                }
                Some(record) => {
                    let failure = match anchor.check_record(&record) {
                        Err(failure) => failure,
                        Ok(()) => anchor.missing(),
                    };
                    return Ok(self.finish(anchor.report(Some(failure))));
                }
                None => return Ok(self.finish(anchor.report(Some(anchor.missing())))),
            }
        };

        let batch = self.query_config.verify_batch_size.max(1);
        let mut cursor = from;
        while cursor <= to {
            let batch_end = to.min(cursor.saturating_add(batch - 1));
            let records = self.store.read_records(cursor, batch_end).await?;

            for record in &records {
                if let Err(failure) = walker.check_record(record) {
                    return Ok(self.finish(walker.report(Some(failure))));
                }
            }
            if walker.next_sequence() <= batch_end {
                return Ok(self.finish(walker.report(Some(walker.missing()))));
            }

            cursor = batch_end + 1;
            tokio::task::yield_now().await;
        }

        Ok(self.finish(walker.report(None)))
    }

    /// Verify `0..=checkpoint.sequence` and compare the resulting head hash
    /// with the externally retained one.
    ///
    /// A ledger that no longer reaches the checkpoint is reported as a
    /// `MissingEntry` at its current length.
    pub async fn verify_checkpoint(&self, checkpoint: &Checkpoint) -> Result<VerificationReport> {
        let stored = self.store.len().await?;
        if checkpoint.sequence >= stored {
            let mut report = self.verify(0, stored.checked_sub(1)).await?;
            if report.ok {
                report.ok = false;
                report.failure = Some(IntegrityFailure {
                    sequence: stored,
                    kind: FailureKind::MissingEntry,
                    expected: format!("entries through {}", checkpoint.sequence),
                    actual: format!("{} stored entries", stored),
                });
                warn!("{}", report.summary());
            }
            return Ok(report);
        }

        let mut report = self.verify(0, Some(checkpoint.sequence)).await?;

        if report.ok && report.last_hash != checkpoint.hash {
            report.ok = false;
            report.failure = Some(IntegrityFailure {
                sequence: checkpoint.sequence,
                kind: FailureKind::CheckpointMismatch,
                expected: checkpoint.hash.clone(),
                actual: report.last_hash.clone(),
            });
            warn!("{}", report.summary());
        }

        Ok(report)
    }

    /// Current head as a checkpoint to retain elsewhere
    pub async fn checkpoint(&self) -> Option<Checkpoint> {
        let head = self.head().await;
        head.next_sequence.checked_sub(1).map(|sequence| Checkpoint {
            sequence,
            hash: head.last_hash,
        })
    }

    fn finish(&self, report: VerificationReport) -> VerificationReport {
        if report.ok {
            info!("Audit ledger verification successful: {} entries", report.checked);
        } else {
            warn!("{}", report.summary());
        }
        report
    }
}
