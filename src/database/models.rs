use crate::audit::chain::{format_timestamp, parse_timestamp};
use crate::audit::codec::Payload;
use crate::audit::entry::LedgerEntry;
use crate::audit::store::{StoredRecord, UndecodableRow};
use crate::error::LedgerError;

/// Row layout of `ledger_entries`: `(sequence, timestamp, prev_hash, hash, payload)`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerRow {
    pub sequence: i64,
    pub timestamp: String,
    pub prev_hash: String,
    pub hash: String,
    /// Canonical payload encoding
    pub payload: String,
}

impl LedgerRow {
    pub fn from_entry(entry: &LedgerEntry) -> Result<Self, LedgerError> {
        let sequence = i64::try_from(entry.sequence)
            .map_err(|_| LedgerError::StorageWrite(format!("sequence {} out of range", entry.sequence)))?;
        let payload = String::from_utf8(entry.payload.canonical_bytes())
            .map_err(|e| LedgerError::StorageWrite(e.to_string()))?;

        Ok(Self {
            sequence,
            timestamp: format_timestamp(&entry.timestamp),
            prev_hash: entry.prev_hash.clone(),
            hash: entry.hash.clone(),
            payload,
        })
    }

    /// Decode the row, keeping it as `Undecodable` when a stored field no
    /// longer parses
    pub fn into_record(self) -> Result<StoredRecord, LedgerError> {
        // The table's CHECK constraint keeps sequences non-negative.
        let sequence = u64::try_from(self.sequence)
            .map_err(|_| LedgerError::Corrupt(format!("negative sequence {}", self.sequence)))?;

        let decoded = parse_timestamp(&self.timestamp)
            .map_err(|e| format!("timestamp {:?}: {}", self.timestamp, e))
            .and_then(|timestamp| {
                Payload::from_canonical_bytes(self.payload.as_bytes())
                    .map(|payload| (timestamp, payload))
                    .map_err(|e| format!("payload: {}", e))
            });

        Ok(match decoded {
            Ok((timestamp, payload)) => StoredRecord::Entry(LedgerEntry {
                sequence,
                timestamp,
                payload,
                prev_hash: self.prev_hash,
                hash: self.hash,
            }),
            Err(reason) => StoredRecord::Undecodable(UndecodableRow {
                sequence,
                hash: Some(self.hash),
                reason,
            }),
        })
    }
}
