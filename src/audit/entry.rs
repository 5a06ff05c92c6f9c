//! Audit Ledger Entry
//!
//! Defines the stored entry, the receipt handed back to writers, and the
//! chain head tracked by the append coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::chain::{compute_entry_hash, GENESIS_HASH};
use crate::audit::codec::Payload;

/// One immutable record in the hash chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence: u64,
    #[serde(with = "timestamp_format")]
    pub timestamp: DateTime<Utc>,
    pub payload: Payload,
    pub prev_hash: String,
    pub hash: String,
}

impl LedgerEntry {
    /// Build an entry and compute its hash from the given link
    pub fn seal(
        sequence: u64,
        timestamp: DateTime<Utc>,
        payload: Payload,
        prev_hash: String,
    ) -> Self {
        let hash = compute_entry_hash(&prev_hash, &payload.canonical_bytes(), &timestamp);
        Self {
            sequence,
            timestamp,
            payload,
            prev_hash,
            hash,
        }
    }

    /// Recompute the hash from the stored fields
    pub fn recompute_hash(&self) -> String {
        compute_entry_hash(
            &self.prev_hash,
            &self.payload.canonical_bytes(),
            &self.timestamp,
        )
    }

    pub fn receipt(&self) -> AppendReceipt {
        AppendReceipt {
            sequence: self.sequence,
            timestamp: self.timestamp,
            hash: self.hash.clone(),
        }
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        let action = self
            .payload
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        format!(
            "#{} {} {} ({})",
            self.sequence,
            crate::audit::chain::format_timestamp(&self.timestamp),
            action,
            self.hash
        )
    }
}

/// What a writer gets back from `append`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendReceipt {
    pub sequence: u64,
    #[serde(with = "timestamp_format")]
    pub timestamp: DateTime<Utc>,
    pub hash: String,
}

/// Position of the next append
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub next_sequence: u64,
    pub last_hash: String,
    #[serde(skip)]
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl ChainHead {
    /// Head of an empty ledger
    pub fn genesis() -> Self {
        Self {
            next_sequence: 0,
            last_hash: GENESIS_HASH.to_string(),
            last_timestamp: None,
        }
    }

    /// Head positioned right after `entry`
    pub fn after(entry: &LedgerEntry) -> Self {
        Self {
            next_sequence: entry.sequence + 1,
            last_hash: entry.hash.clone(),
            last_timestamp: Some(entry.timestamp),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.next_sequence == 0
    }
}

impl Default for ChainHead {
    fn default() -> Self {
        Self::genesis()
    }
}

/// Serde adapter writing timestamps in the hashed RFC 3339 form
pub mod timestamp_format {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::audit::chain::{format_timestamp, parse_timestamp};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn payload() -> Payload {
        Payload::from_value(json!({"action": "approve", "resource": "r1"})).unwrap()
    }

    #[test]
    fn test_seal_links_to_prev_hash() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
        let entry = LedgerEntry::seal(0, ts, payload(), GENESIS_HASH.to_string());

        assert_eq!(entry.sequence, 0);
        assert_eq!(entry.prev_hash, GENESIS_HASH);
        assert_eq!(entry.hash, entry.recompute_hash());
        assert!(entry.summary().contains("approve"));
    }

    #[test]
    fn test_json_round_trip_keeps_hash_valid() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap()
            + chrono::Duration::microseconds(17);
        let entry = LedgerEntry::seal(3, ts, payload(), GENESIS_HASH.to_string());

        let line = serde_json::to_string(&entry).unwrap();
        assert!(line.contains("\"2025-03-01T09:30:00.000017Z\""));

        let decoded: LedgerEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.recompute_hash(), entry.hash);
    }

    #[test]
    fn test_chain_head_after_entry() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
        let entry = LedgerEntry::seal(4, ts, payload(), GENESIS_HASH.to_string());
        let head = ChainHead::after(&entry);

        assert_eq!(head.next_sequence, 5);
        assert_eq!(head.last_hash, entry.hash);
        assert!(ChainHead::genesis().is_empty());
    }
}
