//! Query Surface
//!
//! Read-only, paginated listing of ledger entries. Entries are handed out by
//! value; nothing here can reach back into the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::audit::entry::LedgerEntry;
use crate::audit::ledger::AuditLedger;
use crate::audit::store::StoredRecord;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Top-level payload key that must equal `value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMatch {
    pub key: String,
    pub value: Value,
}

impl FieldMatch {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parse `key=value`; the value is read as JSON when possible,
    /// otherwise as a plain string
    pub fn parse(raw: &str) -> Option<Self> {
        let (key, value) = raw.split_once('=')?;
        if key.is_empty() {
            return None;
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        Some(Self::new(key, value))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryFilter {
    pub from_sequence: Option<u64>,
    pub to_sequence: Option<u64>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fields: Vec<FieldMatch>,
    #[serde(default)]
    pub order: SortOrder,
    pub limit: Option<usize>,
}

impl EntryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sequence(mut self, sequence: u64) -> Self {
        self.from_sequence = Some(sequence);
        self
    }

    pub fn to_sequence(mut self, sequence: u64) -> Self {
        self.to_sequence = Some(sequence);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push(FieldMatch::new(key, value));
        self
    }

    pub fn descending(mut self) -> Self {
        self.order = SortOrder::Descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `entry` passes the time and payload predicates
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if self.since.is_some_and(|since| entry.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| entry.timestamp > until) {
            return false;
        }
        self.fields
            .iter()
            .all(|field| entry.payload.get(&field.key) == Some(&field.value))
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPage {
    pub entries: Vec<LedgerEntry>,
    /// Sequence to resume from: the next `from_sequence` when ascending,
    /// the next `to_sequence` when descending
    pub next_cursor: Option<u64>,
}

impl EntryPage {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            next_cursor: None,
        }
    }
}

/// Listings skip rows that no longer decode; `verify` reports them.
fn decoded(record: StoredRecord) -> Option<LedgerEntry> {
    match record {
        StoredRecord::Entry(entry) => Some(entry),
        StoredRecord::Undecodable(row) => {
            warn!("Skipping undecodable entry {}: {}", row.sequence, row.reason);
            None
        }
    }
}

impl AuditLedger {
    /// Entry at `sequence`, if stored
    pub async fn get(&self, sequence: u64) -> Result<Option<LedgerEntry>> {
        self.store.get(sequence).await
    }

    /// List entries matching `filter`, one page at a time
    pub async fn list(&self, filter: &EntryFilter) -> Result<EntryPage> {
        let stored = self.store.len().await?;
        if stored == 0 {
            return Ok(EntryPage::empty());
        }

        let low = filter.from_sequence.unwrap_or(0);
        let high = filter.to_sequence.unwrap_or(u64::MAX).min(stored - 1);
        if low > high {
            return Ok(EntryPage::empty());
        }

        let limit = filter
            .limit
            .unwrap_or(self.query_config.default_page_size)
            .clamp(1, self.query_config.max_page_size.max(1));
        let batch = self.query_config.max_page_size.max(1) as u64;

        let mut entries = Vec::with_capacity(limit);
        match filter.order {
            SortOrder::Ascending => {
                let mut cursor = low;
                while cursor <= high {
                    let end = high.min(cursor.saturating_add(batch - 1));
                    let chunk = self.store.read_records(cursor, end).await?;
                    for entry in chunk.into_iter().filter_map(decoded) {
                        if !filter.matches(&entry) {
                            continue;
                        }
                        let sequence = entry.sequence;
                        entries.push(entry);
                        if entries.len() == limit {
                            let next = sequence + 1;
                            return Ok(EntryPage {
                                entries,
                                next_cursor: (next <= high).then_some(next),
                            });
                        }
                    }
                    if end == high {
                        break;
                    }
                    cursor = end + 1;
                }
            }
            SortOrder::Descending => {
                let mut cursor = high;
                loop {
                    let start = low.max(cursor.saturating_sub(batch - 1));
                    let chunk = self.store.read_records(start, cursor).await?;
                    for entry in chunk.into_iter().rev().filter_map(decoded) {
                        if !filter.matches(&entry) {
                            continue;
                        }
                        let sequence = entry.sequence;
                        entries.push(entry);
                        if entries.len() == limit {
                            return Ok(EntryPage {
                                entries,
                                next_cursor: sequence.checked_sub(1).filter(|next| *next >= low),
                            });
                        }
                    }
                    if start == low {
                        break;
                    }
                    cursor = start - 1;
                }
            }
        }

        Ok(EntryPage {
            entries,
            next_cursor: None,
        })
    }
}
