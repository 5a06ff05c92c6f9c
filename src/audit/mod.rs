//! Audit Ledger
//!
//! Tamper-evident, append-only record of governance actions. Each entry is
//! chained to its predecessor with SHA-256 so that any later edit to a
//! stored entry is detected by replaying the chain.

pub mod chain;
pub mod clock;
pub mod codec;
pub mod entry;
pub mod ledger;
pub mod query;
pub mod store;
pub mod verify;

pub use chain::{compute_entry_hash, format_timestamp, GENESIS_HASH};
pub use clock::{Clock, FixedClock, SystemClock};
pub use codec::Payload;
pub use entry::{AppendReceipt, ChainHead, LedgerEntry};
pub use ledger::AuditLedger;
pub use query::{EntryFilter, EntryPage, FieldMatch, SortOrder};
pub use store::{
    open_store, FileSnapshot, FileStore, LedgerStore, MemoryStore, SqliteStore, StoredRecord,
    UndecodableRow,
};
pub use verify::{
    verify_chain, verify_entries, verify_records, verify_snapshot, ChainWalker, Checkpoint,
    FailureKind, IntegrityFailure, VerificationReport,
};
