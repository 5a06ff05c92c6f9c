pub mod approvals;
pub mod audit;
pub mod config;
pub mod database;
pub mod error;

pub use audit::{AuditLedger, LedgerEntry, Payload, VerificationReport};
pub use config::LedgerConfig;
pub use error::LedgerError;
