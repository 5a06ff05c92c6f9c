use thiserror::Error;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(format!("JSON decoding error: {}", err))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageRead(format!("Database error: {}", err))
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageRead(format!("I/O error: {}", err))
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Errors surfaced by ledger operations.
///
/// Integrity violations are not errors; `verify` reports them in a
/// `VerificationReport`.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Storage write failed: {0}")]
    StorageWrite(String),

    #[error("Storage read failed: {0}")]
    StorageRead(String),

    #[error("Sequence conflict: store expects {expected}, entry has {found}")]
    SequenceConflict { expected: u64, found: u64 },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid sequence range: from={from}, to={to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Corrupt stored entry: {0}")]
    Corrupt(String),
}

impl LedgerError {
    /// Whether the append critical section may be retried after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageWrite(_) | Self::SequenceConflict { .. }
        )
    }

    pub fn storage_write(context: &str, err: impl std::fmt::Display) -> Self {
        Self::StorageWrite(format!("{}: {}", context, err))
    }

    pub fn corrupt_row(sequence: u64, err: impl std::fmt::Display) -> Self {
        Self::Corrupt(format!("entry {}: {}", sequence, err))
    }
}

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;
