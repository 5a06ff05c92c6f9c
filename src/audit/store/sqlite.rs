//! SQLite-backed store
//!
//! Each append is one transaction that re-reads the next sequence before
//! inserting; the `sequence` primary key backs that check up.

use async_trait::async_trait;
use tracing::debug;

use crate::audit::entry::LedgerEntry;
use crate::audit::store::{LedgerStore, StoredRecord};
use crate::database::models::LedgerRow;
use crate::database::queries::Queries;
use crate::database::Database;
use crate::error::{LedgerError, Result};

#[derive(Clone)]
pub struct SqliteStore {
    database: Database,
}

impl SqliteStore {
    /// Connect and apply migrations
    pub async fn connect(database_url: &str) -> Result<Self> {
        let database = Database::new(database_url).await?;
        database.run_migrations().await?;
        Ok(Self { database })
    }

    pub fn from_database(database: Database) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}

fn write_error(err: sqlx::Error) -> LedgerError {
    LedgerError::storage_write("database write failed", err)
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let row = LedgerRow::from_entry(entry)?;
        let mut tx = self.database.pool.begin().await.map_err(write_error)?;

        let expected = Queries::next_sequence(&mut tx).await.map_err(write_error)?;
        if expected != row.sequence {
            return Err(LedgerError::SequenceConflict {
                expected: expected as u64,
                found: entry.sequence,
            });
        }

        if let Err(e) = Queries::insert_entry(&mut tx, &row).await {
            let unique_violation = matches!(
                &e,
                sqlx::Error::Database(db) if db.is_unique_violation()
            );
            if unique_violation {
                return Err(LedgerError::SequenceConflict {
                    expected: entry.sequence + 1,
                    found: entry.sequence,
                });
            }
            return Err(write_error(e));
        }

        tx.commit().await.map_err(write_error)?;
        debug!("Inserted ledger row {}", row.sequence);
        Ok(())
    }

    async fn len(&self) -> Result<u64> {
        let count = Queries::count_entries(&self.database.pool).await?;
        Ok(count as u64)
    }

    async fn last_record(&self) -> Result<Option<StoredRecord>> {
        Queries::get_last_entry(&self.database.pool)
            .await?
            .map(LedgerRow::into_record)
            .transpose()
    }

    async fn read_records(&self, from: u64, to: u64) -> Result<Vec<StoredRecord>> {
        if from > to || from > i64::MAX as u64 {
            return Ok(Vec::new());
        }
        let to = to.min(i64::MAX as u64);

        Queries::get_entries_in_range(&self.database.pool, from as i64, to as i64)
            .await?
            .into_iter()
            .map(LedgerRow::into_record)
            .collect()
    }
}
