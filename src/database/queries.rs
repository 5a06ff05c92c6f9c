use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::database::models::LedgerRow;

pub struct Queries;

impl Queries {
    /// Sequence the next inserted row must carry
    pub async fn next_sequence(tx: &mut Transaction<'_, Sqlite>) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COALESCE(MAX(sequence) + 1, 0) FROM ledger_entries")
            .fetch_one(&mut **tx)
            .await
    }

    pub async fn insert_entry(
        tx: &mut Transaction<'_, Sqlite>,
        row: &LedgerRow,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (sequence, timestamp, prev_hash, hash, payload)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(row.sequence)
        .bind(&row.timestamp)
        .bind(&row.prev_hash)
        .bind(&row.hash)
        .bind(&row.payload)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    pub async fn count_entries(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM ledger_entries")
            .fetch_one(pool)
            .await
    }

    pub async fn get_last_entry(pool: &SqlitePool) -> Result<Option<LedgerRow>, sqlx::Error> {
        sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT sequence, timestamp, prev_hash, hash, payload
            FROM ledger_entries
            ORDER BY sequence DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(pool)
        .await
    }

    pub async fn get_entries_in_range(
        pool: &SqlitePool,
        from: i64,
        to: i64,
    ) -> Result<Vec<LedgerRow>, sqlx::Error> {
        sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT sequence, timestamp, prev_hash, hash, payload
            FROM ledger_entries
            WHERE sequence >= ?1 AND sequence <= ?2
            ORDER BY sequence ASC
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await
    }
}
