//! Per-domain fetch state: the resume anchor of an interrupted harvest.

use crate::error::DatabaseError;
use crate::types::{FetchState, Record};
use crate::{Error, Result};
use sqlx::SqliteConnection;

use super::{Database, FetchStateRow};

const UPSERT_FETCH_STATE: &str = r#"
    INSERT INTO fetch_state (domain, continuation_token, total_fetched, is_complete, last_error, updated_at)
    VALUES (?, ?, ?, ?, ?, ?)
    ON CONFLICT(domain) DO UPDATE SET
        continuation_token = excluded.continuation_token,
        total_fetched = excluded.total_fetched,
        is_complete = excluded.is_complete,
        last_error = excluded.last_error,
        updated_at = excluded.updated_at
"#;

impl Database {
    /// Overwrite the fetch state of a domain
    ///
    /// Safe to call after every page; the row is keyed by domain.
    pub async fn upsert_fetch_state(
        &self,
        domain: &str,
        continuation_token: Option<&str>,
        total_fetched: i64,
        is_complete: bool,
        last_error: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        Self::upsert_fetch_state_on(
            &mut conn,
            domain,
            continuation_token,
            total_fetched,
            is_complete,
            last_error,
        )
        .await
    }

    async fn upsert_fetch_state_on(
        conn: &mut SqliteConnection,
        domain: &str,
        continuation_token: Option<&str>,
        total_fetched: i64,
        is_complete: bool,
        last_error: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(UPSERT_FETCH_STATE)
            .bind(domain)
            .bind(continuation_token.filter(|t| !t.is_empty()))
            .bind(total_fetched)
            .bind(is_complete)
            .bind(last_error)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to upsert fetch state: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Get the fetch state of a domain, if any harvest has stored one
    pub async fn get_fetch_state(&self, domain: &str) -> Result<Option<FetchState>> {
        let row = sqlx::query_as::<_, FetchStateRow>(
            r#"
            SELECT domain, continuation_token, total_fetched, is_complete, last_error, updated_at
            FROM fetch_state
            WHERE domain = ?
            "#,
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get fetch state: {}",
                e
            )))
        })?;

        Ok(row.map(FetchState::from))
    }

    /// Forget a domain's fetch state so the next harvest starts fresh
    pub async fn delete_fetch_state(&self, domain: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM fetch_state WHERE domain = ?")
            .bind(domain)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete fetch state: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Store one fetched page and advance the domain's fetch state, atomically
    ///
    /// The records are inserted (duplicates ignored) and the state row is set
    /// to `continuation_token` with `total_before` plus the new-row count. The
    /// domain is marked complete when there is no next token. If anything
    /// fails, neither the records nor the state change.
    ///
    /// Returns the number of genuinely new rows.
    pub async fn persist_page(
        &self,
        domain: &str,
        records: &[Record],
        continuation_token: Option<&str>,
        total_before: i64,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let inserted = Self::insert_records_on(&mut tx, records).await?;
        let continuation_token = continuation_token.filter(|t| !t.is_empty());

        Self::upsert_fetch_state_on(
            &mut tx,
            domain,
            continuation_token,
            total_before.saturating_add(i64::try_from(inserted).unwrap_or(i64::MAX)),
            continuation_token.is_none(),
            None,
        )
        .await?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit page: {}",
                e
            )))
        })?;

        Ok(inserted)
    }
}
