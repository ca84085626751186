//! Record store: idempotent insertion and browsing of fetched CDX records.

use crate::error::DatabaseError;
use crate::types::{DomainStats, Record, RecordFilter, StoredRecord};
use crate::{Error, Result};
use sqlx::SqliteConnection;

use super::{Database, RecordRow};

// SQLite default SQLITE_MAX_VARIABLE_NUMBER is 999.
// Each record uses 7 bind variables, so max 142 records per statement.
const MAX_RECORDS_PER_BATCH: usize = 142;

const FILTER_WHERE: &str = r#"
    WHERE domain = ?1
      AND (?2 = '' OR COALESCE(mime_type, '') LIKE '%' || ?2 || '%')
      AND (?3 = '' OR url LIKE '%' || ?3 || '%')
      AND (?4 = '' OR tags LIKE '%' || ?4 || '%')
"#;

impl Database {
    /// Insert records, ignoring any whose URL is already stored
    ///
    /// Returns the number of genuinely new rows. All chunks are written in one
    /// transaction, so a failure inserts nothing.
    pub async fn insert_records(&self, records: &[Record]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let inserted = Self::insert_records_on(&mut tx, records).await?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit records: {}",
                e
            )))
        })?;

        Ok(inserted)
    }

    /// Insert on an existing connection or transaction
    pub(super) async fn insert_records_on(
        conn: &mut SqliteConnection,
        records: &[Record],
    ) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut inserted = 0;

        for chunk in records.chunks(MAX_RECORDS_PER_BATCH) {
            let mut query_builder = sqlx::QueryBuilder::new(
                "INSERT OR IGNORE INTO cdx_records (url, domain, timestamp, status_code, mime_type, tags, fetched_at) ",
            );

            query_builder.push_values(chunk, |mut b, record| {
                b.push_bind(&record.url)
                    .push_bind(&record.domain)
                    .push_bind(&record.timestamp)
                    .push_bind(record.status_code)
                    .push_bind(&record.mime_type)
                    .push_bind(&record.tags)
                    .push_bind(now);
            });

            let result = query_builder
                .build()
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to insert records batch: {}",
                        e
                    )))
                })?;

            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    /// All stored records of a domain, ordered by URL
    pub async fn get_records(&self, domain: &str) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, url, domain, timestamp, status_code, mime_type, tags, fetched_at
            FROM cdx_records
            WHERE domain = ?
            ORDER BY url
            "#,
        )
        .bind(domain)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get records: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(StoredRecord::from).collect())
    }

    /// One page of a domain's records plus the total number of matches
    ///
    /// A `limit` of zero or less returns every match after `offset`.
    pub async fn get_records_filtered(
        &self,
        filter: &RecordFilter,
    ) -> Result<(Vec<StoredRecord>, i64)> {
        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM cdx_records {}", FILTER_WHERE))
                .bind(&filter.domain)
                .bind(&filter.mime_type)
                .bind(&filter.search_text)
                .bind(&filter.tags)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to count filtered records: {}",
                        e
                    )))
                })?;

        let limit = if filter.limit > 0 { filter.limit } else { -1 };

        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            r#"
            SELECT id, url, domain, timestamp, status_code, mime_type, tags, fetched_at
            FROM cdx_records
            {}
            ORDER BY url
            LIMIT ?5 OFFSET ?6
            "#,
            FILTER_WHERE
        ))
        .bind(&filter.domain)
        .bind(&filter.mime_type)
        .bind(&filter.search_text)
        .bind(&filter.tags)
        .bind(limit)
        .bind(filter.offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get filtered records: {}",
                e
            )))
        })?;

        Ok((rows.into_iter().map(StoredRecord::from).collect(), total))
    }

    /// Number of stored records for a domain
    pub async fn count_records(&self, domain: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cdx_records WHERE domain = ?")
            .bind(domain)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count records: {}",
                    e
                )))
            })?;

        Ok(count)
    }

    /// Every domain with stored records and how many each has
    pub async fn list_domains(&self) -> Result<Vec<DomainStats>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT domain, COUNT(*)
            FROM cdx_records
            GROUP BY domain
            ORDER BY domain
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list domains: {}",
                e
            )))
        })?;

        Ok(rows
            .into_iter()
            .map(|(domain, record_count)| DomainStats {
                domain,
                record_count,
            })
            .collect())
    }

    /// Replace the tags of one record; returns false if no such record
    pub async fn update_record_tags(&self, id: i64, tags: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE cdx_records SET tags = ? WHERE id = ?")
            .bind(tags)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update record tags: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete one record; returns false if no such record
    pub async fn delete_record(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cdx_records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete record: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every record of a domain, returning how many were removed
    ///
    /// The domain's fetch state is left alone; call
    /// [`Database::delete_fetch_state`] too if the next harvest should start over.
    pub async fn delete_records_by_domain(&self, domain: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cdx_records WHERE domain = ?")
            .bind(domain)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete records: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected())
    }

    /// Check whether a URL is already stored
    pub async fn record_exists(&self, url: &str) -> Result<bool> {
        let exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM cdx_records WHERE url = ?)")
                .bind(url)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to check record existence: {}",
                        e
                    )))
                })?;

        Ok(exists != 0)
    }
}
