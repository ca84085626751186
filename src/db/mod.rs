//! Database layer for wayback-dl
//!
//! Handles SQLite persistence for fetched CDX records and per-domain fetch state.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - `migrations`: database lifecycle and schema migrations
//! - `records`: idempotent insert, browsing, tagging, purge
//! - `fetch_state`: resume anchors and the per-page unit of work

use crate::types::{FetchState, Record, StoredRecord};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod fetch_state;
mod migrations;
mod records;

/// Record row from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct RecordRow {
    /// Unique database ID
    pub id: i64,
    /// Original resource URL
    pub url: String,
    /// Domain the record was fetched for
    pub domain: String,
    /// Crawl timestamp, as received
    pub timestamp: String,
    /// HTTP status of the capture
    pub status_code: Option<i32>,
    /// MIME type of the capture
    pub mime_type: Option<String>,
    /// User-assigned tags
    pub tags: String,
    /// Unix timestamp when the record was inserted
    pub fetched_at: i64,
}

impl From<RecordRow> for StoredRecord {
    fn from(row: RecordRow) -> Self {
        StoredRecord {
            id: row.id,
            record: Record {
                url: row.url,
                domain: row.domain,
                timestamp: row.timestamp,
                status_code: row.status_code,
                mime_type: row.mime_type,
                tags: row.tags,
            },
            fetched_at: from_unix(row.fetched_at),
        }
    }
}

/// Fetch state row from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct FetchStateRow {
    /// Domain (primary key)
    pub domain: String,
    /// Token to resume from
    pub continuation_token: Option<String>,
    /// Records persisted so far
    pub total_fetched: i64,
    /// Whether the domain has been fully drained
    pub is_complete: bool,
    /// Error text from the last interrupted run
    pub last_error: Option<String>,
    /// Unix timestamp of the last write
    pub updated_at: i64,
}

impl From<FetchStateRow> for FetchState {
    fn from(row: FetchStateRow) -> Self {
        FetchState {
            domain: row.domain,
            continuation_token: row.continuation_token.filter(|t| !t.is_empty()),
            total_fetched: row.total_fetched,
            is_complete: row.is_complete,
            last_error: row.last_error.filter(|e| !e.is_empty()),
            updated_at: from_unix(row.updated_at),
        }
    }
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

/// Database handle for wayback-dl
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
