//! Core types for wayback-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One capture of an original URL in the CDX index
///
/// Records are opaque to the fetch engine: they are keyed by `url` and
/// otherwise stored as received.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    /// Original resource URL (unique per store)
    pub url: String,
    /// Domain the fetch was scoped to (not taken from the row)
    pub domain: String,
    /// Crawl timestamp in the index's native `YYYYMMDDhhmmss` form
    pub timestamp: String,
    /// HTTP status of the capture, if the index recorded one
    pub status_code: Option<i32>,
    /// MIME type of the capture, if the index recorded one
    pub mime_type: Option<String>,
    /// User-assigned tags
    #[serde(default)]
    pub tags: String,
}

impl Record {
    /// Create an untagged record with no status or MIME type
    pub fn new(
        url: impl Into<String>,
        domain: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            domain: domain.into(),
            timestamp: timestamp.into(),
            status_code: None,
            mime_type: None,
            tags: String::new(),
        }
    }
}

/// A record as stored in the database
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Unique database ID
    pub id: i64,
    /// The record itself
    #[serde(flatten)]
    pub record: Record,
    /// When the record was first inserted
    pub fetched_at: DateTime<Utc>,
}

/// One parsed page of CDX results
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageResponse {
    /// Data rows of the page (possibly empty)
    pub records: Vec<Record>,
    /// Token for the next page; `None` means the result set is drained
    pub continuation_token: Option<String>,
}

impl PageResponse {
    /// Whether another page follows this one
    ///
    /// Token presence is the only signal; an empty page with a token still has more.
    pub fn has_more(&self) -> bool {
        self.continuation_token.is_some()
    }
}

/// Persisted progress of a domain fetch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchState {
    /// Domain this state belongs to
    pub domain: String,
    /// Token to resume from (absent for a fresh or drained fetch)
    pub continuation_token: Option<String>,
    /// Records persisted so far for this domain
    pub total_fetched: i64,
    /// True once a page without a continuation token was observed
    pub is_complete: bool,
    /// Error text from the last interrupted run, for display only
    pub last_error: Option<String>,
    /// When this state was last written
    pub updated_at: DateTime<Utc>,
}

impl FetchState {
    /// Whether a previous run stopped part-way and left a token to continue from
    pub fn is_resumable(&self) -> bool {
        !self.is_complete
            && self
                .continuation_token
                .as_deref()
                .is_some_and(|t| !t.is_empty())
    }
}

/// Filter criteria for browsing stored records
///
/// Text filters are substring matches; empty strings disable a filter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Domain the records were fetched for
    pub domain: String,
    /// MIME type substring (e.g. "text/html", "image/")
    #[serde(default)]
    pub mime_type: String,
    /// URL substring
    #[serde(default)]
    pub search_text: String,
    /// Tag substring
    #[serde(default)]
    pub tags: String,
    /// Page size
    pub limit: i64,
    /// Rows to skip
    #[serde(default)]
    pub offset: i64,
}

/// Record count for one stored domain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainStats {
    /// Domain name
    pub domain: String,
    /// Number of stored records
    pub record_count: i64,
}

/// Progress snapshot emitted after each fetched page
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchProgress {
    /// Cumulative records fetched in this call
    pub total_records: usize,
    /// 1-based page number within this call
    pub page: u32,
}
