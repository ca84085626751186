//! CDX JSON page parsing
//!
//! A page is a JSON array of string arrays:
//!
//! ```text
//! [["original","timestamp","statuscode","mimetype"],   <- header, discarded
//!  ["http://a.example.com/","20200101000000","200","text/html"],
//!  ...,
//!  [],                                                  <- filler, skipped
//!  ["<resume key>"]]                                    <- only if more pages exist
//! ```

use crate::error::FetchError;
use crate::types::{PageResponse, Record};

/// Minimum number of fields a data row needs
const MIN_FIELDS: usize = 4;

/// Parse one page of a domain-wide fetch
///
/// `domain` is stamped onto every record; it is not read from the rows.
/// Malformed and empty rows are skipped rather than failing the page.
pub fn parse_page(body: &[u8], domain: &str) -> Result<PageResponse, FetchError> {
    let mut rows = decode_rows(body)?;

    let mut page = PageResponse::default();

    // The resume key must come off before row filtering, or it would be
    // dropped as a short row
    if rows.last().is_some_and(|row| row.len() == 1) {
        page.continuation_token = rows.pop().and_then(|mut row| row.pop());
    }

    page.records = rows
        .into_iter()
        .skip(1)
        .filter_map(|row| record_from_row(row, domain))
        .collect();

    Ok(page)
}

/// Parse the response to a single "latest capture" lookup
///
/// Returns `Ok(None)` when the index has no matching capture.
pub fn parse_latest(body: &[u8]) -> Result<Option<Record>, FetchError> {
    let rows = decode_rows(body)?;

    // header plus at least one data row
    if rows.len() < 2 {
        return Ok(None);
    }

    let row = rows.into_iter().nth(1).unwrap_or_default();
    Ok(record_from_row(row, ""))
}

/// Parse the plain-text page count returned by a `showNumPages` query
pub fn parse_page_count(body: &[u8]) -> Result<u64, FetchError> {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    text.parse::<u64>()
        .map_err(|_| FetchError::Decode(format!("failed to parse page count: {:?}", text)))
}

fn decode_rows(body: &[u8]) -> Result<Vec<Vec<String>>, FetchError> {
    // the index answers some empty result sets with an empty body
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(body)
        .map_err(|e| FetchError::Decode(format!("failed to parse JSON: {}", e)))
}

fn record_from_row(row: Vec<String>, domain: &str) -> Option<Record> {
    if row.len() < MIN_FIELDS {
        return None;
    }

    let mut fields = row.into_iter();
    let url = fields.next()?;
    let timestamp = fields.next()?;
    let status = fields.next()?;
    let mime = fields.next()?;

    Some(Record {
        url,
        domain: domain.to_string(),
        timestamp,
        status_code: present(status).and_then(|s| s.parse().ok()),
        mime_type: present(mime),
        tags: String::new(),
    })
}

/// The index writes "-" (or nothing) for fields it did not record
fn present(field: String) -> Option<String> {
    if field.is_empty() || field == "-" {
        None
    } else {
        Some(field)
    }
}
