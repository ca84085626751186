//! CDX query string construction
//!
//! The index API requires the domain wildcard `*` to reach the server
//! literally; a percent-encoded `%2A` is treated as a plain character and
//! matches nothing. Queries are therefore assembled with `format!` and only
//! the individual values that need it (resume tokens, exact URLs) are encoded.

use crate::{Error, Result};

/// Records requested per page unless configured otherwise
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Fields requested for every record, in row order
pub const FIELDS: &str = "original,timestamp,statuscode,mimetype";

/// Build the query for one page of a domain-wide fetch
///
/// Returns the query string without the leading `?`. An empty token is
/// treated the same as no token.
pub fn build_page_query(domain: &str, continuation_token: Option<&str>) -> String {
    build_page_query_with_limit(domain, continuation_token, DEFAULT_PAGE_SIZE)
}

/// [`build_page_query`] with an explicit page size
pub fn build_page_query_with_limit(
    domain: &str,
    continuation_token: Option<&str>,
    page_size: u32,
) -> String {
    let domain = clean(domain);

    // *.domain selects the domain and every subdomain; collapse=urlkey keeps one row per URL
    let mut query = format!(
        "url=*.{domain}&output=json&fl={FIELDS}&collapse=urlkey&limit={page_size}&showResumeKey=true"
    );

    if let Some(token) = continuation_token.filter(|t| !t.is_empty()) {
        query.push_str("&resumeKey=");
        query.push_str(&urlencoding::encode(token));
    }

    query
}

/// Build the query for the most recent 2xx/3xx capture of one exact URL
pub fn build_single_latest_query(target_url: &str) -> String {
    let target = clean(target_url);

    // limit=-1 returns the last (newest) row only
    format!(
        "url={}&output=json&fl={FIELDS}&limit=-1&filter=statuscode:[23]..",
        urlencoding::encode(&target)
    )
}

/// Build the metadata query returning the number of index pages for a domain
///
/// Uses the same `collapse=urlkey` as the page query so the estimate tracks
/// what a fetch would actually return.
pub fn build_estimate_query(domain: &str) -> String {
    let domain = clean(domain);
    format!("url=*.{domain}&collapse=urlkey&showNumPages=true")
}

/// Reduce user input (a bare host or a full URL) to the root domain to scope a fetch to
///
/// The host is trimmed, stripped of a trailing dot and lower-cased, then cut
/// down to its registrable domain (public suffix plus one label):
/// `https://playground.bfl.ai/` becomes `bfl.ai` and `www.example.co.uk`
/// becomes `example.co.uk`. A bare public suffix such as `co.uk` is rejected.
pub fn normalize_domain(input: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidInput("empty domain".to_string()));
    }

    let host = if input.contains("://") {
        let parsed = url::Url::parse(input)
            .map_err(|e| Error::InvalidInput(format!("invalid URL '{}': {}", input, e)))?;
        parsed
            .host_str()
            .ok_or_else(|| Error::InvalidInput(format!("URL '{}' has no host", input)))?
            .to_string()
    } else {
        // tolerate "example.com/path" style input
        input.split('/').next().unwrap_or(input).to_string()
    };

    let host = host.trim_end_matches('.').to_lowercase();
    if host.is_empty() || host.contains(char::is_whitespace) || host.contains('*') {
        return Err(Error::InvalidInput(format!("invalid domain '{}'", input)));
    }

    psl::domain_str(&host)
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidInput(format!("cannot determine root domain of '{}'", host)))
}

fn clean(input: &str) -> String {
    input.trim().to_lowercase()
}
