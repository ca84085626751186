//! HTTP transport for the CDX index API

use crate::config::ApiConfig;
use crate::error::FetchError;
use crate::fetcher::PageSource;
use crate::parser;
use crate::query;
use crate::types::{PageResponse, Record};
use crate::{Error, Result};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::io::Read;

/// Client for the CDX search endpoint
///
/// Holds no per-fetch state: every call takes its domain and token as
/// arguments, so one client can be shared (e.g. behind an `Arc`) by
/// harvests of different domains.
#[derive(Clone, Debug)]
pub struct CdxClient {
    http: reqwest::Client,
    config: ApiConfig,
}

impl CdxClient {
    /// Create a client from API settings
    pub fn new(config: ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(default_headers(&config)?)
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to create HTTP client: {}", e),
                key: None,
            })?;

        Ok(Self { http, config })
    }

    /// API settings this client was built with
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Issue one GET for `{endpoint}?{query}` and return the decoded body
    ///
    /// The query is appended verbatim so the literal `*` wildcard survives.
    pub async fn fetch_raw(&self, query: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let url = format!("{}?{}", self.config.endpoint, query);
        tracing::debug!(url = %url, "CDX request");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        let gzipped = response
            .headers()
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("gzip"));

        let body = response.bytes().await.map_err(|e| self.request_error(e))?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(FetchError::http_status(status.as_u16(), text.trim()));
        }

        if gzipped {
            gunzip(&body)
        } else {
            Ok(body.to_vec())
        }
    }

    /// Fetch and parse one page of a domain-wide listing
    pub async fn fetch_page(
        &self,
        domain: &str,
        continuation_token: Option<&str>,
    ) -> std::result::Result<PageResponse, FetchError> {
        let query =
            query::build_page_query_with_limit(domain, continuation_token, self.config.page_size);
        let body = self.fetch_raw(&query).await?;
        parser::parse_page(&body, domain)
    }

    /// Fetch the newest 2xx/3xx capture of one exact URL
    ///
    /// Returns `Ok(None)` if the index holds no such capture.
    pub async fn fetch_latest(
        &self,
        target_url: &str,
    ) -> std::result::Result<Option<Record>, FetchError> {
        let body = self
            .fetch_raw(&query::build_single_latest_query(target_url))
            .await?;
        parser::parse_latest(&body)
    }

    /// Estimate how many records a full fetch of `domain` would return
    ///
    /// Index page count times `records_per_estimate_page`. Advisory only: the
    /// real count can be well above or below it.
    pub async fn estimate_record_count(&self, domain: &str) -> std::result::Result<u64, FetchError> {
        let body = self
            .fetch_raw(&query::build_estimate_query(domain))
            .await?;
        let pages = parser::parse_page_count(&body)?;
        Ok(pages.saturating_mul(self.config.records_per_estimate_page))
    }

    fn request_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.config.timeout)
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl PageSource for CdxClient {
    async fn fetch_page(
        &self,
        domain: &str,
        continuation_token: Option<&str>,
    ) -> std::result::Result<PageResponse, FetchError> {
        CdxClient::fetch_page(self, domain, continuation_token).await
    }
}

/// Headers the archive expects from a browser; bare clients get throttled harder
fn default_headers(config: &ApiConfig) -> Result<HeaderMap> {
    let value = |name: &str, v: &str| {
        HeaderValue::from_str(v).map_err(|e| Error::Config {
            message: format!("invalid {} header value: {}", name, e),
            key: Some(format!("api.{}", name)),
        })
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, value("user_agent", &config.user_agent)?);
    headers.insert(header::REFERER, value("referer", &config.referer)?);
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
    Ok(headers)
}

fn gunzip(body: &[u8]) -> std::result::Result<Vec<u8>, FetchError> {
    let mut decoder = GzDecoder::new(body);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| FetchError::Decode(format!("failed to decompress gzip body: {}", e)))?;
    Ok(out)
}
