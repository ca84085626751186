//! Paginated, resumable CDX fetch loop
//!
//! [`Fetcher::fetch_with_resume`] walks a domain's result set one page at a
//! time. Each page is requested with the continuation token returned by the
//! previous one, so pages are strictly sequential. The loop is an explicit
//! state machine:
//!
//! ```text
//! Fetching(n) --ok, token--------> Fetching(n+1)
//! Fetching(n) --ok, no token-----> Done(Exhausted)
//! Fetching(n) --handler Stop-----> Done(Stopped), or Done(Exhausted) on the last page
//! Fetching(n) --retryable--------> Backoff(n, attempt) --waited--> Fetching(n)
//! Fetching(n) --retryable, spent-> Done(Failed(RetriesExhausted))
//! Fetching(n) --fatal------------> Done(Failed(error))
//! any         --cancel-----------> Done(Cancelled)
//! ```
//!
//! Whatever the exit, the returned [`FetchOutcome`] carries every record
//! fetched so far and the token to resume from.

use crate::config::RetryConfig;
use crate::error::FetchError;
use crate::retry::{self, RetryClass};
use crate::types::{FetchProgress, PageResponse, Record};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Source of CDX pages
///
/// Implemented by [`crate::CdxClient`]; tests substitute an in-memory index.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch the page that starts at `continuation_token` (`None` for the first page)
    async fn fetch_page(
        &self,
        domain: &str,
        continuation_token: Option<&str>,
    ) -> Result<PageResponse, FetchError>;
}

/// One successfully fetched page, as handed to a [`BatchHandler`]
#[derive(Debug, Clone, Copy)]
pub struct PageBatch<'a> {
    /// Domain being fetched
    pub domain: &'a str,
    /// Records of this page only
    pub records: &'a [Record],
    /// Token for the page after this one (`None` if this was the last page)
    pub continuation_token: Option<&'a str>,
    /// Records fetched so far in this call, including this page
    pub total_records: usize,
    /// 1-based page number within this call
    pub page: u32,
}

/// Answer of a [`BatchHandler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchControl {
    /// Keep fetching
    Continue,
    /// Stop after this page; not an error
    Stop,
}

/// Per-page callback, typically used to persist records as they arrive
#[async_trait]
pub trait BatchHandler: Send {
    /// Handle one page; returning [`BatchControl::Stop`] ends the fetch
    async fn handle_batch(&mut self, batch: PageBatch<'_>) -> BatchControl;
}

/// Handler that keeps every page and never stops the fetch
#[derive(Debug, Default, Clone, Copy)]
pub struct ContinueAll;

#[async_trait]
impl BatchHandler for ContinueAll {
    async fn handle_batch(&mut self, _batch: PageBatch<'_>) -> BatchControl {
        BatchControl::Continue
    }
}

/// Result of a fetch call
///
/// Partial results are always returned; `error` says why the fetch ended early.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Every record fetched during this call
    pub records: Vec<Record>,
    /// Token to resume from; `None` only when the result set is drained
    ///
    /// A handler stop on the final page still counts as drained, so `None`
    /// always comes with `is_complete == true` when `error` is `None`.
    pub continuation_token: Option<String>,
    /// True only if a page without a continuation token was seen
    pub is_complete: bool,
    /// Pages successfully fetched during this call
    pub pages: u32,
    /// Why the fetch ended early; `None` on exhaustion or a handler stop
    pub error: Option<FetchError>,
}

impl FetchOutcome {
    /// True if the fetch ended because the cancellation token fired
    pub fn is_cancelled(&self) -> bool {
        self.error.as_ref().is_some_and(FetchError::is_cancelled)
    }
}

enum FetchStep {
    Fetching {
        page: u32,
        attempt: u32,
    },
    Backoff {
        page: u32,
        attempt: u32,
        error: FetchError,
    },
    Done(Termination),
}

enum Termination {
    Exhausted,
    Stopped { next_token: String },
    Cancelled,
    Failed(FetchError),
}

/// Drives the page loop against a [`PageSource`]
pub struct Fetcher<S> {
    source: S,
    retry: RetryConfig,
}

impl<S: PageSource> Fetcher<S> {
    /// Create a fetcher with the given retry policy
    pub fn new(source: S, retry: RetryConfig) -> Self {
        Self { source, retry }
    }

    /// The underlying page source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch a whole domain from the start, keeping all records in memory
    pub async fn fetch_all(&self, domain: &str, cancel: &CancellationToken) -> FetchOutcome {
        self.fetch_with_resume(domain, None, &mut ContinueAll, &mut |_: FetchProgress| {}, cancel)
            .await
    }

    /// Fetch a domain starting at `start_token` (or the beginning if `None`/empty)
    ///
    /// `handler` sees each page before the next one is requested; `progress`
    /// is told the running totals after the handler lets the fetch continue.
    pub async fn fetch_with_resume(
        &self,
        domain: &str,
        start_token: Option<&str>,
        handler: &mut dyn BatchHandler,
        progress: &mut (dyn FnMut(FetchProgress) + Send),
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let mut records: Vec<Record> = Vec::new();
        let mut token: Option<String> = start_token.filter(|t| !t.is_empty()).map(str::to_string);
        let mut pages = 0;

        if token.is_some() {
            tracing::info!(domain, "Resuming CDX fetch from stored token");
        }

        let mut step = FetchStep::Fetching {
            page: 1,
            attempt: 0,
        };

        let termination = loop {
            step = match step {
                FetchStep::Fetching { page, attempt } => {
                    if cancel.is_cancelled() {
                        FetchStep::Done(Termination::Cancelled)
                    } else {
                        let result = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => Err(FetchError::Cancelled),
                            r = self.source.fetch_page(domain, token.as_deref()) => r,
                        };

                        match result {
                            Ok(response) => {
                                pages = page;
                                let next = self
                                    .accept_page(domain, page, response, &mut records, handler)
                                    .await;
                                match next {
                                    PageVerdict::Stop(next_token) => FetchStep::Done(
                                        Termination::Stopped { next_token },
                                    ),
                                    PageVerdict::Drained => {
                                        FetchStep::Done(Termination::Exhausted)
                                    }
                                    PageVerdict::Last => {
                                        progress(FetchProgress {
                                            total_records: records.len(),
                                            page,
                                        });
                                        FetchStep::Done(Termination::Exhausted)
                                    }
                                    PageVerdict::More(next_token) => {
                                        progress(FetchProgress {
                                            total_records: records.len(),
                                            page,
                                        });
                                        token = Some(next_token);
                                        FetchStep::Fetching {
                                            page: page + 1,
                                            attempt: 0,
                                        }
                                    }
                                }
                            }
                            Err(FetchError::Cancelled) => FetchStep::Done(Termination::Cancelled),
                            Err(error) => self.on_error(domain, page, attempt, error),
                        }
                    }
                }
                FetchStep::Backoff {
                    page,
                    attempt,
                    error,
                } => {
                    let delay = retry::backoff_delay(&self.retry, attempt);
                    tracing::warn!(
                        domain,
                        page,
                        error = %error,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "CDX page failed, backing off"
                    );

                    if retry::wait_or_cancel(delay, cancel).await {
                        FetchStep::Fetching { page, attempt }
                    } else {
                        FetchStep::Done(Termination::Cancelled)
                    }
                }
                FetchStep::Done(termination) => break termination,
            };
        };

        let outcome = match termination {
            Termination::Exhausted => FetchOutcome {
                records,
                continuation_token: None,
                is_complete: true,
                pages,
                error: None,
            },
            Termination::Stopped { next_token } => FetchOutcome {
                records,
                continuation_token: Some(next_token),
                is_complete: false,
                pages,
                error: None,
            },
            Termination::Cancelled => FetchOutcome {
                records,
                continuation_token: token,
                is_complete: false,
                pages,
                error: Some(FetchError::Cancelled),
            },
            Termination::Failed(error) => FetchOutcome {
                records,
                continuation_token: token,
                is_complete: false,
                pages,
                error: Some(error),
            },
        };

        tracing::info!(
            domain,
            records = outcome.records.len(),
            pages = outcome.pages,
            complete = outcome.is_complete,
            error = ?outcome.error,
            "CDX fetch finished"
        );

        outcome
    }

    async fn accept_page(
        &self,
        domain: &str,
        page: u32,
        response: PageResponse,
        records: &mut Vec<Record>,
        handler: &mut dyn BatchHandler,
    ) -> PageVerdict {
        let PageResponse {
            records: batch,
            continuation_token,
        } = response;

        // a blank token is no token
        let continuation_token = continuation_token.filter(|t| !t.is_empty());
        let start = records.len();
        records.extend(batch);

        let control = handler
            .handle_batch(PageBatch {
                domain,
                records: &records[start..],
                continuation_token: continuation_token.as_deref(),
                total_records: records.len(),
                page,
            })
            .await;

        tracing::info!(
            domain,
            page,
            page_records = records.len() - start,
            total_records = records.len(),
            has_more = continuation_token.is_some(),
            "CDX page fetched"
        );

        match (control, continuation_token) {
            (BatchControl::Stop, Some(next)) => {
                tracing::info!(domain, page, "Batch handler requested stop");
                PageVerdict::Stop(next)
            }
            // nothing left to stop before
            (BatchControl::Stop, None) => PageVerdict::Drained,
            (BatchControl::Continue, None) => PageVerdict::Last,
            (BatchControl::Continue, Some(next)) => PageVerdict::More(next),
        }
    }

    fn on_error(&self, domain: &str, page: u32, attempt: u32, error: FetchError) -> FetchStep {
        match retry::classify(&error) {
            RetryClass::Retryable if attempt < self.retry.max_attempts => FetchStep::Backoff {
                page,
                attempt: attempt + 1,
                error,
            },
            RetryClass::Retryable => {
                tracing::warn!(
                    domain,
                    page,
                    retries = self.retry.max_attempts,
                    error = %error,
                    "Max retries exceeded, returning partial results"
                );
                FetchStep::Done(Termination::Failed(FetchError::RetriesExhausted {
                    attempts: self.retry.max_attempts,
                    source: Box::new(error),
                }))
            }
            RetryClass::Fatal => {
                tracing::error!(domain, page, error = %error, "CDX page failed");
                FetchStep::Done(Termination::Failed(error))
            }
        }
    }
}

enum PageVerdict {
    More(String),
    Last,
    /// Handler stopped on the last page
    Drained,
    Stop(String),
}
