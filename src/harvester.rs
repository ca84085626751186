//! Domain harvests: resume-or-fresh fetches persisted page by page
//!
//! A [`Harvester`] owns the CDX client and the database. For each domain it
//! looks up the stored fetch state, picks up where the last run stopped, and
//! stores every page (records plus resume token) in one transaction before the
//! next page is requested. A crash or cancellation therefore never loses more
//! than the page in flight, and rerunning the harvest is always safe.

use crate::client::CdxClient;
use crate::config::{Config, RetryConfig};
use crate::db::Database;
use crate::error::FetchError;
use crate::fetcher::{BatchControl, BatchHandler, FetchOutcome, Fetcher, PageBatch};
use crate::query::normalize_domain;
use crate::retry;
use crate::types::{FetchProgress, FetchState, Record};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Per-call harvest options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HarvestOptions {
    /// Discard stored fetch state and start from the first page
    ///
    /// Stored records are kept; re-fetched ones are ignored as duplicates.
    pub force_restart: bool,
}

/// What a harvest call did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HarvestReport {
    /// The domain was already fully harvested; nothing was requested
    AlreadyComplete {
        /// Normalized domain
        domain: String,
        /// Records stored for the domain so far
        total_fetched: i64,
    },
    /// A fetch ran (to completion or not)
    Finished(HarvestSummary),
}

/// Summary of a harvest that ran
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HarvestSummary {
    /// Normalized domain
    pub domain: String,
    /// Whether the fetch continued from a stored token
    pub resumed: bool,
    /// Pages fetched in this run
    pub pages: u32,
    /// Records received in this run, duplicates included
    pub received: usize,
    /// Genuinely new rows stored in this run
    pub inserted: u64,
    /// Records stored for the domain across all runs
    pub total_fetched: i64,
    /// Whether the domain is now fully harvested
    pub is_complete: bool,
    /// Token the next run will resume from
    pub continuation_token: Option<String>,
    /// Why the fetch ended early, if it did
    pub error: Option<FetchError>,
}

impl HarvestReport {
    /// True if the domain is fully harvested after this call
    pub fn is_complete(&self) -> bool {
        match self {
            HarvestReport::AlreadyComplete { .. } => true,
            HarvestReport::Finished(summary) => summary.is_complete,
        }
    }

    /// Records stored for the domain across all runs
    pub fn total_fetched(&self) -> i64 {
        match self {
            HarvestReport::AlreadyComplete { total_fetched, .. } => *total_fetched,
            HarvestReport::Finished(summary) => summary.total_fetched,
        }
    }
}

/// Runs resumable harvests against the CDX index
///
/// Different domains may be harvested concurrently through one shared
/// `Harvester`; a second concurrent harvest of the same domain is refused
/// with [`Error::AlreadyRunning`].
pub struct Harvester {
    fetcher: Fetcher<CdxClient>,
    db: Arc<Database>,
    retry: RetryConfig,
    running: Mutex<HashSet<String>>,
}

impl Harvester {
    /// Create a harvester from an existing client and database
    pub fn new(client: CdxClient, db: Arc<Database>, retry: RetryConfig) -> Self {
        Self {
            fetcher: Fetcher::new(client, retry.clone()),
            db,
            retry,
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Validate `config`, open the database it names and build the client
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let client = CdxClient::new(config.api.clone())?;
        let db = Database::new(&config.persistence.database_path).await?;
        Ok(Self::new(client, Arc::new(db), config.retry.clone()))
    }

    /// The underlying database
    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// The underlying CDX client
    pub fn client(&self) -> &CdxClient {
        self.fetcher.source()
    }

    /// Harvest a domain, resuming from stored state when there is any
    pub async fn harvest(&self, domain: &str, cancel: &CancellationToken) -> Result<HarvestReport> {
        self.harvest_with(domain, HarvestOptions::default(), cancel)
            .await
    }

    /// Harvest a domain with explicit options
    ///
    /// Fetch failures (rate limiting that outlasts the retry budget, bad
    /// responses, cancellation) are not errors here: they end the run early
    /// and are reported in [`HarvestSummary::error`], with the fetch state
    /// left pointing at the first page not yet stored. `Err` means the
    /// domain was invalid, already being harvested, or the database failed.
    pub async fn harvest_with(
        &self,
        domain: &str,
        options: HarvestOptions,
        cancel: &CancellationToken,
    ) -> Result<HarvestReport> {
        let domain = normalize_domain(domain)?;
        let _guard = RunningGuard::acquire(&self.running, &domain)?;

        if options.force_restart && self.db.delete_fetch_state(&domain).await? {
            tracing::info!(domain = %domain, "Discarded stored fetch state");
        }

        let state = self.db.get_fetch_state(&domain).await?;
        if let Some(FetchState {
            is_complete: true,
            total_fetched,
            ..
        }) = state
        {
            tracing::info!(domain = %domain, total_fetched, "Domain already fully harvested");
            return Ok(HarvestReport::AlreadyComplete {
                domain,
                total_fetched,
            });
        }

        let start_token = state.as_ref().and_then(|s| s.continuation_token.clone());
        let total_before = match &state {
            Some(s) => s.total_fetched,
            None => self.db.count_records(&domain).await?,
        };
        let resumed = start_token.is_some();

        tracing::info!(
            domain = %domain,
            resumed,
            total_fetched = total_before,
            "Starting harvest"
        );

        let mut handler = PersistingHandler {
            db: &self.db,
            token: start_token.clone(),
            total_fetched: total_before,
            inserted: 0,
            store_error: None,
        };

        let outcome = self
            .fetcher
            .fetch_with_resume(
                &domain,
                start_token.as_deref(),
                &mut handler,
                &mut |p: FetchProgress| {
                    tracing::debug!(page = p.page, records = p.total_records, "Harvest progress");
                },
                cancel,
            )
            .await;

        let PersistingHandler {
            token,
            total_fetched,
            inserted,
            store_error,
            ..
        } = handler;

        if let Some(e) = store_error {
            // state stays at the last page that was stored
            if let Err(state_err) = self
                .db
                .upsert_fetch_state(&domain, token.as_deref(), total_fetched, false, Some(&e.to_string()))
                .await
            {
                tracing::warn!(domain = %domain, error = %state_err, "Failed to record harvest error");
            }
            return Err(e);
        }

        let summary = self
            .finish(domain, resumed, outcome, token, total_fetched, inserted)
            .await?;
        Ok(HarvestReport::Finished(summary))
    }

    async fn finish(
        &self,
        domain: String,
        resumed: bool,
        outcome: FetchOutcome,
        token: Option<String>,
        total_fetched: i64,
        inserted: u64,
    ) -> Result<HarvestSummary> {
        let last_error = outcome.error.as_ref().map(ToString::to_string);

        self.db
            .upsert_fetch_state(
                &domain,
                token.as_deref(),
                total_fetched,
                outcome.is_complete,
                last_error.as_deref(),
            )
            .await?;

        match &outcome.error {
            None => tracing::info!(
                domain = %domain,
                inserted,
                total_fetched,
                complete = outcome.is_complete,
                "Harvest finished"
            ),
            Some(e) if e.is_cancelled() => tracing::info!(
                domain = %domain,
                inserted,
                total_fetched,
                "Harvest cancelled, progress saved"
            ),
            Some(e) => tracing::warn!(
                domain = %domain,
                inserted,
                total_fetched,
                error = %e,
                "Harvest interrupted, progress saved"
            ),
        }

        Ok(HarvestSummary {
            domain,
            resumed,
            pages: outcome.pages,
            received: outcome.records.len(),
            inserted,
            total_fetched,
            is_complete: outcome.is_complete,
            continuation_token: token,
            error: outcome.error,
        })
    }

    /// Newest successful (2xx/3xx) capture of one exact URL
    ///
    /// Rate limiting and timeouts are retried with the harvest retry policy.
    pub async fn lookup_latest(
        &self,
        target_url: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Record>> {
        let target_url = target_url.trim();
        if target_url.is_empty() {
            return Err(Error::InvalidInput("empty URL".to_string()));
        }

        let client = self.client();
        let latest =
            retry::fetch_with_retry(&self.retry, cancel, || client.fetch_latest(target_url))
                .await?;
        Ok(latest)
    }

    /// Advisory record count for a domain, from the index page count
    pub async fn estimate(&self, domain: &str, cancel: &CancellationToken) -> Result<u64> {
        let domain = normalize_domain(domain)?;
        let client = self.client();
        let scoped = domain.as_str();
        let estimate =
            retry::fetch_with_retry(&self.retry, cancel, || client.estimate_record_count(scoped))
                .await?;
        tracing::debug!(domain = %domain, estimate, "Estimated record count");
        Ok(estimate)
    }
}

/// Stores each page and its token together; stops the fetch if the store fails
struct PersistingHandler<'a> {
    db: &'a Database,
    /// Token of the first page not yet stored
    token: Option<String>,
    total_fetched: i64,
    inserted: u64,
    store_error: Option<Error>,
}

#[async_trait]
impl BatchHandler for PersistingHandler<'_> {
    async fn handle_batch(&mut self, batch: PageBatch<'_>) -> BatchControl {
        match self
            .db
            .persist_page(
                batch.domain,
                batch.records,
                batch.continuation_token,
                self.total_fetched,
            )
            .await
        {
            Ok(inserted) => {
                self.inserted += inserted;
                self.total_fetched = self
                    .total_fetched
                    .saturating_add(i64::try_from(inserted).unwrap_or(i64::MAX));
                self.token = batch.continuation_token.map(str::to_string);
                BatchControl::Continue
            }
            Err(e) => {
                tracing::error!(
                    domain = batch.domain,
                    page = batch.page,
                    error = %e,
                    "Failed to store page, stopping harvest"
                );
                self.store_error = Some(e);
                BatchControl::Stop
            }
        }
    }
}

/// Marks a domain as being harvested until dropped
struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<String>>,
    domain: String,
}

impl<'a> RunningGuard<'a> {
    fn acquire(running: &'a Mutex<HashSet<String>>, domain: &str) -> Result<Self> {
        let mut set = running.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(domain.to_string()) {
            return Err(Error::AlreadyRunning(domain.to_string()));
        }
        Ok(Self {
            running,
            domain: domain.to_string(),
        })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.domain);
    }
}
