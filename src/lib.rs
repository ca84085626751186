//! # wayback-dl
//!
//! Resumable, rate-limited harvester for the Wayback Machine CDX index.
//!
//! The CDX API returns a domain's captures a page at a time, each page ending
//! with a resume key for the next. wayback-dl walks those pages, backs off
//! when the archive sheds load, and stores every page together with its
//! resume key in SQLite. An interrupted harvest (Ctrl+C, crash, retry budget
//! spent) picks up at the first page it had not stored yet.
//!
//! ## Quick Start
//!
//! ```no_run
//! use tokio_util::sync::CancellationToken;
//! use wayback_dl::{Config, Harvester, cancel_on_shutdown_signal};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let harvester = Harvester::from_config(&Config::default()).await?;
//!
//!     let cancel = CancellationToken::new();
//!     cancel_on_shutdown_signal(cancel.clone());
//!
//!     let report = harvester.harvest("example.com", &cancel).await?;
//!     println!("{} records stored", report.total_fetched());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// HTTP transport for the CDX API
pub mod client;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Paginated, resumable fetch loop
pub mod fetcher;
/// Resume-or-fresh harvests persisted page by page
pub mod harvester;
/// CDX response parsing
pub mod parser;
/// CDX query construction
pub mod query;
/// Retry classification with exponential backoff
pub mod retry;
/// Core data types
pub mod types;

// Re-export commonly used types
pub use client::CdxClient;
pub use config::{ApiConfig, Config, PersistenceConfig, RetryConfig};
pub use db::Database;
pub use error::{DatabaseError, Error, FetchError, Result};
pub use fetcher::{
    BatchControl, BatchHandler, ContinueAll, FetchOutcome, Fetcher, PageBatch, PageSource,
};
pub use harvester::{HarvestOptions, HarvestReport, HarvestSummary, Harvester};
pub use query::normalize_domain;
pub use retry::{IsRetryable, RetryClass};
pub use types::{
    DomainStats, FetchProgress, FetchState, PageResponse, Record, RecordFilter, StoredRecord,
};

/// Cancel `token` when the process receives a termination signal.
///
/// Spawns a task that waits for the signal; harvests watching the token then
/// stop at the next page boundary or backoff wait, with their progress saved.
///
/// Listens for SIGTERM and SIGINT on unix and for Ctrl+C elsewhere.
///
/// Must be called from within a tokio runtime.
pub fn cancel_on_shutdown_signal(
    token: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::info!("Shutdown signal received, cancelling harvests");
                token.cancel();
            }
            // nothing left to cancel
            _ = token.cancelled() => {}
        }
    })
}

/// Resolves on SIGTERM or SIGINT
///
/// A signal whose handler cannot be installed is simply not watched; with
/// neither available this falls back to `ctrl_c`.
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    fn install(kind: SignalKind, name: &'static str) -> Option<Signal> {
        signal(kind)
            .inspect_err(|e| tracing::warn!(signal = name, error = %e, "Signal handler unavailable"))
            .ok()
    }

    async fn next(stream: Option<Signal>) {
        match stream {
            Some(mut s) => {
                s.recv().await;
            }
            None => std::future::pending().await,
        }
    }

    let terminate = install(SignalKind::terminate(), "SIGTERM");
    let interrupt = install(SignalKind::interrupt(), "SIGINT");

    if terminate.is_none() && interrupt.is_none() {
        wait_for_ctrl_c().await;
        return;
    }

    tokio::select! {
        _ = next(terminate) => tracing::info!(signal = "SIGTERM", "Shutdown signal"),
        _ = next(interrupt) => tracing::info!(signal = "SIGINT", "Shutdown signal"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // a listener that failed to install never fires
        tracing::error!(error = %e, "Ctrl+C listener unavailable");
        std::future::pending::<()>().await;
    }
    tracing::info!(signal = "ctrl_c", "Shutdown signal");
}
