//! Test configuration helpers pointing a harvester at a mock CDX server

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wayback_dl::{ApiConfig, CdxClient, Config, Database, Harvester, RetryConfig};
use wiremock::MockServer;

/// CDX endpoint path served by the mock index
pub const CDX_PATH: &str = "/cdx/search/cdx";

/// Configuration for a mock server: small pages, millisecond backoff
pub fn test_config(server: &MockServer, temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.api = ApiConfig {
        endpoint: format!("{}{}", server.uri(), CDX_PATH),
        timeout: Duration::from_secs(10),
        page_size: 5,
        ..ApiConfig::default()
    };
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
    };
    config.persistence.database_path = temp_dir.path().join("wayback.db");
    config
}

/// Create a harvester backed by a fresh database in a temp directory
///
/// Keep the returned `TempDir` alive for the duration of the test.
pub async fn create_test_harvester(server: &MockServer) -> (Arc<Harvester>, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(server, &temp_dir);
    let harvester = Harvester::from_config(&config).await.unwrap();
    (Arc::new(harvester), temp_dir)
}

/// Create a second harvester over the same database file, as a restarted process would
pub async fn reopen_harvester(server: &MockServer, temp_dir: &TempDir) -> Harvester {
    let config = test_config(server, temp_dir);
    let client = CdxClient::new(config.api.clone()).unwrap();
    let db = Database::new(&config.persistence.database_path)
        .await
        .unwrap();
    Harvester::new(client, Arc::new(db), config.retry)
}
