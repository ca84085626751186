use crate::db::*;
use crate::error::DatabaseError;
use tempfile::NamedTempFile;

/// Verify that querying the database after closing the pool returns an error
/// rather than hanging or panicking.
#[tokio::test]
async fn test_get_fetch_state_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.upsert_fetch_state("example.com", Some("tok"), 10, false, None)
        .await
        .unwrap();
    assert!(db.get_fetch_state("example.com").await.unwrap().is_some());

    // Close the pool (but keep the Database struct alive)
    db.pool().close().await;

    let result = db.get_fetch_state("example.com").await;
    assert!(
        result.is_err(),
        "get_fetch_state after pool close should return an error, got: {:?}",
        result
    );
}

/// A page that cannot be persisted must surface an error, not be dropped silently
#[tokio::test]
async fn test_persist_page_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.pool().close().await;

    let records = vec![crate::types::Record::new(
        "http://example.com/",
        "example.com",
        "20200101000000",
    )];
    let result = db.persist_page("example.com", &records, Some("tok"), 0).await;
    assert!(matches!(
        result,
        Err(crate::Error::Database(DatabaseError::QueryFailed(_)))
    ));
}
