use crate::db::*;
use tempfile::NamedTempFile;

async fn setup_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

fn page(prefix: &str, n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| Record::new(format!("http://{prefix}.example.com/{i}"), "example.com", "20200101000000"))
        .collect()
}

#[tokio::test]
async fn test_get_fetch_state_absent() {
    let (db, _temp) = setup_db().await;
    assert!(db.get_fetch_state("example.com").await.unwrap().is_none());
}

#[tokio::test]
async fn test_upsert_fetch_state_overwrites() {
    let (db, _temp) = setup_db().await;

    db.upsert_fetch_state("example.com", Some("tok-1"), 100, false, None)
        .await
        .unwrap();
    db.upsert_fetch_state("example.com", Some("tok-2"), 200, false, Some("HTTP 429"))
        .await
        .unwrap();

    let state = db.get_fetch_state("example.com").await.unwrap().unwrap();
    assert_eq!(state.domain, "example.com");
    assert_eq!(state.continuation_token.as_deref(), Some("tok-2"));
    assert_eq!(state.total_fetched, 200);
    assert!(!state.is_complete);
    assert_eq!(state.last_error.as_deref(), Some("HTTP 429"));
    assert!(state.is_resumable());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fetch_state")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_empty_token_is_stored_as_absent() {
    let (db, _temp) = setup_db().await;

    db.upsert_fetch_state("example.com", Some(""), 5, true, None)
        .await
        .unwrap();

    let state = db.get_fetch_state("example.com").await.unwrap().unwrap();
    assert_eq!(state.continuation_token, None);
    assert!(state.is_complete);
    assert!(!state.is_resumable());
}

#[tokio::test]
async fn test_delete_fetch_state() {
    let (db, _temp) = setup_db().await;
    db.upsert_fetch_state("example.com", Some("tok"), 1, false, None)
        .await
        .unwrap();

    assert!(db.delete_fetch_state("example.com").await.unwrap());
    assert!(!db.delete_fetch_state("example.com").await.unwrap());
    assert!(db.get_fetch_state("example.com").await.unwrap().is_none());
}

#[tokio::test]
async fn test_persist_page_advances_state() {
    let (db, _temp) = setup_db().await;

    let inserted = db
        .persist_page("example.com", &page("a", 3), Some("tok-1"), 0)
        .await
        .unwrap();
    assert_eq!(inserted, 3);

    let state = db.get_fetch_state("example.com").await.unwrap().unwrap();
    assert_eq!(state.continuation_token.as_deref(), Some("tok-1"));
    assert_eq!(state.total_fetched, 3);
    assert!(!state.is_complete);

    // last page: no token marks the domain complete
    let inserted = db
        .persist_page("example.com", &page("b", 2), None, 3)
        .await
        .unwrap();
    assert_eq!(inserted, 2);

    let state = db.get_fetch_state("example.com").await.unwrap().unwrap();
    assert_eq!(state.continuation_token, None);
    assert_eq!(state.total_fetched, 5);
    assert!(state.is_complete);
    assert_eq!(db.count_records("example.com").await.unwrap(), 5);
}

#[tokio::test]
async fn test_persist_page_replay_does_not_double_count() {
    let (db, _temp) = setup_db().await;

    db.persist_page("example.com", &page("a", 4), Some("tok-1"), 0)
        .await
        .unwrap();
    // the same page again, e.g. after a crash before the caller saw the result
    let inserted = db
        .persist_page("example.com", &page("a", 4), Some("tok-1"), 4)
        .await
        .unwrap();

    assert_eq!(inserted, 0);
    let state = db.get_fetch_state("example.com").await.unwrap().unwrap();
    assert_eq!(state.total_fetched, 4);
}

#[tokio::test]
async fn test_persist_page_clears_last_error() {
    let (db, _temp) = setup_db().await;
    db.upsert_fetch_state("example.com", Some("tok-1"), 0, false, Some("timeout"))
        .await
        .unwrap();

    db.persist_page("example.com", &page("a", 1), Some("tok-2"), 0)
        .await
        .unwrap();

    let state = db.get_fetch_state("example.com").await.unwrap().unwrap();
    assert_eq!(state.last_error, None);
}

/// A failing insert must leave the stored token where it was
#[tokio::test]
async fn test_persist_page_failure_keeps_previous_state() {
    let (db, _temp) = setup_db().await;
    db.persist_page("example.com", &page("a", 2), Some("tok-1"), 0)
        .await
        .unwrap();

    // make every further insert fail inside the transaction
    sqlx::query(
        "CREATE TRIGGER reject_inserts BEFORE INSERT ON cdx_records BEGIN SELECT RAISE(ABORT, 'disk full'); END",
    )
    .execute(db.pool())
    .await
    .unwrap();

    let result = db
        .persist_page("example.com", &page("b", 2), Some("tok-2"), 2)
        .await;
    assert!(result.is_err());

    let state = db.get_fetch_state("example.com").await.unwrap().unwrap();
    assert_eq!(state.continuation_token.as_deref(), Some("tok-1"));
    assert_eq!(state.total_fetched, 2);
    assert_eq!(db.count_records("example.com").await.unwrap(), 2);
}
