//! Integration tests for the PostgreSQL store against a real database.
//!
//! Run with `DATABASE_URL` pointing at a scratch server and `--ignored`.

use autotune_db::models::job::NewJob;
use autotune_db::models::status::JobStatus;
use autotune_db::{CounterStore, LedgerStore, PgStore, SettingStore, StoreError};
use rust_decimal_macros::dec;
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_job(fingerprint: &str) -> NewJob {
    NewJob {
        endpoint: "https://ns.example.com".to_string(),
        endpoint_hash: "hash".to_string(),
        fingerprint: fingerprint.to_string(),
        profile: serde_json::json!({"dia": 4}),
        units: "mg/dl".to_string(),
        timezone: Some("UTC".to_string()),
        uam_as_basal: true,
        basal_increment: dec!(0.05),
        email_results_to: "user@example.com".to_string(),
        days: 7,
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn insert_and_find_round_trip(pool: PgPool) {
    let store = PgStore::new(pool);
    let job = store.insert(&new_job("fp")).await.unwrap();

    assert_eq!(job.status(), Some(JobStatus::Queued));
    assert_eq!(job.basal_increment, dec!(0.05));

    let found = store.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(found.fingerprint, "fp");
    assert!(!found.failed);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn in_flight_lookup_and_queue_counts(pool: PgPool) {
    let store = PgStore::new(pool);
    let first = store.insert(&new_job("fp")).await.unwrap();
    let mut second = store.insert(&new_job("other")).await.unwrap();
    second.status_id = JobStatus::Dispatched.id();
    second.backend_job_name = Some(format!("autotune-job-{}", second.id));
    store.replace(&second, &[JobStatus::Queued.id()]).await.unwrap();

    let found = store.find_in_flight_by_fingerprint("fp").await.unwrap().unwrap();
    assert_eq!(found.id, first.id);

    let queued = [JobStatus::Queued.id()];
    assert_eq!(store.count_up_to(&queued, second.id).await.unwrap(), 1);
    let in_flight = [JobStatus::Queued.id(), JobStatus::Dispatched.id()];
    assert_eq!(store.count_up_to(&in_flight, second.id).await.unwrap(), 2);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn replace_missing_row_is_not_found(pool: PgPool) {
    let store = PgStore::new(pool);
    let mut job = store.insert(&new_job("fp")).await.unwrap();
    job.id += 1000;
    assert!(matches!(
        store.replace(&job, &[JobStatus::Queued.id()]).await,
        Err(StoreError::NotFound { .. })
    ));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn replace_is_conditional_on_stored_status(pool: PgPool) {
    let store = PgStore::new(pool);
    let queued = store.insert(&new_job("fp")).await.unwrap();

    let mut failed = queued.clone();
    failed.status_id = JobStatus::Failed.id();
    failed.failed = true;
    assert!(store.replace(&failed, &[JobStatus::Queued.id()]).await.unwrap().is_some());

    let mut dispatched = queued;
    dispatched.status_id = JobStatus::Dispatched.id();
    assert!(store.replace(&dispatched, &[JobStatus::Queued.id()]).await.unwrap().is_none());

    let stored = store.find_by_id(failed.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), Some(JobStatus::Failed));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn delete_history_matches_email_case_insensitively(pool: PgPool) {
    let store = PgStore::new(pool);
    store.insert(&new_job("a")).await.unwrap();
    store.insert(&new_job("b")).await.unwrap();

    let removed = store
        .delete_by_endpoint_hash_and_email("hash", "USER@example.com")
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert!(store.list_by_endpoint_hash("hash").await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Settings and counters
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn settings_upsert(pool: PgPool) {
    let store = PgStore::new(pool);
    store.insert_or_replace("tool_commit", "abc1234").await.unwrap();
    store.insert_or_replace("tool_commit", "def5678").await.unwrap();
    assert_eq!(store.get("tool_commit").await.unwrap().unwrap().value, "def5678");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn counter_compare_and_swap(pool: PgPool) {
    let store = PgStore::new(pool);
    assert!(store.try_insert("Total", 1).await.unwrap());
    assert!(!store.try_insert("Total", 1).await.unwrap());
    assert!(!store.try_update("Total", 5, 2).await.unwrap());
    assert!(store.try_update("Total", 1, 2).await.unwrap());
    let counter = store.read("Total").await.unwrap().unwrap();
    assert_eq!((counter.job_count, counter.version), (2, 2));
}
