//! Persistence for the autotune job ledger.
//!
//! - [`models`]: row structs and DTOs.
//! - [`repositories`]: PostgreSQL queries, one zero-sized repo per table.
//! - [`store`]: the storage traits the pipeline depends on, plus [`PgStore`].
//! - [`memory`]: in-process store for tests and single-node runs.
//! - [`counters`]: bounded optimistic counter increment.

pub mod counters;
pub mod memory;
pub mod models;
pub mod repositories;
pub mod store;

use sqlx::postgres::PgPoolOptions;

pub use memory::MemoryStore;
pub use store::{CounterStore, LedgerStore, PgStore, SettingStore, StoreError};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Verify the database connection is alive.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply any pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
