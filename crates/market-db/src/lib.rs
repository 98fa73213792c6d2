//! # market-db
//!
//! Storage backends for the marketplace `MarketStore` trait.
//!
//! - [`PgStore`]: PostgreSQL via sqlx, with embedded migrations
//! - [`MemoryStore`]: process-local, for tests and database-less development

mod memory;
mod postgres;
mod rows;

pub use memory::MemoryStore;
pub use postgres::{PgStore, MIGRATOR};

use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Create a PostgreSQL connection pool.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
