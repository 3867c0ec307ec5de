#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! BlogStandard shared infrastructure
//!
//! Database pool lifecycle and schema migrations used by both the API server
//! and the operator worker. The pool is created once per process and handed
//! to services by value (`PgPool` is a cheap `Arc` clone).

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Errors raised while setting up the database
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Pool sizing and timeouts
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl PoolSettings {
    /// Longer timeouts and a single connection for running DDL
    pub fn for_migrations() -> Self {
        Self {
            max_connections: 1,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Create the process-wide connection pool
///
/// Connects eagerly so a bad `DATABASE_URL` fails at startup rather than on
/// the first webhook.
pub async fn create_pool(database_url: &str) -> Result<PgPool, DatabaseError> {
    create_pool_with(database_url, PoolSettings::default()).await
}

/// Create a pool dedicated to running migrations
pub async fn create_migration_pool(database_url: &str) -> Result<PgPool, DatabaseError> {
    create_pool_with(database_url, PoolSettings::for_migrations()).await
}

pub async fn create_pool_with(
    database_url: &str,
    settings: PoolSettings,
) -> Result<PgPool, DatabaseError> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(settings.idle_timeout)
        .connect(database_url)
        .await?;

    tracing::info!(
        max_connections = settings.max_connections,
        "Database pool created"
    );

    Ok(pool)
}

/// Apply the embedded SQL migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
