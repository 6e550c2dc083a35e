//! Postgres access: the pool, schema migrations, and a liveness probe.
//!
//! Query result persistence lives in [`queries`].

pub mod queries;

use crate::error::{Error, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

/// Workers insert concurrently with API reads; keep a few spare connections.
const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared by the executor (writes) and the API (reads, deletes).
pub struct Db {
    pool: PgPool,
}

fn pool_options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
}

impl Db {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = pool_options().connect(url).await?;
        info!(max_connections = MAX_CONNECTIONS, "database pool ready");
        Ok(Self { pool })
    }

    /// Pool that opens its first connection on first use. Code paths that
    /// never query (request validation, the engine) can run without Postgres.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = pool_options().connect_lazy(url)?;
        Ok(Self { pool })
    }

    /// Apply `migrations/` in order; already-applied ones are skipped.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
