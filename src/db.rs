//! Connection pool paired with its dialect.

use sqlx::any::{AnyPoolOptions, install_default_drivers};
use sqlx::{Any, AnyPool, Transaction};

use crate::dialect::Dialect;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Database {
    pool: AnyPool,
    dialect: Dialect,
}

impl Database {
    /// Connect to `url`. The dialect comes from the URL scheme.
    ///
    /// In-memory SQLite databases live as long as their connection, so they
    /// get a single connection that is never recycled.
    pub async fn connect(url: &str) -> Result<Self> {
        install_default_drivers();
        let dialect = Dialect::from_url(url)?;

        let options = if url.contains(":memory:") || url.contains("mode=memory") {
            AnyPoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            AnyPoolOptions::new().max_connections(5)
        };
        let pool = options.connect(url).await?;

        tracing::debug!(dialect = dialect.name(), "connected");
        Ok(Self { pool, dialect })
    }

    pub fn from_pool(pool: AnyPool, dialect: Dialect) -> Self {
        Self { pool, dialect }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Any>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
