//! Persistent record of which migrations ran.
//!
//! Every ledger call takes the connection to use, so recording or removing
//! an entry happens inside the same transaction as the migration itself.

use async_trait::async_trait;
use sqlx::AnyConnection;

use crate::dialect::Dialect;
use crate::error::Result;

/// Table used when the configuration does not name one.
pub const DEFAULT_LEDGER_TABLE: &str = "retrace_migrations";

/// One recorded run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub app_name: String,
    pub migration_id: String,
    pub ran_on: String,
}

#[async_trait]
pub trait MigrationLedger: Send + Sync {
    /// Create the backing table if it is missing.
    async fn ensure_table(&self, conn: &mut AnyConnection) -> Result<()>;

    /// Ids of migrations that ran for `app_name`, in the order they ran.
    async fn get_ids_for_app(
        &self,
        conn: &mut AnyConnection,
        app_name: &str,
    ) -> Result<Vec<String>>;

    async fn entries_for_app(
        &self,
        conn: &mut AnyConnection,
        app_name: &str,
    ) -> Result<Vec<LedgerEntry>>;

    async fn record(
        &self,
        conn: &mut AnyConnection,
        app_name: &str,
        migration_id: &str,
    ) -> Result<()>;

    async fn remove(
        &self,
        conn: &mut AnyConnection,
        app_name: &str,
        migration_id: &str,
    ) -> Result<()>;
}

/// Ledger stored in a table of the migrated database.
#[derive(Debug, Clone)]
pub struct SqlLedger {
    table: String,
    dialect: Dialect,
}

impl SqlLedger {
    pub fn new(dialect: Dialect) -> Self {
        Self::with_table(DEFAULT_LEDGER_TABLE, dialect)
    }

    pub fn with_table(table: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            table: table.into(),
            dialect,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn quoted(&self) -> String {
        self.dialect.quote(&self.table)
    }
}

#[async_trait]
impl MigrationLedger for SqlLedger {
    async fn ensure_table(&self, conn: &mut AnyConnection) -> Result<()> {
        let ddl = self.dialect.ledger_table_ddl(&self.table);
        sqlx::Executor::execute(&mut *conn, ddl.as_str()).await?;
        Ok(())
    }

    async fn get_ids_for_app(
        &self,
        conn: &mut AnyConnection,
        app_name: &str,
    ) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT name FROM {} WHERE app_name = {} ORDER BY id",
            self.quoted(),
            self.dialect.placeholder(1)
        );
        let ids = sqlx::query_scalar::<_, String>(&sql)
            .bind(app_name)
            .fetch_all(&mut *conn)
            .await?;
        Ok(ids)
    }

    async fn entries_for_app(
        &self,
        conn: &mut AnyConnection,
        app_name: &str,
    ) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT app_name, name, CAST(ran_on AS TEXT) FROM {} WHERE app_name = {} ORDER BY id",
            self.quoted(),
            self.dialect.placeholder(1)
        );
        let rows = sqlx::query_as::<_, (String, String, String)>(&sql)
            .bind(app_name)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(app_name, migration_id, ran_on)| LedgerEntry {
                app_name,
                migration_id,
                ran_on,
            })
            .collect())
    }

    async fn record(
        &self,
        conn: &mut AnyConnection,
        app_name: &str,
        migration_id: &str,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (name, app_name) VALUES ({}, {})",
            self.quoted(),
            self.dialect.placeholder(1),
            self.dialect.placeholder(2)
        );
        sqlx::query(&sql)
            .bind(migration_id)
            .bind(app_name)
            .execute(&mut *conn)
            .await?;
        tracing::debug!(app = app_name, migration = migration_id, "recorded in ledger");
        Ok(())
    }

    async fn remove(
        &self,
        conn: &mut AnyConnection,
        app_name: &str,
        migration_id: &str,
    ) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE app_name = {} AND name = {}",
            self.quoted(),
            self.dialect.placeholder(1),
            self.dialect.placeholder(2)
        );
        sqlx::query(&sql)
            .bind(app_name)
            .bind(migration_id)
            .execute(&mut *conn)
            .await?;
        tracing::debug!(app = app_name, migration = migration_id, "removed from ledger");
        Ok(())
    }
}
