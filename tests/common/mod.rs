//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use retrace::prelude::*;

/// Fresh in-memory SQLite database.
pub async fn memory_db() -> Database {
    Database::connect("sqlite::memory:").await.unwrap()
}

pub async fn execute(db: &Database, sql: &str) {
    sqlx::query(sql).execute(db.pool()).await.unwrap();
}

pub async fn try_execute(db: &Database, sql: &str) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(sql).execute(db.pool()).await.map(|_| ())
}

pub async fn table_exists(db: &Database, table: &str) -> bool {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_one(db.pool())
            .await
            .unwrap();
    count == 1
}

/// Column names in declaration order.
pub async fn columns(db: &Database, table: &str) -> Vec<String> {
    let sql = format!("SELECT CAST(name AS TEXT) FROM pragma_table_info('{}') ORDER BY cid", table);
    sqlx::query_scalar(&sql).fetch_all(db.pool()).await.unwrap()
}

/// Names of the indexes created explicitly on `table`.
pub async fn indexes(db: &Database, table: &str) -> Vec<String> {
    sqlx::query_scalar(
        "SELECT CAST(name AS TEXT) FROM sqlite_master \
         WHERE type = 'index' AND sql IS NOT NULL AND tbl_name = ? ORDER BY name",
    )
    .bind(table)
    .fetch_all(db.pool())
    .await
    .unwrap()
}

pub async fn count(db: &Database, table: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM \"{}\"", table);
    sqlx::query_scalar(&sql).fetch_one(db.pool()).await.unwrap()
}

/// Lookup that records every call before delegating to a log.
pub struct RecordingLookup {
    pub log: MigrationLog,
    pub calls: Mutex<Vec<(String, String, isize)>>,
}

impl RecordingLookup {
    pub fn new(managers: Vec<MigrationManager>) -> Self {
        let mut log = MigrationLog::new();
        for manager in managers {
            log.insert(manager);
        }
        Self {
            log,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String, isize)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ManagerLookup for RecordingLookup {
    fn resolve(
        &self,
        app_name: &str,
        max_migration_id: &str,
        offset: isize,
    ) -> retrace::Result<Vec<Arc<MigrationManager>>> {
        self.calls
            .lock()
            .unwrap()
            .push((app_name.to_string(), max_migration_id.to_string(), offset));
        self.log.resolve(app_name, max_migration_id, offset)
    }
}

/// Band table with a name and a popularity column.
pub fn band_manager(migration_id: &str) -> MigrationManager {
    let mut manager = MigrationManager::new(migration_id, "music");
    manager.add_table(
        "Band",
        "band",
        vec![
            ColumnDefinition::new("name", ColumnType::Varchar)
                .with_params(ColumnParams::new().length(50)),
            ColumnDefinition::new("popularity", ColumnType::Integer),
        ],
    );
    manager
}
