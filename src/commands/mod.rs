//! Migration commands.
//!
//! Submodules:
//! - `backwards`: undo migrations that ran
//! - `forwards`: apply pending migrations
//! - `check`: ran/pending status
//!
//! Every command works through a [`Migrator`], which bundles the database,
//! the configured apps and the pluggable collaborators.

mod backwards;
mod check;
mod forwards;

pub use backwards::{BackwardsMigrationManager, BackwardsOutcome, backwards};
pub use check::{MigrationStatus, check};
pub use forwards::{ForwardsMigrationManager, ForwardsOutcome, forwards};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::apps::{self, AppConfig};
use crate::config::Config;
use crate::confirm::{AutoConfirm, Confirm};
use crate::db::Database;
use crate::error::{MigrateError, Result};
use crate::ledger::{MigrationLedger, SqlLedger};
use crate::loader::{FileSource, MigrationModule, MigrationSource};

/// App name that selects every configured app.
pub const ALL_APPS: &str = "all";

/// Which migrations a backward run undoes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MigrationTarget {
    /// Everything that ran.
    All,
    /// Only the most recent migration.
    #[default]
    Latest,
    /// This migration and everything after it.
    Id(String),
}

impl FromStr for MigrationTarget {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "all" => MigrationTarget::All,
            "1" => MigrationTarget::Latest,
            id => MigrationTarget::Id(id.to_string()),
        })
    }
}

impl fmt::Display for MigrationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationTarget::All => f.write_str("all"),
            MigrationTarget::Latest => f.write_str("1"),
            MigrationTarget::Id(id) => f.write_str(id),
        }
    }
}

/// Context shared by the commands.
pub struct Migrator {
    db: Database,
    apps: Vec<AppConfig>,
    source: Arc<dyn MigrationSource>,
    ledger: Arc<dyn MigrationLedger>,
    confirm: Arc<dyn Confirm>,
}

impl Migrator {
    /// File-backed migrations, the default ledger table and no prompting.
    pub fn new(db: Database, apps: Vec<AppConfig>) -> Self {
        let ledger = SqlLedger::new(db.dialect());
        Self {
            db,
            apps,
            source: Arc::new(FileSource),
            ledger: Arc::new(ledger),
            confirm: Arc::new(AutoConfirm),
        }
    }

    pub fn from_config(db: Database, config: &Config) -> Self {
        let ledger = SqlLedger::with_table(config.ledger_table.clone(), db.dialect());
        Self::new(db, config.apps.clone()).with_ledger(ledger)
    }

    pub fn with_source(mut self, source: impl MigrationSource + 'static) -> Self {
        self.source = Arc::new(source);
        self
    }

    pub fn with_ledger(mut self, ledger: impl MigrationLedger + 'static) -> Self {
        self.ledger = Arc::new(ledger);
        self
    }

    pub fn with_confirm(mut self, confirm: impl Confirm + 'static) -> Self {
        self.confirm = Arc::new(confirm);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn apps(&self) -> &[AppConfig] {
        &self.apps
    }

    pub fn app(&self, name: &str) -> Result<&AppConfig> {
        self.apps
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| MigrateError::UnknownApp(name.to_string()))
    }

    pub fn sorted_app_names(&self) -> Result<Vec<String>> {
        apps::sorted_app_names(&self.apps)
    }

    pub(crate) fn ledger(&self) -> &dyn MigrationLedger {
        self.ledger.as_ref()
    }

    pub(crate) fn confirm(&self, prompt: &str) -> bool {
        self.confirm.confirm(prompt)
    }

    pub(crate) fn modules(&self, app: &AppConfig) -> Result<BTreeMap<String, MigrationModule>> {
        self.source.modules(app)
    }

    /// Ids that ran for `app_name`, oldest first. Creates the ledger table
    /// on first use.
    pub async fn ran_ids(&self, app_name: &str) -> Result<Vec<String>> {
        let mut conn = self.db.pool().acquire().await?;
        self.ledger.ensure_table(&mut conn).await?;
        self.ledger.get_ids_for_app(&mut conn, app_name).await
    }
}

impl fmt::Debug for Migrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("dialect", &self.db.dialect())
            .field("apps", &self.apps)
            .finish_non_exhaustive()
    }
}

/// Error for a ran migration that no source defines.
pub(crate) fn missing_module(app: &AppConfig, migration_id: &str) -> MigrateError {
    MigrateError::Load {
        path: app.migrations_folder.clone(),
        message: format!(
            "migration {} is recorded as ran for app '{}' but no migration defines it",
            migration_id, app.name
        ),
    }
}
