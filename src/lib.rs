//! Reversible schema migrations.
//!
//! Migrations are ordered lists of [`Operation`]s held by a
//! [`MigrationManager`]. Every operation can be undone: most carry their own
//! inverse, while dropped tables and columns are rebuilt by replaying the
//! app's earlier migrations.
//!
//! # Example
//! ```no_run
//! use retrace::prelude::*;
//!
//! # async fn example() -> retrace::Result<()> {
//! let db = Database::connect("sqlite::memory:").await?;
//! let migrator = Migrator::new(db, vec![AppConfig::new("music", "music/migrations")]);
//!
//! forwards(&migrator, "music", false).await?;
//! let outcome = BackwardsMigrationManager::new("music")
//!     .target(MigrationTarget::All)
//!     .auto_agree(true)
//!     .run(&migrator)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod apps;
pub mod commands;
pub mod config;
pub mod confirm;
pub mod db;
pub mod dialect;
pub mod error;
pub mod ledger;
pub mod loader;
pub mod lookup;
pub mod manager;
pub mod operation;
pub mod schema;
pub mod snapshot;

pub use error::{MigrateError, Result};
pub use manager::MigrationManager;
pub use operation::Operation;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::apps::AppConfig;
    pub use crate::commands::{
        BackwardsMigrationManager, BackwardsOutcome, ForwardsMigrationManager, ForwardsOutcome,
        MigrationStatus, MigrationTarget, Migrator, backwards, check, forwards,
    };
    pub use crate::config::Config;
    pub use crate::confirm::{AutoConfirm, Confirm, Decline};
    pub use crate::db::Database;
    pub use crate::dialect::Dialect;
    pub use crate::error::{MigrateError, Result};
    pub use crate::ledger::{MigrationLedger, SqlLedger};
    pub use crate::loader::{
        ExecutionOutcome, FileSource, MigrationModule, MigrationSource, Registry,
    };
    pub use crate::lookup::{ManagerLookup, MigrationLog, ModuleLookup};
    pub use crate::manager::{Direction, MigrationManager};
    pub use crate::operation::{Operation, RawAction};
    pub use crate::schema::{ColumnDefinition, ColumnParams, ColumnType, DefaultValue};
}
