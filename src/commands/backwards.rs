//! Undoing migrations.
//!
//! Reversal is contiguous: the newest migration is undone first and a run
//! never skips over a migration that ran later than its target. Each
//! migration is reversed in its own transaction together with the removal
//! of its ledger entry, so a failure leaves that entry in place and stops
//! the run. Migrations undone before the failure stay undone.

use super::{ALL_APPS, MigrationTarget, Migrator, missing_module};
use crate::apps::AppConfig;
use crate::error::{MigrateError, Result};
use crate::loader::ExecutionOutcome;
use crate::lookup::{ManagerLookup, ModuleLookup};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackwardsOutcome {
    /// The ledger had no entries for the app. Not an error.
    NothingToReverse,
    /// Ids undone, in the order they were undone.
    Reversed(Vec<String>),
}

/// Backward run for a single app.
#[derive(Debug, Clone)]
pub struct BackwardsMigrationManager {
    pub app_name: String,
    pub target: MigrationTarget,
    pub auto_agree: bool,
    /// Delete each migration's file once it has been undone.
    pub clean: bool,
}

impl BackwardsMigrationManager {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            target: MigrationTarget::Latest,
            auto_agree: false,
            clean: false,
        }
    }

    pub fn target(mut self, target: MigrationTarget) -> Self {
        self.target = target;
        self
    }

    pub fn auto_agree(mut self, auto_agree: bool) -> Self {
        self.auto_agree = auto_agree;
        self
    }

    pub fn clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    pub async fn run(&self, migrator: &Migrator) -> Result<BackwardsOutcome> {
        let app = migrator.app(&self.app_name)?;

        let ran = migrator.ran_ids(&app.name).await?;
        if ran.is_empty() {
            tracing::info!(app = %app.name, "no migrations to reverse");
            return Ok(BackwardsOutcome::NothingToReverse);
        }

        let to_reverse = select(&ran, &self.target)?;

        let modules = migrator.modules(app)?;
        if let Some(id) = to_reverse.iter().find(|id| !modules.contains_key(*id)) {
            return Err(missing_module(app, id));
        }

        if !self.auto_agree {
            let prompt = format!(
                "About to undo the following migrations of '{}':\n{}\nContinue?",
                app.name,
                to_reverse.join("\n")
            );
            if !migrator.confirm(&prompt) {
                return Err(MigrateError::UserDeclined);
            }
        }

        let lookup = ModuleLookup::new(&app.name, &modules);
        let total = to_reverse.len();

        for (i, id) in to_reverse.iter().enumerate() {
            tracing::info!(app = %app.name, migration = %id, step = i + 1, total, "reversing");
            let Some(module) = modules.get(id) else {
                return Err(missing_module(app, id));
            };

            self.reverse_one(migrator, app, id, module.forwards()?, &lookup)
                .await?;

            if self.clean {
                if let Some(path) = &module.path {
                    std::fs::remove_file(path)?;
                    tracing::info!(path = %path.display(), "removed migration file");
                }
            }
        }

        Ok(BackwardsOutcome::Reversed(to_reverse))
    }

    async fn reverse_one(
        &self,
        migrator: &Migrator,
        app: &AppConfig,
        migration_id: &str,
        outcome: ExecutionOutcome,
        lookup: &dyn ManagerLookup,
    ) -> Result<()> {
        let db = migrator.database();
        let mut tx = db.begin().await?;

        match outcome {
            ExecutionOutcome::ProducesManager(mut manager) => {
                manager.app_name = app.name.clone();
                manager.migration_id = migration_id.to_string();
                manager.run_backward_on(&mut tx, db.dialect(), lookup).await?;
            }
            ExecutionOutcome::Unit => {
                tracing::warn!(
                    app = %app.name,
                    migration = migration_id,
                    "migration has no manager; only its ledger entry is removed"
                );
            }
        }

        migrator.ledger().remove(&mut tx, &app.name, migration_id).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Ids to undo, newest first.
fn select(ran: &[String], target: &MigrationTarget) -> Result<Vec<String>> {
    let start = match target {
        MigrationTarget::All => 0,
        MigrationTarget::Latest => ran.len().saturating_sub(1),
        MigrationTarget::Id(id) => ran.iter().position(|r| r == id).ok_or_else(|| {
            MigrateError::UnrecognizedIdentifier {
                requested: id.clone(),
                ran: ran.to_vec(),
            }
        })?,
    };
    Ok(ran[start..].iter().rev().cloned().collect())
}

/// Undo migrations for one app, or for every app when `app_name` is `"all"`.
///
/// In all-apps mode apps are undone in reverse dependency order, each one
/// completely, under a single confirmation. `target` and `clean` only apply
/// to a single app; batch runs never delete migration files.
pub async fn backwards(
    migrator: &Migrator,
    app_name: &str,
    target: MigrationTarget,
    auto_agree: bool,
    clean: bool,
) -> Result<Vec<(String, BackwardsOutcome)>> {
    if app_name != ALL_APPS {
        let outcome = BackwardsMigrationManager::new(app_name)
            .target(target)
            .auto_agree(auto_agree)
            .clean(clean)
            .run(migrator)
            .await?;
        return Ok(vec![(app_name.to_string(), outcome)]);
    }

    if clean {
        tracing::warn!("clean is ignored when undoing all apps");
    }

    let mut order = migrator.sorted_app_names()?;
    order.reverse();

    if !auto_agree {
        let prompt = format!(
            "About to undo all migrations for these apps, in this order:\n{}\nContinue?",
            order.join("\n")
        );
        if !migrator.confirm(&prompt) {
            return Err(MigrateError::UserDeclined);
        }
    }

    let mut outcomes = Vec::with_capacity(order.len());
    for app in order {
        let outcome = BackwardsMigrationManager::new(app.as_str())
            .target(MigrationTarget::All)
            .auto_agree(true)
            .run(migrator)
            .await?;
        outcomes.push((app, outcome));
    }
    Ok(outcomes)
}
