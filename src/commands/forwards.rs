//! Applying pending migrations.

use std::collections::HashSet;

use super::{ALL_APPS, Migrator};
use crate::apps::AppConfig;
use crate::error::{MigrateError, Result};
use crate::loader::{ExecutionOutcome, MigrationModule};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardsOutcome {
    NothingToApply,
    /// Ids applied, oldest first.
    Applied(Vec<String>),
}

/// Forward run for a single app.
#[derive(Debug, Clone, Default)]
pub struct ForwardsMigrationManager {
    pub app_name: String,
    /// Stop after this migration. Applies everything pending when unset.
    pub target: Option<String>,
    /// Record migrations as ran without executing them.
    pub fake: bool,
}

impl ForwardsMigrationManager {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    pub fn target(mut self, migration_id: impl Into<String>) -> Self {
        self.target = Some(migration_id.into());
        self
    }

    pub fn fake(mut self, fake: bool) -> Self {
        self.fake = fake;
        self
    }

    pub async fn run(&self, migrator: &Migrator) -> Result<ForwardsOutcome> {
        let app = migrator.app(&self.app_name)?;
        let modules = migrator.modules(app)?;

        if let Some(target) = &self.target {
            if !modules.contains_key(target) {
                return Err(MigrateError::UnknownMigration {
                    requested: target.clone(),
                    defined: modules.keys().cloned().collect(),
                });
            }
        }

        let ran: HashSet<String> = migrator.ran_ids(&app.name).await?.into_iter().collect();
        let pending: Vec<&MigrationModule> = modules
            .values()
            .filter(|m| !ran.contains(&m.migration_id))
            .filter(|m| {
                self.target
                    .as_ref()
                    .is_none_or(|target| m.migration_id.as_str() <= target.as_str())
            })
            .collect();

        if pending.is_empty() {
            tracing::info!(app = %app.name, "no migrations to apply");
            return Ok(ForwardsOutcome::NothingToApply);
        }

        let total = pending.len();
        let mut applied = Vec::with_capacity(total);
        for (i, module) in pending.into_iter().enumerate() {
            tracing::info!(
                app = %app.name,
                migration = %module.migration_id,
                step = i + 1,
                total,
                fake = self.fake,
                "applying"
            );
            self.apply_one(migrator, app, module).await?;
            applied.push(module.migration_id.clone());
        }
        Ok(ForwardsOutcome::Applied(applied))
    }

    async fn apply_one(
        &self,
        migrator: &Migrator,
        app: &AppConfig,
        module: &MigrationModule,
    ) -> Result<()> {
        let db = migrator.database();
        let outcome = if self.fake {
            ExecutionOutcome::Unit
        } else {
            module.forwards()?
        };

        let mut tx = db.begin().await?;
        if let ExecutionOutcome::ProducesManager(mut manager) = outcome {
            manager.app_name = app.name.clone();
            manager.migration_id = module.migration_id.clone();
            manager.run_on(&mut tx, db.dialect()).await?;
        }
        migrator
            .ledger()
            .record(&mut tx, &app.name, &module.migration_id)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Apply pending migrations for one app, or for every app in dependency
/// order when `app_name` is `"all"`.
pub async fn forwards(
    migrator: &Migrator,
    app_name: &str,
    fake: bool,
) -> Result<Vec<(String, ForwardsOutcome)>> {
    let apps = if app_name == ALL_APPS {
        migrator.sorted_app_names()?
    } else {
        vec![app_name.to_string()]
    };

    let mut outcomes = Vec::with_capacity(apps.len());
    for app in apps {
        let outcome = ForwardsMigrationManager::new(app.as_str())
            .fake(fake)
            .run(migrator)
            .await?;
        outcomes.push((app, outcome));
    }
    Ok(outcomes)
}
