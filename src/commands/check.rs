//! Migration status.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{ALL_APPS, Migrator};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub app_name: String,
    pub migration_id: String,
    pub description: String,
    /// When the migration ran, if it did.
    pub ran_on: Option<String>,
    /// A migration file or registered module defines this id.
    pub defined: bool,
}

impl MigrationStatus {
    pub fn has_run(&self) -> bool {
        self.ran_on.is_some()
    }
}

/// Status of every known migration, per app in dependency order, ids
/// ascending. Ledger entries without a definition are included.
pub async fn check(migrator: &Migrator, app_name: Option<&str>) -> Result<Vec<MigrationStatus>> {
    let apps = match app_name {
        None | Some(ALL_APPS) => migrator.sorted_app_names()?,
        Some(name) => vec![migrator.app(name)?.name.clone()],
    };

    let mut conn = migrator.database().pool().acquire().await?;
    migrator.ledger().ensure_table(&mut conn).await?;

    let mut statuses = Vec::new();
    for name in apps {
        let app = migrator.app(&name)?;
        let modules = migrator.modules(app)?;
        let entries = migrator.ledger().entries_for_app(&mut conn, &app.name).await?;

        let mut rows: BTreeMap<String, MigrationStatus> = modules
            .values()
            .map(|m| {
                let status = MigrationStatus {
                    app_name: app.name.clone(),
                    migration_id: m.migration_id.clone(),
                    description: m.description.clone(),
                    ran_on: None,
                    defined: true,
                };
                (m.migration_id.clone(), status)
            })
            .collect();

        for entry in entries {
            rows.entry(entry.migration_id.clone())
                .or_insert_with(|| MigrationStatus {
                    app_name: app.name.clone(),
                    migration_id: entry.migration_id.clone(),
                    description: String::new(),
                    ran_on: None,
                    defined: false,
                })
                .ran_on = Some(entry.ran_on);
        }

        statuses.extend(rows.into_values());
    }
    Ok(statuses)
}
