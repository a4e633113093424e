//! Resolving earlier migrations of an app.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use crate::error::Result;
use crate::loader::{ExecutionOutcome, MigrationModule};
use crate::manager::MigrationManager;

/// Source of the managers recorded for an app, in id order.
///
/// `resolve` returns every manager of `app_name` whose id is `<=
/// max_migration_id`, ascending. A negative `offset` drops that many entries
/// from the end; a positive one keeps only the first `offset` entries. Zero
/// returns the full range.
pub trait ManagerLookup: Send + Sync {
    fn resolve(
        &self,
        app_name: &str,
        max_migration_id: &str,
        offset: isize,
    ) -> Result<Vec<Arc<MigrationManager>>>;
}

/// Immutable arena of managers keyed by `(app, migration id)`.
///
/// Ids compare as strings, which orders the timestamp ids correctly.
#[derive(Debug, Default, Clone)]
pub struct MigrationLog {
    managers: BTreeMap<(String, String), Arc<MigrationManager>>,
}

impl MigrationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, manager: MigrationManager) -> Arc<MigrationManager> {
        let key = (manager.app_name.clone(), manager.migration_id.clone());
        let manager = Arc::new(manager);
        self.managers.insert(key, Arc::clone(&manager));
        manager
    }

    /// Build the log for `app_name` by running every module's entry point.
    /// Modules that produce no manager are skipped.
    pub fn from_modules<'a>(
        app_name: &str,
        modules: impl IntoIterator<Item = &'a MigrationModule>,
    ) -> Result<Self> {
        let mut log = Self::new();
        for module in modules {
            if let ExecutionOutcome::ProducesManager(mut manager) = module.forwards()? {
                // The module id is authoritative for ordering.
                manager.migration_id = module.migration_id.clone();
                manager.app_name = app_name.to_string();
                log.insert(manager);
            }
        }
        Ok(log)
    }

    pub fn get(&self, app_name: &str, migration_id: &str) -> Option<Arc<MigrationManager>> {
        self.managers
            .get(&(app_name.to_string(), migration_id.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

impl ManagerLookup for MigrationLog {
    fn resolve(
        &self,
        app_name: &str,
        max_migration_id: &str,
        offset: isize,
    ) -> Result<Vec<Arc<MigrationManager>>> {
        let start = (app_name.to_string(), String::new());
        let end = (app_name.to_string(), max_migration_id.to_string());
        let mut managers: Vec<_> = self
            .managers
            .range(start..=end)
            .map(|(_, m)| Arc::clone(m))
            .collect();

        let keep = if offset < 0 {
            managers.len().saturating_sub(offset.unsigned_abs())
        } else if offset > 0 {
            managers.len().min(offset.unsigned_abs())
        } else {
            managers.len()
        };
        managers.truncate(keep);
        Ok(managers)
    }
}

/// Lookup over an app's loaded modules.
///
/// Entry points run only when a lookup is made, and only for modules whose id
/// is within the requested range. A backward run without drops never calls
/// any of them.
#[derive(Debug, Clone, Copy)]
pub struct ModuleLookup<'a> {
    app_name: &'a str,
    modules: &'a BTreeMap<String, MigrationModule>,
}

impl<'a> ModuleLookup<'a> {
    pub fn new(app_name: &'a str, modules: &'a BTreeMap<String, MigrationModule>) -> Self {
        Self { app_name, modules }
    }
}

impl ManagerLookup for ModuleLookup<'_> {
    fn resolve(
        &self,
        app_name: &str,
        max_migration_id: &str,
        offset: isize,
    ) -> Result<Vec<Arc<MigrationManager>>> {
        if app_name != self.app_name {
            return Ok(Vec::new());
        }
        let in_range = self
            .modules
            .range::<str, _>((Bound::Unbounded, Bound::Included(max_migration_id)))
            .map(|(_, module)| module);
        MigrationLog::from_modules(app_name, in_range)?.resolve(app_name, max_migration_id, offset)
    }
}
