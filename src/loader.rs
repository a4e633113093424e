//! Migration discovery.
//!
//! A [`MigrationSource`] turns an app's configuration into its migration
//! modules, keyed by id. Two sources exist:
//!
//! - [`FileSource`] reads `*.toml` migration files from the app's folder.
//! - [`Registry`] holds modules registered in code.
//!
//! A migration file looks like:
//!
//! ```toml
//! description = "Add band table"
//!
//! [[operations]]
//! kind = "add_table"
//! class_name = "Band"
//! table_name = "band"
//! columns = [{ name = "name", type = "varchar", length = 100 }]
//!
//! [[operations]]
//! kind = "raw"
//! forward = "INSERT INTO band (name) VALUES ('Pythonistas')"
//! backward = "DELETE FROM band WHERE name = 'Pythonistas'"
//! ```
//!
//! The id is the `id` key when present, otherwise the file name up to the
//! first `_` (`20240105120000_add_band.toml` has id `20240105120000`).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::apps::AppConfig;
use crate::error::{MigrateError, Result};
use crate::manager::MigrationManager;
use crate::operation::{Operation, RawAction, RawOperation};
use crate::schema::{ColumnDefinition, ColumnParams, ColumnType};

/// What running a module's entry point yields.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The module did its work directly; there is nothing to reverse.
    Unit,
    ProducesManager(MigrationManager),
}

type EntryPoint = Arc<dyn Fn() -> Result<ExecutionOutcome> + Send + Sync>;

/// One loadable migration.
#[derive(Clone)]
pub struct MigrationModule {
    pub migration_id: String,
    pub description: String,
    /// File the module was read from, if any.
    pub path: Option<PathBuf>,
    entry: EntryPoint,
}

impl MigrationModule {
    pub fn new<F>(migration_id: impl Into<String>, entry: F) -> Self
    where
        F: Fn() -> Result<ExecutionOutcome> + Send + Sync + 'static,
    {
        Self {
            migration_id: migration_id.into(),
            description: String::new(),
            path: None,
            entry: Arc::new(entry),
        }
    }

    /// Module whose entry point yields a copy of `manager`.
    pub fn from_manager(manager: MigrationManager) -> Self {
        let id = manager.migration_id.clone();
        let description = manager.description.clone();
        Self::new(id, move || Ok(ExecutionOutcome::ProducesManager(manager.clone())))
            .with_description(description)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Run the entry point.
    pub fn forwards(&self) -> Result<ExecutionOutcome> {
        (self.entry)()
    }
}

impl fmt::Debug for MigrationModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationModule")
            .field("migration_id", &self.migration_id)
            .field("description", &self.description)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

pub trait MigrationSource: Send + Sync {
    fn modules(&self, app: &AppConfig) -> Result<BTreeMap<String, MigrationModule>>;
}

// ============================================================================
// File-backed source
// ============================================================================

/// On-disk form of a migration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub operations: Vec<OperationDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationDto {
    AddTable {
        class_name: String,
        table_name: String,
        #[serde(default)]
        columns: Vec<ColumnDefinition>,
    },
    DropTable {
        class_name: String,
        table_name: String,
    },
    RenameTable {
        old_class_name: String,
        old_table_name: String,
        new_class_name: String,
        new_table_name: String,
    },
    AddColumn {
        table: String,
        column_name: String,
        #[serde(rename = "type")]
        column_type: ColumnType,
        #[serde(default)]
        params: ColumnParams,
    },
    DropColumn {
        table: String,
        column_name: String,
    },
    RenameColumn {
        table: String,
        old_name: String,
        new_name: String,
    },
    AlterColumn {
        table: String,
        column_name: String,
        #[serde(default)]
        params: ColumnParams,
        #[serde(default)]
        old_params: ColumnParams,
    },
    Raw {
        #[serde(default)]
        forward: Option<String>,
        #[serde(default)]
        backward: Option<String>,
    },
}

impl From<OperationDto> for Operation {
    fn from(dto: OperationDto) -> Self {
        match dto {
            OperationDto::AddTable {
                class_name,
                table_name,
                columns,
            } => Operation::AddTable {
                class_name,
                table_name,
                columns,
            },
            OperationDto::DropTable {
                class_name,
                table_name,
            } => Operation::DropTable {
                class_name,
                table_name,
            },
            OperationDto::RenameTable {
                old_class_name,
                old_table_name,
                new_class_name,
                new_table_name,
            } => Operation::RenameTable {
                old_class_name,
                old_table_name,
                new_class_name,
                new_table_name,
            },
            OperationDto::AddColumn {
                table,
                column_name,
                column_type,
                params,
            } => Operation::AddColumn {
                table,
                column_name,
                column_type,
                params,
            },
            OperationDto::DropColumn { table, column_name } => {
                Operation::DropColumn { table, column_name }
            }
            OperationDto::RenameColumn {
                table,
                old_name,
                new_name,
            } => Operation::RenameColumn {
                table,
                old_name,
                new_name,
            },
            OperationDto::AlterColumn {
                table,
                column_name,
                params,
                old_params,
            } => Operation::AlterColumn {
                table,
                column_name,
                params,
                old_params,
            },
            OperationDto::Raw { forward, backward } => Operation::Raw(RawOperation {
                forward: forward.map(RawAction::Sql),
                backward: backward.map(RawAction::Sql),
            }),
        }
    }
}

impl MigrationFile {
    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn into_manager(self, migration_id: &str, app_name: &str) -> MigrationManager {
        let mut manager =
            MigrationManager::new(migration_id, app_name).description(self.description);
        for op in self.operations {
            manager.push(op.into());
        }
        manager
    }
}

/// Reads `*.toml` files from each app's migrations folder.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSource;

impl FileSource {
    fn load_file(path: &Path, app_name: &str) -> Result<MigrationModule> {
        let load_err = |message: String| MigrateError::Load {
            path: path.to_path_buf(),
            message,
        };

        let content = std::fs::read_to_string(path)?;
        let file = MigrationFile::parse(&content).map_err(|e| load_err(e.to_string()))?;

        let id = match &file.id {
            Some(id) => id.clone(),
            None => id_from_path(path)
                .ok_or_else(|| load_err("cannot derive an id from the file name".into()))?,
        };

        let manager = file.into_manager(&id, app_name);
        Ok(MigrationModule::from_manager(manager).with_path(path))
    }
}

impl MigrationSource for FileSource {
    fn modules(&self, app: &AppConfig) -> Result<BTreeMap<String, MigrationModule>> {
        let mut modules = BTreeMap::new();
        let folder = &app.migrations_folder;
        if !folder.exists() {
            tracing::debug!(app = %app.name, folder = %folder.display(), "no migrations folder");
            return Ok(modules);
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(folder)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        for path in paths {
            let module = Self::load_file(&path, &app.name)?;
            if let Some(existing) = modules.get(&module.migration_id) {
                return Err(MigrateError::Load {
                    path,
                    message: format!(
                        "duplicate migration id {} (also in {})",
                        module.migration_id,
                        existing
                            .path
                            .as_deref()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default()
                    ),
                });
            }
            modules.insert(module.migration_id.clone(), module);
        }

        tracing::debug!(app = %app.name, count = modules.len(), "loaded migrations");
        Ok(modules)
    }
}

fn id_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let id = stem.split('_').next()?;
    (!id.is_empty()).then(|| id.to_string())
}

// ============================================================================
// In-code source
// ============================================================================

/// Modules registered programmatically, per app.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    apps: HashMap<String, BTreeMap<String, MigrationModule>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, app_name: impl Into<String>, module: MigrationModule) -> &mut Self {
        self.apps
            .entry(app_name.into())
            .or_default()
            .insert(module.migration_id.clone(), module);
        self
    }

    /// Register a manager under its own app name and id.
    pub fn register_manager(&mut self, manager: MigrationManager) -> &mut Self {
        let app = manager.app_name.clone();
        self.register(app, MigrationModule::from_manager(manager))
    }
}

impl MigrationSource for Registry {
    fn modules(&self, app: &AppConfig) -> Result<BTreeMap<String, MigrationModule>> {
        Ok(self.apps.get(&app.name).cloned().unwrap_or_default())
    }
}

// ============================================================================
// New migration files
// ============================================================================

const TEMPLATE: &str = r#"description = "{description}"

# Operations run top to bottom and are reversed bottom to top.
#
# [[operations]]
# kind = "add_table"
# class_name = "Band"
# table_name = "band"
# columns = [{ name = "name", type = "varchar", length = 100 }]
#
# [[operations]]
# kind = "raw"
# forward = "UPDATE band SET popularity = 0"
# backward = "UPDATE band SET popularity = NULL"
"#;

/// Write an empty, timestamped migration file for `app` and return its path.
pub fn new_migration_file(app: &AppConfig, name: &str) -> Result<PathBuf> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(MigrateError::Config(format!(
            "Invalid migration name '{}': use letters, digits and underscores",
            name
        )));
    }

    let timestamp = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
    std::fs::create_dir_all(&app.migrations_folder)?;

    let path = app
        .migrations_folder
        .join(format!("{}_{}.toml", timestamp, name));
    if path.exists() {
        return Err(MigrateError::Load {
            path,
            message: "file already exists".into(),
        });
    }

    let description = name.replace('_', " ");
    std::fs::write(&path, TEMPLATE.replace("{description}", &description))?;
    tracing::info!(app = %app.name, path = %path.display(), "created migration");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn app(folder: &Path) -> AppConfig {
        AppConfig::new("music", folder)
    }

    #[test]
    fn test_parse_migration_file() {
        let file = MigrationFile::parse(
            r#"
            description = "Band"

            [[operations]]
            kind = "add_table"
            class_name = "Band"
            table_name = "band"
            columns = [
                { name = "name", type = "varchar", length = 50 },
                { name = "label", type = "text", null = true },
            ]

            [[operations]]
            kind = "alter_column"
            table = "band"
            column_name = "name"
            params = { unique = true }
            old_params = { unique = false }

            [[operations]]
            kind = "raw"
            forward = "SELECT 1"
            "#,
        )
        .unwrap();

        let manager = file.into_manager("1", "music");
        assert_eq!(manager.description, "Band");
        let kinds: Vec<_> = manager.operations().iter().map(|o| o.kind()).collect();
        assert_eq!(kinds, vec!["add_table", "alter_column", "raw"]);
    }

    #[test]
    fn test_file_source_derives_ids() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("20240101000000_first.toml"),
            "description = \"a\"",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("custom.toml"),
            "id = \"20240102000000\"\ndescription = \"b\"",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let modules = FileSource.modules(&app(dir.path())).unwrap();
        let ids: Vec<_> = modules.keys().cloned().collect();
        assert_eq!(ids, vec!["20240101000000", "20240102000000"]);
        assert!(modules["20240101000000"].path.is_some());
    }

    #[test]
    fn test_file_source_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1_bad.toml"), "operations = 3").unwrap();

        let err = FileSource.modules(&app(dir.path())).unwrap_err();
        assert!(matches!(err, MigrateError::Load { .. }));
    }

    #[test]
    fn test_missing_folder_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let modules = FileSource.modules(&app(&dir.path().join("nope"))).unwrap();
        assert!(modules.is_empty());
    }

    #[test]
    fn test_new_migration_file_round_trips_through_source() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir.path().join("migrations"));
        let path = new_migration_file(&app, "add_band").unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("_add_band.toml"));

        let modules = FileSource.modules(&app).unwrap();
        assert_eq!(modules.len(), 1);
        match modules.values().next().unwrap().forwards().unwrap() {
            ExecutionOutcome::ProducesManager(m) => {
                assert_eq!(m.description, "add band");
                assert!(m.operations().is_empty());
            }
            ExecutionOutcome::Unit => panic!("expected a manager"),
        }

        assert!(new_migration_file(&app, "bad name").is_err());
    }

    #[test]
    fn test_registry_is_per_app() {
        let mut registry = Registry::new();
        registry.register_manager(MigrationManager::new("1", "music"));
        registry.register("shop", MigrationModule::new("1", || Ok(ExecutionOutcome::Unit)));

        let dir = tempfile::tempdir().unwrap();
        assert_eq!(registry.modules(&app(dir.path())).unwrap().len(), 1);
        assert!(registry
            .modules(&AppConfig::new("other", dir.path()))
            .unwrap()
            .is_empty());
    }
}
