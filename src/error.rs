//! Error types for migration runs.
//!
//! Orchestration failures (declined confirmation, unknown identifier, missing
//! historical state) get their own variants so callers can branch on cause.
//! Failures raised by an individual operation are wrapped once with the
//! position they happened at and otherwise passed through untouched.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Error type for migration operations.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// The requested target is not in the set of migrations which ran.
    #[error("Unrecognized migration name '{requested}' - must be one of {ran:?}")]
    UnrecognizedIdentifier { requested: String, ran: Vec<String> },

    /// No migration with this id is defined for the app.
    #[error("Unknown migration '{requested}' - defined migrations are {defined:?}")]
    UnknownMigration {
        requested: String,
        defined: Vec<String>,
    },

    /// The confirmation prompt was answered negatively.
    #[error("Not proceeding - confirmation declined")]
    UserDeclined,

    /// An operation inside a migration failed. Nothing after it ran.
    #[error("Migration {migration_id} failed at operation {index} ({kind}): {source}")]
    Operation {
        migration_id: String,
        index: usize,
        kind: &'static str,
        #[source]
        source: Box<MigrateError>,
    },

    /// A user-supplied raw action returned an error.
    #[error("Raw action failed: {0}")]
    Raw(#[source] anyhow::Error),

    /// Historical state for a dropped table or column could not be found.
    /// This means the migration log was edited by hand or is incomplete.
    #[error("No earlier migration in app '{app}' (before {migration_id}) defines {entity}")]
    LookupFailure {
        app: String,
        migration_id: String,
        entity: String,
    },

    /// No app with this name is configured.
    #[error("Unknown app '{0}'")]
    UnknownApp(String),

    /// App dependencies are unresolvable (cycle or missing app).
    #[error("Invalid app dependencies: {0}")]
    Dependency(String),

    /// The dialect cannot express the requested change.
    #[error("{dialect} does not support {what}")]
    Unsupported { dialect: &'static str, what: String },

    /// A migration file could not be parsed.
    #[error("Failed to load migration {path}: {message}")]
    Load { path: PathBuf, message: String },

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// True for failures that happened before any state was changed and that
    /// automation should treat as a refusal rather than a crash.
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            MigrateError::UserDeclined
                | MigrateError::UnrecognizedIdentifier { .. }
                | MigrateError::UnknownMigration { .. }
        )
    }

    /// Innermost cause, skipping the positional `Operation` wrapper.
    pub fn root(&self) -> &MigrateError {
        match self {
            MigrateError::Operation { source, .. } => source.root(),
            other => other,
        }
    }
}
