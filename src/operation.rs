//! Operation model.
//!
//! An [`Operation`] is one recorded schema or data change. Most variants carry
//! everything needed to invert themselves. `DropTable` and `DropColumn` do
//! not: their backward form is rebuilt from earlier migrations by the
//! manager (see [`crate::snapshot`]).

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx::AnyConnection;

use crate::dialect::{Dialect, Rename};
use crate::error::Result;
use crate::manager::Direction;
use crate::schema::{ColumnDefinition, ColumnParams, ColumnType};

/// Future returned by a raw callback.
pub type ActionFuture<'c> = BoxFuture<'c, anyhow::Result<()>>;

/// A user-supplied action run as part of a migration.
///
/// The action is handed the connection the migration runs on, so anything it
/// does commits or rolls back together with the rest of the migration.
pub trait RawCallback: Send + Sync {
    fn call<'c>(&'c self, conn: &'c mut AnyConnection) -> ActionFuture<'c>;
}

impl<F> RawCallback for F
where
    F: for<'c> Fn(&'c mut AnyConnection) -> ActionFuture<'c> + Send + Sync,
{
    fn call<'c>(&'c self, conn: &'c mut AnyConnection) -> ActionFuture<'c> {
        self(conn)
    }
}

struct SyncCallback<F>(F);

impl<F> RawCallback for SyncCallback<F>
where
    F: Fn() -> anyhow::Result<()> + Send + Sync,
{
    fn call<'c>(&'c self, _conn: &'c mut AnyConnection) -> ActionFuture<'c> {
        let result = (self.0)();
        Box::pin(async move { result })
    }
}

struct AsyncCallback<F>(F);

impl<F, Fut> RawCallback for AsyncCallback<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn call<'c>(&'c self, _conn: &'c mut AnyConnection) -> ActionFuture<'c> {
        Box::pin((self.0)())
    }
}

/// One side of a raw operation.
#[derive(Clone)]
pub enum RawAction {
    /// SQL executed on the migration's connection.
    Sql(String),
    /// Arbitrary code.
    Callback(Arc<dyn RawCallback>),
}

impl RawAction {
    pub fn sql(sql: impl Into<String>) -> Self {
        RawAction::Sql(sql.into())
    }

    /// Action that receives the migration's connection.
    pub fn with_connection<F>(f: F) -> Self
    where
        F: for<'c> Fn(&'c mut AnyConnection) -> ActionFuture<'c> + Send + Sync + 'static,
    {
        RawAction::Callback(Arc::new(f))
    }

    /// Zero-argument synchronous action.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        RawAction::Callback(Arc::new(SyncCallback(f)))
    }

    /// Zero-argument asynchronous action.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        RawAction::Callback(Arc::new(AsyncCallback(f)))
    }
}

impl fmt::Debug for RawAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawAction::Sql(sql) => f.debug_tuple("Sql").field(sql).finish(),
            RawAction::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Forward/backward pair of raw actions. Either side may be absent; an absent
/// side does nothing.
#[derive(Debug, Clone, Default)]
pub struct RawOperation {
    pub forward: Option<RawAction>,
    pub backward: Option<RawAction>,
}

/// A single schema or data change.
#[derive(Debug, Clone)]
pub enum Operation {
    RenameColumn {
        table: String,
        old_name: String,
        new_name: String,
    },
    AddTable {
        class_name: String,
        table_name: String,
        columns: Vec<ColumnDefinition>,
    },
    DropTable {
        class_name: String,
        table_name: String,
    },
    AddColumn {
        table: String,
        column_name: String,
        column_type: ColumnType,
        params: ColumnParams,
    },
    DropColumn {
        table: String,
        column_name: String,
    },
    RenameTable {
        old_class_name: String,
        old_table_name: String,
        new_class_name: String,
        new_table_name: String,
    },
    AlterColumn {
        table: String,
        column_name: String,
        params: ColumnParams,
        old_params: ColumnParams,
    },
    Raw(RawOperation),
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::RenameColumn { .. } => "rename_column",
            Operation::AddTable { .. } => "add_table",
            Operation::DropTable { .. } => "drop_table",
            Operation::AddColumn { .. } => "add_column",
            Operation::DropColumn { .. } => "drop_column",
            Operation::RenameTable { .. } => "rename_table",
            Operation::AlterColumn { .. } => "alter_column",
            Operation::Raw(_) => "raw",
        }
    }

    /// True when the backward form must be recovered from earlier migrations.
    pub fn needs_history(&self) -> bool {
        matches!(
            self,
            Operation::DropTable { .. } | Operation::DropColumn { .. }
        )
    }

    /// Column definition introduced by an `AddColumn`.
    pub fn added_column(&self) -> Option<ColumnDefinition> {
        match self {
            Operation::AddColumn {
                column_name,
                column_type,
                params,
                ..
            } => Some(
                ColumnDefinition::new(column_name.clone(), *column_type)
                    .with_params(params.clone()),
            ),
            _ => None,
        }
    }

    /// Table or column rename this operation performs when run in
    /// `direction`.
    pub fn rename(&self, direction: Direction) -> Option<Rename<'_>> {
        let backward = direction == Direction::Backward;
        match self {
            Operation::RenameTable {
                old_table_name,
                new_table_name,
                ..
            } => Some(if backward {
                Rename::Table {
                    from: new_table_name,
                    to: old_table_name,
                }
            } else {
                Rename::Table {
                    from: old_table_name,
                    to: new_table_name,
                }
            }),
            Operation::RenameColumn {
                table,
                old_name,
                new_name,
            } => Some(if backward {
                Rename::Column {
                    table,
                    from: new_name,
                    to: old_name,
                }
            } else {
                Rename::Column {
                    table,
                    from: old_name,
                    to: new_name,
                }
            }),
            _ => None,
        }
    }

    /// Statements for the forward effect. Raw callbacks have none.
    pub fn forward_statements(&self, dialect: Dialect) -> Result<Vec<String>> {
        Ok(match self {
            Operation::RenameColumn {
                table,
                old_name,
                new_name,
            } => dialect.rename_column(table, old_name, new_name),
            Operation::AddTable {
                table_name,
                columns,
                ..
            } => dialect.create_table(table_name, columns),
            Operation::DropTable { table_name, .. } => dialect.drop_table(table_name),
            Operation::AddColumn { table, .. } => match self.added_column() {
                Some(col) => dialect.add_column(table, &col),
                None => Vec::new(),
            },
            Operation::DropColumn { table, column_name } => dialect.drop_column(table, column_name),
            Operation::RenameTable {
                old_table_name,
                new_table_name,
                ..
            } => dialect.rename_table(old_table_name, new_table_name),
            Operation::AlterColumn {
                table,
                column_name,
                params,
                ..
            } => dialect.alter_column(table, column_name, params)?,
            Operation::Raw(raw) => raw_sql(raw.forward.as_ref()),
        })
    }

    /// Statements for the backward effect of a self-invertible operation.
    ///
    /// Returns `None` for `DropTable` and `DropColumn`, which need the
    /// recovered definition instead.
    pub fn inverse_statements(&self, dialect: Dialect) -> Result<Option<Vec<String>>> {
        Ok(Some(match self {
            Operation::RenameColumn {
                table,
                old_name,
                new_name,
            } => dialect.rename_column(table, new_name, old_name),
            Operation::AddTable { table_name, .. } => dialect.drop_table(table_name),
            Operation::AddColumn {
                table, column_name, ..
            } => dialect.drop_column(table, column_name),
            Operation::RenameTable {
                old_table_name,
                new_table_name,
                ..
            } => dialect.rename_table(new_table_name, old_table_name),
            Operation::AlterColumn {
                table,
                column_name,
                old_params,
                ..
            } => dialect.alter_column(table, column_name, old_params)?,
            Operation::Raw(raw) => raw_sql(raw.backward.as_ref()),
            Operation::DropTable { .. } | Operation::DropColumn { .. } => return Ok(None),
        }))
    }
}

fn raw_sql(action: Option<&RawAction>) -> Vec<String> {
    match action {
        Some(RawAction::Sql(sql)) => vec![sql.clone()],
        _ => Vec::new(),
    }
}
