//! Migration manager: the ordered operations of one migration.
//!
//! ```no_run
//! use retrace::prelude::*;
//!
//! # async fn example(db: &Database) -> retrace::Result<()> {
//! let mut manager = MigrationManager::new("20240105120000", "music");
//! manager.add_table(
//!     "Band",
//!     "band",
//!     vec![ColumnDefinition::new("name", ColumnType::Varchar)],
//! );
//! manager.add_column("band", "popularity", ColumnType::Integer, ColumnParams::new());
//! manager.run(db).await?;
//! # Ok(())
//! # }
//! ```
//!
//! A forward run applies operations in insertion order, a backward run
//! applies their inverses in reverse order. Either run stops at the first
//! failing operation.

use sqlx::AnyConnection;

use crate::db::Database;
use crate::dialect::{Dialect, Rename};
use crate::error::{MigrateError, Result};
use crate::lookup::ManagerLookup;
use crate::operation::{Operation, RawAction, RawOperation};
use crate::schema::{ColumnDefinition, ColumnParams, ColumnType};
use crate::snapshot::SchemaSnapshot;

/// Direction of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// One step of a planned run.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub index: usize,
    pub kind: &'static str,
    pub statements: Vec<String>,
    /// The step runs a callback whose effect cannot be shown as SQL.
    pub callback: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MigrationManager {
    pub migration_id: String,
    pub app_name: String,
    pub description: String,
    operations: Vec<Operation>,
}

impl MigrationManager {
    pub fn new(migration_id: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            migration_id: migration_id.into(),
            app_name: app_name.into(),
            description: String::new(),
            operations: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn push(&mut self, op: Operation) -> &mut Self {
        self.operations.push(op);
        self
    }

    pub fn add_table(
        &mut self,
        class_name: impl Into<String>,
        table_name: impl Into<String>,
        columns: Vec<ColumnDefinition>,
    ) -> &mut Self {
        self.push(Operation::AddTable {
            class_name: class_name.into(),
            table_name: table_name.into(),
            columns,
        })
    }

    pub fn drop_table(
        &mut self,
        class_name: impl Into<String>,
        table_name: impl Into<String>,
    ) -> &mut Self {
        self.push(Operation::DropTable {
            class_name: class_name.into(),
            table_name: table_name.into(),
        })
    }

    pub fn rename_table(
        &mut self,
        old_class_name: impl Into<String>,
        old_table_name: impl Into<String>,
        new_class_name: impl Into<String>,
        new_table_name: impl Into<String>,
    ) -> &mut Self {
        self.push(Operation::RenameTable {
            old_class_name: old_class_name.into(),
            old_table_name: old_table_name.into(),
            new_class_name: new_class_name.into(),
            new_table_name: new_table_name.into(),
        })
    }

    pub fn add_column(
        &mut self,
        table: impl Into<String>,
        column_name: impl Into<String>,
        column_type: ColumnType,
        params: ColumnParams,
    ) -> &mut Self {
        self.push(Operation::AddColumn {
            table: table.into(),
            column_name: column_name.into(),
            column_type,
            params,
        })
    }

    pub fn drop_column(
        &mut self,
        table: impl Into<String>,
        column_name: impl Into<String>,
    ) -> &mut Self {
        self.push(Operation::DropColumn {
            table: table.into(),
            column_name: column_name.into(),
        })
    }

    pub fn rename_column(
        &mut self,
        table: impl Into<String>,
        old_name: impl Into<String>,
        new_name: impl Into<String>,
    ) -> &mut Self {
        self.push(Operation::RenameColumn {
            table: table.into(),
            old_name: old_name.into(),
            new_name: new_name.into(),
        })
    }

    pub fn alter_column(
        &mut self,
        table: impl Into<String>,
        column_name: impl Into<String>,
        params: ColumnParams,
        old_params: ColumnParams,
    ) -> &mut Self {
        self.push(Operation::AlterColumn {
            table: table.into(),
            column_name: column_name.into(),
            params,
            old_params,
        })
    }

    /// Raw action run forwards only. Reversing it does nothing.
    pub fn add_raw(&mut self, action: RawAction) -> &mut Self {
        self.push(Operation::Raw(RawOperation {
            forward: Some(action),
            backward: None,
        }))
    }

    /// Raw action run backwards only.
    pub fn add_raw_backwards(&mut self, action: RawAction) -> &mut Self {
        self.push(Operation::Raw(RawOperation {
            forward: None,
            backward: Some(action),
        }))
    }

    /// Raw SQL with an optional inverse.
    pub fn add_raw_sql(
        &mut self,
        forward: impl Into<String>,
        backward: Option<String>,
    ) -> &mut Self {
        self.push(Operation::Raw(RawOperation {
            forward: Some(RawAction::sql(forward)),
            backward: backward.map(RawAction::Sql),
        }))
    }

    /// Apply every operation forwards inside one transaction.
    pub async fn run(&self, db: &Database) -> Result<()> {
        let mut tx = db.begin().await?;
        self.run_on(&mut tx, db.dialect()).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Apply every operation backwards inside one transaction.
    pub async fn run_backward(&self, db: &Database, lookup: &dyn ManagerLookup) -> Result<()> {
        let mut tx = db.begin().await?;
        self.run_backward_on(&mut tx, db.dialect(), lookup).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Forward run on a connection the caller owns (usually an open
    /// transaction).
    pub async fn run_on(&self, conn: &mut AnyConnection, dialect: Dialect) -> Result<()> {
        tracing::info!(
            app = %self.app_name,
            migration = %self.migration_id,
            operations = self.operations.len(),
            "running forwards"
        );
        for (index, op) in self.operations.iter().enumerate() {
            self.forward_one(conn, dialect, op)
                .await
                .map_err(|e| self.at(index, op, e))?;
        }
        Ok(())
    }

    /// Backward run on a connection the caller owns.
    ///
    /// Historical state for drops is resolved before anything executes, so a
    /// missing definition fails the run without side effects.
    pub async fn run_backward_on(
        &self,
        conn: &mut AnyConnection,
        dialect: Dialect,
        lookup: &dyn ManagerLookup,
    ) -> Result<()> {
        tracing::info!(
            app = %self.app_name,
            migration = %self.migration_id,
            operations = self.operations.len(),
            "running backwards"
        );
        let plan = self.backward_statements(dialect, lookup)?;

        for (index, statements) in plan.into_iter().enumerate().rev() {
            let op = &self.operations[index];
            self.backward_one(conn, dialect, op, &statements)
                .await
                .map_err(|e| self.at(index, op, e))?;
        }
        Ok(())
    }

    /// SQL a run would execute, in execution order.
    ///
    /// Index renames that follow a table or column rename depend on the live
    /// catalog and are not listed.
    pub fn plan(
        &self,
        dialect: Dialect,
        direction: Direction,
        lookup: &dyn ManagerLookup,
    ) -> Result<Vec<PlannedStep>> {
        let statements = match direction {
            Direction::Forward => self
                .operations
                .iter()
                .enumerate()
                .map(|(index, op)| {
                    op.forward_statements(dialect)
                        .map_err(|e| self.at(index, op, e))
                })
                .collect::<Result<Vec<_>>>()?,
            Direction::Backward => self.backward_statements(dialect, lookup)?,
        };

        let mut steps: Vec<PlannedStep> = statements
            .into_iter()
            .enumerate()
            .map(|(index, statements)| {
                let op = &self.operations[index];
                PlannedStep {
                    index,
                    kind: op.kind(),
                    statements,
                    callback: is_callback(op, direction),
                }
            })
            .collect();
        if direction == Direction::Backward {
            steps.reverse();
        }
        Ok(steps)
    }

    /// Backward statements per operation, indexed like `operations`.
    fn backward_statements(
        &self,
        dialect: Dialect,
        lookup: &dyn ManagerLookup,
    ) -> Result<Vec<Vec<String>>> {
        let mut history = if self.operations.iter().any(Operation::needs_history) {
            let earlier = lookup.resolve(&self.app_name, &self.migration_id, -1)?;
            Some(SchemaSnapshot::replay(&earlier))
        } else {
            None
        };

        let mut plan = Vec::with_capacity(self.operations.len());
        for (index, op) in self.operations.iter().enumerate() {
            let statements = match op.inverse_statements(dialect) {
                Ok(Some(statements)) => statements,
                Ok(None) => self
                    .recover(dialect, op, history.as_ref())
                    .map_err(|e| self.at(index, op, e))?,
                Err(e) => return Err(self.at(index, op, e)),
            };
            plan.push(statements);
            // State just before the next operation.
            if let Some(snapshot) = history.as_mut() {
                snapshot.apply(op);
            }
        }
        Ok(plan)
    }

    /// Rebuild the definition a drop removed.
    fn recover(
        &self,
        dialect: Dialect,
        op: &Operation,
        history: Option<&SchemaSnapshot>,
    ) -> Result<Vec<String>> {
        match op {
            Operation::DropTable { table_name, .. } => {
                let table = history
                    .and_then(|h| h.table(table_name))
                    .ok_or_else(|| self.missing(format!("table '{}'", table_name)))?;
                Ok(dialect.create_table(table_name, &table.columns))
            }
            Operation::DropColumn { table, column_name } => {
                let column = history
                    .and_then(|h| h.column(table, column_name))
                    .ok_or_else(|| self.missing(format!("column '{}.{}'", table, column_name)))?;
                Ok(dialect.add_column(table, column))
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn forward_one(
        &self,
        conn: &mut AnyConnection,
        dialect: Dialect,
        op: &Operation,
    ) -> Result<()> {
        match op {
            Operation::Raw(raw) => match &raw.forward {
                Some(action) => run_action(conn, action).await,
                None => Ok(()),
            },
            other => {
                execute_all(conn, &other.forward_statements(dialect)?).await?;
                rename_artifacts(conn, dialect, other.rename(Direction::Forward)).await
            }
        }
    }

    async fn backward_one(
        &self,
        conn: &mut AnyConnection,
        dialect: Dialect,
        op: &Operation,
        statements: &[String],
    ) -> Result<()> {
        match op {
            Operation::Raw(raw) => match &raw.backward {
                Some(action) => run_action(conn, action).await,
                None => {
                    tracing::debug!(
                        migration = %self.migration_id,
                        "raw operation has no backward action"
                    );
                    Ok(())
                }
            },
            other => {
                execute_all(conn, statements).await?;
                rename_artifacts(conn, dialect, other.rename(Direction::Backward)).await
            }
        }
    }

    fn at(&self, index: usize, op: &Operation, source: MigrateError) -> MigrateError {
        MigrateError::Operation {
            migration_id: self.migration_id.clone(),
            index,
            kind: op.kind(),
            source: Box::new(source),
        }
    }

    fn missing(&self, entity: String) -> MigrateError {
        MigrateError::LookupFailure {
            app: self.app_name.clone(),
            migration_id: self.migration_id.clone(),
            entity,
        }
    }
}

fn is_callback(op: &Operation, direction: Direction) -> bool {
    match op {
        Operation::Raw(raw) => {
            let side = match direction {
                Direction::Forward => &raw.forward,
                Direction::Backward => &raw.backward,
            };
            matches!(side, Some(RawAction::Callback(_)))
        }
        _ => false,
    }
}

/// Index and constraint names embed their table and column names. Bring the
/// ones on a renamed table in line with the new name.
async fn rename_artifacts(
    conn: &mut AnyConnection,
    dialect: Dialect,
    rename: Option<Rename<'_>>,
) -> Result<()> {
    let Some(rename) = rename else {
        return Ok(());
    };
    let existing = sqlx::query_scalar::<_, String>(&dialect.index_names_sql())
        .bind(rename.table())
        .fetch_all(&mut *conn)
        .await?;
    execute_all(conn, &dialect.rename_artifacts(rename, &existing)).await
}

async fn execute_all(conn: &mut AnyConnection, statements: &[String]) -> Result<()> {
    for sql in statements {
        tracing::debug!(%sql, "execute");
        sqlx::Executor::execute(&mut *conn, sql.as_str()).await?;
    }
    Ok(())
}

async fn run_action(conn: &mut AnyConnection, action: &RawAction) -> Result<()> {
    match action {
        RawAction::Sql(sql) => execute_all(conn, std::slice::from_ref(sql)).await,
        RawAction::Callback(callback) => callback.call(conn).await.map_err(MigrateError::Raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::MigrationLog;

    #[test]
    fn test_backward_plan_reverses_order() {
        let mut manager = MigrationManager::new("1", "music");
        manager
            .add_table("Band", "band", vec![ColumnDefinition::new("name", ColumnType::Varchar)])
            .rename_column("band", "name", "title");

        let steps = manager
            .plan(Dialect::Sqlite, Direction::Backward, &MigrationLog::new())
            .unwrap();
        let kinds: Vec<_> = steps.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec!["rename_column", "add_table"]);
        assert_eq!(steps[1].statements, vec![r#"DROP TABLE "band""#]);
    }

    #[test]
    fn test_drop_in_same_migration_uses_earlier_operations() {
        let mut manager = MigrationManager::new("1", "music");
        manager
            .add_table("Band", "band", vec![ColumnDefinition::new("name", ColumnType::Text)])
            .drop_table("Band", "band");

        let steps = manager
            .plan(Dialect::Sqlite, Direction::Backward, &MigrationLog::new())
            .unwrap();
        assert_eq!(steps[0].kind, "drop_table");
        assert!(steps[0].statements[0].starts_with(r#"CREATE TABLE "band""#));
    }

    #[test]
    fn test_missing_history_is_lookup_failure() {
        let mut manager = MigrationManager::new("2", "music");
        manager.drop_column("band", "popularity");

        let err = manager
            .plan(Dialect::Postgres, Direction::Backward, &MigrationLog::new())
            .unwrap_err();
        match err {
            MigrateError::Operation { index, kind, source, .. } => {
                assert_eq!(index, 0);
                assert_eq!(kind, "drop_column");
                assert!(matches!(*source, MigrateError::LookupFailure { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_callback_steps_are_flagged() {
        let mut manager = MigrationManager::new("1", "music");
        manager.add_raw(RawAction::sync(|| Ok(())));

        let steps = manager
            .plan(Dialect::Postgres, Direction::Forward, &MigrationLog::new())
            .unwrap();
        assert!(steps[0].callback);
        assert!(steps[0].statements.is_empty());
    }
}
