//! Schema state reconstructed by replaying recorded operations.
//!
//! Dropping a table or a column loses its definition. Reversing the drop
//! needs it back, so the backward run replays every earlier migration of the
//! app into a [`SchemaSnapshot`] and reads the definition off that.
//!
//! Tables are keyed by table name. Operations on tables the log never
//! created (tables that pre-date the migrations) are still tracked at column
//! level, but such a table is never offered as a full table definition.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::manager::MigrationManager;
use crate::operation::Operation;
use crate::schema::ColumnDefinition;

/// One table as known from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    pub class_name: Option<String>,
    pub table_name: String,
    pub columns: Vec<ColumnDefinition>,
    /// Created by an `AddTable` in the log, so `columns` is the full set.
    pub complete: bool,
}

impl TableSnapshot {
    fn partial(table_name: &str) -> Self {
        Self {
            class_name: None,
            table_name: table_name.to_string(),
            columns: Vec::new(),
            complete: false,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn column_mut(&mut self, name: &str) -> Option<&mut ColumnDefinition> {
        self.columns.iter_mut().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, TableSnapshot>,
}

impl SchemaSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay managers in the order given.
    pub fn replay(managers: &[Arc<MigrationManager>]) -> Self {
        let mut snapshot = Self::new();
        for manager in managers {
            snapshot.apply_all(manager.operations());
        }
        snapshot
    }

    pub fn apply_all(&mut self, operations: &[Operation]) {
        for op in operations {
            self.apply(op);
        }
    }

    /// Apply one operation's forward effect.
    pub fn apply(&mut self, op: &Operation) {
        match op {
            Operation::AddTable {
                class_name,
                table_name,
                columns,
            } => {
                self.tables.insert(
                    table_name.clone(),
                    TableSnapshot {
                        class_name: Some(class_name.clone()),
                        table_name: table_name.clone(),
                        columns: columns.clone(),
                        complete: true,
                    },
                );
            }
            Operation::DropTable { table_name, .. } => {
                self.tables.remove(table_name);
            }
            Operation::RenameTable {
                old_table_name,
                new_class_name,
                new_table_name,
                ..
            } => {
                let mut table = self
                    .tables
                    .remove(old_table_name)
                    .unwrap_or_else(|| TableSnapshot::partial(old_table_name));
                table.table_name = new_table_name.clone();
                table.class_name = Some(new_class_name.clone());
                self.tables.insert(new_table_name.clone(), table);
            }
            Operation::AddColumn { table, .. } => {
                if let Some(column) = op.added_column() {
                    let entry = self
                        .tables
                        .entry(table.clone())
                        .or_insert_with(|| TableSnapshot::partial(table));
                    entry.columns.retain(|c| c.name != column.name);
                    entry.columns.push(column);
                }
            }
            Operation::DropColumn { table, column_name } => {
                if let Some(entry) = self.tables.get_mut(table) {
                    entry.columns.retain(|c| &c.name != column_name);
                }
            }
            Operation::RenameColumn {
                table,
                old_name,
                new_name,
            } => {
                if let Some(col) = self.tables.get_mut(table).and_then(|t| t.column_mut(old_name)) {
                    col.name = new_name.clone();
                }
            }
            Operation::AlterColumn {
                table,
                column_name,
                params,
                ..
            } => {
                if let Some(col) = self
                    .tables
                    .get_mut(table)
                    .and_then(|t| t.column_mut(column_name))
                {
                    col.params.merge(params);
                }
            }
            Operation::Raw(_) => {}
        }
    }

    /// Full definition of a table created within the log.
    pub fn table(&self, table_name: &str) -> Option<&TableSnapshot> {
        self.tables.get(table_name).filter(|t| t.complete)
    }

    /// Definition of a column, including columns added to pre-existing tables.
    pub fn column(&self, table_name: &str, column_name: &str) -> Option<&ColumnDefinition> {
        self.tables.get(table_name)?.column(column_name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}
