//! DDL rendering for the supported stores.
//!
//! Every renderer returns the list of statements to execute in order. Most
//! operations are one statement; unique/indexed columns add index statements,
//! and SQLite drops a column's indexes before the column itself.
//!
//! Unique constraints and indexes are named `{table}_{column}_key` (Postgres)
//! or `{table}_{column}_unique` (SQLite) and `{table}_{column}_index`. Table
//! and column renames carry those names along, see [`Dialect::rename_artifacts`].

use crate::error::{MigrateError, Result};
use crate::schema::{ColumnDefinition, ColumnParams, ColumnType, DefaultValue};

const INDEX_SUFFIX: &str = "_index";

/// A table or column rename, as seen after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rename<'a> {
    Table {
        from: &'a str,
        to: &'a str,
    },
    Column {
        table: &'a str,
        from: &'a str,
        to: &'a str,
    },
}

impl Rename<'_> {
    /// Table name once the rename has run.
    pub fn table(&self) -> &str {
        match self {
            Rename::Table { to, .. } => to,
            Rename::Column { table, .. } => table,
        }
    }
}

/// SQL dialect of the target store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Pick the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(MigrateError::Config(format!(
                "Unsupported database scheme: {}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "PostgreSQL",
            Dialect::Sqlite => "SQLite",
        }
    }

    /// Quote an identifier.
    pub fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Bind placeholder for the n-th (1-based) parameter.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", n),
            Dialect::Sqlite => "?".to_string(),
        }
    }

    fn unique_name(&self, table: &str, column: &str) -> String {
        format!("{}_{}{}", table, column, self.unique_suffix())
    }

    fn index_name(&self, table: &str, column: &str) -> String {
        format!("{}_{}{}", table, column, INDEX_SUFFIX)
    }

    fn unique_suffix(&self) -> &'static str {
        match self {
            // Postgres names inline UNIQUE constraints this way.
            Dialect::Postgres => "_key",
            Dialect::Sqlite => "_unique",
        }
    }

    /// SQL type for a column.
    pub fn column_type_sql(&self, col: &ColumnDefinition) -> String {
        let p = &col.params;
        match col.column_type {
            ColumnType::Varchar => format!("VARCHAR({})", p.length.unwrap_or(255)),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::Bigint => "BIGINT".to_string(),
            ColumnType::Smallint => "SMALLINT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Numeric => match p.digits {
                Some((precision, scale)) => format!("NUMERIC({}, {})", precision, scale),
                None => "NUMERIC".to_string(),
            },
            ColumnType::Real => "REAL".to_string(),
            ColumnType::Double => "DOUBLE PRECISION".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::Timestamptz => "TIMESTAMPTZ".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Uuid => match self {
                Dialect::Postgres => "UUID".to_string(),
                Dialect::Sqlite => "TEXT".to_string(),
            },
            ColumnType::Json => match self {
                Dialect::Postgres => "JSON".to_string(),
                Dialect::Sqlite => "TEXT".to_string(),
            },
            ColumnType::Jsonb => match self {
                Dialect::Postgres => "JSONB".to_string(),
                Dialect::Sqlite => "TEXT".to_string(),
            },
        }
    }

    /// Column clause as used in CREATE TABLE and ADD COLUMN.
    pub fn column_sql(&self, col: &ColumnDefinition) -> String {
        let mut sql = format!("{} {}", self.quote(&col.name), self.column_type_sql(col));
        if col.is_primary_key() {
            sql.push_str(" PRIMARY KEY");
        } else if !col.is_nullable() {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = col.effective_default() {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.to_sql());
        }
        // SQLite uniqueness goes through a named index so it can be dropped.
        if *self == Dialect::Postgres && col.params.unique == Some(true) && !col.is_primary_key()
        {
            sql.push_str(" UNIQUE");
        }
        sql
    }

    /// Index statements that accompany a new column.
    fn column_index_sql(&self, table: &str, col: &ColumnDefinition) -> Vec<String> {
        let mut stmts = Vec::new();
        if *self == Dialect::Sqlite && col.params.unique == Some(true) && !col.is_primary_key() {
            stmts.push(self.create_index(table, &col.name, true));
        }
        if col.params.index == Some(true) {
            stmts.push(self.create_index(table, &col.name, false));
        }
        stmts
    }

    fn create_index(&self, table: &str, column: &str, unique: bool) -> String {
        let (kind, name) = if unique {
            ("UNIQUE INDEX", self.unique_name(table, column))
        } else {
            ("INDEX", self.index_name(table, column))
        };
        format!(
            "CREATE {} {} ON {} ({})",
            kind,
            self.quote(&name),
            self.quote(table),
            self.quote(column)
        )
    }

    fn drop_index(&self, name: &str) -> String {
        format!("DROP INDEX {}", self.quote(name))
    }

    fn drop_index_if_exists(&self, name: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", self.quote(name))
    }

    /// CREATE TABLE. Adds an implicit `id` primary key unless one is declared.
    pub fn create_table(&self, table: &str, columns: &[ColumnDefinition]) -> Vec<String> {
        let mut defs = Vec::with_capacity(columns.len() + 1);
        if !columns.iter().any(|c| c.is_primary_key()) {
            defs.push(match self {
                Dialect::Postgres => format!("{} SERIAL PRIMARY KEY", self.quote("id")),
                Dialect::Sqlite => format!("{} INTEGER PRIMARY KEY", self.quote("id")),
            });
        }
        defs.extend(columns.iter().map(|c| self.column_sql(c)));

        let mut stmts = vec![format!(
            "CREATE TABLE {} ({})",
            self.quote(table),
            defs.join(", ")
        )];
        for col in columns {
            stmts.extend(self.column_index_sql(table, col));
        }
        stmts
    }

    pub fn drop_table(&self, table: &str) -> Vec<String> {
        vec![format!("DROP TABLE {}", self.quote(table))]
    }

    pub fn rename_table(&self, old: &str, new: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote(old),
            self.quote(new)
        )]
    }

    pub fn add_column(&self, table: &str, col: &ColumnDefinition) -> Vec<String> {
        let mut stmts = vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote(table),
            self.column_sql(col)
        )];
        stmts.extend(self.column_index_sql(table, col));
        stmts
    }

    pub fn drop_column(&self, table: &str, column: &str) -> Vec<String> {
        let mut stmts = Vec::new();
        if *self == Dialect::Sqlite {
            // SQLite refuses to drop an indexed column.
            stmts.push(self.drop_index_if_exists(&self.unique_name(table, column)));
            stmts.push(self.drop_index_if_exists(&self.index_name(table, column)));
        }
        stmts.push(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote(table),
            self.quote(column)
        ));
        stmts
    }

    pub fn rename_column(&self, table: &str, old: &str, new: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.quote(table),
            self.quote(old),
            self.quote(new)
        )]
    }

    /// Query listing the index names of one table (bind: table name).
    pub fn index_names_sql(&self) -> String {
        match self {
            Dialect::Postgres => format!(
                "SELECT CAST(indexname AS TEXT) FROM pg_indexes \
                 WHERE schemaname = current_schema() AND tablename = {}",
                self.placeholder(1)
            ),
            Dialect::Sqlite => format!(
                "SELECT CAST(name AS TEXT) FROM sqlite_master \
                 WHERE type = 'index' AND sql IS NOT NULL AND tbl_name = {}",
                self.placeholder(1)
            ),
        }
    }

    /// Statements that rename the unique/index artifacts affected by a
    /// rename that already ran. `existing` lists the index names currently
    /// on the renamed table.
    pub fn rename_artifacts(&self, rename: Rename<'_>, existing: &[String]) -> Vec<String> {
        let mut stmts = Vec::new();
        for name in existing {
            for unique in [true, false] {
                let suffix = if unique {
                    self.unique_suffix()
                } else {
                    INDEX_SUFFIX
                };
                let Some(stem) = name.strip_suffix(suffix) else {
                    continue;
                };

                let column = match rename {
                    Rename::Table { from, .. } => stem
                        .strip_prefix(from)
                        .and_then(|rest| rest.strip_prefix('_'))
                        .filter(|c| !c.is_empty()),
                    Rename::Column { table, from, to } => {
                        (stem == format!("{}_{}", table, from)).then_some(to)
                    }
                };
                let Some(column) = column else {
                    continue;
                };

                let table = rename.table();
                let new_name = if unique {
                    self.unique_name(table, column)
                } else {
                    self.index_name(table, column)
                };
                if &new_name == name {
                    continue;
                }

                match self {
                    // Renaming a constraint's index renames the constraint too.
                    Dialect::Postgres => stmts.push(format!(
                        "ALTER INDEX {} RENAME TO {}",
                        self.quote(name),
                        self.quote(&new_name)
                    )),
                    Dialect::Sqlite => {
                        stmts.push(self.drop_index(name));
                        stmts.push(self.create_index(table, column, unique));
                    }
                }
                break;
            }
        }
        stmts
    }

    /// Statements that bring `column` to the options in `params`. Only the
    /// options set in `params` are touched.
    pub fn alter_column(
        &self,
        table: &str,
        column: &str,
        params: &ColumnParams,
    ) -> Result<Vec<String>> {
        let mut stmts = Vec::new();
        let alter = format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            self.quote(table),
            self.quote(column)
        );

        if params.primary_key.is_some() {
            return Err(self.unsupported("changing a primary key with ALTER COLUMN"));
        }

        if let Some(length) = params.length {
            self.require_postgres("changing a column length")?;
            stmts.push(format!("{} TYPE VARCHAR({})", alter, length));
        }

        if let Some((precision, scale)) = params.digits {
            self.require_postgres("changing numeric digits")?;
            stmts.push(format!("{} TYPE NUMERIC({}, {})", alter, precision, scale));
        }

        if let Some(null) = params.null {
            self.require_postgres("changing column nullability")?;
            if null {
                stmts.push(format!("{} DROP NOT NULL", alter));
            } else {
                stmts.push(format!("{} SET NOT NULL", alter));
            }
        }

        if let Some(default) = &params.default {
            self.require_postgres("changing a column default")?;
            match default {
                DefaultValue::Null => stmts.push(format!("{} DROP DEFAULT", alter)),
                value => stmts.push(format!("{} SET DEFAULT {}", alter, value.to_sql())),
            }
        }

        if let Some(unique) = params.unique {
            let name = self.unique_name(table, column);
            match (self, unique) {
                (Dialect::Postgres, true) => stmts.push(format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
                    self.quote(table),
                    self.quote(&name),
                    self.quote(column)
                )),
                (Dialect::Postgres, false) => stmts.push(format!(
                    "ALTER TABLE {} DROP CONSTRAINT {}",
                    self.quote(table),
                    self.quote(&name)
                )),
                (Dialect::Sqlite, true) => stmts.push(self.create_index(table, column, true)),
                (Dialect::Sqlite, false) => stmts.push(self.drop_index(&name)),
            }
        }

        if let Some(index) = params.index {
            if index {
                stmts.push(self.create_index(table, column, false));
            } else {
                stmts.push(self.drop_index(&self.index_name(table, column)));
            }
        }

        Ok(stmts)
    }

    /// DDL for the ledger table.
    pub fn ledger_table_ddl(&self, table: &str) -> String {
        let id = match self {
            Dialect::Postgres => "id SERIAL PRIMARY KEY",
            Dialect::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
        };
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             {}, \
             name VARCHAR(200) NOT NULL, \
             app_name VARCHAR(200) NOT NULL, \
             ran_on TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP)",
            self.quote(table),
            id
        )
    }

    fn require_postgres(&self, what: &str) -> Result<()> {
        match self {
            Dialect::Postgres => Ok(()),
            Dialect::Sqlite => Err(self.unsupported(what)),
        }
    }

    fn unsupported(&self, what: &str) -> MigrateError {
        MigrateError::Unsupported {
            dialect: self.name(),
            what: what.to_string(),
        }
    }
}
