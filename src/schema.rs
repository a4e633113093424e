//! Column definitions carried by operations.
//!
//! ```toml
//! [[operations.columns]]
//! name = "email"
//! type = "varchar"
//! length = 100
//! unique = true
//! ```

use serde::{Deserialize, Serialize};

/// Column class. Mirrors the column kinds a migration can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[serde(alias = "Varchar")]
    Varchar,
    #[serde(alias = "Text")]
    Text,
    #[serde(alias = "Integer", alias = "int")]
    Integer,
    #[serde(alias = "BigInt")]
    Bigint,
    #[serde(alias = "SmallInt")]
    Smallint,
    #[serde(alias = "Boolean", alias = "bool")]
    Boolean,
    #[serde(alias = "Numeric", alias = "decimal")]
    Numeric,
    #[serde(alias = "Real")]
    Real,
    #[serde(alias = "DoublePrecision", alias = "double_precision")]
    Double,
    #[serde(alias = "Timestamp")]
    Timestamp,
    #[serde(alias = "Timestamptz")]
    Timestamptz,
    #[serde(alias = "Date")]
    Date,
    #[serde(alias = "UUID")]
    Uuid,
    #[serde(alias = "JSON")]
    Json,
    #[serde(alias = "JSONB")]
    Jsonb,
}

impl ColumnType {
    /// Default used when a non-nullable column is declared without one, so
    /// adding it to a table with existing rows succeeds.
    pub fn implicit_default(&self) -> Option<DefaultValue> {
        match self {
            ColumnType::Varchar | ColumnType::Text => Some(DefaultValue::Text(String::new())),
            ColumnType::Integer | ColumnType::Bigint | ColumnType::Smallint => {
                Some(DefaultValue::Integer(0))
            }
            ColumnType::Numeric | ColumnType::Real | ColumnType::Double => {
                Some(DefaultValue::Integer(0))
            }
            ColumnType::Boolean => Some(DefaultValue::Bool(false)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Varchar => "varchar",
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Bigint => "bigint",
            ColumnType::Smallint => "smallint",
            ColumnType::Boolean => "boolean",
            ColumnType::Numeric => "numeric",
            ColumnType::Real => "real",
            ColumnType::Double => "double",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Timestamptz => "timestamptz",
            ColumnType::Date => "date",
            ColumnType::Uuid => "uuid",
            ColumnType::Json => "json",
            ColumnType::Jsonb => "jsonb",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Literal column default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// Explicit NULL default. Not expressible in TOML.
    #[serde(skip_deserializing)]
    Null,
    /// Current timestamp at insert time.
    #[serde(skip_deserializing)]
    Now,
}

impl DefaultValue {
    /// Render as a SQL literal.
    pub fn to_sql(&self) -> String {
        match self {
            DefaultValue::Bool(true) => "TRUE".to_string(),
            DefaultValue::Bool(false) => "FALSE".to_string(),
            DefaultValue::Integer(i) => i.to_string(),
            DefaultValue::Float(f) => f.to_string(),
            DefaultValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::Now => "CURRENT_TIMESTAMP".to_string(),
        }
    }
}

impl From<&str> for DefaultValue {
    fn from(s: &str) -> Self {
        DefaultValue::Text(s.to_string())
    }
}

impl From<i64> for DefaultValue {
    fn from(i: i64) -> Self {
        DefaultValue::Integer(i)
    }
}

impl From<bool> for DefaultValue {
    fn from(b: bool) -> Self {
        DefaultValue::Bool(b)
    }
}

/// Column options. An unset field means "not specified", which matters for
/// `AlterColumn` where only the changed options are listed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    /// (precision, scale) for numeric columns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digits: Option<(u32, u32)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<bool>,
}

impl ColumnParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn digits(mut self, precision: u32, scale: u32) -> Self {
        self.digits = Some((precision, scale));
        self
    }

    pub fn default_value(mut self, value: impl Into<DefaultValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn null(mut self, null: bool) -> Self {
        self.null = Some(null);
        self
    }

    pub fn primary_key(mut self, primary_key: bool) -> Self {
        self.primary_key = Some(primary_key);
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = Some(unique);
        self
    }

    pub fn index(mut self, index: bool) -> Self {
        self.index = Some(index);
        self
    }

    /// Overlay every field set in `other` onto `self`.
    pub fn merge(&mut self, other: &ColumnParams) {
        if other.length.is_some() {
            self.length = other.length;
        }
        if other.digits.is_some() {
            self.digits = other.digits;
        }
        if other.default.is_some() {
            self.default = other.default.clone();
        }
        if other.null.is_some() {
            self.null = other.null;
        }
        if other.primary_key.is_some() {
            self.primary_key = other.primary_key;
        }
        if other.unique.is_some() {
            self.unique = other.unique;
        }
        if other.index.is_some() {
            self.index = other.index;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == ColumnParams::default()
    }
}

/// A named, typed column with its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(flatten)]
    pub params: ColumnParams,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            params: ColumnParams::default(),
        }
    }

    pub fn with_params(mut self, params: ColumnParams) -> Self {
        self.params = params;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.params.null = Some(true);
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.params.primary_key = Some(true);
        self.params.null = Some(false);
        self
    }

    pub fn unique(mut self) -> Self {
        self.params.unique = Some(true);
        self
    }

    pub fn indexed(mut self) -> Self {
        self.params.index = Some(true);
        self
    }

    pub fn default(mut self, value: impl Into<DefaultValue>) -> Self {
        self.params.default = Some(value.into());
        self
    }

    /// Columns are NOT NULL unless declared otherwise.
    pub fn is_nullable(&self) -> bool {
        self.params.null.unwrap_or(false)
    }

    pub fn is_primary_key(&self) -> bool {
        self.params.primary_key.unwrap_or(false)
    }

    /// Explicit default, else the type's implicit default for NOT NULL
    /// columns. Primary keys never get an implicit default.
    pub fn effective_default(&self) -> Option<DefaultValue> {
        if let Some(default) = &self.params.default {
            return Some(default.clone());
        }
        if self.is_nullable() || self.is_primary_key() {
            return None;
        }
        self.column_type.implicit_default()
    }
}
