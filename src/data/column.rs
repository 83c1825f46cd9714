//! Column, table and schema definitions

use super::{Value, ValueType};
use serde::{Deserialize, Serialize};

/// Column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Value type
    pub value_type: ValueType,
    /// Whether the column can contain null values
    pub nullable: bool,
    /// Whether this column gets a B-tree index during ingest
    pub indexed: bool,
    /// Whether this column is part of the primary key
    pub primary_key: bool,
    /// Whether the stored field bytes are encrypted
    pub encrypted: bool,
    /// Field identifier used to derive the per-field key and IV.
    /// Must be non-zero on an encrypted column once a key is installed.
    pub field_id: u16,
    /// Default value (optional)
    pub default: Option<Value>,
}

impl ColumnDef {
    /// Create a new column definition
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            nullable: true,
            indexed: false,
            primary_key: false,
            encrypted: false,
            field_id: 0,
            default: None,
        }
    }

    /// Set nullable flag
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set indexed flag
    pub fn indexed(mut self, indexed: bool) -> Self {
        self.indexed = indexed;
        self
    }

    /// Mark as primary key. Primary keys are always indexed and not nullable.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.indexed = true;
        self.nullable = false;
        self
    }

    /// Mark the column as encrypted under the given field id
    pub fn encrypted(mut self, field_id: u16) -> Self {
        self.encrypted = true;
        self.field_id = field_id;
        self
    }

    /// Set default value
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Table definition: an ordered list of uniquely-named columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key_columns: Vec<String>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key_columns: Vec::new(),
        }
    }

    /// Append a column definition
    pub fn column(mut self, col: ColumnDef) -> Self {
        if col.primary_key {
            self.primary_key_columns.push(col.name.clone());
        }
        self.columns.push(col);
        self
    }

    /// Position of a column by name, -1 on miss
    pub fn column_index(&self, name: &str) -> i32 {
        for (i, col) in self.columns.iter().enumerate() {
            if col.name == name {
                return i as i32;
            }
        }
        -1
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Database schema: a named set of tables
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub name: String,
    pub tables: Vec<TableDef>,
}

impl DatabaseSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Vec::new(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn add_table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }
}
