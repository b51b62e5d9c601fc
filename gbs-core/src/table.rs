//! Tabular store entries: named tables with a fixed, typed schema.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{GbsError, Result};
use crate::value::{ColumnType, Value};

/// Number of rows included in a table preview.
pub const PREVIEW_ROWS: usize = 5;

/// Tables of one session, keyed by name.
pub type Tables = BTreeMap<String, Table>;

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// One table of a session.
///
/// Rows are stored positionally against `columns`, so every row carries
/// exactly the table's column set; missing cells are `Value::Null`.
/// Deserialized tables are re-validated row by row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

/// Wire form of [`Table`], checked before use.
#[derive(Deserialize)]
struct RawTable {
    name: String,
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl TryFrom<RawTable> for Table {
    type Error = GbsError;

    fn try_from(raw: RawTable) -> Result<Self> {
        let mut table = Table::new(raw.name, raw.columns)?;
        table.rows.reserve(raw.rows.len());
        for row in raw.rows {
            table.push_row(row)?;
        }
        Ok(table)
    }
}

impl Table {
    /// Create an empty table with the given schema.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Result<Self> {
        let name = name.into();
        let mut seen = std::collections::HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(GbsError::InvalidTable {
                    table: name,
                    message: format!("duplicate column '{}'", column.name),
                });
            }
        }
        Ok(Self {
            name,
            columns,
            rows: Vec::new(),
        })
    }

    /// Build a table from JSON records, inferring the schema.
    ///
    /// Columns appear in first-seen order across all records. A record that
    /// lacks a column gets null in that position.
    pub fn from_json_records(name: impl Into<String>, records: &[serde_json::Value]) -> Result<Self> {
        let name = name.into();
        let mut order: Vec<String> = Vec::new();
        let mut inferred: BTreeMap<String, Option<ColumnType>> = BTreeMap::new();

        for (i, record) in records.iter().enumerate() {
            let object = record.as_object().ok_or_else(|| GbsError::InvalidTable {
                table: name.clone(),
                message: format!("record {} is not a JSON object", i),
            })?;
            for (key, cell) in object {
                let slot = inferred.entry(key.clone()).or_insert_with(|| {
                    order.push(key.clone());
                    None
                });
                if let Some(ty) = ColumnType::of_json(cell) {
                    *slot = Some(slot.map_or(ty, |prev| prev.widen(ty)));
                }
            }
        }

        let columns: Vec<Column> = order
            .iter()
            .map(|key| {
                let ty = inferred
                    .get(key)
                    .copied()
                    .flatten()
                    .unwrap_or(ColumnType::String);
                Column::new(key.clone(), ty)
            })
            .collect();

        let mut table = Table::new(name, columns)?;
        table.rows.reserve(records.len());
        for record in records {
            // Every record was checked to be an object above.
            let object = record.as_object().into_iter().flatten();
            let mut row = vec![Value::Null; table.columns.len()];
            for (key, cell) in object {
                if let Some(idx) = table.column_index(key) {
                    row[idx] = Value::from_json(cell, table.columns[idx].column_type);
                }
            }
            table.rows.push(row);
        }

        Ok(table)
    }

    /// Append a row, checking width and cell types.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(GbsError::InvalidTable {
                table: self.name.clone(),
                message: format!(
                    "row {} has {} values, expected {}",
                    self.rows.len(),
                    row.len(),
                    self.columns.len()
                ),
            });
        }

        let mut fitted = Vec::with_capacity(row.len());
        for (value, column) in row.into_iter().zip(&self.columns) {
            let found = value.column_type();
            match value.coerce(column.column_type) {
                Some(v) => fitted.push(v),
                None => {
                    return Err(GbsError::InvalidTable {
                        table: self.name.clone(),
                        message: format!(
                            "column '{}' is {} but row {} holds {}",
                            column.name,
                            column.column_type,
                            self.rows.len(),
                            found.map_or("null", |t| t.as_str())
                        ),
                    })
                }
            }
        }
        self.rows.push(fitted);
        Ok(())
    }

    /// Builder-style [`Table::push_row`].
    pub fn with_row(mut self, row: Vec<Value>) -> Result<Self> {
        self.push_row(row)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether `other` can replace this table's rows without changing its
    /// schema. Returns a description of the first difference otherwise.
    pub fn schema_difference(&self, other: &Table) -> Option<String> {
        if self.columns == other.columns {
            return None;
        }
        let ours: Vec<String> = self.columns.iter().map(describe_column).collect();
        let theirs: Vec<String> = other.columns.iter().map(describe_column).collect();
        Some(format!(
            "existing columns [{}], new columns [{}]",
            ours.join(", "),
            theirs.join(", ")
        ))
    }

    /// Metadata and a short preview of the table.
    pub fn summary(&self) -> TableSummary {
        let preview = self
            .rows
            .iter()
            .take(PREVIEW_ROWS)
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(c, v)| (c.name.clone(), v.to_json()))
                    .collect()
            })
            .collect();

        TableSummary {
            table_name: self.name.clone(),
            columns: self.columns.clone(),
            total_rows: self.rows.len(),
            total_columns: self.columns.len(),
            preview,
        }
    }
}

fn describe_column(c: &Column) -> String {
    format!("{}:{}", c.name, c.column_type)
}

/// Table metadata returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSummary {
    pub table_name: String,
    pub columns: Vec<Column>,
    pub total_rows: usize,
    pub total_columns: usize,
    pub preview: Vec<serde_json::Map<String, serde_json::Value>>,
}
