#![forbid(unsafe_code)]

use crate::column::{ColumnRef, DictionaryColumn, NumberColumn, ValueColumn};
use crate::types::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type ColumnarResult<T> = Result<T, ColumnarError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ColumnarError {
    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("column length mismatch for {column}: expected {expected} values, got {actual}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
}

/// Physical encoding requested for a column built with [`TableBuilder`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColumnType {
    #[default]
    Any,
    Number,
    String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// An ordered set of uniquely named, equal-length columns.
///
/// Cloning a table clones column handles, never column data.
#[derive(Clone, Debug, Default)]
pub struct ColumnTable {
    names: Vec<String>,
    columns: Vec<ColumnRef>,
    index: HashMap<String, usize>,
    rows: usize,
}

impl ColumnTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(name, column)` pairs, rejecting duplicate names and ragged columns.
    pub fn from_columns<N: Into<String>>(
        columns: impl IntoIterator<Item = (N, ColumnRef)>,
    ) -> ColumnarResult<Self> {
        let mut table = Self::new();
        for (name, column) in columns {
            table.add_column(name, column)?;
        }
        Ok(table)
    }

    /// Convenience constructor from plain value vectors.
    pub fn from_values<N: Into<String>>(
        columns: impl IntoIterator<Item = (N, Vec<Value>)>,
    ) -> ColumnarResult<Self> {
        Self::from_columns(
            columns
                .into_iter()
                .map(|(name, values)| (name, Arc::new(ValueColumn::new(values)) as ColumnRef)),
        )
    }

    pub fn with_rows(rows: usize) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    fn check_length(&self, name: &str, column: &ColumnRef) -> ColumnarResult<()> {
        if !self.columns.is_empty() && column.len() != self.rows {
            return Err(ColumnarError::LengthMismatch {
                column: name.to_string(),
                expected: self.rows,
                actual: column.len(),
            });
        }
        Ok(())
    }

    pub fn add_column(&mut self, name: impl Into<String>, column: ColumnRef) -> ColumnarResult<()> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(ColumnarError::DuplicateColumn(name));
        }
        self.check_length(&name, &column)?;
        if self.columns.is_empty() {
            self.rows = column.len();
        }
        self.index.insert(name.clone(), self.columns.len());
        self.names.push(name);
        self.columns.push(column);
        Ok(())
    }

    /// Replace an existing column in place (keeping its position) or append a new one.
    pub fn set_column(&mut self, name: impl Into<String>, column: ColumnRef) -> ColumnarResult<()> {
        let name = name.into();
        match self.index.get(&name).copied() {
            Some(idx) => {
                if self.columns.len() == 1 {
                    self.rows = column.len();
                } else {
                    self.check_length(&name, &column)?;
                }
                self.columns[idx] = column;
                Ok(())
            }
            None => self.add_column(name, column),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnRef> {
        self.columns.get(self.column_index(name)?)
    }

    pub fn column_at(&self, idx: usize) -> &ColumnRef {
        &self.columns[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnRef)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.columns.iter())
    }

    pub fn get_cell(&self, row: usize, col: usize) -> Value {
        self.columns[col].get(row)
    }

    /// Project (and optionally rename) columns: `(source, output)` pairs in output order.
    pub fn project(&self, columns: &[(String, String)]) -> ColumnarResult<ColumnTable> {
        let mut out = ColumnTable::with_rows(self.rows);
        for (source, output) in columns {
            let column = self
                .column(source)
                .ok_or_else(|| ColumnarError::UnknownColumn(source.clone()))?;
            out.add_column(output.clone(), column.clone())?;
        }
        Ok(out)
    }

    /// Copy the listed rows (in order) of every column.
    pub fn take(&self, rows: &[usize]) -> ColumnTable {
        ColumnTable {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.take(rows)).collect(),
            index: self.index.clone(),
            rows: rows.len(),
        }
    }
}

/// Row-oriented builder producing a [`ColumnTable`] with per-column encodings.
pub struct TableBuilder {
    schema: Vec<ColumnSchema>,
    columns: Vec<Vec<Value>>,
    rows: usize,
}

impl TableBuilder {
    pub fn new(schema: Vec<ColumnSchema>) -> Self {
        let columns = schema.iter().map(|_| Vec::new()).collect();
        Self {
            schema,
            columns,
            rows: 0,
        }
    }

    pub fn append_row(&mut self, row: &[Value]) {
        assert_eq!(
            row.len(),
            self.columns.len(),
            "row length must match schema"
        );
        for (column, value) in self.columns.iter_mut().zip(row.iter()) {
            column.push(value.clone());
        }
        self.rows += 1;
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn finalize(self) -> ColumnarResult<ColumnTable> {
        let mut table = ColumnTable::with_rows(self.rows);
        for (schema, values) in self.schema.into_iter().zip(self.columns) {
            let column: ColumnRef = match schema.column_type {
                ColumnType::Number => Arc::new(NumberColumn::from_options(
                    values.iter().map(|v| v.is_valid().then(|| v.to_f64())),
                )),
                ColumnType::String => Arc::new(DictionaryColumn::encode(values.iter().map(
                    |v| match v {
                        Value::Null => None,
                        Value::String(s) => Some(s.to_string()),
                        other => Some(other.to_string()),
                    },
                ))),
                ColumnType::Any => Arc::new(ValueColumn::new(values)),
            };
            table.add_column(schema.name, column)?;
        }
        Ok(table)
    }
}
