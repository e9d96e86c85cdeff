use crate::error::{PgMapError, Result};
use crate::traits::FromSqlValue;
use crate::types::SqlValue;

/// Driver-agnostic raw result from a database query.
#[derive(Debug, Clone, PartialEq)]
pub struct RawQueryResult {
    /// Column names in order
    pub columns: Vec<String>,
    /// Rows, where each row is a vector of values in column order
    pub rows: Vec<Vec<SqlValue>>,
}

impl RawQueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Converts the raw rows into `Row`s sharing this result's column names.
    pub fn into_rows(self) -> Vec<Row> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|values| Row::new(columns.clone(), values))
            .collect()
    }
}

/// A single row of a result set.
/// Values keep their column order; lookup by name ignores ASCII case.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Creates a new Row from column names and values.
    /// Extra values without a column name are dropped.
    pub fn new(columns: Vec<String>, mut values: Vec<SqlValue>) -> Self {
        values.truncate(columns.len());
        values.resize(columns.len(), SqlValue::Null);
        Self { columns, values }
    }

    /// Gets the raw value of a column by name.
    pub fn value(&self, column: &str) -> Result<&SqlValue> {
        self.index_of(column)
            .map(|i| &self.values[i])
            .ok_or_else(|| PgMapError::ColumnNotFound(column.to_string()))
    }

    /// Gets a column by name, converted to `T`.
    pub fn get<T: FromSqlValue>(&self, column: &str) -> Result<T> {
        let value = self.value(column)?;
        convert(column, value)
    }

    /// Gets a column by position, converted to `T`.
    pub fn get_idx<T: FromSqlValue>(&self, index: usize) -> Result<T> {
        let value = self
            .values
            .get(index)
            .ok_or_else(|| PgMapError::ColumnNotFound(format!("#{index}")))?;
        convert(&self.columns[index], value)
    }

    /// Returns the position of a column, matched case-insensitively.
    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == column)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(column)))
    }

    /// Returns a new row holding the columns `[start, start + len)`.
    /// The window is clamped to the row's bounds.
    pub fn slice(&self, start: usize, len: usize) -> Row {
        let start = start.min(self.columns.len());
        let end = start.saturating_add(len).min(self.columns.len());
        Row {
            columns: self.columns[start..end].to_vec(),
            values: self.values[start..end].to_vec(),
        }
    }

    /// Returns all column names in this row.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns all values in column order.
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Returns the number of columns in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if this row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn convert<T: FromSqlValue>(column: &str, value: &SqlValue) -> Result<T> {
    T::from_sql_value(value).map_err(|err| match err {
        PgMapError::InvalidValue { expected, found } => PgMapError::ColumnConversion {
            column: column.to_string(),
            expected,
            found,
        },
        other => other,
    })
}
