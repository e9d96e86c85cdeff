use std::collections::VecDeque;
use std::marker::PhantomData;

use crate::error::{PgMapError, Result};
use crate::traits::FromRow;
use crate::types::{RawQueryResult, Row};

/// Buffered, forward-only reader over one result set.
#[derive(Debug, Clone)]
pub struct DataReader {
    columns: Vec<String>,
    rows: VecDeque<Row>,
}

impl DataReader {
    /// Creates a DataReader from a RawQueryResult.
    pub fn from_raw(raw: RawQueryResult) -> Self {
        let columns = raw.columns.clone();
        Self {
            columns,
            rows: raw.into_rows().into(),
        }
    }

    /// Returns the column names of the result set.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Advances to the next row, returning it.
    pub fn read(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    /// Returns the number of rows not yet read.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.rows.truncate(len);
    }
}

impl Iterator for DataReader {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.read()
    }
}

/// Reader over the result sets of a multi-statement query, consumed in order.
#[derive(Debug, Clone)]
pub struct GridReader {
    grids: VecDeque<RawQueryResult>,
}

impl GridReader {
    pub fn new(grids: Vec<RawQueryResult>) -> Self {
        Self {
            grids: grids.into(),
        }
    }

    /// True once every result set has been read.
    pub fn is_consumed(&self) -> bool {
        self.grids.is_empty()
    }

    /// Reads the next result set as a DataReader.
    pub fn read_reader(&mut self) -> Result<DataReader> {
        self.grids
            .pop_front()
            .map(DataReader::from_raw)
            .ok_or(PgMapError::NoMoreResultSets)
    }

    /// Reads the next result set, mapping every row.
    pub fn read<T: FromRow>(&mut self) -> Result<Vec<T>> {
        self.read_reader()?.map(|row| T::from_row(&row)).collect()
    }

    pub fn read_first<T: FromRow>(&mut self) -> Result<T> {
        let rows = self.read_reader()?;
        first(rows)?.ok_or(PgMapError::UnexpectedRowCount {
            expected: 1,
            actual: 0,
        })
    }

    pub fn read_first_or_default<T: FromRow>(&mut self) -> Result<Option<T>> {
        first(self.read_reader()?)
    }

    pub fn read_single<T: FromRow>(&mut self) -> Result<T> {
        let rows: Vec<Row> = self.read_reader()?.collect();
        single(rows)?.ok_or(PgMapError::UnexpectedRowCount {
            expected: 1,
            actual: 0,
        })
    }

    pub fn read_single_or_default<T: FromRow>(&mut self) -> Result<Option<T>> {
        let rows: Vec<Row> = self.read_reader()?.collect();
        single(rows)
    }
}

fn first<T: FromRow>(mut reader: DataReader) -> Result<Option<T>> {
    reader.read().map(|row| T::from_row(&row)).transpose()
}

/// Maps the only row of `rows`; `None` when empty, an error when there are several.
pub(crate) fn single<T: FromRow>(rows: Vec<Row>) -> Result<Option<T>> {
    match rows.as_slice() {
        [] => Ok(None),
        [row] => T::from_row(row).map(Some),
        _ => Err(PgMapError::UnexpectedRowCount {
            expected: 1,
            actual: rows.len(),
        }),
    }
}

/// Parses a window of columns `[start, start + length)` of a row into `T`.
#[derive(Debug, Clone)]
pub struct RowParser<T> {
    start: usize,
    length: Option<usize>,
    none_if_first_missing: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FromRow> RowParser<T> {
    /// `length` of `None` takes every column from `start` to the end of the row.
    pub fn new(start: usize, length: Option<usize>, none_if_first_missing: bool) -> Self {
        Self {
            start,
            length,
            none_if_first_missing,
            _marker: PhantomData,
        }
    }

    /// Parses one row. Returns `None` only when the parser was built with
    /// `none_if_first_missing` and the first column of the window is null or absent.
    pub fn parse(&self, row: &Row) -> Result<Option<T>> {
        let length = self
            .length
            .unwrap_or_else(|| row.len().saturating_sub(self.start));
        let window = row.slice(self.start, length);
        if self.none_if_first_missing && window.values().first().map_or(true, |v| v.is_null()) {
            return Ok(None);
        }
        T::from_row(&window).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SqlValue;

    fn grid(values: &[i32]) -> RawQueryResult {
        RawQueryResult::new(
            vec!["n".to_string()],
            values.iter().map(|v| vec![SqlValue::Int32(*v)]).collect(),
        )
    }

    #[test]
    fn test_grid_reader_reads_in_order() {
        let mut reader = GridReader::new(vec![grid(&[1, 2]), grid(&[3]), grid(&[])]);

        assert_eq!(reader.read::<i32>().unwrap(), vec![1, 2]);
        assert_eq!(reader.read_single::<i32>().unwrap(), 3);
        assert_eq!(reader.read_first_or_default::<i32>().unwrap(), None);
        assert!(reader.is_consumed());
        assert!(matches!(
            reader.read::<i32>().unwrap_err(),
            PgMapError::NoMoreResultSets
        ));
    }

    #[test]
    fn test_grid_reader_single_rejects_many() {
        let mut reader = GridReader::new(vec![grid(&[1, 2])]);
        match reader.read_single_or_default::<i32>().unwrap_err() {
            PgMapError::UnexpectedRowCount { expected, actual } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("Expected UnexpectedRowCount error, got {other:?}"),
        }
    }

    #[test]
    fn test_grid_reader_decodes_text_bytea() {
        // Multi-statement batches deliver bytea as hex text.
        let mut reader = GridReader::new(vec![RawQueryResult::new(
            vec!["payload".to_string()],
            vec![vec![SqlValue::Text("\\xdead".to_string())]],
        )]);
        assert_eq!(reader.read::<Vec<u8>>().unwrap(), vec![vec![0xde, 0xad]]);
    }

    #[test]
    fn test_data_reader_iterates() {
        let mut reader = DataReader::from_raw(grid(&[5, 6]));
        assert_eq!(reader.columns(), &["n".to_string()]);
        assert_eq!(reader.remaining(), 2);
        assert_eq!(reader.read().unwrap().get::<i32>("n").unwrap(), 5);
        assert_eq!(reader.count(), 1);
    }

    #[test]
    fn test_row_parser_window() {
        let row = Row::new(
            vec!["id".into(), "name".into(), "id".into(), "title".into()],
            vec![SqlValue::Int32(1), "Ann".into(), SqlValue::Null, SqlValue::Null],
        );

        let name: RowParser<String> = RowParser::new(1, Some(1), false);
        assert_eq!(name.parse(&row).unwrap().as_deref(), Some("Ann"));

        let post: RowParser<Row> = RowParser::new(2, None, true);
        assert!(post.parse(&row).unwrap().is_none());

        let post_raw: RowParser<Row> = RowParser::new(2, None, false);
        assert_eq!(post_raw.parse(&row).unwrap().unwrap().len(), 2);
    }
}
