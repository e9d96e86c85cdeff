//! Column windows for multi-mapping.

use crate::error::{PgMapError, Result};
use crate::types::Row;

/// Column name that starts each mapped type when the caller does not say otherwise.
pub const DEFAULT_SPLIT_ON: &str = "id";

/// Start column of each of `arity` windows over `columns`.
///
/// `split_on` is a comma-separated list compared case-insensitively. A single name
/// is searched right-to-left, so the last type starts at the right-most match.
/// Several names must number `arity - 1` and are searched left-to-right.
/// Column 0 always starts the first window.
pub(crate) fn split_points(columns: &[String], arity: usize, split_on: &str) -> Result<Vec<usize>> {
    if arity == 0 {
        return Err(PgMapError::Unsupported("multi-mapping needs at least one type".to_string()));
    }
    let mut starts = vec![0; arity];
    if arity == 1 {
        return Ok(starts);
    }

    let names: Vec<&str> = split_on
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();

    if names.len() <= 1 {
        let name = names.first().copied().unwrap_or(DEFAULT_SPLIT_ON);
        let mut end = columns.len();
        for type_index in (1..arity).rev() {
            let found = (1..end)
                .rev()
                .find(|&i| columns[i].eq_ignore_ascii_case(name))
                .ok_or_else(|| not_found(name, type_index))?;
            starts[type_index] = found;
            end = found;
        }
        return Ok(starts);
    }

    if names.len() != arity - 1 {
        return Err(PgMapError::Unsupported(format!(
            "{} split columns given for {} mapped types",
            names.len(),
            arity
        )));
    }

    let mut from = 1;
    for (offset, name) in names.iter().enumerate() {
        let type_index = offset + 1;
        let found = (from..columns.len())
            .find(|&i| columns[i].eq_ignore_ascii_case(name))
            .ok_or_else(|| not_found(name, type_index))?;
        starts[type_index] = found;
        from = found + 1;
    }
    Ok(starts)
}

/// Cuts `row` into the windows beginning at `starts`.
pub(crate) fn split_row(row: &Row, starts: &[usize]) -> Vec<Row> {
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(row.len());
            row.slice(start, end.saturating_sub(start))
        })
        .collect()
}

fn not_found(name: &str, type_index: usize) -> PgMapError {
    PgMapError::SplitOnNotFound {
        split_on: name.to_string(),
        type_index,
    }
}
