use crate::error::{PgMapError, Result};
use crate::types::{Row, SqlValue};

/// Conversion of a single cell into a Rust value.
pub trait FromSqlValue: Sized {
    fn from_sql_value(value: &SqlValue) -> Result<Self>;
}

/// Conversion of a whole row into a Rust value.
/// Implemented by hand for user types:
///
/// ```
/// use pgmap::{FromRow, Result, Row};
///
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// impl FromRow for User {
///     fn from_row(row: &Row) -> Result<Self> {
///         Ok(User {
///             id: row.get("id")?,
///             name: row.get("name")?,
///         })
///     }
/// }
/// ```
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self>;
}

/// A tuple of `FromRow` types filled from consecutive column windows of one row.
/// Used by multi-mapping queries.
pub trait RowTuple: Sized {
    /// Number of types in the tuple.
    const ARITY: usize;

    /// Builds the tuple from one row window per type.
    fn from_parts(parts: &[Row]) -> Result<Self>;
}

fn invalid<T>(expected: &'static str, value: &SqlValue) -> Result<T> {
    Err(PgMapError::InvalidValue {
        expected,
        found: format!("{} {}", value.type_name(), value),
    })
}

impl FromSqlValue for SqlValue {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromSqlValue for String {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        match value {
            SqlValue::Text(s) => Ok(s.clone()),
            SqlValue::Int32(i) => Ok(i.to_string()),
            SqlValue::Int64(i) => Ok(i.to_string()),
            SqlValue::Float64(f) => Ok(f.to_string()),
            SqlValue::Bool(b) => Ok(b.to_string()),
            SqlValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => Ok(s.to_string()),
                Err(_) => invalid("String", value),
            },
            SqlValue::Null => invalid("String", value),
        }
    }
}

impl FromSqlValue for i64 {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        match value {
            SqlValue::Int32(i) => Ok(i64::from(*i)),
            SqlValue::Int64(i) => Ok(*i),
            SqlValue::Text(s) => s.trim().parse().or_else(|_| invalid("i64", value)),
            _ => invalid("i64", value),
        }
    }
}

impl FromSqlValue for i32 {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        match value {
            SqlValue::Int32(i) => Ok(*i),
            SqlValue::Int64(i) => i32::try_from(*i).or_else(|_| invalid("i32", value)),
            SqlValue::Text(s) => s.trim().parse().or_else(|_| invalid("i32", value)),
            _ => invalid("i32", value),
        }
    }
}

impl FromSqlValue for f64 {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        match value {
            SqlValue::Float64(f) => Ok(*f),
            SqlValue::Int32(i) => Ok(f64::from(*i)),
            // Precision loss above 2^53 matches what the database would do.
            SqlValue::Int64(i) => Ok(*i as f64),
            SqlValue::Text(s) => s.trim().parse().or_else(|_| invalid("f64", value)),
            _ => invalid("f64", value),
        }
    }
}

impl FromSqlValue for bool {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        match value {
            SqlValue::Bool(b) => Ok(*b),
            SqlValue::Int32(i) => Ok(*i != 0),
            SqlValue::Int64(i) => Ok(*i != 0),
            SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "1" | "yes" | "on" => Ok(true),
                "f" | "false" | "0" | "no" | "off" => Ok(false),
                _ => invalid("bool", value),
            },
            _ => invalid("bool", value),
        }
    }
}

impl FromSqlValue for Vec<u8> {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        match value {
            SqlValue::Bytes(bytes) => Ok(bytes.clone()),
            // bytea in text form is hex with a `\x` prefix
            SqlValue::Text(s) => match s.strip_prefix("\\x") {
                Some(hex) => decode_hex(hex).map_or_else(|| invalid("Vec<u8>", value), Ok),
                None => Ok(s.as_bytes().to_vec()),
            },
            _ => invalid("Vec<u8>", value),
        }
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: &SqlValue) -> Result<Self> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::from_sql_value(other).map(Some),
        }
    }
}

impl FromRow for Row {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(row.clone())
    }
}

/// `None` when the row has no columns or its first column is null.
impl<T: FromRow> FromRow for Option<T> {
    fn from_row(row: &Row) -> Result<Self> {
        match row.values().first() {
            None | Some(SqlValue::Null) => Ok(None),
            Some(_) => T::from_row(row).map(Some),
        }
    }
}

// Scalars map from the first column.
macro_rules! impl_scalar_from_row {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl FromRow for $ty {
                fn from_row(row: &Row) -> Result<Self> {
                    row.get_idx(0)
                }
            }
        )+
    };
}

impl_scalar_from_row!(SqlValue, String, i32, i64, f64, bool, Vec<u8>);

macro_rules! impl_row_tuple {
    ($arity:expr; $($name:ident => $idx:tt),+) => {
        impl<$($name: FromRow),+> RowTuple for ($($name,)+) {
            const ARITY: usize = $arity;

            fn from_parts(parts: &[Row]) -> Result<Self> {
                Ok(($($name::from_row(part(parts, $idx)?)?,)+))
            }
        }
    };
}

fn part(parts: &[Row], index: usize) -> Result<&Row> {
    parts
        .get(index)
        .ok_or_else(|| PgMapError::ColumnNotFound(format!("columns for mapped type #{index}")))
}

impl_row_tuple!(2; A => 0, B => 1);
impl_row_tuple!(3; A => 0, B => 1, C => 2);
impl_row_tuple!(4; A => 0, B => 1, C => 2, D => 3);
impl_row_tuple!(5; A => 0, B => 1, C => 2, D => 3, E => 4);
impl_row_tuple!(6; A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);
impl_row_tuple!(7; A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6);
