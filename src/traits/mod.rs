mod connection;
mod from_row;

pub use connection::{Connection, RowStream, Transaction};
pub use from_row::{FromRow, FromSqlValue, RowTuple};
