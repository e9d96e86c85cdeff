mod command;
mod reader;
mod row;
mod sql_value;

pub use command::{Command, CommandBehavior, CommandType, Parameters};
pub(crate) use reader::single;
pub use reader::{DataReader, GridReader, RowParser};
pub use row::{RawQueryResult, Row};
pub use sql_value::SqlValue;
