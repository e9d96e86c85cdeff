//! pgmap - A lightweight SQL-to-struct mapper for PostgreSQL behind an injectable trait
//!
//! The mapping functions live in [`mapper`]. [`SqlMapper`] exposes the same
//! operations as trait methods so callers can depend on the trait and swap in a
//! stub under test; [`SqlMapperInstance`] is the implementation that forwards to
//! [`mapper`].
//!
//! # Example
//! ```ignore
//! use pgmap::{Command, FromRow, Result, Row, SqlMapper, SqlMapperInstance};
//! use pgmap::drivers::TokioPostgresConnection;
//!
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl FromRow for User {
//!     fn from_row(row: &Row) -> Result<Self> {
//!         Ok(User { id: row.get("id")?, name: row.get("name")? })
//!     }
//! }
//!
//! let conn = TokioPostgresConnection::connect("postgres://localhost/mydb").await?;
//! let mapper = SqlMapperInstance;
//!
//! let user: User = mapper
//!     .query_single(&conn, Command::new("SELECT id, name FROM users WHERE id = @id").bind("id", 1i64))
//!     .await?;
//! ```

pub mod blocking;
pub mod config;
pub mod drivers;
pub mod error;
pub mod mapper;
pub mod traits;
pub mod types;

mod instance;

// Re-export main types for convenient access
pub use blocking::BlockingSqlMapper;
pub use config::MapperConfig;
pub use error::{PgMapError, Result};
pub use instance::{SqlMapper, SqlMapperInstance};
pub use mapper::DEFAULT_SPLIT_ON;
pub use traits::{Connection, FromRow, FromSqlValue, RowStream, RowTuple, Transaction};
pub use types::{
    Command, CommandBehavior, CommandType, DataReader, GridReader, Parameters, RawQueryResult, Row,
    RowParser, SqlValue,
};
