use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};

use crate::error::Result;
use crate::types::{RawQueryResult, Row, SqlValue};

/// Unbuffered stream of rows produced by `Connection::query_stream`.
pub type RowStream<'a> = BoxStream<'a, Result<Row>>;

/// Trait for database connection implementations.
/// Connections are responsible for:
/// - Converting SqlValue parameters to native types
/// - Executing statements and converting results to RawQueryResult
/// - Starting transactions
///
/// Parameters use PostgreSQL-style placeholders ($1, $2, etc.)
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run a statement and return its single result set.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<RawQueryResult>;

    /// Run a statement and return the number of rows affected.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Run a batch of statements and return every result set it produced, in order.
    async fn query_multiple(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<RawQueryResult>>;

    /// Run a statement and stream its rows as they arrive.
    /// The default implementation reads the whole result through `query`.
    async fn query_stream<'a>(
        &'a self,
        sql: String,
        params: Vec<SqlValue>,
    ) -> Result<RowStream<'a>> {
        let rows = self.query(&sql, &params).await?.into_rows();
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    /// Start a transaction. Commands run against the returned handle run inside it.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Timeout applied to commands that do not set their own.
    fn default_timeout(&self) -> Option<Duration> {
        None
    }
}

/// A connection scoped to an open transaction.
#[async_trait]
pub trait Transaction: Connection {
    /// View of this transaction as a plain connection, for passing to mapping calls.
    fn as_connection(&self) -> &dyn Connection;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;
}
