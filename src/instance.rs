use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::Result;
use crate::mapper;
use crate::traits::{Connection, FromRow, FromSqlValue, RowTuple};
use crate::types::{Command, CommandBehavior, DataReader, GridReader, Parameters, Row, RowParser};

/// The mapping API as an injectable trait.
///
/// Each method has the same parameters and result as the function of the same name
/// in [`crate::mapper`]. Depend on `SqlMapper` instead of calling the functions
/// directly so tests can substitute a stub.
///
/// # Example
/// ```ignore
/// async fn user_names<M: SqlMapper>(mapper: &M, conn: &dyn Connection) -> pgmap::Result<Vec<String>> {
///     mapper.query(conn, "SELECT name FROM users".into()).await
/// }
/// ```
#[async_trait]
pub trait SqlMapper: Send + Sync {
    /// Execute a command and return the number of rows affected.
    async fn execute(&self, conn: &dyn Connection, command: Command) -> Result<u64>;

    /// First column of the first row, `None` when absent or null.
    async fn execute_scalar<T>(&self, conn: &dyn Connection, command: Command) -> Result<Option<T>>
    where
        T: FromSqlValue + Send;

    async fn execute_reader(
        &self,
        conn: &dyn Connection,
        command: Command,
        behavior: CommandBehavior,
    ) -> Result<DataReader>;

    /// Buffered query mapping every row.
    async fn query<T>(&self, conn: &dyn Connection, command: Command) -> Result<Vec<T>>
    where
        T: FromRow + Send;

    /// Unbuffered query yielding rows as they arrive.
    fn query_unbuffered<'a, T>(&'a self, conn: &'a dyn Connection, command: Command) -> BoxStream<'a, Result<T>>
    where
        T: FromRow + Send + 'a;

    async fn query_first<T>(&self, conn: &dyn Connection, command: Command) -> Result<T>
    where
        T: FromRow + Send;

    async fn query_first_or_default<T>(&self, conn: &dyn Connection, command: Command) -> Result<Option<T>>
    where
        T: FromRow + Send;

    async fn query_single<T>(&self, conn: &dyn Connection, command: Command) -> Result<T>
    where
        T: FromRow + Send;

    async fn query_single_or_default<T>(&self, conn: &dyn Connection, command: Command) -> Result<Option<T>>
    where
        T: FromRow + Send;

    /// Query returning several result sets.
    async fn query_multiple(&self, conn: &dyn Connection, command: Command) -> Result<GridReader>;

    /// Multi-mapping query: each row is split on `split_on` into one value per tuple member.
    async fn query_map<K, R, F>(
        &self,
        conn: &dyn Connection,
        command: Command,
        split_on: &str,
        map: F,
    ) -> Result<Vec<R>>
    where
        K: RowTuple + Send,
        R: Send,
        F: Fn(K) -> R + Send;

    /// Multi-mapping query with a run-time number of column windows.
    async fn query_map_dyn<R, F>(
        &self,
        conn: &dyn Connection,
        command: Command,
        type_count: usize,
        split_on: &str,
        map: F,
    ) -> Result<Vec<R>>
    where
        R: Send,
        F: Fn(Vec<Row>) -> R + Send;

    fn parse<T: FromRow>(&self, reader: DataReader) -> Result<Vec<T>>;

    fn row_parser<T: FromRow>(&self, start: usize, length: Option<usize>, none_if_first_missing: bool) -> RowParser<T>;

    fn replace_literals(&self, params: &Parameters, sql: &str) -> Result<String>;
}

/// `SqlMapper` backed by the functions in [`crate::mapper`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlMapperInstance;

impl SqlMapperInstance {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SqlMapper for SqlMapperInstance {
    async fn execute(&self, conn: &dyn Connection, command: Command) -> Result<u64> {
        mapper::execute(conn, command).await
    }

    async fn execute_scalar<T>(&self, conn: &dyn Connection, command: Command) -> Result<Option<T>>
    where
        T: FromSqlValue + Send,
    {
        mapper::execute_scalar(conn, command).await
    }

    async fn execute_reader(
        &self,
        conn: &dyn Connection,
        command: Command,
        behavior: CommandBehavior,
    ) -> Result<DataReader> {
        mapper::execute_reader(conn, command, behavior).await
    }

    async fn query<T>(&self, conn: &dyn Connection, command: Command) -> Result<Vec<T>>
    where
        T: FromRow + Send,
    {
        mapper::query(conn, command).await
    }

    fn query_unbuffered<'a, T>(&'a self, conn: &'a dyn Connection, command: Command) -> BoxStream<'a, Result<T>>
    where
        T: FromRow + Send + 'a,
    {
        mapper::query_unbuffered(conn, command)
    }

    async fn query_first<T>(&self, conn: &dyn Connection, command: Command) -> Result<T>
    where
        T: FromRow + Send,
    {
        mapper::query_first(conn, command).await
    }

    async fn query_first_or_default<T>(&self, conn: &dyn Connection, command: Command) -> Result<Option<T>>
    where
        T: FromRow + Send,
    {
        mapper::query_first_or_default(conn, command).await
    }

    async fn query_single<T>(&self, conn: &dyn Connection, command: Command) -> Result<T>
    where
        T: FromRow + Send,
    {
        mapper::query_single(conn, command).await
    }

    async fn query_single_or_default<T>(&self, conn: &dyn Connection, command: Command) -> Result<Option<T>>
    where
        T: FromRow + Send,
    {
        mapper::query_single_or_default(conn, command).await
    }

    async fn query_multiple(&self, conn: &dyn Connection, command: Command) -> Result<GridReader> {
        mapper::query_multiple(conn, command).await
    }

    async fn query_map<K, R, F>(
        &self,
        conn: &dyn Connection,
        command: Command,
        split_on: &str,
        map: F,
    ) -> Result<Vec<R>>
    where
        K: RowTuple + Send,
        R: Send,
        F: Fn(K) -> R + Send,
    {
        mapper::query_map(conn, command, split_on, map).await
    }

    async fn query_map_dyn<R, F>(
        &self,
        conn: &dyn Connection,
        command: Command,
        type_count: usize,
        split_on: &str,
        map: F,
    ) -> Result<Vec<R>>
    where
        R: Send,
        F: Fn(Vec<Row>) -> R + Send,
    {
        mapper::query_map_dyn(conn, command, type_count, split_on, map).await
    }

    fn parse<T: FromRow>(&self, reader: DataReader) -> Result<Vec<T>> {
        mapper::parse(reader)
    }

    fn row_parser<T: FromRow>(&self, start: usize, length: Option<usize>, none_if_first_missing: bool) -> RowParser<T> {
        mapper::row_parser(start, length, none_if_first_missing)
    }

    fn replace_literals(&self, params: &Parameters, sql: &str) -> Result<String> {
        mapper::replace_literals(params, sql)
    }
}
