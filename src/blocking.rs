//! Synchronous front end for a `SqlMapper`.

use tokio::runtime::{Builder, Runtime};

use crate::error::{PgMapError, Result};
use crate::instance::{SqlMapper, SqlMapperInstance};
use crate::traits::{Connection, FromRow, FromSqlValue, RowTuple};
use crate::types::{Command, CommandBehavior, DataReader, GridReader, Row};

/// Runs the async methods of an inner `SqlMapper` to completion on a private
/// current-thread runtime.
///
/// Calling any method from inside an async runtime panics, as with
/// `Runtime::block_on`. Unbuffered streaming is only available on the async trait.
///
/// # Example
/// ```ignore
/// let mapper = BlockingSqlMapper::new()?;
/// let count: Option<i64> = mapper.execute_scalar(&conn, "SELECT count(*) FROM users".into())?;
/// ```
pub struct BlockingSqlMapper<M = SqlMapperInstance> {
    inner: M,
    runtime: Runtime,
}

impl BlockingSqlMapper<SqlMapperInstance> {
    pub fn new() -> Result<Self> {
        Self::with_mapper(SqlMapperInstance)
    }
}

impl<M: SqlMapper> BlockingSqlMapper<M> {
    /// Wrap a specific mapper, e.g. a stub in tests.
    pub fn with_mapper(inner: M) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PgMapError::Runtime(e.to_string()))?;
        Ok(Self { inner, runtime })
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn execute(&self, conn: &dyn Connection, command: Command) -> Result<u64> {
        self.runtime.block_on(self.inner.execute(conn, command))
    }

    pub fn execute_scalar<T>(&self, conn: &dyn Connection, command: Command) -> Result<Option<T>>
    where
        T: FromSqlValue + Send,
    {
        self.runtime.block_on(self.inner.execute_scalar(conn, command))
    }

    pub fn execute_reader(
        &self,
        conn: &dyn Connection,
        command: Command,
        behavior: CommandBehavior,
    ) -> Result<DataReader> {
        self.runtime
            .block_on(self.inner.execute_reader(conn, command, behavior))
    }

    pub fn query<T>(&self, conn: &dyn Connection, command: Command) -> Result<Vec<T>>
    where
        T: FromRow + Send,
    {
        self.runtime.block_on(self.inner.query(conn, command))
    }

    pub fn query_first<T>(&self, conn: &dyn Connection, command: Command) -> Result<T>
    where
        T: FromRow + Send,
    {
        self.runtime.block_on(self.inner.query_first(conn, command))
    }

    pub fn query_first_or_default<T>(&self, conn: &dyn Connection, command: Command) -> Result<Option<T>>
    where
        T: FromRow + Send,
    {
        self.runtime
            .block_on(self.inner.query_first_or_default(conn, command))
    }

    pub fn query_single<T>(&self, conn: &dyn Connection, command: Command) -> Result<T>
    where
        T: FromRow + Send,
    {
        self.runtime.block_on(self.inner.query_single(conn, command))
    }

    pub fn query_single_or_default<T>(&self, conn: &dyn Connection, command: Command) -> Result<Option<T>>
    where
        T: FromRow + Send,
    {
        self.runtime
            .block_on(self.inner.query_single_or_default(conn, command))
    }

    pub fn query_multiple(&self, conn: &dyn Connection, command: Command) -> Result<GridReader> {
        self.runtime.block_on(self.inner.query_multiple(conn, command))
    }

    pub fn query_map<K, R, F>(
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
        self.runtime
            .block_on(self.inner.query_map(conn, command, split_on, map))
    }

    pub fn query_map_dyn<R, F>(
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
        self.runtime
            .block_on(self.inner.query_map_dyn(conn, command, type_count, split_on, map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{InMemoryTestConnection, InMemoryTestResponseBuilder};

    #[test]
    fn test_blocking_query() {
        let conn = InMemoryTestConnection::new().with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["name"])
                .row(&["Alice"])
                .row(&["Bob"])
                .build(),
        );
        let mapper = BlockingSqlMapper::new().unwrap();

        let names: Vec<String> = mapper.query(&conn, "SELECT name FROM users".into()).unwrap();

        assert_eq!(names, vec!["Alice".to_string(), "Bob".to_string()]);
        conn.assert_last_query("SELECT name FROM users", &[]);
    }

    #[test]
    fn test_blocking_execute() {
        let conn = InMemoryTestConnection::new().with_rows_affected(3);
        let mapper = BlockingSqlMapper::new().unwrap();

        let affected = mapper
            .execute(&conn, Command::new("DELETE FROM users WHERE id = @id").bind("id", 7))
            .unwrap();

        assert_eq!(affected, 3);
        conn.assert_last_query("DELETE FROM users WHERE id = $1", &[7.into()]);
    }
}
