//! The mapping API: free functions that run a `Command` on a `Connection` and map
//! the rows onto Rust types.
//!
//! Every function prepares the command first: `{=name}` literals are inlined, named
//! parameters are rewritten to `$n` placeholders, stored-procedure and table-direct
//! commands are expanded to SQL, and the command (or connection) timeout is applied.

mod params;
mod split;

use std::future::Future;

use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::debug;

use crate::error::{PgMapError, Result};
use crate::traits::{Connection, FromRow, FromSqlValue, RowTuple};
use crate::types::{
    single, Command, CommandBehavior, DataReader, GridReader, Parameters, Row, RowParser, SqlValue,
};

use self::params::{prepare, Purpose};

pub use self::split::DEFAULT_SPLIT_ON;

/// Execute a command and return the number of rows affected.
pub async fn execute(conn: &dyn Connection, command: Command) -> Result<u64> {
    let (sql, params) = prepare(&command, Purpose::Execute)?;
    debug!(sql = %sql, params = params.len(), "execute");
    with_timeout(conn, &command, conn.execute(&sql, &params)).await
}

/// Execute a command and return the first column of the first row.
/// Returns `None` when there is no row or the value is null.
pub async fn execute_scalar<T: FromSqlValue>(conn: &dyn Connection, command: Command) -> Result<Option<T>> {
    let mut rows = take_rows(conn, command, 1).await?;
    match rows.pop() {
        Some(row) => match row.values().first() {
            None | Some(SqlValue::Null) => Ok(None),
            Some(_) => row.get_idx(0).map(Some),
        },
        None => Ok(None),
    }
}

/// Execute a command and return a reader over its result set.
pub async fn execute_reader(
    conn: &dyn Connection,
    command: Command,
    behavior: CommandBehavior,
) -> Result<DataReader> {
    let (sql, params) = prepare(&command, Purpose::Query)?;
    debug!(sql = %sql, params = params.len(), ?behavior, "execute_reader");
    let raw = with_timeout(conn, &command, conn.query(&sql, &params)).await?;
    let mut reader = DataReader::from_raw(raw);
    match behavior {
        CommandBehavior::SingleRow => reader.truncate(1),
        CommandBehavior::SchemaOnly => reader.truncate(0),
        CommandBehavior::Default | CommandBehavior::SingleResult => {}
    }
    Ok(reader)
}

/// Run a query and map every row, reading the whole result first.
pub async fn query<T: FromRow>(conn: &dyn Connection, command: Command) -> Result<Vec<T>> {
    let (sql, params) = prepare(&command, Purpose::Query)?;
    debug!(sql = %sql, params = params.len(), "query");
    let raw = with_timeout(conn, &command, conn.query(&sql, &params)).await?;
    raw.into_rows().iter().map(T::from_row).collect()
}

/// Run a query and map rows lazily as the connection yields them.
/// The timeout covers starting the query, not draining the stream.
pub fn query_unbuffered<'a, T>(conn: &'a dyn Connection, command: Command) -> BoxStream<'a, Result<T>>
where
    T: FromRow + Send + 'a,
{
    let opened = async move {
        let (sql, params) = prepare(&command, Purpose::Query)?;
        debug!(sql = %sql, params = params.len(), "query_unbuffered");
        with_timeout(conn, &command, conn.query_stream(sql, params)).await
    };
    stream::once(opened)
        .try_flatten()
        .map(|row| row.and_then(|row| T::from_row(&row)))
        .boxed()
}

/// Map the first row. Fails when there is none.
pub async fn query_first<T: FromRow>(conn: &dyn Connection, command: Command) -> Result<T> {
    query_first_or_default(conn, command)
        .await?
        .ok_or(PgMapError::UnexpectedRowCount {
            expected: 1,
            actual: 0,
        })
}

/// Map the first row, or `None` when there is none.
pub async fn query_first_or_default<T: FromRow>(conn: &dyn Connection, command: Command) -> Result<Option<T>> {
    let rows = take_rows(conn, command, 1).await?;
    rows.first().map(T::from_row).transpose()
}

/// Map the only row. Fails when there is none or more than one.
pub async fn query_single<T: FromRow>(conn: &dyn Connection, command: Command) -> Result<T> {
    query_single_or_default(conn, command)
        .await?
        .ok_or(PgMapError::UnexpectedRowCount {
            expected: 1,
            actual: 0,
        })
}

/// Map the only row, or `None` when there is none. Fails when there is more than one.
pub async fn query_single_or_default<T: FromRow>(conn: &dyn Connection, command: Command) -> Result<Option<T>> {
    let rows = take_rows(conn, command, 2).await?;
    single(rows)
}

/// Run a batch returning several result sets, read through a `GridReader`.
pub async fn query_multiple(conn: &dyn Connection, command: Command) -> Result<GridReader> {
    let (sql, params) = prepare(&command, Purpose::Query)?;
    debug!(sql = %sql, params = params.len(), "query_multiple");
    let grids = with_timeout(conn, &command, conn.query_multiple(&sql, &params)).await?;
    Ok(GridReader::new(grids))
}

/// Split each row into one column window per tuple member, map each window,
/// and combine them with `map`.
///
/// # Example
/// ```ignore
/// let posts = pgmap::mapper::query_map(
///     &conn,
///     Command::new("SELECT p.id, p.title, u.id, u.name FROM posts p JOIN users u ON u.id = p.owner"),
///     "id",
///     |(post, user): (Post, User)| Post { owner: Some(user), ..post },
/// )
/// .await?;
/// ```
pub async fn query_map<K, R, F>(conn: &dyn Connection, command: Command, split_on: &str, map: F) -> Result<Vec<R>>
where
    K: RowTuple,
    F: Fn(K) -> R,
{
    let rows = query_split(conn, command, K::ARITY, split_on).await?;
    rows.iter()
        .map(|parts| K::from_parts(parts).map(&map))
        .collect()
}

/// Like `query_map`, with the number of windows chosen at run time and the raw
/// windows handed to `map`.
pub async fn query_map_dyn<R, F>(
    conn: &dyn Connection,
    command: Command,
    type_count: usize,
    split_on: &str,
    map: F,
) -> Result<Vec<R>>
where
    F: Fn(Vec<Row>) -> R,
{
    if type_count == 0 {
        return Err(PgMapError::Unsupported("multi-mapping needs at least one type".to_string()));
    }
    let rows = query_split(conn, command, type_count, split_on).await?;
    Ok(rows.into_iter().map(map).collect())
}

/// Map the rows left in a reader.
pub fn parse<T: FromRow>(reader: DataReader) -> Result<Vec<T>> {
    reader.map(|row| T::from_row(&row)).collect()
}

/// Build a parser for the column window `[start, start + length)`.
/// A `length` of `None` runs to the end of the row.
pub fn row_parser<T: FromRow>(start: usize, length: Option<usize>, none_if_first_missing: bool) -> RowParser<T> {
    RowParser::new(start, length, none_if_first_missing)
}

/// Replace `{=name}` tokens in `sql` with the SQL literal of the named parameter.
pub fn replace_literals(params: &Parameters, sql: &str) -> Result<String> {
    params::replace_literals(params, sql)
}

async fn query_split(
    conn: &dyn Connection,
    command: Command,
    type_count: usize,
    split_on: &str,
) -> Result<Vec<Vec<Row>>> {
    let (sql, params) = prepare(&command, Purpose::Query)?;
    debug!(sql = %sql, params = params.len(), type_count, split_on, "query_map");
    let raw = with_timeout(conn, &command, conn.query(&sql, &params)).await?;
    if raw.rows.is_empty() {
        return Ok(Vec::new());
    }
    let starts = split::split_points(&raw.columns, type_count, split_on)?;
    Ok(raw
        .into_rows()
        .iter()
        .map(|row| split::split_row(row, &starts))
        .collect())
}

/// Reads at most `limit` rows through the connection's row stream.
async fn take_rows(conn: &dyn Connection, command: Command, limit: usize) -> Result<Vec<Row>> {
    let (sql, params) = prepare(&command, Purpose::Query)?;
    debug!(sql = %sql, params = params.len(), limit, "query rows");
    let read = async {
        let rows = conn.query_stream(sql, params).await?;
        rows.take(limit).try_collect::<Vec<_>>().await
    };
    with_timeout(conn, &command, read).await
}

async fn with_timeout<T, Fut>(conn: &dyn Connection, command: &Command, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match command.timeout.or_else(|| conn.default_timeout()) {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| PgMapError::Timeout(limit))?,
        None => fut.await,
    }
}
