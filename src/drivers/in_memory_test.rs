use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{PgMapError, Result};
use crate::traits::{Connection, Transaction};
use crate::types::{RawQueryResult, SqlValue};

/// A recorded statement for verification.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// A scripted reply to the next statement.
#[derive(Debug, Clone, PartialEq)]
pub enum TestResponse {
    Rows(RawQueryResult),
    RowsAffected(u64),
    ResultSets(Vec<RawQueryResult>),
    Error(String),
}

#[derive(Default)]
struct Shared {
    responses: Mutex<VecDeque<TestResponse>>,
    recorded_queries: Mutex<Vec<RecordedQuery>>,
}

impl Shared {
    fn record(&self, sql: &str, params: &[SqlValue]) {
        self.recorded_queries.lock().unwrap().push(RecordedQuery {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
    }

    fn next_response(&self) -> Option<TestResponse> {
        self.responses.lock().unwrap().pop_front()
    }
}

/// Settings copied into every transaction started from a connection.
#[derive(Clone)]
struct Settings {
    default_response: RawQueryResult,
    delay: Option<Duration>,
    default_timeout: Option<Duration>,
}

/// An in-memory connection for testing.
///
/// Replies with pre-configured responses and records every statement it receives.
/// Transactions started from it share the same response queue and record.
///
/// # Example
/// ```
/// use pgmap::drivers::{InMemoryTestConnection, InMemoryTestResponseBuilder};
///
/// let conn = InMemoryTestConnection::new().with_response(
///     InMemoryTestResponseBuilder::new()
///         .columns(&["id", "name"])
///         .row(&["1", "Alice"])
///         .build(),
/// );
/// ```
pub struct InMemoryTestConnection {
    shared: Arc<Shared>,
    settings: Settings,
}

impl InMemoryTestConnection {
    /// Create a new in-memory test connection with no pre-configured responses.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            settings: Settings {
                default_response: RawQueryResult::empty(),
                delay: None,
                default_timeout: None,
            },
        }
    }

    /// Add a result set to be returned by the next statement.
    /// Responses are returned in FIFO order.
    pub fn with_response(self, response: RawQueryResult) -> Self {
        self.push(TestResponse::Rows(response))
    }

    /// Add multiple result sets to be returned by subsequent statements.
    pub fn with_responses(self, responses: impl IntoIterator<Item = RawQueryResult>) -> Self {
        let mut queue = self.shared.responses.lock().unwrap();
        for response in responses {
            queue.push_back(TestResponse::Rows(response));
        }
        drop(queue);
        self
    }

    /// Reply to the next statement with a row count.
    pub fn with_rows_affected(self, rows: u64) -> Self {
        self.push(TestResponse::RowsAffected(rows))
    }

    /// Reply to the next statement with several result sets.
    pub fn with_result_sets(self, results: Vec<RawQueryResult>) -> Self {
        self.push(TestResponse::ResultSets(results))
    }

    /// Fail the next statement with `PgMapError::QueryFailed`.
    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.push(TestResponse::Error(message.into()))
    }

    /// Set a default response to use when no queued responses remain.
    pub fn with_default_response(mut self, response: RawQueryResult) -> Self {
        self.settings.default_response = response;
        self
    }

    /// Wait this long before answering each statement.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.settings.delay = Some(delay);
        self
    }

    /// Report a connection-wide command timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.settings.default_timeout = Some(timeout);
        self
    }

    fn push(self, response: TestResponse) -> Self {
        self.shared.responses.lock().unwrap().push_back(response);
        self
    }

    /// Get all recorded statements that have been executed.
    pub fn recorded_queries(&self) -> Vec<RecordedQuery> {
        self.shared.recorded_queries.lock().unwrap().clone()
    }

    /// Get the last recorded statement, if any.
    pub fn last_query(&self) -> Option<RecordedQuery> {
        self.shared.recorded_queries.lock().unwrap().last().cloned()
    }

    /// Clear all recorded statements.
    pub fn clear_recorded_queries(&self) {
        self.shared.recorded_queries.lock().unwrap().clear();
    }

    /// Assert that the last statement matches the expected SQL and parameters.
    pub fn assert_last_query(&self, expected_sql: &str, expected_params: &[SqlValue]) {
        let last = self.last_query().expect("No queries were recorded");
        assert_eq!(
            last.sql, expected_sql,
            "SQL mismatch.\nExpected: {}\nActual: {}",
            expected_sql, last.sql
        );
        assert_eq!(
            last.params, expected_params,
            "Parameters mismatch.\nExpected: {:?}\nActual: {:?}",
            expected_params, last.params
        );
    }

    /// Assert that exactly n statements were executed.
    pub fn assert_query_count(&self, expected: usize) {
        let actual = self.shared.recorded_queries.lock().unwrap().len();
        assert_eq!(
            actual, expected,
            "Query count mismatch. Expected: {}, Actual: {}",
            expected, actual
        );
    }
}

impl Default for InMemoryTestConnection {
    fn default() -> Self {
        Self::new()
    }
}

async fn respond(
    shared: &Shared,
    settings: &Settings,
    sql: &str,
    params: &[SqlValue],
) -> Result<TestResponse> {
    shared.record(sql, params);

    if let Some(delay) = settings.delay {
        tokio::time::sleep(delay).await;
    }

    // Return next queued response or default
    match shared
        .next_response()
        .unwrap_or_else(|| TestResponse::Rows(settings.default_response.clone()))
    {
        TestResponse::Error(message) => Err(PgMapError::QueryFailed(message)),
        response => Ok(response),
    }
}

fn into_rows(response: TestResponse) -> RawQueryResult {
    match response {
        TestResponse::Rows(rows) => rows,
        TestResponse::ResultSets(sets) => sets.into_iter().next().unwrap_or_else(RawQueryResult::empty),
        TestResponse::RowsAffected(_) | TestResponse::Error(_) => RawQueryResult::empty(),
    }
}

fn into_rows_affected(response: TestResponse) -> u64 {
    match response {
        TestResponse::RowsAffected(n) => n,
        TestResponse::Rows(rows) => rows.rows.len() as u64,
        TestResponse::ResultSets(_) | TestResponse::Error(_) => 0,
    }
}

fn into_result_sets(response: TestResponse) -> Vec<RawQueryResult> {
    match response {
        TestResponse::ResultSets(sets) => sets,
        TestResponse::Rows(rows) => vec![rows],
        TestResponse::RowsAffected(_) | TestResponse::Error(_) => Vec::new(),
    }
}

#[async_trait]
impl Connection for InMemoryTestConnection {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<RawQueryResult> {
        respond(&self.shared, &self.settings, sql, params)
            .await
            .map(into_rows)
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        respond(&self.shared, &self.settings, sql, params)
            .await
            .map(into_rows_affected)
    }

    async fn query_multiple(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<RawQueryResult>> {
        respond(&self.shared, &self.settings, sql, params)
            .await
            .map(into_result_sets)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.shared.record("BEGIN", &[]);
        Ok(Box::new(InMemoryTestTransaction {
            shared: Arc::clone(&self.shared),
            settings: self.settings.clone(),
            finished: AtomicBool::new(false),
        }))
    }

    fn default_timeout(&self) -> Option<Duration> {
        self.settings.default_timeout
    }
}

/// Transaction handle returned by `InMemoryTestConnection::begin`.
/// Records `COMMIT` or `ROLLBACK` on the parent connection.
pub struct InMemoryTestTransaction {
    shared: Arc<Shared>,
    settings: Settings,
    finished: AtomicBool,
}

impl InMemoryTestTransaction {
    fn ensure_open(&self) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) {
            return Err(PgMapError::TransactionFinished);
        }
        Ok(())
    }

    fn finish(&self, statement: &str) -> Result<()> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Err(PgMapError::TransactionFinished);
        }
        self.shared.record(statement, &[]);
        Ok(())
    }
}

#[async_trait]
impl Connection for InMemoryTestTransaction {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<RawQueryResult> {
        self.ensure_open()?;
        respond(&self.shared, &self.settings, sql, params)
            .await
            .map(into_rows)
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.ensure_open()?;
        respond(&self.shared, &self.settings, sql, params)
            .await
            .map(into_rows_affected)
    }

    async fn query_multiple(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<RawQueryResult>> {
        self.ensure_open()?;
        respond(&self.shared, &self.settings, sql, params)
            .await
            .map(into_result_sets)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Err(PgMapError::Unsupported("nested transactions".to_string()))
    }

    fn default_timeout(&self) -> Option<Duration> {
        self.settings.default_timeout
    }
}

#[async_trait]
impl Transaction for InMemoryTestTransaction {
    fn as_connection(&self) -> &dyn Connection {
        self
    }

    async fn commit(&self) -> Result<()> {
        self.finish("COMMIT")
    }

    async fn rollback(&self) -> Result<()> {
        self.finish("ROLLBACK")
    }
}

/// Builder for creating test responses easily.
pub struct InMemoryTestResponseBuilder {
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
}

impl InMemoryTestResponseBuilder {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Set the column names for the response.
    pub fn columns(mut self, cols: &[&str]) -> Self {
        self.columns = cols.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Add a row of text values, as a text-protocol driver would return them.
    pub fn row(mut self, values: &[&str]) -> Self {
        self.rows
            .push(values.iter().map(|s| SqlValue::from(*s)).collect());
        self
    }

    /// Add a row of typed values.
    pub fn values(mut self, values: Vec<SqlValue>) -> Self {
        self.rows.push(values);
        self
    }

    /// Build the RawQueryResult.
    pub fn build(self) -> RawQueryResult {
        RawQueryResult::new(self.columns, self.rows)
    }
}

impl Default for InMemoryTestResponseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_responses_are_fifo_then_default() {
        let conn = InMemoryTestConnection::new()
            .with_rows_affected(2)
            .with_response(InMemoryTestResponseBuilder::new().columns(&["a"]).row(&["x"]).build())
            .with_default_response(InMemoryTestResponseBuilder::new().columns(&["d"]).build());

        assert_eq!(conn.execute("UPDATE t SET a = 1", &[]).await.unwrap(), 2);
        assert_eq!(conn.query("SELECT a FROM t", &[]).await.unwrap().rows.len(), 1);
        assert_eq!(
            conn.query("SELECT d FROM t", &[]).await.unwrap().columns,
            vec!["d".to_string()]
        );
        conn.assert_query_count(3);
    }

    #[tokio::test]
    async fn test_error_response() {
        let conn = InMemoryTestConnection::new().with_error("boom");
        let err = conn.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, PgMapError::QueryFailed(message) if message == "boom"));
    }

    #[tokio::test]
    async fn test_transaction_records_and_finishes_once() {
        let conn = InMemoryTestConnection::new().with_rows_affected(1);
        let tx = conn.begin().await.unwrap();

        tx.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(tx.rollback().await, Err(PgMapError::TransactionFinished)));
        assert!(matches!(
            tx.query("SELECT 1", &[]).await,
            Err(PgMapError::TransactionFinished)
        ));
        let sql: Vec<String> = conn.recorded_queries().into_iter().map(|q| q.sql).collect();
        assert_eq!(sql, vec!["BEGIN", "INSERT INTO t VALUES (1)", "COMMIT"]);
    }
}
