use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::stream::{StreamExt, TryStreamExt};
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, error, warn};

use crate::config::MapperConfig;
use crate::error::{PgMapError, Result};
use crate::traits::{Connection, RowStream, Transaction};
use crate::types::{RawQueryResult, Row, SqlValue};

/// PostgreSQL connection implementation using tokio-postgres.
///
/// While a transaction from [`Connection::begin`] is open, commands on the
/// connection itself fail with [`PgMapError::TransactionInProgress`].
pub struct TokioPostgresConnection {
    client: Arc<Client>,
    default_timeout: Option<Duration>,
    session: SessionState,
}

impl TokioPostgresConnection {
    /// Connect to a PostgreSQL database.
    pub async fn connect(connection_string: &str) -> Result<Self> {
        Self::connect_with_config(&MapperConfig::new(connection_string)).await
    }

    /// Connect using a validated `MapperConfig`, keeping its command timeout.
    pub async fn connect_with_config(config: &MapperConfig) -> Result<Self> {
        config.validate()?;
        let (client, connection) = tokio_postgres::connect(&config.database_url, NoTls)
            .await
            .map_err(|e| PgMapError::ConnectionFailed(e.to_string()))?;

        // Spawn the connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        debug!("connected to PostgreSQL");
        Ok(Self {
            client: Arc::new(client),
            default_timeout: config.command_timeout,
            session: SessionState::default(),
        })
    }

    /// Rolls back a dropped transaction before the session is used again.
    async fn ready(&self) -> Result<()> {
        if self.session.needs_rollback()? {
            debug!("ROLLBACK of dropped transaction");
            self.client
                .batch_execute("ROLLBACK")
                .await
                .map_err(|e| PgMapError::QueryFailed(e.to_string()))?;
            self.session.rolled_back();
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for TokioPostgresConnection {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<RawQueryResult> {
        self.ready().await?;
        run_query(&self.client, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.ready().await?;
        run_execute(&self.client, sql, params).await
    }

    async fn query_multiple(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<RawQueryResult>> {
        self.ready().await?;
        run_multiple(&self.client, sql, params).await
    }

    async fn query_stream<'a>(&'a self, sql: String, params: Vec<SqlValue>) -> Result<RowStream<'a>> {
        self.ready().await?;
        run_stream(&self.client, sql, params).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.ready().await?;
        self.session.open()?;
        debug!("BEGIN");
        if let Err(e) = self.client.batch_execute("BEGIN").await {
            self.session.close();
            return Err(PgMapError::QueryFailed(e.to_string()));
        }
        Ok(Box::new(TokioPostgresTransaction {
            client: Arc::clone(&self.client),
            default_timeout: self.default_timeout,
            session: self.session.clone(),
            finished: AtomicBool::new(false),
        }))
    }

    fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }
}

const IDLE: u8 = 0;
const OPEN: u8 = 1;
const ABANDONED: u8 = 2;

/// Transaction state of the session a connection shares with its transactions.
#[derive(Debug, Default, Clone)]
struct SessionState(Arc<AtomicU8>);

impl SessionState {
    /// Errors while a transaction is open; true when a dropped one still needs `ROLLBACK`.
    fn needs_rollback(&self) -> Result<bool> {
        match self.0.load(Ordering::SeqCst) {
            OPEN => Err(PgMapError::TransactionInProgress),
            ABANDONED => Ok(true),
            _ => Ok(false),
        }
    }

    fn rolled_back(&self) {
        let _ = self
            .0
            .compare_exchange(ABANDONED, IDLE, Ordering::SeqCst, Ordering::SeqCst);
    }

    fn open(&self) -> Result<()> {
        self.0
            .compare_exchange(IDLE, OPEN, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| PgMapError::TransactionInProgress)
    }

    fn close(&self) {
        self.0.store(IDLE, Ordering::SeqCst);
    }

    fn abandon(&self) {
        let _ = self
            .0
            .compare_exchange(OPEN, ABANDONED, Ordering::SeqCst, Ordering::SeqCst);
    }
}

/// Transaction on a `TokioPostgresConnection`.
/// If dropped before `commit` or `rollback`, the connection issues `ROLLBACK`
/// ahead of its next command.
pub struct TokioPostgresTransaction {
    client: Arc<Client>,
    default_timeout: Option<Duration>,
    session: SessionState,
    finished: AtomicBool,
}

impl TokioPostgresTransaction {
    fn ensure_open(&self) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) {
            return Err(PgMapError::TransactionFinished);
        }
        Ok(())
    }

    async fn finish(&self, statement: &str) -> Result<()> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Err(PgMapError::TransactionFinished);
        }
        debug!("{statement}");
        let result = self
            .client
            .batch_execute(statement)
            .await
            .map_err(|e| PgMapError::QueryFailed(e.to_string()));
        self.session.close();
        result
    }
}

#[async_trait]
impl Connection for TokioPostgresTransaction {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<RawQueryResult> {
        self.ensure_open()?;
        run_query(&self.client, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.ensure_open()?;
        run_execute(&self.client, sql, params).await
    }

    async fn query_multiple(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<RawQueryResult>> {
        self.ensure_open()?;
        run_multiple(&self.client, sql, params).await
    }

    async fn query_stream<'a>(&'a self, sql: String, params: Vec<SqlValue>) -> Result<RowStream<'a>> {
        self.ensure_open()?;
        run_stream(&self.client, sql, params).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Err(PgMapError::Unsupported("nested transactions".to_string()))
    }

    fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }
}

#[async_trait]
impl Transaction for TokioPostgresTransaction {
    fn as_connection(&self) -> &dyn Connection {
        self
    }

    async fn commit(&self) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for TokioPostgresTransaction {
    fn drop(&mut self) {
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        warn!("transaction dropped without commit or rollback; it will be rolled back");
        self.session.abandon();
    }
}

async fn run_query(client: &Client, sql: &str, params: &[SqlValue]) -> Result<RawQueryResult> {
    debug!(sql, params = params.len(), "postgres query");
    let converted_params = to_sql_params(params);
    let param_refs: Vec<&(dyn ToSql + Sync)> = converted_params
        .iter()
        .map(|b| b.as_ref() as &(dyn ToSql + Sync))
        .collect();

    let statement = client
        .prepare(sql)
        .await
        .map_err(|e| PgMapError::QueryFailed(e.to_string()))?;
    let rows = client
        .query(&statement, &param_refs)
        .await
        .map_err(|e| PgMapError::QueryFailed(e.to_string()))?;

    // Column names come from the statement so empty results keep them
    let columns: Vec<String> = statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let result_rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| column_value(row, i)).collect())
        .collect::<Result<Vec<Vec<SqlValue>>>>()?;

    Ok(RawQueryResult::new(columns, result_rows))
}

async fn run_execute(client: &Client, sql: &str, params: &[SqlValue]) -> Result<u64> {
    debug!(sql, params = params.len(), "postgres execute");
    let converted_params = to_sql_params(params);
    let param_refs: Vec<&(dyn ToSql + Sync)> = converted_params
        .iter()
        .map(|b| b.as_ref() as &(dyn ToSql + Sync))
        .collect();

    client
        .execute(sql, &param_refs)
        .await
        .map_err(|e| PgMapError::QueryFailed(e.to_string()))
}

/// Runs a batch over the simple query protocol, which returns every value as text.
async fn run_multiple(client: &Client, sql: &str, params: &[SqlValue]) -> Result<Vec<RawQueryResult>> {
    if !params.is_empty() {
        return Err(PgMapError::Unsupported(
            "bound parameters in a multi-statement batch".to_string(),
        ));
    }
    debug!(sql, "postgres batch");
    let messages = client
        .simple_query(sql)
        .await
        .map_err(|e| PgMapError::QueryFailed(e.to_string()))?;

    let mut results = Vec::new();
    let mut current: Option<RawQueryResult> = None;
    for message in messages {
        match message {
            SimpleQueryMessage::RowDescription(columns) => {
                let columns = columns.iter().map(|c| c.name().to_string()).collect();
                current = Some(RawQueryResult::new(columns, Vec::new()));
            }
            SimpleQueryMessage::Row(row) => {
                let set = current.get_or_insert_with(|| {
                    RawQueryResult::new(
                        row.columns().iter().map(|c| c.name().to_string()).collect(),
                        Vec::new(),
                    )
                });
                let values = (0..row.len())
                    .map(|i| row.get(i).map_or(SqlValue::Null, SqlValue::from))
                    .collect();
                set.rows.push(values);
            }
            SimpleQueryMessage::CommandComplete(_) => {
                if let Some(set) = current.take() {
                    results.push(set);
                }
            }
            _ => {}
        }
    }
    if let Some(set) = current.take() {
        results.push(set);
    }
    Ok(results)
}

async fn run_stream<'a>(client: &'a Client, sql: String, params: Vec<SqlValue>) -> Result<RowStream<'a>> {
    debug!(sql = %sql, params = params.len(), "postgres stream");
    let converted_params = to_sql_params(&params);
    let param_refs = converted_params
        .iter()
        .map(|b| b.as_ref() as &(dyn ToSql + Sync));

    let rows = client
        .query_raw(sql.as_str(), param_refs)
        .await
        .map_err(|e| PgMapError::QueryFailed(e.to_string()))?;

    Ok(rows
        .map_err(|e| PgMapError::QueryFailed(e.to_string()))
        .and_then(|row| async move { convert_row(&row) })
        .boxed())
}

fn convert_row(row: &tokio_postgres::Row) -> Result<Row> {
    let columns = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values = (0..row.len())
        .map(|i| column_value(row, i))
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(columns, values))
}

/// Convert SqlValue params to boxed tokio-postgres compatible types.
fn to_sql_params(params: &[SqlValue]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    params.iter().map(sql_value_to_tosql).collect()
}

/// Convert a SqlValue to a boxed ToSql trait object.
fn sql_value_to_tosql(value: &SqlValue) -> Box<dyn ToSql + Sync + Send> {
    match value {
        SqlValue::Null => Box::new(None::<String>),
        SqlValue::Text(s) => Box::new(s.clone()),
        SqlValue::Int32(i) => Box::new(*i),
        SqlValue::Int64(i) => Box::new(*i),
        SqlValue::Float64(f) => Box::new(*f),
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::Bytes(bytes) => Box::new(bytes.clone()),
    }
}

/// Decode the value at `index` according to its column type.
/// Dates, times, JSON, UUID and NUMERIC become text; types with no text form stay raw bytes.
fn column_value(row: &tokio_postgres::Row, index: usize) -> Result<SqlValue> {
    let column = &row.columns()[index];
    let ty = column.type_();

    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(index)
            .map(|v| v.map(SqlValue::Bool))
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(index)
            .map(|v| v.map(|i| SqlValue::Int32(i32::from(i))))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(index)
            .map(|v| v.map(SqlValue::Int32))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(index)
            .map(|v| v.map(SqlValue::Int64))
    } else if *ty == Type::OID {
        row.try_get::<_, Option<u32>>(index)
            .map(|v| v.map(|i| SqlValue::Int64(i64::from(i))))
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(index)
            .map(|v| v.map(|f| SqlValue::Float64(f64::from(f))))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(index)
            .map(|v| v.map(SqlValue::Float64))
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(index)
            .map(|v| v.map(SqlValue::Bytes))
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(index)
            .map(|v| v.map(|t| SqlValue::Text(t.to_string())))
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(index)
            .map(|v| v.map(|t| SqlValue::Text(t.to_rfc3339())))
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<NaiveDate>>(index)
            .map(|v| v.map(|d| SqlValue::Text(d.to_string())))
    } else if *ty == Type::TIME {
        row.try_get::<_, Option<NaiveTime>>(index)
            .map(|v| v.map(|t| SqlValue::Text(t.to_string())))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(index)
            .map(|v| v.map(|j| SqlValue::Text(j.to_string())))
    } else if *ty == Type::UUID {
        row.try_get::<_, Option<uuid::Uuid>>(index)
            .map(|v| v.map(|u| SqlValue::Text(u.to_string())))
    } else if *ty == Type::NUMERIC {
        row.try_get::<_, Option<RawValue>>(index).map(|v| {
            v.map(|raw| {
                decode_numeric(&raw.0).map_or(SqlValue::Bytes(raw.0), SqlValue::Text)
            })
        })
    } else if <String as FromSql<'_>>::accepts(ty) {
        row.try_get::<_, Option<String>>(index)
            .map(|v| v.map(SqlValue::Text))
    } else {
        debug!(column = column.name(), ty = ty.name(), "reading column as raw bytes");
        row.try_get::<_, Option<RawValue>>(index)
            .map(|v| v.map(|raw| SqlValue::Bytes(raw.0)))
    };

    value
        .map(|v| v.unwrap_or(SqlValue::Null))
        .map_err(|_| PgMapError::ColumnConversion {
            column: column.name().to_string(),
            expected: "a supported column type",
            found: ty.name().to_string(),
        })
}

/// Binary wire value of any column type.
struct RawValue(Vec<u8>);

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(RawValue(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Renders a binary NUMERIC (base-10000 digit groups) as decimal text.
fn decode_numeric(raw: &[u8]) -> Option<String> {
    let word = |i: usize| -> Option<u16> {
        raw.get(i..i + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    };
    let ndigits = usize::from(word(0)?);
    let weight = i64::from(word(2)? as i16);
    let sign = word(4)?;
    let dscale = usize::from(word(6)?);
    let digits = (0..ndigits)
        .map(|k| word(8 + 2 * k))
        .collect::<Option<Vec<u16>>>()?;

    match sign {
        NUMERIC_NAN => return Some("NaN".to_string()),
        NUMERIC_PINF => return Some("Infinity".to_string()),
        NUMERIC_NINF => return Some("-Infinity".to_string()),
        _ => {}
    }

    let group = |k: i64| -> u16 {
        usize::try_from(k)
            .ok()
            .and_then(|k| digits.get(k).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&group(0).to_string());
        for k in 1..=weight {
            out.push_str(&format!("{:04}", group(k)));
        }
    }
    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut k = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group(k)));
            k += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_decode_numeric() {
        assert_eq!(decode_numeric(&numeric(0, 0, 2, &[123, 4500])).unwrap(), "123.45");
        assert_eq!(decode_numeric(&numeric(1, 0, 0, &[1])).unwrap(), "10000");
        assert_eq!(decode_numeric(&numeric(-1, 0, 3, &[10])).unwrap(), "0.001");
        assert_eq!(decode_numeric(&numeric(-2, 0, 5, &[1000])).unwrap(), "0.00001");
        assert_eq!(
            decode_numeric(&numeric(1, NUMERIC_NEG, 1, &[12, 3456, 7000])).unwrap(),
            "-123456.7"
        );
        assert_eq!(decode_numeric(&numeric(0, 0, 0, &[])).unwrap(), "0");
        assert_eq!(decode_numeric(&numeric(0, NUMERIC_NAN, 0, &[])).unwrap(), "NaN");
    }

    #[test]
    fn test_decode_numeric_rejects_truncated_input() {
        let mut raw = numeric(0, 0, 0, &[1, 2]);
        raw.truncate(raw.len() - 1);
        assert!(decode_numeric(&raw).is_none());
        assert!(decode_numeric(&[0, 1]).is_none());
    }

    #[test]
    fn test_session_blocks_parent_commands_while_open() {
        let session = SessionState::default();
        assert!(!session.needs_rollback().unwrap());

        session.open().unwrap();
        assert!(matches!(
            session.needs_rollback().unwrap_err(),
            PgMapError::TransactionInProgress
        ));
        assert!(matches!(
            session.open().unwrap_err(),
            PgMapError::TransactionInProgress
        ));

        session.close();
        assert!(!session.needs_rollback().unwrap());
    }

    #[test]
    fn test_dropped_transaction_is_rolled_back_before_next_command() {
        let session = SessionState::default();
        session.open().unwrap();
        session.abandon();

        assert!(session.needs_rollback().unwrap());
        assert!(session.open().is_err());

        session.rolled_back();
        assert!(!session.needs_rollback().unwrap());
        session.open().unwrap();
    }

    #[test]
    fn test_abandon_after_close_is_ignored() {
        let session = SessionState::default();
        session.open().unwrap();
        session.close();
        session.abandon();
        assert!(!session.needs_rollback().unwrap());
    }
}
