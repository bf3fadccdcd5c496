//! Resilient statement execution.
//!
//! Every statement runs through a classification-aware retry loop: up to
//! `retry_max_attempts` attempts, each against a freshly acquired pooled
//! connection with the statement timeout applied as a separate preparatory
//! statement. Structural failures (bad statement, unknown column or
//! relation, constraint violation) are never retried; connectivity and
//! contention failures back off exponentially (`base * 2^(attempt-1)`)
//! before the next attempt. Connections are released on every path by
//! pool-handle drop.
//!
//! Classification prefers the driver's structured error kinds and SQLite
//! primary result codes; message inspection is the last resort.

use std::time::Duration;

use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::Sqlite;
use tracing::{debug, warn};

use super::Database;
use crate::error::{QuarryError, Result};

/// A validated value bound to a statement parameter.
///
/// Construction is the validation boundary: anything a caller wants to bind
/// must reduce to one of these shapes before the statement reaches the
/// store. Structured documents are serialized to JSON text.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn text(value: impl Into<String>) -> Self {
        SqlValue::Text(value.into())
    }

    pub fn opt_text(value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => SqlValue::Text(v.into()),
            None => SqlValue::Null,
        }
    }

    /// Serialize a JSON document for binding, or `Null` for `None`.
    pub fn opt_json(value: Option<&Value>) -> Result<Self> {
        match value {
            Some(v) => Self::from_json(v),
            None => Ok(SqlValue::Null),
        }
    }

    /// Validate and convert an arbitrary JSON value into a bindable shape.
    ///
    /// Objects and arrays are serialized to JSON text; numbers that fit
    /// neither `i64` nor a finite `f64` are rejected with an error naming
    /// the offending value.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(SqlValue::Null),
            Value::Bool(b) => Ok(SqlValue::Boolean(*b)),
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(SqlValue::Integer(i))
                } else if let Some(f) = n.as_f64().filter(|f| f.is_finite()) {
                    Ok(SqlValue::Real(f))
                } else {
                    Err(QuarryError::Validation(format!(
                        "unsupported numeric parameter: {n}"
                    )))
                }
            }
            Value::Array(_) | Value::Object(_) => {
                Ok(SqlValue::Text(serde_json::to_string(value)?))
            }
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Boolean(value)
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_params<'q>(mut query: SqliteQuery<'q>, params: &[SqlValue]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Text(s) => query.bind(s.clone()),
            SqlValue::Integer(i) => query.bind(*i),
            SqlValue::Real(f) => query.bind(*f),
            SqlValue::Boolean(b) => query.bind(*b),
            SqlValue::Blob(b) => query.bind(b.clone()),
        };
    }
    query
}

/// How a store failure should be handled by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorClass {
    /// Structural and retry-proof. Propagated immediately.
    Fatal,
    /// Worth retrying on a new connection.
    Transient,
}

pub(crate) fn classify(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::Database(db) => classify_database(db.as_ref()),
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Protocol(_) => ErrorClass::Transient,
        sqlx::Error::Configuration(_)
        | sqlx::Error::RowNotFound
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_) => ErrorClass::Fatal,
        other => classify_message(&other.to_string()),
    }
}

fn classify_database(db: &dyn sqlx::error::DatabaseError) -> ErrorClass {
    use sqlx::error::ErrorKind;

    match db.kind() {
        ErrorKind::UniqueViolation
        | ErrorKind::ForeignKeyViolation
        | ErrorKind::NotNullViolation
        | ErrorKind::CheckViolation => return ErrorClass::Fatal,
        _ => {}
    }

    // SQLite primary result codes (low byte of the extended code):
    //   1 ERROR (syntax, missing table/column), 19 CONSTRAINT, 20 MISMATCH,
    //   23 AUTH, 25 RANGE -> fatal
    //   5 BUSY, 6 LOCKED, 7 NOMEM, 9 INTERRUPT, 10 IOERR -> transient
    if let Some(code) = db.code().and_then(|c| c.parse::<i64>().ok()) {
        return match code & 0xff {
            1 | 19 | 20 | 23 | 25 => ErrorClass::Fatal,
            5 | 6 | 7 | 9 | 10 => ErrorClass::Transient,
            _ => classify_message(db.message()),
        };
    }

    classify_message(db.message())
}

/// Last-resort classification when no structured code is available.
fn classify_message(message: &str) -> ErrorClass {
    let m = message.to_ascii_lowercase();
    if m.contains("syntax error")
        || m.contains("no such table")
        || m.contains("no such column")
        || m.contains("no such function")
        || m.contains("constraint")
        || m.contains("malformed")
    {
        ErrorClass::Fatal
    } else {
        ErrorClass::Transient
    }
}

/// Backoff before retrying attempt `attempt + 1`: `base * 2^(attempt-1)`.
pub(crate) fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(10);
    base.saturating_mul(2u32.pow(exp))
}

/// Run `attempt_fn` up to `max_attempts` times, sleeping the exponential
/// backoff between transient failures. Fatal failures return immediately
/// after a single attempt.
pub(crate) async fn retry_loop<T, F>(
    max_attempts: u32,
    base_delay: Duration,
    mut attempt_fn: F,
) -> Result<T>
where
    F: AsyncFnMut(u32) -> std::result::Result<T, sqlx::Error>,
{
    let mut last_message = String::new();
    for attempt in 1..=max_attempts {
        match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => match classify(&err) {
                ErrorClass::Fatal => {
                    return Err(QuarryError::FatalQuery {
                        message: err.to_string(),
                    });
                }
                ErrorClass::Transient => {
                    warn!(attempt, max_attempts, error = %err, "transient store error");
                    last_message = err.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(backoff_delay(attempt, base_delay)).await;
                    }
                }
            },
        }
    }
    Err(QuarryError::TransientQuery {
        message: last_message,
        attempts: max_attempts,
    })
}

impl Database {
    /// Execute a parameterized statement and return all rows.
    ///
    /// Each attempt acquires a fresh connection; a failed connection is
    /// never reused.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqliteRow>> {
        let pool = self.ensure_initialized().await?.clone();
        let config = self.config();
        let pragma = format!(
            "PRAGMA busy_timeout = {}",
            config.statement_timeout.as_millis()
        );

        retry_loop(
            config.retry_max_attempts,
            config.retry_base_delay,
            async |attempt| {
                debug!(attempt, "executing statement");
                let mut conn = pool.acquire().await?;
                sqlx::query(&pragma).execute(&mut *conn).await?;
                bind_params(sqlx::query(sql), params)
                    .fetch_all(&mut *conn)
                    .await
            },
        )
        .await
    }

    /// Execute a parameterized write statement and return rows affected.
    pub async fn execute_write(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let pool = self.ensure_initialized().await?.clone();
        let config = self.config();
        let pragma = format!(
            "PRAGMA busy_timeout = {}",
            config.statement_timeout.as_millis()
        );

        retry_loop(
            config.retry_max_attempts,
            config.retry_base_delay,
            async |attempt| {
                debug!(attempt, "executing write statement");
                let mut conn = pool.acquire().await?;
                sqlx::query(&pragma).execute(&mut *conn).await?;
                bind_params(sqlx::query(sql), params)
                    .execute(&mut *conn)
                    .await
                    .map(|result| result.rows_affected())
            },
        )
        .await
    }

    /// Execute a statement expected to return at most one row.
    pub async fn fetch_optional(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<SqliteRow>> {
        let mut rows = self.execute(sql, params).await?;
        if rows.len() > 1 {
            warn!(rows = rows.len(), "fetch_optional statement returned multiple rows");
        }
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use serde_json::json;

    #[test]
    fn test_backoff_delay_doubles() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(1, base), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, base), Duration::from_millis(1000));
        assert_eq!(backoff_delay(3, base), Duration::from_millis(2000));
    }

    #[test]
    fn test_classify_message_fallback() {
        assert_eq!(classify_message("near \"SELEC\": syntax error"), ErrorClass::Fatal);
        assert_eq!(classify_message("no such table: widgets"), ErrorClass::Fatal);
        assert_eq!(classify_message("UNIQUE constraint failed"), ErrorClass::Fatal);
        assert_eq!(classify_message("connection reset by peer"), ErrorClass::Transient);
        assert_eq!(classify_message("database is locked"), ErrorClass::Transient);
    }

    #[test]
    fn test_classify_pool_errors_transient() {
        assert_eq!(classify(&sqlx::Error::PoolTimedOut), ErrorClass::Transient);
        assert_eq!(classify(&sqlx::Error::PoolClosed), ErrorClass::Transient);
    }

    #[test]
    fn test_classify_structural_errors_fatal() {
        assert_eq!(
            classify(&sqlx::Error::ColumnNotFound("nope".to_string())),
            ErrorClass::Fatal
        );
        assert_eq!(classify(&sqlx::Error::RowNotFound), ErrorClass::Fatal);
    }

    #[test]
    fn test_sql_value_from_json() {
        assert_eq!(SqlValue::from_json(&json!(null)).unwrap(), SqlValue::Null);
        assert_eq!(
            SqlValue::from_json(&json!("hi")).unwrap(),
            SqlValue::Text("hi".to_string())
        );
        assert_eq!(SqlValue::from_json(&json!(7)).unwrap(), SqlValue::Integer(7));
        assert_eq!(
            SqlValue::from_json(&json!(1.5)).unwrap(),
            SqlValue::Real(1.5)
        );
        assert_eq!(
            SqlValue::from_json(&json!(true)).unwrap(),
            SqlValue::Boolean(true)
        );
        // Structured documents are serialized before binding
        let bound = SqlValue::from_json(&json!({"b": 1, "a": 2})).unwrap();
        match bound {
            SqlValue::Text(text) => {
                let round: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(round, json!({"a": 2, "b": 1}));
            }
            other => panic!("expected serialized text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retry_loop_recovers_from_transient_failures() {
        let mut calls = 0u32;
        let result = retry_loop(3, Duration::from_millis(5), async |_attempt| {
            calls += 1;
            if calls < 3 {
                Err(sqlx::Error::PoolTimedOut)
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_retry_loop_fatal_stops_after_one_attempt() {
        let mut calls = 0u32;
        let result: Result<()> = retry_loop(3, Duration::from_millis(5), async |_attempt| {
            calls += 1;
            Err(sqlx::Error::ColumnNotFound("missing".to_string()))
        })
        .await;

        assert!(matches!(result, Err(QuarryError::FatalQuery { .. })));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_retry_loop_exhaustion_reports_attempts_and_backs_off() {
        let base = Duration::from_millis(20);
        let started = Instant::now();
        let mut calls = 0u32;
        let result: Result<()> = retry_loop(3, base, async |_attempt| {
            calls += 1;
            Err(sqlx::Error::PoolTimedOut)
        })
        .await;

        let elapsed = started.elapsed();
        match result {
            Err(QuarryError::TransientQuery { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected transient exhaustion, got {other:?}"),
        }
        assert_eq!(calls, 3);
        // Two sleeps: base + 2*base
        assert!(elapsed >= base * 3, "elapsed {elapsed:?} < {:?}", base * 3);
    }
}
