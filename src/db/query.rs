use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use mysql_async::prelude::Queryable;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_postgres::types::Type;
use tokio_postgres::Row;

use crate::db::connection::{Backend, Connection};
use crate::error::{Error, Result};

/// Row sets handed across the system boundary are truncated to this many
/// entries; the untruncated count is preserved alongside.
pub const MAX_RESULT_ROWS: usize = 50;

/// Normalized result of a single statement, identical in shape for both
/// engines. Headers and rows are empty for statements without a result set
/// (DDL/DML), in which case `row_count` is the affected-row count.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub row_count: u64,
    pub elapsed: Duration,
}

impl Connection {
    /// Run arbitrary SQL, timing the single backend call with a monotonic
    /// clock. The backend's autocommit behavior is left untouched. Bad SQL,
    /// permission failures, and constraint violations come back as
    /// `Error::Query` wrapping the native error; the session stays usable.
    pub async fn execute(&mut self, sql: &str) -> Result<QueryOutcome> {
        let sql = sql.trim();
        match &mut self.backend {
            Backend::Postgres(client) => {
                if returns_rows(sql) {
                    let start = Instant::now();
                    let rows = client
                        .query(sql, &[])
                        .await
                        .map_err(|e| Error::Query(e.to_string()))?;
                    let elapsed = start.elapsed();
                    Ok(outcome_from_pg_rows(&rows, elapsed))
                } else {
                    let start = Instant::now();
                    let affected = client
                        .execute(sql, &[])
                        .await
                        .map_err(|e| Error::Query(e.to_string()))?;
                    let elapsed = start.elapsed();
                    Ok(QueryOutcome {
                        headers: vec![],
                        rows: vec![],
                        row_count: affected,
                        elapsed,
                    })
                }
            }
            Backend::Mysql(conn) => {
                if returns_rows(sql) {
                    let start = Instant::now();
                    let rows: Vec<mysql_async::Row> = conn
                        .query(sql)
                        .await
                        .map_err(|e| Error::Query(e.to_string()))?;
                    let elapsed = start.elapsed();
                    Ok(outcome_from_mysql_rows(&rows, elapsed))
                } else {
                    let start = Instant::now();
                    conn.query_drop(sql)
                        .await
                        .map_err(|e| Error::Query(e.to_string()))?;
                    let elapsed = start.elapsed();
                    Ok(QueryOutcome {
                        headers: vec![],
                        rows: vec![],
                        row_count: conn.affected_rows(),
                        elapsed,
                    })
                }
            }
        }
    }

    /// Run the engine's explain variant of a statement and fold the plan
    /// into one text block, newline-joining the first column of every row.
    /// Diagnostic only: the packager downgrades failures here to an empty
    /// plan instead of aborting the pipeline.
    pub async fn explain(&mut self, sql: &str) -> Result<String> {
        let statement = self.params.engine.explain_statement(sql.trim());
        let outcome = self.execute(&statement).await?;
        let lines: Vec<&str> = outcome
            .rows
            .iter()
            .filter_map(|row| row.first())
            .map(String::as_str)
            .collect();
        Ok(lines.join("\n"))
    }
}

/// Statements that produce a result set go through the row-returning query
/// path; everything else is executed for its affected-row count.
fn returns_rows(sql: &str) -> bool {
    let upper = sql.to_uppercase();
    upper.starts_with("SELECT")
        || upper.starts_with("WITH")
        || upper.starts_with("SHOW")
        || upper.starts_with("EXPLAIN")
        || upper.starts_with("TABLE")
        || upper.starts_with("VALUES")
}

fn outcome_from_pg_rows(rows: &[Row], elapsed: Duration) -> QueryOutcome {
    let Some(first_row) = rows.first() else {
        return QueryOutcome {
            headers: vec![],
            rows: vec![],
            row_count: 0,
            elapsed,
        };
    };

    let headers: Vec<String> = first_row
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();

    let rendered: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            row.columns()
                .iter()
                .enumerate()
                .map(|(i, col)| render_pg_value(row, i, col.type_()))
                .collect()
        })
        .collect();

    let row_count = rendered.len() as u64;
    QueryOutcome {
        headers,
        rows: rendered,
        row_count,
        elapsed,
    }
}

fn outcome_from_mysql_rows(rows: &[mysql_async::Row], elapsed: Duration) -> QueryOutcome {
    let Some(first_row) = rows.first() else {
        return QueryOutcome {
            headers: vec![],
            rows: vec![],
            row_count: 0,
            elapsed,
        };
    };

    let headers: Vec<String> = first_row
        .columns_ref()
        .iter()
        .map(|col| col.name_str().into_owned())
        .collect();

    let rendered: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            (0..headers.len())
                .map(|i| {
                    let value = row
                        .get::<mysql_async::Value, _>(i)
                        .unwrap_or(mysql_async::Value::NULL);
                    render_mysql_value(&value)
                })
                .collect()
        })
        .collect();

    let row_count = rendered.len() as u64;
    QueryOutcome {
        headers,
        rows: rendered,
        row_count,
        elapsed,
    }
}

fn render_pg_value(row: &Row, idx: usize, pg_type: &Type) -> String {
    fn render<T: ToString>(value: Option<T>) -> String {
        value
            .map(|v| v.to_string())
            .unwrap_or_else(|| "NULL".to_string())
    }

    match *pg_type {
        Type::BOOL => render(row.try_get::<_, Option<bool>>(idx).ok().flatten()),
        Type::INT2 => render(row.try_get::<_, Option<i16>>(idx).ok().flatten()),
        Type::INT4 => render(row.try_get::<_, Option<i32>>(idx).ok().flatten()),
        Type::INT8 => render(row.try_get::<_, Option<i64>>(idx).ok().flatten()),
        Type::FLOAT4 => render(row.try_get::<_, Option<f32>>(idx).ok().flatten()),
        Type::FLOAT8 | Type::NUMERIC => render(row.try_get::<_, Option<f64>>(idx).ok().flatten()),
        Type::DATE => render(row.try_get::<_, Option<NaiveDate>>(idx).ok().flatten()),
        Type::TIME => render(row.try_get::<_, Option<NaiveTime>>(idx).ok().flatten()),
        Type::TIMESTAMP => render(row.try_get::<_, Option<NaiveDateTime>>(idx).ok().flatten()),
        Type::TIMESTAMPTZ => render(row.try_get::<_, Option<DateTime<Utc>>>(idx).ok().flatten()),
        Type::JSON | Type::JSONB => {
            render(row.try_get::<_, Option<serde_json::Value>>(idx).ok().flatten())
        }
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .ok()
            .flatten()
            .map(|b| format!("[{} bytes]", b.len()))
            .unwrap_or_else(|| "NULL".to_string()),
        // Text types and anything unrecognized: fall back to a string fetch.
        _ => render(row.try_get::<_, Option<String>>(idx).ok().flatten()),
    }
}

fn render_mysql_value(value: &mysql_async::Value) -> String {
    use mysql_async::Value;
    match value {
        Value::NULL => "NULL".to_string(),
        Value::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::Int(i) => i.to_string(),
        Value::UInt(u) => u.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Double(d) => d.to_string(),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            if *hour == 0 && *minute == 0 && *second == 0 && *micros == 0 {
                format!("{year:04}-{month:02}-{day:02}")
            } else {
                format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
                )
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if *negative { "-" } else { "" };
            let total_hours = u32::from(*days) * 24 + u32::from(*hours);
            format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
        }
    }
}

/// The shape returned across the system boundary: a bounded row set plus the
/// plan text. Exactly one of the populated fields or `error` is meaningful;
/// on failure everything else is empty and `error` carries the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundedQueryResult {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub row_count: u64,
    pub elapsed_ms: u64,
    pub explain: String,
    pub error: Option<String>,
}

impl BoundedQueryResult {
    pub fn from_outcome(outcome: QueryOutcome, explain: String) -> Self {
        let mut rows = outcome.rows;
        rows.truncate(MAX_RESULT_ROWS);
        BoundedQueryResult {
            headers: outcome.headers,
            rows,
            row_count: outcome.row_count,
            elapsed_ms: outcome.elapsed.as_millis() as u64,
            explain,
            error: None,
        }
    }

    pub fn failure(message: String) -> Self {
        BoundedQueryResult {
            headers: vec![],
            rows: vec![],
            row_count: 0,
            elapsed_ms: 0,
            explain: String::new(),
            error: Some(message),
        }
    }

    pub fn truncated(&self) -> bool {
        self.row_count > self.rows.len() as u64
    }
}

/// Execute a statement and package the outcome. This call never fails past
/// the boundary: executor errors land in the `error` field, and a failed
/// explain degrades to an empty plan rather than aborting the run.
pub async fn run_query(conn: &mut Connection, sql: &str) -> BoundedQueryResult {
    let outcome = match conn.execute(sql).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!("query failed: {e}");
            return BoundedQueryResult::failure(e.to_string());
        }
    };

    let explain = match conn.explain(sql).await {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!("explain failed, continuing without a plan: {e}");
            String::new()
        }
    };

    BoundedQueryResult::from_outcome(outcome, explain)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(rows: usize) -> QueryOutcome {
        QueryOutcome {
            headers: vec!["id".into(), "customer_id".into(), "total".into()],
            rows: (0..rows)
                .map(|i| vec![i.to_string(), (i % 7).to_string(), "9.99".into()])
                .collect(),
            row_count: rows as u64,
            elapsed: Duration::from_millis(12),
        }
    }

    #[test]
    fn test_returns_rows_prefixes() {
        assert!(returns_rows("SELECT 1"));
        assert!(returns_rows("with cte as (select 1) select * from cte"));
        assert!(returns_rows("EXPLAIN ANALYZE SELECT 1"));
        assert!(returns_rows("SHOW server_version"));
        assert!(!returns_rows("INSERT INTO t VALUES (1)"));
        assert!(!returns_rows("CREATE TABLE t (id int)"));
        assert!(!returns_rows("UPDATE t SET id = 2"));
    }

    #[test]
    fn test_headers_match_row_width() {
        let outcome = outcome(3);
        for row in &outcome.rows {
            assert_eq!(row.len(), outcome.headers.len());
        }
    }

    #[test]
    fn test_truncation_preserves_total_count() {
        let result = BoundedQueryResult::from_outcome(outcome(120), String::new());
        assert_eq!(result.rows.len(), MAX_RESULT_ROWS);
        assert_eq!(result.row_count, 120);
        assert!(result.truncated());
    }

    #[test]
    fn test_small_result_not_truncated() {
        let result = BoundedQueryResult::from_outcome(outcome(7), "Seq Scan on t".into());
        assert_eq!(result.rows.len(), 7);
        assert_eq!(result.row_count, 7);
        assert!(!result.truncated());
        assert_eq!(result.explain, "Seq Scan on t");
        assert!(result.error.is_none());
    }

    #[test]
    fn test_boundary_at_exactly_fifty_rows() {
        let result = BoundedQueryResult::from_outcome(outcome(MAX_RESULT_ROWS), String::new());
        assert_eq!(result.rows.len(), MAX_RESULT_ROWS);
        assert!(!result.truncated());
    }

    #[test]
    fn test_failure_result_is_empty() {
        let result = BoundedQueryResult::failure("relation \"orders\" does not exist".into());
        assert!(result.headers.is_empty());
        assert!(result.rows.is_empty());
        assert_eq!(result.row_count, 0);
        assert!(result.explain.is_empty());
        assert_eq!(
            result.error.as_deref(),
            Some("relation \"orders\" does not exist")
        );
    }

    #[test]
    fn test_render_mysql_values() {
        use mysql_async::Value;
        assert_eq!(render_mysql_value(&Value::NULL), "NULL");
        assert_eq!(render_mysql_value(&Value::Int(-3)), "-3");
        assert_eq!(render_mysql_value(&Value::UInt(42)), "42");
        assert_eq!(
            render_mysql_value(&Value::Bytes(b"hello".to_vec())),
            "hello"
        );
        assert_eq!(
            render_mysql_value(&Value::Date(2024, 6, 1, 0, 0, 0, 0)),
            "2024-06-01"
        );
        assert_eq!(
            render_mysql_value(&Value::Date(2024, 6, 1, 13, 5, 9, 250)),
            "2024-06-01 13:05:09.000250"
        );
        assert_eq!(
            render_mysql_value(&Value::Time(true, 1, 2, 30, 0, 0)),
            "-26:30:00.000000"
        );
    }

    #[test]
    fn test_bounded_result_serializes() {
        let result = BoundedQueryResult::from_outcome(outcome(2), "plan".into());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["row_count"], 2);
        assert_eq!(json["headers"][0], "id");
        assert!(json["error"].is_null());
    }
}
