//! DuckDB data engine for the AskQL pipeline
//!
//! Estimates come from the query plan and never run the query. Execution
//! happens on a cloned connection in a blocking task, bounded by a row cap
//! and a timeout. A statement still running when the timeout fires, or when
//! the caller drops the future, is interrupted.
//!
//! Databases opened here have external access disabled, so generated SQL
//! cannot read files, environment variables or other databases.

use askql_core::{DataEngine, ExecutionError, ExecutionResult, Row};
use async_trait::async_trait;
use duckdb::{Config, Connection, Result as DuckResult};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub mod plan;

pub struct DuckEngine {
    conn: Mutex<Connection>,
}

impl DuckEngine {
    pub fn open<P: AsRef<Path>>(path: P) -> DuckResult<Self> {
        Ok(Self::from_connection(Connection::open_with_flags(
            path,
            locked_down()?,
        )?))
    }

    pub fn open_in_memory() -> DuckResult<Self> {
        Ok(Self::from_connection(Connection::open_in_memory_with_flags(
            locked_down()?,
        )?))
    }

    /// Use an existing connection as-is, including its access settings.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Run setup SQL (schema, seed data) directly.
    pub fn execute_batch(&self, sql: &str) -> Result<(), ExecutionError> {
        let conn = self.clone_connection()?;
        conn.execute_batch(sql).map_err(map_error)
    }

    /// A new connection to the same database, usable from another thread.
    pub fn clone_connection(&self) -> Result<Connection, ExecutionError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| ExecutionError::Engine("connection lock poisoned".to_string()))?;
        conn.try_clone().map_err(map_error)
    }
}

#[async_trait]
impl DataEngine for DuckEngine {
    async fn estimate(&self, query: &str) -> Result<u64, ExecutionError> {
        let conn = self.clone_connection()?;
        let query = query.to_string();

        let bytes = tokio::task::spawn_blocking(move || plan::estimate_scan_bytes(&conn, &query))
            .await
            .map_err(|e| ExecutionError::Engine(format!("estimate task failed: {}", e)))?
            .map_err(map_error)?;

        tracing::debug!(bytes, "Estimated scan size");
        Ok(bytes)
    }

    async fn execute(
        &self,
        query: &str,
        row_cap: usize,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecutionError> {
        let conn = self.clone_connection()?;
        let query = query.to_string();

        let handle = conn.interrupt_handle();
        let guard = InterruptOnDrop::new(move || handle.interrupt());
        let task = tokio::task::spawn_blocking(move || run_capped(&conn, &query, row_cap));

        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => {
                guard.disarm();
                joined
                    .map_err(|e| ExecutionError::Engine(format!("execution task failed: {}", e)))?
                    .map_err(map_error)
            }
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Interrupting query");
                Err(ExecutionError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

fn locked_down() -> DuckResult<Config> {
    Config::default().enable_external_access(false)
}

/// Runs `interrupt` when dropped unless disarmed first. Covers both the
/// timeout arm and the caller abandoning the execute future.
struct InterruptOnDrop<F: FnOnce()> {
    interrupt: Option<F>,
}

impl<F: FnOnce()> InterruptOnDrop<F> {
    fn new(interrupt: F) -> Self {
        Self {
            interrupt: Some(interrupt),
        }
    }

    fn disarm(mut self) {
        self.interrupt = None;
    }
}

impl<F: FnOnce()> Drop for InterruptOnDrop<F> {
    fn drop(&mut self) {
        if let Some(interrupt) = self.interrupt.take() {
            interrupt();
        }
    }
}

fn run_capped(conn: &Connection, query: &str, row_cap: usize) -> DuckResult<ExecutionResult> {
    let started = Instant::now();

    let bytes_processed = match plan::estimate_scan_bytes(conn, query) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Could not size executed plan: {}", e);
            0
        }
    };

    let mut stmt = conn.prepare(query)?;
    let mut rows = stmt.query([])?;

    let mut columns: Vec<String> = Vec::new();
    let mut result_rows = Vec::new();

    while result_rows.len() < row_cap {
        let Some(row) = rows.next()? else {
            break;
        };

        if columns.is_empty() {
            let col_count = row.as_ref().column_count();
            for i in 0..col_count {
                columns.push(row.as_ref().column_name(i)?.to_string());
            }
        }

        let mut row_obj = Row::new();
        for (i, col_name) in columns.iter().enumerate() {
            row_obj.insert(col_name.clone(), duckdb_value_to_json(row, i)?);
        }
        result_rows.push(row_obj);
    }

    Ok(ExecutionResult {
        rows: result_rows,
        bytes_processed,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

/// Convert one DuckDB cell to JSON
pub fn duckdb_value_to_json(row: &duckdb::Row, idx: usize) -> DuckResult<serde_json::Value> {
    use duckdb::types::ValueRef;

    Ok(match row.get_ref(idx)? {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Boolean(b) => serde_json::Value::Bool(b),
        ValueRef::TinyInt(i) => serde_json::json!(i),
        ValueRef::SmallInt(i) => serde_json::json!(i),
        ValueRef::Int(i) => serde_json::json!(i),
        ValueRef::BigInt(i) => serde_json::json!(i),
        ValueRef::HugeInt(i) => serde_json::json!(i),
        ValueRef::UTinyInt(i) => serde_json::json!(i),
        ValueRef::USmallInt(i) => serde_json::json!(i),
        ValueRef::UInt(i) => serde_json::json!(i),
        ValueRef::UBigInt(i) => serde_json::json!(i),
        ValueRef::Float(f) => serde_json::json!(f),
        ValueRef::Double(f) => serde_json::json!(f),
        ValueRef::Text(s) => serde_json::Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => serde_json::Value::String(format!("<blob {} bytes>", b.len())),
        _ => serde_json::Value::String("<unsupported>".to_string()),
    })
}

/// Parser, binder and catalog errors mean the engine refused the query text.
fn map_error(e: duckdb::Error) -> ExecutionError {
    let message = e.to_string();
    let rejected = ["Parser Error", "Binder Error", "Catalog Error", "syntax error"]
        .iter()
        .any(|marker| message.contains(marker));
    if rejected {
        ExecutionError::QueryRejected(message)
    } else {
        ExecutionError::Engine(message)
    }
}
