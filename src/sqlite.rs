//! SQLite backend built on `rusqlite`.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, ErrorCode, Statement};
use serde::Deserialize;
use tracing::debug;

use crate::dialect::Dialect;
use crate::driver::{
    compact_sql, Driver, Fetch, Output, DEFAULT_TRANSACTION_TIMEOUT, TRANSACTION_RETRY_INTERVAL,
};
use crate::error::{Error, Result};
use crate::value::{Row, Value};

const MEMORY_PATH: &str = ":memory:";

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// SQLite driver configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Path to the SQLite database file, or `:memory:`
    pub db_path: String,
    /// Create the file if it does not exist
    pub create: bool,
    pub transaction_timeout_ms: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            db_path: MEMORY_PATH.to_string(),
            create: false,
            transaction_timeout_ms: DEFAULT_TRANSACTION_TIMEOUT.as_millis() as u64,
        }
    }
}

impl SqliteConfig {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    fn is_memory(&self) -> bool {
        self.db_path == MEMORY_PATH
    }
}

pub struct SqliteDriver {
    conn: Connection,
    path: String,
    transaction_timeout: Duration,
}

impl SqliteDriver {
    pub fn open(config: SqliteConfig) -> Result<Self> {
        let open_error = |reason: String| Error::Open {
            path: config.db_path.clone(),
            reason,
        };
        if !config.create && !config.is_memory() && !Self::db_exists(&config.db_path) {
            return Err(open_error(format!(
                "File '{}' does not exist",
                config.db_path
            )));
        }

        let conn = Connection::open(&config.db_path).map_err(|e| open_error(e.to_string()))?;
        conn.busy_timeout(config.transaction_timeout())
            .map_err(|e| open_error(e.to_string()))?;
        register_regexp(&conn).map_err(|e| open_error(e.to_string()))?;
        debug!(path = %config.db_path, "database opened");

        Ok(Self {
            conn,
            transaction_timeout: config.transaction_timeout(),
            path: config.db_path,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(SqliteConfig::in_memory())
    }

    /// Whether the database file exists.
    pub fn db_exists(path: impl AsRef<Path>) -> bool {
        path.as_ref().is_file()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn close(self) -> Result<()> {
        let path = self.path;
        self.conn.close().map_err(|(_, err)| Error::Close {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        debug!(path = %path, "database closed");
        Ok(())
    }

    fn run(
        &self,
        stmt: &mut Statement<'_>,
        columns: &[String],
        set: &[Value],
        fetch: Fetch,
    ) -> rusqlite::Result<Output> {
        let mut rows = stmt.query(params_from_iter(set.iter()))?;
        let out = match fetch {
            Fetch::None => {
                while rows.next()?.is_some() {}
                Output::None
            }
            Fetch::Id => {
                while rows.next()?.is_some() {}
                Output::Id(Some(self.conn.last_insert_rowid()))
            }
            Fetch::Row => Output::Row(rows.next()?.map(|row| to_row(row, columns)).transpose()?),
            Fetch::Rows => {
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(to_row(row, columns)?);
                }
                Output::Rows(out)
            }
            Fetch::Col => Output::Col(
                rows.next()?
                    .map(|row| row.get_ref(0).map(Value::from))
                    .transpose()?,
            ),
            Fetch::Cols => {
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(Value::from(row.get_ref(0)?));
                }
                Output::Cols(out)
            }
        };
        Ok(out)
    }
}

impl Driver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        let sql = "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?";
        let row = self
            .execute(sql, &[vec![Value::from(name)]], Fetch::Row)?
            .into_row();
        Ok(row.is_some())
    }

    fn get_columns(&self, table: &str) -> Result<Vec<String>> {
        let sql = format!("PRAGMA table_info({})", self.quote_name(table));
        let rows = self.execute(&sql, &[], Fetch::Rows)?.into_rows();
        Ok(rows
            .into_iter()
            .filter_map(|mut row| match row.remove("name") {
                Some(Value::Text(name)) => Some(name),
                _ => None,
            })
            .collect())
    }

    fn start_transaction(&self, timeout: Option<Duration>) -> Result<()> {
        if self.in_transaction() {
            return Err(Error::Transaction(
                "cannot start a transaction within a transaction".to_string(),
            ));
        }
        let timeout = timeout.unwrap_or(self.transaction_timeout);
        let started = Instant::now();
        let sql = "BEGIN IMMEDIATE TRANSACTION";
        loop {
            match self.conn.execute_batch(sql) {
                Ok(()) => {
                    debug!(path = %self.path, "transaction started");
                    return Ok(());
                }
                Err(err) if is_busy(&err) => {
                    if started.elapsed() >= timeout {
                        return Err(Error::Transaction(format!(
                            "Failed to start transaction (timeout={}s): {err}",
                            timeout.as_secs_f64()
                        )));
                    }
                    debug!(path = %self.path, "transaction wait");
                    thread::sleep(TRANSACTION_RETRY_INTERVAL);
                }
                Err(err) => return Err(Error::sqlite(sql, err)),
            }
        }
    }

    fn commit(&self) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| Error::sqlite("COMMIT", e))?;
        debug!(path = %self.path, "transaction committed");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| Error::sqlite("ROLLBACK", e))?;
        debug!(path = %self.path, "transaction rolled back");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn execute_multi(&self, sql: &str) -> Result<()> {
        self.start_transaction(None)?;
        debug!(sql = %compact_sql(sql), "script");
        if let Err(err) = self.conn.execute_batch(sql) {
            self.rollback()?;
            return Err(Error::sqlite(sql, err));
        }
        self.commit()
    }

    fn execute(&self, sql: &str, params: &[Vec<Value>], fetch: Fetch) -> Result<Output> {
        debug!(sql = %compact_sql(sql), params = ?params, "query");
        let mut stmt = self.conn.prepare(sql).map_err(|e| Error::sqlite(sql, e))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        if params.len() <= 1 {
            let set = params.first().map_or(&[][..], Vec::as_slice);
            return self
                .run(&mut stmt, &columns, set, fetch)
                .map_err(|e| Error::sqlite(sql, e));
        }

        let mut outputs = Vec::with_capacity(params.len());
        for set in params {
            let out = self
                .run(&mut stmt, &columns, set, fetch)
                .map_err(|e| Error::sqlite(sql, e))?;
            outputs.push(out);
        }
        Ok(Output::Batch(outputs))
    }
}

fn to_row(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Row> {
    let mut out = Row::with_capacity(columns.len());
    for (index, name) in columns.iter().enumerate() {
        out.insert(name.clone(), Value::from(row.get_ref(index)?));
    }
    Ok(out)
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Makes `text REGEXP pattern` available; matches at the start of `text`.
fn register_regexp(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let regex: Arc<Regex> = ctx.get_or_create_aux(0, |pattern| -> Result<_, BoxError> {
                Ok(Regex::new(&format!("^(?:{})", pattern.as_str()?))?)
            })?;
            let matched = match ctx.get_raw(1) {
                ValueRef::Null => false,
                value => regex.is_match(&Value::from(value).to_string()),
            };
            Ok(matched)
        },
    )
}
