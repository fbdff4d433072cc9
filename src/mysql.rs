//! MySQL backend built on the `mysql` crate.

use std::cell::{Cell, RefCell};
use std::thread;
use std::time::{Duration, Instant};

use mysql::prelude::{Protocol, Queryable};
use mysql::{Conn, OptsBuilder, Params, QueryResult};
use serde::Deserialize;
use tracing::debug;

use crate::dialect::Dialect;
use crate::driver::{
    compact_sql, Driver, Fetch, Output, DEFAULT_TRANSACTION_TIMEOUT, TRANSACTION_RETRY_INTERVAL,
};
use crate::error::{Error, Result};
use crate::value::{Row, Value};

/// Server error for an unknown database.
const ER_BAD_DB_ERROR: u16 = 1049;
/// Server errors worth retrying when starting a transaction.
const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
const ER_LOCK_DEADLOCK: u16 = 1213;

/// MySQL driver configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MysqlConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Unix socket, used instead of `host` when set
    pub socket: Option<String>,
    pub transaction_timeout_ms: u64,
}

impl Default for MysqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            socket: None,
            transaction_timeout_ms: DEFAULT_TRANSACTION_TIMEOUT.as_millis() as u64,
        }
    }
}

impl MysqlConfig {
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
            user: user.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_socket(mut self, socket: impl Into<String>) -> Self {
        self.socket = Some(socket.into());
        self
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    fn opts(&self) -> OptsBuilder {
        OptsBuilder::new()
            .ip_or_hostname(Some(self.host.clone()))
            .tcp_port(self.port)
            .db_name(Some(self.database.clone()))
            .user(Some(self.user.clone()))
            .pass(Some(self.password.clone()))
            .socket(self.socket.clone())
    }
}

pub struct MysqlDriver {
    conn: RefCell<Conn>,
    in_transaction: Cell<bool>,
    transaction_timeout: Duration,
}

impl MysqlDriver {
    pub fn connect(config: MysqlConfig) -> Result<Self> {
        let connect_error = |err: mysql::Error| Error::Open {
            path: format!("{}/{}", config.host, config.database),
            reason: format!("Failed to connect to database: {err}"),
        };
        let mut conn = Conn::new(config.opts()).map_err(connect_error)?;
        conn.query_drop("SET autocommit = 0").map_err(connect_error)?;
        debug!(host = %config.host, database = %config.database, "database connection created");

        Ok(Self {
            conn: RefCell::new(conn),
            in_transaction: Cell::new(false),
            transaction_timeout: config.transaction_timeout(),
        })
    }

    /// Whether the configured database exists on the server.
    pub fn db_exists(config: &MysqlConfig) -> Result<bool> {
        match Conn::new(config.opts()) {
            Ok(_) => Ok(true),
            Err(mysql::Error::MySqlError(err)) if err.code == ER_BAD_DB_ERROR => Ok(false),
            Err(err) => Err(Error::Open {
                path: format!("{}/{}", config.host, config.database),
                reason: format!("Failed to connect to database: {err}"),
            }),
        }
    }

    /// Rolls back an open transaction and closes the connection.
    pub fn close(self) -> Result<()> {
        if self.in_transaction.get() {
            self.rollback()?;
        }
        drop(self.conn);
        debug!("database connection closed");
        Ok(())
    }

    fn control(&self, sql: &str) -> Result<()> {
        self.conn
            .borrow_mut()
            .query_drop(sql)
            .map_err(|source| Error::Mysql {
                sql: sql.to_string(),
                source,
            })
    }

    fn run(&self, sql: &str, params: &[Vec<Value>], fetch: Fetch) -> mysql::Result<Output> {
        let mut conn = self.conn.borrow_mut();
        if params.is_empty() {
            return collect(conn.exec_iter(sql, Params::Empty)?, fetch);
        }
        let stmt = conn.prep(sql)?;
        let mut outputs = Vec::with_capacity(params.len());
        for set in params {
            let values: Vec<mysql::Value> = set.iter().map(mysql::Value::from).collect();
            let params = if values.is_empty() {
                Params::Empty
            } else {
                Params::Positional(values)
            };
            outputs.push(collect(conn.exec_iter(&stmt, params)?, fetch)?);
        }
        if outputs.len() == 1 {
            Ok(outputs.remove(0))
        } else {
            Ok(Output::Batch(outputs))
        }
    }
}

impl Driver for MysqlDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        let sql = "SELECT TABLE_NAME FROM information_schema.TABLES \
                   WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?";
        let row = self
            .execute(sql, &[vec![Value::from(name)]], Fetch::Row)?
            .into_row();
        Ok(row.is_some())
    }

    fn get_columns(&self, table: &str) -> Result<Vec<String>> {
        let sql = format!("SHOW COLUMNS FROM {}", self.quote_name(table));
        let rows = self.execute(&sql, &[], Fetch::Rows)?.into_rows();
        Ok(rows
            .into_iter()
            .filter_map(|mut row| match row.remove("Field") {
                Some(Value::Text(name)) => Some(name),
                _ => None,
            })
            .collect())
    }

    fn start_transaction(&self, timeout: Option<Duration>) -> Result<()> {
        if self.in_transaction.get() {
            return Err(Error::Transaction(
                "Transaction already in progress".to_string(),
            ));
        }
        let timeout = timeout.unwrap_or(self.transaction_timeout);
        let started = Instant::now();
        let sql = "START TRANSACTION";
        loop {
            match self.conn.borrow_mut().query_drop(sql) {
                Ok(()) => {
                    self.in_transaction.set(true);
                    debug!("transaction started");
                    return Ok(());
                }
                Err(mysql::Error::MySqlError(err))
                    if matches!(err.code, ER_LOCK_WAIT_TIMEOUT | ER_LOCK_DEADLOCK) =>
                {
                    if started.elapsed() >= timeout {
                        return Err(Error::Transaction(format!(
                            "Failed to start transaction (timeout={}s): {} (code {})",
                            timeout.as_secs_f64(),
                            err.message,
                            err.code
                        )));
                    }
                    debug!("transaction wait");
                    thread::sleep(TRANSACTION_RETRY_INTERVAL);
                }
                Err(source) => {
                    return Err(Error::Mysql {
                        sql: sql.to_string(),
                        source,
                    })
                }
            }
        }
    }

    fn commit(&self) -> Result<()> {
        self.control("COMMIT")?;
        self.in_transaction.set(false);
        debug!("transaction committed");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.control("ROLLBACK")?;
        self.in_transaction.set(false);
        debug!("transaction rolled back");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.get()
    }

    fn execute_multi(&self, sql: &str) -> Result<()> {
        self.start_transaction(None)?;
        debug!(sql = %compact_sql(sql), "script");
        if let Err(source) = self.conn.borrow_mut().query_drop(sql) {
            self.rollback()?;
            return Err(Error::Mysql {
                sql: sql.to_string(),
                source,
            });
        }
        self.commit()
    }

    /// Statements outside an explicit transaction run in an implicit one.
    fn execute(&self, sql: &str, params: &[Vec<Value>], fetch: Fetch) -> Result<Output> {
        debug!(sql = %compact_sql(sql), params = ?params, "query");
        let implicit = !self.in_transaction.get();
        if implicit {
            self.start_transaction(None)?;
        }
        match self.run(sql, params, fetch) {
            Ok(out) => {
                if implicit {
                    self.commit()?;
                }
                Ok(out)
            }
            Err(source) => {
                if implicit {
                    self.rollback()?;
                }
                Err(Error::Mysql {
                    sql: sql.to_string(),
                    source,
                })
            }
        }
    }
}

fn collect<P: Protocol>(mut result: QueryResult<'_, '_, '_, P>, fetch: Fetch) -> mysql::Result<Output> {
    let mut rows = Vec::new();
    for row in result.by_ref() {
        rows.push(row?);
    }
    let out = match fetch {
        Fetch::None => Output::None,
        Fetch::Id => Output::Id(result.last_insert_id().and_then(|id| i64::try_from(id).ok())),
        Fetch::Row => Output::Row(rows.into_iter().next().map(to_row)),
        Fetch::Rows => Output::Rows(rows.into_iter().map(to_row).collect()),
        Fetch::Col => Output::Col(rows.into_iter().next().map(first_value)),
        Fetch::Cols => Output::Cols(rows.into_iter().map(first_value).collect()),
    };
    Ok(out)
}

fn to_row(mut row: mysql::Row) -> Row {
    let columns = row.columns();
    columns
        .iter()
        .enumerate()
        .map(|(index, column)| (column.name_str().into_owned(), take_value(&mut row, index)))
        .collect()
}

fn first_value(mut row: mysql::Row) -> Value {
    take_value(&mut row, 0)
}

fn take_value(row: &mut mysql::Row, index: usize) -> Value {
    row.take::<mysql::Value, _>(index).map_or(Value::Null, Value::from)
}
