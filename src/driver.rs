//! Backend-independent driver interface.

use std::time::Duration;

use tracing::warn;

use crate::dialect::Dialect;
use crate::error::Result;
use crate::schema::ColumnDefinition;
use crate::value::{Row, Value};

/// How long `start_transaction` waits for a competing transaction.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Pause between attempts to start a transaction.
pub(crate) const TRANSACTION_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// What `Driver::execute` should hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    None,
    /// First row.
    Row,
    Rows,
    /// First column of the first row.
    Col,
    /// First column of every row.
    Cols,
    /// Last inserted id.
    Id,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    None,
    Row(Option<Row>),
    Rows(Vec<Row>),
    Col(Option<Value>),
    Cols(Vec<Value>),
    Id(Option<i64>),
    /// One output per parameter set.
    Batch(Vec<Output>),
}

impl Output {
    /// All rows, flattening batches.
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Output::Row(row) => row.into_iter().collect(),
            Output::Rows(rows) => rows,
            Output::Batch(outputs) => outputs.into_iter().flat_map(Output::into_rows).collect(),
            _ => Vec::new(),
        }
    }

    /// First row, looking into the first batch entry that has one.
    pub fn into_row(self) -> Option<Row> {
        match self {
            Output::Row(row) => row,
            Output::Rows(rows) => rows.into_iter().next(),
            Output::Batch(outputs) => outputs.into_iter().find_map(Output::into_row),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Output::Col(value) => value,
            Output::Cols(values) => values.into_iter().next(),
            Output::Batch(outputs) => outputs.into_iter().find_map(Output::into_value),
            _ => None,
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        match self {
            Output::Col(value) => value.into_iter().collect(),
            Output::Cols(values) => values,
            Output::Batch(outputs) => outputs.into_iter().flat_map(Output::into_values).collect(),
            _ => Vec::new(),
        }
    }

    /// Inserted id; `None` for batches.
    pub fn into_id(self) -> Option<i64> {
        match self {
            Output::Id(id) => id,
            _ => None,
        }
    }
}

/// A connection to one database.
///
/// Methods take `&self` so that several tables can share one driver.
pub trait Driver {
    fn dialect(&self) -> Dialect;

    fn placeholder(&self) -> &'static str {
        self.dialect().placeholder()
    }

    fn quote_name(&self, name: &str) -> String {
        self.dialect().quote_name(name)
    }

    fn table_exists(&self, name: &str) -> Result<bool>;

    fn create_table(
        &self,
        name: &str,
        columns: &[ColumnDefinition],
        unique: &[String],
    ) -> Result<()> {
        let sql = self.dialect().create_table_sql(name, columns, unique);
        self.execute(&sql, &[], Fetch::None).map(drop)
    }

    fn delete_table(&self, name: &str) -> Result<()> {
        let sql = self.dialect().drop_table_sql(name);
        self.execute(&sql, &[], Fetch::None).map(drop)
    }

    fn get_columns(&self, table: &str) -> Result<Vec<String>>;

    /// Starts a transaction, retrying while the database is busy until
    /// `timeout` (default [`DEFAULT_TRANSACTION_TIMEOUT`]) elapses.
    fn start_transaction(&self, timeout: Option<Duration>) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    fn in_transaction(&self) -> bool;

    /// Runs a `;`-separated script inside a transaction.
    fn execute_multi(&self, sql: &str) -> Result<()>;

    /// Executes `sql` once per parameter set (once without parameters when
    /// `params` is empty).
    fn execute(&self, sql: &str, params: &[Vec<Value>], fetch: Fetch) -> Result<Output>;
}

/// Open transaction that rolls back when dropped unfinished.
pub struct Transaction<'a> {
    driver: &'a dyn Driver,
    finished: bool,
}

impl<'a> Transaction<'a> {
    pub fn begin(driver: &'a dyn Driver) -> Result<Self> {
        driver.start_transaction(None)?;
        Ok(Self {
            driver,
            finished: false,
        })
    }

    /// Commits; on failure the guard still rolls back when dropped.
    pub fn commit(mut self) -> Result<()> {
        self.driver.commit()?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.driver.rollback()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.driver.rollback() {
                warn!(error = %err, "rollback of dropped transaction failed");
            }
        }
    }
}

/// Runs `f` in a transaction: committed on `Ok`, rolled back on `Err`.
pub fn transaction<T, F>(driver: &dyn Driver, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let tx = Transaction::begin(driver)?;
    match f() {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                warn!(error = %rollback_err, "rollback after failed transaction failed");
            }
            Err(err)
        }
    }
}

/// Collapses whitespace so statements log on one line.
pub(crate) fn compact_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
