//! Table schemas, filter conditions and validated CRUD over SQLite and MySQL.
//!
//! # Intention
//!
//! - Declare a table once as a [`TableSchema`]: a name plus validation rules
//!   per column.
//! - Translate get/create/update/delete into parameterized SQL for the bound
//!   [`Driver`].
//! - Build filters with [`Condition`] instead of writing `WHERE` clauses.
//!
//! # Architectural Boundaries
//!
//! - Only SQL generation, validation and driver plumbing belong here.
//! - Storage, locking and query planning stay with the database engines.
//!
//! # Example
//!
//! ```
//! use rust_sdbd::{Condition, Row, Select, SqliteDriver, Table, TableSchema, Value};
//!
//! # fn main() -> rust_sdbd::Result<()> {
//! let driver = SqliteDriver::open_in_memory()?;
//! let schema = TableSchema::new("persons")
//!     .column("name", ["not_empty", "unique"])?
//!     .column("birthday", ["not_empty", "date"])?;
//! let persons = Table::open_or_create(&driver, schema)?;
//!
//! let peter = Row::from([
//!     ("name".to_string(), Value::from("Peter")),
//!     ("birthday".to_string(), Value::from("2010-01-01")),
//! ]);
//! persons.create(&[peter])?;
//!
//! let rows = persons.get(&Select::filter(Condition::eq("name", "Peter")))?;
//! assert_eq!(rows.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod condition;
pub mod dialect;
pub mod driver;
pub mod error;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod schema;
pub mod sqlite;
pub mod table;
pub mod validate;
pub mod value;

pub use condition::{Condition, Operator, ParamSets};
pub use dialect::Dialect;
pub use driver::{transaction, Driver, Fetch, Output, Transaction};
pub use error::{Error, Result, RowErrors, ValidationCode, ValidationErrors};
#[cfg(feature = "mysql")]
pub use crate::mysql::{MysqlConfig, MysqlDriver};
pub use schema::{ColumnDefinition, TableSchema, ID_COLUMN};
pub use sqlite::{SqliteConfig, SqliteDriver};
pub use table::{Order, Select, Table};
pub use validate::{validate, Rule};
pub use value::{Row, Value};
