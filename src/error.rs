use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Code recorded for a column that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    NoneField,
    EmptyField,
    InvalidRegex,
    InvalidDate,
    InvalidDatetime,
    InvalidInt,
    InvalidUint,
    InvalidFloat,
    InvalidUfloat,
    InvalidText100,
    InvalidBool,
    NotUnique,
    /// Set by caller-supplied checks.
    #[serde(untagged)]
    Custom(String),
}

impl ValidationCode {
    pub fn as_str(&self) -> &str {
        match self {
            ValidationCode::NoneField => "NONE_FIELD",
            ValidationCode::EmptyField => "EMPTY_FIELD",
            ValidationCode::InvalidRegex => "INVALID_REGEX",
            ValidationCode::InvalidDate => "INVALID_DATE",
            ValidationCode::InvalidDatetime => "INVALID_DATETIME",
            ValidationCode::InvalidInt => "INVALID_INT",
            ValidationCode::InvalidUint => "INVALID_UINT",
            ValidationCode::InvalidFloat => "INVALID_FLOAT",
            ValidationCode::InvalidUfloat => "INVALID_UFLOAT",
            ValidationCode::InvalidText100 => "INVALID_TEXT100",
            ValidationCode::InvalidBool => "INVALID_BOOL",
            ValidationCode::NotUnique => "NOT_UNIQUE",
            ValidationCode::Custom(code) => code,
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation failures of a single row, keyed by column.
pub type RowErrors = BTreeMap<String, ValidationCode>;

/// Validation failures of a write, one entry per input row (empty for rows
/// that passed).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(pub Vec<RowErrors>);

impl ValidationErrors {
    pub fn with_rows(count: usize) -> Self {
        Self(vec![RowErrors::new(); count])
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|row| row.is_empty())
    }

    pub fn rows(&self) -> &[RowErrors] {
        &self.0
    }

    pub fn rows_mut(&mut self) -> &mut [RowErrors] {
        &mut self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (index, row) in self.0.iter().enumerate() {
            for (column, code) in row {
                if !first {
                    f.write_str(", ")?;
                }
                write!(f, "row {index} '{column}': {code}")?;
                first = false;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Opening database '{path}' failed: {reason}")]
    Open { path: String, reason: String },

    #[error("Closing database '{path}' failed: {reason}")]
    Close { path: String, reason: String },

    #[error("Table '{0}' does not exist")]
    TableMissing(String),

    #[error("{0}")]
    InvalidColumn(String),

    #[error("Invalid ordering direction '{0}'")]
    InvalidOrder(String),

    #[error("Validation format '{0}' is not implemented")]
    UnknownRule(String),

    #[error("Invalid regular expression in validation format '{rule}'")]
    InvalidPattern {
        rule: String,
        #[source]
        source: regex::Error,
    },

    #[error("Validation Error: {0}")]
    Validation(ValidationErrors),

    #[error("Data sets have not the same columns")]
    MixedColumns,

    #[error("No valid columns available")]
    NoColumns,

    #[error("Table '{table}' is invalid. The following columns do not exist: {}", quoted(.missing))]
    MissingColumns { table: String, missing: Vec<String> },

    #[error("Table '{table}' is invalid. The following predefined rows are missing or invalid: {}", .rows.join(", "))]
    MissingRows { table: String, rows: Vec<String> },

    #[error("{0}")]
    Transaction(String),

    #[error("{source} (sql: {sql})")]
    Sqlite {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    #[cfg(feature = "mysql")]
    #[error("{source} (sql: {sql})")]
    Mysql {
        sql: String,
        #[source]
        source: mysql::Error,
    },
}

impl Error {
    /// Numeric error code reported by the database backend, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Sqlite {
                source: rusqlite::Error::SqliteFailure(err, _),
                ..
            } => Some(err.extended_code),
            #[cfg(feature = "mysql")]
            Error::Mysql {
                source: mysql::Error::MySqlError(err),
                ..
            } => Some(i32::from(err.code)),
            _ => None,
        }
    }

    /// Statement that failed, for errors raised by the backend.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Sqlite { sql, .. } => Some(sql),
            #[cfg(feature = "mysql")]
            Error::Mysql { sql, .. } => Some(sql),
            _ => None,
        }
    }

    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Error::Validation(errors) => Some(errors),
            _ => None,
        }
    }

    pub(crate) fn sqlite(sql: impl Into<String>, source: rusqlite::Error) -> Self {
        Error::Sqlite {
            sql: sql.into(),
            source,
        }
    }
}

fn quoted(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("'{name}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_codes_serialize_as_upper_snake_case() {
        let mut row = RowErrors::new();
        row.insert("birthday".into(), ValidationCode::InvalidDate);
        row.insert("age".into(), ValidationCode::Custom("INVALID_AGE".into()));
        let errors = ValidationErrors(vec![row, RowErrors::new()]);

        let json = serde_json::to_string(&errors).unwrap();
        assert_eq!(
            json,
            r#"[{"age":"INVALID_AGE","birthday":"INVALID_DATE"},{}]"#
        );
    }

    #[test]
    fn missing_columns_message_lists_quoted_names() {
        let err = Error::MissingColumns {
            table: "persons".into(),
            missing: vec!["size".into()],
        };
        assert_eq!(
            err.to_string(),
            "Table 'persons' is invalid. The following columns do not exist: 'size'"
        );
    }
}
