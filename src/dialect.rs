//! SQL text that differs between backends.

use crate::schema::{ColumnDefinition, ID_COLUMN};
use crate::validate::Rule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Mysql,
}

impl Dialect {
    /// Positional placeholder understood by the driver crate.
    pub fn placeholder(self) -> &'static str {
        "?"
    }

    pub fn quote_name(self, name: &str) -> String {
        match self {
            Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
            Dialect::Mysql => format!("`{}`", name.replace('`', "``")),
        }
    }

    /// Column type for a declared column, including `NOT NULL`.
    pub fn column_type(self, column: &ColumnDefinition) -> String {
        let has = |rule: Rule| column.has_rule(&rule);
        let ty = match self {
            Dialect::Sqlite => {
                if has(Rule::Text100) {
                    "varchar(100)"
                } else if has(Rule::Float) || has(Rule::Ufloat) {
                    "float"
                } else if has(Rule::Int) || has(Rule::Uint) {
                    "integer"
                } else if has(Rule::Date) {
                    "date"
                } else if has(Rule::Datetime) {
                    "datetime"
                } else if has(Rule::Bool) {
                    "integer"
                } else {
                    "text"
                }
            }
            Dialect::Mysql => {
                if has(Rule::Text100) {
                    "VARCHAR(100)"
                } else if has(Rule::Float) || has(Rule::Ufloat) {
                    "FLOAT"
                } else if has(Rule::Int) || has(Rule::Uint) {
                    "INT"
                } else if has(Rule::Date) {
                    "DATE"
                } else if has(Rule::Datetime) {
                    "DATETIME"
                } else if has(Rule::Bool) {
                    "BOOLEAN"
                } else {
                    "TEXT"
                }
            }
        };
        if has(Rule::NotNull) {
            format!("{ty} NOT NULL")
        } else {
            ty.to_string()
        }
    }

    pub fn create_table_sql(
        self,
        name: &str,
        columns: &[ColumnDefinition],
        unique: &[String],
    ) -> String {
        let id = self.quote_name(ID_COLUMN);
        let mut parts = vec![match self {
            Dialect::Sqlite => format!("{id} integer NOT NULL primary key autoincrement"),
            Dialect::Mysql => format!("{id} INT NOT NULL AUTO_INCREMENT"),
        }];
        for column in columns {
            parts.push(format!(
                "{} {}",
                self.quote_name(&column.name),
                self.column_type(column)
            ));
        }
        if self == Dialect::Mysql {
            parts.push(format!("PRIMARY KEY ({id})"));
        }
        if !unique.is_empty() {
            let cols: Vec<String> = unique.iter().map(|c| self.quote_name(c)).collect();
            parts.push(format!("UNIQUE({})", cols.join(", ")));
        }

        let mut sql = format!("CREATE TABLE {} ({})", self.quote_name(name), parts.join(", "));
        if self == Dialect::Mysql {
            sql.push_str(" ENGINE = InnoDB CHARSET=utf8 COLLATE utf8_unicode_ci");
        }
        sql
    }

    pub fn drop_table_sql(self, name: &str) -> String {
        format!("DROP TABLE {}", self.quote_name(name))
    }

    /// `LIMIT`/`OFFSET` suffix, empty when neither is set.
    ///
    /// Neither backend accepts `OFFSET` alone, so an offset without a limit
    /// is paired with the backend's unbounded limit.
    pub fn limit_sql(self, limit: Option<u64>, offset: Option<u64>) -> String {
        let limit = match (limit, offset) {
            (Some(limit), _) => limit.to_string(),
            (None, Some(_)) => match self {
                Dialect::Sqlite => "-1".to_string(),
                Dialect::Mysql => u64::MAX.to_string(),
            },
            (None, None) => return String::new(),
        };
        match offset {
            Some(offset) => format!(" LIMIT {limit} OFFSET {offset}"),
            None => format!(" LIMIT {limit}"),
        }
    }
}
