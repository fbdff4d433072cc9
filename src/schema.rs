use crate::error::Result;
use crate::validate::Rule;
use crate::value::{Row, Value};

/// Name of the implicit integer primary key every table carries.
pub const ID_COLUMN: &str = "id";

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub rules: Vec<Rule>,
}

impl ColumnDefinition {
    pub fn new<I, S>(name: &str, rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            name: name.to_string(),
            rules: Rule::parse_all(rules)?,
        })
    }

    pub fn has_rule(&self, rule: &Rule) -> bool {
        self.rules.contains(rule)
    }
}

/// Declarative description of one table.
///
/// The `id` primary key is implicit and must not be declared. Columns keep
/// their declaration order, which is also the order used in generated SQL.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    /// Columns of a composite `UNIQUE(...)` constraint.
    pub unique: Vec<String>,
    /// Rows that must be present, as column -> regex pattern.
    pub rows: Vec<Vec<(String, String)>>,
    /// Rows inserted when the table is created.
    pub defaults: Vec<Row>,
}

impl TableSchema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Adds a column with its rule identifiers.
    pub fn column<I, S>(mut self, name: &str, rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.columns.push(ColumnDefinition::new(name, rules)?);
        Ok(self)
    }

    pub fn unique_together<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn predefined_row<I, C, P>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = (C, P)>,
        C: Into<String>,
        P: Into<String>,
    {
        self.rows.push(
            patterns
                .into_iter()
                .map(|(column, pattern)| (column.into(), pattern.into()))
                .collect(),
        );
        self
    }

    pub fn default_row<I, C, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (C, V)>,
        C: Into<String>,
        V: Into<Value>,
    {
        self.defaults.push(
            values
                .into_iter()
                .map(|(column, value)| (column.into(), value.into()))
                .collect(),
        );
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// True for `id` and every declared column.
    pub fn is_known_column(&self, name: &str) -> bool {
        name == ID_COLUMN || self.get_column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }
}
