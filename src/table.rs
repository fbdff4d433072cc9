//! Validated CRUD operations on one table.

use std::str::FromStr;

use tracing::debug;

use crate::condition::{join_param_sets, Condition, ParamSets};
use crate::driver::{Driver, Fetch, Output};
use crate::error::{Error, Result, RowErrors, ValidationCode, ValidationErrors};
use crate::schema::{TableSchema, ID_COLUMN};
use crate::validate::{validate, Rule};
use crate::value::{Row, Value};

/// Sort direction of an `ORDER BY` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub fn as_sql(self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

impl FromStr for Order {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("asc") {
            Ok(Order::Asc)
        } else if s.eq_ignore_ascii_case("desc") {
            Ok(Order::Desc)
        } else {
            Err(Error::InvalidOrder(s.to_string()))
        }
    }
}

/// Options of a `SELECT`.
///
/// Without explicit ordering rows come back by ascending `id`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Select {
    pub filter: Condition,
    /// `None` selects every column.
    pub columns: Option<Vec<String>>,
    pub order: Vec<(String, Order)>,
    pub distinct: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Select {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(filter: Condition) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: Condition) -> Self {
        self.filter = filter;
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn order_by(mut self, column: &str, order: Order) -> Self {
        self.order.push((column.to_string(), order));
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A [`TableSchema`] bound to a driver.
pub struct Table<'d> {
    driver: &'d dyn Driver,
    schema: TableSchema,
}

impl<'d> Table<'d> {
    /// Binds to an existing table.
    pub fn open(driver: &'d dyn Driver, schema: TableSchema) -> Result<Self> {
        if !driver.table_exists(&schema.name)? {
            return Err(Error::TableMissing(schema.name));
        }
        Ok(Self { driver, schema })
    }

    /// Binds to the table, creating it with its default rows if missing.
    pub fn open_or_create(driver: &'d dyn Driver, schema: TableSchema) -> Result<Self> {
        if driver.table_exists(&schema.name)? {
            return Ok(Self { driver, schema });
        }
        driver.create_table(&schema.name, &schema.columns, &schema.unique)?;
        debug!(table = %schema.name, "table created");
        let table = Self { driver, schema };
        table.create_default_rows()?;
        Ok(table)
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn driver(&self) -> &'d dyn Driver {
        self.driver
    }

    /// Number of rows matching `filter`, summed over all parameter sets.
    pub fn count(&self, filter: &Condition) -> Result<u64> {
        self.check_filter(filter)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            self.quoted_name(),
            filter.to_sql(self.driver.dialect())
        );
        let counts = self
            .driver
            .execute(&sql, &filter.params(), Fetch::Col)?
            .into_values();
        Ok(counts
            .iter()
            .filter_map(Value::as_i64)
            .map(|n| n.max(0) as u64)
            .sum())
    }

    pub fn exists(&self, filter: &Condition) -> Result<bool> {
        Ok(self.count(filter)? > 0)
    }

    /// Inserts `rows`; returns the new id, or `None` when several rows were
    /// inserted.
    pub fn create(&self, rows: &[Row]) -> Result<Option<i64>> {
        self.create_with(rows, |_, _| {})
    }

    /// Like [`Table::create`], then runs `check` on the written rows.
    ///
    /// `check` records failures in the error map of each row. The rows are
    /// already written when it runs; wrap the call in a transaction to
    /// undo them.
    pub fn create_with<F>(&self, rows: &[Row], check: F) -> Result<Option<i64>>
    where
        F: FnOnce(&[Row], &mut [RowErrors]),
    {
        let (validated, columns, values) = self.split_rows(rows)?;
        let quoted: Vec<String> = columns.iter().map(|c| self.driver.quote_name(c)).collect();
        let placeholders = vec![self.driver.placeholder(); quoted.len()].join(",");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quoted_name(),
            quoted.join(","),
            placeholders
        );
        let id = self.driver.execute(&sql, &values, Fetch::Id)?.into_id();
        self.post_validate(&validated, check)?;
        Ok(id)
    }

    /// Updates the rows matching `filter`.
    ///
    /// With several data rows and/or several filter parameter sets the
    /// statement runs once per pair, matched by index.
    pub fn update(&self, rows: &[Row], filter: &Condition) -> Result<()> {
        self.update_with(rows, filter, |_, _| {})
    }

    pub fn update_with<F>(&self, rows: &[Row], filter: &Condition, check: F) -> Result<()>
    where
        F: FnOnce(&[Row], &mut [RowErrors]),
    {
        let (validated, columns, values) = self.split_rows(rows)?;
        self.check_filter(filter)?;
        let params = join_param_sets(&values, &filter.params());
        let assignments: Vec<String> = columns
            .iter()
            .map(|c| format!("{} = {}", self.driver.quote_name(c), self.driver.placeholder()))
            .collect();
        let sql = format!(
            "UPDATE {} SET {}{}",
            self.quoted_name(),
            assignments.join(","),
            filter.to_sql(self.driver.dialect())
        );
        self.driver.execute(&sql, &params, Fetch::None)?;
        self.post_validate(&validated, check)
    }

    pub fn delete(&self, filter: &Condition) -> Result<()> {
        self.check_filter(filter)?;
        let sql = format!(
            "DELETE FROM {}{}",
            self.quoted_name(),
            filter.to_sql(self.driver.dialect())
        );
        self.driver.execute(&sql, &filter.params(), Fetch::None)?;
        Ok(())
    }

    pub fn get(&self, select: &Select) -> Result<Vec<Row>> {
        Ok(self.query(select, Fetch::Rows)?.into_rows())
    }

    pub fn get_row(&self, select: &Select) -> Result<Option<Row>> {
        Ok(self.query(select, Fetch::Row)?.into_row())
    }

    /// First column of the first row.
    pub fn get_value(&self, select: &Select) -> Result<Option<Value>> {
        Ok(self.query(select, Fetch::Col)?.into_value())
    }

    /// First column of every row.
    pub fn get_values(&self, select: &Select) -> Result<Vec<Value>> {
        Ok(self.query(select, Fetch::Cols)?.into_values())
    }

    /// Renders the `SELECT` statement for `select`.
    pub fn select_sql(&self, select: &Select) -> Result<String> {
        self.check_filter(&select.filter)?;
        let dialect = self.driver.dialect();

        let columns = match &select.columns {
            Some(columns) if !columns.is_empty() => {
                for column in columns {
                    self.check_column(column)?;
                }
                let quoted: Vec<String> = columns.iter().map(|c| dialect.quote_name(c)).collect();
                quoted.join(",")
            }
            _ => "*".to_string(),
        };

        let default_order = [(ID_COLUMN.to_string(), Order::Asc)];
        let order = if select.order.is_empty() {
            &default_order[..]
        } else {
            &select.order[..]
        };
        let mut order_parts = Vec::with_capacity(order.len());
        for (column, direction) in order {
            self.check_column(column)?;
            order_parts.push(format!("{} {}", dialect.quote_name(column), direction.as_sql()));
        }

        Ok(format!(
            "SELECT {}{} FROM {}{} ORDER BY {}{}",
            if select.distinct { "DISTINCT " } else { "" },
            columns,
            self.quoted_name(),
            select.filter.to_sql(dialect),
            order_parts.join(", "),
            dialect.limit_sql(select.limit, select.offset)
        ))
    }

    /// Fails when a declared column (or `id`) is missing in the database.
    pub fn check_columns(&self) -> Result<()> {
        let existing = self.driver.get_columns(&self.schema.name)?;
        let missing: Vec<String> = self
            .schema
            .column_names()
            .chain([ID_COLUMN])
            .filter(|column| !existing.iter().any(|e| e == column))
            .map(String::from)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingColumns {
                table: self.schema.name.clone(),
                missing,
            })
        }
    }

    /// Fails when a predefined row pattern matches no row.
    pub fn check_predefined_rows(&self) -> Result<()> {
        let mut invalid = Vec::new();
        for patterns in &self.schema.rows {
            let filter = Condition::and(
                patterns
                    .iter()
                    .map(|(column, pattern)| Condition::re(column, pattern)),
            );
            if self.count(&filter)? == 0 {
                let fields: Vec<String> = patterns
                    .iter()
                    .map(|(column, pattern)| format!("'{column}': '{pattern}'"))
                    .collect();
                invalid.push(format!("{{{}}}", fields.join(", ")));
            }
        }
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingRows {
                table: self.schema.name.clone(),
                rows: invalid,
            })
        }
    }

    pub fn create_default_rows(&self) -> Result<()> {
        for row in &self.schema.defaults {
            self.create(std::slice::from_ref(row))?;
        }
        Ok(())
    }

    fn query(&self, select: &Select, fetch: Fetch) -> Result<Output> {
        let sql = self.select_sql(select)?;
        self.driver.execute(&sql, &select.filter.params(), fetch)
    }

    fn quoted_name(&self) -> String {
        self.driver.quote_name(&self.schema.name)
    }

    fn check_column(&self, column: &str) -> Result<()> {
        if self.schema.is_known_column(column) {
            Ok(())
        } else {
            Err(Error::InvalidColumn(format!("Invalid column '{column}'")))
        }
    }

    fn check_filter(&self, filter: &Condition) -> Result<()> {
        match filter
            .columns()
            .into_iter()
            .find(|column| !self.schema.is_known_column(column))
        {
            Some(column) => Err(Error::InvalidColumn(format!(
                "Invalid column '{column}' in condition '{}'",
                filter.to_sql(self.driver.dialect())
            ))),
            None => Ok(()),
        }
    }

    /// Validated copy of the declared columns present in `row`.
    fn validate_row(&self, row: &Row, errors: &mut RowErrors) -> Row {
        self.schema
            .columns
            .iter()
            .filter_map(|column| {
                let value = row.get(&column.name)?;
                Some((
                    column.name.clone(),
                    validate(&column.name, value, &column.rules, errors),
                ))
            })
            .collect()
    }

    /// Validates `rows` and splits them into columns and parameter sets.
    fn split_rows(&self, rows: &[Row]) -> Result<(Vec<Row>, Vec<String>, ParamSets)> {
        let mut errors = ValidationErrors::with_rows(rows.len());
        let mut validated = Vec::with_capacity(rows.len());
        let mut columns: Option<Vec<String>> = None;
        let mut values = ParamSets::with_capacity(rows.len());

        for (row, row_errors) in rows.iter().zip(errors.rows_mut()) {
            let checked = self.validate_row(row, row_errors);
            if !row_errors.is_empty() {
                continue;
            }
            let columns = columns.get_or_insert_with(|| {
                self.schema
                    .column_names()
                    .filter(|name| checked.contains_key(*name))
                    .map(String::from)
                    .collect()
            });
            if checked.len() != columns.len() || !columns.iter().all(|c| checked.contains_key(c)) {
                return Err(Error::MixedColumns);
            }
            values.push(columns.iter().map(|c| checked[c].clone()).collect());
            validated.push(checked);
        }

        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        match columns {
            Some(columns) if !columns.is_empty() => Ok((validated, columns, values)),
            _ => Err(Error::NoColumns),
        }
    }

    /// Checks `unique` columns of the written rows, then runs `check`.
    fn post_validate<F>(&self, rows: &[Row], check: F) -> Result<()>
    where
        F: FnOnce(&[Row], &mut [RowErrors]),
    {
        let unique: Vec<&str> = self
            .schema
            .columns
            .iter()
            .filter(|column| column.has_rule(&Rule::Unique))
            .map(|column| column.name.as_str())
            .collect();

        let mut errors = ValidationErrors::with_rows(rows.len());
        for (row, row_errors) in rows.iter().zip(errors.rows_mut()) {
            for column in &unique {
                let Some(value) = row.get(*column) else {
                    continue;
                };
                if self.count(&Condition::eq(column, value.clone()))? > 1 {
                    row_errors.insert(column.to_string(), ValidationCode::NotUnique);
                }
            }
        }
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }

        check(rows, errors.rows_mut());
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteDriver;

    fn persons() -> TableSchema {
        TableSchema::new("persons")
            .column("name", ["not_empty", "unique"])
            .unwrap()
            .column("birthday", ["not_empty", "date"])
            .unwrap()
            .column("size", ["float"])
            .unwrap()
    }

    #[test]
    fn order_parses_case_insensitively() {
        assert_eq!("asc".parse::<Order>().unwrap(), Order::Asc);
        assert_eq!("DESC".parse::<Order>().unwrap(), Order::Desc);
        assert!(matches!(
            "up".parse::<Order>(),
            Err(Error::InvalidOrder(dir)) if dir == "up"
        ));
    }

    #[test]
    fn renders_select_statements() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        let table = Table::open_or_create(&driver, persons()).unwrap();

        assert_eq!(
            table.select_sql(&Select::new()).unwrap(),
            r#"SELECT * FROM "persons" ORDER BY "id" ASC"#
        );

        let select = Select::filter(Condition::re("name", ".*an"))
            .columns(["size", "id"])
            .order_by("name", Order::Desc)
            .distinct()
            .limit(2)
            .offset(1);
        assert_eq!(
            table.select_sql(&select).unwrap(),
            r#"SELECT DISTINCT "size","id" FROM "persons" WHERE "name" REGEXP ? ORDER BY "name" DESC LIMIT 2 OFFSET 1"#
        );
    }

    #[test]
    fn rejects_unknown_columns() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        let table = Table::open_or_create(&driver, persons()).unwrap();

        let err = table.count(&Condition::eq("age", 3)).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"Invalid column 'age' in condition ' WHERE "age" = ?'"#
        );
        let err = table.get(&Select::new().columns(["age"])).unwrap_err();
        assert_eq!(err.to_string(), "Invalid column 'age'");
        let err = table
            .get(&Select::new().order_by("age", Order::Asc))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidColumn(_)));
    }
}
