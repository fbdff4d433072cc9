//! Runs against a live server; configure with MYSQL_HOST, MYSQL_DATABASE,
//! MYSQL_USER and MYSQL_PASSWORD and run with `--features mysql -- --ignored`.
#![cfg(feature = "mysql")]

use std::env;

use anyhow::Result;
use rust_sdbd::{
    transaction, Condition, Driver, Fetch, MysqlConfig, MysqlDriver, Row, Select, Table,
    TableSchema, Value,
};

fn config() -> MysqlConfig {
    let var = |name: &str, default: &str| env::var(name).unwrap_or_else(|_| default.to_string());
    MysqlConfig::new(
        var("MYSQL_HOST", "localhost"),
        var("MYSQL_DATABASE", "sdbd_test"),
        var("MYSQL_USER", "root"),
        var("MYSQL_PASSWORD", ""),
    )
}

fn connect_clean(table: &str) -> Result<MysqlDriver> {
    let driver = MysqlDriver::connect(config())?;
    if driver.table_exists(table)? {
        driver.delete_table(table)?;
    }
    Ok(driver)
}

fn persons_schema() -> Result<TableSchema> {
    Ok(TableSchema::new("sdbd_persons")
        .column("name", ["not_empty", "unique", "text100"])?
        .column("birthday", ["not_empty", "date"])?
        .column("size", ["float"])?)
}

fn person(name: &str, size: f64, birthday: &str) -> Row {
    Row::from([
        ("name".to_string(), name.into()),
        ("size".to_string(), size.into()),
        ("birthday".to_string(), birthday.into()),
    ])
}

#[test]
#[ignore]
fn test_database_exists() -> Result<()> {
    assert!(MysqlDriver::db_exists(&config())?);
    let mut missing = config();
    missing.database = "sdbd_no_such_database".to_string();
    assert!(!MysqlDriver::db_exists(&missing)?);
    Ok(())
}

#[test]
#[ignore]
fn test_quote_name() -> Result<()> {
    let driver = MysqlDriver::connect(config())?;
    assert_eq!(driver.quote_name("foobar"), "`foobar`");
    assert_eq!(driver.quote_name("foo`bar"), "`foo``bar`");
    Ok(())
}

#[test]
#[ignore]
fn test_table_crud() -> Result<()> {
    let driver = connect_clean("sdbd_persons")?;
    let persons = Table::open_or_create(&driver, persons_schema()?)?;
    persons.check_columns()?;

    transaction(&driver, || {
        persons.create(&[
            person("Peter", 14.5, "2010-01-01"),
            person("Mayer", 16.25, "2010-01-03"),
            person("Hans", 16.25, "2010-01-01"),
        ])
    })?;
    assert_eq!(persons.count(&Condition::all())?, 3);
    assert_eq!(
        persons.count(&Condition::eq_any("name", ["Peter", "Hans"]))?,
        2
    );

    let hans = persons
        .get_row(&Select::filter(Condition::re("name", ".*an")))?
        .unwrap();
    assert_eq!(hans["name"], Value::from("Hans"));
    assert_eq!(hans["birthday"], Value::from("2010-01-01"));

    persons.update(
        &[Row::from([("size".to_string(), Value::from(18.5))])],
        &Condition::eq("name", "Peter"),
    )?;
    let size = persons.get_value(&Select::filter(Condition::eq("name", "Peter")).columns(["size"]))?;
    assert_eq!(size.and_then(|v| v.as_f64()), Some(18.5));

    let err = transaction(&driver, || persons.create(&[person("Peter", 1.0, "2000-01-01")]))
        .unwrap_err();
    assert!(err.validation_errors().is_some());
    assert_eq!(persons.count(&Condition::all())?, 3);

    persons.delete(&Condition::eq("birthday", "2010-01-03"))?;
    assert_eq!(persons.count(&Condition::all())?, 2);

    driver.delete_table("sdbd_persons")?;
    Ok(())
}

#[test]
#[ignore]
fn test_transactions() -> Result<()> {
    let driver = connect_clean("sdbd_counter")?;
    driver.execute_multi(
        "CREATE TABLE sdbd_counter (id INTEGER NOT NULL AUTO_INCREMENT PRIMARY KEY, n INTEGER); \
         INSERT INTO sdbd_counter (n) VALUES (1);",
    )?;

    driver.start_transaction(None)?;
    driver.execute("INSERT INTO sdbd_counter (n) VALUES (?)", &[vec![2.into()]], Fetch::None)?;
    driver.rollback()?;

    let id = driver
        .execute("INSERT INTO sdbd_counter (n) VALUES (?)", &[vec![3.into()]], Fetch::Id)?
        .into_id();
    assert!(id.is_some());
    let total = driver
        .execute("SELECT SUM(n) FROM sdbd_counter", &[], Fetch::Col)?
        .into_value();
    assert_eq!(total.and_then(|v| v.as_f64()), Some(4.0));

    driver.delete_table("sdbd_counter")?;
    driver.close()?;
    Ok(())
}
