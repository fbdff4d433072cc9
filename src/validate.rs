//! Column validation rules.
//!
//! Rules are declared by identifier (`"not_empty"`, `"date"`, `"r_[a-z]+"`,
//! ...) and parsed once when a schema is built. [`validate`] applies them to
//! a single value and records failures in a [`RowErrors`] map.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

use crate::error::{Error, Result, RowErrors, ValidationCode};
use crate::value::Value;

/// A single validation rule attached to a column.
#[derive(Debug, Clone)]
pub enum Rule {
    NotNull,
    NotEmpty,
    /// Checked after the write by counting equal values.
    Unique,
    Text,
    Text100,
    Date,
    Datetime,
    Int,
    Uint,
    Float,
    Ufloat,
    Bool,
    /// `r_<pattern>`: the whole value must match.
    Pattern { source: String, regex: Regex },
}

impl Rule {
    pub fn pattern(source: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{source})$")).map_err(|err| Error::InvalidPattern {
            rule: format!("r_{source}"),
            source: err,
        })?;
        Ok(Rule::Pattern {
            source: source.to_string(),
            regex,
        })
    }

    /// Parses a list of rule identifiers.
    pub fn parse_all<I, S>(rules: I) -> Result<Vec<Rule>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        rules.into_iter().map(|rule| rule.as_ref().parse()).collect()
    }

    /// Rules that only carry a declaration and impose no format.
    fn is_marker(&self) -> bool {
        matches!(
            self,
            Rule::NotNull | Rule::NotEmpty | Rule::Unique | Rule::Text
        )
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Rule::Pattern { source: a, .. }, Rule::Pattern { source: b, .. }) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl FromStr for Rule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rule = match s {
            "not_null" => Rule::NotNull,
            "not_empty" => Rule::NotEmpty,
            "unique" => Rule::Unique,
            "text" => Rule::Text,
            "text100" => Rule::Text100,
            "date" => Rule::Date,
            "datetime" => Rule::Datetime,
            "int" => Rule::Int,
            "uint" => Rule::Uint,
            "float" => Rule::Float,
            "ufloat" => Rule::Ufloat,
            "bool" => Rule::Bool,
            other => match other.strip_prefix("r_") {
                Some(pattern) => Rule::pattern(pattern)?,
                None => return Err(Error::UnknownRule(other.to_string())),
            },
        };
        Ok(rule)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rule::NotNull => "not_null",
            Rule::NotEmpty => "not_empty",
            Rule::Unique => "unique",
            Rule::Text => "text",
            Rule::Text100 => "text100",
            Rule::Date => "date",
            Rule::Datetime => "datetime",
            Rule::Int => "int",
            Rule::Uint => "uint",
            Rule::Float => "float",
            Rule::Ufloat => "ufloat",
            Rule::Bool => "bool",
            Rule::Pattern { source, .. } => return write!(f, "r_{source}"),
        };
        f.write_str(name)
    }
}

fn int_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[+-]?[0-9]+$").expect("valid int regex"))
}

fn uint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]+$").expect("valid uint regex"))
}

fn float_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[+-]?[0-9]+(\.[0-9]+)?$").expect("valid float regex"))
}

fn ufloat_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]+(\.[0-9]+)?$").expect("valid ufloat regex"))
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]{4}-[0-9]{1,2}-[0-9]{1,2}$").expect("valid date regex"))
}

fn datetime_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9]{4}-[0-9]{1,2}-[0-9]{1,2} [0-9]{1,2}:[0-9]{1,2}:[0-9]{1,2}$")
            .expect("valid datetime regex")
    })
}

/// Four-digit year and a real calendar date (and time).
fn is_date(text: &str) -> bool {
    date_re().is_match(text) && NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
}

fn is_datetime(text: &str) -> bool {
    datetime_re().is_match(text)
        && NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").is_ok()
}

/// Validates `value` of `column` against `rules`.
///
/// Failures are stored in `errors` under `column`; when several rules fail
/// the last one wins. The returned value is what should be written: rules
/// that normalize (`float`, `ufloat`, `bool`) replace the input, all others
/// hand it back unchanged.
pub fn validate(column: &str, value: &Value, rules: &[Rule], errors: &mut RowErrors) -> Value {
    if value.is_null() {
        if rules.contains(&Rule::NotNull) {
            errors.insert(column.to_string(), ValidationCode::NoneField);
        }
        return Value::Null;
    }

    let mut text = value.to_string();
    if text.is_empty() {
        if rules.contains(&Rule::NotEmpty) {
            errors.insert(column.to_string(), ValidationCode::EmptyField);
        }
        return value.clone();
    }

    let mut normalized: Option<Value> = None;
    for rule in rules.iter().filter(|rule| !rule.is_marker()) {
        let failure = match rule {
            Rule::Pattern { regex, .. } => {
                (!regex.is_match(&text)).then_some(ValidationCode::InvalidRegex)
            }
            Rule::Datetime => (!is_datetime(&text)).then_some(ValidationCode::InvalidDatetime),
            Rule::Date => (!is_date(&text)).then_some(ValidationCode::InvalidDate),
            Rule::Int => (!int_re().is_match(&text)).then_some(ValidationCode::InvalidInt),
            Rule::Uint => (!uint_re().is_match(&text)).then_some(ValidationCode::InvalidUint),
            Rule::Float | Rule::Ufloat => {
                let fixed = normalize_decimal(&text);
                if fixed != text {
                    text = fixed;
                    normalized = Some(Value::Text(text.clone()));
                }
                let (re, code) = if matches!(rule, Rule::Float) {
                    (float_re(), ValidationCode::InvalidFloat)
                } else {
                    (ufloat_re(), ValidationCode::InvalidUfloat)
                };
                (!re.is_match(&text)).then_some(code)
            }
            Rule::Text100 => {
                (text.chars().count() > 100).then_some(ValidationCode::InvalidText100)
            }
            Rule::Bool => match parse_bool(&text) {
                Some(flag) => {
                    text = flag.to_string();
                    normalized = Some(Value::Integer(flag));
                    None
                }
                None => Some(ValidationCode::InvalidBool),
            },
            Rule::NotNull | Rule::NotEmpty | Rule::Unique | Rule::Text => None,
        };
        if let Some(code) = failure {
            errors.insert(column.to_string(), code);
        }
    }

    normalized.unwrap_or_else(|| value.clone())
}

/// `1,5` becomes `1.5` and `3.` becomes `3.0`.
fn normalize_decimal(text: &str) -> String {
    let mut fixed = text.replace(',', ".");
    if fixed.ends_with('.') {
        fixed.push('0');
    }
    fixed
}

fn parse_bool(text: &str) -> Option<i64> {
    if text == "1" || text.eq_ignore_ascii_case("true") {
        Some(1)
    } else if text == "0" || text.eq_ignore_ascii_case("false") {
        Some(0)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(value: impl Into<Value>, rules: &[&str]) -> (Value, Option<ValidationCode>) {
        let rules = Rule::parse_all(rules).unwrap();
        let mut errors = RowErrors::new();
        let out = validate("col", &value.into(), &rules, &mut errors);
        (out, errors.remove("col"))
    }

    #[test]
    fn not_empty_rejects_empty_text() {
        assert_eq!(check("", &["not_empty"]).1, Some(ValidationCode::EmptyField));
        assert_eq!(check("x", &["not_empty"]).1, None);
        // empty without not_empty skips all format rules
        assert_eq!(check("", &["date", "int"]).1, None);
    }

    #[test]
    fn not_null_rejects_null() {
        assert_eq!(check(Value::Null, &["not_null"]).1, Some(ValidationCode::NoneField));
        assert_eq!(check(Value::Null, &["not_empty", "date"]), (Value::Null, None));
    }

    #[test]
    fn date_and_datetime_formats() {
        assert_eq!(check("2010-01-01", &["date"]).1, None);
        assert_eq!(check("201a-01-01", &["date"]).1, Some(ValidationCode::InvalidDate));
        assert_eq!(check("2010-02-30", &["date"]).1, Some(ValidationCode::InvalidDate));
        assert_eq!(check("2010-01-01 12:30:00", &["datetime"]).1, None);
        assert_eq!(
            check("2010-01-01", &["datetime"]).1,
            Some(ValidationCode::InvalidDatetime)
        );
        // the year has exactly four digits, no sign or padding
        for text in ["99-01-01", " 2010-01-01", "+2010-01-01", "12010-01-01", "2010-01-01 "] {
            assert_eq!(check(text, &["date"]).1, Some(ValidationCode::InvalidDate), "{text:?}");
        }
        for text in ["99-01-01 10:00:00", "+2010-01-01 10:00:00", " 2010-01-01 10:00:00"] {
            assert_eq!(
                check(text, &["datetime"]).1,
                Some(ValidationCode::InvalidDatetime),
                "{text:?}"
            );
        }
        assert_eq!(
            check("2010-13-01 10:00:00", &["datetime"]).1,
            Some(ValidationCode::InvalidDatetime)
        );
    }

    #[test]
    fn integers() {
        assert_eq!(check("-12", &["int"]).1, None);
        assert_eq!(check(42, &["uint"]).1, None);
        assert_eq!(check("+1", &["uint"]).1, Some(ValidationCode::InvalidUint));
        assert_eq!(check("1.5", &["int"]).1, Some(ValidationCode::InvalidInt));
    }

    #[test]
    fn floats_are_normalized() {
        assert_eq!(check("1,5", &["float"]), (Value::from("1.5"), None));
        assert_eq!(check("3.", &["ufloat"]), (Value::from("3.0"), None));
        assert_eq!(check(14.3, &["float"]), (Value::Real(14.3), None));
        assert_eq!(check("-2", &["ufloat"]).1, Some(ValidationCode::InvalidUfloat));
        assert_eq!(check("abc", &["float"]).1, Some(ValidationCode::InvalidFloat));
    }

    #[test]
    fn bools_become_integers() {
        assert_eq!(check("TRUE", &["bool"]), (Value::Integer(1), None));
        assert_eq!(check(false, &["bool"]), (Value::Integer(0), None));
        assert_eq!(check("yes", &["bool"]).1, Some(ValidationCode::InvalidBool));
    }

    #[test]
    fn text100_limits_length() {
        assert_eq!(check("a".repeat(100), &["text100"]).1, None);
        assert_eq!(
            check("a".repeat(101), &["text100"]).1,
            Some(ValidationCode::InvalidText100)
        );
    }

    #[test]
    fn user_patterns_match_whole_value() {
        assert_eq!(check("abc", &["r_[a-c]+"]).1, None);
        assert_eq!(check("abcd", &["r_[a-c]+"]).1, Some(ValidationCode::InvalidRegex));
    }

    #[test]
    fn last_failure_wins() {
        assert_eq!(check("x", &["int", "date"]).1, Some(ValidationCode::InvalidDate));
    }

    #[test]
    fn unknown_rules_are_rejected() {
        assert!(matches!(
            "colour".parse::<Rule>(),
            Err(Error::UnknownRule(name)) if name == "colour"
        ));
        assert!(matches!(
            "r_(".parse::<Rule>(),
            Err(Error::InvalidPattern { .. })
        ));
    }

    #[test]
    fn rules_round_trip_through_display() {
        for name in ["not_null", "unique", "ufloat", "r_[0-9]{3}"] {
            assert_eq!(name.parse::<Rule>().unwrap().to_string(), name);
        }
    }
}
