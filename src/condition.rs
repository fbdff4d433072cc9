//! Composable filter expressions compiled into `WHERE` clauses.
//!
//! A comparison may carry several values. Every value then becomes its own
//! parameter set and the statement is executed once per set, e.g.
//! `Condition::eq_any("id", [1, 2, 3])` deletes three rows with one
//! prepared `DELETE ... WHERE "id" = ?`.

use crate::dialect::Dialect;
use crate::value::Value;

/// Bound values for every execution of a statement.
pub type ParamSets = Vec<Vec<Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    /// Prefix regular expression match.
    Regexp,
    Like,
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::Regexp => "REGEXP",
            Operator::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Null(String),
    NotNull(String),
    Compare {
        column: String,
        op: Operator,
        values: Vec<Value>,
    },
}

impl Default for Condition {
    fn default() -> Self {
        Condition::all()
    }
}

impl Condition {
    /// Matches every row.
    pub fn all() -> Self {
        Condition::And(Vec::new())
    }

    pub fn compare(column: &str, op: Operator, value: impl Into<Value>) -> Self {
        Condition::Compare {
            column: column.to_string(),
            op,
            values: vec![value.into()],
        }
    }

    /// One parameter set per value.
    pub fn compare_any<I, V>(column: &str, op: Operator, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Condition::Compare {
            column: column.to_string(),
            op,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, Operator::Eq, value)
    }

    pub fn eq_any<I, V>(column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::compare_any(column, Operator::Eq, values)
    }

    pub fn ne(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, Operator::NotEq, value)
    }

    pub fn lt(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, Operator::Lt, value)
    }

    pub fn gt(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, Operator::Gt, value)
    }

    pub fn le(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, Operator::Le, value)
    }

    pub fn ge(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, Operator::Ge, value)
    }

    pub fn re(column: &str, pattern: &str) -> Self {
        Self::compare(column, Operator::Regexp, pattern)
    }

    pub fn like(column: &str, pattern: &str) -> Self {
        Self::compare(column, Operator::Like, pattern)
    }

    pub fn is_null(column: &str) -> Self {
        Condition::Null(column.to_string())
    }

    pub fn not_null(column: &str) -> Self {
        Condition::NotNull(column.to_string())
    }

    pub fn and(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::And(conditions.into_iter().collect())
    }

    pub fn or(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::Or(conditions.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(condition: Condition) -> Self {
        Condition::Not(Box::new(condition))
    }

    /// Adds `condition` to an `And`/`Or`; any other node becomes
    /// `And(self, condition)`.
    pub fn push(&mut self, condition: Condition) {
        match self {
            Condition::And(children) | Condition::Or(children) => children.push(condition),
            _ => {
                let this = std::mem::take(self);
                *self = Condition::And(vec![this, condition]);
            }
        }
    }

    /// Renders the condition, prefixed with ` WHERE ` unless it is empty.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        match self {
            Condition::And(children) | Condition::Or(children) if children.is_empty() => {
                String::new()
            }
            _ => format!(" WHERE {}", self.to_nested_sql(dialect)),
        }
    }

    /// Renders the condition without the ` WHERE ` prefix.
    pub fn to_nested_sql(&self, dialect: Dialect) -> String {
        match self {
            Condition::And(children) if children.is_empty() => "(1=1)".to_string(),
            Condition::Or(children) if children.is_empty() => "(1=0)".to_string(),
            Condition::And(children) => join(children, " AND ", dialect),
            Condition::Or(children) => join(children, " OR ", dialect),
            Condition::Not(child) => format!("NOT ({})", child.to_nested_sql(dialect)),
            Condition::Null(column) => format!("{} IS NULL", dialect.quote_name(column)),
            Condition::NotNull(column) => format!("{} IS NOT NULL", dialect.quote_name(column)),
            // an empty value list matches nothing
            Condition::Compare { values, .. } if values.is_empty() => "(1=0)".to_string(),
            Condition::Compare { column, op, .. } => format!(
                "{} {} {}",
                dialect.quote_name(column),
                op.as_sql(),
                dialect.placeholder()
            ),
        }
    }

    /// Parameter sets for the rendered SQL.
    ///
    /// Composite nodes take as many sets as their largest child; children
    /// with fewer sets repeat their last one.
    pub fn params(&self) -> ParamSets {
        match self {
            Condition::And(children) | Condition::Or(children) => children
                .iter()
                .map(Condition::params)
                .fold(vec![Vec::new()], |acc, sets| join_param_sets(&acc, &sets)),
            Condition::Not(child) => child.params(),
            Condition::Null(_) | Condition::NotNull(_) => vec![Vec::new()],
            Condition::Compare { values, .. } if values.is_empty() => vec![Vec::new()],
            Condition::Compare { values, .. } => {
                values.iter().map(|value| vec![value.clone()]).collect()
            }
        }
    }

    /// Every column named in the tree, in order of appearance.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::And(children) | Condition::Or(children) => {
                for child in children {
                    child.collect_columns(out);
                }
            }
            Condition::Not(child) => child.collect_columns(out),
            Condition::Null(column)
            | Condition::NotNull(column)
            | Condition::Compare { column, .. } => out.push(column),
        }
    }
}

fn join(children: &[Condition], separator: &str, dialect: Dialect) -> String {
    let parts: Vec<String> = children
        .iter()
        .map(|child| child.to_nested_sql(dialect))
        .collect();
    format!("({})", parts.join(separator))
}

/// Concatenates two lists of parameter sets index by index.
///
/// The result has as many sets as the longer side; the shorter side repeats
/// its last set. A side without any set contributes nothing.
pub fn join_param_sets(left: &[Vec<Value>], right: &[Vec<Value>]) -> ParamSets {
    let count = left.len().max(right.len()).max(1);
    (0..count)
        .map(|i| {
            let mut set = pick(left, i).to_vec();
            set.extend_from_slice(pick(right, i));
            set
        })
        .collect()
}

fn pick(sets: &[Vec<Value>], i: usize) -> &[Value] {
    match sets.get(i).or(sets.last()) {
        Some(set) => set,
        None => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> Condition {
        Condition::or([
            Condition::and([Condition::eq("name", "value"), Condition::is_null("name2")]),
            Condition::and([Condition::eq("foo", "value"), Condition::eq("bar", "value2")]),
            Condition::re("baz", "(.*)[abc|def]"),
            Condition::compare_any("blub", Operator::Like, ["blabla", "bloblo"]),
            Condition::ne("haha", Value::Null),
            Condition::gt("number1", 44),
            Condition::lt("number2", -3),
            Condition::le("keyXY", "jaja"),
            Condition::ge("number3", 33.2),
            Condition::compare_any("abc", Operator::Ge, [14, 3, 11]),
        ])
    }

    #[test]
    fn renders_nested_conditions() {
        assert_eq!(
            nested().to_sql(Dialect::Sqlite),
            r#" WHERE (("name" = ? AND "name2" IS NULL) OR ("foo" = ? AND "bar" = ?) OR "baz" REGEXP ? OR "blub" LIKE ? OR "haha" != ? OR "number1" > ? OR "number2" < ? OR "keyXY" <= ? OR "number3" >= ? OR "abc" >= ?)"#
        );
    }

    #[test]
    fn lists_columns_in_order() {
        assert_eq!(
            nested().columns(),
            [
                "name", "name2", "foo", "bar", "baz", "blub", "haha", "number1", "number2",
                "keyXY", "number3", "abc"
            ]
        );
    }

    #[test]
    fn expands_parameter_sets() {
        let common = |blub: &str, abc: i64| -> Vec<Value> {
            vec![
                "value".into(),
                "value".into(),
                "value2".into(),
                "(.*)[abc|def]".into(),
                blub.into(),
                Value::Null,
                44.into(),
                (-3).into(),
                "jaja".into(),
                33.2.into(),
                abc.into(),
            ]
        };
        assert_eq!(
            nested().params(),
            vec![
                common("blabla", 14),
                common("bloblo", 3),
                common("bloblo", 11)
            ]
        );
    }

    #[test]
    fn empty_conditions() {
        assert_eq!(Condition::all().to_sql(Dialect::Sqlite), "");
        assert_eq!(Condition::all().params(), vec![Vec::<Value>::new()]);
        assert_eq!(
            Condition::and([Condition::or([]), Condition::all()]).to_sql(Dialect::Mysql),
            " WHERE ((1=0) AND (1=1))"
        );
    }

    #[test]
    fn negation() {
        let cond = Condition::not(Condition::and([
            Condition::eq("a", 1),
            Condition::not_null("b"),
        ]));
        assert_eq!(
            cond.to_sql(Dialect::Mysql),
            " WHERE NOT ((`a` = ? AND `b` IS NOT NULL))"
        );
        assert_eq!(cond.params(), vec![vec![Value::Integer(1)]]);
        assert_eq!(cond.columns(), ["a", "b"]);
    }

    #[test]
    fn empty_value_lists_match_nothing() {
        let none = Condition::eq_any("n", Vec::<i64>::new());
        assert_eq!(none.to_sql(Dialect::Sqlite), " WHERE (1=0)");
        assert_eq!(none.params(), vec![Vec::<Value>::new()]);
        assert_eq!(none.columns(), ["n"]);

        let cond = Condition::and([Condition::eq("a", 1), Condition::not(none)]);
        assert_eq!(
            cond.to_sql(Dialect::Sqlite),
            r#" WHERE ("a" = ? AND NOT ((1=0)))"#
        );
        assert_eq!(cond.params(), vec![vec![Value::Integer(1)]]);
    }

    #[test]
    fn push_wraps_leaves() {
        let mut cond = Condition::eq("a", 1);
        cond.push(Condition::eq("b", 2));
        assert_eq!(
            cond,
            Condition::and([Condition::eq("a", 1), Condition::eq("b", 2)])
        );

        let mut cond = Condition::all();
        cond.push(Condition::is_null("c"));
        assert_eq!(cond.to_sql(Dialect::Sqlite), r#" WHERE ("c" IS NULL)"#);
    }

    #[test]
    fn joins_uneven_parameter_sets() {
        let data = vec![vec![Value::from(1)], vec![Value::from(2)]];
        let filter = vec![vec![Value::from("x")]];
        assert_eq!(
            join_param_sets(&data, &filter),
            vec![
                vec![Value::from(1), Value::from("x")],
                vec![Value::from(2), Value::from("x")]
            ]
        );
        assert_eq!(join_param_sets(&data, &[]), data);
    }
}
