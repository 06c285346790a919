//! Inclusion/exclusion filters and their compilation into a boolean
//! predicate over dimension expressions.

use crate::metrics_view::MetricsViewSchema;
use crate::result::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Conditions combined by conjunction.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self { conditions }
    }
}

/// One condition; its value set is disjunctive. NULL may be listed like any
/// other value.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "operator")]
pub enum Condition {
    #[serde(rename = "in")]
    Include { name: String, values: Vec<Value> },
    #[serde(rename = "not_in")]
    Exclude { name: String, values: Vec<Value> },
}

impl Condition {
    pub fn include(name: impl Into<String>, values: Vec<Value>) -> Self {
        Condition::Include {
            name: name.into(),
            values,
        }
    }

    pub fn exclude(name: impl Into<String>, values: Vec<Value>) -> Self {
        Condition::Exclude {
            name: name.into(),
            values,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Condition::Include { name, .. } | Condition::Exclude { name, .. } => name,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum FilterError {
    #[error("filter references unknown dimension '{0}'")]
    UnknownDimension(String),

    #[error("filter value {value:?} is not valid for dimension '{dimension}'")]
    InvalidValue { dimension: String, value: Value },
}

/// Compiled, dialect-neutral predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Constant(bool),
    /// Membership of a dimension expression in a value set. `values` holds
    /// the non-NULL members; `null_listed` records whether NULL was listed.
    InList {
        dimension: String,
        expression: String,
        values: Vec<Value>,
        null_listed: bool,
        negated: bool,
    },
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn is_always_true(&self) -> bool {
        matches!(self, Predicate::Constant(true))
    }

    /// Evaluates the predicate for one row; `value_of` returns the row's value
    /// for a dimension expression.
    pub fn evaluate<F>(&self, value_of: &F) -> bool
    where
        F: Fn(&str) -> Value,
    {
        match self {
            Predicate::Constant(b) => *b,
            Predicate::InList {
                expression,
                values,
                null_listed,
                negated,
                ..
            } => {
                let value = value_of(expression);
                let member = match value {
                    Value::Null => *null_listed,
                    ref v => values.contains(v),
                };
                member != *negated
            }
            Predicate::And(predicates) => predicates.iter().all(|p| p.evaluate(value_of)),
        }
    }

    /// Every dimension expression the predicate reads.
    pub fn expressions(&self) -> Vec<&str> {
        match self {
            Predicate::Constant(_) => vec![],
            Predicate::InList { expression, .. } => vec![expression.as_str()],
            Predicate::And(predicates) => predicates.iter().flat_map(|p| p.expressions()).collect(),
        }
    }
}

/// Compiles `filter` against the dimensions of `schema`.
///
/// Values are coerced to the dimension's type, so a string such as
/// `"2022-01-01"` filters a timestamp dimension. An empty `in` set matches
/// nothing and an empty `not_in` set matches everything.
pub fn compile(filter: &Filter, schema: &MetricsViewSchema) -> Result<Predicate, FilterError> {
    let mut predicates = Vec::with_capacity(filter.conditions.len());

    for condition in &filter.conditions {
        let (name, raw_values, negated) = match condition {
            Condition::Include { name, values } => (name, values, false),
            Condition::Exclude { name, values } => (name, values, true),
        };

        let dimension = schema
            .get_dimension(name)
            .map_err(|_| FilterError::UnknownDimension(name.clone()))?;

        let mut values: Vec<Value> = Vec::with_capacity(raw_values.len());
        let mut null_listed = false;
        for raw in raw_values {
            let value = dimension
                .data_type
                .coerce(raw)
                .ok_or_else(|| FilterError::InvalidValue {
                    dimension: name.clone(),
                    value: raw.clone(),
                })?;
            if value.is_null() {
                null_listed = true;
            } else if !values.contains(&value) {
                values.push(value);
            }
        }

        if values.is_empty() && !null_listed {
            predicates.push(Predicate::Constant(negated));
            continue;
        }

        predicates.push(Predicate::InList {
            dimension: dimension.name.clone(),
            expression: dimension.expression().to_string(),
            values,
            null_listed,
            negated,
        });
    }

    if predicates.contains(&Predicate::Constant(false)) {
        return Ok(Predicate::Constant(false));
    }
    predicates.retain(|p| !p.is_always_true());

    Ok(match predicates.len() {
        0 => Predicate::Constant(true),
        1 => predicates.remove(0),
        _ => Predicate::And(predicates),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::DataType;
    use rstest::*;

    #[fixture]
    fn schema() -> MetricsViewSchema {
        serde_json::from_str(
            r#"{
                "name": "ad_bids_metrics",
                "table": "ad_bids",
                "dimensions": [
                    {"name": "pub", "data_type": "string"},
                    {"name": "domain", "expression": "dom", "data_type": "string"},
                    {"name": "timestamp", "data_type": "timestamp"},
                    {"name": "volume", "data_type": "integer"},
                    {"name": "bid_price", "data_type": "float"}
                ],
                "measures": [{"name": "measure_0", "expression": "count(*)"}]
            }"#,
        )
        .unwrap()
    }

    fn row<'a>(pairs: &'a [(&'a str, Value)]) -> impl Fn(&str) -> Value + 'a {
        move |expr: &str| {
            pairs
                .iter()
                .find(|(k, _)| *k == expr)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null)
        }
    }

    #[rstest]
    fn test_empty_filter_is_true(schema: MetricsViewSchema) {
        assert_eq!(
            compile(&Filter::default(), &schema).unwrap(),
            Predicate::Constant(true)
        );
    }

    #[rstest]
    fn test_empty_in_matches_nothing(schema: MetricsViewSchema) {
        let filter = Filter::new(vec![
            Condition::include("pub", vec![]),
            Condition::include("domain", vec![Value::from("google.com")]),
        ]);
        assert_eq!(compile(&filter, &schema).unwrap(), Predicate::Constant(false));
    }

    #[rstest]
    fn test_empty_not_in_matches_everything(schema: MetricsViewSchema) {
        let filter = Filter::new(vec![Condition::exclude("pub", vec![])]);
        assert_eq!(compile(&filter, &schema).unwrap(), Predicate::Constant(true));
    }

    #[rstest]
    fn test_uses_dimension_expression(schema: MetricsViewSchema) {
        let filter = Filter::new(vec![Condition::include("domain", vec![Value::from("msn.com")])]);
        let predicate = compile(&filter, &schema).unwrap();
        assert_eq!(predicate.expressions(), vec!["dom"]);
        assert!(predicate.evaluate(&row(&[("dom", Value::from("msn.com"))])));
        assert!(!predicate.evaluate(&row(&[("domain", Value::from("msn.com"))])));
    }

    #[rstest]
    #[case::null_excluded_by_default(vec![Value::from("Google")], false, Value::Null, false)]
    #[case::null_listed(vec![Value::from("Google"), Value::Null], false, Value::Null, true)]
    #[case::not_in_keeps_null(vec![Value::from("Google")], true, Value::Null, true)]
    #[case::not_in_drops_listed_null(vec![Value::Null], true, Value::Null, false)]
    #[case::not_in_keeps_other_values(vec![Value::Null], true, Value::from("Yahoo"), true)]
    #[case::in_matches(vec![Value::from("Google")], false, Value::from("Google"), true)]
    #[case::not_in_rejects(vec![Value::from("Google")], true, Value::from("Google"), false)]
    fn test_null_semantics(
        schema: MetricsViewSchema,
        #[case] values: Vec<Value>,
        #[case] negated: bool,
        #[case] pub_value: Value,
        #[case] expected: bool,
    ) {
        let condition = if negated {
            Condition::exclude("pub", values)
        } else {
            Condition::include("pub", values)
        };
        let predicate = compile(&Filter::new(vec![condition]), &schema).unwrap();
        let pairs = [("pub", pub_value)];
        assert_eq!(predicate.evaluate(&row(&pairs)), expected);
    }

    #[rstest]
    fn test_conditions_are_conjunctive(schema: MetricsViewSchema) {
        let filter = Filter::new(vec![
            Condition::include("pub", vec![Value::from("Google"), Value::from("Yahoo")]),
            Condition::exclude("domain", vec![Value::from("news.google.com")]),
        ]);
        let predicate = compile(&filter, &schema).unwrap();
        assert!(matches!(predicate, Predicate::And(ref p) if p.len() == 2));

        let google = [("pub", Value::from("Google")), ("dom", Value::from("google.com"))];
        let news = [("pub", Value::from("Google")), ("dom", Value::from("news.google.com"))];
        let msn = [("pub", Value::from("Microsoft")), ("dom", Value::from("msn.com"))];
        assert!(predicate.evaluate(&row(&google)));
        assert!(!predicate.evaluate(&row(&news)));
        assert!(!predicate.evaluate(&row(&msn)));
    }

    #[rstest]
    fn test_values_coerced_and_deduplicated(schema: MetricsViewSchema) {
        let filter = Filter::new(vec![Condition::include(
            "timestamp",
            vec![Value::from("2022-01-01"), Value::from("2022-01-01T00:00:00")],
        )]);
        match compile(&filter, &schema).unwrap() {
            Predicate::InList { values, .. } => {
                assert_eq!(values.len(), 1);
                assert_eq!(
                    DataType::Timestamp.coerce(&Value::from("2022-01-01")),
                    Some(values[0].clone())
                );
            }
            other => panic!("unexpected predicate {:?}", other),
        }
    }

    #[rstest]
    fn test_unknown_dimension(schema: MetricsViewSchema) {
        let filter = Filter::new(vec![Condition::include("measure_0", vec![Value::Int(1)])]);
        assert_eq!(
            compile(&filter, &schema),
            Err(FilterError::UnknownDimension("measure_0".to_string()))
        );
    }

    #[rstest]
    fn test_uncoercible_value(schema: MetricsViewSchema) {
        let filter = Filter::new(vec![Condition::include("volume", vec![Value::from("many")])]);
        assert!(matches!(
            compile(&filter, &schema),
            Err(FilterError::InvalidValue { .. })
        ));
    }

    #[rstest]
    #[case::nan(Value::from("NaN"))]
    #[case::infinity(Value::Float(f64::INFINITY))]
    fn test_non_finite_float_is_invalid(schema: MetricsViewSchema, #[case] value: Value) {
        let filter = Filter::new(vec![Condition::include("bid_price", vec![value])]);
        assert!(matches!(
            compile(&filter, &schema),
            Err(FilterError::InvalidValue { .. })
        ));
    }
}
