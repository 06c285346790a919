//! Long-to-wide reshaping of aggregation results.
//!
//! Every distinct combination of the pivoted dimension values becomes a group
//! of columns, one per measure, named `<label>_..._<measure>`. Rows are the
//! distinct tuples of the remaining dimensions. Both columns and rows appear
//! in the order they are first seen in the input, so an ordered input yields
//! an ordered pivot.

use crate::result::{Field, ResultRow, ResultTable, Value};
use crate::time_grain::TimeGrain;
use indexmap::{IndexMap, IndexSet};
use log::debug;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum PivotError {
    #[error("pivot references '{0}' which is not a result column")]
    MissingField(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivotKey {
    pub name: String,
    /// Grain the dimension was bucketed to; selects the label format
    pub grain: Option<TimeGrain>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivotSpec {
    pub remaining: Vec<String>,
    pub pivoted: Vec<PivotKey>,
    pub measures: Vec<String>,
}

/// Label of one pivoted value inside a column name. NULL yields an empty
/// label.
pub fn label(value: &Value, grain: Option<TimeGrain>) -> String {
    match (value, grain) {
        (Value::Timestamp(ts), Some(grain)) => grain.label(ts),
        (value, _) => value.to_string(),
    }
}

struct Combination {
    prefix: String,
    /// Output column per measure, in measure order
    columns: Vec<String>,
}

/// Pivots `input` according to `spec`.
///
/// `group_limit` caps the number of distinct remaining-dimension tuples;
/// rows of tuples beyond the cap contribute neither rows nor columns.
pub fn pivot(
    input: &ResultTable,
    spec: &PivotSpec,
    group_limit: Option<usize>,
) -> Result<ResultTable, PivotError> {
    let remaining_fields = spec
        .remaining
        .iter()
        .map(|name| lookup(input, name))
        .collect::<Result<Vec<_>, _>>()?;
    let measure_fields = spec
        .measures
        .iter()
        .map(|name| lookup(input, name))
        .collect::<Result<Vec<_>, _>>()?;
    for key in &spec.pivoted {
        lookup(input, &key.name)?;
    }

    let mut combinations: IndexMap<Vec<Value>, Combination> = IndexMap::new();
    let mut used_names: HashSet<String> = spec.remaining.iter().cloned().collect();
    let mut groups: IndexMap<Vec<Value>, HashMap<usize, &ResultRow>> = IndexMap::new();

    for row in &input.rows {
        let remaining_key: Vec<Value> = spec
            .remaining
            .iter()
            .map(|name| row.get(name).cloned().unwrap_or(Value::Null))
            .collect();
        if !groups.contains_key(&remaining_key)
            && group_limit.map_or(false, |limit| groups.len() >= limit)
        {
            continue;
        }

        let pivot_key: Vec<Value> = spec
            .pivoted
            .iter()
            .map(|key| row.get(&key.name).cloned().unwrap_or(Value::Null))
            .collect();
        let combination = match combinations.get_index_of(&pivot_key) {
            Some(index) => index,
            None => {
                let prefix = pivot_key
                    .iter()
                    .zip(&spec.pivoted)
                    .map(|(value, key)| label(value, key.grain))
                    .collect::<Vec<_>>()
                    .join("_");
                let columns = spec
                    .measures
                    .iter()
                    .map(|measure| unique_name(format!("{}_{}", prefix, measure), &mut used_names))
                    .collect();
                combinations
                    .insert_full(pivot_key, Combination { prefix, columns })
                    .0
            }
        };

        groups
            .entry(remaining_key)
            .or_default()
            .entry(combination)
            .or_insert(row);
    }

    // With every dimension pivoted there is exactly one output row, even
    // when nothing matched.
    if spec.remaining.is_empty() && groups.is_empty() {
        groups.insert(Vec::new(), HashMap::new());
    }

    let mut schema: Vec<Field> = remaining_fields.into_iter().cloned().collect();
    for combination in combinations.values() {
        for (column, measure) in combination.columns.iter().zip(&measure_fields) {
            schema.push(Field::new(column.clone(), measure.data_type));
        }
    }

    let rows = groups
        .into_iter()
        .map(|(remaining_key, cells)| {
            let mut out = ResultRow::with_capacity(schema.len());
            for (name, value) in spec.remaining.iter().zip(remaining_key) {
                out.insert(name.clone(), value);
            }
            for (index, combination) in combinations.values().enumerate() {
                let source = cells.get(&index);
                for (column, measure) in combination.columns.iter().zip(&spec.measures) {
                    let value = source
                        .and_then(|row| row.get(measure).cloned())
                        .unwrap_or(Value::Null);
                    out.insert(column.clone(), value);
                }
            }
            out
        })
        .collect::<Vec<_>>();

    debug!(
        "Pivoted {} rows into {} rows over {} combinations ({})",
        input.len(),
        rows.len(),
        combinations.len(),
        combinations
            .values()
            .map(|c| c.prefix.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(ResultTable::new(schema, rows))
}

fn lookup<'a>(table: &'a ResultTable, name: &str) -> Result<&'a Field, PivotError> {
    table
        .field(name)
        .ok_or_else(|| PivotError::MissingField(name.to_string()))
}

// Distinct combinations can render to the same text, e.g. "a_b" + "c" and
// "a" + "b_c". Later ones get a numeric suffix.
fn unique_name(name: String, used: &mut HashSet<String>) -> String {
    if used.insert(name.clone()) {
        return name;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", name, n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Distinct tuples of the named columns in first-seen order.
pub fn distinct_values<'a>(table: &'a ResultTable, names: &[&str]) -> IndexSet<Vec<&'a Value>> {
    table
        .rows
        .iter()
        .map(|row| {
            names
                .iter()
                .map(|name| row.get(*name).unwrap_or(&Value::Null))
                .collect()
        })
        .collect()
}
