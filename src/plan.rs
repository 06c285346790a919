//! Dialect-neutral aggregation plans.
//!
//! A [`QueryPlan`] describes one grouped aggregation: the projected dimension
//! and measure expressions, the filter predicate, ordering and limit. Engines
//! render it to SQL through [`crate::engine::dialect`]. Plans never pivot;
//! pivoting happens on the long-format result so it behaves the same on every
//! engine.

use crate::filter::Predicate;
use crate::resolver::validate::ValidatedRequest;
use crate::result::{DataType, Field};
use crate::time_grain::TimeGrain;
use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum DimensionExpr {
    Column(String),
    TimeBucket { expression: String, grain: TimeGrain },
}

impl DimensionExpr {
    pub fn source(&self) -> &str {
        match self {
            DimensionExpr::Column(expression) => expression,
            DimensionExpr::TimeBucket { expression, .. } => expression,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedDimension {
    pub alias: String,
    pub expr: DimensionExpr,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedMeasure {
    pub alias: String,
    pub expression: String,
    pub data_type: DataType,
}

/// Ordering on an output alias. NULLs always sort last.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub alias: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub table: String,
    /// Projected and grouped by, in request order
    pub dimensions: Vec<PlannedDimension>,
    pub measures: Vec<PlannedMeasure>,
    pub predicate: Predicate,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<u64>,
}

impl QueryPlan {
    /// Fields of the long-format result: dimensions, then measures.
    pub fn output_schema(&self) -> Vec<Field> {
        self.dimensions
            .iter()
            .map(|d| Field::new(d.alias.clone(), d.data_type))
            .chain(
                self.measures
                    .iter()
                    .map(|m| Field::new(m.alias.clone(), m.data_type)),
            )
            .collect()
    }
}

/// Builds the base aggregation for a validated request.
///
/// Dimensions without a declared sort key are appended as ascending
/// tie-breakers, pivoted dimensions first, so that row order and the order in
/// which pivot columns are first encountered do not depend on the engine's
/// grouping strategy. The row-group limit of a pivoted request applies to
/// remaining-dimension tuples, so it is enforced by the pivot rather than as
/// an engine `LIMIT`.
pub fn build(table: &str, request: &ValidatedRequest<'_>) -> QueryPlan {
    let dimensions: Vec<PlannedDimension> = request
        .dimensions
        .iter()
        .map(|resolved| {
            let expression = resolved.dimension.expression().to_string();
            let expr = match resolved.grain {
                Some(grain) => DimensionExpr::TimeBucket { expression, grain },
                None => DimensionExpr::Column(expression),
            };
            PlannedDimension {
                alias: resolved.dimension.name.clone(),
                expr,
                data_type: resolved.dimension.data_type,
            }
        })
        .collect();

    let measures = request
        .measures
        .iter()
        .map(|measure| PlannedMeasure {
            alias: measure.name.clone(),
            expression: measure.expression.clone(),
            data_type: measure.data_type,
        })
        .collect();

    let mut order_by: Vec<OrderKey> = request
        .sort
        .iter()
        .map(|sort| OrderKey {
            alias: sort.name.clone(),
            ascending: sort.ascending,
        })
        .collect();

    let tie_breakers = request
        .pivot_on
        .iter()
        .map(String::as_str)
        .chain(request.dimensions.iter().map(|d| d.name()));
    for name in tie_breakers {
        if !order_by.iter().any(|key| key.alias == name) {
            order_by.push(OrderKey {
                alias: name.to_string(),
                ascending: true,
            });
        }
    }

    let limit = if request.is_pivot() { None } else { request.limit };

    let plan = QueryPlan {
        table: table.to_string(),
        dimensions,
        measures,
        predicate: request.predicate.clone(),
        order_by,
        limit,
    };
    debug!("Built aggregation plan: {:?}", plan);
    plan
}
