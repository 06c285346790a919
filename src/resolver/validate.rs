use crate::filter::{self, Predicate};
use crate::metrics_view::{Dimension, Measure, MetricsViewSchema};
use crate::request::{AggregationRequest, Sort};
use crate::resolver::ResolverError;
use crate::time_grain::TimeGrain;
use std::collections::HashSet;

/// A requested dimension bound to its schema definition.
#[derive(Debug, Clone)]
pub struct ResolvedDimension<'a> {
    pub dimension: &'a Dimension,
    pub grain: Option<TimeGrain>,
}

impl<'a> ResolvedDimension<'a> {
    pub fn name(&self) -> &'a str {
        &self.dimension.name
    }
}

/// An [`AggregationRequest`] whose every reference has been checked against
/// the metrics view.
#[derive(Debug, Clone)]
pub struct ValidatedRequest<'a> {
    pub dimensions: Vec<ResolvedDimension<'a>>,
    pub measures: Vec<&'a Measure>,
    pub predicate: Predicate,
    pub sort: Vec<Sort>,
    pub pivot_on: Vec<String>,
    pub limit: Option<u64>,
}

impl<'a> ValidatedRequest<'a> {
    pub fn is_pivot(&self) -> bool {
        !self.pivot_on.is_empty()
    }

    pub fn dimension(&self, name: &str) -> Option<&ResolvedDimension<'a>> {
        self.dimensions.iter().find(|d| d.name() == name)
    }
}

/// Validates `request` against `schema`. Nothing reaches an engine unless
/// this succeeds.
pub fn validate<'a>(
    schema: &'a MetricsViewSchema,
    request: &AggregationRequest,
) -> Result<ValidatedRequest<'a>, ResolverError> {
    if request.dimensions.is_empty() && request.measures.is_empty() {
        return Err(invalid("at least one dimension or measure is required"));
    }

    let mut output_names = HashSet::new();

    let mut dimensions = Vec::with_capacity(request.dimensions.len());
    for requested in &request.dimensions {
        let dimension = schema
            .get_dimension(&requested.name)
            .map_err(|e| ResolverError::InvalidRequest(e.to_string()))?;
        if let Some(grain) = requested.time_grain {
            if !dimension.is_time() {
                return Err(invalid(format!(
                    "time grain '{}' is not allowed on non-timestamp dimension '{}'",
                    grain, dimension.name
                )));
            }
        }
        if !output_names.insert(dimension.name.as_str()) {
            return Err(invalid(format!(
                "dimension '{}' is requested more than once",
                dimension.name
            )));
        }
        dimensions.push(ResolvedDimension {
            dimension,
            grain: requested.time_grain,
        });
    }

    let mut measures = Vec::with_capacity(request.measures.len());
    for requested in &request.measures {
        let measure = schema
            .get_measure(&requested.name)
            .map_err(|e| ResolverError::InvalidRequest(e.to_string()))?;
        if !output_names.insert(measure.name.as_str()) {
            return Err(invalid(format!(
                "'{}' is requested more than once",
                measure.name
            )));
        }
        measures.push(measure);
    }

    let mut pivoted = HashSet::new();
    for name in &request.pivot_on {
        if !dimensions.iter().any(|d| d.name() == name) {
            return Err(invalid(format!(
                "pivot_on references '{}' which is not a requested dimension",
                name
            )));
        }
        if !pivoted.insert(name.as_str()) {
            return Err(invalid(format!("'{}' appears more than once in pivot_on", name)));
        }
    }

    for sort in &request.sort {
        if !output_names.contains(sort.name.as_str()) {
            return Err(invalid(format!(
                "sort references '{}' which is not a requested dimension or measure",
                sort.name
            )));
        }
    }

    if request.limit == Some(0) {
        return Err(invalid("limit must be greater than zero"));
    }

    let predicate = filter::compile(&request.filter, schema)
        .map_err(|e| ResolverError::InvalidRequest(e.to_string()))?;

    Ok(ValidatedRequest {
        dimensions,
        measures,
        predicate,
        sort: request.sort.clone(),
        pivot_on: request.pivot_on.clone(),
        limit: request.limit,
    })
}

fn invalid(message: impl Into<String>) -> ResolverError {
    ResolverError::InvalidRequest(message.into())
}
