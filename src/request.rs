use crate::filter::Filter;
use crate::time_grain::TimeGrain;
use serde::{Deserialize, Serialize};

/// A declarative aggregation over one metrics view.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AggregationRequest {
    #[serde(default)]
    pub dimensions: Vec<RequestDimension>,
    #[serde(default)]
    pub measures: Vec<RequestMeasure>,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub sort: Vec<Sort>,
    /// Requested dimensions moved from rows into columns, outermost first
    #[serde(default)]
    pub pivot_on: Vec<String>,
    /// Maximum number of row groups
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RequestDimension {
    pub name: String,
    #[serde(default)]
    pub time_grain: Option<TimeGrain>,
}

impl RequestDimension {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            time_grain: None,
        }
    }

    pub fn with_grain(name: impl Into<String>, grain: TimeGrain) -> Self {
        Self {
            name: name.into(),
            time_grain: Some(grain),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RequestMeasure {
    pub name: String,
}

impl RequestMeasure {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Sort {
    pub name: String,
    #[serde(default = "ascending_default")]
    pub ascending: bool,
}

fn ascending_default() -> bool {
    true
}

impl Sort {
    pub fn asc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ascending: true,
        }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ascending: false,
        }
    }
}
