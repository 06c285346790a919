pub mod local_store;
pub mod s3_store;

use crate::result::DataType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Read-only description of the dimensions and measures a metrics view
/// exposes over one table.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MetricsViewSchema {
    pub name: String,
    pub table: String,
    #[serde(default)]
    pub description: String,
    pub dimensions: Vec<Dimension>,
    pub measures: Vec<Measure>,
}

impl MetricsViewSchema {
    pub fn get_dimension(&self, name: &str) -> Result<&Dimension, MetricsViewStoreError> {
        self.dimensions
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| MetricsViewStoreError::DimensionNotFound(name.to_string()))
    }

    pub fn get_measure(&self, name: &str) -> Result<&Measure, MetricsViewStoreError> {
        self.measures
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| MetricsViewStoreError::MeasureNotFound(name.to_string()))
    }

    /// Checks name uniqueness and that every expression is valid SQL.
    pub fn validate(&self) -> Result<(), MetricsViewStoreError> {
        let invalid = |msg: String| {
            MetricsViewStoreError::InvalidSchema(format!("metrics view '{}': {}", self.name, msg))
        };

        if self.table.trim().is_empty() {
            return Err(invalid("table must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for dimension in &self.dimensions {
            if !seen.insert(dimension.name.as_str()) {
                return Err(invalid(format!("duplicate dimension '{}'", dimension.name)));
            }
            check_expression(dimension.expression()).map_err(|e| {
                invalid(format!("dimension '{}' has an invalid expression: {}", dimension.name, e))
            })?;
        }

        let mut seen = HashSet::new();
        for measure in &self.measures {
            if !seen.insert(measure.name.as_str()) {
                return Err(invalid(format!("duplicate measure '{}'", measure.name)));
            }
            if measure.expression.trim().is_empty() {
                return Err(invalid(format!("measure '{}' has no expression", measure.name)));
            }
            check_expression(&measure.expression).map_err(|e| {
                invalid(format!("measure '{}' has an invalid expression: {}", measure.name, e))
            })?;
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Dimension {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Source expression; the dimension name is used as a column when absent
    #[serde(default)]
    pub expression: Option<String>,
    pub data_type: DataType,
}

impl Dimension {
    pub fn expression(&self) -> &str {
        self.expression.as_deref().unwrap_or(&self.name)
    }

    pub fn is_time(&self) -> bool {
        self.data_type == DataType::Timestamp
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Measure {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Aggregation expression, e.g. `avg(bid_price)`
    pub expression: String,
    #[serde(default = "default_measure_type")]
    pub data_type: DataType,
}

fn default_measure_type() -> DataType {
    DataType::Float
}

/// Returns true for a plain column name such as `pub` or `__time`.
///
/// Bare identifiers are looked up directly instead of being parsed, which
/// also keeps column names that collide with SQL keywords (`timestamp`)
/// usable.
pub fn is_bare_identifier(expr: &str) -> bool {
    let mut chars = expr.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_expression(expr: &str) -> Result<(), String> {
    if is_bare_identifier(expr) {
        return Ok(());
    }
    let dialect = GenericDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(expr)
        .map_err(|e| e.to_string())?;
    parser.parse_expr().map_err(|e| e.to_string())?;
    Ok(())
}

/// Source of [`MetricsViewSchema`]s produced by the reconciliation process.
#[async_trait]
pub trait MetricsViewStore: Send + Sync {
    async fn get_metrics_view(&self, name: &str)
        -> Result<MetricsViewSchema, MetricsViewStoreError>;
    async fn get_all_metrics_views(
        &self,
    ) -> Result<BTreeMap<String, MetricsViewSchema>, MetricsViewStoreError>;
}

#[derive(Error, Debug)]
pub enum MetricsViewStoreError {
    #[error("Metrics view not found: {0}")]
    MetricsViewNotFound(String),

    #[error("Dimension not found: {0}")]
    DimensionNotFound(String),

    #[error("Measure not found: {0}")]
    MeasureNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON format: {0}")]
    InvalidJsonFormat(String),

    #[error("Invalid metrics view: {0}")]
    InvalidSchema(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
