pub mod config;
pub mod engine;
pub mod filter;
pub mod metrics_view;
pub mod pivot;
pub mod plan;
pub mod request;
pub mod resolver;
pub mod result;
pub mod time_grain;

pub use engine::{Engine, EngineError, ExecutionOptions};
pub use metrics_view::{Dimension, Measure, MetricsViewSchema, MetricsViewStore};
pub use request::AggregationRequest;
pub use resolver::{AggregationResolver, FailureKind, ResolverError};
pub use result::{DataType, Field, ResultRow, ResultTable, Value};
pub use time_grain::TimeGrain;
