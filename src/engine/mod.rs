pub mod dialect;
pub mod embedded;
pub mod postgres;
pub mod snowflake;

use crate::plan::QueryPlan;
use crate::result::ResultTable;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use dialect::{DuckDbMapping, PostgresMapping, SnowflakeMapping, SqlDialect};
pub use embedded::DuckDbEngine;
pub use postgres::PostgresEngine;
pub use snowflake::SnowflakeEngine;

/// Per-call execution settings forwarded by the resolver.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    pub priority: i32,
    pub timeout: Option<Duration>,
}

/// Engine executes a [`QueryPlan`] and returns its long-format result
///
/// Implementations translate the plan into their own dialect and normalise
/// engine errors into [`EngineError`]. Once `cancel` fires they abort the
/// statement on the engine side, wait for the abort to land and return
/// [`EngineError::Cancelled`]. The resolver fires `cancel` when the caller
/// cancels and when the deadline in `options` passes.
#[async_trait]
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        plan: &QueryPlan,
        options: &ExecutionOptions,
        cancel: &CancellationToken,
    ) -> Result<ResultTable, EngineError>;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Query timed out: {0}")]
    Timeout(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Query cancelled")]
    Cancelled,
}
