mod error;
pub mod validate;

pub use error::{FailureKind, ResolverError};

use crate::config::ResolverConfig;
use crate::engine::{Engine, EngineError, ExecutionOptions};
use crate::metrics_view::{MetricsViewSchema, MetricsViewStore};
use crate::pivot::{self, PivotKey, PivotSpec};
use crate::plan;
use crate::request::AggregationRequest;
use crate::result::ResultTable;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use validate::ValidatedRequest;

/// Resolves aggregation requests against one engine.
///
/// The resolver holds no per-request state; a single instance can serve
/// concurrent calls.
pub struct AggregationResolver<E: Engine + ?Sized> {
    engine: Arc<E>,
    config: ResolverConfig,
}

impl<E: Engine + ?Sized> AggregationResolver<E> {
    pub fn new(engine: Arc<E>, config: ResolverConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Validates `request` against `schema`, executes the base aggregation
    /// and pivots it when `pivot_on` is set.
    ///
    /// Invalid requests fail before the engine is called. Firing `cancel`
    /// makes the engine abort its statement and yields
    /// [`ResolverError::Cancelled`]; exceeding the configured query timeout
    /// aborts it the same way and yields an execution failure of kind
    /// [`FailureKind::Timeout`]. Both wait for the engine to return. No
    /// partial result is ever returned.
    pub async fn resolve(
        &self,
        schema: &MetricsViewSchema,
        request: &AggregationRequest,
        priority: i32,
        cancel: &CancellationToken,
    ) -> Result<ResultTable, ResolverError> {
        let started = Instant::now();

        let validated = validate::validate(schema, request).map_err(|e| {
            debug!("Rejected request on {}: {}", schema.name, e);
            e
        })?;
        let plan = plan::build(&schema.table, &validated);

        if cancel.is_cancelled() {
            return Err(ResolverError::Cancelled);
        }

        let options = ExecutionOptions {
            priority,
            timeout: self.config.query_timeout(),
        };
        // The engine sees a child token so that the deadline can abort it
        // without cancelling the caller's token.
        let abort = cancel.child_token();
        let execution = self.engine.execute(&plan, &options, &abort);
        let (long, timed_out) = run_until_deadline(execution, &abort, options.timeout).await;

        let long = match long {
            _ if cancel.is_cancelled() => {
                warn!("Aggregation on {} cancelled after {:?}", schema.name, started.elapsed());
                return Err(ResolverError::Cancelled);
            }
            Err(EngineError::Cancelled) if timed_out => {
                return Err(EngineError::Timeout(format!(
                    "query exceeded {:?}",
                    options.timeout.unwrap_or_default()
                ))
                .into());
            }
            Ok(table) => table,
            Err(EngineError::Cancelled) => {
                warn!("Engine {} reported cancellation", self.engine.name());
                return Err(ResolverError::Cancelled);
            }
            Err(e) => {
                error!(
                    "Aggregation on {} failed in engine {}: {}",
                    schema.name,
                    self.engine.name(),
                    e
                );
                return Err(e.into());
            }
        };

        let result = if validated.is_pivot() {
            pivot::pivot(&long, &pivot_spec(&validated), group_limit(&validated))?
        } else {
            long
        };

        info!(
            "Resolved aggregation on {} via {}: {} rows x {} columns in {:?}",
            schema.name,
            self.engine.name(),
            result.len(),
            result.schema.len(),
            started.elapsed()
        );
        Ok(result)
    }

    /// Like [`resolve`](Self::resolve), loading the metrics view by name.
    pub async fn resolve_by_name(
        &self,
        store: &dyn MetricsViewStore,
        metrics_view: &str,
        request: &AggregationRequest,
        priority: i32,
        cancel: &CancellationToken,
    ) -> Result<ResultTable, ResolverError> {
        let schema = store.get_metrics_view(metrics_view).await?;
        self.resolve(&schema, request, priority, cancel).await
    }
}

/// Drives `execution` to completion. When `timeout` passes first, `abort`
/// is fired and the engine is still awaited so that its own abort runs; the
/// flag reports whether that happened.
async fn run_until_deadline<F>(
    execution: F,
    abort: &CancellationToken,
    timeout: Option<Duration>,
) -> (Result<ResultTable, EngineError>, bool)
where
    F: std::future::Future<Output = Result<ResultTable, EngineError>>,
{
    tokio::pin!(execution);
    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = &mut execution => (result, false),
        _ = deadline => {
            warn!("Aggregation exceeded the {:?} deadline, aborting", timeout.unwrap_or_default());
            abort.cancel();
            (execution.await, true)
        }
    }
}

fn pivot_spec(request: &ValidatedRequest<'_>) -> PivotSpec {
    PivotSpec {
        remaining: request
            .dimensions
            .iter()
            .filter(|d| !request.pivot_on.iter().any(|p| p == d.name()))
            .map(|d| d.name().to_string())
            .collect(),
        pivoted: request
            .pivot_on
            .iter()
            .map(|name| PivotKey {
                name: name.clone(),
                grain: request.dimension(name).and_then(|d| d.grain),
            })
            .collect(),
        measures: request.measures.iter().map(|m| m.name.clone()).collect(),
    }
}

fn group_limit(request: &ValidatedRequest<'_>) -> Option<usize> {
    request
        .limit
        .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX))
}
