use crate::config::PostgresConfig;
use crate::engine::dialect::{render_plan, PostgresMapping};
use crate::engine::{Engine, EngineError, ExecutionOptions};
use crate::plan::QueryPlan;
use crate::result::{Field, ResultRow, ResultTable, Value};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use log::{debug, error, warn};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, NoTls, Row};
use tokio_util::sync::CancellationToken;

/// Postgres engine opening one connection per query, so that a cancel
/// request only reaches the statement it was issued for.
pub struct PostgresEngine {
    config: PostgresConfig,
    mapping: PostgresMapping,
}

impl PostgresEngine {
    pub fn new(config: PostgresConfig) -> Self {
        PostgresEngine {
            config,
            mapping: PostgresMapping,
        }
    }

    async fn connect(&self) -> Result<Client, EngineError> {
        let (client, connection) = tokio_postgres::connect(&self.config.connection_string(), NoTls)
            .await
            .map_err(|e| EngineError::ConnectionError(e.to_string()))?;

        // Spawn a task to manage the connection
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Postgres connection error: {}", e);
            }
        });

        debug!("Connected to Postgres at {}/{}", self.config.host, self.config.dbname);
        Ok(client)
    }
}

/// Session settings applied before the query: the priority as
/// `application_name` and the deadline as `statement_timeout`.
fn session_statements(options: &ExecutionOptions) -> String {
    let mut statements = vec![format!(
        "SET application_name = 'eqtble-aggregation priority={}'",
        options.priority
    )];
    if let Some(timeout) = options.timeout {
        statements.push(format!("SET statement_timeout = {}", timeout.as_millis()));
    }
    statements.join("; ")
}

#[async_trait]
impl Engine for PostgresEngine {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn execute(
        &self,
        plan: &QueryPlan,
        options: &ExecutionOptions,
        cancel: &CancellationToken,
    ) -> Result<ResultTable, EngineError> {
        let sql = render_plan(&self.mapping, plan)?;
        debug!("Executing on Postgres (priority {}): {}", options.priority, sql);

        let client = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            client = self.connect() => client?,
        };
        client
            .batch_execute(&session_statements(options))
            .await
            .map_err(map_error)?;

        let cancel_token = client.cancel_token();
        let query = client.query(sql.as_str(), &[]);
        tokio::pin!(query);

        let rows = tokio::select! {
            result = &mut query => result.map_err(map_error)?,
            _ = cancel.cancelled() => {
                if let Err(e) = cancel_token.cancel_query(NoTls).await {
                    warn!("Failed to cancel Postgres query: {}", e);
                }
                // The server ends the statement with QUERY_CANCELED
                let _ = query.await;
                return Err(EngineError::Cancelled);
            }
        };

        let schema = plan.output_schema();
        let rows = rows
            .iter()
            .map(|row| decode_row(row, &schema))
            .collect::<Result<Vec<_>, EngineError>>()?;
        Ok(ResultTable::new(schema, rows))
    }
}

fn decode_row(row: &Row, schema: &[Field]) -> Result<ResultRow, EngineError> {
    if row.len() != schema.len() {
        return Err(EngineError::QueryError(format!(
            "expected {} columns, got {}",
            schema.len(),
            row.len()
        )));
    }
    let mut out = ResultRow::with_capacity(schema.len());
    for (idx, field) in schema.iter().enumerate() {
        let value = decode_cell(row, idx, field)?;
        let value = field.data_type.coerce(&value).unwrap_or(value);
        out.insert(field.name.clone(), value);
    }
    Ok(out)
}

fn decode_cell(row: &Row, idx: usize, field: &Field) -> Result<Value, EngineError> {
    let ty = row.columns()[idx].type_();
    let decoded = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx).map(Value::from)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)
            .map(|v| Value::from(v.map(i64::from)))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)
            .map(|v| Value::from(v.map(i64::from)))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx).map(Value::from)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)
            .map(|v| Value::from(v.map(f64::from)))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx).map(Value::from)
    } else if *ty == Type::NUMERIC {
        row.try_get::<_, Option<Decimal>>(idx)
            .map(|v| Value::from(v.and_then(|d| d.to_f64())))
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx).map(Value::from)
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx)
            .map(|v| Value::from(v.map(|ts| ts.naive_utc())))
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<NaiveDate>>(idx)
            .map(|v| Value::from(v.map(|d| d.and_time(NaiveTime::MIN))))
    } else if [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME].contains(ty) {
        row.try_get::<_, Option<String>>(idx).map(Value::from)
    } else {
        return Err(EngineError::Unsupported(format!(
            "Postgres type {} of column '{}'",
            ty, field.name
        )));
    };
    decoded.map_err(|e| EngineError::QueryError(format!("column '{}': {}", field.name, e)))
}

fn map_error(e: tokio_postgres::Error) -> EngineError {
    if e.is_closed() {
        return EngineError::ConnectionError(e.to_string());
    }
    let message = e
        .as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| e.to_string());
    match e.code() {
        Some(code) if *code == SqlState::QUERY_CANCELED => EngineError::Timeout(message),
        Some(code) if is_resource_exhaustion(code) => EngineError::ResourceExhausted(message),
        Some(code) if *code == SqlState::CONNECTION_FAILURE => EngineError::ConnectionError(message),
        _ => EngineError::QueryError(message),
    }
}

fn is_resource_exhaustion(code: &SqlState) -> bool {
    [
        SqlState::OUT_OF_MEMORY,
        SqlState::DISK_FULL,
        SqlState::INSUFFICIENT_RESOURCES,
        SqlState::TOO_MANY_CONNECTIONS,
        SqlState::CONFIGURATION_LIMIT_EXCEEDED,
    ]
    .contains(code)
}
