use crate::config::SnowflakeConfig;
use crate::engine::dialect::{render_plan, SnowflakeMapping};
use crate::engine::{Engine, EngineError, ExecutionOptions};
use crate::plan::QueryPlan;
use crate::result::{DataType, Field, ResultRow, ResultTable, Value};
use crate::time_grain::parse_timestamp;
use async_trait::async_trait;
use chrono::{DateTime, Duration};
use log::{debug, warn};
use snowflake_connector_rs::{
    SnowflakeAuthMethod, SnowflakeClient, SnowflakeClientConfig, SnowflakeRow, SnowflakeSession,
};
use tokio_util::sync::CancellationToken;

pub struct SnowflakeEngine {
    client: SnowflakeClient,
    mapping: SnowflakeMapping,
}

impl SnowflakeEngine {
    pub fn new(config: SnowflakeConfig) -> Result<Self, EngineError> {
        let client = SnowflakeClient::new(
            &config.user,
            SnowflakeAuthMethod::Password(config.password.clone()),
            SnowflakeClientConfig {
                account: config.account.clone(),
                warehouse: config.warehouse.clone(),
                database: config.database.clone(),
                schema: config.schema.clone(),
                role: config.role.clone(),
                ..Default::default()
            },
        )
        .map_err(|e| EngineError::ConnectionError(e.to_string()))?;

        Ok(SnowflakeEngine {
            client,
            mapping: SnowflakeMapping,
        })
    }

    async fn connect(&self) -> Result<SnowflakeSession, EngineError> {
        self.client.create_session().await.map_err(|e| {
            EngineError::ConnectionError(format!("Failed to connect to Snowflake, {}", e))
        })
    }
}

/// Session settings applied before the query: the priority as `QUERY_TAG`
/// and the deadline as `STATEMENT_TIMEOUT_IN_SECONDS`.
fn session_statements(options: &ExecutionOptions) -> Vec<String> {
    let mut statements = vec![format!(
        "ALTER SESSION SET QUERY_TAG = 'eqtble-aggregation priority={}'",
        options.priority
    )];
    if let Some(timeout) = options.timeout {
        let seconds = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        statements.push(format!(
            "ALTER SESSION SET STATEMENT_TIMEOUT_IN_SECONDS = {}",
            seconds.max(1)
        ));
    }
    statements
}

/// Statement aborting every running query of `session_id`. Session ids are
/// numeric; anything else yields `None`.
fn cancel_statement(session_id: &str) -> Option<String> {
    (!session_id.is_empty() && session_id.chars().all(|c| c.is_ascii_digit()))
        .then(|| format!("SELECT SYSTEM$CANCEL_ALL_QUERIES({})", session_id))
}

async fn current_session_id(session: &SnowflakeSession) -> Result<String, EngineError> {
    let rows = session
        .query("SELECT CURRENT_SESSION() AS SESSION_ID")
        .await
        .map_err(map_error)?;
    rows.first()
        .ok_or_else(|| EngineError::QueryError("CURRENT_SESSION() returned no rows".to_string()))?
        .get::<String>("SESSION_ID")
        .map_err(|e| EngineError::QueryError(e.to_string()))
}

#[async_trait]
impl Engine for SnowflakeEngine {
    fn name(&self) -> &str {
        "snowflake"
    }

    async fn execute(
        &self,
        plan: &QueryPlan,
        options: &ExecutionOptions,
        cancel: &CancellationToken,
    ) -> Result<ResultTable, EngineError> {
        let sql = render_plan(&self.mapping, plan)?;
        debug!("Executing on Snowflake (priority {}): {}", options.priority, sql);

        let session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            session = self.connect() => session?,
        };
        for statement in session_statements(options) {
            session.query(statement.as_str()).await.map_err(map_error)?;
        }
        let session_id = current_session_id(&session).await?;

        let query = session.query(sql.as_str());
        tokio::pin!(query);

        let rows = tokio::select! {
            result = &mut query => result.map_err(map_error)?,
            _ = cancel.cancelled() => {
                warn!("Cancelling Snowflake queries of session {}", session_id);
                match cancel_statement(&session_id) {
                    Some(statement) => {
                        if let Err(e) = session.query(statement.as_str()).await {
                            warn!("Failed to cancel Snowflake query: {}", e);
                        }
                    }
                    None => warn!("Unexpected Snowflake session id {}", session_id),
                }
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

fn decode_row(row: &SnowflakeRow, schema: &[Field]) -> Result<ResultRow, EngineError> {
    let columns = row.column_names();
    if columns.len() != schema.len() {
        return Err(EngineError::QueryError(format!(
            "expected {} columns, got {}",
            schema.len(),
            columns.len()
        )));
    }
    let mut out = ResultRow::with_capacity(schema.len());
    for (column, field) in columns.into_iter().zip(schema) {
        let raw = row
            .get::<Option<String>>(column)
            .map_err(|e| EngineError::QueryError(format!("column '{}': {}", field.name, e)))?;
        out.insert(field.name.clone(), decode_text(field, raw)?);
    }
    Ok(out)
}

/// Converts one cell of Snowflake's text result format. Timestamps arrive as
/// fractional epoch seconds and booleans as `1`/`0` or `true`/`false`.
fn decode_text(field: &Field, raw: Option<String>) -> Result<Value, EngineError> {
    let raw = match raw {
        Some(raw) => raw,
        None => return Ok(Value::Null),
    };
    let value = match field.data_type {
        DataType::Timestamp => epoch_seconds(&raw).or_else(|| parse_timestamp(&raw)).map(Value::Timestamp),
        DataType::Boolean => match raw.as_str() {
            "1" => Some(Value::Boolean(true)),
            "0" => Some(Value::Boolean(false)),
            _ => field.data_type.coerce(&Value::String(raw.clone())),
        },
        data_type => data_type.coerce(&Value::String(raw.clone())),
    };
    value.ok_or_else(|| {
        EngineError::QueryError(format!(
            "cannot decode '{}' as {:?} for column '{}'",
            raw, field.data_type, field.name
        ))
    })
}

fn epoch_seconds(raw: &str) -> Option<chrono::NaiveDateTime> {
    let (secs, fraction) = match raw.split_once('.') {
        Some((secs, fraction)) => (secs, fraction),
        None => (raw, ""),
    };
    let whole: i64 = secs.parse().ok()?;
    let nanos = if fraction.is_empty() {
        0
    } else {
        let digits: String = fraction.chars().chain(std::iter::repeat('0')).take(9).collect();
        digits.parse::<i64>().ok()?
    };
    // The fraction carries the sign of the whole value, "-0.5" included
    let nanos = if secs.starts_with('-') { -nanos } else { nanos };
    DateTime::from_timestamp(whole, 0)
        .and_then(|dt| dt.checked_add_signed(Duration::nanoseconds(nanos)))
        .map(|dt| dt.naive_utc())
}

fn map_error(e: snowflake_connector_rs::Error) -> EngineError {
    let message = e.to_string();
    // 000604: statement cancelled, 000630: statement timeout
    if message.contains("000604") || message.contains("000630") {
        EngineError::Timeout(message)
    } else {
        EngineError::QueryError(message)
    }
}
