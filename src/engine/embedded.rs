//! Embedded DuckDB engine.
//!
//! Plans are rendered in DuckDB's dialect and run on the blocking pool, each
//! call on its own connection cloned from the shared database. Cancellation
//! interrupts the running statement through that connection's interrupt
//! handle.

use crate::config::DuckDbConfig;
use crate::engine::dialect::{render_plan, DuckDbMapping, SqlDialect};
use crate::engine::{Engine, EngineError, ExecutionOptions};
use crate::plan::QueryPlan;
use crate::result::{DataType, Field, ResultRow, ResultTable, Value};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use duckdb::types::{TimeUnit, Value as DuckValue};
use duckdb::Connection;
use log::{debug, warn};
use rust_decimal::prelude::ToPrimitive;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const INTERRUPT_RETRY: Duration = Duration::from_millis(10);

// Days from 0001-01-01 to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

pub struct DuckDbEngine {
    connection: Mutex<Connection>,
    mapping: DuckDbMapping,
}

impl DuckDbEngine {
    pub fn new(config: &DuckDbConfig) -> Result<Self, EngineError> {
        let connection = if config.is_in_memory() {
            Connection::open_in_memory()
        } else {
            Connection::open(&config.path)
        }
        .map_err(|e| EngineError::ConnectionError(format!("Failed to open DuckDB, {}", e)))?;

        if let Some(threads) = config.threads {
            connection
                .execute_batch(&format!("PRAGMA threads={}", threads))
                .map_err(map_error)?;
        }

        debug!("Opened DuckDB database {}", config.path);
        Ok(DuckDbEngine {
            connection: Mutex::new(connection),
            mapping: DuckDbMapping,
        })
    }

    pub fn open_in_memory() -> Result<Self, EngineError> {
        Self::new(&DuckDbConfig::default())
    }

    /// Creates table `name` with `columns` and inserts `rows`. A column
    /// missing from a row is stored as NULL.
    pub fn load_table(
        &self,
        name: &str,
        columns: &[Field],
        rows: &[ResultRow],
    ) -> Result<(), EngineError> {
        let table = self.mapping.quote_ident(name);
        let definitions = columns
            .iter()
            .map(|field| {
                format!(
                    "{} {}",
                    self.mapping.quote_ident(&field.name),
                    column_type(field.data_type)
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("CREATE TABLE {} ({});", table, definitions);

        if !rows.is_empty() {
            let values = rows
                .iter()
                .map(|row| {
                    let cells = columns
                        .iter()
                        .map(|field| self.mapping.literal(row.get(&field.name).unwrap_or(&Value::Null)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("({})", cells)
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" INSERT INTO {} VALUES {};", table, values));
        }

        self.connection()?.execute_batch(&sql).map_err(map_error)?;
        debug!("Loaded {} rows into DuckDB table {}", rows.len(), name);
        Ok(())
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, EngineError> {
        self.connection
            .lock()
            .map_err(|_| EngineError::ConnectionError("DuckDB connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl Engine for DuckDbEngine {
    fn name(&self) -> &str {
        "duckdb"
    }

    async fn execute(
        &self,
        plan: &QueryPlan,
        options: &ExecutionOptions,
        cancel: &CancellationToken,
    ) -> Result<ResultTable, EngineError> {
        let sql = render_plan(&self.mapping, plan)?;
        debug!("Executing on DuckDB (priority {}): {}", options.priority, sql);

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let connection = self.connection()?.try_clone().map_err(map_error)?;
        let interrupt = connection.interrupt_handle();
        let schema = plan.output_schema();
        let fields = schema.clone();
        let mut work = tokio::task::spawn_blocking(move || run_query(&connection, &sql, &fields));

        let joined = tokio::select! {
            joined = &mut work => joined,
            _ = cancel.cancelled() => {
                warn!("Interrupting DuckDB query after cancellation");
                // An interrupt raised before the statement starts is discarded,
                // so repeat it until the worker returns.
                loop {
                    interrupt.interrupt();
                    tokio::select! {
                        _ = &mut work => break,
                        _ = tokio::time::sleep(INTERRUPT_RETRY) => {}
                    }
                }
                return Err(EngineError::Cancelled);
            }
        };

        let rows = joined
            .map_err(|e| EngineError::QueryError(format!("DuckDB worker failed: {}", e)))??;
        Ok(ResultTable::new(schema, rows))
    }
}

fn run_query(connection: &Connection, sql: &str, schema: &[Field]) -> Result<Vec<ResultRow>, EngineError> {
    let mut statement = connection.prepare(sql).map_err(map_error)?;
    let mut rows = statement.query([]).map_err(map_error)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(map_error)? {
        let mut decoded = ResultRow::with_capacity(schema.len());
        for (idx, field) in schema.iter().enumerate() {
            let raw: DuckValue = row
                .get(idx)
                .map_err(|e| EngineError::QueryError(format!("column '{}': {}", field.name, e)))?;
            let value = decode_value(raw, field)?;
            let value = field.data_type.coerce(&value).unwrap_or(value);
            decoded.insert(field.name.clone(), value);
        }
        out.push(decoded);
    }
    Ok(out)
}

fn column_type(data_type: DataType) -> &'static str {
    match data_type {
        DataType::String => "VARCHAR",
        DataType::Integer => "BIGINT",
        DataType::Float => "DOUBLE",
        DataType::Boolean => "BOOLEAN",
        DataType::Timestamp => "TIMESTAMP",
    }
}

fn decode_value(raw: DuckValue, field: &Field) -> Result<Value, EngineError> {
    let value = match raw {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Boolean(b),
        DuckValue::TinyInt(i) => Value::Int(i.into()),
        DuckValue::SmallInt(i) => Value::Int(i.into()),
        DuckValue::Int(i) => Value::Int(i.into()),
        DuckValue::BigInt(i) => Value::Int(i),
        DuckValue::UTinyInt(i) => Value::Int(i.into()),
        DuckValue::USmallInt(i) => Value::Int(i.into()),
        DuckValue::UInt(i) => Value::Int(i.into()),
        DuckValue::UBigInt(i) => i64::try_from(i)
            .map(Value::Int)
            .unwrap_or(Value::Float(i as f64)),
        // Sums of BIGINT columns arrive as HUGEINT
        DuckValue::HugeInt(i) => i64::try_from(i)
            .map(Value::Int)
            .unwrap_or(Value::Float(i as f64)),
        DuckValue::Float(f) => Value::Float(f.into()),
        DuckValue::Double(f) => Value::Float(f),
        DuckValue::Decimal(d) => Value::from(d.to_f64()),
        DuckValue::Text(s) => Value::String(s),
        DuckValue::Timestamp(unit, ticks) => match timestamp(unit, ticks) {
            Some(ts) => Value::Timestamp(ts),
            None => {
                return Err(EngineError::QueryError(format!(
                    "timestamp out of range in column '{}'",
                    field.name
                )))
            }
        },
        DuckValue::Date32(days) => Value::from(
            days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)
                .and_then(NaiveDate::from_num_days_from_ce_opt)
                .map(|d| d.and_time(NaiveTime::MIN)),
        ),
        other => {
            return Err(EngineError::Unsupported(format!(
                "DuckDB value {:?} of column '{}'",
                other, field.name
            )))
        }
    };
    Ok(value)
}

fn timestamp(unit: TimeUnit, ticks: i64) -> Option<NaiveDateTime> {
    let micros = match unit {
        TimeUnit::Second => ticks.checked_mul(1_000_000)?,
        TimeUnit::Millisecond => ticks.checked_mul(1_000)?,
        TimeUnit::Microsecond => ticks,
        TimeUnit::Nanosecond => ticks / 1_000,
    };
    DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())
}

fn map_error(e: duckdb::Error) -> EngineError {
    classify(e.to_string())
}

fn classify(message: String) -> EngineError {
    if message.contains("INTERRUPT") {
        EngineError::Cancelled
    } else if message.contains("Out of Memory") {
        EngineError::ResourceExhausted(message)
    } else if message.contains("IO Error") {
        EngineError::ConnectionError(message)
    } else {
        EngineError::QueryError(message)
    }
}
