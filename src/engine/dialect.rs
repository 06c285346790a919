use crate::engine::EngineError;
use crate::filter::Predicate;
use crate::metrics_view::is_bare_identifier;
use crate::plan::{DimensionExpr, QueryPlan};
use crate::result::Value;
use crate::time_grain::TimeGrain;
use chrono::NaiveDateTime;
use log::debug;
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, DuckDbDialect, PostgreSqlDialect, SnowflakeDialect};
use sqlparser::parser::Parser;

/// SqlDialect maps the neutral plan onto one engine's SQL
pub trait SqlDialect: Send + Sync {
    /// Dialect the rendered statement must parse under
    fn get_dialect(&self) -> &dyn Dialect;

    /// Expression truncating `column` to the start of its `grain` bucket
    fn time_truncate(&self, column: &str, grain: TimeGrain) -> String;

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Renders a dimension source expression. Bare column names are quoted
    /// so that names such as `timestamp` are not read as keywords.
    fn column_ref(&self, expression: &str) -> String {
        if is_bare_identifier(expression) {
            self.quote_ident(expression)
        } else {
            expression.to_string()
        }
    }

    fn timestamp_literal(&self, ts: &NaiveDateTime) -> String {
        format!("TIMESTAMP '{}'", ts.format("%Y-%m-%d %H:%M:%S%.f"))
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Boolean(true) => "TRUE".to_string(),
            Value::Boolean(false) => "FALSE".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{:?}", f),
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Timestamp(ts) => self.timestamp_literal(ts),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostgresMapping;

impl SqlDialect for PostgresMapping {
    fn get_dialect(&self) -> &dyn Dialect {
        &PostgreSqlDialect {}
    }

    fn time_truncate(&self, column: &str, grain: TimeGrain) -> String {
        format!("date_trunc('{}', {})", grain.as_str(), column)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DuckDbMapping;

impl SqlDialect for DuckDbMapping {
    fn get_dialect(&self) -> &dyn Dialect {
        &DuckDbDialect {}
    }

    fn time_truncate(&self, column: &str, grain: TimeGrain) -> String {
        format!("date_trunc('{}', {})", grain.as_str(), column)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SnowflakeMapping;

impl SqlDialect for SnowflakeMapping {
    fn get_dialect(&self) -> &dyn Dialect {
        &SnowflakeDialect {}
    }

    fn time_truncate(&self, column: &str, grain: TimeGrain) -> String {
        format!("DATE_TRUNC('{}', {})", grain.as_str().to_uppercase(), column)
    }

    // Unquoted names resolve case-insensitively in Snowflake.
    fn column_ref(&self, expression: &str) -> String {
        expression.to_string()
    }

    fn timestamp_literal(&self, ts: &NaiveDateTime) -> String {
        format!("'{}'::TIMESTAMP_NTZ", ts.format("%Y-%m-%d %H:%M:%S%.f"))
    }
}

/// Renders `plan` as a single SELECT statement in `dialect`.
///
/// The text is round-tripped through the dialect's parser, so an expression
/// the engine cannot parse is reported before anything is sent.
pub fn render_plan(dialect: &dyn SqlDialect, plan: &QueryPlan) -> Result<String, EngineError> {
    let mut items = Vec::with_capacity(plan.dimensions.len() + plan.measures.len());
    for dimension in &plan.dimensions {
        let expr = match &dimension.expr {
            DimensionExpr::Column(expression) => dialect.column_ref(expression),
            DimensionExpr::TimeBucket { expression, grain } => {
                dialect.time_truncate(&dialect.column_ref(expression), *grain)
            }
        };
        items.push(format!("{} AS {}", expr, dialect.quote_ident(&dimension.alias)));
    }
    for measure in &plan.measures {
        items.push(format!(
            "{} AS {}",
            measure.expression,
            dialect.quote_ident(&measure.alias)
        ));
    }

    let mut sql = format!("SELECT {} FROM {}", items.join(", "), plan.table);

    if !plan.predicate.is_always_true() {
        sql.push_str(" WHERE ");
        sql.push_str(&render_predicate(dialect, &plan.predicate));
    }

    if !plan.dimensions.is_empty() {
        let positions: Vec<String> = (1..=plan.dimensions.len()).map(|i| i.to_string()).collect();
        sql.push_str(" GROUP BY ");
        sql.push_str(&positions.join(", "));
    }

    if !plan.order_by.is_empty() {
        let keys: Vec<String> = plan
            .order_by
            .iter()
            .map(|key| {
                format!(
                    "{} {} NULLS LAST",
                    dialect.quote_ident(&key.alias),
                    if key.ascending { "ASC" } else { "DESC" }
                )
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&keys.join(", "));
    }

    if let Some(limit) = plan.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let mut statements = Parser::parse_sql(dialect.get_dialect(), &sql)
        .map_err(|e| EngineError::Unsupported(format!("{} in `{}`", e, sql)))?;
    if statements.len() != 1 {
        return Err(EngineError::Unsupported(format!(
            "expected a single statement, rendered {}",
            statements.len()
        )));
    }
    match statements.remove(0) {
        statement @ Statement::Query(_) => {
            let sql = statement.to_string();
            debug!("Rendered plan: {}", sql);
            Ok(sql)
        }
        _ => Err(EngineError::Unsupported(
            "Only read-only SQL statements are allowed".to_string(),
        )),
    }
}

fn render_predicate(dialect: &dyn SqlDialect, predicate: &Predicate) -> String {
    match predicate {
        Predicate::Constant(true) => "1 = 1".to_string(),
        Predicate::Constant(false) => "1 = 0".to_string(),
        Predicate::InList {
            expression,
            values,
            null_listed,
            negated,
            ..
        } => {
            let column = dialect.column_ref(expression);
            let list = values
                .iter()
                .map(|v| dialect.literal(v))
                .collect::<Vec<_>>()
                .join(", ");
            match (values.is_empty(), *null_listed, *negated) {
                (true, false, false) => "1 = 0".to_string(),
                (true, false, true) => "1 = 1".to_string(),
                (true, true, false) => format!("{} IS NULL", column),
                (true, true, true) => format!("{} IS NOT NULL", column),
                (false, false, false) => format!("{} IN ({})", column, list),
                (false, true, false) => format!("({} IN ({}) OR {} IS NULL)", column, list, column),
                // NULL is not in the list, so an exclusion keeps it
                (false, false, true) => {
                    format!("({} NOT IN ({}) OR {} IS NULL)", column, list, column)
                }
                (false, true, true) => {
                    format!("({} NOT IN ({}) AND {} IS NOT NULL)", column, list, column)
                }
            }
        }
        Predicate::And(predicates) => predicates
            .iter()
            .map(|p| render_predicate(dialect, p))
            .collect::<Vec<_>>()
            .join(" AND "),
    }
}
