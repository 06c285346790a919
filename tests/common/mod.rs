#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use eqtble_aggregation::engine::DuckDbEngine;
use eqtble_aggregation::metrics_view::local_store::LocalMetricsViewStore;
use eqtble_aggregation::{
    AggregationResolver, DataType, Field, MetricsViewSchema, MetricsViewStore, ResultRow, Value,
};
use std::sync::Arc;

pub const AD_BIDS_METRICS: &str = r#"[
    {
        "name": "ad_bids_metrics",
        "table": "ad_bids",
        "description": "Bids by publisher and domain",
        "dimensions": [
            {"name": "pub", "data_type": "string"},
            {"name": "dom", "data_type": "string"},
            {"name": "timestamp", "data_type": "timestamp"}
        ],
        "measures": [
            {"name": "measure_0", "expression": "count(*)", "data_type": "integer"},
            {"name": "measure_1", "expression": "avg(bid_price)"},
            {"name": "measure_2", "expression": "sum(volume)", "data_type": "integer"}
        ]
    }
]"#;

/// Publisher and the domains it serves; the NULL publisher owns
/// sports.yahoo.com.
pub const PUBLISHERS: [(Option<&str>, &[&str]); 5] = [
    (Some("Facebook"), &["facebook.com", "instagram.com"]),
    (Some("Google"), &["google.com", "news.google.com"]),
    (Some("Microsoft"), &["msn.com"]),
    (Some("Yahoo"), &["yahoo.com"]),
    (None, &["sports.yahoo.com"]),
];

fn at(month: u32, day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2022, month, day)
        .and_then(|d| d.and_hms_opt(hour, 30, 0))
        .unwrap()
}

/// Two bids per domain per day on days 3 and 17 of January to March 2022.
pub fn ad_bids() -> Vec<ResultRow> {
    let mut rows = Vec::new();
    for month in 1..=3u32 {
        for (p, (publisher, domains)) in PUBLISHERS.iter().enumerate() {
            for (d, domain) in domains.iter().enumerate() {
                for (b, day) in [3u32, 17].into_iter().enumerate() {
                    let mut row = ResultRow::new();
                    row.insert("pub".to_string(), Value::from(*publisher));
                    row.insert("dom".to_string(), Value::from(*domain));
                    row.insert("timestamp".to_string(), Value::from(at(month, day, (p + d) as u32)));
                    row.insert(
                        "bid_price".to_string(),
                        Value::Float(month as f64 + p as f64 + d as f64 * 0.5 + b as f64),
                    );
                    row.insert("volume".to_string(), Value::Int((p * 10 + d + b) as i64));
                    rows.push(row);
                }
            }
        }
    }
    rows
}

pub fn store() -> LocalMetricsViewStore {
    LocalMetricsViewStore::from_json(AD_BIDS_METRICS).unwrap()
}

pub async fn schema() -> MetricsViewSchema {
    store().get_metrics_view("ad_bids_metrics").await.unwrap()
}

pub fn ad_bids_columns() -> Vec<Field> {
    vec![
        Field::new("pub", DataType::String),
        Field::new("dom", DataType::String),
        Field::new("timestamp", DataType::Timestamp),
        Field::new("bid_price", DataType::Float),
        Field::new("volume", DataType::Integer),
    ]
}

/// In-memory DuckDB database holding the ad_bids table.
pub fn engine() -> DuckDbEngine {
    let engine = DuckDbEngine::open_in_memory().unwrap();
    engine
        .load_table("ad_bids", &ad_bids_columns(), &ad_bids())
        .unwrap();
    engine
}

pub fn resolver() -> AggregationResolver<DuckDbEngine> {
    AggregationResolver::new(Arc::new(engine()), Default::default())
}

/// Comma-joined display of the named fields; NULL renders empty and
/// timestamps as dates.
pub fn fields_to_string(row: &ResultRow, names: &[&str]) -> String {
    names
        .iter()
        .map(|name| match row.get(*name) {
            Some(Value::Timestamp(ts)) => ts.format("%Y-%m-%d").to_string(),
            Some(value) => value.to_string(),
            None => String::new(),
        })
        .collect::<Vec<_>>()
        .join(",")
}
