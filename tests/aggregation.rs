mod common;

use common::{fields_to_string, resolver, schema, store};
use eqtble_aggregation::filter::{Condition, Filter};
use eqtble_aggregation::request::{RequestDimension, RequestMeasure, Sort};
use eqtble_aggregation::{AggregationRequest, ResolverError, TimeGrain, Value};
use rstest::rstest;
use tokio_util::sync::CancellationToken;

fn pub_by_month(measures: &[&str]) -> AggregationRequest {
    AggregationRequest {
        dimensions: vec![
            RequestDimension::new("pub"),
            RequestDimension::with_grain("timestamp", TimeGrain::Month),
        ],
        measures: measures.iter().map(|m| RequestMeasure::new(*m)).collect(),
        ..Default::default()
    }
}

#[test_log::test(tokio::test)]
async fn test_sorted_by_publisher_and_month() {
    let mut request = pub_by_month(&["measure_1"]);
    request.sort = vec![Sort::asc("pub"), Sort::asc("timestamp")];
    request.limit = Some(10);

    let result = resolver()
        .resolve(&schema().await, &request, 0, &CancellationToken::new())
        .await
        .unwrap();

    let rows: Vec<String> = result
        .rows
        .iter()
        .map(|row| fields_to_string(row, &["pub", "timestamp"]))
        .collect();
    assert_eq!(
        rows,
        vec![
            "Facebook,2022-01-01",
            "Facebook,2022-02-01",
            "Facebook,2022-03-01",
            "Google,2022-01-01",
            "Google,2022-02-01",
            "Google,2022-03-01",
            "Microsoft,2022-01-01",
            "Microsoft,2022-02-01",
            "Microsoft,2022-03-01",
            "Yahoo,2022-01-01",
        ]
    );
    assert_eq!(result.field_names(), vec!["pub", "timestamp", "measure_1"]);
    assert_eq!(result.rows[0]["measure_1"], Value::Float(1.75));
}

#[test_log::test(tokio::test)]
async fn test_grouping_covers_every_row() {
    let result = resolver()
        .resolve(
            &schema().await,
            &pub_by_month(&["measure_0"]),
            0,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    // 5 publishers (one NULL) over 3 months
    assert_eq!(result.len(), 15);
    let total: i64 = result
        .rows
        .iter()
        .map(|row| match row["measure_0"] {
            Value::Int(count) => count,
            ref other => panic!("unexpected count {:?}", other),
        })
        .sum();
    assert_eq!(total, common::ad_bids().len() as i64);

    let null_groups = result.rows.iter().filter(|row| row["pub"].is_null()).count();
    assert_eq!(null_groups, 3);
}

#[test_log::test(tokio::test)]
async fn test_global_aggregate() {
    let request = AggregationRequest {
        measures: vec![RequestMeasure::new("measure_0"), RequestMeasure::new("measure_2")],
        ..Default::default()
    };
    let result = resolver()
        .resolve(&schema().await, &request, 0, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.rows[0]["measure_0"], Value::Int(42));
}

#[test_log::test(tokio::test)]
async fn test_sort_is_stable_and_nulls_last() {
    let mut request = AggregationRequest {
        dimensions: vec![RequestDimension::new("pub")],
        measures: vec![RequestMeasure::new("measure_0")],
        sort: vec![Sort::desc("measure_0")],
        ..Default::default()
    };
    let schema = schema().await;
    let resolver = resolver();

    let first = resolver
        .resolve(&schema, &request, 0, &CancellationToken::new())
        .await
        .unwrap();
    let second = resolver
        .resolve(&schema, &request, 0, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first, second);

    let counts: Vec<&Value> = first.rows.iter().map(|row| &row["measure_0"]).collect();
    assert!(counts
        .windows(2)
        .all(|pair| pair[0].sql_cmp(pair[1]) != std::cmp::Ordering::Less));

    request.sort = vec![Sort::desc("pub")];
    let descending = resolver
        .resolve(&schema, &request, 0, &CancellationToken::new())
        .await
        .unwrap();
    let publishers: Vec<String> = descending
        .rows
        .iter()
        .map(|row| fields_to_string(row, &["pub"]))
        .collect();
    assert_eq!(publishers, vec!["Yahoo", "Microsoft", "Google", "Facebook", ""]);
}

#[test_log::test(tokio::test)]
async fn test_limit_caps_groups() {
    let mut request = pub_by_month(&["measure_1"]);
    request.sort = vec![Sort::asc("timestamp")];
    request.limit = Some(4);
    let result = resolver()
        .resolve(&schema().await, &request, 0, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.len(), 4);
    assert!(result
        .rows
        .iter()
        .all(|row| fields_to_string(row, &["timestamp"]) == "2022-01-01"));
}

#[test_log::test(tokio::test)]
async fn test_filter_idempotence() {
    let schema = schema().await;
    let resolver = resolver();
    let mut narrow = pub_by_month(&["measure_1", "measure_0"]);
    narrow.sort = vec![Sort::asc("pub"), Sort::asc("timestamp")];
    narrow.filter = Filter::new(vec![Condition::include(
        "pub",
        vec![Value::from("Google"), Value::from("Yahoo")],
    )]);

    let mut repeated = narrow.clone();
    repeated.filter.conditions.push(Condition::include(
        "pub",
        vec![Value::from("Google"), Value::from("Yahoo"), Value::from("Microsoft")],
    ));

    let once = resolver
        .resolve(&schema, &narrow, 0, &CancellationToken::new())
        .await
        .unwrap();
    let twice = resolver
        .resolve(&schema, &repeated, 0, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(once.len(), 6);
    assert_eq!(once, twice);
}

#[rstest]
#[case::in_without_null(Condition::include("pub", vec![Value::from("Yahoo")]), 1)]
#[case::in_with_null(Condition::include("pub", vec![Value::from("Yahoo"), Value::Null]), 2)]
#[case::not_in_keeps_null(Condition::exclude("pub", vec![Value::from("Yahoo")]), 4)]
#[case::not_in_null(Condition::exclude("pub", vec![Value::Null]), 4)]
#[case::empty_in(Condition::include("pub", vec![]), 0)]
#[case::empty_not_in(Condition::exclude("pub", vec![]), 5)]
#[case::unrequested_dimension(Condition::include("dom", vec![Value::from("msn.com"), Value::from("yahoo.com")]), 2)]
#[tokio::test]
async fn test_filter_null_semantics(#[case] condition: Condition, #[case] groups: usize) {
    let request = AggregationRequest {
        dimensions: vec![RequestDimension::new("pub")],
        measures: vec![RequestMeasure::new("measure_0")],
        filter: Filter::new(vec![condition]),
        ..Default::default()
    };
    let result = resolver()
        .resolve(&schema().await, &request, 0, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.len(), groups);
}

#[test_log::test(tokio::test)]
async fn test_request_from_json() {
    let request: AggregationRequest = serde_json::from_str(
        r#"{
            "dimensions": [{"name": "pub"}, {"name": "timestamp", "time_grain": "quarter"}],
            "measures": [{"name": "measure_2"}],
            "filter": [{"operator": "not_in", "name": "pub", "values": [null]}],
            "sort": [{"name": "measure_2", "ascending": false}],
            "limit": 2
        }"#,
    )
    .unwrap();

    let result = resolver()
        .resolve(&schema().await, &request, 3, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(fields_to_string(&result.rows[0], &["pub", "timestamp"]), "Yahoo,2022-01-01");
}

#[test_log::test(tokio::test)]
async fn test_resolve_by_name() {
    let store = store();
    let resolver = resolver();
    let request = pub_by_month(&["measure_0"]);

    let result = resolver
        .resolve_by_name(&store, "ad_bids_metrics", &request, 0, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.len(), 15);

    let missing = resolver
        .resolve_by_name(&store, "clicks_metrics", &request, 0, &CancellationToken::new())
        .await;
    assert!(matches!(missing, Err(ResolverError::InvalidRequest(_))));
}

#[rstest]
#[case::unknown_dimension(r#"{"dimensions": [{"name": "country"}]}"#)]
#[case::unknown_measure(r#"{"measures": [{"name": "revenue"}]}"#)]
#[case::grain_on_string(r#"{"dimensions": [{"name": "pub", "time_grain": "day"}], "measures": [{"name": "measure_0"}]}"#)]
#[case::pivot_not_requested(r#"{"dimensions": [{"name": "pub"}], "measures": [{"name": "measure_0"}], "pivot_on": ["timestamp"]}"#)]
#[case::sort_not_requested(r#"{"dimensions": [{"name": "pub"}], "measures": [{"name": "measure_0"}], "sort": [{"name": "dom"}]}"#)]
#[case::filter_not_a_dimension(r#"{"dimensions": [{"name": "pub"}], "filter": [{"operator": "in", "name": "measure_0", "values": [1]}]}"#)]
#[case::bad_timestamp(r#"{"dimensions": [{"name": "pub"}], "filter": [{"operator": "in", "name": "timestamp", "values": ["soon"]}]}"#)]
#[tokio::test]
async fn test_invalid_requests(#[case] json: &str) {
    let request: AggregationRequest = serde_json::from_str(json).unwrap();
    let result = resolver()
        .resolve(&schema().await, &request, 0, &CancellationToken::new())
        .await;
    match result {
        Err(error @ ResolverError::InvalidRequest(_)) => assert!(!error.is_retryable()),
        other => panic!("expected InvalidRequest, got {:?}", other),
    }
}
