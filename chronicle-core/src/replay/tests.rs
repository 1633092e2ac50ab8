use super::*;
use crate::capture::async_operation;
use crate::record::CallError;
use crate::record::payload::bound_value;
use crate::storage::InMemoryCallStore;
use chrono::Duration;
use serde_json::{Map, Value, json};

type CallResult = std::result::Result<Value, CallError>;

fn add(args: &[Value], _kwargs: &Map<String, Value>) -> CallResult {
    Ok(json!(args[0].as_i64().unwrap_or(0) + args[1].as_i64().unwrap_or(0)))
}

fn subtract(args: &[Value], _kwargs: &Map<String, Value>) -> CallResult {
    Ok(json!(args[0].as_i64().unwrap_or(0) - args[1].as_i64().unwrap_or(0)))
}

fn parse(args: &[Value], _kwargs: &Map<String, Value>) -> CallResult {
    match args[0].as_str().and_then(|s| s.parse::<i64>().ok()) {
        Some(n) => Ok(json!(n)),
        None => Err(CallError::new("ValueError", "not a number")),
    }
}

fn recorded(name: &str, args: Vec<Value>, outcome: CallOutcome, minutes_ago: i64) -> CallRecord {
    CallRecord::new(name, args, Map::new(), outcome)
        .with_started_at(Utc::now() - Duration::minutes(minutes_ago))
        .with_duration_ms(4.0)
}

async fn store_with(records: Vec<CallRecord>) -> Arc<InMemoryCallStore> {
    let store = Arc::new(InMemoryCallStore::new());
    for record in &records {
        store.save(record).await.unwrap();
    }
    store
}

#[tokio::test]
async fn test_identical_implementation_passes() {
    let store = store_with(vec![
        recorded("math.add", vec![json!(2), json!(3)], CallOutcome::success(json!(5)), 2),
        recorded("math.add", vec![json!(-4), json!(4)], CallOutcome::success(json!(0)), 1),
    ])
    .await;

    let report = ReplayEngine::new(store)
        .replay("math.add", &add, ReplayOptions::default())
        .await
        .unwrap();

    assert_eq!(report.total(), 2);
    assert!(report.all_passed());
    assert!(report.results.iter().all(|r| r.new_duration_ms.is_some()));
}

#[tokio::test]
async fn test_wrong_implementation_fails_at_root() {
    let store = store_with(vec![recorded(
        "math.add",
        vec![json!(2), json!(3)],
        CallOutcome::success(json!(5)),
        1,
    )])
    .await;

    let report = ReplayEngine::new(store)
        .replay("math.add", &subtract, ReplayOptions::default())
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    let result = &report.results[0];
    assert_eq!(result.status, ReplayStatus::Failed);
    let Some(Divergence::Output { differences }) = &result.difference else {
        panic!("expected an output divergence, got {:?}", result.difference);
    };
    assert_eq!(differences.len(), 1);
    assert_eq!(differences[0].path, "$");
    assert_eq!(
        differences[0].kind,
        DifferenceKind::ValueMismatch {
            expected: json!(5),
            actual: json!(-1)
        }
    );
}

#[tokio::test]
async fn test_error_classification() {
    let value_error = CallOutcome::failure(CallError::new("ValueError", "not a number"));
    let type_error = CallOutcome::failure(CallError::new("TypeError", "expected str"));
    let store = store_with(vec![
        // Same error kind
        recorded("parse", vec![json!("abc")], value_error.clone(), 4),
        // Different error kind
        recorded("parse", vec![json!("xyz")], type_error, 3),
        // Recording raised, candidate returns
        recorded("parse", vec![json!("12")], value_error, 2),
        // Recording returned, candidate raises
        recorded("parse", vec![json!("1e3")], CallOutcome::success(json!(1000)), 1),
    ])
    .await;

    let report = ReplayEngine::new(store)
        .replay("parse", &parse, ReplayOptions::default())
        .await
        .unwrap();

    // Most recent first
    let statuses: Vec<ReplayStatus> = report.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            ReplayStatus::Errored,
            ReplayStatus::Failed,
            ReplayStatus::Failed,
            ReplayStatus::Passed,
        ]
    );
    assert!(report.results[0].error.as_deref().unwrap().contains("ValueError"));
    assert!(report.results[0].difference.is_none());
    assert_eq!(
        report.results[1].difference,
        Some(Divergence::UnexpectedSuccess {
            expected_kind: "ValueError".to_string(),
            actual: json!(12),
        })
    );
    assert_eq!(
        report.results[2].difference,
        Some(Divergence::ErrorKind {
            expected: "TypeError".to_string(),
            actual: "ValueError".to_string(),
        })
    );
}

#[tokio::test]
async fn test_limit_and_filters() {
    let failing = CallOutcome::failure(CallError::new("ValueError", "bad"));
    let records: Vec<CallRecord> = (0..10)
        .map(|i| {
            let outcome = if i % 2 == 0 {
                CallOutcome::success(json!(i))
            } else {
                failing.clone()
            };
            recorded("f", vec![json!(i)], outcome, 10 - i)
        })
        .collect();
    let wanted: HashSet<String> = [records[1].id.clone(), records[8].id.clone()].into();
    let store = store_with(records).await;
    let echo = |args: &[Value], _: &Map<String, Value>| -> CallResult { Ok(args[0].clone()) };
    let engine = ReplayEngine::new(store).with_page_size(3);

    let limited = engine
        .replay("f", &echo, ReplayOptions::default().with_limit(3))
        .await
        .unwrap();
    assert_eq!(limited.total(), 3);
    assert_eq!(limited.passed, 1);
    assert_eq!(limited.failed, 2);

    let errors_only = engine
        .replay(
            "f",
            &echo,
            ReplayOptions::default().with_filter(ReplayFilter {
                has_error: Some(true),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
    assert_eq!(errors_only.total(), 5);
    assert_eq!(errors_only.failed, 5);

    let by_id = engine
        .replay(
            "f",
            &echo,
            ReplayOptions::default().with_filter(ReplayFilter {
                call_ids: Some(wanted.clone()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
    let ids: HashSet<String> = by_id.results.iter().map(|r| r.call_id.clone()).collect();
    assert_eq!(ids, wanted);

    let none = engine
        .replay("f", &echo, ReplayOptions::default().with_limit(0))
        .await
        .unwrap();
    assert_eq!(none.total(), 0);
}

#[tokio::test]
async fn test_truncated_records_are_errored() {
    let (bounded, truncated) = bound_value(json!({"rows": vec![1; 200]}), 16);
    assert!(truncated);
    let store = store_with(vec![recorded(
        "report.build",
        vec![bounded],
        CallOutcome::success(json!("ok")),
        1,
    )])
    .await;
    let never_called = |_: &[Value], _: &Map<String, Value>| -> CallResult {
        panic!("candidate must not run for truncated records")
    };

    let report = ReplayEngine::new(store)
        .replay("report.build", &never_called, ReplayOptions::default())
        .await
        .unwrap();

    let result = &report.results[0];
    assert_eq!(result.status, ReplayStatus::Errored);
    assert!(result.difference.is_none());
    assert!(result.new_duration_ms.is_none());
}

#[tokio::test]
async fn test_truncated_result_is_errored_not_failed() {
    let range = |args: &[Value], _: &Map<String, Value>| -> CallResult {
        let n = args[0].as_i64().unwrap_or(0);
        Ok(json!((0..n).collect::<Vec<i64>>()))
    };
    let (stored_value, truncated) = bound_value(range(&[json!(100)], &Map::new()).unwrap(), 32);
    assert!(truncated);
    let store = store_with(vec![recorded(
        "range",
        vec![json!(100)],
        CallOutcome::success(stored_value),
        1,
    )])
    .await;

    // The very implementation that produced the recording
    let report = ReplayEngine::new(store)
        .replay("range", &range, ReplayOptions::default())
        .await
        .unwrap();

    let result = &report.results[0];
    assert_eq!(result.status, ReplayStatus::Errored);
    assert!(result.difference.is_none());
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_candidate_panic_is_errored() {
    let store = store_with(vec![recorded(
        "math.add",
        vec![json!(1), json!(1)],
        CallOutcome::success(json!(2)),
        1,
    )])
    .await;
    let broken = |_: &[Value], _: &Map<String, Value>| -> CallResult { panic!("index out of range") };

    let report = ReplayEngine::new(store)
        .replay("math.add", &broken, ReplayOptions::default())
        .await
        .unwrap();

    let result = &report.results[0];
    assert_eq!(result.status, ReplayStatus::Errored);
    assert!(result.error.as_deref().unwrap().contains("index out of range"));
    assert!(result.new_duration_ms.is_none());
    assert_eq!(report.average_speedup, None);
}

#[tokio::test]
async fn test_replay_one_and_missing_record() {
    let record = recorded("math.add", vec![json!(1), json!(2)], CallOutcome::success(json!(3)), 1);
    let id = record.id.clone();
    let store = store_with(vec![record]).await;
    let engine = ReplayEngine::new(store.clone());

    let result = engine.replay_one(&id, &add).await.unwrap();
    assert_eq!(result.status, ReplayStatus::Passed);

    let missing = engine.replay_one("missing", &add).await;
    assert!(matches!(missing, Err(ChronicleError::RecordNotFound(_))));

    // Stored records are untouched by replay
    assert_eq!(store.len().await, 1);
    assert_eq!(store.get(&id).await.unwrap().unwrap().value(), Some(&json!(3)));
}

#[tokio::test]
async fn test_async_candidate_speedup() {
    let store = store_with(vec![
        recorded("math.add", vec![json!(1), json!(2)], CallOutcome::success(json!(3)), 1)
            .with_duration_ms(1_000.0),
    ])
    .await;
    let fast_add = async_operation(|args: Vec<Value>, _: Map<String, Value>| async move {
        Ok::<_, CallError>(json!(args[0].as_i64().unwrap_or(0) + args[1].as_i64().unwrap_or(0)))
    });

    let report = ReplayEngine::new(store)
        .replay("math.add", &fast_add, ReplayOptions::default())
        .await
        .unwrap();

    assert!(report.all_passed());
    assert!(report.average_speedup.unwrap() > 1.0);
}
