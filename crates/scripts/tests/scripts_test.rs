use std::time::Duration;

use serde_json::{json, Value};

use harvester_core::{HarvestMode, SchedulerError, ScriptContext, StringSet};
use harvester_dispatcher::{harvest_now, list_gauges_now};
use harvester_scripts::{default_registry, BatchedOptions};

const TIMEOUT: Duration = Duration::from_secs(5);

fn codes(items: &[&str]) -> StringSet {
    items.iter().copied().collect()
}

#[test]
fn test_registry_lists_all_scripts() {
    let registry = default_registry(ScriptContext::default()).unwrap();
    let names: Vec<String> = registry.list().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["all_at_once", "batched", "broken", "one_by_one"]);

    assert_eq!(registry.get_mode("batched").unwrap(), HarvestMode::Batched);
    assert_eq!(registry.get_mode("one_by_one").unwrap(), HarvestMode::OneByOne);
    assert_eq!(registry.get_mode("broken").unwrap(), HarvestMode::AllAtOnce);
}

#[test]
fn test_batched_options_merge() {
    let registry = default_registry(ScriptContext::default()).unwrap();

    let parsed = registry.parse_json_options("batched", &[&Value::Null]).unwrap();
    assert_eq!(parsed.batch_size(), Some(3));

    let job = json!({"batchSize": 5, "min": 1.0});
    let gauge = json!({"max": 2.0});
    let parsed = registry
        .parse_json_options("batched", &[&job, &gauge])
        .unwrap();
    let options = parsed.get::<BatchedOptions>().unwrap();
    assert_eq!(options.batch_size, 5);
    assert_eq!(options.min, 1.0);
    assert_eq!(options.max, 2.0);
    assert_eq!(options.gauges, 10);
}

#[test]
fn test_unknown_option_is_rejected() {
    let registry = default_registry(ScriptContext::default()).unwrap();
    assert!(matches!(
        registry.parse_json_options("one_by_one", &[&json!({"batchSize": 2})]),
        Err(SchedulerError::InvalidOptions { .. })
    ));
    assert!(registry
        .parse_json_options("broken", &[&json!({"anything": 1})])
        .is_err());
}

#[tokio::test]
async fn test_all_at_once_generates_every_gauge() {
    let registry = default_registry(ScriptContext::default()).unwrap();
    let result = harvest_now(
        &registry,
        "all_at_once",
        &json!({"gauges": 4, "value": 7.0}),
        StringSet::new(),
        0,
        TIMEOUT,
    )
    .await
    .unwrap();

    let order: Vec<&str> = result.iter().map(|m| m.code()).collect();
    assert_eq!(order, vec!["g000", "g001", "g002", "g003"]);
    assert!(result.iter().all(|m| m.level == Some(7.0) && m.flow == Some(7.0)));
}

#[tokio::test]
async fn test_one_by_one_harvests_single_code() {
    let registry = default_registry(ScriptContext::default()).unwrap();
    let result = harvest_now(
        &registry,
        "one_by_one",
        &Value::Null,
        codes(&["g005"]),
        0,
        TIMEOUT,
    )
    .await
    .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].code(), "g005");
    let level = result[0].level.unwrap();
    assert!((10.0..=20.0).contains(&level));
}

#[tokio::test]
async fn test_batched_harvests_requested_codes() {
    let registry = default_registry(ScriptContext::default()).unwrap();
    let result = harvest_now(
        &registry,
        "batched",
        &Value::Null,
        codes(&["a", "b", "c"]),
        0,
        TIMEOUT,
    )
    .await
    .unwrap();
    assert_eq!(result.len(), 3);
}

#[tokio::test]
async fn test_broken_script_fails() {
    let registry = default_registry(ScriptContext::default()).unwrap();
    let err = harvest_now(&registry, "broken", &Value::Null, StringSet::new(), 0, TIMEOUT)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("always broken"));

    assert!(list_gauges_now(&registry, "broken", &Value::Null).await.is_err());
}

#[tokio::test]
async fn test_list_gauges_options() {
    let registry = default_registry(ScriptContext::default()).unwrap();

    let gauges = list_gauges_now(&registry, "all_at_once", &json!({"gauges": 3, "noLocation": true}))
        .await
        .unwrap();
    assert_eq!(gauges.len(), 3);
    assert!(gauges.iter().all(|g| g.location.is_none()));

    let gauges = list_gauges_now(&registry, "all_at_once", &json!({"noAltitude": true}))
        .await
        .unwrap();
    assert_eq!(gauges.len(), 10);
    assert!(gauges.iter().all(|g| g.location.unwrap().altitude == 0.0));
}
