use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use series_flow::models::{Fields, GroupId, Point, Tags};
use series_flow::stream_engine::expressions::Predicate;
use series_flow::stream_engine::nodes::{FromConfig, FromNode};
use series_flow::stream_engine::Node;
use serde_json::json;
use std::time::Duration;

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 14, h, m, s).unwrap()
}

fn cpu(db: &str, host: &str, val: i64) -> Point {
    Point::new("cpu", at(10, 0, 0))
        .database(db)
        .retention_policy("autogen")
        .tag("host", host)
        .field("val", val)
}

fn config(value: serde_json::Value) -> FromConfig {
    serde_json::from_value(value).unwrap()
}

#[test]
fn test_filters_database_and_groups_by_host() {
    let node = FromNode::new(config(json!({
        "database": "db1",
        "measurement": "cpu",
        "dimensions": ["host"]
    })))
    .unwrap();

    let input = vec![cpu("db1", "a", 1), cpu("db1", "b", 2), cpu("db2", "a", 3)];
    let out: Vec<Point> = input.into_iter().filter_map(|p| node.process(p)).collect();

    assert_eq!(out.len(), 2);
    assert_eq!(out[0].fields["val"], json!(1));
    assert_eq!(out[1].fields["val"], json!(2));
    assert_eq!(out[0].group.as_str(), "host=a");
    assert_eq!(out[1].group.as_str(), "host=b");
    assert_eq!(out[0].dimensions, vec!["host".to_string()]);
}

#[test]
fn test_truncates_to_the_minute() {
    let node = FromNode::new(FromConfig {
        truncate: Some(Duration::from_secs(60)),
        ..FromConfig::default()
    })
    .unwrap();

    let out = node.process(Point::new("cpu", at(10, 0, 37))).unwrap();
    assert_eq!(out.time, at(10, 0, 0));

    // Already aligned points are left alone.
    let again = node.process(out.clone()).unwrap();
    assert_eq!(again.time, out.time);
}

#[test]
fn test_empty_config_passes_everything() {
    let node = FromNode::new(FromConfig::default()).unwrap();
    let p = cpu("anything", "a", 1).retention_policy("weekly");
    let out = node.process(p.clone()).unwrap();
    assert_eq!(out.time, p.time);
    assert_eq!(out.fields, p.fields);
    assert!(out.group.is_nil());
}

#[test]
fn test_retention_policy_and_measurement_are_exact_matches() {
    let node = FromNode::new(config(json!({
        "retention_policy": "autogen",
        "measurement": "cpu"
    })))
    .unwrap();

    assert!(node.process(cpu("db1", "a", 1)).is_some());
    assert!(node.process(cpu("db1", "a", 1).retention_policy("auto")).is_none());
    let mut mem = cpu("db1", "a", 1);
    mem.name = "cpu*".into();
    assert!(node.process(mem).is_none());
}

#[test]
fn test_database_filter_wins_over_passing_predicate() {
    let node = FromNode::new(config(json!({
        "database": "db1",
        "where": "val > 0"
    })))
    .unwrap();

    assert!(node.process(cpu("db2", "a", 5)).is_none());
    assert!(node.process(cpu("db1", "a", 5)).is_some());
    assert!(node.process(cpu("db1", "a", -5)).is_none());
}

#[test]
fn test_where_expression_sees_fields_tags_and_time() {
    let node = FromNode::new(config(json!({
        "where": "host == 'a' and val >= 2 and hour(time) == 10"
    })))
    .unwrap();

    assert!(node.process(cpu("db1", "a", 2)).is_some());
    assert!(node.process(cpu("db1", "b", 2)).is_none());
    assert!(node.process(cpu("db1", "a", 1)).is_none());
    assert_eq!(node.eval_errors(), 0);
}

#[test]
fn test_evaluation_error_rejects_only_that_point() {
    let node = FromNode::new(config(json!({ "where": "missing > 1" }))).unwrap();
    let bad = cpu("db1", "a", 1);
    let good = cpu("db1", "a", 1).field("missing", 3);

    assert!(node.process(bad).is_none());
    assert_eq!(node.eval_errors(), 1);
    assert!(node.process(good).is_some());
    assert_eq!(node.eval_errors(), 1);
}

#[test]
fn test_non_boolean_expression_is_an_evaluation_error() {
    let node = FromNode::new(config(json!({ "where": "val + 1" }))).unwrap();
    assert!(node.process(cpu("db1", "a", 1)).is_none());
    assert_eq!(node.eval_errors(), 1);
}

#[test]
fn test_invalid_expression_fails_at_construction() {
    assert!(FromNode::new(config(json!({ "where": "val >" }))).is_err());
}

struct FlakyPredicate;

impl Predicate for FlakyPredicate {
    fn evaluate(&self, _time: DateTime<Utc>, fields: &Fields, _tags: &Tags) -> Result<bool> {
        match fields.get("val").and_then(|v| v.as_i64()) {
            Some(v) if v % 2 == 0 => Err(anyhow!("even values are not supported")),
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }
}

#[test]
fn test_custom_predicate_errors_do_not_block_later_points() {
    let node = FromNode::with_predicate(FromConfig::default(), Box::new(FlakyPredicate));
    let out: Vec<i64> = (1..=5)
        .filter_map(|i| node.process(cpu("db1", "a", i)))
        .map(|p| p.fields["val"].as_i64().unwrap())
        .collect();
    assert_eq!(out, vec![1, 3, 5]);
    assert_eq!(node.eval_errors(), 2);
}

#[test]
fn test_group_by_all_changes_when_a_tag_is_added() {
    let node = FromNode::new(config(json!({ "dimensions": ["*"] }))).unwrap();
    let plain = node.process(cpu("db1", "a", 1)).unwrap();
    let tagged = node.process(cpu("db1", "a", 1).tag("dc", "east")).unwrap();

    assert_ne!(plain.group, tagged.group);
    assert_eq!(tagged.group.as_str(), "dc=east,host=a");
    assert_eq!(tagged.dimensions, vec!["dc".to_string(), "host".to_string()]);
}

#[test]
fn test_explicit_dimensions_ignore_unrelated_tags() {
    let node = FromNode::new(config(json!({ "dimensions": ["host", "dc"] }))).unwrap();
    let plain = node.process(cpu("db1", "a", 1)).unwrap();
    let extra = node.process(cpu("db1", "a", 1).tag("cpu", "cpu0")).unwrap();
    let other = node.process(cpu("db1", "b", 1)).unwrap();
    let empty_dc = node.process(cpu("db1", "a", 1).tag("dc", "")).unwrap();

    assert_eq!(plain.group, extra.group);
    assert_ne!(plain.group, other.group);
    assert_eq!(plain.group, empty_dc.group);
    assert_eq!(plain.group, GroupId::from_tags(&extra.tags, &node.dimensions().tags));
}

#[test]
fn test_abs_overflow_is_an_evaluation_error() {
    let node = FromNode::new(config(json!({ "where": "abs(val) > 0" }))).unwrap();

    assert!(node.process(cpu("db1", "a", i64::MIN)).is_none());
    assert_eq!(node.eval_errors(), 1);
    assert!(node.process(cpu("db1", "a", -4)).is_some());
    assert_eq!(node.eval_errors(), 1);
}

#[test]
fn test_fields_named_like_helpers_do_not_hide_them() {
    let node = FromNode::new(config(json!({ "where": "hour(time) == 10 and minute(time) == 0" }))).unwrap();

    let p = cpu("db1", "a", 1).field("hour", 5).field("minute", 42).tag("weekday", "mon");
    assert!(node.process(p).is_some());
    assert_eq!(node.eval_errors(), 0);
}

#[test]
fn test_template_builtins_are_not_readable_names() {
    let node = FromNode::new(config(json!({ "where": "range(3) | length == 3" }))).unwrap();
    assert!(node.process(cpu("db1", "a", 1)).is_none());
    assert_eq!(node.eval_errors(), 1);
}
