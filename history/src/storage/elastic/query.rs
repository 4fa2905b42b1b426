//! Request bodies and response parsing for the document store.
//!
//! Everything here is pure JSON in and out; the HTTP side lives in
//! [`super::client`].

use crate::bucket::{IntervalBuckets, WidthBuckets};
use crate::reducer::{Output, Reducer};
use serde_json::{json, Map, Value};
use trendline_shared::{
    DataSource, GraphData, GraphSeries, HistoryRecord, HistoryValue, IntervalPoint, ItemId,
    LogValue, TimeRange, ValueAggregation, ValueType, WidthPoint,
};

fn must(filters: Vec<Value>) -> Value {
    json!({ "bool": { "must": filters } })
}

fn terms_itemids(itemids: &[ItemId]) -> Value {
    json!({ "terms": { "itemid": itemids } })
}

fn clock_range(range: TimeRange) -> Value {
    json!({ "range": { "clock": { "gte": range.from, "lte": range.to } } })
}

/// `terms` aggregation by itemid sized to return every requested item.
fn group_by_itemid(itemids: &[ItemId], aggs: Value) -> Value {
    json!({
        "group_by_itemid": {
            "terms": { "field": "itemid", "size": itemids.len().max(1) },
            "aggs": aggs
        }
    })
}

pub fn last_values(itemids: &[ItemId], limit: usize, since: Option<i64>) -> Value {
    let mut filters = vec![terms_itemids(itemids)];
    if let Some(since) = since {
        filters.push(json!({ "range": { "clock": { "gt": since } } }));
    }
    json!({
        "size": 0,
        "query": must(filters),
        "aggs": group_by_itemid(itemids, json!({
            "group_by_docs": {
                "top_hits": {
                    "size": limit,
                    "sort": [
                        { "clock": { "order": "desc" } },
                        { "ns": { "order": "desc" } }
                    ]
                }
            }
        }))
    })
}

/// The two lookups of `value_at`: same second at or before `ns`, then any
/// earlier second within the horizon.
pub fn value_at(itemid: ItemId, clock: i64, ns: u32, horizon: Option<i64>) -> [Value; 2] {
    let sort = json!([
        { "clock": { "order": "desc" } },
        { "ns": { "order": "desc" } }
    ]);

    let same_second = json!({
        "size": 1,
        "sort": sort,
        "query": must(vec![
            json!({ "term": { "itemid": itemid } }),
            json!({ "term": { "clock": clock } }),
            json!({ "range": { "ns": { "lte": ns } } }),
        ])
    });

    let mut earlier = Map::new();
    earlier.insert("lt".to_string(), json!(clock));
    if let Some(horizon) = horizon {
        earlier.insert("gte".to_string(), json!(clock - horizon));
    }
    let earlier_second = json!({
        "size": 1,
        "sort": sort,
        "query": must(vec![
            json!({ "term": { "itemid": itemid } }),
            json!({ "range": { "clock": earlier } }),
        ])
    });

    [same_second, earlier_second]
}

pub fn interval_aggregation(
    itemids: &[ItemId],
    range: TimeRange,
    reducer: &Reducer,
    buckets: IntervalBuckets,
) -> Value {
    let clock = reducer.clock;
    let mut aggs = Map::new();
    aggs.insert(
        "clock".to_string(),
        json!({ clock.metric(): { "field": "clock" } }),
    );
    if let Some(metric) = reducer.metric {
        aggs.insert("value".to_string(), json!({ metric: { "field": "value" } }));
    } else if reducer.is_sample() {
        aggs.insert(
            "value".to_string(),
            json!({
                "top_hits": {
                    "size": 1,
                    "sort": [
                        { "clock": { "order": clock.order() } },
                        { "ns": { "order": clock.order() } }
                    ]
                }
            }),
        );
    }

    json!({
        "size": 0,
        "query": must(vec![terms_itemids(itemids), clock_range(range)]),
        "aggs": group_by_itemid(itemids, json!({
            "group_by_script": {
                "terms": {
                    "size": buckets.bucket_count(range),
                    "script": buckets.script()
                },
                "aggs": aggs
            }
        }))
    })
}

fn width_metrics() -> Value {
    json!({
        "max_value": { "max": { "field": "value" } },
        "avg_value": { "avg": { "field": "value" } },
        "min_value": { "min": { "field": "value" } },
        "max_clock": { "max": { "field": "clock" } }
    })
}

pub fn width_aggregation(
    itemids: &[ItemId],
    range: TimeRange,
    buckets: Option<WidthBuckets>,
) -> Value {
    let aggs = match buckets {
        Some(buckets) => json!({
            "group_by_script": {
                "terms": {
                    "size": buckets.width(),
                    "script": buckets.script()
                },
                "aggs": width_metrics()
            }
        }),
        None => width_metrics(),
    };

    json!({
        "size": 0,
        "query": must(vec![terms_itemids(itemids), clock_range(range)]),
        "aggs": group_by_itemid(itemids, aggs)
    })
}

pub fn aggregated_value(itemid: ItemId, aggregation: ValueAggregation, time_from: i64) -> Value {
    let name = aggregation.name();
    json!({
        "size": 0,
        "query": must(vec![
            json!({ "term": { "itemid": itemid } }),
            json!({ "range": { "clock": { "gt": time_from } } }),
        ]),
        "aggs": {
            format!("{}_value", name): { name: { "field": "value" } }
        }
    })
}

pub fn delete_items(itemids: &[ItemId]) -> Value {
    json!({ "query": { "terms": { "itemid": itemids } } })
}

// ── Response parsing ─────────────────────────────────────────────────────────

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s
            .parse::<i64>()
            .ok()
            .or_else(|| s.parse::<f64>().ok().map(|f| f as i64)),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn bucket_key(bucket: &Value) -> Option<i64> {
    as_i64(bucket.get("key")?)
}

/// Buckets of a named `terms` aggregation, empty when missing.
fn buckets<'a>(aggs: &'a Value, name: &str) -> &'a [Value] {
    aggs.get(name)
        .and_then(|a| a.get("buckets"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Seconds from a date metric; `value_as_string` is already in seconds,
/// the numeric `value` is in milliseconds.
fn metric_clock(metric: &Value) -> Option<i64> {
    metric
        .get("value_as_string")
        .and_then(as_i64)
        .or_else(|| metric.get("value").and_then(as_f64).map(|ms| (ms / 1000.0) as i64))
}

fn metric_value(bucket: &Value, name: &str) -> Option<f64> {
    bucket.get(name)?.get("value").and_then(as_f64)
}

fn top_hit_sources(hits: &Value) -> impl Iterator<Item = &Value> {
    hits.get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter_map(|hit| hit.get("_source"))
}

/// A stored document as a record, `None` if it lacks required fields.
pub fn record_from_source(value_type: ValueType, source: &Value) -> Option<HistoryRecord> {
    let itemid = as_i64(source.get("itemid")?)? as u64;
    let clock = as_i64(source.get("clock")?)?;
    let ns = source.get("ns").and_then(as_i64).unwrap_or(0) as u32;
    let raw = source.get("value")?;
    let text = || match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let value = match value_type {
        ValueType::Float => HistoryValue::Float(as_f64(raw)?),
        ValueType::Unsigned => HistoryValue::Unsigned(match raw {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64))?,
            Value::String(s) => s.parse().ok()?,
            _ => return None,
        }),
        ValueType::Str => HistoryValue::Str(text()),
        ValueType::Text => HistoryValue::Text(text()),
        ValueType::Log => HistoryValue::Log(LogValue {
            timestamp: source.get("timestamp").and_then(as_i64).unwrap_or(0),
            source: source
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            severity: source.get("severity").and_then(as_i64).unwrap_or(0) as i32,
            logeventid: source.get("logeventid").and_then(as_i64).unwrap_or(0),
            value: text(),
        }),
    };
    Some(HistoryRecord::new(itemid, clock, ns, value))
}

pub fn parse_last_values(
    aggs: &Value,
    value_type: ValueType,
) -> Vec<(ItemId, Vec<HistoryRecord>)> {
    let mut results = Vec::new();
    for bucket in buckets(aggs, "group_by_itemid") {
        let Some(itemid) = bucket_key(bucket) else {
            continue;
        };
        let records: Vec<HistoryRecord> = bucket
            .get("group_by_docs")
            .map(|docs| {
                top_hit_sources(docs)
                    .filter_map(|source| record_from_source(value_type, source))
                    .collect()
            })
            .unwrap_or_default();
        if !records.is_empty() {
            results.push((itemid as u64, records));
        }
    }
    results
}

pub fn parse_interval(aggs: &Value, reducer: &Reducer) -> GraphData<IntervalPoint> {
    let mut data = GraphData::new();
    for item in buckets(aggs, "group_by_itemid") {
        let Some(itemid) = bucket_key(item) else {
            continue;
        };
        for point in buckets(item, "group_by_script") {
            let (Some(tick), Some(clock)) = (
                bucket_key(point),
                point.get("clock").and_then(metric_clock),
            ) else {
                continue;
            };
            let value = match reducer.output {
                Output::Sample => point
                    .get("value")
                    .and_then(|hits| top_hit_sources(hits).next())
                    .and_then(|source| source.get("value"))
                    .and_then(as_f64),
                Output::Value => metric_value(point, "value"),
                Output::Count => None,
            };
            data.entry(itemid as u64)
                .or_insert_with(|| GraphSeries::new(DataSource::History))
                .data
                .push(IntervalPoint {
                    tick,
                    clock,
                    count: point.get("doc_count").and_then(Value::as_u64),
                    value,
                });
        }
    }
    data
}

fn width_point(bucket: &Value, index: Option<i64>) -> Option<WidthPoint> {
    Some(WidthPoint {
        index,
        clock: bucket.get("max_clock").and_then(metric_clock)?,
        count: bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0),
        min: metric_value(bucket, "min_value"),
        avg: metric_value(bucket, "avg_value"),
        max: metric_value(bucket, "max_value"),
    })
}

pub fn parse_width(aggs: &Value, bucketed: bool) -> GraphData<WidthPoint> {
    let mut data = GraphData::new();
    for item in buckets(aggs, "group_by_itemid") {
        let Some(itemid) = bucket_key(item) else {
            continue;
        };
        let points: Vec<WidthPoint> = if bucketed {
            buckets(item, "group_by_script")
                .iter()
                .filter_map(|point| width_point(point, bucket_key(point)))
                .collect()
        } else {
            width_point(item, None).into_iter().collect()
        };
        if points.is_empty() {
            continue;
        }
        data.entry(itemid as u64)
            .or_insert_with(|| GraphSeries::new(DataSource::History))
            .data
            .extend(points);
    }
    data
}

pub fn parse_aggregated_value(aggs: &Value, aggregation: ValueAggregation) -> Option<f64> {
    metric_value(aggs, &format!("{}_value", aggregation.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::reducer_for;
    use trendline_shared::AggregateFunction;

    #[test]
    fn test_last_values_body() {
        let body = last_values(&[1, 2], 3, Some(1000));
        assert_eq!(body["size"], 0);
        assert_eq!(body["aggs"]["group_by_itemid"]["terms"]["size"], 2);
        assert_eq!(
            body["aggs"]["group_by_itemid"]["aggs"]["group_by_docs"]["top_hits"]["size"],
            3
        );
        let must = body["query"]["bool"]["must"].as_array().unwrap();
        assert_eq!(must[0]["terms"]["itemid"], json!([1, 2]));
        assert_eq!(must[1]["range"]["clock"]["gt"], 1000);
    }

    #[test]
    fn test_value_at_bodies_bound_by_horizon() {
        let [same, earlier] = value_at(5, 2000, 10, Some(3600));
        assert_eq!(same["query"]["bool"]["must"][2]["range"]["ns"]["lte"], 10);
        let range = &earlier["query"]["bool"]["must"][1]["range"]["clock"];
        assert_eq!(range["lt"], 2000);
        assert_eq!(range["gte"], 2000 - 3600);

        let [_, unbounded] = value_at(5, 2000, 10, None);
        assert!(unbounded["query"]["bool"]["must"][1]["range"]["clock"]
            .get("gte")
            .is_none());
    }

    #[test]
    fn test_interval_body_sizes_and_script() {
        let buckets = IntervalBuckets::new(60).unwrap();
        let body = interval_aggregation(
            &[9],
            TimeRange::new(0, 600),
            reducer_for(AggregateFunction::Avg),
            buckets,
        );
        let script_terms = &body["aggs"]["group_by_itemid"]["aggs"]["group_by_script"];
        assert_eq!(script_terms["terms"]["size"], 11);
        assert_eq!(script_terms["terms"]["script"]["params"]["interval"], 60);
        assert_eq!(script_terms["aggs"]["value"]["avg"]["field"], "value");
        assert_eq!(script_terms["aggs"]["clock"]["max"]["field"], "clock");

        let first = interval_aggregation(
            &[9],
            TimeRange::new(0, 600),
            reducer_for(AggregateFunction::First),
            buckets,
        );
        let aggs = &first["aggs"]["group_by_itemid"]["aggs"]["group_by_script"]["aggs"];
        assert_eq!(aggs["clock"]["min"]["field"], "clock");
        assert_eq!(aggs["value"]["top_hits"]["sort"][0]["clock"]["order"], "asc");
    }

    #[test]
    fn test_parse_last_values_skips_malformed_hits() {
        let aggs = json!({
            "group_by_itemid": { "buckets": [
                { "key": 7, "group_by_docs": { "hits": { "hits": [
                    { "_source": { "itemid": 7, "clock": 200, "ns": 5, "value": "42" } },
                    { "_source": { "itemid": 7, "clock": 100, "ns": 0, "value": 3 } },
                    { "_id": "no source" }
                ] } } },
                { "key": 8, "group_by_docs": { "hits": { "hits": [] } } }
            ] }
        });
        let parsed = parse_last_values(&aggs, ValueType::Unsigned);
        assert_eq!(parsed.len(), 1);
        let (itemid, records) = &parsed[0];
        assert_eq!(*itemid, 7);
        assert_eq!(records[0].value, HistoryValue::Unsigned(42));
        assert_eq!(records[1].position(), (100, 0));
    }

    #[test]
    fn test_parse_interval_reads_seconds() {
        let aggs = json!({
            "group_by_itemid": { "buckets": [
                { "key": 3, "group_by_script": { "buckets": [
                    { "key": "120", "doc_count": 4,
                      "clock": { "value": 150000.0, "value_as_string": "150" },
                      "value": { "value": 2.5 } },
                    { "key": 180, "doc_count": 1,
                      "clock": { "value": 181000.0 },
                      "value": { "value": null } }
                ] } }
            ] }
        });
        let data = parse_interval(&aggs, reducer_for(AggregateFunction::Avg));
        let points = &data[&3].data;
        assert_eq!(points[0].tick, 120);
        assert_eq!(points[0].clock, 150);
        assert_eq!(points[0].count, Some(4));
        assert_eq!(points[0].value, Some(2.5));
        assert_eq!(points[1].clock, 181);
        assert_eq!(points[1].value, None);
    }

    #[test]
    fn test_parse_width_summary_and_buckets() {
        let summary = json!({
            "group_by_itemid": { "buckets": [
                { "key": 1, "doc_count": 2,
                  "min_value": { "value": 1.0 }, "avg_value": { "value": 2.0 },
                  "max_value": { "value": 3.0 },
                  "max_clock": { "value": 2000000.0, "value_as_string": "2000" } }
            ] }
        });
        let data = parse_width(&summary, false);
        let point = &data[&1].data[0];
        assert_eq!(point.index, None);
        assert_eq!(point.clock, 2000);
        assert_eq!(point.count, 2);

        let bucketed = json!({
            "group_by_itemid": { "buckets": [
                { "key": 1, "group_by_script": { "buckets": [
                    { "key": 5, "doc_count": 1,
                      "min_value": { "value": 4.0 }, "avg_value": { "value": 4.0 },
                      "max_value": { "value": 4.0 },
                      "max_clock": { "value_as_string": "1500" } }
                ] } }
            ] }
        });
        let data = parse_width(&bucketed, true);
        assert_eq!(data[&1].data[0].index, Some(5));
    }

    #[test]
    fn test_aggregated_value_body_and_parse() {
        let body = aggregated_value(4, ValueAggregation::Max, 100);
        assert_eq!(body["aggs"]["max_value"]["max"]["field"], "value");
        assert_eq!(body["query"]["bool"]["must"][1]["range"]["clock"]["gt"], 100);

        let aggs = json!({ "max_value": { "value": 12.0 } });
        assert_eq!(parse_aggregated_value(&aggs, ValueAggregation::Max), Some(12.0));
        let empty = json!({ "max_value": { "value": null } });
        assert_eq!(parse_aggregated_value(&empty, ValueAggregation::Max), None);
    }
}
