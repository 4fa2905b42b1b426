mod common;

use common::{count, insert, sql_only, sqlite};
use std::time::Duration;
use trendline_history::{HistoryBackend, HistoryError, ReadPolicy, SqlHistory};
use trendline_shared::{
    AggregateFunction, DataSource, HistoryValue, ItemDescriptor, TimeRange, ValueAggregation,
    ValueType,
};

fn float(itemid: u64) -> ItemDescriptor {
    ItemDescriptor::new(itemid, ValueType::Float)
}

/// 10 rows for one item: 8 at clock 1000 inserted out of ns order, 2 at 999.
async fn tied_item(sql: &SqlHistory, itemid: u64) {
    for ns in [3, 7, 0, 5, 1, 6, 2, 4] {
        insert(sql.pool(), "history", itemid, 1000, ns, f64::from(ns)).await;
    }
    insert(sql.pool(), "history", itemid, 999, 100, 0.1).await;
    insert(sql.pool(), "history", itemid, 999, 200, 0.2).await;
}

#[tokio::test]
async fn test_last_values_resolve_ns_ties() {
    let sql = sqlite().await;
    tied_item(&sql, 23257).await;

    let values = sql.last_values(&[float(23257)], 9, None).await.unwrap();
    let records = &values[&23257];
    assert_eq!(records.len(), 9);

    let positions: Vec<(i64, u32)> = records.iter().map(|r| r.position()).collect();
    let mut expected: Vec<(i64, u32)> = (0..8).rev().map(|ns| (1000, ns)).collect();
    expected.push((999, 200));
    assert_eq!(positions, expected);
}

#[tokio::test]
async fn test_last_values_boundary_at_newest_second() {
    let sql = sqlite().await;
    for ns in [9, 2, 11, 0, 5, 10, 1, 8, 3, 7, 4, 6] {
        insert(sql.pool(), "history", 5, 2000, ns, 1.0).await;
    }
    insert(sql.pool(), "history", 5, 1990, 0, 1.0).await;

    let values = sql.last_values(&[float(5)], 9, None).await.unwrap();
    let ns: Vec<u32> = values[&5].iter().map(|r| r.ns).collect();
    assert_eq!(ns, vec![11, 10, 9, 8, 7, 6, 5, 4, 3]);
}

#[tokio::test]
async fn test_single_last_value_takes_highest_ns() {
    let sql = sqlite().await;
    tied_item(&sql, 1).await;

    let values = sql.last_values(&[float(1)], 1, None).await.unwrap();
    assert_eq!(values[&1].len(), 1);
    assert_eq!(values[&1][0].position(), (1000, 7));
    assert_eq!(values[&1][0].value, HistoryValue::Float(7.0));
}

#[tokio::test]
async fn test_items_without_data_are_absent() {
    let sql = sqlite().await;
    tied_item(&sql, 1).await;

    let items = [float(1), float(2), ItemDescriptor::new(3, ValueType::Unsigned)];
    let values = sql.last_values(&items, 3, None).await.unwrap();
    assert_eq!(values.len(), 1);
    assert!(values.contains_key(&1));

    // All stored data is far older than an hour.
    let manager = sql_only(&sql);
    assert!(manager.last_values(&items, 3, Some(3600)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_value_at_exact_and_fallback() {
    let sql = sqlite().await;
    let pool = sql.pool();
    insert(pool, "history_uint", 1, 100, 5, 50.0).await;
    insert(pool, "history_uint", 1, 100, 9, 90.0).await;
    insert(pool, "history_uint", 1, 90, 1, 10.0).await;
    insert(pool, "history_uint", 1, 90, 3, 30.0).await;
    let item = ItemDescriptor::new(1, ValueType::Unsigned);

    let backend = &sql;
    let at = move |clock: i64, ns: u32| async move {
        backend
            .value_at(&item, clock, ns, None)
            .await
            .unwrap()
            .map(|r| (r.position(), r.value))
    };

    assert_eq!(at(100, 9).await, Some(((100, 9), HistoryValue::Unsigned(90))));
    assert_eq!(at(100, 5).await, Some(((100, 5), HistoryValue::Unsigned(50))));
    assert_eq!(at(100, 7).await, Some(((100, 5), HistoryValue::Unsigned(50))));
    assert_eq!(at(100, 2).await, Some(((90, 3), HistoryValue::Unsigned(30))));
    assert_eq!(at(95, 0).await, Some(((90, 3), HistoryValue::Unsigned(30))));
    assert_eq!(at(90, 0).await, None);

    let bounded = sql.value_at(&item, 100, 2, Some(5)).await.unwrap();
    assert!(bounded.is_none());
}

#[tokio::test]
async fn test_manager_value_at_honours_history_period() {
    let sql = sqlite().await;
    insert(sql.pool(), "history", 1, 100, 0, 1.5).await;

    let manager = sql_only(&sql).with_history_period(Some(10));
    assert!(manager.value_at(&float(1), 200, 0).await.unwrap().is_none());

    let manager = manager.with_history_period(None);
    let record = manager.value_at(&float(1), 200, 0).await.unwrap().unwrap();
    assert_eq!(record.clock, 100);
}

#[tokio::test]
async fn test_interval_aggregation_functions() {
    let sql = sqlite().await;
    for (clock, value) in [(10, 1.0), (50, 3.0), (70, 5.0), (130, 7.0), (400, 9.0)] {
        insert(sql.pool(), "history", 1, clock, 0, value).await;
    }
    let manager = &sql_only(&sql);
    let series = move |function: AggregateFunction| async move {
        let data = manager
            .graph_aggregation_by_interval(&[float(1)], 0, 179, function, 60)
            .await
            .unwrap();
        data[&1].data.clone()
    };

    let avg = series(AggregateFunction::Avg).await;
    let ticks: Vec<i64> = avg.iter().map(|p| p.tick).collect();
    assert_eq!(ticks, vec![0, 60, 120]);
    assert_eq!(avg[0].value, Some(2.0));
    assert_eq!(avg[0].clock, 50);

    let sum = series(AggregateFunction::Sum).await;
    assert_eq!(sum[0].value, Some(4.0));

    let count = series(AggregateFunction::Count).await;
    let counts: Vec<Option<u64>> = count.iter().map(|p| p.count).collect();
    assert_eq!(counts, vec![Some(2), Some(1), Some(1)]);
    assert!(count.iter().all(|p| p.value.is_none()));

    let first = series(AggregateFunction::First).await;
    assert_eq!((first[0].clock, first[0].value), (10, Some(1.0)));

    let last = series(AggregateFunction::Last).await;
    assert_eq!((last[0].clock, last[0].value), (50, Some(3.0)));
    assert_eq!(last.len(), 3);
}

#[tokio::test]
async fn test_interval_aggregation_reads_trends() {
    let sql = sqlite().await;
    common::exec(
        sql.pool(),
        "INSERT INTO trends (itemid,clock,num,value_min,value_avg,value_max) VALUES \
         (1,3600,2,1,2,3),(1,7200,4,0,5,10)",
    )
    .await;
    let item = float(1).with_source(DataSource::Trends);
    let data = sql_only(&sql)
        .graph_aggregation_by_interval(&[item], 0, 10_000, AggregateFunction::Sum, 86_400)
        .await
        .unwrap();
    let series = &data[&1];
    assert_eq!(series.source, DataSource::Trends);
    assert_eq!(series.data.len(), 1);
    assert_eq!(series.data[0].value, Some(24.0));
}

#[tokio::test]
async fn test_first_and_last_over_trends() {
    let sql = sqlite().await;
    common::exec(
        sql.pool(),
        "INSERT INTO trends (itemid,clock,num,value_min,value_avg,value_max) VALUES \
         (1,3600,2,1,2,3),(1,7200,4,0,5,10),(1,90000,1,7,7,7),(1,93600,3,1,4,8)",
    )
    .await;
    let item = float(1).with_source(DataSource::Trends);
    let manager = &sql_only(&sql).with_read_policy(ReadPolicy::Propagate);
    let series = move |function: AggregateFunction| async move {
        let data = manager
            .graph_aggregation_by_interval(&[item], 0, 100_000, function, 86_400)
            .await
            .unwrap();
        data[&1]
            .data
            .iter()
            .map(|p| (p.tick, p.clock, p.value))
            .collect::<Vec<_>>()
    };

    assert_eq!(
        series(AggregateFunction::First).await,
        vec![(0, 3600, Some(2.0)), (86_400, 90_000, Some(7.0))]
    );
    assert_eq!(
        series(AggregateFunction::Last).await,
        vec![(0, 7200, Some(5.0)), (86_400, 93_600, Some(4.0))]
    );
}

#[tokio::test]
async fn test_last_values_with_unbounded_limit() {
    let sql = sqlite().await;
    tied_item(&sql, 1).await;

    for limit in [usize::MAX, i64::MAX as usize] {
        let values = sql.last_values(&[float(1)], limit, None).await.unwrap();
        let records = &values[&1];
        assert_eq!(records.len(), 10);
        assert_eq!(records[0].position(), (1000, 7));
        assert_eq!(records[9].position(), (999, 100));
    }
}

#[tokio::test]
async fn test_width_bucket_is_stable() {
    let sql = sqlite().await;
    insert(sql.pool(), "history", 1, 1500, 0, 4.0).await;
    insert(sql.pool(), "history", 1, 1000, 0, 2.0).await;
    let manager = sql_only(&sql);

    for _ in 0..3 {
        let data = manager
            .graph_aggregation_by_width(&[float(1), float(2)], 1000, 2000, Some(10))
            .await
            .unwrap();
        assert_eq!(data.len(), 1);
        let points = &data[&1].data;
        let at_1500 = points.iter().find(|p| p.clock == 1500).unwrap();
        assert_eq!(at_1500.index, Some(5));
        assert_eq!(at_1500.avg, Some(4.0));
        assert_eq!(points.iter().find(|p| p.clock == 1000).unwrap().index, Some(0));
    }

    let summary = manager
        .graph_aggregation_by_width(&[float(1)], 1000, 2000, None)
        .await
        .unwrap();
    let point = &summary[&1].data[0];
    assert_eq!(point.index, None);
    assert_eq!(point.count, 2);
    assert_eq!((point.min, point.avg, point.max), (Some(2.0), Some(3.0), Some(4.0)));
}

#[tokio::test]
async fn test_aggregated_value_distinguishes_no_data() {
    let sql = sqlite().await;
    for (clock, value) in [(10, 1.0), (50, 3.0), (70, 5.0), (130, 7.0)] {
        insert(sql.pool(), "history", 1, clock, 0, value).await;
    }
    let manager = &sql_only(&sql);

    let value = move |aggregation: ValueAggregation, time_from: i64| async move {
        manager
            .aggregated_value(&float(1), aggregation, time_from)
            .await
            .unwrap()
    };
    assert_eq!(value(ValueAggregation::Avg, 50).await, Some(6.0));
    assert_eq!(value(ValueAggregation::Min, 50).await, Some(5.0));
    assert_eq!(value(ValueAggregation::Max, 0).await, Some(7.0));
    assert_eq!(value(ValueAggregation::Max, 130).await, None);
}

#[tokio::test]
async fn test_delete_history_clears_every_table() {
    let sql = sqlite().await;
    let pool = sql.pool();
    insert(pool, "history", 1, 10, 0, 1.0).await;
    insert(pool, "history_uint", 1, 10, 0, 1.0).await;
    insert(pool, "history", 2, 10, 0, 1.0).await;
    common::exec(pool, "INSERT INTO history_log (itemid,clock,value) VALUES (1,10,'x')").await;
    common::exec(pool, "INSERT INTO trends (itemid,clock,num) VALUES (1,3600,1),(2,3600,1)").await;

    let manager = sql_only(&sql);
    assert!(manager.delete_history(&[1]).await);

    assert_eq!(count(pool, "SELECT COUNT(*) FROM history WHERE itemid=1").await, 0);
    assert_eq!(count(pool, "SELECT COUNT(*) FROM history_uint").await, 0);
    assert_eq!(count(pool, "SELECT COUNT(*) FROM history_log").await, 0);
    assert_eq!(count(pool, "SELECT COUNT(*) FROM trends").await, 1);
    assert_eq!(count(pool, "SELECT COUNT(*) FROM history WHERE itemid=2").await, 1);
}

#[tokio::test]
async fn test_sql_errors_follow_read_policy() {
    let sql = sqlite().await;
    common::exec(sql.pool(), "DROP TABLE history").await;

    let manager = sql_only(&sql).with_partition_timeout(Duration::from_secs(5));
    assert!(manager.last_values(&[float(1)], 1, None).await.unwrap().is_empty());

    let manager = manager.with_read_policy(ReadPolicy::Propagate);
    let err = manager.last_values(&[float(1)], 1, None).await.unwrap_err();
    assert!(matches!(err, HistoryError::Database(_)));
}

#[test]
fn test_time_range_size() {
    assert_eq!(TimeRange::new(1000, 2000).size(), 1000);
}
