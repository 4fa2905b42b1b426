//! SQL history backend
//!
//! Reads `history*` and `trends*` tables through a sqlx `AnyPool`, so the
//! same code serves SQLite, MySQL and PostgreSQL. Table names only ever come
//! from [`history_table`] and [`trends_table`]; every id, clock and value is
//! a bound parameter.

pub mod dialect;
pub mod rows;

use crate::bucket::{IntervalBuckets, WidthBuckets};
use crate::error::{HistoryError, HistoryResult};
use crate::reducer::{reducer_for, sample_column, ClockPick, Output};
use crate::storage::{history_table, trends_table, HistoryBackend, LastValues};
use async_trait::async_trait;
use dialect::{Dialect, SqlBuilder, IN_CHUNK};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};
use trendline_shared::{
    sort_newest_first, AggregateFunction, DataSource, GraphData, GraphSeries, HistoryRecord,
    IntervalPoint, ItemDescriptor, ItemId, TimeRange, ValueAggregation, ValueType, WidthPoint,
};

/// Row count for a `LIMIT` bind; databases take a signed 64-bit value.
fn row_limit(rows: usize) -> i64 {
    i64::try_from(rows).unwrap_or(i64::MAX)
}

pub struct SqlHistory {
    pool: AnyPool,
    dialect: Dialect,
}

impl SqlHistory {
    /// Connect to the database behind `url`.
    pub async fn connect(url: &str) -> HistoryResult<Self> {
        sqlx::any::install_default_drivers();
        let dialect = Dialect::from_url(url)?;

        let mut options = AnyPoolOptions::new();
        if dialect == Dialect::Sqlite && url.contains(":memory:") {
            // Every connection to an in-memory database is a separate database.
            options = options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = options.connect(url).await?;

        info!("Connected to {:?} history database", dialect);
        Ok(Self::new(pool, dialect))
    }

    pub fn new(pool: AnyPool, dialect: Dialect) -> Self {
        Self { pool, dialect }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn builder(&self) -> SqlBuilder {
        SqlBuilder::new(self.dialect)
    }

    /// `SELECT <record columns> FROM <table> WHERE itemid=?`
    fn select_records(&self, item: &ItemDescriptor) -> SqlBuilder {
        let mut b = self.builder();
        b.push("SELECT ")
            .push(&rows::record_columns(self.dialect, item.value_type))
            .push(" FROM ")
            .push(history_table(item.value_type))
            .push(" WHERE itemid=")
            .bind(item.itemid);
        b
    }

    async fn fetch_records(
        &self,
        b: &SqlBuilder,
        value_type: ValueType,
    ) -> HistoryResult<Vec<HistoryRecord>> {
        let fetched = b.query()?.fetch_all(&self.pool).await?;
        fetched
            .iter()
            .map(|row| rows::decode_record(row, value_type))
            .collect()
    }

    async fn fetch_record(
        &self,
        b: &SqlBuilder,
        value_type: ValueType,
    ) -> HistoryResult<Option<HistoryRecord>> {
        match b.query()?.fetch_optional(&self.pool).await? {
            Some(row) => Ok(Some(rows::decode_record(&row, value_type)?)),
            None => Ok(None),
        }
    }

    /// Runs a single-column `MAX(clock)` query.
    async fn fetch_max_clock(&self, b: &SqlBuilder) -> HistoryResult<Option<i64>> {
        match b.query()?.fetch_optional(&self.pool).await? {
            Some(row) => rows::get_opt_i64(&row, "clock"),
            None => Ok(None),
        }
    }

    async fn item_last_values(
        &self,
        item: &ItemDescriptor,
        limit: usize,
        since: Option<i64>,
    ) -> HistoryResult<Vec<HistoryRecord>> {
        let table = history_table(item.value_type);

        if limit == 1 {
            let mut b = self.builder();
            b.push("SELECT MAX(clock) AS clock FROM ")
                .push(table)
                .push(" WHERE itemid=")
                .bind(item.itemid);
            if let Some(since) = since {
                b.push(" AND clock>").bind(since);
            }
            let Some(clock) = self.fetch_max_clock(&b).await? else {
                return Ok(Vec::new());
            };

            let mut b = self.select_records(item);
            b.push(" AND clock=")
                .bind(clock)
                .push(" ORDER BY ns DESC LIMIT 1");
            return self.fetch_records(&b, item.value_type).await;
        }

        // Rows are ordered by clock only; ns order is fixed up below.
        let mut b = self.select_records(item);
        if let Some(since) = since {
            b.push(" AND clock>").bind(since);
        }
        // One row past the limit shows whether the cut splits a second.
        b.push(" ORDER BY clock DESC LIMIT ").bind(row_limit(limit.saturating_add(1)));
        let mut values = self.fetch_records(&b, item.value_type).await?;

        if values.len() > limit && values[limit - 1].clock == values[limit].clock {
            // The cut falls inside one second: which rows of that second made
            // it in is arbitrary, so refetch that second by ns.
            let boundary = values[limit].clock;
            while values.last().map(|r| r.clock) == Some(boundary) {
                values.pop();
            }
            let remaining = limit - values.len();

            let mut b = self.select_records(item);
            b.push(" AND clock=")
                .bind(boundary)
                .push(" ORDER BY ns DESC LIMIT ")
                .bind(row_limit(remaining));
            values.extend(self.fetch_records(&b, item.value_type).await?);
        }

        sort_newest_first(&mut values);
        values.truncate(limit);
        Ok(values)
    }

    async fn interval_group(
        &self,
        table: &'static str,
        source: DataSource,
        itemids: &[ItemId],
        range: TimeRange,
        function: AggregateFunction,
        buckets: IntervalBuckets,
    ) -> HistoryResult<Vec<(ItemId, IntervalPoint)>> {
        let reducer = reducer_for(function);
        let tick = buckets.sql_expr("clock");
        let mut b = self.builder();

        if reducer.is_sample() {
            b.push("SELECT h.itemid AS itemid,")
                .push(&self.dialect.to_double(&format!("h.{}", sample_column(source))))
                .push(" AS value,h.clock AS clock,hi.tick AS tick FROM ")
                .push(table)
                .push(" h JOIN (SELECT itemid,")
                .push(&tick)
                .push(" AS tick,")
                .push(reducer.clock.sql())
                .push(" AS clock FROM ")
                .push(table)
                .push(" WHERE ")
                .in_list("itemid", itemids)
                .push(" AND clock>=")
                .bind(range.from)
                .push(" AND clock<=")
                .bind(range.to)
                .push(" GROUP BY itemid,")
                .push(&tick)
                .push(") hi ON h.itemid=hi.itemid AND h.clock=hi.clock ORDER BY h.itemid,hi.tick");
            // Trends hold one row per hour and have no ns column.
            if source == DataSource::History {
                b.push(match reducer.clock {
                    ClockPick::Earliest => ",h.ns ASC",
                    ClockPick::Latest => ",h.ns DESC",
                });
            }
        } else {
            let expr = reducer
                .sql(source)
                .ok_or_else(|| HistoryError::invalid_input(format!("{:?} has no SQL form", function)))?;
            let (expr, alias) = match reducer.output {
                Output::Count => (expr.to_string(), "cnt"),
                _ => (self.dialect.to_double(expr), "value"),
            };
            b.push("SELECT itemid,")
                .push(&tick)
                .push(" AS tick,")
                .push(&expr)
                .push(" AS ")
                .push(alias)
                .push(",MAX(clock) AS clock FROM ")
                .push(table)
                .push(" WHERE ")
                .in_list("itemid", itemids)
                .push(" AND clock>=")
                .bind(range.from)
                .push(" AND clock<=")
                .bind(range.to)
                .push(" GROUP BY itemid,")
                .push(&tick)
                .push(" ORDER BY itemid,tick");
        }

        let fetched = b.query()?.fetch_all(&self.pool).await?;
        let mut points = Vec::with_capacity(fetched.len());
        let mut seen = HashSet::new();
        for row in &fetched {
            let itemid = rows::get_i64(row, "itemid")? as u64;
            let tick = rows::get_i64(row, "tick")?;
            // Several rows may share the picked clock; the first one wins.
            if !seen.insert((itemid, tick)) {
                continue;
            }
            let (count, value) = match reducer.output {
                Output::Count => (
                    rows::get_opt_i64(row, "cnt")?.map(|n| n.max(0) as u64),
                    None,
                ),
                Output::Value | Output::Sample => (None, rows::get_opt_f64(row, "value")?),
            };
            points.push((
                itemid,
                IntervalPoint {
                    tick,
                    clock: rows::get_i64(row, "clock")?,
                    count,
                    value,
                },
            ));
        }
        Ok(points)
    }

    async fn width_group(
        &self,
        table: &'static str,
        source: DataSource,
        itemids: &[ItemId],
        range: TimeRange,
        buckets: Option<WidthBuckets>,
    ) -> HistoryResult<Vec<(ItemId, WidthPoint)>> {
        let (count, avg, min, max) = match source {
            DataSource::History => ("COUNT(*)", "AVG(value)", "MIN(value)", "MAX(value)"),
            DataSource::Trends => (
                "SUM(num)",
                "AVG(value_avg)",
                "MIN(value_min)",
                "MAX(value_max)",
            ),
        };
        let index = buckets.map(|b| b.sql_expr(self.dialect, "clock"));

        let mut b = self.builder();
        b.push("SELECT itemid,")
            .push(count)
            .push(" AS cnt,")
            .push(&self.dialect.to_double(avg))
            .push(" AS avg_value,")
            .push(&self.dialect.to_double(min))
            .push(" AS min_value,")
            .push(&self.dialect.to_double(max))
            .push(" AS max_value,MAX(clock) AS clock");
        if let Some(index) = &index {
            b.push(",").push(index).push(" AS i");
        }
        b.push(" FROM ")
            .push(table)
            .push(" WHERE ")
            .in_list("itemid", itemids)
            .push(" AND clock>=")
            .bind(range.from)
            .push(" AND clock<=")
            .bind(range.to)
            .push(" GROUP BY itemid");
        if let Some(index) = &index {
            b.push(",").push(index).push(" ORDER BY itemid,i");
        } else {
            b.push(" ORDER BY itemid");
        }

        let fetched = b.query()?.fetch_all(&self.pool).await?;
        let mut points = Vec::with_capacity(fetched.len());
        for row in &fetched {
            let index = match index {
                Some(_) => Some(rows::get_i64(row, "i")?),
                None => None,
            };
            points.push((
                rows::get_i64(row, "itemid")? as u64,
                WidthPoint {
                    index,
                    clock: rows::get_i64(row, "clock")?,
                    count: rows::get_opt_i64(row, "cnt")?.unwrap_or_default().max(0) as u64,
                    min: rows::get_opt_f64(row, "min_value")?,
                    avg: rows::get_opt_f64(row, "avg_value")?,
                    max: rows::get_opt_f64(row, "max_value")?,
                },
            ));
        }
        Ok(points)
    }
}

/// Group numeric items by the table that holds their data for graphs.
fn graph_tables(items: &[ItemDescriptor]) -> BTreeMap<(&'static str, DataSource), Vec<ItemId>> {
    let mut tables: BTreeMap<(&'static str, DataSource), Vec<ItemId>> = BTreeMap::new();
    for item in items {
        if !item.value_type.is_numeric() {
            debug!("Item {} is not numeric, skipped by graph aggregation", item.itemid);
            continue;
        }
        let table = match item.source {
            DataSource::History => Some(history_table(item.value_type)),
            DataSource::Trends => trends_table(item.value_type),
        };
        if let Some(table) = table {
            tables.entry((table, item.source)).or_default().push(item.itemid);
        }
    }
    tables
}

fn collect_series<P>(
    data: &mut GraphData<P>,
    source: DataSource,
    points: Vec<(ItemId, P)>,
) {
    for (itemid, point) in points {
        data.entry(itemid)
            .or_insert_with(|| GraphSeries::new(source))
            .data
            .push(point);
    }
}

#[async_trait]
impl HistoryBackend for SqlHistory {
    async fn last_values(
        &self,
        items: &[ItemDescriptor],
        limit: usize,
        since: Option<i64>,
    ) -> HistoryResult<LastValues> {
        let mut results = LastValues::new();
        if limit == 0 {
            return Ok(results);
        }
        for item in items {
            let values = self.item_last_values(item, limit, since).await?;
            if !values.is_empty() {
                results.insert(item.itemid, values);
            }
        }
        Ok(results)
    }

    async fn value_at(
        &self,
        item: &ItemDescriptor,
        clock: i64,
        ns: u32,
        horizon: Option<i64>,
    ) -> HistoryResult<Option<HistoryRecord>> {
        let mut b = self.select_records(item);
        b.push(" AND clock=")
            .bind(clock)
            .push(" AND ns=")
            .bind(ns)
            .push(" LIMIT 1");
        if let Some(record) = self.fetch_record(&b, item.value_type).await? {
            return Ok(Some(record));
        }

        let mut b = self.select_records(item);
        b.push(" AND clock=")
            .bind(clock)
            .push(" AND ns<")
            .bind(ns)
            .push(" ORDER BY ns DESC LIMIT 1");
        if let Some(record) = self.fetch_record(&b, item.value_type).await? {
            return Ok(Some(record));
        }

        let mut b = self.builder();
        b.push("SELECT MAX(clock) AS clock FROM ")
            .push(history_table(item.value_type))
            .push(" WHERE itemid=")
            .bind(item.itemid)
            .push(" AND clock<")
            .bind(clock);
        if let Some(horizon) = horizon {
            b.push(" AND clock>=").bind(clock - horizon);
        }
        let Some(previous) = self.fetch_max_clock(&b).await? else {
            return Ok(None);
        };

        let mut b = self.select_records(item);
        b.push(" AND clock=")
            .bind(previous)
            .push(" ORDER BY ns DESC LIMIT 1");
        self.fetch_record(&b, item.value_type).await
    }

    async fn aggregate_by_interval(
        &self,
        items: &[ItemDescriptor],
        range: TimeRange,
        function: AggregateFunction,
        buckets: IntervalBuckets,
    ) -> HistoryResult<GraphData<IntervalPoint>> {
        let mut data = GraphData::new();
        for ((table, source), itemids) in graph_tables(items) {
            for chunk in itemids.chunks(IN_CHUNK) {
                let points = self
                    .interval_group(table, source, chunk, range, function, buckets)
                    .await?;
                collect_series(&mut data, source, points);
            }
        }
        Ok(data)
    }

    async fn aggregate_by_width(
        &self,
        items: &[ItemDescriptor],
        range: TimeRange,
        buckets: Option<WidthBuckets>,
    ) -> HistoryResult<GraphData<WidthPoint>> {
        let mut data = GraphData::new();
        for ((table, source), itemids) in graph_tables(items) {
            for chunk in itemids.chunks(IN_CHUNK) {
                let points = self
                    .width_group(table, source, chunk, range, buckets)
                    .await?;
                collect_series(&mut data, source, points);
            }
        }
        Ok(data)
    }

    async fn aggregated_value(
        &self,
        item: &ItemDescriptor,
        aggregation: ValueAggregation,
        time_from: i64,
    ) -> HistoryResult<Option<f64>> {
        if !item.value_type.is_numeric() {
            return Err(HistoryError::invalid_input(format!(
                "cannot aggregate {} values of item {}",
                item.value_type, item.itemid
            )));
        }
        let mut b = self.builder();
        b.push("SELECT ")
            .push(
                &self
                    .dialect
                    .to_double(&format!("{}(value)", aggregation.name().to_uppercase())),
            )
            .push(" AS value FROM ")
            .push(history_table(item.value_type))
            .push(" WHERE clock>")
            .bind(time_from)
            .push(" AND itemid=")
            .bind(item.itemid);

        // Aggregates over zero rows are NULL.
        match b.query()?.fetch_optional(&self.pool).await? {
            Some(row) => rows::get_opt_f64(&row, "value"),
            None => Ok(None),
        }
    }

    async fn delete_history(
        &self,
        itemids: &[ItemId],
        value_types: &[ValueType],
    ) -> HistoryResult<()> {
        if itemids.is_empty() {
            return Ok(());
        }
        let mut tables: Vec<&'static str> = Vec::new();
        for value_type in value_types {
            tables.extend(trends_table(*value_type));
            tables.push(history_table(*value_type));
        }
        tables.dedup();

        let mut tx = self.pool.begin().await?;
        for table in &tables {
            for chunk in itemids.chunks(IN_CHUNK) {
                let mut b = self.builder();
                b.push("DELETE FROM ")
                    .push(table)
                    .push(" WHERE ")
                    .in_list("itemid", chunk);
                b.query()?.execute(&mut *tx).await?;
            }
        }
        tx.commit().await?;

        debug!(
            "Deleted history of {} items from {} tables",
            itemids.len(),
            tables.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{insert_float, insert_uint, memory_history};
    use trendline_shared::HistoryValue;

    fn float_item(itemid: ItemId) -> ItemDescriptor {
        ItemDescriptor::new(itemid, ValueType::Float)
    }

    #[tokio::test]
    async fn test_last_value_picks_largest_ns_of_latest_second() {
        let sql = memory_history().await;
        insert_float(sql.pool(), 1, 100, 5, 1.0).await;
        insert_float(sql.pool(), 1, 200, 3, 2.0).await;
        insert_float(sql.pool(), 1, 200, 9, 3.0).await;

        let values = sql.last_values(&[float_item(1)], 1, None).await.unwrap();
        let records = &values[&1];
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].position(), (200, 9));
        assert_eq!(records[0].value, HistoryValue::Float(3.0));
    }

    #[tokio::test]
    async fn test_last_values_respect_since_and_skip_empty_items() {
        let sql = memory_history().await;
        insert_float(sql.pool(), 1, 100, 0, 1.0).await;
        insert_float(sql.pool(), 1, 200, 0, 2.0).await;

        let values = sql
            .last_values(&[float_item(1), float_item(2)], 5, Some(150))
            .await
            .unwrap();
        assert_eq!(values.len(), 1);
        let clocks: Vec<_> = values[&1].iter().map(|r| r.clock).collect();
        assert_eq!(clocks, vec![200]);

        assert!(sql
            .last_values(&[float_item(1)], 0, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_value_at_falls_back_to_earlier_second() {
        let sql = memory_history().await;
        insert_float(sql.pool(), 1, 100, 1, 1.0).await;
        insert_float(sql.pool(), 1, 100, 7, 2.0).await;
        insert_float(sql.pool(), 1, 300, 5, 3.0).await;

        let item = float_item(1);
        let exact = sql.value_at(&item, 300, 5, None).await.unwrap().unwrap();
        assert_eq!(exact.value, HistoryValue::Float(3.0));

        let earlier = sql.value_at(&item, 300, 2, None).await.unwrap().unwrap();
        assert_eq!(earlier.position(), (100, 7));

        assert!(sql.value_at(&item, 300, 2, Some(100)).await.unwrap().is_none());
        assert!(sql.value_at(&item, 50, 0, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_interval_aggregation_on_history() {
        let sql = memory_history().await;
        for (clock, value) in [(0, 1.0), (30, 3.0), (60, 10.0), (61, 20.0)] {
            insert_float(sql.pool(), 1, clock, 0, value).await;
        }
        let range = TimeRange::new(0, 119);
        let buckets = IntervalBuckets::new(60).unwrap();

        let avg = sql
            .aggregate_by_interval(&[float_item(1)], range, AggregateFunction::Avg, buckets)
            .await
            .unwrap();
        let series = &avg[&1];
        assert_eq!(series.source, DataSource::History);
        let points: Vec<_> = series.data.iter().map(|p| (p.tick, p.clock, p.value)).collect();
        assert_eq!(points, vec![(0, 30, Some(2.0)), (60, 61, Some(15.0))]);

        let first = sql
            .aggregate_by_interval(&[float_item(1)], range, AggregateFunction::First, buckets)
            .await
            .unwrap();
        let points: Vec<_> = first[&1].data.iter().map(|p| (p.tick, p.clock, p.value)).collect();
        assert_eq!(points, vec![(0, 0, Some(1.0)), (60, 60, Some(10.0))]);

        let count = sql
            .aggregate_by_interval(&[float_item(1)], range, AggregateFunction::Count, buckets)
            .await
            .unwrap();
        let counts: Vec<_> = count[&1].data.iter().map(|p| p.count).collect();
        assert_eq!(counts, vec![Some(2), Some(2)]);
    }

    #[tokio::test]
    async fn test_width_aggregation_places_midpoint_in_bucket_five() {
        let sql = memory_history().await;
        insert_uint(sql.pool(), 7, 1500, 0, 42).await;
        insert_uint(sql.pool(), 7, 1000, 0, 2).await;
        let item = ItemDescriptor::new(7, ValueType::Unsigned);
        let range = TimeRange::new(1000, 2000);
        let buckets = WidthBuckets::new(range, 10).unwrap();

        let data = sql
            .aggregate_by_width(&[item], range, Some(buckets))
            .await
            .unwrap();
        let points = &data[&7].data;
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].index, Some(0));
        assert_eq!(points[1].index, Some(5));
        assert_eq!(points[1].max, Some(42.0));

        let summary = sql.aggregate_by_width(&[item], range, None).await.unwrap();
        let point = &summary[&7].data[0];
        assert_eq!(point.index, None);
        assert_eq!(point.count, 2);
        assert_eq!(point.avg, Some(22.0));
        assert_eq!(point.clock, 1500);
    }

    #[tokio::test]
    async fn test_aggregated_value_is_none_without_samples() {
        let sql = memory_history().await;
        insert_float(sql.pool(), 1, 100, 0, 4.0).await;
        insert_float(sql.pool(), 1, 200, 0, 8.0).await;
        let item = float_item(1);

        assert_eq!(
            sql.aggregated_value(&item, ValueAggregation::Avg, 0).await.unwrap(),
            Some(6.0)
        );
        // time_from is exclusive
        assert_eq!(
            sql.aggregated_value(&item, ValueAggregation::Min, 100).await.unwrap(),
            Some(8.0)
        );
        assert_eq!(
            sql.aggregated_value(&item, ValueAggregation::Max, 200).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_delete_history_clears_all_tables() {
        let sql = memory_history().await;
        insert_float(sql.pool(), 1, 100, 0, 1.0).await;
        insert_uint(sql.pool(), 1, 100, 0, 1).await;
        insert_float(sql.pool(), 2, 100, 0, 1.0).await;

        sql.delete_history(&[1], &ValueType::ALL).await.unwrap();

        let left = sql
            .last_values(&[float_item(1), float_item(2)], 1, None)
            .await
            .unwrap();
        assert!(!left.contains_key(&1));
        assert!(left.contains_key(&2));
        let uint = sql
            .last_values(&[ItemDescriptor::new(1, ValueType::Unsigned)], 1, None)
            .await
            .unwrap();
        assert!(uint.is_empty());
    }
}
