//! Shared fixtures for unit tests.

use crate::bucket::{IntervalBuckets, WidthBuckets};
use crate::error::{HistoryError, HistoryResult};
use crate::router::Backend;
use crate::storage::sql::dialect::Dialect;
use crate::storage::sql::SqlHistory;
use crate::storage::{HistoryBackend, LastValues};
use async_trait::async_trait;
use sqlx::AnyPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use trendline_shared::{
    AggregateFunction, DataSource, GraphData, GraphSeries, HistoryRecord, HistoryValue,
    IntervalPoint, ItemDescriptor, ItemId, TimeRange, ValueAggregation, ValueType, WidthPoint,
};

const SCHEMA: &str = include_str!("../tests/fixtures/schema.sql");

/// A fresh in-memory database with the full schema.
pub async fn memory_history() -> SqlHistory {
    let sql = SqlHistory::connect("sqlite::memory:").await.unwrap();
    for statement in SCHEMA.split(';') {
        if statement.trim().is_empty() {
            continue;
        }
        sqlx::query(statement).execute(sql.pool()).await.unwrap();
    }
    assert_eq!(sql.dialect(), Dialect::Sqlite);
    sql
}

pub async fn exec(pool: &AnyPool, statement: &str) {
    sqlx::query(statement).execute(pool).await.unwrap();
}

pub async fn count(pool: &AnyPool, query: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as(query).fetch_one(pool).await.unwrap();
    n
}

pub async fn insert_float(pool: &AnyPool, itemid: u64, clock: i64, ns: u32, value: f64) {
    sqlx::query("INSERT INTO history (itemid,clock,ns,value) VALUES (?,?,?,?)")
        .bind(itemid as i64)
        .bind(clock)
        .bind(i64::from(ns))
        .bind(value)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn insert_uint(pool: &AnyPool, itemid: u64, clock: i64, ns: u32, value: u64) {
    sqlx::query("INSERT INTO history_uint (itemid,clock,ns,value) VALUES (?,?,?,?)")
        .bind(itemid as i64)
        .bind(clock)
        .bind(i64::from(ns))
        .bind(value as i64)
        .execute(pool)
        .await
        .unwrap();
}

// ── Fake backends ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Answer every call with one synthetic value per item
    Echo,
    /// Fail every call with a store error
    Fail,
    /// Never answer
    Hang,
}

/// In-memory backend whose answers are derived from the itemids it sees.
pub struct FakeBackend {
    kind: Backend,
    behavior: Behavior,
    calls: AtomicUsize,
    deleted: Mutex<Vec<(ItemId, ValueType)>>,
}

impl FakeBackend {
    pub fn new(kind: Backend, behavior: Behavior) -> Self {
        Self {
            kind,
            behavior,
            calls: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<(ItemId, ValueType)> {
        self.deleted.lock().unwrap().clone()
    }

    async fn enter(&self) -> HistoryResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Echo => Ok(()),
            Behavior::Fail => Err(HistoryError::Store {
                status: 503,
                reason: format!("{} backend down", self.kind.as_str()),
            }),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

fn record(itemid: ItemId) -> HistoryRecord {
    HistoryRecord::new(itemid, itemid as i64, 0, HistoryValue::Float(itemid as f64))
}

#[async_trait]
impl HistoryBackend for FakeBackend {
    async fn last_values(
        &self,
        items: &[ItemDescriptor],
        _limit: usize,
        _since: Option<i64>,
    ) -> HistoryResult<LastValues> {
        self.enter().await?;
        Ok(items
            .iter()
            .map(|item| (item.itemid, vec![record(item.itemid)]))
            .collect())
    }

    async fn value_at(
        &self,
        item: &ItemDescriptor,
        _clock: i64,
        _ns: u32,
        _horizon: Option<i64>,
    ) -> HistoryResult<Option<HistoryRecord>> {
        self.enter().await?;
        Ok(Some(record(item.itemid)))
    }

    async fn aggregate_by_interval(
        &self,
        items: &[ItemDescriptor],
        range: TimeRange,
        _function: AggregateFunction,
        buckets: IntervalBuckets,
    ) -> HistoryResult<GraphData<IntervalPoint>> {
        self.enter().await?;
        Ok(items
            .iter()
            .map(|item| {
                let mut series = GraphSeries::new(DataSource::History);
                series.data.push(IntervalPoint {
                    tick: buckets.tick(range.from),
                    clock: range.from,
                    count: None,
                    value: Some(item.itemid as f64),
                });
                (item.itemid, series)
            })
            .collect())
    }

    async fn aggregate_by_width(
        &self,
        items: &[ItemDescriptor],
        range: TimeRange,
        buckets: Option<WidthBuckets>,
    ) -> HistoryResult<GraphData<WidthPoint>> {
        self.enter().await?;
        Ok(items
            .iter()
            .map(|item| {
                let mut series = GraphSeries::new(DataSource::History);
                series.data.push(WidthPoint {
                    index: buckets.map(|b| b.index(range.from)),
                    clock: range.from,
                    count: 1,
                    min: Some(1.0),
                    avg: Some(1.0),
                    max: Some(1.0),
                });
                (item.itemid, series)
            })
            .collect())
    }

    async fn aggregated_value(
        &self,
        item: &ItemDescriptor,
        _aggregation: ValueAggregation,
        _time_from: i64,
    ) -> HistoryResult<Option<f64>> {
        self.enter().await?;
        Ok(Some(item.itemid as f64))
    }

    async fn delete_history(
        &self,
        itemids: &[ItemId],
        value_types: &[ValueType],
    ) -> HistoryResult<()> {
        self.enter().await?;
        let mut deleted = self.deleted.lock().unwrap();
        for itemid in itemids {
            for value_type in value_types {
                deleted.push((*itemid, *value_type));
            }
        }
        Ok(())
    }
}
