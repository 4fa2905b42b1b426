//! History storage backends

pub mod elastic;
pub mod sql;

use crate::bucket::{IntervalBuckets, WidthBuckets};
use crate::error::HistoryResult;
use async_trait::async_trait;
use std::collections::HashMap;
use trendline_shared::{
    AggregateFunction, GraphData, HistoryRecord, IntervalPoint, ItemDescriptor, ItemId,
    TimeRange, ValueAggregation, ValueType, WidthPoint,
};

/// Last values keyed by itemid, newest first.
pub type LastValues = HashMap<ItemId, Vec<HistoryRecord>>;

/// Read and delete access to stored history.
///
/// Implementations only see items already routed to them. Missing data is
/// reported as absence (no map entry, `None`), never as an error.
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    /// Up to `limit` newest records per item with `clock > since`.
    async fn last_values(
        &self,
        items: &[ItemDescriptor],
        limit: usize,
        since: Option<i64>,
    ) -> HistoryResult<LastValues>;

    /// The record at `(clock, ns)` or its closest predecessor.
    ///
    /// Earlier seconds are searched back to `clock - horizon` when a horizon
    /// is given.
    async fn value_at(
        &self,
        item: &ItemDescriptor,
        clock: i64,
        ns: u32,
        horizon: Option<i64>,
    ) -> HistoryResult<Option<HistoryRecord>>;

    async fn aggregate_by_interval(
        &self,
        items: &[ItemDescriptor],
        range: TimeRange,
        function: AggregateFunction,
        buckets: IntervalBuckets,
    ) -> HistoryResult<GraphData<IntervalPoint>>;

    /// Per-bucket count/min/avg/max, or one summary point per item when
    /// `buckets` is `None`.
    async fn aggregate_by_width(
        &self,
        items: &[ItemDescriptor],
        range: TimeRange,
        buckets: Option<WidthBuckets>,
    ) -> HistoryResult<GraphData<WidthPoint>>;

    /// Aggregate of all values with `clock > time_from`; `None` without samples.
    async fn aggregated_value(
        &self,
        item: &ItemDescriptor,
        aggregation: ValueAggregation,
        time_from: i64,
    ) -> HistoryResult<Option<f64>>;

    /// Remove all stored values of `itemids` for the given value types.
    async fn delete_history(
        &self,
        itemids: &[ItemId],
        value_types: &[ValueType],
    ) -> HistoryResult<()>;
}

/// `history*` table for a value type.
pub fn history_table(value_type: ValueType) -> &'static str {
    match value_type {
        ValueType::Float => "history",
        ValueType::Str => "history_str",
        ValueType::Log => "history_log",
        ValueType::Unsigned => "history_uint",
        ValueType::Text => "history_text",
    }
}

/// `trends*` table for a value type; only numeric types have trends.
pub fn trends_table(value_type: ValueType) -> Option<&'static str> {
    match value_type {
        ValueType::Float => Some("trends"),
        ValueType::Unsigned => Some("trends_uint"),
        ValueType::Str | ValueType::Log | ValueType::Text => None,
    }
}
