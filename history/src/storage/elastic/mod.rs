//! Document store history backend
//!
//! One index per value type; each call sends one request per value type
//! involved. A value type whose endpoint cannot be resolved is skipped.

pub mod client;
pub mod query;

use crate::bucket::{IntervalBuckets, WidthBuckets};
use crate::config::ReadPolicy;
use crate::error::{HistoryError, HistoryResult};
use crate::metrics;
use crate::reducer::reducer_for;
use crate::router::{Backend, StorageRouter, DELETE_BY_QUERY, SEARCH};
use crate::storage::{HistoryBackend, LastValues};
use async_trait::async_trait;
use client::{SearchResponse, StoreClient};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use trendline_shared::{
    AggregateFunction, GraphData, HistoryRecord, IntervalPoint, ItemDescriptor, ItemId,
    TimeRange, ValueAggregation, ValueType, WidthPoint,
};

pub struct ElasticHistory {
    client: StoreClient,
    router: Arc<StorageRouter>,
    read_policy: ReadPolicy,
}

fn itemids_by_type(items: &[ItemDescriptor]) -> BTreeMap<ValueType, Vec<ItemId>> {
    let mut groups: BTreeMap<ValueType, Vec<ItemId>> = BTreeMap::new();
    for item in items {
        groups.entry(item.value_type).or_default().push(item.itemid);
    }
    groups
}

impl ElasticHistory {
    pub fn new(
        router: Arc<StorageRouter>,
        timeout: Duration,
        retry_attempts: u32,
    ) -> HistoryResult<Self> {
        Ok(Self {
            client: StoreClient::new(timeout, retry_attempts)?,
            router,
            read_policy: ReadPolicy::default(),
        })
    }

    pub fn with_read_policy(mut self, read_policy: ReadPolicy) -> Self {
        self.read_policy = read_policy;
        self
    }

    /// Search one value type's index.
    ///
    /// `Ok(None)` when the type has no endpoint, or when the request failed
    /// and failures are isolated per value type.
    async fn search(
        &self,
        value_type: ValueType,
        body: &Value,
    ) -> HistoryResult<Option<SearchResponse>> {
        let Some(endpoint) = self.router.endpoint(value_type, SEARCH) else {
            return Ok(None);
        };
        match self.client.search(&endpoint, body).await {
            Ok(response) => Ok(Some(response)),
            Err(e) if self.read_policy == ReadPolicy::Isolate => {
                warn!("Search of {} values failed, skipping: {}", value_type, e);
                metrics::PARTITION_FAILURES
                    .with_label_values(&[Backend::Secondary.as_str(), e.kind()])
                    .inc();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn search_aggregations(
        &self,
        value_type: ValueType,
        body: &Value,
    ) -> HistoryResult<Option<Value>> {
        Ok(self
            .search(value_type, body)
            .await?
            .and_then(|response| response.aggregations().cloned()))
    }
}

#[async_trait]
impl HistoryBackend for ElasticHistory {
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
        for (value_type, itemids) in itemids_by_type(items) {
            let body = query::last_values(&itemids, limit, since);
            let Some(aggs) = self.search_aggregations(value_type, &body).await? else {
                continue;
            };
            for (itemid, mut records) in query::parse_last_values(&aggs, value_type) {
                records.truncate(limit);
                results.insert(itemid, records);
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
        for body in query::value_at(item.itemid, clock, ns, horizon) {
            let Some(response) = self.search(item.value_type, &body).await? else {
                return Ok(None);
            };
            let record = response
                .hits()
                .first()
                .and_then(|source| query::record_from_source(item.value_type, source));
            if record.is_some() {
                return Ok(record);
            }
        }
        Ok(None)
    }

    async fn aggregate_by_interval(
        &self,
        items: &[ItemDescriptor],
        range: TimeRange,
        function: AggregateFunction,
        buckets: IntervalBuckets,
    ) -> HistoryResult<GraphData<IntervalPoint>> {
        let reducer = reducer_for(function);
        let mut data = GraphData::new();
        for (value_type, itemids) in itemids_by_type(items) {
            if !value_type.is_numeric() {
                debug!("Skipping {} items in graph aggregation", value_type);
                continue;
            }
            let body = query::interval_aggregation(&itemids, range, reducer, buckets);
            if let Some(aggs) = self.search_aggregations(value_type, &body).await? {
                data.extend(query::parse_interval(&aggs, reducer));
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
        for (value_type, itemids) in itemids_by_type(items) {
            if !value_type.is_numeric() {
                debug!("Skipping {} items in graph aggregation", value_type);
                continue;
            }
            let body = query::width_aggregation(&itemids, range, buckets);
            if let Some(aggs) = self.search_aggregations(value_type, &body).await? {
                data.extend(query::parse_width(&aggs, buckets.is_some()));
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
        let body = query::aggregated_value(item.itemid, aggregation, time_from);
        Ok(self
            .search_aggregations(item.value_type, &body)
            .await?
            .and_then(|aggs| query::parse_aggregated_value(&aggs, aggregation)))
    }

    async fn delete_history(
        &self,
        itemids: &[ItemId],
        value_types: &[ValueType],
    ) -> HistoryResult<()> {
        if itemids.is_empty() {
            return Ok(());
        }
        let body = query::delete_items(itemids);
        for (value_type, endpoint) in self
            .router
            .endpoints(value_types.iter().copied(), DELETE_BY_QUERY)
        {
            let deleted = self.client.delete_by_query(&endpoint, &body).await?;
            debug!("Deleted {} {} documents", deleted, value_type);
        }
        Ok(())
    }
}
