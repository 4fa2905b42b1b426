//! History manager
//!
//! Entry point for history reads and deletes. Items are split by the
//! [`StorageRouter`], each backend partition runs concurrently under its own
//! deadline, and the per-backend maps are merged by itemid.

use crate::bucket::{IntervalBuckets, WidthBuckets};
use crate::config::{HistoryConfig, ReadPolicy};
use crate::error::{HistoryError, HistoryResult};
use crate::metrics;
use crate::router::{Backend, StorageRouter};
use crate::storage::elastic::ElasticHistory;
use crate::storage::sql::SqlHistory;
use crate::storage::{HistoryBackend, LastValues};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trendline_shared::{
    system_time_secs, AggregateFunction, GraphData, HistoryRecord, IntervalPoint,
    ItemDescriptor, ItemId, TimeRange, ValueAggregation, ValueType, WidthPoint,
};

pub struct HistoryManager {
    router: Arc<StorageRouter>,
    sql: Arc<dyn HistoryBackend>,
    secondary: Option<Arc<dyn HistoryBackend>>,
    read_policy: ReadPolicy,
    partition_timeout: Duration,
    history_period: Option<i64>,
    cancel: CancellationToken,
}

impl HistoryManager {
    pub fn new(router: Arc<StorageRouter>, sql: Arc<dyn HistoryBackend>) -> Self {
        let defaults = HistoryConfig::default();
        Self {
            router,
            sql,
            secondary: None,
            read_policy: defaults.read_policy,
            partition_timeout: defaults.partition_timeout(),
            history_period: defaults.history_period(),
            cancel: CancellationToken::new(),
        }
    }

    /// Build the SQL backend, and the document store backend when any value
    /// type is routed to it.
    pub async fn connect(config: &HistoryConfig) -> HistoryResult<Self> {
        config
            .validate()
            .map_err(|e| HistoryError::config(e.to_string()))?;

        let router = Arc::new(StorageRouter::new(Arc::new(config.clone())));
        let sql = Arc::new(SqlHistory::connect(&config.database_url).await?);

        let mut manager = Self::new(router.clone(), sql)
            .with_read_policy(config.read_policy)
            .with_partition_timeout(config.partition_timeout())
            .with_history_period(config.history_period());

        if config.secondary.is_some() {
            let secondary = ElasticHistory::new(
                router,
                config.store_timeout(),
                config.store_retry_attempts,
            )?
            .with_read_policy(config.read_policy);
            manager = manager.with_secondary(Arc::new(secondary));
        }

        info!(
            "History manager ready (secondary store: {})",
            manager.secondary.is_some()
        );
        Ok(manager)
    }

    pub fn with_secondary(mut self, backend: Arc<dyn HistoryBackend>) -> Self {
        self.secondary = Some(backend);
        self
    }

    pub fn with_read_policy(mut self, read_policy: ReadPolicy) -> Self {
        self.read_policy = read_policy;
        self
    }

    pub fn with_partition_timeout(mut self, timeout: Duration) -> Self {
        self.partition_timeout = timeout;
        self
    }

    /// Lookback for `value_at`; `None` searches all earlier history.
    pub fn with_history_period(mut self, period: Option<i64>) -> Self {
        self.history_period = period.filter(|p| *p > 0);
        self
    }

    pub fn router(&self) -> &StorageRouter {
        &self.router
    }

    /// Token that aborts every in-flight backend call when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn backend(&self, backend: Backend) -> Option<&dyn HistoryBackend> {
        match backend {
            Backend::Sql => Some(self.sql.as_ref()),
            Backend::Secondary => self.secondary.as_deref(),
        }
    }

    /// Run one backend call under the partition deadline and cancellation.
    async fn guarded<T>(
        &self,
        backend: Backend,
        operation: &'static str,
        call: impl Future<Output = HistoryResult<T>>,
    ) -> HistoryResult<T> {
        let token = self.cancel.child_token();
        let started = Instant::now();

        let result = tokio::select! {
            _ = token.cancelled() => Err(HistoryError::Cancelled(format!(
                "{} on {} backend",
                operation,
                backend.as_str()
            ))),
            outcome = tokio::time::timeout(self.partition_timeout, call) => match outcome {
                Ok(result) => result,
                Err(_) => Err(HistoryError::Timeout(format!(
                    "{} on {} backend after {:?}",
                    operation,
                    backend.as_str(),
                    self.partition_timeout
                ))),
            },
        };

        metrics::observe_backend(
            backend.as_str(),
            operation,
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );
        result
    }

    /// Read from one backend, applying the read policy to failures.
    async fn read<'a, T, F, Fut>(
        &'a self,
        backend: Backend,
        operation: &'static str,
        items: &'a [ItemDescriptor],
        call: F,
    ) -> HistoryResult<T>
    where
        T: Default,
        F: FnOnce(&'a dyn HistoryBackend, &'a [ItemDescriptor]) -> Fut,
        Fut: Future<Output = HistoryResult<T>>,
    {
        if items.is_empty() {
            return Ok(T::default());
        }
        let Some(target) = self.backend(backend) else {
            warn!(
                "{} items routed to the {} backend, which is not configured",
                items.len(),
                backend.as_str()
            );
            return Ok(T::default());
        };

        match self.guarded(backend, operation, call(target, items)).await {
            Ok(value) => Ok(value),
            Err(e @ HistoryError::InvalidInput(_)) => Err(e),
            Err(e) => match self.read_policy {
                ReadPolicy::Propagate => Err(e),
                ReadPolicy::Isolate => {
                    warn!(
                        "{} on {} backend failed, skipping {} items: {}",
                        operation,
                        backend.as_str(),
                        items.len(),
                        e
                    );
                    metrics::PARTITION_FAILURES
                        .with_label_values(&[backend.as_str(), e.kind()])
                        .inc();
                    Ok(T::default())
                }
            },
        }
    }

    /// Up to `limit` newest values per item, newest first.
    ///
    /// `period` limits the search to the last `period` seconds. Items without
    /// values are absent from the result.
    pub async fn last_values(
        &self,
        items: &[ItemDescriptor],
        limit: usize,
        period: Option<i64>,
    ) -> HistoryResult<LastValues> {
        if limit == 0 || items.is_empty() {
            return Ok(LastValues::new());
        }
        let since = period.filter(|p| *p > 0).map(|p| system_time_secs() - p);
        let parts = self.router.partition(items);

        let (sql, secondary) = tokio::join!(
            self.read(Backend::Sql, "last_values", &parts.sql, |b, items| {
                b.last_values(items, limit, since)
            }),
            self.read(Backend::Secondary, "last_values", &parts.secondary, |b, items| {
                b.last_values(items, limit, since)
            }),
        );
        let mut results = sql?;
        results.extend(secondary?);
        Ok(results)
    }

    /// The value stored at `(clock, ns)`, or the closest earlier one.
    pub async fn value_at(
        &self,
        item: &ItemDescriptor,
        clock: i64,
        ns: u32,
    ) -> HistoryResult<Option<HistoryRecord>> {
        let backend = self.router.classify(item.value_type);
        let horizon = self.history_period;
        self.read(backend, "value_at", std::slice::from_ref(item), |b, items| {
            b.value_at(&items[0], clock, ns, horizon)
        })
        .await
    }

    /// Per-interval aggregation of numeric items for graphs.
    pub async fn graph_aggregation_by_interval(
        &self,
        items: &[ItemDescriptor],
        from: i64,
        to: i64,
        function: AggregateFunction,
        interval: i64,
    ) -> HistoryResult<GraphData<IntervalPoint>> {
        let buckets = IntervalBuckets::new(interval)?;
        let range = TimeRange::new(from, to);
        let items = numeric_items(items);
        let parts = self.router.partition(&items);

        let (sql, secondary) = tokio::join!(
            self.read(Backend::Sql, "aggregate_by_interval", &parts.sql, |b, items| {
                b.aggregate_by_interval(items, range, function, buckets)
            }),
            self.read(
                Backend::Secondary,
                "aggregate_by_interval",
                &parts.secondary,
                |b, items| b.aggregate_by_interval(items, range, function, buckets)
            ),
        );
        let mut data = sql?;
        data.extend(secondary?);
        Ok(data)
    }

    /// Pixel-column aggregation for graphs.
    ///
    /// Without `width` each item gets a single summary point over the range.
    pub async fn graph_aggregation_by_width(
        &self,
        items: &[ItemDescriptor],
        from: i64,
        to: i64,
        width: Option<u32>,
    ) -> HistoryResult<GraphData<WidthPoint>> {
        let range = TimeRange::new(from, to);
        let buckets = width.map(|w| WidthBuckets::new(range, w)).transpose()?;
        let items = numeric_items(items);
        let parts = self.router.partition(&items);

        let (sql, secondary) = tokio::join!(
            self.read(Backend::Sql, "aggregate_by_width", &parts.sql, |b, items| {
                b.aggregate_by_width(items, range, buckets)
            }),
            self.read(
                Backend::Secondary,
                "aggregate_by_width",
                &parts.secondary,
                |b, items| b.aggregate_by_width(items, range, buckets)
            ),
        );
        let mut data = sql?;
        data.extend(secondary?);
        Ok(data)
    }

    /// Min, max or average of the values stored after `time_from`.
    pub async fn aggregated_value(
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
        let backend = self.router.classify(item.value_type);
        self.read(
            backend,
            "aggregated_value",
            std::slice::from_ref(item),
            |b, items| b.aggregated_value(&items[0], aggregation, time_from),
        )
        .await
    }

    /// Remove history and trends of `itemids` from every backend.
    ///
    /// SQL goes first, then the secondary store, and both are always
    /// attempted. The two deletes are not atomic together: `false` means at
    /// least one failed and the call can be repeated.
    pub async fn delete_history(&self, itemids: &[ItemId]) -> bool {
        if itemids.is_empty() {
            return true;
        }

        let sql = self
            .guarded(
                Backend::Sql,
                "delete_history",
                self.sql.delete_history(itemids, &ValueType::ALL),
            )
            .await;
        if let Err(e) = &sql {
            warn!("Deleting SQL history of {} items failed: {}", itemids.len(), e);
        }

        let secondary_types = self.router.secondary_types();
        let secondary = match (&self.secondary, secondary_types.is_empty()) {
            (Some(backend), false) => {
                self.guarded(
                    Backend::Secondary,
                    "delete_history",
                    backend.delete_history(itemids, &secondary_types),
                )
                .await
            }
            _ => Ok(()),
        };
        if let Err(e) = &secondary {
            warn!(
                "Deleting secondary store history of {} items failed: {}",
                itemids.len(),
                e
            );
        }

        debug!("Deleted history of {} items", itemids.len());
        sql.is_ok() && secondary.is_ok()
    }
}

/// Numeric items only; graphs cannot aggregate text values.
fn numeric_items(items: &[ItemDescriptor]) -> Vec<ItemDescriptor> {
    items
        .iter()
        .filter(|item| {
            let numeric = item.value_type.is_numeric();
            if !numeric {
                debug!(
                    "Item {} holds {} values, skipped by graph aggregation",
                    item.itemid, item.value_type
                );
            }
            numeric
        })
        .copied()
        .collect()
}
