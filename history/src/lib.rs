//! History storage engine for Trendline
//!
//! Reads, aggregates and deletes item history kept in a relational database
//! and, for selected value types, in an Elasticsearch-style document store.
//! [`HistoryManager`] is the entry point for reads and history deletes;
//! [`ItemCascade`] and [`GraphCascade`] delete configuration objects together
//! with everything derived from them.

pub mod bucket;
pub mod cascade;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod reducer;
pub mod retry;
pub mod router;
pub mod storage;

#[cfg(test)]
mod testing;

pub use cascade::{CascadeReport, GraphCascade, ItemCascade, TriggerCascade};
pub use config::{HistoryConfig, ReadPolicy, SecondaryStoreConfig, StoreUrl};
pub use error::{HistoryError, HistoryResult};
pub use logging::init_logging;
pub use manager::HistoryManager;
pub use router::{Backend, RoutingSource, StorageRouter};
pub use storage::elastic::ElasticHistory;
pub use storage::sql::SqlHistory;
pub use storage::{HistoryBackend, LastValues};
