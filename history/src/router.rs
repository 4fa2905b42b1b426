//! Storage router
//!
//! Decides per value type whether history lives in SQL tables or in the
//! secondary document store, and resolves document store endpoints. Both
//! answers are computed from configuration at most once per value type and
//! then served from write-once cells.

use crate::config::{HistoryConfig, SecondaryStoreConfig};
use crate::metrics;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{debug, warn};
use trendline_shared::{ItemDescriptor, ValueType};

/// Document store search action.
pub const SEARCH: &str = "_search";

/// Document store delete-by-query action.
pub const DELETE_BY_QUERY: &str = "_delete_by_query";

/// Storage backend serving a value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Sql,
    Secondary,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Secondary => "secondary",
        }
    }
}

/// Where the router reads its routing table from.
pub trait RoutingSource: Send + Sync {
    /// Current secondary store configuration; `None` routes everything to SQL.
    fn secondary_store(&self) -> Option<SecondaryStoreConfig>;
}

impl RoutingSource for HistoryConfig {
    fn secondary_store(&self) -> Option<SecondaryStoreConfig> {
        self.secondary.clone()
    }
}

impl RoutingSource for SecondaryStoreConfig {
    fn secondary_store(&self) -> Option<SecondaryStoreConfig> {
        Some(self.clone())
    }
}

/// Items split by the backend that serves them.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Partitions {
    pub sql: Vec<ItemDescriptor>,
    pub secondary: Vec<ItemDescriptor>,
}

pub struct StorageRouter {
    source: Arc<dyn RoutingSource>,
    backends: [OnceCell<Backend>; 5],
    /// `Some(None)` marks a type whose URL is missing; warned about once.
    urls: [OnceCell<Option<String>>; 5],
}

impl StorageRouter {
    pub fn new(source: Arc<dyn RoutingSource>) -> Self {
        Self {
            source,
            backends: Default::default(),
            urls: Default::default(),
        }
    }

    /// Backend for a value type.
    pub fn classify(&self, value_type: ValueType) -> Backend {
        *self.backends[value_type.slot()].get_or_init(|| {
            metrics::ROUTING_CACHE_MISSES.inc();
            let backend = match self.source.secondary_store() {
                Some(store)
                    if store
                        .types
                        .iter()
                        .any(|name| name == value_type.index_name()) =>
                {
                    Backend::Secondary
                }
                _ => Backend::Sql,
            };
            debug!("Value type {} routed to {}", value_type, backend.as_str());
            backend
        })
    }

    fn base_url(&self, value_type: ValueType) -> Option<&str> {
        self.urls[value_type.slot()]
            .get_or_init(|| {
                let index = value_type.index_name();
                let url = self
                    .source
                    .secondary_store()
                    .and_then(|store| store.url_for(index));
                if url.is_none() {
                    warn!("Secondary store url is not set for type: {}", index);
                }
                url
            })
            .as_deref()
    }

    /// `{base_url}{index}*/values/{action}` for a store-routed value type.
    ///
    /// `None` if the type lives in SQL or its URL is not configured.
    pub fn endpoint(&self, value_type: ValueType, action: &str) -> Option<String> {
        if self.classify(value_type) != Backend::Secondary {
            return None;
        }
        self.base_url(value_type)
            .map(|url| format!("{}{}*/values/{}", url, value_type.index_name(), action))
    }

    /// Endpoints for several value types, deduplicated, skipping unresolvable ones.
    pub fn endpoints(
        &self,
        value_types: impl IntoIterator<Item = ValueType>,
        action: &str,
    ) -> Vec<(ValueType, String)> {
        let mut types: Vec<ValueType> = value_types.into_iter().collect();
        types.sort();
        types.dedup();
        types
            .into_iter()
            .filter_map(|vt| self.endpoint(vt, action).map(|url| (vt, url)))
            .collect()
    }

    /// All value types served by the secondary store.
    pub fn secondary_types(&self) -> Vec<ValueType> {
        ValueType::ALL
            .into_iter()
            .filter(|vt| self.classify(*vt) == Backend::Secondary)
            .collect()
    }

    /// Split items by backend, keeping their input order.
    pub fn partition(&self, items: &[ItemDescriptor]) -> Partitions {
        let mut partitions = Partitions::default();
        for item in items {
            match self.classify(item.value_type) {
                Backend::Sql => partitions.sql.push(*item),
                Backend::Secondary => partitions.secondary.push(*item),
            }
        }
        partitions
    }
}

impl std::fmt::Debug for StorageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRouter")
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}
