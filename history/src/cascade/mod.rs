//! Cascade delete
//!
//! Deleting an item also deletes everything derived from it: items inherited
//! through templates, dependent items, item prototypes and the items they
//! discovered. Graphs left without items, triggers using doomed items and
//! screen and profile references go with them, and a housekeeper task is
//! queued for every history and trend table of each deleted item.
//!
//! The whole cascade runs in one transaction.

pub mod closure;
pub mod graphs;
pub mod triggers;

pub use closure::Closure;
pub use graphs::GraphCascade;
pub use triggers::TriggerCascade;

use crate::config::{HistoryConfig, DEFAULT_MAX_INSERTS};
use crate::error::HistoryResult;
use crate::metrics;
use crate::storage::sql::dialect::{Dialect, SqlBuilder, IN_CHUNK};
use crate::storage::sql::rows;
use crate::storage::sql::SqlHistory;
use serde::Serialize;
use sqlx::{AnyConnection, AnyPool};
use std::collections::BTreeSet;
use tracing::{debug, info};
use trendline_shared::{DiscoveryFlag, ItemId};

/// `items.type` of an item fed by a master item.
pub const ITEM_TYPE_DEPENDENT: i64 = 18;

const GRAPH_YAXIS_TYPE_CALCULATED: i64 = 0;

/// Simple graph, plain text and clock screen elements.
const ITEM_SCREEN_RESOURCES: [i64; 3] = [1, 3, 7];

/// Tables the housekeeper clears for a deleted item.
pub const HOUSEKEEPER_TABLES: [&str; 8] = [
    "trends",
    "trends_uint",
    "history_text",
    "history_log",
    "history_uint",
    "history_str",
    "history",
    "events",
];

/// What one cascade delete removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    /// Normal and discovered items
    pub items: Vec<ItemId>,
    pub prototypes: Vec<ItemId>,
    pub graphs: Vec<u64>,
    pub triggers: Vec<u64>,
    pub housekeeper_rows: usize,
    /// INSERT statements used for the housekeeper rows
    pub housekeeper_batches: usize,
}

impl CascadeReport {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.prototypes.is_empty()
    }
}

/// Select the `id` column of a query run once per chunk of `ids`.
pub(crate) async fn select_chunked<F>(
    conn: &mut AnyConnection,
    dialect: Dialect,
    ids: &[u64],
    build: F,
) -> HistoryResult<Vec<u64>>
where
    F: Fn(&mut SqlBuilder, &[u64]),
{
    let mut found = Vec::new();
    for chunk in ids.chunks(IN_CHUNK) {
        let mut b = SqlBuilder::new(dialect);
        build(&mut b, chunk);
        let fetched = b.query()?.fetch_all(&mut *conn).await?;
        for row in &fetched {
            found.push(rows::get_i64(row, "id")? as u64);
        }
    }
    Ok(found)
}

/// Run a statement once per chunk of `ids`; returns the affected row count.
pub(crate) async fn execute_chunked<F>(
    conn: &mut AnyConnection,
    dialect: Dialect,
    ids: &[u64],
    build: F,
) -> HistoryResult<u64>
where
    F: Fn(&mut SqlBuilder, &[u64]),
{
    let mut affected = 0;
    for chunk in ids.chunks(IN_CHUNK) {
        let mut b = SqlBuilder::new(dialect);
        build(&mut b, chunk);
        affected += b.query()?.execute(&mut *conn).await?.rows_affected();
    }
    Ok(affected)
}

pub struct ItemCascade {
    pool: AnyPool,
    dialect: Dialect,
    max_inserts: usize,
}

impl ItemCascade {
    pub fn new(pool: AnyPool, dialect: Dialect) -> Self {
        Self {
            pool,
            dialect,
            max_inserts: DEFAULT_MAX_INSERTS,
        }
    }

    pub fn from_history(sql: &SqlHistory) -> Self {
        Self::new(sql.pool().clone(), sql.dialect())
    }

    /// A cascade on `sql` batching housekeeper rows as `config` says.
    pub fn from_config(config: &HistoryConfig, sql: &SqlHistory) -> Self {
        Self::from_history(sql).with_max_inserts(config.max_inserts)
    }

    /// Rows per housekeeper INSERT statement.
    pub fn with_max_inserts(mut self, max_inserts: usize) -> Self {
        self.max_inserts = max_inserts.max(1);
        self
    }

    /// Delete `itemids` and everything derived from them.
    ///
    /// Ids without an item row are ignored. Any failing statement rolls the
    /// whole delete back.
    pub async fn delete(&self, itemids: &[ItemId]) -> HistoryResult<CascadeReport> {
        if itemids.is_empty() {
            return Ok(CascadeReport::default());
        }
        let mut tx = self.pool.begin().await?;
        let report = self.delete_in(&mut tx, itemids).await?;
        tx.commit().await?;

        metrics::DELETED_ITEMS.inc_by((report.items.len() + report.prototypes.len()) as f64);
        metrics::HOUSEKEEPER_ROWS.inc_by(report.housekeeper_rows as f64);
        info!(
            "Deleted {} items, {} item prototypes, {} graphs and {} triggers",
            report.items.len(),
            report.prototypes.len(),
            report.graphs.len(),
            report.triggers.len()
        );
        Ok(report)
    }

    async fn delete_in(
        &self,
        conn: &mut AnyConnection,
        itemids: &[ItemId],
    ) -> HistoryResult<CascadeReport> {
        let dialect = self.dialect;
        let closure = self.closure(conn, itemids).await?;
        let candidates: Vec<ItemId> = closure.into_iter().collect();

        let mut report = CascadeReport::default();
        for (itemid, flag) in self.flags(conn, &candidates).await? {
            match flag {
                DiscoveryFlag::Prototype => report.prototypes.push(itemid),
                DiscoveryFlag::Normal | DiscoveryFlag::Created => report.items.push(itemid),
            }
        }
        report.items.sort_unstable();
        report.prototypes.sort_unstable();

        let doomed: Vec<ItemId> = report
            .items
            .iter()
            .chain(&report.prototypes)
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if doomed.is_empty() {
            debug!("No items found for {} ids", itemids.len());
            return Ok(report);
        }

        let orphans = self.orphaned_graphs(conn, &doomed).await?;
        if !orphans.is_empty() {
            report.graphs = GraphCascade::delete_in(conn, dialect, &orphans).await?;
        }

        // Surviving graphs drop their doomed lines.
        execute_chunked(conn, dialect, &doomed, |b, chunk| {
            b.push("DELETE FROM graphs_items WHERE ").in_list("itemid", chunk);
        })
        .await?;

        for axis in ["ymin", "ymax"] {
            execute_chunked(conn, dialect, &doomed, |b, chunk| {
                b.push("UPDATE graphs SET ")
                    .push(axis)
                    .push("_type=")
                    .bind(GRAPH_YAXIS_TYPE_CALCULATED)
                    .push(",")
                    .push(axis)
                    .push("_itemid=NULL WHERE ")
                    .in_list(&format!("{}_itemid", axis), chunk);
            })
            .await?;
        }

        let triggers = TriggerCascade::referencing(conn, dialect, &doomed).await?;
        if !triggers.is_empty() {
            report.triggers = TriggerCascade::delete_in(conn, dialect, &triggers).await?;
        }

        execute_chunked(conn, dialect, &doomed, |b, chunk| {
            b.push("DELETE FROM screens_items WHERE ")
                .in_list("resourcetype", &ITEM_SCREEN_RESOURCES.map(|r| r as u64))
                .push(" AND ")
                .in_list("resourceid", chunk);
        })
        .await?;
        execute_chunked(conn, dialect, &doomed, |b, chunk| {
            b.push("DELETE FROM profiles WHERE idx=")
                .bind("web.favorite.graphids")
                .push(" AND source=")
                .bind("itemid")
                .push(" AND ")
                .in_list("value_id", chunk);
        })
        .await?;
        for column in ["itemid", "parent_itemid"] {
            execute_chunked(conn, dialect, &doomed, |b, chunk| {
                b.push("DELETE FROM item_discovery WHERE ").in_list(column, chunk);
            })
            .await?;
        }

        (report.housekeeper_rows, report.housekeeper_batches) =
            self.queue_housekeeper(conn, &report.items).await?;

        let removed = execute_chunked(conn, dialect, &doomed, |b, chunk| {
            b.push("DELETE FROM items WHERE ").in_list("itemid", chunk);
        })
        .await?;
        debug!("Removed {} item rows", removed);
        Ok(report)
    }

    /// Every item reachable from `seeds` through template inheritance,
    /// dependency on a master item, or discovery from a prototype.
    async fn closure(
        &self,
        conn: &mut AnyConnection,
        seeds: &[ItemId],
    ) -> HistoryResult<BTreeSet<ItemId>> {
        let dialect = self.dialect;
        let mut closure = Closure::new(seeds.iter().copied());
        while !closure.is_settled() {
            let frontier = closure.frontier().to_vec();
            let mut found = select_chunked(conn, dialect, &frontier, |b, chunk| {
                b.push("SELECT itemid AS id FROM items WHERE ")
                    .in_list("templateid", chunk);
            })
            .await?;
            found.extend(
                select_chunked(conn, dialect, &frontier, |b, chunk| {
                    b.push("SELECT itemid AS id FROM items WHERE type=")
                        .bind(ITEM_TYPE_DEPENDENT)
                        .push(" AND ")
                        .in_list("master_itemid", chunk);
                })
                .await?,
            );
            found.extend(
                select_chunked(conn, dialect, &frontier, |b, chunk| {
                    b.push("SELECT itemid AS id FROM item_discovery WHERE ")
                        .in_list("parent_itemid", chunk);
                })
                .await?,
            );
            closure.advance(found);
        }
        debug!(
            "Item closure of {} seeds: {} ids after {} rounds",
            seeds.len(),
            closure.len(),
            closure.rounds()
        );
        Ok(closure.into_members())
    }

    async fn flags(
        &self,
        conn: &mut AnyConnection,
        itemids: &[ItemId],
    ) -> HistoryResult<Vec<(ItemId, DiscoveryFlag)>> {
        let mut flags = Vec::with_capacity(itemids.len());
        for chunk in itemids.chunks(IN_CHUNK) {
            let mut b = SqlBuilder::new(self.dialect);
            b.push("SELECT itemid,flags FROM items WHERE ")
                .in_list("itemid", chunk);
            let fetched = b.query()?.fetch_all(&mut *conn).await?;
            for row in &fetched {
                flags.push((
                    rows::get_i64(row, "itemid")? as ItemId,
                    DiscoveryFlag::from_id(rows::get_i64(row, "flags")?),
                ));
            }
        }
        Ok(flags)
    }

    /// Graphs that only contain doomed items.
    async fn orphaned_graphs(
        &self,
        conn: &mut AnyConnection,
        doomed: &[ItemId],
    ) -> HistoryResult<Vec<u64>> {
        let graphids = select_chunked(conn, self.dialect, doomed, |b, chunk| {
            b.push("SELECT DISTINCT graphid AS id FROM graphs_items WHERE ")
                .in_list("itemid", chunk);
        })
        .await?;
        let graphids: Vec<u64> = graphids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();

        let mut memberships = Vec::new();
        for chunk in graphids.chunks(IN_CHUNK) {
            let mut b = SqlBuilder::new(self.dialect);
            b.push("SELECT graphid,itemid FROM graphs_items WHERE ")
                .in_list("graphid", chunk);
            let fetched = b.query()?.fetch_all(&mut *conn).await?;
            for row in &fetched {
                memberships.push((
                    rows::get_i64(row, "graphid")? as u64,
                    rows::get_i64(row, "itemid")? as u64,
                ));
            }
        }

        let doomed: BTreeSet<u64> = doomed.iter().copied().collect();
        Ok(graphs::orphaned_graphs(&memberships, &doomed))
    }

    /// Queue history cleanup for `itemids`, `max_inserts` rows per statement.
    ///
    /// Returns the rows queued and the statements used.
    async fn queue_housekeeper(
        &self,
        conn: &mut AnyConnection,
        itemids: &[ItemId],
    ) -> HistoryResult<(usize, usize)> {
        let tasks: Vec<(&str, ItemId)> = itemids
            .iter()
            .flat_map(|itemid| HOUSEKEEPER_TABLES.iter().map(move |table| (*table, *itemid)))
            .collect();

        let mut batches = 0;
        for batch in tasks.chunks(self.max_inserts) {
            let mut b = SqlBuilder::new(self.dialect);
            b.push("INSERT INTO housekeeper (tablename,field,value) VALUES ");
            for (i, (table, itemid)) in batch.iter().enumerate() {
                if i > 0 {
                    b.push(",");
                }
                b.push("(")
                    .bind(*table)
                    .push(",")
                    .bind("itemid")
                    .push(",")
                    .bind(*itemid)
                    .push(")");
            }
            b.query()?.execute(&mut *conn).await?;
            batches += 1;
        }
        debug!(
            "Queued {} housekeeper tasks in {} statements",
            tasks.len(),
            batches
        );
        Ok((tasks.len(), batches))
    }
}
