//! Graph deletion with its inherited copies and references

use super::{execute_chunked, select_chunked, Closure};
use crate::error::HistoryResult;
use crate::storage::sql::dialect::Dialect;
use crate::storage::sql::SqlHistory;
use sqlx::{AnyConnection, AnyPool};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

const SCREEN_RESOURCE_GRAPH: i64 = 0;

pub struct GraphCascade {
    pool: AnyPool,
    dialect: Dialect,
}

impl GraphCascade {
    pub fn new(pool: AnyPool, dialect: Dialect) -> Self {
        Self { pool, dialect }
    }

    pub fn from_history(sql: &SqlHistory) -> Self {
        Self::new(sql.pool().clone(), sql.dialect())
    }

    /// Delete `graphids`, every graph inherited or discovered from them, and
    /// everything that points at those graphs. Returns the deleted ids.
    pub async fn delete(&self, graphids: &[u64]) -> HistoryResult<Vec<u64>> {
        if graphids.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.pool.begin().await?;
        let deleted = Self::delete_in(&mut tx, self.dialect, graphids).await?;
        tx.commit().await?;
        info!("Deleted {} graphs", deleted.len());
        Ok(deleted)
    }

    /// Same as [`GraphCascade::delete`] on an open connection or transaction.
    pub(crate) async fn delete_in(
        conn: &mut AnyConnection,
        dialect: Dialect,
        graphids: &[u64],
    ) -> HistoryResult<Vec<u64>> {
        let mut closure = Closure::new(graphids.iter().copied());
        while !closure.is_settled() {
            let frontier = closure.frontier().to_vec();
            let mut found = select_chunked(conn, dialect, &frontier, |b, chunk| {
                b.push("SELECT graphid AS id FROM graphs WHERE ")
                    .in_list("templateid", chunk);
            })
            .await?;
            found.extend(
                select_chunked(conn, dialect, &frontier, |b, chunk| {
                    b.push("SELECT graphid AS id FROM graph_discovery WHERE ")
                        .in_list("parent_graphid", chunk);
                })
                .await?,
            );
            closure.advance(found);
        }
        let doomed: Vec<u64> = closure.into_members().into_iter().collect();
        debug!("Graph closure of {} seeds: {}", graphids.len(), doomed.len());

        execute_chunked(conn, dialect, &doomed, |b, chunk| {
            b.push("DELETE FROM screens_items WHERE resourcetype=")
                .bind(SCREEN_RESOURCE_GRAPH)
                .push(" AND ")
                .in_list("resourceid", chunk);
        })
        .await?;
        execute_chunked(conn, dialect, &doomed, |b, chunk| {
            b.push("DELETE FROM profiles WHERE idx=")
                .bind("web.favorite.graphids")
                .push(" AND source=")
                .bind("graphid")
                .push(" AND ")
                .in_list("value_id", chunk);
        })
        .await?;
        execute_chunked(conn, dialect, &doomed, |b, chunk| {
            b.push("DELETE FROM profiles WHERE idx=")
                .bind("web.latest.graphid")
                .push(" AND ")
                .in_list("value_id", chunk);
        })
        .await?;
        for (table, column) in [
            ("widget_field", "value_graphid"),
            ("graph_discovery", "graphid"),
            ("graphs_items", "graphid"),
        ] {
            execute_chunked(conn, dialect, &doomed, |b, chunk| {
                b.push("DELETE FROM ").push(table).push(" WHERE ").in_list(column, chunk);
            })
            .await?;
        }

        let removed = execute_chunked(conn, dialect, &doomed, |b, chunk| {
            b.push("DELETE FROM graphs WHERE ").in_list("graphid", chunk);
        })
        .await?;
        debug!("Removed {} graph rows", removed);
        Ok(doomed)
    }
}

/// Graphs whose every item is in `doomed`.
///
/// `memberships` holds `(graphid, itemid)` pairs of the graphs to check.
pub fn orphaned_graphs(memberships: &[(u64, u64)], doomed: &BTreeSet<u64>) -> Vec<u64> {
    let mut graphs: BTreeMap<u64, bool> = BTreeMap::new();
    for (graphid, itemid) in memberships {
        let orphaned = graphs.entry(*graphid).or_insert(true);
        *orphaned &= doomed.contains(itemid);
    }
    graphs
        .into_iter()
        .filter_map(|(graphid, orphaned)| orphaned.then_some(graphid))
        .collect()
}
