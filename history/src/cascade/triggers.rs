//! Trigger deletion with inherited copies

use super::{execute_chunked, select_chunked, Closure};
use crate::error::HistoryResult;
use crate::storage::sql::dialect::Dialect;
use crate::storage::sql::SqlHistory;
use sqlx::{AnyConnection, AnyPool};
use tracing::{debug, info};

pub struct TriggerCascade {
    pool: AnyPool,
    dialect: Dialect,
}

impl TriggerCascade {
    pub fn new(pool: AnyPool, dialect: Dialect) -> Self {
        Self { pool, dialect }
    }

    pub fn from_history(sql: &SqlHistory) -> Self {
        Self::new(sql.pool().clone(), sql.dialect())
    }

    pub async fn delete(&self, triggerids: &[u64]) -> HistoryResult<Vec<u64>> {
        if triggerids.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.pool.begin().await?;
        let deleted = Self::delete_in(&mut tx, self.dialect, triggerids).await?;
        tx.commit().await?;
        info!("Deleted {} triggers", deleted.len());
        Ok(deleted)
    }

    pub(crate) async fn delete_in(
        conn: &mut AnyConnection,
        dialect: Dialect,
        triggerids: &[u64],
    ) -> HistoryResult<Vec<u64>> {
        let mut closure = Closure::new(triggerids.iter().copied());
        while !closure.is_settled() {
            let frontier = closure.frontier().to_vec();
            let found = select_chunked(conn, dialect, &frontier, |b, chunk| {
                b.push("SELECT triggerid AS id FROM triggers WHERE ")
                    .in_list("templateid", chunk);
            })
            .await?;
            closure.advance(found);
        }
        let doomed: Vec<u64> = closure.into_members().into_iter().collect();

        execute_chunked(conn, dialect, &doomed, |b, chunk| {
            b.push("DELETE FROM functions WHERE ").in_list("triggerid", chunk);
        })
        .await?;
        let removed = execute_chunked(conn, dialect, &doomed, |b, chunk| {
            b.push("DELETE FROM triggers WHERE ").in_list("triggerid", chunk);
        })
        .await?;
        debug!("Removed {} trigger rows", removed);
        Ok(doomed)
    }

    /// Triggers with a function on any of `itemids`.
    pub(crate) async fn referencing(
        conn: &mut AnyConnection,
        dialect: Dialect,
        itemids: &[u64],
    ) -> HistoryResult<Vec<u64>> {
        let mut found = select_chunked(conn, dialect, itemids, |b, chunk| {
            b.push("SELECT DISTINCT triggerid AS id FROM functions WHERE ")
                .in_list("itemid", chunk);
        })
        .await?;
        found.sort_unstable();
        found.dedup();
        Ok(found)
    }
}
