//! Helpers shared by the integration tests.
#![allow(dead_code)]

use sqlx::AnyPool;
use std::sync::Arc;
use trendline_history::{HistoryConfig, HistoryManager, SecondaryStoreConfig, SqlHistory, StorageRouter, StoreUrl};

const SCHEMA: &str = include_str!("../fixtures/schema.sql");

/// In-memory SQLite database with the history and configuration tables.
pub async fn sqlite() -> SqlHistory {
    let sql = SqlHistory::connect("sqlite::memory:").await.unwrap();
    for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
        sqlx::query(statement).execute(sql.pool()).await.unwrap();
    }
    sql
}

/// Manager over `sql` with every value type kept in SQL.
pub fn sql_only(sql: &SqlHistory) -> HistoryManager {
    let router = Arc::new(StorageRouter::new(Arc::new(HistoryConfig::default())));
    HistoryManager::new(router, Arc::new(SqlHistory::new(sql.pool().clone(), sql.dialect())))
}

/// Routing that sends `types` to a store at `url`.
pub fn store_router(types: &[&str], url: &str) -> Arc<StorageRouter> {
    Arc::new(StorageRouter::new(Arc::new(SecondaryStoreConfig {
        types: types.iter().map(|t| t.to_string()).collect(),
        url: Some(StoreUrl::Single(url.to_string())),
    })))
}

pub async fn exec(pool: &AnyPool, statement: &str) {
    sqlx::query(statement).execute(pool).await.unwrap();
}

pub async fn count(pool: &AnyPool, query: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as(query).fetch_one(pool).await.unwrap();
    n
}

pub async fn insert(pool: &AnyPool, table: &str, itemid: u64, clock: i64, ns: u32, value: f64) {
    let statement = format!(
        "INSERT INTO {} (itemid,clock,ns,value) VALUES (?,?,?,?)",
        table
    );
    let query = sqlx::query(&statement)
        .bind(itemid as i64)
        .bind(clock)
        .bind(i64::from(ns));
    let query = if table == "history_uint" {
        query.bind(value as i64)
    } else {
        query.bind(value)
    };
    query.execute(pool).await.unwrap();
}
