//! Stored history and trend records

use super::item::ItemId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Extra columns carried by log values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LogValue {
    pub timestamp: i64,
    pub source: String,
    pub severity: i32,
    pub logeventid: i64,
    pub value: String,
}

/// A history value, typed by the table/index it was read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryValue {
    Unsigned(u64),
    Float(f64),
    Str(String),
    Text(String),
    Log(LogValue),
}

/// One stored sample of an item.
///
/// Within an item, `(clock, ns)` is unique. Storage returns rows in no
/// particular order unless asked to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub itemid: ItemId,
    /// Seconds since UNIX epoch
    pub clock: i64,
    /// Nanoseconds within `clock` (0..999_999_999)
    pub ns: u32,
    pub value: HistoryValue,
}

impl HistoryRecord {
    pub fn new(itemid: ItemId, clock: i64, ns: u32, value: HistoryValue) -> Self {
        Self {
            itemid,
            clock,
            ns,
            value,
        }
    }

    /// Position of the record on the item's timeline.
    pub fn position(&self) -> (i64, u32) {
        (self.clock, self.ns)
    }

    /// Orders records newest first by `(clock, ns)`.
    fn newest_first(a: &Self, b: &Self) -> Ordering {
        b.position().cmp(&a.position())
    }
}

/// Sort records newest first by `(clock, ns)`.
pub fn sort_newest_first(records: &mut [HistoryRecord]) {
    records.sort_by(HistoryRecord::newest_first);
}

/// Hourly rollup of a numeric item, as stored in `trends*` tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRecord {
    pub itemid: ItemId,
    /// Start of the hour bucket
    pub clock: i64,
    /// Number of samples in the bucket
    pub num: u64,
    pub value_min: f64,
    pub value_avg: f64,
    pub value_max: f64,
}
