//! Time bucketing for graph aggregation
//!
//! Each bucketing scheme is expressed three ways: as plain arithmetic, as a
//! SQL expression over the `clock` column and as a Painless script for the
//! document store. All three compute the same integer bucket for a clock.

use crate::error::{HistoryError, HistoryResult};
use crate::storage::sql::dialect::Dialect;
use serde_json::{json, Value};
use trendline_shared::TimeRange;

/// Clock seconds from a document store date field.
const PAINLESS_CLOCK: &str = "long c = doc['clock'].value.toInstant().toEpochMilli() / 1000L;";

/// Fixed-width ticks: `tick = clock - clock % interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalBuckets {
    interval: i64,
}

impl IntervalBuckets {
    pub fn new(interval: i64) -> HistoryResult<Self> {
        if interval <= 0 {
            return Err(HistoryError::invalid_input(format!(
                "aggregation interval must be positive, got {}",
                interval
            )));
        }
        Ok(Self { interval })
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }

    pub fn tick(&self, clock: i64) -> i64 {
        clock - clock.rem_euclid(self.interval)
    }

    pub fn sql_expr(&self, column: &str) -> String {
        format!("({c} - ({c} % {i}))", c = column, i = self.interval)
    }

    /// Upper bound on the number of ticks inside `range`.
    pub fn bucket_count(&self, range: TimeRange) -> i64 {
        (range.size() / self.interval + 1).max(1)
    }

    pub fn script(&self) -> Value {
        json!({
            "source": format!("{} return c - c % params.interval;", PAINLESS_CLOCK),
            "lang": "painless",
            "params": { "interval": self.interval }
        })
    }
}

/// Pixel-column buckets: `floor(width * ((clock + delta) % size) / size)`
/// with `size = to - from` and `delta = size - from % size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidthBuckets {
    width: i64,
    size: i64,
    delta: i64,
}

impl WidthBuckets {
    pub fn new(range: TimeRange, width: u32) -> HistoryResult<Self> {
        let size = range.size();
        if size <= 0 {
            return Err(HistoryError::invalid_input(format!(
                "time range {}..{} is empty",
                range.from, range.to
            )));
        }
        if width == 0 {
            return Err(HistoryError::invalid_input("graph width must be positive"));
        }
        Ok(Self {
            width: i64::from(width),
            size,
            delta: size - range.from.rem_euclid(size),
        })
    }

    pub fn width(&self) -> i64 {
        self.width
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn delta(&self) -> i64 {
        self.delta
    }

    pub fn index(&self, clock: i64) -> i64 {
        (self.width * (clock + self.delta).rem_euclid(self.size)).div_euclid(self.size)
    }

    pub fn sql_expr(&self, dialect: Dialect, column: &str) -> String {
        dialect.int_div(
            &format!(
                "{} * (({} + {}) % {})",
                self.width, column, self.delta, self.size
            ),
            &self.size.to_string(),
        )
    }

    pub fn script(&self) -> Value {
        json!({
            "source": format!(
                "{} return Math.floorDiv(params.width * ((c + params.delta) % params.size), params.size);",
                PAINLESS_CLOCK
            ),
            "lang": "painless",
            "params": {
                "width": self.width,
                "delta": self.delta,
                "size": self.size
            }
        })
    }
}
