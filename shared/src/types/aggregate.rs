//! Aggregation functions and aggregated graph points

use super::item::DataSource;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-bucket function for interval aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Min,
    Max,
    Avg,
    Sum,
    Count,
    First,
    Last,
}

impl AggregateFunction {
    pub const ALL: [AggregateFunction; 7] = [
        AggregateFunction::Min,
        AggregateFunction::Max,
        AggregateFunction::Avg,
        AggregateFunction::Sum,
        AggregateFunction::Count,
        AggregateFunction::First,
        AggregateFunction::Last,
    ];
}

impl std::str::FromStr for AggregateFunction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "avg" => Ok(Self::Avg),
            "sum" => Ok(Self::Sum),
            "count" => Ok(Self::Count),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            _ => anyhow::bail!("Invalid aggregate function: {}", s),
        }
    }
}

/// Running aggregate over an item since a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueAggregation {
    Min,
    Max,
    Avg,
}

impl ValueAggregation {
    /// SQL function / document-store metric name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
        }
    }
}

impl std::str::FromStr for ValueAggregation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "avg" => Ok(Self::Avg),
            _ => anyhow::bail!("Invalid value aggregation: {}", s),
        }
    }
}

/// One tick of an interval aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalPoint {
    /// Start of the tick (`clock - clock % interval`)
    pub tick: i64,
    /// Latest clock in the tick, or the clock of the first/last value
    pub clock: i64,
    /// Sample count, when the backend reports it
    pub count: Option<u64>,
    /// Aggregated value; `None` for COUNT
    pub value: Option<f64>,
}

/// One pixel column of a width aggregation, or a whole-range summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidthPoint {
    /// Bucket index; `None` for a whole-range summary
    pub index: Option<i64>,
    /// Latest clock in the bucket
    pub clock: i64,
    pub count: u64,
    pub min: Option<f64>,
    pub avg: Option<f64>,
    pub max: Option<f64>,
}

/// Aggregated data for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSeries<P> {
    pub source: DataSource,
    pub data: Vec<P>,
}

impl<P> GraphSeries<P> {
    pub fn new(source: DataSource) -> Self {
        Self {
            source,
            data: Vec::new(),
        }
    }
}

/// Aggregated data keyed by itemid.
pub type GraphData<P> = HashMap<u64, GraphSeries<P>>;
