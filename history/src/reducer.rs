//! Aggregate function lookup table
//!
//! One row per [`AggregateFunction`], read by both backends so SQL and the
//! document store agree on what each function computes.

use trendline_shared::{AggregateFunction, DataSource};

/// Which end of a bucket provides the representative clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockPick {
    Earliest,
    Latest,
}

impl ClockPick {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Earliest => "MIN(clock)",
            Self::Latest => "MAX(clock)",
        }
    }

    pub fn metric(self) -> &'static str {
        match self {
            Self::Earliest => "min",
            Self::Latest => "max",
        }
    }

    pub fn order(self) -> &'static str {
        match self {
            Self::Earliest => "asc",
            Self::Latest => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// Numeric aggregate of the bucket's values
    Value,
    /// Number of samples in the bucket
    Count,
    /// The value stored at the representative clock
    Sample,
}

#[derive(Debug)]
pub struct Reducer {
    pub function: AggregateFunction,
    pub output: Output,
    pub clock: ClockPick,
    /// Aggregate over `history*` tables
    pub history_sql: Option<&'static str>,
    /// Aggregate over `trends*` tables
    pub trends_sql: Option<&'static str>,
    /// Document store metric aggregation
    pub metric: Option<&'static str>,
}

impl Reducer {
    pub fn sql(&self, source: DataSource) -> Option<&'static str> {
        match source {
            DataSource::History => self.history_sql,
            DataSource::Trends => self.trends_sql,
        }
    }

    pub fn is_sample(&self) -> bool {
        self.output == Output::Sample
    }
}

static REDUCERS: [Reducer; 7] = [
    Reducer {
        function: AggregateFunction::Min,
        output: Output::Value,
        clock: ClockPick::Latest,
        history_sql: Some("MIN(value)"),
        trends_sql: Some("MIN(value_min)"),
        metric: Some("min"),
    },
    Reducer {
        function: AggregateFunction::Max,
        output: Output::Value,
        clock: ClockPick::Latest,
        history_sql: Some("MAX(value)"),
        trends_sql: Some("MAX(value_max)"),
        metric: Some("max"),
    },
    Reducer {
        function: AggregateFunction::Avg,
        output: Output::Value,
        clock: ClockPick::Latest,
        history_sql: Some("AVG(value)"),
        trends_sql: Some("AVG(value_avg)"),
        metric: Some("avg"),
    },
    Reducer {
        function: AggregateFunction::Sum,
        output: Output::Value,
        clock: ClockPick::Latest,
        history_sql: Some("SUM(value)"),
        trends_sql: Some("SUM(value_avg * num)"),
        metric: Some("sum"),
    },
    Reducer {
        function: AggregateFunction::Count,
        output: Output::Count,
        clock: ClockPick::Latest,
        history_sql: Some("COUNT(*)"),
        trends_sql: Some("SUM(num)"),
        metric: None,
    },
    Reducer {
        function: AggregateFunction::First,
        output: Output::Sample,
        clock: ClockPick::Earliest,
        history_sql: None,
        trends_sql: None,
        metric: None,
    },
    Reducer {
        function: AggregateFunction::Last,
        output: Output::Sample,
        clock: ClockPick::Latest,
        history_sql: None,
        trends_sql: None,
        metric: None,
    },
];

pub fn reducer_for(function: AggregateFunction) -> &'static Reducer {
    match function {
        AggregateFunction::Min => &REDUCERS[0],
        AggregateFunction::Max => &REDUCERS[1],
        AggregateFunction::Avg => &REDUCERS[2],
        AggregateFunction::Sum => &REDUCERS[3],
        AggregateFunction::Count => &REDUCERS[4],
        AggregateFunction::First => &REDUCERS[5],
        AggregateFunction::Last => &REDUCERS[6],
    }
}

/// Column holding the representative value of a row for FIRST/LAST.
pub fn sample_column(source: DataSource) -> &'static str {
    match source {
        DataSource::History => "value",
        DataSource::Trends => "value_avg",
    }
}
