//! Utility functions and helpers

pub mod time;

pub use time::{system_time_secs, TimeRange};
