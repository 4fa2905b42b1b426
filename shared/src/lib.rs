//! Shared types and utilities for Trendline
//!
//! This crate contains the history data model used by the storage engine:
//! value types, item descriptors, stored records and aggregation results.

pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{aggregate::*, item::*, record::*};
pub use utils::{system_time_secs, TimeRange};
