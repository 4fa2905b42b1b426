//! History data model

pub mod aggregate;
pub mod item;
pub mod record;
