//! Item descriptors
//!
//! An item is one monitored metric. The storage layer only needs to know its
//! identifier, the type of the values it produces and, for graphs, whether
//! raw history or hourly trends should be read.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Item identifier
pub type ItemId = u64;

/// Type of the values stored for an item.
///
/// The numeric ids match the `items.value_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Float,
    Str,
    Log,
    Unsigned,
    Text,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown value type id: {0}")]
pub struct UnknownValueType(pub u8);

impl ValueType {
    pub const ALL: [ValueType; 5] = [
        ValueType::Float,
        ValueType::Str,
        ValueType::Log,
        ValueType::Unsigned,
        ValueType::Text,
    ];

    /// Numeric id as stored in the database.
    pub fn id(self) -> u8 {
        match self {
            Self::Float => 0,
            Self::Str => 1,
            Self::Log => 2,
            Self::Unsigned => 3,
            Self::Text => 4,
        }
    }

    /// Dense index, usable for per-type lookup arrays.
    pub fn slot(self) -> usize {
        self.id() as usize
    }

    /// Name of the secondary-store index holding values of this type.
    pub fn index_name(self) -> &'static str {
        match self {
            Self::Float => "dbl",
            Self::Str => "str",
            Self::Log => "log",
            Self::Unsigned => "uint",
            Self::Text => "text",
        }
    }

    /// Inverse of [`ValueType::index_name`]. Unknown names map to `Float`.
    pub fn from_index_name(name: &str) -> Self {
        match name {
            "str" => Self::Str,
            "log" => Self::Log,
            "uint" => Self::Unsigned,
            "text" => Self::Text,
            _ => Self::Float,
        }
    }

    /// Whether values can be aggregated numerically (and have trends).
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Float | Self::Unsigned)
    }
}

impl TryFrom<u8> for ValueType {
    type Error = UnknownValueType;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(Self::Float),
            1 => Ok(Self::Str),
            2 => Ok(Self::Log),
            3 => Ok(Self::Unsigned),
            4 => Ok(Self::Text),
            other => Err(UnknownValueType(other)),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.index_name())
    }
}

/// Where aggregated graph data is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    #[default]
    History,
    Trends,
}

impl DataSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::History => "history",
            Self::Trends => "trends",
        }
    }
}

/// What the storage layer needs to know about an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemDescriptor {
    pub itemid: ItemId,
    pub value_type: ValueType,
    /// Only consulted by graph aggregation.
    #[serde(default)]
    pub source: DataSource,
}

impl ItemDescriptor {
    pub fn new(itemid: ItemId, value_type: ValueType) -> Self {
        Self {
            itemid,
            value_type,
            source: DataSource::History,
        }
    }

    pub fn with_source(mut self, source: DataSource) -> Self {
        self.source = source;
        self
    }
}

/// Discovery flag of an item, graph or trigger row (`flags` column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryFlag {
    Normal,
    Prototype,
    Created,
}

impl DiscoveryFlag {
    pub fn id(self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::Prototype => 2,
            Self::Created => 4,
        }
    }

    /// Unknown flag values are treated as normal rows.
    pub fn from_id(id: i64) -> Self {
        match id {
            2 => Self::Prototype,
            4 => Self::Created,
            _ => Self::Normal,
        }
    }
}
