use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the synthetic column holding the time a row was read.
pub const SNAPSHOT_COLUMN: &str = "snapshot_tm";

/// Logical column type on the destination side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum DestinationType {
    Integer,
    Numeric,
    Boolean,
    Bytes,
    String,
    Date,
    DateTime,
    Timestamp,
}

impl fmt::Display for DestinationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DestinationType::Integer => "INTEGER",
            DestinationType::Numeric => "NUMERIC",
            DestinationType::Boolean => "BOOLEAN",
            DestinationType::Bytes => "BYTES",
            DestinationType::String => "STRING",
            DestinationType::Date => "DATE",
            DestinationType::DateTime => "DATETIME",
            DestinationType::Timestamp => "TIMESTAMP",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DestinationField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: DestinationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
}

impl DestinationField {
    pub fn new(name: impl Into<String>, field_type: DestinationType) -> Self {
        Self {
            name: name.into(),
            field_type,
            precision: None,
            scale: None,
        }
    }
}

/// Ordered list of destination fields, serialized as a JSON array.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct DestinationSchema {
    pub fields: Vec<DestinationField>,
}

impl DestinationSchema {
    pub fn new(fields: Vec<DestinationField>) -> Self {
        Self { fields }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(blob: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(blob)
    }

    pub fn field(&self, name: &str) -> Option<&DestinationField> {
        self.fields.iter().find(|f| f.name == name)
    }
}
