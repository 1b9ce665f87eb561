use crate::core::{data_type::SourceType, identifiers::TableKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Suffix appended to a source table name to form its destination name.
pub const DESTINATION_SUFFIX: &str = "_cdc";

/// Cached metadata for one source column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: String,
    /// Raw `udt_name` as reported by the catalog.
    pub udt_name: String,
    pub source_type: SourceType,
    pub ordinal: u32,
    pub is_nullable: bool,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, udt_name: impl Into<String>, ordinal: u32) -> Self {
        let udt_name = udt_name.into();
        Self {
            name: name.into(),
            source_type: SourceType::from_udt_name(&udt_name),
            udt_name,
            ordinal,
            is_nullable: true,
            precision: None,
            scale: None,
        }
    }

    pub fn with_numeric(mut self, precision: Option<u32>, scale: Option<u32>) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }
}

/// Persisted sync metadata for one (source, table) pair.
///
/// The watermark column never changes once the table is tracked and the
/// watermark only ever moves forward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedTable {
    pub key: TableKey,
    pub schema: String,
    pub columns: Vec<ColumnMetadata>,
    pub primary_key: Option<String>,
    /// JSON blob of the last provisioned destination schema.
    pub destination_schema: Option<String>,
    pub watermark_column: String,
    pub watermark: DateTime<Utc>,
    pub last_row_count: i64,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl TrackedTable {
    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn destination_name(&self) -> String {
        format!("{}{}", self.key.name, DESTINATION_SUFFIX)
    }

    /// Columns in source ordinal order.
    pub fn ordered_columns(&self) -> Vec<&ColumnMetadata> {
        let mut columns: Vec<_> = self.columns.iter().collect();
        columns.sort_by_key(|c| c.ordinal);
        columns
    }
}
