//! Source column → destination field mapping and drift detection.

use model::{
    core::data_type::SourceType,
    destination::{DestinationField, DestinationSchema, DestinationType, SNAPSHOT_COLUMN},
    tracking::ColumnMetadata,
};

/// Destination type for a normalized source type.
///
/// Collection types map to `STRING` because extraction serializes them as
/// JSON text.
pub fn destination_type(source: &SourceType) -> DestinationType {
    match source {
        SourceType::Integer => DestinationType::Integer,
        SourceType::Float | SourceType::Numeric => DestinationType::Numeric,
        SourceType::Boolean => DestinationType::Boolean,
        SourceType::Binary => DestinationType::Bytes,
        SourceType::Date => DestinationType::Date,
        SourceType::AbsTime => DestinationType::DateTime,
        SourceType::Timestamp => DestinationType::Timestamp,
        SourceType::Character
        | SourceType::Textual
        | SourceType::Array(_)
        | SourceType::Vector(_)
        | SourceType::Unknown(_) => DestinationType::String,
    }
}

pub fn translate_column(column: &ColumnMetadata) -> DestinationField {
    let mut field = DestinationField::new(&column.name, destination_type(&column.source_type));
    if matches!(column.source_type, SourceType::Numeric) {
        field.precision = column.precision.filter(|p| *p > 0);
        field.scale = column.scale.filter(|s| *s > 0);
    }
    field
}

/// Destination schema for a table: its columns in ordinal order followed by
/// the snapshot timestamp column.
pub fn translate(columns: &[ColumnMetadata]) -> DestinationSchema {
    let mut ordered: Vec<&ColumnMetadata> = columns.iter().collect();
    ordered.sort_by_key(|c| c.ordinal);

    let mut fields: Vec<DestinationField> = ordered.into_iter().map(translate_column).collect();
    fields.push(DestinationField::new(SNAPSHOT_COLUMN, DestinationType::Timestamp));
    DestinationSchema::new(fields)
}

/// Compares two serialized destination schemas.
///
/// Key order inside each field object does not matter. The field sequence
/// must match position by position. Fields are compared on name, type and
/// precision. A blob that does not parse never equals anything.
pub fn schemas_equal(cached: &str, observed: &str) -> bool {
    let (Ok(cached), Ok(observed)) = (
        DestinationSchema::from_json(cached),
        DestinationSchema::from_json(observed),
    ) else {
        return false;
    };

    cached.fields.len() == observed.fields.len()
        && cached.fields.iter().zip(&observed.fields).all(|(a, b)| {
            a.name == b.name && a.field_type == b.field_type && a.precision == b.precision
        })
}
