use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};

/// Normalized family of a Postgres column type, keyed off `udt_name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceType {
    Integer,
    Float,
    Numeric,
    Boolean,
    Binary,
    Character,
    Date,
    AbsTime,
    Timestamp,
    /// Types with no native counterpart that travel as text (json, inet, interval, ...).
    Textual,
    /// `_int4`, `_text`, ... carries the element type name.
    Array(String),
    /// `int2vector`, `oidvector`, pgvector's `vector`.
    Vector(String),
    Unknown(String),
}

lazy_static! {
    static ref POSTGRES_TYPE_MAP: HashMap<&'static str, SourceType> = build_postgres_type_map();
}

impl SourceType {
    pub fn from_udt_name(udt_name: &str) -> Self {
        let normalized = Self::normalize_type_name(udt_name);

        if let Some(element) = normalized.strip_prefix('_')
            && !element.is_empty()
        {
            return SourceType::Array(element.to_string());
        }
        if normalized.ends_with("vector") {
            return SourceType::Vector(normalized);
        }
        if let Some(known) = POSTGRES_TYPE_MAP.get(normalized.as_str()) {
            return known.clone();
        }
        // int(n) and float(n) spellings not in the map
        if normalized.starts_with("int") && !normalized.ends_with("erval") {
            return SourceType::Integer;
        }
        if normalized.starts_with("float") {
            return SourceType::Float;
        }

        SourceType::Unknown(normalized)
    }

    /// Array and vector values are serialized to JSON text at extraction time.
    pub fn is_collection(&self) -> bool {
        matches!(self, SourceType::Array(_) | SourceType::Vector(_))
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self, SourceType::Timestamp)
    }

    fn normalize_type_name(type_name: &str) -> String {
        type_name.trim().to_lowercase()
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Integer => f.write_str("integer"),
            SourceType::Float => f.write_str("float"),
            SourceType::Numeric => f.write_str("numeric"),
            SourceType::Boolean => f.write_str("boolean"),
            SourceType::Binary => f.write_str("binary"),
            SourceType::Character => f.write_str("character"),
            SourceType::Date => f.write_str("date"),
            SourceType::AbsTime => f.write_str("abstime"),
            SourceType::Timestamp => f.write_str("timestamp"),
            SourceType::Textual => f.write_str("textual"),
            SourceType::Array(element) => write!(f, "{element}[]"),
            SourceType::Vector(name) => f.write_str(name),
            SourceType::Unknown(name) => f.write_str(name),
        }
    }
}

fn build_postgres_type_map() -> HashMap<&'static str, SourceType> {
    use SourceType::*;

    let entries = [
        ("int2", Integer),
        ("int4", Integer),
        ("int8", Integer),
        ("smallint", Integer),
        ("integer", Integer),
        ("bigint", Integer),
        ("oid", Integer),
        ("xid", Integer),
        ("float4", Float),
        ("float8", Float),
        ("real", Float),
        ("double precision", Float),
        ("numeric", Numeric),
        ("decimal", Numeric),
        ("bool", Boolean),
        ("boolean", Boolean),
        ("bytea", Binary),
        ("char", Character),
        ("bpchar", Character),
        ("varchar", Character),
        ("character", Character),
        ("character varying", Character),
        ("name", Character),
        ("text", Character),
        ("date", Date),
        ("abstime", AbsTime),
        ("timestamp", Timestamp),
        ("timestamptz", Timestamp),
        ("json", Textual),
        ("jsonb", Textual),
        ("inet", Textual),
        ("interval", Textual),
        ("ltree", Textual),
        ("point", Textual),
        ("regproc", Textual),
    ];

    let mut map = HashMap::new();
    for (name, source_type) in entries {
        map.insert(name, source_type);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_integer_family() {
        for name in ["int2", "INT4", "int8", "oid", "xid", "int16"] {
            assert_eq!(SourceType::from_udt_name(name), SourceType::Integer, "{name}");
        }
    }

    #[test]
    fn interval_is_not_an_integer() {
        assert_eq!(SourceType::from_udt_name("interval"), SourceType::Textual);
    }

    #[test]
    fn arrays_and_vectors_are_collections() {
        let array = SourceType::from_udt_name("_text");
        assert_eq!(array, SourceType::Array("text".into()));
        assert!(array.is_collection());

        let vector = SourceType::from_udt_name("oidvector");
        assert_eq!(vector, SourceType::Vector("oidvector".into()));
        assert!(vector.is_collection());
    }

    #[test]
    fn unknown_types_keep_their_name() {
        assert_eq!(
            SourceType::from_udt_name(" Citext "),
            SourceType::Unknown("citext".into())
        );
    }

    #[test]
    fn both_timestamp_flavours_are_timestamps() {
        assert!(SourceType::from_udt_name("timestamp").is_timestamp());
        assert!(SourceType::from_udt_name("timestamptz").is_timestamp());
        assert!(!SourceType::from_udt_name("abstime").is_timestamp());
    }
}
