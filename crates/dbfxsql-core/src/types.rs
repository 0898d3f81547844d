//! Engine kinds and native type tags.
//!
//! Each engine declares its columns with its own type vocabulary: DBF uses
//! single-character field tags, SQLite uses declared column type names.
//! The normalizer maps both onto the canonical [`DataType`] universe so the
//! reconciler only ever compares values in one domain.

use crate::error::SyncError;
use crate::model::Row;
use crate::value::{DataType, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Closed set of supported storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// dBase/xBase indexed files (`.dbf`).
    Dbf,
    /// SQLite database files.
    Sqlite,
}

impl EngineKind {
    pub fn as_str(&self) -> &str {
        match self {
            EngineKind::Dbf => "dBase",
            EngineKind::Sqlite => "SQLite",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve an engine-native type tag to its canonical type.
///
/// DBF tags are the single characters of the xBase field descriptor;
/// SQLite tags are declared column types (checked by prefix, following
/// SQLite's own affinity rules, so `VARCHAR(20)` lands on text).
pub fn canonical_type(kind: EngineKind, tag: &str) -> Option<DataType> {
    let tag = tag.trim().to_ascii_uppercase();

    match kind {
        EngineKind::Dbf => match tag.as_str() {
            "C" | "M" | "G" | "P" => Some(DataType::Text),
            "N" | "F" | "B" | "Y" => Some(DataType::Decimal),
            "I" => Some(DataType::Integer),
            "L" => Some(DataType::Boolean),
            "D" => Some(DataType::Date),
            "T" | "@" => Some(DataType::Timestamp),
            "0" => Some(DataType::Null),
            _ => None,
        },
        EngineKind::Sqlite => {
            if tag.is_empty() {
                // Untyped column: no declared meaning to map.
                None
            } else if tag == "NULL" {
                Some(DataType::Null)
            } else if tag.contains("INT") {
                Some(DataType::Integer)
            } else if tag.contains("CHAR") || tag.contains("TEXT") || tag.contains("CLOB") {
                Some(DataType::Text)
            } else if tag.contains("BLOB") {
                Some(DataType::Binary)
            } else if tag.contains("REAL")
                || tag.contains("FLOA")
                || tag.contains("DOUB")
                || tag.contains("NUMERIC")
                || tag.contains("DEC")
            {
                Some(DataType::Decimal)
            } else if tag.contains("BOOL") {
                Some(DataType::Boolean)
            } else if tag.contains("TIMESTAMP") || tag.contains("DATETIME") {
                Some(DataType::Timestamp)
            } else if tag.contains("DATE") {
                Some(DataType::Date)
            } else {
                None
            }
        }
    }
}

/// Normalize a row of raw string values into the canonical domain.
///
/// `type_map` holds the engine-native tag per field (lowercased names).
/// A field without a declared tag is [`SyncError::FieldNotFound`];
/// a value that does not parse for its tag is [`SyncError::ValueNotValid`].
pub fn normalize_row(
    kind: EngineKind,
    type_map: &HashMap<String, String>,
    raw: &HashMap<String, String>,
) -> Result<Row, SyncError> {
    let mut row = Row::new();

    for (field, value) in raw {
        let field = field.to_lowercase();

        let tag = type_map
            .get(&field)
            .ok_or_else(|| SyncError::FieldNotFound(field.clone()))?;

        let target = canonical_type(kind, tag).ok_or_else(|| SyncError::ValueNotValid {
            value: value.clone(),
            field: field.clone(),
            type_tag: tag.clone(),
        })?;

        row.insert(field.clone(), Value::coerce(value, target, &field)?);
    }

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dbf_tags_cover_the_xbase_descriptor_set() {
        assert_eq!(canonical_type(EngineKind::Dbf, "C"), Some(DataType::Text));
        assert_eq!(canonical_type(EngineKind::Dbf, "N"), Some(DataType::Decimal));
        assert_eq!(canonical_type(EngineKind::Dbf, "I"), Some(DataType::Integer));
        assert_eq!(canonical_type(EngineKind::Dbf, "L"), Some(DataType::Boolean));
        assert_eq!(canonical_type(EngineKind::Dbf, "D"), Some(DataType::Date));
        assert_eq!(canonical_type(EngineKind::Dbf, "@"), Some(DataType::Timestamp));
        assert_eq!(canonical_type(EngineKind::Dbf, "X"), None);
    }

    #[test]
    fn sqlite_tags_follow_affinity_prefixes() {
        assert_eq!(
            canonical_type(EngineKind::Sqlite, "VARCHAR(20)"),
            Some(DataType::Text)
        );
        assert_eq!(
            canonical_type(EngineKind::Sqlite, "integer"),
            Some(DataType::Integer)
        );
        assert_eq!(canonical_type(EngineKind::Sqlite, "REAL"), Some(DataType::Decimal));
        assert_eq!(canonical_type(EngineKind::Sqlite, "BLOB"), Some(DataType::Binary));
    }

    #[test]
    fn normalize_rejects_undeclared_fields() {
        let types = HashMap::from([("id".to_string(), "INTEGER".to_string())]);
        let raw = HashMap::from([("name".to_string(), "Ada".to_string())]);

        match normalize_row(EngineKind::Sqlite, &types, &raw) {
            Err(SyncError::FieldNotFound(field)) => assert_eq!(field, "name"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn normalize_coerces_by_declared_tag() {
        let types = HashMap::from([
            ("id".to_string(), "N".to_string()),
            ("name".to_string(), "C".to_string()),
        ]);
        let raw = HashMap::from([
            ("ID".to_string(), "7".to_string()),
            ("NAME".to_string(), "Ada   ".to_string()),
        ]);

        let row = normalize_row(EngineKind::Dbf, &types, &raw).unwrap();
        assert_eq!(row["id"], Value::Decimal(7.into()));
        assert_eq!(row["name"], Value::Text("Ada".to_string()));
    }
}
