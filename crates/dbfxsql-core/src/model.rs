//! Configuration-backed data model: engines, relations, snapshots and
//! the operations a reconciliation pass produces.

use crate::types::EngineKind;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// A row in the canonical domain. Field order travels separately (in the
/// relation's declared field lists) wherever it matters.
pub type Row = HashMap<String, Value>;

/// Errors detected while validating the loaded configuration.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("relation for {sources:?} declares field lists of unequal length")]
    UnevenFieldLists { sources: Vec<String> },

    #[error("relation priority '{priority}' does not name one of its sources {sources:?}")]
    UnknownPriority { priority: String, sources: Vec<String> },

    #[error("relation for {sources:?} must align one table per source")]
    UnevenTables { sources: Vec<String> },
}

/// Network credentials for engines that need them. Both file-backed
/// engines leave this unset; it is carried for server-backed registries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub server: String,
    pub user: String,
    pub password: String,
}

/// Static description of one backend kind. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engine {
    /// Folders watched and searched for this engine's sources.
    pub folderpaths: Vec<PathBuf>,

    /// File extensions owned by this engine (with leading dot).
    pub extensions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,

    /// Suffixes of transient driver artifacts whose change events must be
    /// rewritten back to the real data suffix (e.g. `-journal` scratch
    /// files) before relevance filtering.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub temp_rewrites: Vec<String>,
}

/// A declared correspondence between positionally-aligned sources.
///
/// `sources[i]`/`tables[i]`/`fields[i]` line up: source *i* lives in
/// table *i* (empty for the table-less DBF engine) and exposes the
/// ordered field list *i*. Field lists are a positional correspondence,
/// not a name match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub sources: Vec<String>,
    pub tables: Vec<String>,
    pub fields: Vec<Vec<String>>,

    /// The source that is authoritative for the initial alignment pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

impl Relation {
    /// Enforce the positional-alignment invariants.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.tables.len() != self.sources.len() || self.fields.len() != self.sources.len() {
            return Err(ModelError::UnevenTables {
                sources: self.sources.clone(),
            });
        }

        let width = self.fields.first().map(Vec::len).unwrap_or(0);
        if self.fields.iter().any(|list| list.len() != width) {
            return Err(ModelError::UnevenFieldLists {
                sources: self.sources.clone(),
            });
        }

        if let Some(priority) = &self.priority {
            if !self.sources.contains(priority) {
                return Err(ModelError::UnknownPriority {
                    priority: priority.clone(),
                    sources: self.sources.clone(),
                });
            }
        }

        Ok(())
    }

    /// Whether `filename` is one of this relation's sources.
    pub fn involves(&self, filename: &str) -> bool {
        self.sources.iter().any(|source| source == filename)
    }
}

/// A materialized snapshot of one side of a relation, in backend-native
/// row order. Created fresh on every orchestration pass and discarded
/// after use.
#[derive(Debug, Clone)]
pub struct SyncTable {
    pub engine: EngineKind,
    pub source: String,
    pub table: String,
    pub fields: Vec<String>,
    pub rows: Vec<Row>,
}

impl SyncTable {
    /// Build a snapshot, emptying it when every row is blank: a
    /// brand-new, never-written table must diff as zero rows, not as one
    /// blank row.
    pub fn new(
        engine: EngineKind,
        source: impl Into<String>,
        table: impl Into<String>,
        fields: Vec<String>,
        rows: Vec<Row>,
    ) -> Self {
        let rows = if rows
            .iter()
            .all(|row| row.values().all(Value::is_empty))
        {
            Vec::new()
        } else {
            rows
        };

        SyncTable {
            engine,
            source: source.into(),
            table: table.into(),
            fields,
            rows,
        }
    }
}

/// One change to apply against a destiny table. `index` is the 1-based
/// row_number valid at the moment the batch was computed.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insert { fields: Row },
    Update { index: usize, fields: Row },
    Delete { index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation() -> Relation {
        Relation {
            sources: vec!["users.dbf".into(), "company.db".into()],
            tables: vec!["".into(), "users".into()],
            fields: vec![
                vec!["id".into(), "name".into()],
                vec!["id".into(), "full_name".into()],
            ],
            priority: Some("users.dbf".into()),
        }
    }

    #[test]
    fn valid_relation_passes() {
        assert!(relation().validate().is_ok());
    }

    #[test]
    fn uneven_field_lists_are_rejected() {
        let mut relation = relation();
        relation.fields[1].push("extra".into());

        assert!(matches!(
            relation.validate(),
            Err(ModelError::UnevenFieldLists { .. })
        ));
    }

    #[test]
    fn priority_must_name_a_source() {
        let mut relation = relation();
        relation.priority = Some("other.dbf".into());

        assert!(matches!(
            relation.validate(),
            Err(ModelError::UnknownPriority { .. })
        ));
    }

    #[test]
    fn all_blank_snapshot_is_emptied() {
        let blank = Row::from([
            ("id".to_string(), Value::Null),
            ("name".to_string(), Value::Text(String::new())),
        ]);

        let table = SyncTable::new(
            EngineKind::Dbf,
            "users.dbf",
            "",
            vec!["id".into(), "name".into()],
            vec![blank],
        );

        assert!(table.rows.is_empty());
    }

    #[test]
    fn populated_snapshot_is_kept() {
        let row = Row::from([("id".to_string(), Value::Integer(1))]);
        let table = SyncTable::new(EngineKind::Sqlite, "c.db", "users", vec!["id".into()], vec![row]);

        assert_eq!(table.rows.len(), 1);
    }
}
