//! The backend adapter contract.
//!
//! Everything above the drivers — orchestrator, reconciler, CLI — talks
//! to storage exclusively through [`Backend`]. The trait is the seam
//! that lets a table-less file format and a relational database be
//! queried and mutated uniformly; nothing outside this module and the
//! two driver modules ever branches on engine identity.

use crate::config::Config;
use crate::dbf::DbfTable;
use crate::sqlite::SqliteTable;
use anyhow::Context;
use async_trait::async_trait;
use dbfxsql_core::{Condition, EngineKind, Row, SyncError, ROW_NUMBER};
use std::collections::HashMap;

/// Row read/insert/update/delete primitives per engine.
///
/// Each mutating call is atomic: the driver opens its own
/// connection/transaction, commits on success and rolls back on failure,
/// wrapping driver-level faults in [`SyncError::ConnectionFailed`]. The
/// sync core holds no cross-call transaction state.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Whether the source (and table, for engines that have one) exists.
    async fn exists(&self) -> Result<bool, SyncError>;

    /// Create the table with `(name, native type declaration)` columns.
    async fn create_table(&self, fields: &[(String, String)]) -> Result<(), SyncError>;

    /// Drop the table (or the whole source for table-less engines).
    async fn drop_table(&self) -> Result<(), SyncError>;

    /// Full scan in backend-native row order, optionally filtered.
    async fn read_where(&self, condition: Option<&Condition>) -> Result<Vec<Row>, SyncError>;

    /// Declared column order, as the backend reports it.
    async fn field_names(&self) -> Result<Vec<String>, SyncError>;

    /// Engine-native type tag per (lowercased) field name.
    async fn read_types(&self) -> Result<HashMap<String, String>, SyncError>;

    /// The declared primary key, if the engine has one. `None` means all
    /// addressing goes through `row_number`.
    async fn fetch_primary_key(&self) -> Result<Option<String>, SyncError>;

    async fn insert(&self, row: Row) -> Result<(), SyncError>;

    async fn bulk_insert(&self, rows: Vec<Row>) -> Result<(), SyncError>;

    async fn update(&self, fields: Row, condition: &Condition) -> Result<(), SyncError>;

    async fn bulk_update(&self, changes: Vec<(Row, Condition)>) -> Result<(), SyncError>;

    async fn delete(&self, condition: &Condition) -> Result<(), SyncError>;

    async fn bulk_delete(&self, conditions: Vec<Condition>) -> Result<(), SyncError>;

    /// Full scan in backend-native row order.
    async fn read_all(&self) -> Result<Vec<Row>, SyncError> {
        self.read_where(None).await
    }
}

/// Open the adapter for a source, auto-detecting the engine from the
/// filename's extension. `table` is empty for the table-less engine.
pub fn open_source(
    config: &Config,
    filename: &str,
    table: &str,
) -> anyhow::Result<Box<dyn Backend>> {
    let (kind, path) = config
        .resolve_path(filename)
        .with_context(|| format!("cannot resolve source '{filename}'"))?;

    Ok(match kind {
        EngineKind::Dbf => Box::new(DbfTable::new(path, filename)),
        EngineKind::Sqlite => Box::new(SqliteTable::new(path, filename, table)),
    })
}

/// Reject any attempt to declare or assign the reserved positional
/// pseudo-field.
pub fn reject_reserved(fields: &[(String, String)]) -> Result<(), SyncError> {
    for (name, _) in fields {
        if name.eq_ignore_ascii_case(ROW_NUMBER) {
            return Err(SyncError::FieldReserved(name.clone()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_number_cannot_be_declared() {
        let fields = vec![
            ("id".to_string(), "INTEGER".to_string()),
            ("Row_Number".to_string(), "INTEGER".to_string()),
        ];

        assert!(matches!(
            reject_reserved(&fields),
            Err(SyncError::FieldReserved(name)) if name == "Row_Number"
        ));
        assert!(reject_reserved(&fields[..1]).is_ok());
    }
}
