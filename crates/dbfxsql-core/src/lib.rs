//! Core types for dbfxsql.
//!
//! This crate provides the foundation the sync engine and both storage
//! drivers share:
//!
//! - [`Value`]/[`DataType`] - the canonical value domain both engines
//!   normalize into before rows are compared or written
//! - [`Condition`]/[`Address`] - backend-agnostic predicates and the
//!   `row_number` positional addressing model
//! - [`Engine`]/[`Relation`]/[`SyncTable`]/[`Operation`] - the
//!   configuration-backed data model of a reconciliation pass
//! - [`SyncError`] - the domain error taxonomy
//!
//! The drivers translate their native representations at the boundary
//! (DBF field tags, SQLite declared column types) so that everything
//! above them — the reconciler, the classifier, the orchestrator — only
//! ever sees one domain.

pub mod condition;
pub mod error;
pub mod model;
pub mod types;
pub mod value;

// Re-exports for convenience
pub use condition::{Address, Condition, Operator, ROW_NUMBER};
pub use error::SyncError;
pub use model::{Credentials, Engine, ModelError, Operation, Relation, Row, SyncTable};
pub use types::{canonical_type, normalize_row, EngineKind};
pub use value::{DataType, Value};
