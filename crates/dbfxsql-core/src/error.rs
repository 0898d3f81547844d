//! Domain error taxonomy shared by both storage engines.
//!
//! Every variant here represents either a configuration/programming error
//! or a genuinely absent entity; none of them is retried by the sync
//! engine. Driver-level faults are wrapped in [`SyncError::ConnectionFailed`]
//! after the driver has rolled back.

use thiserror::Error;

/// Errors raised by the backend adapters and the type normalizer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A driver-level fault. The adapter rolls back before raising this.
    #[error("{engine} connection with '{source}' failed: {cause}")]
    ConnectionFailed {
        engine: String,
        source: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The source file does not exist under its engine's folders.
    #[error("source '{0}' not found")]
    SourceNotFound(String),

    /// A `create` would overwrite an existing source file.
    #[error("source '{0}' already exists")]
    SourceAlreadyExists(String),

    #[error("table '{0}' not found")]
    TableNotFound(String),

    #[error("table '{0}' already exists")]
    TableAlreadyExists(String),

    /// A condition selected no rows.
    #[error("row not found with: {0}")]
    RowNotFound(String),

    /// An insert or update would collide with another row's primary key.
    #[error("row already exists with key: {0}")]
    RowAlreadyExists(String),

    #[error("field '{0}' not found")]
    FieldNotFound(String),

    /// An attempt to declare or assign the reserved `row_number` pseudo-field.
    #[error("field '{0}' is reserved and cannot be assigned")]
    FieldReserved(String),

    /// Type coercion failure.
    #[error("value '{value}' not valid for field '{field}' with type '{type_tag}'")]
    ValueNotValid {
        value: String,
        field: String,
        type_tag: String,
    },
}

impl SyncError {
    /// Wrap a driver fault, recording which engine and source it came from.
    pub fn connection<E>(engine: impl Into<String>, source: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SyncError::ConnectionFailed {
            engine: engine.into(),
            source: source.into(),
            cause: Box::new(cause),
        }
    }
}
