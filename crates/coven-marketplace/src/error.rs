use thiserror::Error;

/// Failure of the backing entity store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Store lock poisoned")]
    Poisoned,
    #[error("Transfer {0} already committed")]
    DuplicateTransfer(String),
    #[error("Corrupt {entity} record {id}: {reason}")]
    Corrupt {
        entity: &'static str,
        id: String,
        reason: String,
    },
}

/// A transfer event lacking a field the projection needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Malformed transfer event: missing {field}")]
pub struct MalformedEvent {
    pub field: &'static str,
}

impl MalformedEvent {
    pub fn missing(field: &'static str) -> Self {
        Self { field }
    }
}

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error(transparent)]
    Malformed(#[from] MalformedEvent),
    #[error("Store failure: {0}")]
    Store(#[from] StoreError),
}

/// Raised while assembling the address registry, never during projection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No address registered for {0}")]
    MissingRole(String),
    #[error("Unknown marketplace '{0}'")]
    UnknownMarketplace(String),
    #[error("Invalid address for {role}: '{value}'")]
    InvalidAddress { role: String, value: String },
    #[error("No tracked collection registered")]
    NoCollections,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
