//! Error types for request-path registry operations.
//!
//! Maintenance paths (the cleaner, lock acquisition and release) never
//! surface these errors; they log and continue.

use crate::cipher::CipherError;
use crate::storage::StorageError;
use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors surfaced to the immediate caller of a registry operation.
///
/// An absent or expired ticket is not an error: lookups return `Ok(None)` for
/// both so callers cannot tell them apart.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The storage backend failed.
    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    /// A ticket could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The cipher rejected a payload.
    #[error("Cipher error: {0}")]
    Cipher(#[from] CipherError),

    /// No catalog entry matches the ticket's prefix.
    #[error("No ticket definition registered for ticket {0}")]
    UnknownTicketType(String),

    /// Invalid registry, catalog or cipher configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RegistryError {
    /// Returns `true` if retrying the same call may succeed.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ticket_registry_core::{RegistryError, StorageError};
    /// let err = RegistryError::from(StorageError::Connection("reset".into()));
    /// assert!(err.is_transient());
    /// assert!(!RegistryError::UnknownTicketType("XX-1".into()).is_transient());
    /// ```
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(StorageError::Connection(_)))
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
