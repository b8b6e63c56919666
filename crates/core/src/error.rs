//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures of the data model (malformed
/// identifiers, undecodable snapshots). Storage concerns belong to the
/// persistence crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (e.g. empty or containing control characters).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A serialized snapshot did not match the expected shape.
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}
