//! Error types for REVEND operations

use std::collections::BTreeSet;
use thiserror::Error;

/// Configuration errors. Always raised before any row is written.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown entity {entity}; available entities: {available:?}")]
    UnknownEntity {
        entity: String,
        available: Vec<String>,
    },

    #[error("Invalid {attribute} [{column}] for {entity}; should be in {valid:?}")]
    InvalidKeyColumn {
        entity: String,
        attribute: &'static str,
        column: String,
        valid: BTreeSet<String>,
    },

    #[error("Invalid identifier \"{value}\": {reason}")]
    InvalidIdentifier { value: String, reason: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },
}

/// Raised when the audit configuration in force is not the validity strategy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrategyError {
    #[error("Unexpected audit strategy: {strategy}")]
    Unexpected { strategy: String },
}

/// Failures reported by the relational backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DataAccessError {
    #[error("Query failed: {query}: {reason}")]
    QueryFailed { query: String, reason: String },

    #[error("Update failed for {entity}: {reason}")]
    UpdateFailed { entity: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Cursor failed: {reason}")]
    CursorFailed { reason: String },

    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Type mismatch for {column}: expected {expected}, found {found}")]
    TypeMismatch {
        column: String,
        expected: String,
        found: String,
    },

    #[error("No table for entity {entity}")]
    UnknownTable { entity: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Master error type for all REVEND errors.
#[derive(Debug, Clone, Error)]
pub enum RevendError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Data access error: {0}")]
    DataAccess(#[from] DataAccessError),
}

impl RevendError {
    /// True for errors detected before any write was attempted.
    pub fn is_preflight(&self) -> bool {
        matches!(self, RevendError::Config(_) | RevendError::Strategy(_))
    }
}

/// Result type alias for REVEND operations.
pub type RevendResult<T> = Result<T, RevendError>;

// =============================================================================
// TESTS
// =============================================================================
