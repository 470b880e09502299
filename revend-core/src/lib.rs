//! REVEND Core - Types shared by every REVEND crate
//!
//! Entity declarations, audit naming configuration, column values, the typed
//! queries that drive a validity migration, and the error taxonomy. This
//! crate performs no I/O.

use chrono::{DateTime, Utc};

pub mod config;
pub mod entity;
pub mod error;
pub mod query;
pub mod row;
pub mod value;

pub use config::{AuditEntitiesConfig, AuditStrategyKind, MigrationSettings, RowLimit};
pub use entity::{
    AuditEntityDeclaration, EntityDeclaration, KeyColumn, KeySet, MiddleAuditEntityDeclaration,
    RowCount,
};
pub use error::{ConfigError, DataAccessError, RevendError, RevendResult, StrategyError};
pub use query::{
    CountQuery, Ident, KeyProjection, MainQuery, PeekQuery, QueryBuilder, ResetEndColumns,
    RevisionRef,
};
pub use row::{AuditRow, PeekedRow, ScrollRow};
pub use value::AuditValue;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
