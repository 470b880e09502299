//! REVEND Storage - Data-access contract and in-memory implementation
//!
//! The migration engine issues every statement through the traits defined
//! here. `revend-pg` implements them for PostgreSQL; [`InMemoryAuditStore`]
//! implements them over in-process tables for tests and dry runs.

pub mod memory;

pub use memory::{InMemoryAuditStore, InMemoryCursor, InMemorySession, StoredRow};

use async_trait::async_trait;
use revend_core::{
    AuditRow, CountQuery, MainQuery, PeekQuery, PeekedRow, ResetEndColumns, RevendResult,
    ScrollRow,
};

// ============================================================================
// SESSION FACTORY
// ============================================================================

/// Opens sessions against one audited schema.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: AuditSession;

    /// Open a new session. Sessions are not shared between migrators.
    async fn open_session(&self) -> RevendResult<Self::Session>;

    /// Names of all audited entities the backend knows, sorted.
    async fn entity_names(&self) -> RevendResult<Vec<String>>;
}

// ============================================================================
// SESSION
// ============================================================================

/// A unit of work: one connection, at most one open transaction, a buffer
/// of staged row writes.
///
/// Staged rows reach the backend on [`AuditSession::flush`] and become
/// durable on [`AuditSession::commit`]. Commit flushes anything still staged.
#[async_trait]
pub trait AuditSession: Send {
    type Cursor: RowCursor;

    async fn begin(&mut self) -> RevendResult<()>;

    async fn commit(&mut self) -> RevendResult<()>;

    async fn rollback(&mut self) -> RevendResult<()>;

    /// Column names of the first row of an entity, `None` if it has no rows.
    async fn peek(&mut self, query: &PeekQuery) -> RevendResult<Option<PeekedRow>>;

    async fn count(&mut self, query: &CountQuery) -> RevendResult<u64>;

    /// Open a forward-only cursor. The cursor stays valid across commits of
    /// this session.
    async fn scroll(&mut self, query: &MainQuery) -> RevendResult<Self::Cursor>;

    /// Execute a bulk update inside the current transaction; returns the
    /// number of affected rows.
    async fn execute_update(&mut self, update: &ResetEndColumns) -> RevendResult<u64>;

    /// Queue a mutated row for write-back.
    fn stage(&mut self, row: AuditRow);

    /// Send staged rows to the backend.
    async fn flush(&mut self) -> RevendResult<()>;

    /// Drop staged rows and any per-session row state.
    fn clear(&mut self);

    /// Release the session. An open transaction is rolled back.
    async fn close(&mut self) -> RevendResult<()>;
}

// ============================================================================
// CURSOR
// ============================================================================

/// Forward-only cursor over the main query.
#[async_trait]
pub trait RowCursor: Send {
    async fn next_row(&mut self) -> RevendResult<Option<ScrollRow>>;

    async fn close(&mut self) -> RevendResult<()>;
}
