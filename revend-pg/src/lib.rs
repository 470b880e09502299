//! REVEND PostgreSQL - Data-access backend over tokio-postgres
//!
//! Implements the `revend-storage` session contract on a `deadpool-postgres`
//! pool. The main query is read through a held server-side cursor, so rows
//! stream in fixed-size chunks while batches are committed on the same
//! connection.

pub mod config;
pub mod param;
pub mod session;
pub mod sql;

pub use config::DbConfig;
pub use param::PgParam;
pub use session::{PgCursor, PgSession, PgSessionFactory};
pub use sql::RevisionInfo;
