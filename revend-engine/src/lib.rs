//! REVEND Engine - Validity audit strategy migration
//!
//! Converts legacy audit tables, where each row only records the revision
//! that created it, into the validity layout where every superseded row also
//! records the revision that ended it (`REVEND`, optionally
//! `REVEND_TSTMP`).
//!
//! The pieces, in the order a run uses them:
//!
//! - [`keyset::initialize`] samples an entity, counts the rows needing an
//!   end revision and validates the declared key columns.
//! - [`nullify::reset_end_columns`] optionally resets the end columns so a
//!   conversion can restart from scratch.
//! - [`ValidityMigrator`] streams the rows and writes the end columns in
//!   batches.
//! - [`MigrationTask`] checks the configuration against the backend and
//!   runs one migrator per declared entity.

pub mod keyset;
pub mod migrator;
pub mod nullify;
pub mod task;

pub use migrator::{
    AuditEntityMigrator, EntityMigrator, MigrationReport, MiddleEntityMigrator, ValidityMigrator,
};
pub use task::MigrationTask;
