//! Sequential validity migrator.
//!
//! Streams the rows of one entity ordered by key ascending and revision
//! descending. The first row of every key run is the current one and keeps
//! a null end revision; every later (older) row ends at the revision of the
//! row before it. Only the previous row is remembered, so memory use does
//! not depend on how many revisions a key has.

use crate::keyset;
use crate::nullify;
use async_trait::async_trait;
use revend_core::{
    AuditEntitiesConfig, AuditEntityDeclaration, AuditValue, EntityDeclaration, KeySet, MainQuery,
    MiddleAuditEntityDeclaration, MigrationSettings, QueryBuilder, RevendResult, RowCount,
    ScrollRow,
};
use revend_storage::{AuditSession, RowCursor, SessionFactory};
use tracing::{debug, error, info, trace, warn};

/// Outcome of migrating one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub entity: String,
    /// Rows needing an end revision, as counted at construction.
    pub row_count: u64,
    pub rows_converted: u64,
    /// Committed transactions that carried row writes.
    pub batches_committed: u64,
    /// Rows touched by the end-column reset, when it ran.
    pub rows_reset: Option<u64>,
}

/// A migrator the driver can run without knowing the declaration shape.
#[async_trait]
pub trait EntityMigrator: Send {
    fn entity(&self) -> &str;

    async fn migrate(self: Box<Self>) -> RevendResult<MigrationReport>;
}

/// Values of the previously processed row.
struct Previous {
    key: Vec<AuditValue>,
    revision: AuditValue,
    timestamp: AuditValue,
}

/// Converts one audited entity to the validity layout.
///
/// Construction samples and validates the entity; `migrate` consumes the
/// migrator, so every instance runs at most once.
pub struct ValidityMigrator<'f, F: SessionFactory, D: EntityDeclaration> {
    factory: &'f F,
    cfg: AuditEntitiesConfig,
    decl: D,
    settings: MigrationSettings,
    keyset: KeySet,
    row_count: RowCount,
    main_query: MainQuery,
}

/// Migrator for entities keyed by one id column.
pub type AuditEntityMigrator<'f, F> = ValidityMigrator<'f, F, AuditEntityDeclaration>;

/// Migrator for many-to-many join entities keyed by a column pair.
pub type MiddleEntityMigrator<'f, F> = ValidityMigrator<'f, F, MiddleAuditEntityDeclaration>;

impl<'f, F, D> std::fmt::Debug for ValidityMigrator<'f, F, D>
where
    F: SessionFactory,
    D: EntityDeclaration,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidityMigrator")
            .field("decl", &self.decl)
            .field("row_count", &self.row_count)
            .field("settings", &self.settings)
            .finish()
    }
}

impl<'f, F, D> ValidityMigrator<'f, F, D>
where
    F: SessionFactory,
    D: EntityDeclaration,
{
    /// Sample the entity and validate the declaration. No rows are written.
    pub async fn new(
        factory: &'f F,
        cfg: &AuditEntitiesConfig,
        decl: D,
        settings: &MigrationSettings,
    ) -> RevendResult<Self> {
        settings.validate()?;
        let main_query = QueryBuilder::new(cfg).main(&decl)?;
        let (keyset, row_count) = keyset::initialize(factory, cfg, &decl).await?;
        Ok(Self {
            factory,
            cfg: cfg.clone(),
            decl,
            settings: settings.clone(),
            keyset,
            row_count,
            main_query,
        })
    }

    pub fn keyset(&self) -> &KeySet {
        &self.keyset
    }

    pub fn row_count(&self) -> RowCount {
        self.row_count
    }

    pub async fn migrate(self) -> RevendResult<MigrationReport> {
        info!("Migrating {}", self.decl);

        let mut report = MigrationReport {
            entity: self.decl.name().to_string(),
            row_count: self.row_count.get(),
            ..Default::default()
        };

        if self.settings.nullify_existing_end_columns {
            let reset = nullify::reset_end_columns(self.factory, &self.cfg, &self.decl).await?;
            report.rows_reset = Some(reset);
        }

        info!(entity = self.decl.name(), "Found {} rows to update", self.row_count);
        if self.row_count.is_zero() {
            info!("No rows to update for {}", self.decl);
            return Ok(report);
        }

        info!(query = %self.main_query, "Executing query");
        let mut session = self.factory.open_session().await?;
        let converted = self.convert(&mut session, &mut report).await;
        let closed = session.close().await;

        if let Err(e) = converted {
            error!(
                entity = self.decl.name(),
                rows_converted = report.rows_converted,
                batches_committed = report.batches_committed,
                error = %e,
                "Migration aborted; committed batches are kept"
            );
            if let Err(close_err) = closed {
                warn!(entity = self.decl.name(), error = %close_err, "Failed to close session");
            }
            return Err(e);
        }
        closed?;

        debug!(entity = self.decl.name(), "===============================================================");
        Ok(report)
    }

    async fn convert(
        &self,
        session: &mut F::Session,
        report: &mut MigrationReport,
    ) -> RevendResult<()> {
        let mut cursor = session.scroll(&self.main_query).await?;
        let streamed = self.stream(session, &mut cursor, report).await;
        let closed = cursor.close().await;
        streamed?;
        closed
    }

    async fn stream<C: RowCursor>(
        &self,
        session: &mut F::Session,
        cursor: &mut C,
        report: &mut MigrationReport,
    ) -> RevendResult<()> {
        let batch_size = self.settings.batch_size;
        let limit = self.settings.max_rows_converted;
        let mut count: u64 = 0;
        let mut last_flush: u64 = 0;
        let mut previous: Option<Previous> = None;

        session.begin().await?;

        while limit.allows(count) {
            let Some(mut row) = cursor.next_row().await? else {
                break;
            };

            let key = self.key_of(&row)?;
            let (end_revision, end_timestamp) = match &previous {
                // Same key: an older revision, superseded by the previous row.
                Some(prev) if prev.key == key => (prev.revision.clone(), prev.timestamp.clone()),
                // New key: the current revision.
                _ => (AuditValue::Null, AuditValue::Null),
            };

            let revision = row.get(self.main_query.revision_index())?.clone();
            let timestamp = match self.main_query.revision_timestamp_index() {
                Some(index) => row.get(index)?.clone(),
                None => AuditValue::Null,
            };

            debug!(
                entity = self.decl.name(),
                key = ?key,
                revision = %revision,
                revision_timestamp = %timestamp,
                end_revision = %end_revision,
                end_revision_timestamp = %end_timestamp,
                "updating row"
            );
            trace!(fields = ?row.audit_row.fields(), "audit row");

            row.audit_row
                .put(self.cfg.revision_end_field_name.clone(), end_revision);
            if self.cfg.revision_end_timestamp_enabled {
                let field = &self.cfg.revision_end_timestamp_field_name;
                let end_timestamp = end_timestamp.normalize_timestamp(field)?;
                row.audit_row.put(field.clone(), end_timestamp);
            }
            session.stage(row.audit_row);

            count += 1;
            report.rows_converted = count;

            if count % batch_size == 0 {
                self.log_commit(last_flush, count);
                session.flush().await?;
                session.clear();
                session.commit().await?;
                report.batches_committed += 1;
                last_flush = count;
                session.begin().await?;
            }

            previous = Some(Previous {
                key,
                revision,
                timestamp,
            });
        }

        if count % batch_size != 0 {
            self.log_commit(last_flush, count);
            session.flush().await?;
            session.clear();
            report.batches_committed += 1;
        }
        session.commit().await
    }

    fn key_of(&self, row: &ScrollRow) -> RevendResult<Vec<AuditValue>> {
        (0..self.main_query.key_len())
            .map(|position| row.get(self.main_query.key_index(position)).cloned())
            .collect()
    }

    fn log_commit(&self, from: u64, to: u64) {
        if self.settings.debug_logging {
            info!(
                entity = self.decl.name(),
                "Committing rows {} - {} of {} for {}",
                from,
                to,
                self.row_count,
                self.decl.name()
            );
        } else {
            debug!(
                entity = self.decl.name(),
                "Committing rows {} - {} of {} for {}",
                from,
                to,
                self.row_count,
                self.decl.name()
            );
        }
    }
}

#[async_trait]
impl<'f, F, D> EntityMigrator for ValidityMigrator<'f, F, D>
where
    F: SessionFactory,
    D: EntityDeclaration,
{
    fn entity(&self) -> &str {
        self.decl.name()
    }

    async fn migrate(self: Box<Self>) -> RevendResult<MigrationReport> {
        ValidityMigrator::migrate(*self).await
    }
}
