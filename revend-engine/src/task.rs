//! Migration driver.

use crate::migrator::{EntityMigrator, MigrationReport, ValidityMigrator};
use revend_core::{
    AuditEntitiesConfig, AuditEntityDeclaration, AuditStrategyKind, ConfigError,
    EntityDeclaration, MiddleAuditEntityDeclaration, MigrationSettings, RevendResult,
    StrategyError,
};
use revend_storage::SessionFactory;
use tracing::{error, info};

/// Migrates a configured set of entities, one after another.
#[derive(Debug, Clone, Default)]
pub struct MigrationTask {
    settings: MigrationSettings,
    audit: AuditEntitiesConfig,
    audit_entities: Vec<AuditEntityDeclaration>,
    middle_entities: Vec<MiddleAuditEntityDeclaration>,
}

impl MigrationTask {
    pub fn new(settings: MigrationSettings, audit: AuditEntitiesConfig) -> Self {
        Self {
            settings,
            audit,
            audit_entities: Vec::new(),
            middle_entities: Vec::new(),
        }
    }

    pub fn add_audit_entity(&mut self, decl: AuditEntityDeclaration) -> &mut Self {
        self.audit_entities.push(decl);
        self
    }

    pub fn add_middle_entity(&mut self, decl: MiddleAuditEntityDeclaration) -> &mut Self {
        self.middle_entities.push(decl);
        self
    }

    pub fn settings(&self) -> &MigrationSettings {
        &self.settings
    }

    pub fn audit_entities(&self) -> &[AuditEntityDeclaration] {
        &self.audit_entities
    }

    pub fn middle_entities(&self) -> &[MiddleAuditEntityDeclaration] {
        &self.middle_entities
    }

    fn is_empty(&self) -> bool {
        self.audit_entities.is_empty() && self.middle_entities.is_empty()
    }

    fn declared_names(&self) -> impl Iterator<Item = &str> {
        self.audit_entities
            .iter()
            .map(|d| d.name())
            .chain(self.middle_entities.iter().map(|d| d.name()))
    }

    /// Run the migration.
    ///
    /// Every migrator is built, and so every declaration validated, before
    /// the first row is written. Entities then run in declaration order,
    /// single-key entities first. A failure stops the run; entities already
    /// migrated stay committed.
    pub async fn execute<F: SessionFactory>(&self, factory: &F) -> RevendResult<Vec<MigrationReport>> {
        self.settings.validate()?;

        if self.audit.strategy != AuditStrategyKind::Validity {
            return Err(StrategyError::Unexpected {
                strategy: self.audit.strategy.to_string(),
            }
            .into());
        }

        let mut available = factory.entity_names().await?;
        available.sort();

        if self.is_empty() {
            info!("No entities configured for migration; available entities:");
            for name in &available {
                info!("    {}", name);
            }
            return Ok(Vec::new());
        }

        for name in self.declared_names() {
            if available.binary_search_by(|a| a.as_str().cmp(name)).is_err() {
                error!(entity = name, available = ?available, "Unknown entity");
                return Err(ConfigError::UnknownEntity {
                    entity: name.to_string(),
                    available,
                }
                .into());
            }
        }

        let mut migrators: Vec<Box<dyn EntityMigrator + '_>> =
            Vec::with_capacity(self.audit_entities.len() + self.middle_entities.len());
        for decl in &self.audit_entities {
            let migrator =
                ValidityMigrator::new(factory, &self.audit, decl.clone(), &self.settings).await?;
            migrators.push(Box::new(migrator));
        }
        for decl in &self.middle_entities {
            let migrator =
                ValidityMigrator::new(factory, &self.audit, decl.clone(), &self.settings).await?;
            migrators.push(Box::new(migrator));
        }

        let mut reports = Vec::with_capacity(migrators.len());
        for migrator in migrators {
            let entity = migrator.entity().to_string();
            let report = migrator.migrate().await?;
            info!(
                entity = %entity,
                rows_converted = report.rows_converted,
                batches = report.batches_committed,
                "Entity migrated"
            );
            reports.push(report);
        }
        Ok(reports)
    }
}
