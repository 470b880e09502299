//! REVEND CLI - Runs a validity migration from a TOML configuration file.

pub mod config;
pub mod error;
pub mod telemetry;

pub use config::{ConfigError, LogFormat, LoggingConfig, RevendConfig};
pub use error::CliError;

use revend_engine::{MigrationReport, MigrationTask};
use revend_pg::PgSessionFactory;
use std::fmt::Write as _;

/// Build the task described by the configuration.
pub fn build_task(config: &RevendConfig) -> MigrationTask {
    let mut task = MigrationTask::new(config.migration.clone(), config.audit.clone());
    for decl in &config.audit_entities {
        task.add_audit_entity(decl.clone());
    }
    for decl in &config.middle_entities {
        task.add_middle_entity(decl.clone());
    }
    task
}

/// Connect to the configured database and migrate every declared entity.
pub async fn run(config: &RevendConfig) -> Result<Vec<MigrationReport>, CliError> {
    let db = config.database();
    tracing::info!(host = %db.host, dbname = %db.dbname, "Connecting");
    let factory = PgSessionFactory::from_config(&db, config.audit.clone())?;
    let reports = build_task(config).execute(&factory).await?;
    Ok(reports)
}

/// One line per migrated entity.
pub fn summary(reports: &[MigrationReport]) -> String {
    if reports.is_empty() {
        return "No audit entities declared; nothing migrated.\n".to_string();
    }
    let mut out = String::new();
    for report in reports {
        let _ = write!(
            out,
            "{}: {} of {} rows converted in {} batches",
            report.entity, report.rows_converted, report.row_count, report.batches_committed
        );
        if let Some(reset) = report.rows_reset {
            let _ = write!(out, ", {} rows reset", reset);
        }
        out.push('\n');
    }
    out
}
