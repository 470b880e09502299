//! End-column reset pre-pass.

use revend_core::{AuditEntitiesConfig, EntityDeclaration, QueryBuilder, ResetEndColumns, RevendResult};
use revend_storage::{AuditSession, SessionFactory};
use tracing::{info, warn};

/// Set the end revision (and end timestamp, when tracked) of every row of
/// the entity to null, in one committed transaction.
///
/// Running it twice leaves the table as running it once; it is how a
/// conversion is restarted from scratch.
pub async fn reset_end_columns<F, D>(
    factory: &F,
    cfg: &AuditEntitiesConfig,
    decl: &D,
) -> RevendResult<u64>
where
    F: SessionFactory,
    D: EntityDeclaration,
{
    info!("Set revend columns to null for {}", decl);

    let update = QueryBuilder::new(cfg).reset_end_columns(decl)?;
    info!(query = %update, "Executing query");

    let mut session = factory.open_session().await?;
    let result = run(&mut session, &update).await;
    if let Err(e) = session.close().await {
        warn!(entity = decl.name(), error = %e, "Failed to close session");
    }
    let updated = result?;

    info!(entity = decl.name(), updated, "Updated entities = {}", updated);
    Ok(updated)
}

async fn run<S: AuditSession>(session: &mut S, update: &ResetEndColumns) -> RevendResult<u64> {
    session.begin().await?;
    let updated = session.execute_update(update).await?;
    session.commit().await?;
    Ok(updated)
}
