//! Key-set discovery and validation.

use revend_core::{
    AuditEntitiesConfig, CountQuery, EntityDeclaration, KeySet, PeekQuery, QueryBuilder,
    RevendResult, RowCount,
};
use revend_storage::{AuditSession, SessionFactory};
use tracing::{debug, info, warn};

/// Sample one row of the entity, count the rows needing an end revision and
/// check the declared key columns.
///
/// Runs in a read-only transaction that is rolled back. Fails with a
/// configuration error, before anything is written, when a declared key
/// column is not part of the entity's original id.
pub async fn initialize<F, D>(
    factory: &F,
    cfg: &AuditEntitiesConfig,
    decl: &D,
) -> RevendResult<(KeySet, RowCount)>
where
    F: SessionFactory,
    D: EntityDeclaration,
{
    info!("Initializing ValidityAuditStrategy migration for: {}", decl);

    let builder = QueryBuilder::new(cfg);
    let peek = builder.peek(decl)?;
    let count = builder.count(decl)?;

    let mut session = factory.open_session().await?;
    let sampled = sample(&mut session, cfg, &peek, &count).await;
    if let Err(e) = session.close().await {
        warn!(entity = decl.name(), error = %e, "Failed to close session");
    }
    let (keyset, row_count) = sampled?;

    debug!(
        entity = decl.name(),
        audit_row = ?keyset.audit_row_columns(),
        original_id = ?keyset.original_id_columns(),
        "Discovered key sets"
    );

    keyset.validate(decl)?;
    Ok((keyset, row_count))
}

async fn sample<S: AuditSession>(
    session: &mut S,
    cfg: &AuditEntitiesConfig,
    peek: &PeekQuery,
    count: &CountQuery,
) -> RevendResult<(KeySet, RowCount)> {
    session.begin().await?;

    info!(query = %peek, "Executing query");
    let keyset = match session.peek(peek).await? {
        Some(row) => KeySet::from_sample(row.audit_row_columns, row.original_id_columns, cfg),
        None => KeySet::empty(),
    };

    info!(query = %count, "Executing query");
    let row_count = RowCount(session.count(count).await?);

    session.rollback().await?;
    Ok((keyset, row_count))
}
