//! In-memory audit store.
//!
//! Evaluates the typed queries over in-process tables with the same
//! semantics a relational backend gives them: the sibling filter, key
//! ascending / revision descending order, transactional write-back. Writes
//! become visible to other sessions only on commit.
//!
//! The store also records what happened (commits, rows written per entity)
//! and can inject a cursor failure, which is what the engine tests assert on.

use crate::{AuditSession, RowCursor, SessionFactory};
use async_trait::async_trait;
use revend_core::{
    AuditEntitiesConfig, AuditRow, AuditValue, CountQuery, DataAccessError, KeyProjection,
    MainQuery, PeekQuery, PeekedRow, ResetEndColumns, RevendResult, ScrollRow,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

// ============================================================================
// STORE
// ============================================================================

/// One stored audit row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    /// Key columns plus the revision field.
    pub original_id: BTreeMap<String, AuditValue>,
    /// Every other column, end columns included.
    pub fields: BTreeMap<String, AuditValue>,
}

#[derive(Debug, Default)]
struct StoreState {
    tables: BTreeMap<String, Vec<StoredRow>>,
    /// Revision number -> revision timestamp as stored (millis or typed).
    revisions: BTreeMap<i64, AuditValue>,
    commits: u64,
    rows_written: HashMap<String, u64>,
    fetches: u64,
    fail_fetch_at: Option<u64>,
}

/// In-memory audit store for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditStore {
    cfg: Arc<AuditEntitiesConfig>,
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryAuditStore {
    pub fn new(cfg: AuditEntitiesConfig) -> Self {
        Self {
            cfg: Arc::new(cfg),
            state: Arc::default(),
        }
    }

    pub fn config(&self) -> &AuditEntitiesConfig {
        &self.cfg
    }

    fn read(&self) -> RevendResult<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| DataAccessError::LockPoisoned.into())
    }

    fn write(&self) -> RevendResult<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| DataAccessError::LockPoisoned.into())
    }

    /// Register an entity with no rows.
    pub fn create_entity(&self, entity: &str) -> RevendResult<()> {
        self.write()?.tables.entry(entity.to_string()).or_default();
        Ok(())
    }

    /// Register a revision and its timestamp (epoch millis or typed).
    pub fn insert_revision(&self, revision: i64, timestamp: AuditValue) -> RevendResult<()> {
        self.write()?.revisions.insert(revision, timestamp);
        Ok(())
    }

    pub fn insert_stored_row(&self, entity: &str, row: StoredRow) -> RevendResult<()> {
        self.write()?
            .tables
            .entry(entity.to_string())
            .or_default()
            .push(row);
        Ok(())
    }

    /// Insert a legacy audit row: the key columns and revision form the
    /// original id, the end columns start out null.
    pub fn insert_row(
        &self,
        entity: &str,
        key: &[(&str, AuditValue)],
        revision: i64,
    ) -> RevendResult<()> {
        let mut original_id: BTreeMap<String, AuditValue> = key
            .iter()
            .map(|(col, val)| (col.to_string(), val.clone()))
            .collect();
        original_id.insert(
            self.cfg.revision_field_name.clone(),
            AuditValue::Integer(revision),
        );

        let mut fields = BTreeMap::new();
        fields.insert("REVTYPE".to_string(), AuditValue::Integer(1));
        fields.insert(self.cfg.revision_end_field_name.clone(), AuditValue::Null);
        if self.cfg.revision_end_timestamp_enabled {
            fields.insert(
                self.cfg.revision_end_timestamp_field_name.clone(),
                AuditValue::Null,
            );
        }

        self.insert_stored_row(entity, StoredRow { original_id, fields })
    }

    /// Overwrite one field of every row of an entity.
    pub fn set_field_everywhere(
        &self,
        entity: &str,
        field: &str,
        value: AuditValue,
    ) -> RevendResult<()> {
        let mut state = self.write()?;
        let rows = table_mut(&mut state, entity)?;
        for row in rows.iter_mut() {
            row.fields.insert(field.to_string(), value.clone());
        }
        Ok(())
    }

    /// Snapshot of every committed row of an entity, in insertion order.
    pub fn rows(&self, entity: &str) -> RevendResult<Vec<StoredRow>> {
        let state = self.read()?;
        Ok(table(&state, entity)?.clone())
    }

    /// Committed value of `field` on the row with the given key and revision.
    pub fn field_of(
        &self,
        entity: &str,
        key: &[(&str, AuditValue)],
        revision: i64,
        field: &str,
    ) -> RevendResult<Option<AuditValue>> {
        let state = self.read()?;
        let rev_field = &self.cfg.revision_field_name;
        let found = table(&state, entity)?.iter().find(|row| {
            row.original_id.get(rev_field) == Some(&AuditValue::Integer(revision))
                && key
                    .iter()
                    .all(|(col, val)| row.original_id.get(*col) == Some(val))
        });
        Ok(found.and_then(|row| row.fields.get(field).cloned()))
    }

    /// Committed end revision of one row.
    pub fn end_revision(
        &self,
        entity: &str,
        key: &[(&str, AuditValue)],
        revision: i64,
    ) -> RevendResult<Option<AuditValue>> {
        self.field_of(entity, key, revision, &self.cfg.revision_end_field_name)
    }

    /// Number of committed transactions.
    pub fn commit_count(&self) -> RevendResult<u64> {
        Ok(self.read()?.commits)
    }

    /// Number of committed row writes for an entity (bulk updates excluded).
    pub fn rows_written(&self, entity: &str) -> RevendResult<u64> {
        Ok(self.read()?.rows_written.get(entity).copied().unwrap_or(0))
    }

    /// Make the `n`-th cursor fetch (1-based, counted store-wide) fail.
    pub fn fail_fetch_at(&self, n: u64) -> RevendResult<()> {
        let mut state = self.write()?;
        state.fetches = 0;
        state.fail_fetch_at = Some(n);
        Ok(())
    }

    /// Apply one transaction's writes. Every row write is resolved against
    /// the stored rows before anything changes, so a failing write leaves
    /// the store untouched.
    fn apply(&self, writes: Vec<PendingWrite>) -> RevendResult<()> {
        let mut state = self.write()?;
        let targets = writes
            .iter()
            .map(|write| self.resolve(&state, write))
            .collect::<RevendResult<Vec<Option<usize>>>>()?;

        for (write, target) in writes.into_iter().zip(targets) {
            match (write, target) {
                (PendingWrite::Row(row), Some(index)) => {
                    let entity = row.entity().to_string();
                    if let Some(stored) = table_mut(&mut state, &entity)?.get_mut(index) {
                        for (name, value) in row.written() {
                            stored.fields.insert(name.to_string(), value.clone());
                        }
                    }
                    *state.rows_written.entry(entity).or_insert(0) += 1;
                }
                (PendingWrite::Reset(update), _) => {
                    let rows = table_mut(&mut state, update.entity.as_str())?;
                    for row in rows.iter_mut() {
                        row.fields
                            .insert(update.end_field.to_string(), AuditValue::Null);
                        if let Some(tstamp) = &update.end_timestamp_field {
                            row.fields.insert(tstamp.to_string(), AuditValue::Null);
                        }
                    }
                }
                (PendingWrite::Row(_), None) => {}
            }
        }
        state.commits += 1;
        Ok(())
    }

    /// Index of the stored row a row write targets; `None` for bulk updates.
    fn resolve(&self, state: &StoreState, write: &PendingWrite) -> RevendResult<Option<usize>> {
        match write {
            PendingWrite::Row(row) => {
                let rows = table(state, row.entity())?;
                let index = rows
                    .iter()
                    .position(|stored| {
                        row.locator()
                            .iter()
                            .all(|(col, val)| stored.original_id.get(col) == Some(val))
                    })
                    .ok_or_else(|| DataAccessError::UpdateFailed {
                        entity: row.entity().to_string(),
                        reason: format!(
                            "no row matches {:?} (revision field {})",
                            row.locator(),
                            self.cfg.revision_field_name
                        ),
                    })?;
                Ok(Some(index))
            }
            PendingWrite::Reset(update) => {
                table(state, update.entity.as_str())?;
                Ok(None)
            }
        }
    }
}

fn table<'s>(state: &'s StoreState, entity: &str) -> RevendResult<&'s Vec<StoredRow>> {
    state.tables.get(entity).ok_or_else(|| {
        DataAccessError::UnknownTable {
            entity: entity.to_string(),
        }
        .into()
    })
}

fn table_mut<'s>(state: &'s mut StoreState, entity: &str) -> RevendResult<&'s mut Vec<StoredRow>> {
    state.tables.get_mut(entity).ok_or_else(|| {
        DataAccessError::UnknownTable {
            entity: entity.to_string(),
        }
        .into()
    })
}

#[async_trait]
impl SessionFactory for InMemoryAuditStore {
    type Session = InMemorySession;

    async fn open_session(&self) -> RevendResult<InMemorySession> {
        Ok(InMemorySession {
            store: self.clone(),
            in_tx: false,
            staged: Vec::new(),
            pending: Vec::new(),
        })
    }

    async fn entity_names(&self) -> RevendResult<Vec<String>> {
        Ok(self.read()?.tables.keys().cloned().collect())
    }
}

// ============================================================================
// QUERY EVALUATION
// ============================================================================

/// Key values of a row, in projection order.
fn key_of(row: &StoredRow, key: &[KeyProjection], query: &str) -> RevendResult<Vec<AuditValue>> {
    key.iter()
        .map(|k| {
            row.original_id.get(k.column.as_str()).cloned().ok_or_else(|| {
                DataAccessError::QueryFailed {
                    query: query.to_string(),
                    reason: format!("could not resolve property {}", k.column),
                }
                .into()
            })
        })
        .collect()
}

fn revision_of(row: &StoredRow, rev_field: &str) -> RevendResult<i64> {
    match row.original_id.get(rev_field) {
        Some(AuditValue::Integer(rev)) => Ok(*rev),
        Some(other) => Err(DataAccessError::TypeMismatch {
            column: rev_field.to_string(),
            expected: "integer".to_string(),
            found: other.type_name().to_string(),
        }
        .into()),
        None => Err(DataAccessError::TypeMismatch {
            column: rev_field.to_string(),
            expected: "integer".to_string(),
            found: "missing".to_string(),
        }
        .into()),
    }
}

/// Rows having a same-key sibling with another revision, with their key and
/// revision. A null key column never compares equal, so such rows have no
/// siblings.
fn rows_with_siblings<'r>(
    rows: &'r [StoredRow],
    key: &[KeyProjection],
    rev_field: &str,
    query: &str,
) -> RevendResult<Vec<(Vec<AuditValue>, i64, &'r StoredRow)>> {
    let mut keyed = Vec::with_capacity(rows.len());
    let mut revisions: HashMap<Vec<AuditValue>, BTreeSet<i64>> = HashMap::new();
    for row in rows {
        let k = key_of(row, key, query)?;
        if k.iter().any(AuditValue::is_null) {
            continue;
        }
        let rev = revision_of(row, rev_field)?;
        revisions.entry(k.clone()).or_default().insert(rev);
        keyed.push((k, rev, row));
    }
    Ok(keyed
        .into_iter()
        .filter(|(k, _, _)| revisions.get(k).map_or(false, |revs| revs.len() > 1))
        .collect())
}

// ============================================================================
// SESSION
// ============================================================================

#[derive(Debug, Clone)]
enum PendingWrite {
    Row(AuditRow),
    Reset(ResetEndColumns),
}

/// Session over an [`InMemoryAuditStore`].
#[derive(Debug)]
pub struct InMemorySession {
    store: InMemoryAuditStore,
    in_tx: bool,
    staged: Vec<AuditRow>,
    pending: Vec<PendingWrite>,
}

impl InMemorySession {
    fn require_tx(&self, op: &str) -> RevendResult<()> {
        if self.in_tx {
            Ok(())
        } else {
            Err(DataAccessError::TransactionFailed {
                reason: format!("{} outside of a transaction", op),
            }
            .into())
        }
    }
}

#[async_trait]
impl AuditSession for InMemorySession {
    type Cursor = InMemoryCursor;

    async fn begin(&mut self) -> RevendResult<()> {
        if self.in_tx {
            return Err(DataAccessError::TransactionFailed {
                reason: "transaction already active".to_string(),
            }
            .into());
        }
        self.in_tx = true;
        Ok(())
    }

    async fn commit(&mut self) -> RevendResult<()> {
        self.require_tx("commit")?;
        self.flush().await?;
        let writes = std::mem::take(&mut self.pending);
        self.in_tx = false;
        self.store.apply(writes)
    }

    async fn rollback(&mut self) -> RevendResult<()> {
        self.require_tx("rollback")?;
        self.staged.clear();
        self.pending.clear();
        self.in_tx = false;
        Ok(())
    }

    async fn peek(&mut self, query: &PeekQuery) -> RevendResult<Option<PeekedRow>> {
        let state = self.store.read()?;
        let rows = table(&state, query.entity.as_str())?;
        Ok(rows.first().map(|row| {
            let mut audit_row_columns: BTreeSet<String> = row.fields.keys().cloned().collect();
            audit_row_columns.insert(query.original_id.to_string());
            PeekedRow {
                audit_row_columns,
                original_id_columns: row.original_id.keys().cloned().collect(),
            }
        }))
    }

    async fn count(&mut self, query: &CountQuery) -> RevendResult<u64> {
        let state = self.store.read()?;
        let rows = table(&state, query.entity.as_str())?;
        let text = query.to_string();
        let matching = rows_with_siblings(rows, &query.key, query.revision.field.as_str(), &text)?;
        Ok(matching.len() as u64)
    }

    async fn scroll(&mut self, query: &MainQuery) -> RevendResult<InMemoryCursor> {
        let state = self.store.read()?;
        let rows = table(&state, query.entity.as_str())?;
        let rev_field = query.revision.field.as_str();
        let text = query.to_string();

        let mut matching = rows_with_siblings(rows, &query.key, rev_field, &text)?;
        matching.sort_by(|(ka, ra, _), (kb, rb, _)| ka.cmp(kb).then(rb.cmp(ra)));

        let mut result = VecDeque::with_capacity(matching.len());
        for (key, rev, stored) in matching {
            let mut locator: Vec<(String, AuditValue)> = query
                .key
                .iter()
                .zip(key.iter())
                .map(|(k, v)| (k.column.to_string(), v.clone()))
                .collect();
            locator.push((rev_field.to_string(), AuditValue::Integer(rev)));

            let mut audit_row = AuditRow::new(query.entity.as_str(), locator);
            for (name, value) in &stored.fields {
                audit_row = audit_row.with_field(name.clone(), value.clone());
            }

            let mut columns = key;
            columns.push(AuditValue::Integer(rev));
            columns.push(AuditValue::Integer(rev));
            if query.with_timestamp {
                columns.push(state.revisions.get(&rev).cloned().unwrap_or(AuditValue::Null));
            }
            result.push_back(ScrollRow::new(audit_row, columns));
        }

        Ok(InMemoryCursor {
            store: self.store.clone(),
            rows: result,
            closed: false,
        })
    }

    async fn execute_update(&mut self, update: &ResetEndColumns) -> RevendResult<u64> {
        self.require_tx("bulk update")?;
        let affected = {
            let state = self.store.read()?;
            table(&state, update.entity.as_str())?.len() as u64
        };
        self.pending.push(PendingWrite::Reset(update.clone()));
        Ok(affected)
    }

    fn stage(&mut self, row: AuditRow) {
        self.staged.push(row);
    }

    async fn flush(&mut self) -> RevendResult<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        self.require_tx("flush")?;
        self.pending
            .extend(self.staged.drain(..).map(PendingWrite::Row));
        Ok(())
    }

    fn clear(&mut self) {
        self.staged.clear();
    }

    async fn close(&mut self) -> RevendResult<()> {
        if self.in_tx {
            self.rollback().await?;
        }
        Ok(())
    }
}

// ============================================================================
// CURSOR
// ============================================================================

/// Cursor over a snapshot of the main query taken when it was opened.
#[derive(Debug)]
pub struct InMemoryCursor {
    store: InMemoryAuditStore,
    rows: VecDeque<ScrollRow>,
    closed: bool,
}

#[async_trait]
impl RowCursor for InMemoryCursor {
    async fn next_row(&mut self) -> RevendResult<Option<ScrollRow>> {
        if self.closed {
            return Err(DataAccessError::CursorFailed {
                reason: "cursor is closed".to_string(),
            }
            .into());
        }
        {
            let mut state = self.store.write()?;
            state.fetches += 1;
            if state.fail_fetch_at == Some(state.fetches) {
                return Err(DataAccessError::CursorFailed {
                    reason: format!("injected failure on fetch {}", state.fetches),
                }
                .into());
            }
        }
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> RevendResult<()> {
        self.closed = true;
        self.rows.clear();
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
