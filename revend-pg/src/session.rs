//! Sessions and cursors over a pooled PostgreSQL connection.

use crate::config::DbConfig;
use crate::param::{decode, PgParam};
use crate::sql::{self, RevisionInfo};
use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use revend_core::{
    AuditEntitiesConfig, AuditRow, AuditValue, CountQuery, DataAccessError, MainQuery, PeekQuery,
    PeekedRow, ResetEndColumns, RevendError, RevendResult, ScrollRow,
};
use revend_storage::{AuditSession, RowCursor, SessionFactory};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::{debug, trace};

fn query_failed(sql: &str, e: tokio_postgres::Error) -> RevendError {
    DataAccessError::QueryFailed {
        query: sql.to_string(),
        reason: e.to_string(),
    }
    .into()
}

fn transaction_failed(e: tokio_postgres::Error) -> RevendError {
    DataAccessError::TransactionFailed {
        reason: e.to_string(),
    }
    .into()
}

// ============================================================================
// SESSION FACTORY
// ============================================================================

/// Opens sessions on a `deadpool-postgres` pool.
#[derive(Clone)]
pub struct PgSessionFactory {
    pool: Pool,
    cfg: Arc<AuditEntitiesConfig>,
    revinfo: Arc<RevisionInfo>,
    fetch_size: usize,
}

impl PgSessionFactory {
    pub fn new(pool: Pool, cfg: AuditEntitiesConfig, fetch_size: usize) -> RevendResult<Self> {
        let revinfo = RevisionInfo::from_config(&cfg)?;
        Ok(Self {
            pool,
            cfg: Arc::new(cfg),
            revinfo: Arc::new(revinfo),
            fetch_size: fetch_size.max(1),
        })
    }

    /// Create the pool and the factory from configuration.
    pub fn from_config(db: &DbConfig, cfg: AuditEntitiesConfig) -> RevendResult<Self> {
        Self::new(db.create_pool()?, cfg, db.fetch_size)
    }

    async fn get_conn(&self) -> RevendResult<Object> {
        self.pool.get().await.map_err(|e| {
            DataAccessError::ConnectionFailed {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl SessionFactory for PgSessionFactory {
    type Session = PgSession;

    async fn open_session(&self) -> RevendResult<PgSession> {
        let conn = self.get_conn().await?;
        Ok(PgSession {
            conn: Arc::new(conn),
            cfg: Arc::clone(&self.cfg),
            revinfo: Arc::clone(&self.revinfo),
            fetch_size: self.fetch_size,
            in_tx: false,
            staged: Vec::new(),
            next_cursor: 0,
        })
    }

    async fn entity_names(&self) -> RevendResult<Vec<String>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(sql::ENTITY_NAMES, &[&self.cfg.revision_field_name])
            .await
            .map_err(|e| query_failed(sql::ENTITY_NAMES, e))?;
        rows.iter()
            .map(|row| {
                row.try_get::<_, String>(0)
                    .map_err(|e| query_failed(sql::ENTITY_NAMES, e))
            })
            .collect()
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// One pooled connection. Transactions are driven with plain `BEGIN` /
/// `COMMIT` so held cursors opened on the same connection keep working
/// across them.
pub struct PgSession {
    conn: Arc<Object>,
    cfg: Arc<AuditEntitiesConfig>,
    revinfo: Arc<RevisionInfo>,
    fetch_size: usize,
    in_tx: bool,
    staged: Vec<AuditRow>,
    next_cursor: u64,
}

impl PgSession {
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

    async fn write_row(&self, row: &AuditRow) -> RevendResult<()> {
        let Some((sql, values)) = sql::update_row(row)? else {
            return Ok(());
        };
        let stmt = self
            .conn
            .prepare_cached(&sql)
            .await
            .map_err(|e| query_failed(&sql, e))?;

        let params = stmt
            .params()
            .iter()
            .zip(values.iter())
            .map(|(ty, (column, value))| PgParam::bind(value, ty, column))
            .collect::<RevendResult<Vec<_>>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(PgParam::as_to_sql).collect();

        trace!(query = %sql, "Writing row");
        let updated = self
            .conn
            .execute(&stmt, &refs)
            .await
            .map_err(|e| query_failed(&sql, e))?;
        if updated == 0 {
            return Err(DataAccessError::UpdateFailed {
                entity: row.entity().to_string(),
                reason: format!("no row matches {:?}", row.locator()),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSession for PgSession {
    type Cursor = PgCursor;

    async fn begin(&mut self) -> RevendResult<()> {
        if self.in_tx {
            return Err(DataAccessError::TransactionFailed {
                reason: "transaction already active".to_string(),
            }
            .into());
        }
        self.conn
            .batch_execute("BEGIN")
            .await
            .map_err(transaction_failed)?;
        self.in_tx = true;
        Ok(())
    }

    async fn commit(&mut self) -> RevendResult<()> {
        self.require_tx("commit")?;
        self.flush().await?;
        self.conn
            .batch_execute("COMMIT")
            .await
            .map_err(transaction_failed)?;
        self.in_tx = false;
        Ok(())
    }

    async fn rollback(&mut self) -> RevendResult<()> {
        self.require_tx("rollback")?;
        self.staged.clear();
        self.conn
            .batch_execute("ROLLBACK")
            .await
            .map_err(transaction_failed)?;
        self.in_tx = false;
        Ok(())
    }

    async fn peek(&mut self, query: &PeekQuery) -> RevendResult<Option<PeekedRow>> {
        let peek = sql::peek(query);
        let sample = self
            .conn
            .query_opt(peek.as_str(), &[])
            .await
            .map_err(|e| query_failed(&peek, e))?;
        let Some(sample) = sample else {
            return Ok(None);
        };

        let audit_row_columns: BTreeSet<String> = sample
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let entity = query.entity.to_string();
        let keys = self
            .conn
            .query(sql::PRIMARY_KEY_COLUMNS, &[&entity])
            .await
            .map_err(|e| query_failed(sql::PRIMARY_KEY_COLUMNS, e))?;
        // The catalog reports folded names; report the revision column
        // under its configured name so it is recognised as such.
        let rev_field = &self.cfg.revision_field_name;
        let original_id_columns = keys
            .iter()
            .map(|row| {
                row.try_get::<_, String>(0)
                    .map(|name| {
                        if name.eq_ignore_ascii_case(rev_field) {
                            rev_field.clone()
                        } else {
                            name
                        }
                    })
                    .map_err(|e| query_failed(sql::PRIMARY_KEY_COLUMNS, e))
            })
            .collect::<RevendResult<BTreeSet<String>>>()?;

        Ok(Some(PeekedRow {
            audit_row_columns,
            original_id_columns,
        }))
    }

    async fn count(&mut self, query: &CountQuery) -> RevendResult<u64> {
        let count = sql::count(query);
        let row = self
            .conn
            .query_one(count.as_str(), &[])
            .await
            .map_err(|e| query_failed(&count, e))?;
        let n: i64 = row.try_get(0).map_err(|e| query_failed(&count, e))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    async fn scroll(&mut self, query: &MainQuery) -> RevendResult<PgCursor> {
        let name = format!("revend_cursor_{}", self.next_cursor);
        self.next_cursor += 1;

        let declare = sql::declare_cursor(&name, &sql::main(query, &self.revinfo));
        debug!(cursor = %name, query = %declare, "Opening cursor");
        self.conn
            .batch_execute(&declare)
            .await
            .map_err(|e| query_failed(&declare, e))?;

        let mut locator_columns: Vec<String> =
            query.key.iter().map(|k| k.column.to_string()).collect();
        locator_columns.push(query.revision.field.to_string());

        Ok(PgCursor {
            conn: Arc::clone(&self.conn),
            name,
            entity: query.entity.to_string(),
            locator_columns,
            width: query.width(),
            fetch_size: self.fetch_size,
            buffer: VecDeque::new(),
            exhausted: false,
            closed: false,
        })
    }

    async fn execute_update(&mut self, update: &ResetEndColumns) -> RevendResult<u64> {
        self.require_tx("bulk update")?;
        let reset = sql::reset(update);
        self.conn
            .execute(reset.as_str(), &[])
            .await
            .map_err(|e| query_failed(&reset, e))
    }

    fn stage(&mut self, row: AuditRow) {
        self.staged.push(row);
    }

    async fn flush(&mut self) -> RevendResult<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        self.require_tx("flush")?;
        let staged = std::mem::take(&mut self.staged);
        debug!(rows = staged.len(), "Flushing staged rows");
        for row in &staged {
            self.write_row(row).await?;
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.staged.clear();
    }

    /// Rolls back an open transaction, then drops held cursors so the
    /// connection goes back to the pool without them. A cursor whose
    /// `CLOSE` failed inside an aborted transaction is released here.
    async fn close(&mut self) -> RevendResult<()> {
        if self.in_tx {
            self.rollback().await?;
        }
        if self.next_cursor > 0 {
            self.conn
                .batch_execute(sql::CLOSE_ALL_CURSORS)
                .await
                .map_err(|e| query_failed(sql::CLOSE_ALL_CURSORS, e))?;
        }
        Ok(())
    }
}

// ============================================================================
// CURSOR
// ============================================================================

/// Server-side cursor read in chunks of `fetch_size` rows.
pub struct PgCursor {
    conn: Arc<Object>,
    name: String,
    entity: String,
    /// Key columns followed by the revision column.
    locator_columns: Vec<String>,
    width: usize,
    fetch_size: usize,
    buffer: VecDeque<Row>,
    exhausted: bool,
    closed: bool,
}

impl PgCursor {
    async fn fill(&mut self) -> RevendResult<()> {
        let fetch = sql::fetch(&self.name, self.fetch_size);
        let rows = self
            .conn
            .query(fetch.as_str(), &[])
            .await
            .map_err(|e| DataAccessError::CursorFailed {
                reason: format!("{}: {}", fetch, e),
            })?;
        self.exhausted = rows.len() < self.fetch_size;
        self.buffer.extend(rows);
        Ok(())
    }

    fn to_scroll_row(&self, row: &Row) -> RevendResult<ScrollRow> {
        let columns = (0..self.width)
            .map(|index| decode(row, index))
            .collect::<RevendResult<Vec<AuditValue>>>()?;
        if columns.len() < self.locator_columns.len() {
            return Err(DataAccessError::CursorFailed {
                reason: format!("{} returned {} columns", self.name, columns.len()),
            }
            .into());
        }
        let locator = self
            .locator_columns
            .iter()
            .cloned()
            .zip(columns.iter().cloned())
            .collect();
        Ok(ScrollRow::new(AuditRow::new(self.entity.as_str(), locator), columns))
    }
}

#[async_trait]
impl RowCursor for PgCursor {
    async fn next_row(&mut self) -> RevendResult<Option<ScrollRow>> {
        if self.closed {
            return Err(DataAccessError::CursorFailed {
                reason: "cursor is closed".to_string(),
            }
            .into());
        }
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        match self.buffer.pop_front() {
            Some(row) => self.to_scroll_row(&row).map(Some),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> RevendResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.buffer.clear();
        let close = sql::close_cursor(&self.name);
        self.conn
            .batch_execute(&close)
            .await
            .map_err(|e| query_failed(&close, e))
    }
}
