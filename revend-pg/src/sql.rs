//! SQL rendering of the typed queries.
//!
//! Identifiers are rendered unquoted, so PostgreSQL folds them to lower
//! case the same way it did when the audit tables were created. They are
//! validated identifiers, never row data; row values are always bound as
//! parameters.

use revend_core::{
    AuditEntitiesConfig, AuditRow, AuditValue, ConfigError, CountQuery, Ident, KeyProjection,
    MainQuery, PeekQuery, ResetEndColumns, RevendResult,
};
use std::fmt::Write as _;

/// Tables of the current schema owning a column named like the revision
/// field.
pub const ENTITY_NAMES: &str = "SELECT DISTINCT c.table_name::text \
     FROM information_schema.columns c \
     WHERE c.table_schema = current_schema() \
     AND lower(c.column_name::text) = lower($1) \
     ORDER BY 1";

/// Primary-key columns of a table.
pub const PRIMARY_KEY_COLUMNS: &str = "SELECT a.attname::text \
     FROM pg_index i \
     JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
     WHERE i.indrelid = $1::text::regclass AND i.indisprimary";

/// The revision-info table the revision timestamp is joined from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionInfo {
    pub table: Ident,
    pub id: Ident,
    pub timestamp: Ident,
}

impl RevisionInfo {
    pub fn from_config(cfg: &AuditEntitiesConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            table: Ident::path(&cfg.revision_info_table)?,
            id: Ident::new(&cfg.revision_info_id_column)?,
            timestamp: Ident::new(&cfg.revision_info_timestamp_column)?,
        })
    }
}

pub fn peek(query: &PeekQuery) -> String {
    format!("SELECT * FROM {} LIMIT 1", query.entity)
}

pub fn count(query: &CountQuery) -> String {
    let mut sql = format!("SELECT count(*) FROM {} aud", query.entity);
    push_sibling_filter(&mut sql, &query.entity, &query.key, &query.revision.field);
    sql
}

pub fn main(query: &MainQuery, revinfo: &RevisionInfo) -> String {
    let rev = &query.revision.field;
    let mut sql = String::from("SELECT ");
    for key in &query.key {
        let _ = write!(sql, "aud.{} AS {}, ", key.column, key.alias);
    }
    let _ = write!(sql, "aud.{rev} AS rev, aud.{rev} AS revId");
    if query.with_timestamp {
        let _ = write!(sql, ", ri.{} AS revTstamp", revinfo.timestamp);
    }
    let _ = write!(sql, " FROM {} aud", query.entity);
    if query.with_timestamp {
        let _ = write!(
            sql,
            " LEFT JOIN {} ri ON ri.{} = aud.{}",
            revinfo.table, revinfo.id, rev
        );
    }
    push_sibling_filter(&mut sql, &query.entity, &query.key, rev);
    sql.push_str(" ORDER BY ");
    for key in &query.key {
        let _ = write!(sql, "{} ASC, ", key.alias);
    }
    sql.push_str("revId DESC");
    sql
}

pub fn reset(update: &ResetEndColumns) -> String {
    let mut sql = format!("UPDATE {} SET {} = NULL", update.entity, update.end_field);
    if let Some(tstamp) = &update.end_timestamp_field {
        let _ = write!(sql, ", {} = NULL", tstamp);
    }
    sql
}

/// Write-back of one staged row: the changed columns, located by key and
/// revision. Parameters come back as (column, value) in placeholder order.
/// `None` when nothing changed.
pub fn update_row(row: &AuditRow) -> RevendResult<Option<(String, Vec<(&str, &AuditValue)>)>> {
    if !row.is_dirty() {
        return Ok(None);
    }
    let entity = Ident::path(row.entity())?;
    let mut sql = format!("UPDATE {} SET ", entity);
    let mut params = Vec::new();

    for (position, (column, value)) in row.written().enumerate() {
        if position > 0 {
            sql.push_str(", ");
        }
        params.push((column, value));
        let _ = write!(sql, "{} = ${}", Ident::new(column)?, params.len());
    }

    sql.push_str(" WHERE ");
    for (position, (column, value)) in row.locator().iter().enumerate() {
        if position > 0 {
            sql.push_str(" AND ");
        }
        params.push((column.as_str(), value));
        let _ = write!(sql, "{} = ${}", Ident::new(column)?, params.len());
    }

    Ok(Some((sql, params)))
}

/// Cursors are held so they survive the per-batch commits.
pub fn declare_cursor(name: &str, query: &str) -> String {
    format!("DECLARE {} NO SCROLL CURSOR WITH HOLD FOR {}", name, query)
}

pub fn fetch(name: &str, rows: usize) -> String {
    format!("FETCH FORWARD {} FROM {}", rows, name)
}

pub fn close_cursor(name: &str) -> String {
    format!("CLOSE {}", name)
}

/// Drops every cursor of the connection, held ones included.
pub const CLOSE_ALL_CURSORS: &str = "CLOSE ALL";

fn push_sibling_filter(sql: &mut String, entity: &Ident, key: &[KeyProjection], rev: &Ident) {
    let _ = write!(sql, " WHERE EXISTS (SELECT 1 FROM {} aud2 WHERE ", entity);
    for k in key {
        let _ = write!(sql, "aud2.{col} = aud.{col} AND ", col = k.column);
    }
    let _ = write!(sql, "aud2.{rev} <> aud.{rev})");
}
