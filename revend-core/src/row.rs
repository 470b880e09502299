//! Rows as they travel between a backend and the migrator

use crate::{AuditValue, DataAccessError, RevendResult};
use std::collections::{BTreeMap, BTreeSet};

/// One audit row, addressable for write-back.
///
/// The locator holds the key columns plus the revision column, which is the
/// primary key of every audit table. `fields` holds the values a backend
/// loaded and any values the migrator wrote; backends persist the fields that
/// were written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRow {
    entity: String,
    locator: Vec<(String, AuditValue)>,
    fields: BTreeMap<String, AuditValue>,
    dirty: BTreeSet<String>,
}

impl AuditRow {
    pub fn new(entity: impl Into<String>, locator: Vec<(String, AuditValue)>) -> Self {
        Self {
            entity: entity.into(),
            locator,
            fields: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Attach a loaded field value without marking it written.
    pub fn with_field(mut self, name: impl Into<String>, value: AuditValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn locator(&self) -> &[(String, AuditValue)] {
        &self.locator
    }

    pub fn get(&self, field: &str) -> Option<&AuditValue> {
        self.fields.get(field)
    }

    /// Write a field; returns the previous value.
    pub fn put(&mut self, field: impl Into<String>, value: AuditValue) -> Option<AuditValue> {
        let field = field.into();
        self.dirty.insert(field.clone());
        self.fields.insert(field, value)
    }

    pub fn fields(&self) -> &BTreeMap<String, AuditValue> {
        &self.fields
    }

    /// Fields written through [`AuditRow::put`], in name order.
    pub fn written(&self) -> impl Iterator<Item = (&str, &AuditValue)> {
        self.dirty.iter().filter_map(move |name| {
            self.fields
                .get(name)
                .map(|value| (name.as_str(), value))
        })
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }
}

/// One result row of the main query.
///
/// `columns` follows the projection order of the query (see
/// `MainQuery::key_index` and friends); the audit row itself is carried
/// alongside for mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollRow {
    pub audit_row: AuditRow,
    columns: Vec<AuditValue>,
}

impl ScrollRow {
    pub fn new(audit_row: AuditRow, columns: Vec<AuditValue>) -> Self {
        Self { audit_row, columns }
    }

    pub fn get(&self, index: usize) -> RevendResult<&AuditValue> {
        self.columns.get(index).ok_or_else(|| {
            DataAccessError::CursorFailed {
                reason: format!(
                    "column index {} out of range ({} columns)",
                    index,
                    self.columns.len()
                ),
            }
            .into()
        })
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Column names of the first row of an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeekedRow {
    pub audit_row_columns: BTreeSet<String>,
    pub original_id_columns: BTreeSet<String>,
}
