//! Entity declarations and the values discovered for them at start-up

use crate::{AuditEntitiesConfig, ConfigError, RevendResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One column of an entity's logical key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumn {
    /// Configuration attribute the column came from (`idColumn`, ...).
    pub attribute: &'static str,
    /// Column name inside the original id.
    pub column: String,
    /// Alias the column is projected under by the main query.
    pub alias: &'static str,
}

/// An audited entity the migrator can convert.
///
/// Implemented by the two declaration shapes; the migration algorithm only
/// depends on the key columns.
pub trait EntityDeclaration: fmt::Debug + fmt::Display + Clone + Send + Sync + 'static {
    /// Entity (table) name.
    fn name(&self) -> &str;

    /// Key columns in ordering priority.
    fn key_columns(&self) -> Vec<KeyColumn>;
}

/// A non-join audited entity keyed by a single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditEntityDeclaration {
    pub name: String,
    pub id_column: String,
}

impl AuditEntityDeclaration {
    pub fn new(name: impl Into<String>, id_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_column: id_column.into(),
        }
    }
}

impl EntityDeclaration for AuditEntityDeclaration {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_columns(&self) -> Vec<KeyColumn> {
        vec![KeyColumn {
            attribute: "idColumn",
            column: self.id_column.clone(),
            alias: "idColumnId",
        }]
    }
}

impl fmt::Display for AuditEntityDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AuditEntity: {{name = \"{}\", idColumn = \"{}\"}}",
            self.name, self.id_column
        )
    }
}

/// The audit entity of a many-to-many join table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MiddleAuditEntityDeclaration {
    pub name: String,
    pub join_column: String,
    pub inverse_join_column: String,
}

impl MiddleAuditEntityDeclaration {
    pub fn new(
        name: impl Into<String>,
        join_column: impl Into<String>,
        inverse_join_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            join_column: join_column.into(),
            inverse_join_column: inverse_join_column.into(),
        }
    }
}

impl EntityDeclaration for MiddleAuditEntityDeclaration {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_columns(&self) -> Vec<KeyColumn> {
        vec![
            KeyColumn {
                attribute: "joinColumn",
                column: self.join_column.clone(),
                alias: "joinColumnId",
            },
            KeyColumn {
                attribute: "inverseJoinColumn",
                column: self.inverse_join_column.clone(),
                alias: "inverseJoinColumnId",
            },
        ]
    }
}

impl fmt::Display for MiddleAuditEntityDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MiddleAuditEntity: {{name = \"{}\", joinColumn = \"{}\", inverseJoinColumn = \"{}\"}}",
            self.name, self.join_column, self.inverse_join_column
        )
    }
}

/// Column names discovered from one sample row of an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    audit_row_columns: BTreeSet<String>,
    original_id_columns: BTreeSet<String>,
}

impl KeySet {
    /// Build from the sampled column names. The revision field is not a key
    /// column and is dropped from the original-id set.
    pub fn from_sample(
        audit_row_columns: BTreeSet<String>,
        mut original_id_columns: BTreeSet<String>,
        cfg: &AuditEntitiesConfig,
    ) -> Self {
        original_id_columns.remove(&cfg.revision_field_name);
        Self {
            audit_row_columns,
            original_id_columns,
        }
    }

    /// The entity had no rows to sample.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.audit_row_columns.is_empty()
    }

    pub fn audit_row_columns(&self) -> &BTreeSet<String> {
        &self.audit_row_columns
    }

    pub fn original_id_columns(&self) -> &BTreeSet<String> {
        &self.original_id_columns
    }

    /// Check every declared key column against the sampled id columns.
    ///
    /// Nothing is checked for an empty entity: there is nothing to migrate
    /// and nothing to sample.
    pub fn validate<D: EntityDeclaration>(&self, decl: &D) -> RevendResult<()> {
        if self.is_empty() {
            return Ok(());
        }
        for key in decl.key_columns() {
            if !self.original_id_columns.contains(&key.column) {
                return Err(ConfigError::InvalidKeyColumn {
                    entity: decl.name().to_string(),
                    attribute: key.attribute,
                    column: key.column,
                    valid: self.original_id_columns.clone(),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Number of rows that need an end revision written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct RowCount(pub u64);

impl RowCount {
    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RowCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
