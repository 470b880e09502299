//! Configuration types

use crate::{ConfigError, RevendResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;

/// Audit strategy configured for the audited model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStrategyKind {
    /// Append-only revision rows without an end marker.
    Default,
    /// Revision rows carrying the revision that superseded them.
    #[default]
    Validity,
}

impl fmt::Display for AuditStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditStrategyKind::Default => write!(f, "DefaultAuditStrategy"),
            AuditStrategyKind::Validity => write!(f, "ValidityAuditStrategy"),
        }
    }
}

/// Naming of the audit tables' bookkeeping columns.
///
/// Mirrors the settings of the auditing layer that produced the tables. The
/// defaults match a stock installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditEntitiesConfig {
    pub strategy: AuditStrategyKind,
    /// Property holding the embedded original id (key columns + revision).
    pub original_id_prop_name: String,
    /// Revision column inside the original id.
    pub revision_field_name: String,
    /// Number property of the revision entity.
    pub revision_number_prop: String,
    /// Timestamp property of the revision entity.
    pub revision_timestamp_prop: String,
    pub revision_end_field_name: String,
    pub revision_end_timestamp_field_name: String,
    pub revision_end_timestamp_enabled: bool,
    /// Revision-info table, used by backends that join it for timestamps.
    pub revision_info_table: String,
    pub revision_info_id_column: String,
    pub revision_info_timestamp_column: String,
}

impl Default for AuditEntitiesConfig {
    fn default() -> Self {
        Self {
            strategy: AuditStrategyKind::Validity,
            original_id_prop_name: "originalId".to_string(),
            revision_field_name: "REV".to_string(),
            revision_number_prop: "id".to_string(),
            revision_timestamp_prop: "timestamp".to_string(),
            revision_end_field_name: "REVEND".to_string(),
            revision_end_timestamp_field_name: "REVEND_TSTMP".to_string(),
            revision_end_timestamp_enabled: false,
            revision_info_table: "REVINFO".to_string(),
            revision_info_id_column: "REV".to_string(),
            revision_info_timestamp_column: "REVTSTMP".to_string(),
        }
    }
}

impl AuditEntitiesConfig {
    /// Config with end-timestamp tracking switched on.
    pub fn with_end_timestamp(mut self) -> Self {
        self.revision_end_timestamp_enabled = true;
        self
    }
}

/// Upper bound on rows converted per entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawRowLimit", into = "RawRowLimit")]
pub enum RowLimit {
    #[default]
    Unbounded,
    AtMost(NonZeroU64),
}

impl RowLimit {
    /// Interpret an operator-supplied limit: `-1` means unbounded, anything
    /// else must be positive.
    pub fn from_raw(raw: i64) -> Result<Self, ConfigError> {
        if raw == -1 {
            return Ok(RowLimit::Unbounded);
        }
        u64::try_from(raw)
            .ok()
            .and_then(NonZeroU64::new)
            .map(RowLimit::AtMost)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "max_rows_converted".to_string(),
                value: raw.to_string(),
                reason: "must either be greater than zero or -1 (all rows)".to_string(),
            })
    }

    /// Whether another row may be converted after `converted` rows.
    pub fn allows(&self, converted: u64) -> bool {
        match self {
            RowLimit::Unbounded => true,
            RowLimit::AtMost(max) => converted < max.get(),
        }
    }
}

impl fmt::Display for RowLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowLimit::Unbounded => write!(f, "unbounded"),
            RowLimit::AtMost(max) => write!(f, "{}", max),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawRowLimit {
    Count(i64),
    Word(String),
}

impl TryFrom<RawRowLimit> for RowLimit {
    type Error = ConfigError;

    fn try_from(raw: RawRowLimit) -> Result<Self, Self::Error> {
        match raw {
            RawRowLimit::Count(n) => RowLimit::from_raw(n),
            RawRowLimit::Word(word) if word.eq_ignore_ascii_case("unbounded") => {
                Ok(RowLimit::Unbounded)
            }
            RawRowLimit::Word(word) => Err(ConfigError::InvalidValue {
                field: "max_rows_converted".to_string(),
                value: word,
                reason: "expected a positive integer, -1 or \"unbounded\"".to_string(),
            }),
        }
    }
}

impl From<RowLimit> for RawRowLimit {
    fn from(limit: RowLimit) -> Self {
        match limit {
            RowLimit::Unbounded => RawRowLimit::Word("unbounded".to_string()),
            // Limits past i64::MAX are indistinguishable from i64::MAX.
            RowLimit::AtMost(max) => {
                RawRowLimit::Count(i64::try_from(max.get()).unwrap_or(i64::MAX))
            }
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> u64 {
    100
}

/// Run-wide migration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationSettings {
    /// Reset every end column before converting.
    #[serde(default)]
    pub nullify_existing_end_columns: bool,
    /// Promote per-batch progress messages to `info`.
    #[serde(default = "default_true")]
    pub debug_logging: bool,
    /// Rows per transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default)]
    pub max_rows_converted: RowLimit,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            nullify_existing_end_columns: false,
            debug_logging: true,
            batch_size: default_batch_size(),
            max_rows_converted: RowLimit::Unbounded,
        }
    }
}

impl MigrationSettings {
    pub fn validate(&self) -> RevendResult<()> {
        if self.batch_size < 1 {
            return Err(ConfigError::InvalidValue {
                field: "batch_size".to_string(),
                value: self.batch_size.to_string(),
                reason: "batch_size must be greater than zero".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RevendError;

    #[test]
    fn test_row_limit_minus_one_is_unbounded() {
        assert_eq!(RowLimit::from_raw(-1).unwrap(), RowLimit::Unbounded);
    }

    #[test]
    fn test_row_limit_rejects_zero_and_negative() {
        assert!(RowLimit::from_raw(0).is_err());
        assert!(RowLimit::from_raw(-5).is_err());
    }

    #[test]
    fn test_row_limit_allows() {
        let limit = RowLimit::from_raw(3).unwrap();
        assert!(limit.allows(0));
        assert!(limit.allows(2));
        assert!(!limit.allows(3));
        assert!(RowLimit::Unbounded.allows(u64::MAX - 1));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = MigrationSettings::default();
        assert!(!settings.nullify_existing_end_columns);
        assert!(settings.debug_logging);
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.max_rows_converted, RowLimit::Unbounded);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let settings = MigrationSettings {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(RevendError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_row_limit_above_i64_saturates() {
        let raw = RawRowLimit::from(RowLimit::AtMost(NonZeroU64::MAX));
        assert!(matches!(raw, RawRowLimit::Count(i64::MAX)));
        let raw = RawRowLimit::from(RowLimit::from_raw(25).unwrap());
        assert!(matches!(raw, RawRowLimit::Count(25)));
    }
}
