//! REVEND Test Utilities
//!
//! Shared test infrastructure for the REVEND workspace:
//! - Proptest generators for audit histories
//! - Seeded in-memory stores for common scenarios
//! - An oracle for the expected end revisions of a history
//! - Custom assertions for REVEND errors

// Re-export the in-memory backend from its source crate
pub use revend_storage::{InMemoryAuditStore, SessionFactory, StoredRow};

// Re-export core types for convenience
pub use revend_core::{
    AuditEntitiesConfig, AuditEntityDeclaration, AuditStrategyKind, AuditValue, ConfigError,
    DataAccessError, MiddleAuditEntityDeclaration, MigrationSettings, RevendError, RevendResult,
    RowLimit, StrategyError, Timestamp,
};

use std::collections::{BTreeMap, BTreeSet};

/// Key -> revisions of that key. The shape every generator and fixture
/// works with.
pub type History = BTreeMap<i64, BTreeSet<i64>>;

/// Shorthand for an integer column value.
pub fn int(v: i64) -> AuditValue {
    AuditValue::Integer(v)
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for audit histories and settings.

    use super::*;
    use proptest::prelude::*;

    /// Generate a history of up to 12 keys with 1-5 revisions each.
    pub fn arb_history() -> impl Strategy<Value = History> {
        proptest::collection::btree_map(
            0i64..50,
            proptest::collection::btree_set(1i64..100, 1..6),
            0..12,
        )
    }

    /// Generate a history where at least one key has several revisions.
    pub fn arb_history_with_siblings() -> impl Strategy<Value = History> {
        arb_history().prop_filter("needs a key with several revisions", |history| {
            history.values().any(|revs| revs.len() > 1)
        })
    }

    /// Generate a valid batch size.
    pub fn arb_batch_size() -> impl Strategy<Value = u64> {
        1u64..12
    }

    /// Generate a row limit, unbounded a quarter of the time.
    pub fn arb_row_limit() -> impl Strategy<Value = RowLimit> {
        prop_oneof![
            1 => Just(RowLimit::Unbounded),
            3 => (1i64..30).prop_map(|n| RowLimit::from_raw(n).unwrap_or_default()),
        ]
    }

    /// Generate an epoch-millisecond timestamp between 2020 and 2030.
    pub fn arb_epoch_millis() -> impl Strategy<Value = i64> {
        1_577_836_800_000i64..1_893_456_000_000i64
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built stores for common testing scenarios.

    use super::*;

    /// Entity name of the single-key fixture.
    pub const FOO: &str = "Foo_AUD";
    /// Entity name of the middle-entity fixture.
    pub const FOO_BAR: &str = "Foo_Bar_AUD";

    /// Settings with a small batch size and otherwise the defaults.
    pub fn settings(batch_size: u64) -> MigrationSettings {
        MigrationSettings {
            batch_size,
            ..MigrationSettings::default()
        }
    }

    pub fn foo_declaration() -> AuditEntityDeclaration {
        AuditEntityDeclaration::new(FOO, "id")
    }

    pub fn foo_bar_declaration() -> MiddleAuditEntityDeclaration {
        MiddleAuditEntityDeclaration::new(FOO_BAR, "foo_id", "bar_id")
    }

    /// Insert every (key, revision) of a history as a legacy row of a
    /// single-key entity.
    pub fn seed_history(
        store: &InMemoryAuditStore,
        entity: &str,
        history: &History,
    ) -> RevendResult<()> {
        store.create_entity(entity)?;
        for (key, revisions) in history {
            for rev in revisions {
                store.insert_row(entity, &[("id", int(*key))], *rev)?;
            }
        }
        Ok(())
    }

    /// Foo with key 42 at revisions 5, 7 and 9, and key 1 at revision 3 only.
    pub fn foo_store() -> RevendResult<InMemoryAuditStore> {
        foo_store_with(AuditEntitiesConfig::default())
    }

    pub fn foo_store_with(cfg: AuditEntitiesConfig) -> RevendResult<InMemoryAuditStore> {
        let store = InMemoryAuditStore::new(cfg);
        let mut history = History::new();
        history.insert(42, [5, 7, 9].into_iter().collect());
        history.insert(1, [3].into_iter().collect());
        seed_history(&store, FOO, &history)?;
        Ok(store)
    }

    /// Foo with end timestamps enabled and the revision-info timestamps
    /// stored as epoch millis (`revision * 1000`).
    pub fn timestamped_foo_store() -> RevendResult<InMemoryAuditStore> {
        let store = foo_store_with(AuditEntitiesConfig::default().with_end_timestamp())?;
        for rev in [3, 5, 7, 9] {
            store.insert_revision(rev, int(rev * 1000))?;
        }
        Ok(store)
    }

    /// Join table Foo_Bar keyed by (foo_id, bar_id):
    /// (1, 10) at revisions 2, 4 and 6; (1, 11) at revisions 2 and 6;
    /// (2, 10) at revision 4 only.
    pub fn foo_bar_store() -> RevendResult<InMemoryAuditStore> {
        let store = InMemoryAuditStore::new(AuditEntitiesConfig::default());
        store.create_entity(FOO_BAR)?;
        for rev in [2, 4, 6] {
            store.insert_row(FOO_BAR, &[("foo_id", int(1)), ("bar_id", int(10))], rev)?;
        }
        for rev in [2, 6] {
            store.insert_row(FOO_BAR, &[("foo_id", int(1)), ("bar_id", int(11))], rev)?;
        }
        store.insert_row(FOO_BAR, &[("foo_id", int(2)), ("bar_id", int(10))], 4)?;
        Ok(store)
    }
}

// ============================================================================
// ORACLE
// ============================================================================

pub mod oracle {
    //! Expected outcome of a migration, computed directly from a history.

    use super::*;

    /// Expected end revision of every (key, revision) that has a sibling:
    /// `None` for the newest revision of a key, otherwise the next newer
    /// revision. Keys with a single revision are absent.
    pub fn expected_ends(history: &History) -> BTreeMap<(i64, i64), Option<i64>> {
        let mut ends = BTreeMap::new();
        for (key, revisions) in history {
            if revisions.len() < 2 {
                continue;
            }
            let mut newer: Option<i64> = None;
            for rev in revisions.iter().rev() {
                ends.insert((*key, *rev), newer);
                newer = Some(*rev);
            }
        }
        ends
    }

    /// Rows the migration must write.
    pub fn expected_row_count(history: &History) -> u64 {
        history
            .values()
            .filter(|revs| revs.len() > 1)
            .map(|revs| revs.len() as u64)
            .sum()
    }

    /// Every row the migration writes, in migration order (key ascending,
    /// revision descending).
    pub fn migration_order(history: &History) -> Vec<(i64, i64)> {
        history
            .iter()
            .filter(|(_, revs)| revs.len() > 1)
            .flat_map(|(key, revs)| revs.iter().rev().map(move |rev| (*key, *rev)))
            .collect()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for REVEND results and stores.

    use super::*;

    /// Assert that a RevendResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &RevendResult<T>) {
        match result {
            Err(RevendError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a RevendResult is an InvalidKeyColumn error for `column`.
    #[track_caller]
    pub fn assert_invalid_key_column<T: std::fmt::Debug>(result: &RevendResult<T>, column: &str) {
        match result {
            Err(RevendError::Config(ConfigError::InvalidKeyColumn { column: c, .. })) => {
                assert_eq!(c, column, "Wrong column in InvalidKeyColumn error");
            }
            other => panic!("Expected InvalidKeyColumn for {}, got: {:?}", column, other),
        }
    }

    /// Assert that a RevendResult is a DataAccess error.
    #[track_caller]
    pub fn assert_data_access_error<T: std::fmt::Debug>(result: &RevendResult<T>) {
        match result {
            Err(RevendError::DataAccess(_)) => {}
            other => panic!("Expected DataAccess error, got: {:?}", other),
        }
    }

    /// Assert the committed end revision of one single-key row.
    #[track_caller]
    pub fn assert_end_revision(
        store: &InMemoryAuditStore,
        entity: &str,
        key: i64,
        revision: i64,
        expected: Option<i64>,
    ) {
        let actual = store
            .end_revision(entity, &[("id", int(key))], revision)
            .unwrap_or_else(|e| panic!("Failed to read {}[{}@{}]: {}", entity, key, revision, e));
        let expected = expected.map(int).unwrap_or(AuditValue::Null);
        assert_eq!(
            actual,
            Some(expected),
            "Wrong end revision for {}[{}@{}]",
            entity,
            key,
            revision
        );
    }

    /// Assert that no row of the entity was written or committed.
    #[track_caller]
    pub fn assert_untouched(store: &InMemoryAuditStore, entity: &str) {
        let written = store
            .rows_written(entity)
            .unwrap_or_else(|e| panic!("Failed to read write count: {}", e));
        assert_eq!(written, 0, "Expected no writes to {}", entity);
    }
}

// ============================================================================
// TESTS
// ============================================================================
