//! End-to-end migration tests over the in-memory store.

use chrono::{TimeZone, Utc};
use revend_core::{AuditValue, ConfigError, RevendError, RowLimit, StrategyError};
use revend_engine::{keyset, nullify, AuditEntityMigrator, MiddleEntityMigrator, ValidityMigrator};
use revend_test_utils::assertions::{
    assert_data_access_error, assert_end_revision, assert_invalid_key_column, assert_untouched,
};
use revend_test_utils::fixtures::{self, FOO, FOO_BAR};
use revend_test_utils::{int, AuditEntityDeclaration, InMemoryAuditStore};

const SENTINEL: i64 = -1;

fn stale(store: &InMemoryAuditStore, entity: &str) {
    store
        .set_field_everywhere(entity, "REVEND", int(SENTINEL))
        .unwrap();
}

// ============================================================================
// KEY SET
// ============================================================================

#[tokio::test]
async fn test_initialize_discovers_key_set_and_count() {
    let store = fixtures::foo_store().unwrap();
    let (keyset, row_count) =
        keyset::initialize(&store, store.config(), &fixtures::foo_declaration())
            .await
            .unwrap();

    assert!(keyset.original_id_columns().contains("id"));
    assert!(!keyset.original_id_columns().contains("REV"));
    assert_eq!(row_count.get(), 3);
    assert_eq!(store.commit_count().unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_key_column_blocks_writes() {
    let store = fixtures::foo_store().unwrap();
    let decl = AuditEntityDeclaration::new(FOO, "foo_id");

    let result =
        AuditEntityMigrator::new(&store, store.config(), decl, &fixtures::settings(2)).await;

    assert_invalid_key_column(&result, "foo_id");
    assert_eq!(store.commit_count().unwrap(), 0);
    assert_untouched(&store, FOO);
}

#[tokio::test]
async fn test_invalid_key_column_message_names_valid_set() {
    let store = fixtures::foo_store().unwrap();
    let decl = AuditEntityDeclaration::new(FOO, "foo_id");
    let err = keyset::initialize(&store, store.config(), &decl)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Configuration error: Invalid idColumn [foo_id] for Foo_AUD; should be in {\"id\"}"
    );
}

#[tokio::test]
async fn test_empty_entity_skips_validation() {
    let store = InMemoryAuditStore::new(Default::default());
    store.create_entity("Empty_AUD").unwrap();
    let decl = AuditEntityDeclaration::new("Empty_AUD", "anything");

    let migrator = AuditEntityMigrator::new(&store, store.config(), decl, &fixtures::settings(2))
        .await
        .unwrap();
    assert!(migrator.keyset().is_empty());
    assert!(migrator.row_count().is_zero());

    let report = migrator.migrate().await.unwrap();
    assert_eq!(report.rows_converted, 0);
    assert_eq!(store.commit_count().unwrap(), 0);
}

// ============================================================================
// CONVERSION
// ============================================================================

#[tokio::test]
async fn test_foo_scenario_two_commits() {
    let store = fixtures::foo_store().unwrap();
    let migrator = AuditEntityMigrator::new(
        &store,
        store.config(),
        fixtures::foo_declaration(),
        &fixtures::settings(2),
    )
    .await
    .unwrap();

    let report = migrator.migrate().await.unwrap();

    assert_eq!(report.entity, FOO);
    assert_eq!(report.row_count, 3);
    assert_eq!(report.rows_converted, 3);
    assert_eq!(report.batches_committed, 2);
    assert_eq!(report.rows_reset, None);
    assert_eq!(store.commit_count().unwrap(), 2);
    assert_eq!(store.rows_written(FOO).unwrap(), 3);

    assert_end_revision(&store, FOO, 42, 9, None);
    assert_end_revision(&store, FOO, 42, 7, Some(9));
    assert_end_revision(&store, FOO, 42, 5, Some(7));
}

#[tokio::test]
async fn test_singleton_rows_untouched() {
    let store = fixtures::foo_store().unwrap();
    stale(&store, FOO);

    AuditEntityMigrator::new(
        &store,
        store.config(),
        fixtures::foo_declaration(),
        &fixtures::settings(100),
    )
    .await
    .unwrap()
    .migrate()
    .await
    .unwrap();

    assert_end_revision(&store, FOO, 1, 3, Some(SENTINEL));
    assert_end_revision(&store, FOO, 42, 9, None);
    assert_eq!(store.rows_written(FOO).unwrap(), 3);
}

#[tokio::test]
async fn test_exact_batch_multiple_commits_once_with_rows() {
    let store = fixtures::foo_store().unwrap();
    let report = AuditEntityMigrator::new(
        &store,
        store.config(),
        fixtures::foo_declaration(),
        &fixtures::settings(3),
    )
    .await
    .unwrap()
    .migrate()
    .await
    .unwrap();

    assert_eq!(report.batches_committed, 1);
    assert_eq!(store.rows_written(FOO).unwrap(), 3);
    // The trailing commit carries no rows.
    assert_eq!(store.commit_count().unwrap(), 2);
}

#[tokio::test]
async fn test_row_cap_stops_conversion() {
    let store = fixtures::foo_store().unwrap();
    stale(&store, FOO);
    let mut settings = fixtures::settings(100);
    settings.max_rows_converted = RowLimit::from_raw(2).unwrap();

    let report = AuditEntityMigrator::new(&store, store.config(), fixtures::foo_declaration(), &settings)
        .await
        .unwrap()
        .migrate()
        .await
        .unwrap();

    assert_eq!(report.rows_converted, 2);
    assert_end_revision(&store, FOO, 42, 9, None);
    assert_end_revision(&store, FOO, 42, 7, Some(9));
    assert_end_revision(&store, FOO, 42, 5, Some(SENTINEL));
}

#[tokio::test]
async fn test_failure_keeps_committed_batches() {
    let store = fixtures::foo_store().unwrap();
    stale(&store, FOO);
    let migrator = AuditEntityMigrator::new(
        &store,
        store.config(),
        fixtures::foo_declaration(),
        &fixtures::settings(2),
    )
    .await
    .unwrap();
    store.fail_fetch_at(3).unwrap();

    let result = migrator.migrate().await;

    assert_data_access_error(&result);
    assert_eq!(store.commit_count().unwrap(), 1);
    assert_end_revision(&store, FOO, 42, 9, None);
    assert_end_revision(&store, FOO, 42, 7, Some(9));
    assert_end_revision(&store, FOO, 42, 5, Some(SENTINEL));
}

#[tokio::test]
async fn test_rerun_after_failure_completes() {
    let store = fixtures::foo_store().unwrap();
    stale(&store, FOO);
    store.fail_fetch_at(2).unwrap();
    let failed = AuditEntityMigrator::new(
        &store,
        store.config(),
        fixtures::foo_declaration(),
        &fixtures::settings(2),
    )
    .await
    .unwrap()
    .migrate()
    .await;
    assert_data_access_error(&failed);
    assert_end_revision(&store, FOO, 42, 9, Some(SENTINEL));

    store.fail_fetch_at(u64::MAX).unwrap();
    let report = AuditEntityMigrator::new(
        &store,
        store.config(),
        fixtures::foo_declaration(),
        &fixtures::settings(2),
    )
    .await
    .unwrap()
    .migrate()
    .await
    .unwrap();

    assert_eq!(report.rows_converted, 3);
    assert_end_revision(&store, FOO, 42, 9, None);
    assert_end_revision(&store, FOO, 42, 7, Some(9));
    assert_end_revision(&store, FOO, 42, 5, Some(7));
}

#[tokio::test]
async fn test_end_timestamp_from_epoch_millis() {
    let store = fixtures::timestamped_foo_store().unwrap();
    AuditEntityMigrator::new(
        &store,
        store.config(),
        fixtures::foo_declaration(),
        &fixtures::settings(2),
    )
    .await
    .unwrap()
    .migrate()
    .await
    .unwrap();

    let tstamp = |rev: i64| {
        store
            .field_of(FOO, &[("id", int(42))], rev, "REVEND_TSTMP")
            .unwrap()
    };
    let millis = |ms: i64| AuditValue::Timestamp(Utc.timestamp_millis_opt(ms).unwrap());

    assert_eq!(tstamp(9), Some(AuditValue::Null));
    assert_eq!(tstamp(7), Some(millis(9000)));
    assert_eq!(tstamp(5), Some(millis(7000)));
    assert_end_revision(&store, FOO, 42, 5, Some(7));
}

#[tokio::test]
async fn test_middle_entity_chains_per_key_pair() {
    let store = fixtures::foo_bar_store().unwrap();
    stale(&store, FOO_BAR);

    let report = MiddleEntityMigrator::new(
        &store,
        store.config(),
        fixtures::foo_bar_declaration(),
        &fixtures::settings(2),
    )
    .await
    .unwrap()
    .migrate()
    .await
    .unwrap();

    assert_eq!(report.row_count, 5);
    assert_eq!(report.batches_committed, 3);

    let end = |foo: i64, bar: i64, rev: i64| {
        store
            .end_revision(FOO_BAR, &[("foo_id", int(foo)), ("bar_id", int(bar))], rev)
            .unwrap()
            .unwrap()
    };
    assert_eq!(end(1, 10, 6), AuditValue::Null);
    assert_eq!(end(1, 10, 4), int(6));
    assert_eq!(end(1, 10, 2), int(4));
    assert_eq!(end(1, 11, 6), AuditValue::Null);
    assert_eq!(end(1, 11, 2), int(6));
    assert_eq!(end(2, 10, 4), int(SENTINEL));
}

#[tokio::test]
async fn test_middle_entity_rejects_unknown_inverse_column() {
    let store = fixtures::foo_bar_store().unwrap();
    let decl = revend_test_utils::MiddleAuditEntityDeclaration::new(FOO_BAR, "foo_id", "baz_id");

    let result = ValidityMigrator::new(&store, store.config(), decl, &fixtures::settings(2)).await;

    match result {
        Err(RevendError::Config(ConfigError::InvalidKeyColumn {
            attribute, column, ..
        })) => {
            assert_eq!(attribute, "inverseJoinColumn");
            assert_eq!(column, "baz_id");
        }
        other => panic!("Expected InvalidKeyColumn, got: {:?}", other),
    }
}

// ============================================================================
// RESET
// ============================================================================

#[tokio::test]
async fn test_reset_end_columns_is_idempotent() {
    let store = fixtures::timestamped_foo_store().unwrap();
    stale(&store, FOO);
    let decl = fixtures::foo_declaration();

    let first = nullify::reset_end_columns(&store, store.config(), &decl)
        .await
        .unwrap();
    let after_first = store.rows(FOO).unwrap();
    let second = nullify::reset_end_columns(&store, store.config(), &decl)
        .await
        .unwrap();

    assert_eq!(first, 4);
    assert_eq!(second, 4);
    assert_eq!(store.rows(FOO).unwrap(), after_first);
    for row in after_first {
        assert_eq!(row.fields.get("REVEND"), Some(&AuditValue::Null));
        assert_eq!(row.fields.get("REVEND_TSTMP"), Some(&AuditValue::Null));
    }
}

#[tokio::test]
async fn test_nullify_before_conversion_clears_singletons() {
    let store = fixtures::foo_store().unwrap();
    stale(&store, FOO);
    let mut settings = fixtures::settings(2);
    settings.nullify_existing_end_columns = true;

    let report = AuditEntityMigrator::new(&store, store.config(), fixtures::foo_declaration(), &settings)
        .await
        .unwrap()
        .migrate()
        .await
        .unwrap();

    assert_eq!(report.rows_reset, Some(4));
    assert_end_revision(&store, FOO, 1, 3, None);
    assert_end_revision(&store, FOO, 42, 5, Some(7));
    // One reset commit plus two batch commits.
    assert_eq!(store.commit_count().unwrap(), 3);
}

#[tokio::test]
async fn test_rerun_with_nullify_gives_same_result() {
    let store = fixtures::foo_store().unwrap();
    let mut settings = fixtures::settings(2);
    settings.nullify_existing_end_columns = true;

    for _ in 0..2 {
        AuditEntityMigrator::new(&store, store.config(), fixtures::foo_declaration(), &settings)
            .await
            .unwrap()
            .migrate()
            .await
            .unwrap();
    }

    assert_end_revision(&store, FOO, 42, 9, None);
    assert_end_revision(&store, FOO, 42, 7, Some(9));
    assert_end_revision(&store, FOO, 42, 5, Some(7));
    assert_end_revision(&store, FOO, 1, 3, None);
}

#[test]
fn test_unexpected_strategy_error_message() {
    let err = RevendError::from(StrategyError::Unexpected {
        strategy: "DefaultAuditStrategy".to_string(),
    });
    assert!(err.to_string().contains("DefaultAuditStrategy"));
}
