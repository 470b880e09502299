//! Driver tests: settings, strategy and catalog checks.

use revend_core::{AuditStrategyKind, ConfigError, RevendError, StrategyError};
use revend_engine::MigrationTask;
use revend_test_utils::assertions::{assert_config_error, assert_end_revision, assert_untouched};
use revend_test_utils::fixtures::{self, FOO, FOO_BAR};
use revend_test_utils::{int, AuditEntitiesConfig, AuditEntityDeclaration, MigrationSettings};

fn task(settings: MigrationSettings) -> MigrationTask {
    MigrationTask::new(settings, AuditEntitiesConfig::default())
}

#[tokio::test]
async fn test_task_migrates_every_declared_entity() {
    let store = fixtures::foo_store().unwrap();
    store.create_entity(FOO_BAR).unwrap();
    for rev in [3, 8] {
        store
            .insert_row(FOO_BAR, &[("foo_id", int(42)), ("bar_id", int(7))], rev)
            .unwrap();
    }

    let mut task = task(fixtures::settings(2));
    task.add_audit_entity(fixtures::foo_declaration())
        .add_middle_entity(fixtures::foo_bar_declaration());

    let reports = task.execute(&store).await.unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].entity, FOO);
    assert_eq!(reports[1].entity, FOO_BAR);
    assert_eq!(reports[1].rows_converted, 2);
    assert_end_revision(&store, FOO, 42, 5, Some(7));
    assert_eq!(
        store
            .end_revision(FOO_BAR, &[("foo_id", int(42)), ("bar_id", int(7))], 3)
            .unwrap(),
        Some(int(8))
    );
}

#[tokio::test]
async fn test_task_without_declarations_does_nothing() {
    let store = fixtures::foo_store().unwrap();
    let reports = task(MigrationSettings::default())
        .execute(&store)
        .await
        .unwrap();
    assert!(reports.is_empty());
    assert_untouched(&store, FOO);
}

#[tokio::test]
async fn test_task_rejects_unknown_entity() {
    let store = fixtures::foo_store().unwrap();
    let mut task = task(MigrationSettings::default());
    task.add_audit_entity(fixtures::foo_declaration())
        .add_audit_entity(AuditEntityDeclaration::new("Bar_AUD", "id"));

    let result = task.execute(&store).await;

    match result {
        Err(RevendError::Config(ConfigError::UnknownEntity { entity, available })) => {
            assert_eq!(entity, "Bar_AUD");
            assert_eq!(available, vec![FOO.to_string()]);
        }
        other => panic!("Expected UnknownEntity, got: {:?}", other),
    }
    assert_untouched(&store, FOO);
}

#[tokio::test]
async fn test_task_validates_every_entity_before_writing() {
    let store = fixtures::foo_store().unwrap();
    store.create_entity(FOO_BAR).unwrap();
    store
        .insert_row(FOO_BAR, &[("foo_id", int(1)), ("bar_id", int(2))], 1)
        .unwrap();

    let mut task = task(fixtures::settings(2));
    task.add_audit_entity(fixtures::foo_declaration())
        .add_middle_entity(revend_test_utils::MiddleAuditEntityDeclaration::new(
            FOO_BAR, "foo_id", "nope",
        ));

    let result = task.execute(&store).await;

    assert_config_error(&result);
    assert_eq!(store.commit_count().unwrap(), 0);
    assert_untouched(&store, FOO);
}

#[tokio::test]
async fn test_task_rejects_default_strategy() {
    let store = fixtures::foo_store().unwrap();
    let audit = AuditEntitiesConfig {
        strategy: AuditStrategyKind::Default,
        ..AuditEntitiesConfig::default()
    };
    let mut task = MigrationTask::new(MigrationSettings::default(), audit);
    task.add_audit_entity(fixtures::foo_declaration());

    let result = task.execute(&store).await;

    assert!(matches!(
        result,
        Err(RevendError::Strategy(StrategyError::Unexpected { .. }))
    ));
    assert_untouched(&store, FOO);
}

#[tokio::test]
async fn test_task_rejects_zero_batch_size() {
    let store = fixtures::foo_store().unwrap();
    let mut task = task(fixtures::settings(0));
    task.add_audit_entity(fixtures::foo_declaration());

    let result = task.execute(&store).await;

    match result {
        Err(RevendError::Config(ConfigError::InvalidValue { field, .. })) => {
            assert_eq!(field, "batch_size");
        }
        other => panic!("Expected InvalidValue, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_preflight_errors_are_flagged() {
    let store = fixtures::foo_store().unwrap();
    let mut task = task(MigrationSettings::default());
    task.add_audit_entity(AuditEntityDeclaration::new(FOO, "idd"));

    let err = task.execute(&store).await.unwrap_err();
    assert!(err.is_preflight());
}
