//! BackwardsMigrationManager against in-memory SQLite.

mod common;

use std::path::Path;
use std::sync::{Arc, Mutex};

use common::*;
use pretty_assertions::assert_eq;
use retrace::prelude::*;

const FIRST: &str = "20240101000000";
const SECOND: &str = "20240102000000";
const THIRD: &str = "20240103000000";

/// band table, then a genre column, then a concert table.
fn music_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_manager(band_manager(FIRST));

    let mut genre = MigrationManager::new(SECOND, "music");
    genre.add_column("band", "genre", ColumnType::Text, ColumnParams::new().null(true));
    registry.register_manager(genre);

    let mut concert = MigrationManager::new(THIRD, "music");
    concert.add_table(
        "Concert",
        "concert",
        vec![ColumnDefinition::new("venue", ColumnType::Varchar)],
    );
    registry.register_manager(concert);
    registry
}

async fn migrated(registry: Registry) -> Migrator {
    let migrator = Migrator::new(memory_db().await, vec![AppConfig::new("music", "unused")])
        .with_source(registry);
    forwards(&migrator, "music", false).await.unwrap();
    migrator
}

#[tokio::test]
async fn test_empty_ledger_is_nothing_to_reverse() {
    let migrator = Migrator::new(memory_db().await, vec![AppConfig::new("music", "unused")])
        .with_source(music_registry())
        .with_confirm(Decline);

    let outcome = BackwardsMigrationManager::new("music")
        .target(MigrationTarget::All)
        .run(&migrator)
        .await
        .unwrap();

    assert_eq!(outcome, BackwardsOutcome::NothingToReverse);
    assert!(migrator.ran_ids("music").await.unwrap().is_empty());
    assert!(!table_exists(migrator.database(), "band").await);
}

#[tokio::test]
async fn test_latest_reverses_one_migration() {
    let migrator = migrated(music_registry()).await;

    let outcome = BackwardsMigrationManager::new("music")
        .auto_agree(true)
        .run(&migrator)
        .await
        .unwrap();

    assert_eq!(outcome, BackwardsOutcome::Reversed(vec![THIRD.to_string()]));
    assert_eq!(migrator.ran_ids("music").await.unwrap(), vec![FIRST, SECOND]);
    assert!(!table_exists(migrator.database(), "concert").await);
    assert_eq!(
        columns(migrator.database(), "band").await,
        vec!["id", "name", "popularity", "genre"]
    );
}

#[tokio::test]
async fn test_all_reverses_everything_newest_first() {
    let migrator = migrated(music_registry()).await;

    let outcome = BackwardsMigrationManager::new("music")
        .target(MigrationTarget::All)
        .auto_agree(true)
        .run(&migrator)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        BackwardsOutcome::Reversed(vec![THIRD.into(), SECOND.into(), FIRST.into()])
    );
    assert!(migrator.ran_ids("music").await.unwrap().is_empty());
    assert!(!table_exists(migrator.database(), "band").await);
    assert!(!table_exists(migrator.database(), "concert").await);
}

#[tokio::test]
async fn test_id_target_is_contiguous() {
    let migrator = migrated(music_registry()).await;

    let outcome = BackwardsMigrationManager::new("music")
        .target(MigrationTarget::Id(SECOND.into()))
        .auto_agree(true)
        .run(&migrator)
        .await
        .unwrap();

    assert_eq!(outcome, BackwardsOutcome::Reversed(vec![THIRD.into(), SECOND.into()]));
    assert_eq!(migrator.ran_ids("music").await.unwrap(), vec![FIRST]);
    assert_eq!(
        columns(migrator.database(), "band").await,
        vec!["id", "name", "popularity"]
    );
}

#[tokio::test]
async fn test_unrecognized_identifier_changes_nothing() {
    let migrator = migrated(music_registry()).await;

    let err = BackwardsMigrationManager::new("music")
        .target(MigrationTarget::Id("20990101000000".into()))
        .auto_agree(true)
        .run(&migrator)
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::UnrecognizedIdentifier { .. }));
    assert_eq!(migrator.ran_ids("music").await.unwrap(), vec![FIRST, SECOND, THIRD]);
}

#[tokio::test]
async fn test_declined_confirmation_changes_nothing() {
    let migrator = migrated(music_registry()).await.with_confirm(Decline);

    let err = BackwardsMigrationManager::new("music")
        .target(MigrationTarget::All)
        .run(&migrator)
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::UserDeclined));
    assert!(err.is_refusal());
    assert_eq!(migrator.ran_ids("music").await.unwrap(), vec![FIRST, SECOND, THIRD]);
    assert!(table_exists(migrator.database(), "concert").await);
}

#[tokio::test]
async fn test_prompt_lists_migrations() {
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&prompts);
    let migrator = migrated(music_registry()).await.with_confirm(move |prompt: &str| {
        seen.lock().unwrap().push(prompt.to_string());
        true
    });

    BackwardsMigrationManager::new("music")
        .target(MigrationTarget::Id(SECOND.into()))
        .run(&migrator)
        .await
        .unwrap();

    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains(THIRD));
    assert!(prompts[0].contains(SECOND));
    assert!(!prompts[0].contains(FIRST));
}

#[tokio::test]
async fn test_failure_stops_run_and_keeps_ledger_entry() {
    let mut registry = music_registry();
    let mut broken = MigrationManager::new("20240104000000", "music");
    broken.add_raw_backwards(RawAction::sql("DROP TABLE no_such_table"));
    registry.register_manager(broken);

    // Newest migration reverses cleanly; the one below it fails.
    let mut last = MigrationManager::new("20240105000000", "music");
    last.add_table("Tour", "tour", vec![ColumnDefinition::new("year", ColumnType::Integer)]);
    registry.register_manager(last);

    let migrator = migrated(registry).await;
    let err = BackwardsMigrationManager::new("music")
        .target(MigrationTarget::All)
        .auto_agree(true)
        .run(&migrator)
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::Operation { .. }));
    assert!(!table_exists(migrator.database(), "tour").await);
    assert_eq!(
        migrator.ran_ids("music").await.unwrap(),
        vec![FIRST, SECOND, THIRD, "20240104000000"]
    );
    assert!(table_exists(migrator.database(), "concert").await);
}

#[tokio::test]
async fn test_reversing_drop_table_restores_it() {
    let mut registry = music_registry();
    let mut drop = MigrationManager::new("20240104000000", "music");
    drop.drop_table("Band", "band");
    registry.register_manager(drop);

    let migrator = migrated(registry).await;
    assert!(!table_exists(migrator.database(), "band").await);

    BackwardsMigrationManager::new("music")
        .auto_agree(true)
        .run(&migrator)
        .await
        .unwrap();

    assert_eq!(
        columns(migrator.database(), "band").await,
        vec!["id", "name", "popularity", "genre"]
    );
}

#[tokio::test]
async fn test_unit_module_only_clears_ledger() {
    let mut registry = music_registry();
    registry.register(
        "music",
        MigrationModule::new("20240104000000", || Ok(ExecutionOutcome::Unit)),
    );
    let migrator = migrated(registry).await;

    let outcome = BackwardsMigrationManager::new("music")
        .auto_agree(true)
        .run(&migrator)
        .await
        .unwrap();

    assert_eq!(outcome, BackwardsOutcome::Reversed(vec!["20240104000000".into()]));
    assert_eq!(migrator.ran_ids("music").await.unwrap(), vec![FIRST, SECOND, THIRD]);
}

#[tokio::test]
async fn test_untouched_entry_points_are_not_rerun() {
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);

    let mut registry = Registry::new();
    registry.register(
        "music",
        MigrationModule::new(FIRST, move || {
            *counter.lock().unwrap() += 1;
            Ok(ExecutionOutcome::Unit)
        }),
    );
    registry.register_manager(band_manager(SECOND));
    let migrator = migrated(registry).await;
    assert_eq!(*calls.lock().unwrap(), 1);

    let outcome = BackwardsMigrationManager::new("music")
        .auto_agree(true)
        .run(&migrator)
        .await
        .unwrap();

    assert_eq!(outcome, BackwardsOutcome::Reversed(vec![SECOND.to_string()]));
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_unknown_app() {
    let migrator = migrated(music_registry()).await;
    let err = BackwardsMigrationManager::new("shop")
        .run(&migrator)
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::UnknownApp(_)));
}

// ============================================================================
// clean
// ============================================================================

fn write_migration(dir: &Path, id: &str, body: &str) {
    std::fs::write(dir.join(format!("{}_step.toml", id)), body).unwrap();
}

const CREATE_BAND: &str = r#"
description = "band"

[[operations]]
kind = "add_table"
class_name = "Band"
table_name = "band"
columns = [{ name = "name", type = "varchar", length = 50 }]
"#;

const ADD_GENRE: &str = r#"
description = "genre"

[[operations]]
kind = "add_column"
table = "band"
column_name = "genre"
type = "text"
params = { null = true }
"#;

const BROKEN_BACKWARD: &str = r#"
description = "broken"

[[operations]]
kind = "raw"
forward = "UPDATE band SET genre = 'rock'"
backward = "UPDATE missing_table SET x = 1"
"#;

async fn file_migrator(dir: &Path) -> Migrator {
    let migrator = Migrator::new(memory_db().await, vec![AppConfig::new("music", dir)]);
    forwards(&migrator, "music", false).await.unwrap();
    migrator
}

#[tokio::test]
async fn test_clean_removes_file_after_success() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), FIRST, CREATE_BAND);
    write_migration(dir.path(), SECOND, ADD_GENRE);
    let migrator = file_migrator(dir.path()).await;

    BackwardsMigrationManager::new("music")
        .auto_agree(true)
        .clean(true)
        .run(&migrator)
        .await
        .unwrap();

    assert!(dir.path().join(format!("{}_step.toml", FIRST)).exists());
    assert!(!dir.path().join(format!("{}_step.toml", SECOND)).exists());
    assert_eq!(columns(migrator.database(), "band").await, vec!["id", "name"]);
}

#[tokio::test]
async fn test_clean_keeps_file_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), FIRST, CREATE_BAND);
    write_migration(dir.path(), SECOND, ADD_GENRE);
    write_migration(dir.path(), THIRD, BROKEN_BACKWARD);
    let migrator = file_migrator(dir.path()).await;

    let err = BackwardsMigrationManager::new("music")
        .auto_agree(true)
        .clean(true)
        .run(&migrator)
        .await
        .unwrap_err();

    assert!(matches!(err.root(), MigrateError::Database(_)));
    assert!(dir.path().join(format!("{}_step.toml", THIRD)).exists());
    assert_eq!(migrator.ran_ids("music").await.unwrap(), vec![FIRST, SECOND, THIRD]);
}

#[tokio::test]
async fn test_clean_off_keeps_files() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), FIRST, CREATE_BAND);
    let migrator = file_migrator(dir.path()).await;

    BackwardsMigrationManager::new("music")
        .auto_agree(true)
        .run(&migrator)
        .await
        .unwrap();

    assert!(dir.path().join(format!("{}_step.toml", FIRST)).exists());
    assert!(!table_exists(migrator.database(), "band").await);
}

// ============================================================================
// all apps
// ============================================================================

fn two_apps() -> (Registry, Vec<AppConfig>) {
    let mut registry = music_registry();
    let mut ticket = MigrationManager::new("20240201000000", "shop");
    ticket.add_table(
        "Ticket",
        "ticket",
        vec![ColumnDefinition::new("band", ColumnType::Varchar)],
    );
    registry.register_manager(ticket);

    let apps = vec![
        AppConfig::new("shop", "unused").depends_on("music"),
        AppConfig::new("music", "unused"),
    ];
    (registry, apps)
}

#[tokio::test]
async fn test_all_apps_in_reverse_dependency_order() {
    let (registry, apps) = two_apps();
    let confirmations = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&confirmations);

    let migrator = Migrator::new(memory_db().await, apps)
        .with_source(registry)
        .with_confirm(move |_: &str| {
            *counter.lock().unwrap() += 1;
            true
        });
    let applied = forwards(&migrator, "all", false).await.unwrap();
    let applied_order: Vec<_> = applied.iter().map(|(app, _)| app.as_str()).collect();
    assert_eq!(applied_order, vec!["music", "shop"]);

    let outcomes = backwards(&migrator, "all", MigrationTarget::Latest, false, false)
        .await
        .unwrap();

    let order: Vec<_> = outcomes.iter().map(|(app, _)| app.as_str()).collect();
    assert_eq!(order, vec!["shop", "music"]);
    assert_eq!(
        outcomes[1].1,
        BackwardsOutcome::Reversed(vec![THIRD.into(), SECOND.into(), FIRST.into()])
    );
    assert_eq!(*confirmations.lock().unwrap(), 1);
    assert!(migrator.ran_ids("music").await.unwrap().is_empty());
    assert!(migrator.ran_ids("shop").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_all_apps_keeps_files_when_clean() {
    let music_dir = tempfile::tempdir().unwrap();
    let shop_dir = tempfile::tempdir().unwrap();
    write_migration(music_dir.path(), FIRST, CREATE_BAND);
    write_migration(music_dir.path(), SECOND, ADD_GENRE);
    write_migration(
        shop_dir.path(),
        THIRD,
        r#"
        [[operations]]
        kind = "add_table"
        class_name = "Ticket"
        table_name = "ticket"
        columns = [{ name = "band", type = "varchar" }]
        "#,
    );

    let apps = vec![
        AppConfig::new("shop", shop_dir.path()).depends_on("music"),
        AppConfig::new("music", music_dir.path()),
    ];
    let migrator = Migrator::new(memory_db().await, apps);
    forwards(&migrator, "all", false).await.unwrap();

    backwards(&migrator, "all", MigrationTarget::All, true, true)
        .await
        .unwrap();

    assert!(migrator.ran_ids("music").await.unwrap().is_empty());
    assert!(migrator.ran_ids("shop").await.unwrap().is_empty());
    assert!(music_dir.path().join(format!("{}_step.toml", FIRST)).exists());
    assert!(music_dir.path().join(format!("{}_step.toml", SECOND)).exists());
    assert!(shop_dir.path().join(format!("{}_step.toml", THIRD)).exists());
}

#[tokio::test]
async fn test_all_apps_declined() {
    let (registry, apps) = two_apps();
    let migrator = Migrator::new(memory_db().await, apps)
        .with_source(registry)
        .with_confirm(Decline);
    forwards(&migrator, "all", false).await.unwrap();

    let err = backwards(&migrator, "all", MigrationTarget::All, false, false)
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::UserDeclined));
    assert_eq!(migrator.ran_ids("shop").await.unwrap().len(), 1);
}
