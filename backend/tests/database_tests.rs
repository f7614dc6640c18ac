//! Integration tests for connecting and schema synchronization

use std::time::Duration;

use pretty_assertions::assert_eq;

use inventory_graph::config::Config;
use inventory_graph::db::Database;
use inventory_graph::inventory::REGISTRY;

fn temp_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}", dir.path().join("inventory.db").display())
}

#[tokio::test]
async fn test_sync_creates_tables_once() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::connect(&temp_url(&dir), 2).await.unwrap();

    let first = db.sync_schema(&REGISTRY).await.unwrap();
    assert_eq!(first.tables_created.len(), REGISTRY.entities().len() + 1);
    assert!(first.tables_created.iter().any(|t| t == "users_group_members"));

    let second = db.sync_schema(&REGISTRY).await.unwrap();
    assert!(second.tables_created.is_empty());
    assert!(second.columns_added.is_empty());
}

#[tokio::test]
async fn test_sync_adds_missing_columns() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::connect(&temp_url(&dir), 2).await.unwrap();
    sqlx::query("CREATE TABLE location_types (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)")
        .execute(db.pool())
        .await
        .unwrap();

    let result = db.sync_schema(&REGISTRY).await.unwrap();
    let added: Vec<_> = result
        .columns_added
        .iter()
        .filter(|(table, _)| table == "location_types")
        .map(|(_, column)| column.as_str())
        .collect();
    assert_eq!(
        added,
        vec!["create_time", "update_time", "map_type", "map_zoom_level", "sort_index", "site"]
    );
}

#[tokio::test]
async fn test_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        database_url: temp_url(&dir),
        max_connections: 1,
        connect_timeout: Duration::from_secs(2),
        ..Config::default()
    };
    let db = Database::from_config(&config).await.unwrap();
    db.sync_schema(&REGISTRY).await.unwrap();
    let ctx = config.context();
    let count = db
        .client()
        .query(&inventory_graph::inventory::USER)
        .count(&ctx)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_connect_with_retry_gives_up() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("missing/dir/inventory.db").display());
    let result = Database::connect_with_retry(
        &url,
        1,
        Duration::from_millis(10),
        Duration::from_millis(50),
    )
    .await;
    assert!(result.is_err());
}
