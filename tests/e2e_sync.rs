//! End-to-end reconciliation through real DBF and SQLite files.

use dbfxsql::backend::open_source;
use dbfxsql::{sync, Backend as _, Config};
use dbfxsql_core::{Condition, Engine, EngineKind, Relation, Row, Value};
use std::collections::HashMap;
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> Config {
    let engines = HashMap::from([
        (
            EngineKind::Dbf,
            Engine {
                folderpaths: vec![dir.path().to_path_buf()],
                extensions: vec![".dbf".into()],
                credentials: None,
                temp_rewrites: vec![],
            },
        ),
        (
            EngineKind::Sqlite,
            Engine {
                folderpaths: vec![dir.path().to_path_buf()],
                extensions: vec![".db".into()],
                credentials: None,
                temp_rewrites: vec!["-journal".into(), "-wal".into()],
            },
        ),
    ]);

    let relations = vec![Relation {
        sources: vec!["users.dbf".into(), "company.db".into()],
        tables: vec!["".into(), "users".into()],
        fields: vec![
            vec!["id".into(), "name".into()],
            vec!["id".into(), "name".into()],
        ],
        priority: Some("users.dbf".into()),
    }];

    Config { engines, relations }
}

async fn create_both_sides(config: &Config) {
    let dbf = open_source(config, "users.dbf", "").unwrap();
    dbf.create_table(&[
        ("id".to_string(), "N(10,0)".to_string()),
        ("name".to_string(), "C(30)".to_string()),
    ])
    .await
    .unwrap();

    let sqlite = open_source(config, "company.db", "users").unwrap();
    sqlite
        .create_table(&[
            ("id".to_string(), "INTEGER".to_string()),
            ("name".to_string(), "TEXT".to_string()),
        ])
        .await
        .unwrap();
}

fn user(id: i64, name: &str) -> Row {
    Row::from([
        ("id".to_string(), Value::Integer(id)),
        ("name".to_string(), Value::Text(name.to_string())),
    ])
}

async fn dbf_rows(config: &Config) -> Vec<Row> {
    open_source(config, "users.dbf", "")
        .unwrap()
        .read_all()
        .await
        .unwrap()
}

async fn sqlite_rows(config: &Config) -> Vec<Row> {
    open_source(config, "company.db", "users")
        .unwrap()
        .read_all()
        .await
        .unwrap()
}

#[tokio::test]
async fn full_pass_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    create_both_sides(&config).await;

    let dbf = open_source(&config, "users.dbf", "").unwrap();
    dbf.bulk_insert(vec![user(1, "Ada"), user(2, "Grace")])
        .await
        .unwrap();

    let filenames = vec!["users.dbf".to_string()];
    sync::migrate(&config, &filenames, false, false).await.unwrap();

    let rows = sqlite_rows(&config).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("id"), Some(&Value::Integer(1)));
    assert_eq!(rows[0].get("name"), Some(&Value::Text("Ada".into())));
    assert_eq!(rows[1].get("id"), Some(&Value::Integer(2)));

    // Re-running against the now-aligned destiny must change nothing.
    sync::migrate(&config, &filenames, false, false).await.unwrap();
    assert_eq!(sqlite_rows(&config).await.len(), 2);
}

#[tokio::test]
async fn edits_propagate_as_updates_and_deletes() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    create_both_sides(&config).await;

    let dbf = open_source(&config, "users.dbf", "").unwrap();
    dbf.bulk_insert(vec![user(1, "Ada"), user(2, "Grace"), user(3, "Edsger")])
        .await
        .unwrap();

    let filenames = vec!["users.dbf".to_string()];
    sync::migrate(&config, &filenames, false, false).await.unwrap();
    assert_eq!(sqlite_rows(&config).await.len(), 3);

    // Rename one row, drop another, on the origin side.
    dbf.update(
        Row::from([("name".to_string(), Value::Text("Ada L.".into()))]),
        &Condition::parse("row_number = 1").unwrap(),
    )
    .await
    .unwrap();
    dbf.delete(&Condition::parse("row_number = 3").unwrap())
        .await
        .unwrap();

    sync::migrate(&config, &filenames, false, false).await.unwrap();

    let rows = sqlite_rows(&config).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("name"), Some(&Value::Text("Ada L.".into())));
    assert_eq!(rows[1].get("name"), Some(&Value::Text("Grace".into())));
}

#[tokio::test]
async fn destiny_changes_flow_back_to_the_dbf_side() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    create_both_sides(&config).await;

    let sqlite = open_source(&config, "company.db", "users").unwrap();
    sqlite
        .bulk_insert(vec![user(1, "Ada"), user(2, "Grace")])
        .await
        .unwrap();

    sync::migrate(&config, &["company.db".to_string()], false, false)
        .await
        .unwrap();

    let rows = dbf_rows(&config).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("id"), Some(&Value::Integer(1)));
    assert_eq!(rows[1].get("name"), Some(&Value::Text("Grace".into())));
}

#[tokio::test]
async fn blank_tables_diff_as_zero_rows() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    create_both_sides(&config).await;

    // Nothing on either side: the pass must be a no-op, not an error.
    sync::migrate(&config, &["users.dbf".to_string()], false, false)
        .await
        .unwrap();

    assert!(sqlite_rows(&config).await.is_empty());
    assert!(dbf_rows(&config).await.is_empty());
}

#[tokio::test]
async fn row_number_addressing_is_recomputed_live() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    create_both_sides(&config).await;

    let sqlite = open_source(&config, "company.db", "users").unwrap();
    sqlite
        .bulk_insert(vec![user(1, "Ada"), user(2, "Grace"), user(3, "Edsger")])
        .await
        .unwrap();

    sqlite
        .delete(&Condition::parse("row_number = 2").unwrap())
        .await
        .unwrap();

    // Positions are recomputed, so the old third row is the new second.
    let rows = sqlite
        .read_where(Some(&Condition::parse("row_number = 2").unwrap()))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::Text("Edsger".into())));

    // Same behavior on the DBF side.
    let dbf = open_source(&config, "users.dbf", "").unwrap();
    dbf.bulk_insert(vec![user(1, "Ada"), user(2, "Grace"), user(3, "Edsger")])
        .await
        .unwrap();
    dbf.delete(&Condition::parse("row_number = 2").unwrap())
        .await
        .unwrap();

    let rows = dbf
        .read_where(Some(&Condition::parse("row_number = 2").unwrap()))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::Text("Edsger".into())));
}

#[tokio::test]
async fn exists_reflects_source_and_table() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let dbf = open_source(&config, "users.dbf", "").unwrap();
    let sqlite = open_source(&config, "company.db", "users").unwrap();

    assert!(!dbf.exists().await.unwrap());
    assert!(!sqlite.exists().await.unwrap());

    create_both_sides(&config).await;

    assert!(dbf.exists().await.unwrap());
    assert!(sqlite.exists().await.unwrap());

    let missing_table = open_source(&config, "company.db", "ghosts").unwrap();
    assert!(!missing_table.exists().await.unwrap());
}

#[tokio::test]
async fn primary_key_collisions_are_rejected() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let sqlite = open_source(&config, "company.db", "users").unwrap();
    sqlite
        .create_table(&[
            ("id".to_string(), "INTEGER PRIMARY KEY".to_string()),
            ("name".to_string(), "TEXT".to_string()),
        ])
        .await
        .unwrap();

    sqlite.insert(user(1, "Ada")).await.unwrap();

    let err = sqlite.insert(user(1, "Imposter")).await.unwrap_err();
    assert!(matches!(
        err,
        dbfxsql_core::SyncError::RowAlreadyExists(key) if key == "1"
    ));

    assert_eq!(
        sqlite.fetch_primary_key().await.unwrap(),
        Some("id".to_string())
    );
}

#[tokio::test]
async fn one_shot_errors_surface_while_watch_mode_isolates() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    // Origin exists, destiny database file does not.
    let dbf = open_source(&config, "users.dbf", "").unwrap();
    dbf.create_table(&[("id".to_string(), "N(10,0)".to_string())])
        .await
        .unwrap();
    dbf.insert(Row::from([("id".to_string(), Value::Integer(1))]))
        .await
        .unwrap();

    let filenames = vec!["users.dbf".to_string()];

    let one_shot = sync::migrate(&config, &filenames, false, false).await;
    assert!(one_shot.is_err());

    let isolated = sync::migrate(&config, &filenames, false, true).await;
    assert!(isolated.is_ok());
}
