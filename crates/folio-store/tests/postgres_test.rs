//! Postgres backend tests
//!
//! Need a Docker daemon; run with `cargo test -p folio-store -- --ignored`.

use folio_core::errors::ExErrorKind;
use folio_store::{
    Applicator, ApplyOptions, EmbeddedSource, MigrationStore, PgSettings, PostgresStore,
    UnitSource, DEFAULT_RECORD_TABLE,
};
use testcontainers_modules::{postgres::Postgres, testcontainers::runners::AsyncRunner};

fn settings(port: u16) -> PgSettings {
    PgSettings {
        host: "127.0.0.1".to_string(),
        port,
        database: "postgres".to_string(),
        user: "postgres".to_string(),
        password: Some(folio_core_types::Sensitive::new("postgres".to_string())),
        ssl: false,
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_embedded_schema_applies_once() {
    let node = Postgres::default().start().await.unwrap();
    let port = node.get_host_port_ipv4(5432).await.unwrap();

    let store = PostgresStore::connect(&settings(port), DEFAULT_RECORD_TABLE)
        .await
        .unwrap();
    let mut applicator = Applicator::new(store, ApplyOptions { strict: true, dry_run: false });

    let expected = EmbeddedSource.load().unwrap().len();
    let first = applicator.run(&EmbeddedSource).await.unwrap();
    assert_eq!(first.executed_count(), expected);

    let second = applicator.run(&EmbeddedSource).await.unwrap();
    assert_eq!(second.executed_count(), 0);
    assert_eq!(second.skipped_count(), expected);

    let mut store = applicator.into_store();
    let records = store.list_records().await.unwrap();
    assert!(records.windows(2).all(|w| w[0].name < w[1].name));
    store.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_second_session_cannot_take_the_lock() {
    let node = Postgres::default().start().await.unwrap();
    let port = node.get_host_port_ipv4(5432).await.unwrap();

    let mut holder = PostgresStore::connect(&settings(port), DEFAULT_RECORD_TABLE)
        .await
        .unwrap();
    let key = folio_store::migrations::lock_key(DEFAULT_RECORD_TABLE);
    assert!(holder.try_lock(key).await.unwrap());

    let contender = PostgresStore::connect(&settings(port), DEFAULT_RECORD_TABLE)
        .await
        .unwrap();
    let mut applicator = Applicator::new(contender, ApplyOptions::default());
    let err = applicator.run(&EmbeddedSource).await.unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::Concurrency);
    assert!(!applicator.store_mut().record_table_exists().await.unwrap());

    holder.unlock(key).await.unwrap();
    let summary = applicator.run(&EmbeddedSource).await.unwrap();
    assert!(!summary.is_noop());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_failed_unit_rolls_back_whole_batch() {
    let node = Postgres::default().start().await.unwrap();
    let port = node.get_host_port_ipv4(5432).await.unwrap();

    let store = PostgresStore::connect(&settings(port), DEFAULT_RECORD_TABLE)
        .await
        .unwrap();
    let units = vec![
        folio_core::MigrationUnit::new(
            "0001_users",
            "CREATE TABLE users (id SERIAL PRIMARY KEY); CREATE TABLE profiles (id SERIAL PRIMARY KEY, user_id INTEGER REFERENCES users(id));",
        )
        .unwrap(),
        folio_core::MigrationUnit::new(
            "0002_broken",
            "CREATE TABLE skills (id SERIAL PRIMARY KEY); ALTER TABLE nope ADD COLUMN x INTEGER;",
        )
        .unwrap(),
    ];
    let mut applicator = Applicator::new(store, ApplyOptions::default());

    let err = applicator.run(&units).await.unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::UnitApplication);
    assert_eq!(err.unit(), Some("0002_broken"));

    let mut store = applicator.into_store();
    let names: Vec<_> = store
        .list_records()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["0001_users"]);
    store.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_bad_credentials_are_connection_errors() {
    let node = Postgres::default().start().await.unwrap();
    let port = node.get_host_port_ipv4(5432).await.unwrap();

    let mut bad = settings(port);
    bad.password = Some(folio_core_types::Sensitive::new("wrong".to_string()));
    let err = PostgresStore::connect(&bad, DEFAULT_RECORD_TABLE)
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ExErrorKind::Connection);
}
