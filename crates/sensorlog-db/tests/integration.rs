use sensorlog_db::{create_pool, run_migrations, DbRuntimeSettings};

#[test]
fn db_initialization_works() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("sensorlog.db");
    let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default())
        .expect("failed to create pool");
    let conn = pool.get().expect("failed to get connection");
    let applied = run_migrations(&conn, "readings").expect("failed to run migrations");
    assert_eq!(applied, 1);

    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .expect("failed to prepare table query");
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .expect("failed to execute table query")
        .map(|r| r.expect("failed to read table name"))
        .collect();

    assert_eq!(tables, vec!["_sensorlog_migrations", "readings"]);
}

#[test]
fn schema_survives_reopen() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("sensorlog.db");
    let path = path.to_str().unwrap();

    {
        let pool = create_pool(path, DbRuntimeSettings::default()).unwrap();
        let conn = pool.get().unwrap();
        run_migrations(&conn, "readings").unwrap();
    }

    let pool = create_pool(path, DbRuntimeSettings::default()).unwrap();
    let conn = pool.get().unwrap();
    let applied = run_migrations(&conn, "readings").unwrap();
    assert_eq!(applied, 0, "migrations should not re-run after reopen");
}
