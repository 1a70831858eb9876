use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::Row;

#[tokio::test]
async fn migrations_apply_and_tables_exist() -> anyhow::Result<()> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;

    let migrations_dir =
        std::env::var("EXAM_MIGRATIONS_DIR").unwrap_or_else(|_| "migrations".to_string());
    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(&migrations_dir)).await?;
    migrator.run(&pool).await?;

    let tables = ["access_tokens", "submissions", "submission_files", "violations", "admin_accounts"];

    for table in tables {
        let row = sqlx::query("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(table)
            .fetch_one(&pool)
            .await?;
        let count: i64 = row.try_get(0)?;
        assert_eq!(count, 1, "expected table {table} to exist after migrations");
    }

    // Re-running is a no-op.
    migrator.run(&pool).await?;

    Ok(())
}

#[tokio::test]
async fn token_values_are_unique() -> anyhow::Result<()> {
    let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await?;
    sqlx::migrate::Migrator::new(std::path::Path::new("migrations")).await?.run(&pool).await?;

    let insert = "INSERT INTO access_tokens (value, state, usage_count, created_at)
                  VALUES ('abc', 'unused', 0, '2025-03-04T09:15:00Z')";
    sqlx::query(insert).execute(&pool).await?;
    let duplicate = sqlx::query(insert).execute(&pool).await;
    assert!(duplicate.is_err(), "duplicate token value must be rejected");

    let bad_state = sqlx::query(
        "INSERT INTO access_tokens (value, state, usage_count, created_at)
         VALUES ('def', 'expired', 0, '2025-03-04T09:15:00Z')",
    )
    .execute(&pool)
    .await;
    assert!(bad_state.is_err(), "state outside unused/used must be rejected");

    Ok(())
}
