use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::db::models::Violation;

pub(crate) async fn insert(
    pool: &SqlitePool,
    token: &str,
    client_id: Option<&str>,
    reason: &str,
    created_at: OffsetDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO violations (token, client_id, reason, created_at) VALUES (?1, ?2, ?3, ?4)")
        .bind(token)
        .bind(client_id)
        .bind(reason)
        .bind(created_at)
        .execute(pool)
        .await?;
    Ok(())
}

pub(crate) async fn list_by_token(
    pool: &SqlitePool,
    token: &str,
) -> Result<Vec<Violation>, sqlx::Error> {
    sqlx::query_as::<_, Violation>(
        "SELECT id, token, client_id, reason, created_at
         FROM violations
         WHERE token = ?1
         ORDER BY id DESC",
    )
    .bind(token)
    .fetch_all(pool)
    .await
}
