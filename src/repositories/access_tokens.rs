use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::db::models::AccessToken;
use crate::db::types::TokenState;

pub(crate) const COLUMNS: &str =
    "id, value, state, usage_count, bound_client, created_at, used_at";

pub(crate) async fn insert(
    pool: &SqlitePool,
    value: &str,
    created_at: OffsetDateTime,
) -> Result<AccessToken, sqlx::Error> {
    sqlx::query_as::<_, AccessToken>(&format!(
        "INSERT INTO access_tokens (value, state, usage_count, created_at)
         VALUES (?1, ?2, 0, ?3)
         RETURNING {COLUMNS}"
    ))
    .bind(value)
    .bind(TokenState::Unused)
    .bind(created_at)
    .fetch_one(pool)
    .await
}

pub(crate) async fn find_by_value(
    executor: impl sqlx::SqliteExecutor<'_>,
    value: &str,
) -> Result<Option<AccessToken>, sqlx::Error> {
    sqlx::query_as::<_, AccessToken>(&format!("SELECT {COLUMNS} FROM access_tokens WHERE value = ?1"))
        .bind(value)
        .fetch_optional(executor)
        .await
}

/// Flips an unused token to used in one statement. Returns false when the token
/// is missing or was already consumed, including by a concurrent caller.
pub(crate) async fn consume_once(
    pool: &SqlitePool,
    value: &str,
    client_id: &str,
    now: OffsetDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE access_tokens
         SET state = ?1, usage_count = usage_count + 1, bound_client = ?2, used_at = ?3
         WHERE value = ?4 AND state = ?5",
    )
    .bind(TokenState::Used)
    .bind(client_id)
    .bind(now)
    .bind(value)
    .bind(TokenState::Unused)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Like [`consume_once`], but also refuses when any other token was already
/// consumed by `client_id`.
pub(crate) async fn consume_once_for_client(
    pool: &SqlitePool,
    value: &str,
    client_id: &str,
    now: OffsetDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE access_tokens
         SET state = ?1, usage_count = usage_count + 1, bound_client = ?2, used_at = ?3
         WHERE value = ?4 AND state = ?5
           AND NOT EXISTS (
               SELECT 1 FROM access_tokens AS prior
               WHERE prior.bound_client = ?2 AND prior.state = ?1
           )",
    )
    .bind(TokenState::Used)
    .bind(client_id)
    .bind(now)
    .bind(value)
    .bind(TokenState::Unused)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Counts one more use without changing state. Returns the new count, or
/// `None` for unknown tokens.
pub(crate) async fn record_use(
    pool: &SqlitePool,
    value: &str,
    client_id: &str,
    now: OffsetDateTime,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "UPDATE access_tokens
         SET usage_count = usage_count + 1, bound_client = COALESCE(bound_client, ?1), used_at = ?2
         WHERE value = ?3
         RETURNING usage_count",
    )
    .bind(client_id)
    .bind(now)
    .bind(value)
    .fetch_optional(pool)
    .await
}
