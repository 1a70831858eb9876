use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::db::models::AdminAccount;

const COLUMNS: &str = "id, username, hashed_password, is_active, created_at, updated_at";

pub(crate) struct CreateAdmin<'a> {
    pub(crate) id: &'a str,
    pub(crate) username: &'a str,
    pub(crate) hashed_password: &'a str,
    pub(crate) created_at: OffsetDateTime,
}

pub(crate) async fn find_by_id(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<AdminAccount>, sqlx::Error> {
    sqlx::query_as::<_, AdminAccount>(&format!("SELECT {COLUMNS} FROM admin_accounts WHERE id = ?1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn find_by_username(
    pool: &SqlitePool,
    username: &str,
) -> Result<Option<AdminAccount>, sqlx::Error> {
    sqlx::query_as::<_, AdminAccount>(&format!(
        "SELECT {COLUMNS} FROM admin_accounts WHERE username = ?1"
    ))
    .bind(username)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn create(pool: &SqlitePool, admin: CreateAdmin<'_>) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO admin_accounts (id, username, hashed_password, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, 1, ?4, ?4)",
    )
    .bind(admin.id)
    .bind(admin.username)
    .bind(admin.hashed_password)
    .bind(admin.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn update_credentials(
    pool: &SqlitePool,
    id: &str,
    hashed_password: &str,
    now: OffsetDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE admin_accounts SET hashed_password = ?1, is_active = 1, updated_at = ?2 WHERE id = ?3",
    )
    .bind(hashed_password)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}
