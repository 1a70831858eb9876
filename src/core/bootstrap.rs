use uuid::Uuid;

use crate::core::config::Settings;
use crate::core::security;
use crate::core::time::now_utc;
use crate::repositories;

const FALLBACK_EXAM_PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"UTF-8\">\
<title>Exam</title></head><body><h1>Exam</h1>\
<p>The exam page has not been configured. Ask your teacher.</p></body></html>";

/// Creates or refreshes the teacher account described by the admin settings.
pub(crate) async fn ensure_admin(db: &sqlx::SqlitePool, settings: &Settings) -> anyhow::Result<()> {
    let admin = settings.admin();
    if admin.password.is_empty() {
        tracing::warn!("ADMIN_PASSWORD not configured; admin routes stay unreachable");
        return Ok(());
    }

    let now = now_utc();
    let existing = repositories::admins::find_by_username(db, &admin.username).await?;

    if let Some(account) = existing {
        let verified =
            security::verify_password(&admin.password, &account.hashed_password).unwrap_or(false);
        if verified && account.is_active {
            tracing::info!(username = %admin.username, "Admin account already up to date");
            return Ok(());
        }

        let hashed_password = security::hash_password(&admin.password)?;
        repositories::admins::update_credentials(db, &account.id, &hashed_password, now).await?;
        tracing::info!(username = %admin.username, "Updated admin account");
        return Ok(());
    }

    let hashed_password = security::hash_password(&admin.password)?;
    repositories::admins::create(
        db,
        repositories::admins::CreateAdmin {
            id: &Uuid::new_v4().to_string(),
            username: &admin.username,
            hashed_password: &hashed_password,
            created_at: now,
        },
    )
    .await?;

    tracing::info!(username = %admin.username, "Created admin account");
    Ok(())
}

/// Loads the static exam page served after a successful validation.
pub(crate) async fn load_exam_page(settings: &Settings) -> anyhow::Result<String> {
    let path = &settings.storage().exam_page_path;
    match tokio::fs::read_to_string(path).await {
        Ok(page) => Ok(page),
        Err(err) if settings.runtime().strict_config => {
            Err(anyhow::anyhow!("failed to read exam page {}: {err}", path.display()))
        }
        Err(err) => {
            tracing::warn!(error = %err, path = %path.display(), "Exam page missing; serving placeholder");
            Ok(FALLBACK_EXAM_PAGE.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn ensure_admin_creates_then_refreshes_password() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        let mut settings = Settings::load().expect("settings");
        let db = test_support::memory_pool().await;

        ensure_admin(&db, &settings).await.expect("create");
        let created = repositories::admins::find_by_username(&db, &settings.admin().username)
            .await
            .unwrap()
            .expect("account");
        assert!(security::verify_password(test_support::TEST_ADMIN_PASSWORD, &created.hashed_password)
            .unwrap());

        std::env::set_var("ADMIN_PASSWORD", "rotated-password");
        settings = Settings::load().expect("settings");
        ensure_admin(&db, &settings).await.expect("update");
        let updated = repositories::admins::find_by_username(&db, &settings.admin().username)
            .await
            .unwrap()
            .expect("account");
        assert_eq!(updated.id, created.id);
        assert!(security::verify_password("rotated-password", &updated.hashed_password).unwrap());
    }

    #[tokio::test]
    async fn missing_exam_page_falls_back_outside_strict_mode() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("EXAM_PAGE_PATH", "/nonexistent/exam.html");
        let settings = Settings::load().expect("settings");
        std::env::remove_var("EXAM_PAGE_PATH");

        let page = load_exam_page(&settings).await.expect("page");
        assert!(page.contains("<h1>Exam</h1>"));
    }
}
