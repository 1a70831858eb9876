use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::api;
use crate::core::{bootstrap, config::Settings, security, state::AppState};
use crate::repositories;
use crate::services::file_store::FileStore;

const TEST_SECRET_KEY: &str = "test-secret";
pub(crate) const TEST_ADMIN_PASSWORD: &str = "chalk-and-board";
pub(crate) const TEST_EXAM_PAGE: &str = "<html><body><form id=\"exam\"></form></body></html>";

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    pub(crate) upload_dir: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl TestContext {
    pub(crate) async fn cleanup(self) {
        let _ = tokio::fs::remove_dir_all(&self.upload_dir).await;
    }
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("EXAM_ENV", "test");
    std::env::set_var("SECRET_KEY", TEST_SECRET_KEY);
    std::env::set_var("ADMIN_USERNAME", "teacher");
    std::env::set_var("ADMIN_PASSWORD", TEST_ADMIN_PASSWORD);
    std::env::set_var("PUBLIC_BASE_URL", "http://exam.test");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::set_var("TRUST_FORWARDED_FOR", "1");
    std::env::remove_var("EXAM_STRICT_CONFIG");
    std::env::remove_var("ACCESS_POLICY");
    std::env::remove_var("TOKEN_BYTES");
    std::env::remove_var("MAX_UPLOAD_SIZE_MB");
    std::env::remove_var("MAX_FILES_PER_SUBMISSION");
    std::env::remove_var("UPLOAD_DIR");
    std::env::remove_var("MAIL_RELAY_URL");
    std::env::remove_var("MAIL_RELAY_API_KEY");
    std::env::remove_var("MAIL_TO");
}

/// Fresh in-memory database. A single connection keeps the database alive for
/// the life of the pool.
pub(crate) async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("sqlite options")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("memory pool");
    crate::db::run_migrations(&pool).await.expect("migrations");
    pool
}

/// File-backed database so concurrent tests get real separate connections.
pub(crate) async fn file_pool(max_connections: u32) -> (SqlitePool, PathBuf) {
    let path = std::env::temp_dir().join(format!("exam-links-{}.db", Uuid::new_v4()));
    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10))
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .expect("file pool");
    crate::db::run_migrations(&pool).await.expect("migrations");
    (pool, path)
}

pub(crate) async fn remove_file_pool(path: PathBuf) {
    for suffix in ["", "-wal", "-shm"] {
        let mut target = path.clone().into_os_string();
        target.push(suffix);
        let _ = tokio::fs::remove_file(PathBuf::from(target)).await;
    }
}

pub(crate) fn temp_upload_dir() -> PathBuf {
    std::env::temp_dir().join(format!("exam-links-uploads-{}", Uuid::new_v4()))
}

pub(crate) async fn setup_test_context() -> TestContext {
    setup_test_context_with(&[]).await
}

/// Builds the router over an in-memory database after applying `overrides`
/// to the test environment.
pub(crate) async fn setup_test_context_with(overrides: &[(&str, &str)]) -> TestContext {
    let guard = env_lock().await;
    set_test_env();

    let upload_dir = temp_upload_dir();
    std::env::set_var("UPLOAD_DIR", &upload_dir);
    for (key, value) in overrides {
        std::env::set_var(key, value);
    }

    let settings = Settings::load().expect("settings");
    for (key, _) in overrides {
        std::env::remove_var(key);
    }

    let db = memory_pool().await;
    bootstrap::ensure_admin(&db, &settings).await.expect("admin bootstrap");
    let files = FileStore::from_settings(&settings).await.expect("upload dir");

    let state = AppState::new(settings, db, files, None, TEST_EXAM_PAGE.to_string());
    let app = api::router::router(state.clone());

    TestContext { state, app, upload_dir, _guard: guard }
}

pub(crate) async fn admin_token(state: &AppState) -> String {
    let account = repositories::admins::find_by_username(state.db(), &state.settings().admin().username)
        .await
        .expect("admin lookup")
        .expect("admin account");
    security::create_access_token(&account.id, state.settings(), None).expect("token")
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

/// One part of a hand-built multipart body.
pub(crate) enum MultipartField<'a> {
    Text(&'a str, &'a str),
    File { name: &'a str, filename: &'a str, content_type: &'a str, bytes: &'a [u8] },
}

pub(crate) fn multipart_request(uri: &str, fields: &[MultipartField<'_>]) -> Request<Body> {
    let boundary = "exam-links-test-boundary";
    let mut body = Vec::new();

    for field in fields {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        match field {
            MultipartField::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            MultipartField::File { name, filename, content_type, bytes } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .expect("multipart request")
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}

pub(crate) async fn read_text(response: axum::response::Response<Body>) -> String {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    String::from_utf8_lossy(&body).into_owned()
}
