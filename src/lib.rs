pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;

use crate::core::{config::Settings, state::AppState, telemetry};
use crate::services::file_store::FileStore;
use crate::services::mail_relay::MailRelayNotifier;
use crate::tasks::notifications::{self, RetryPolicy};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    if let Err(err) = core::bootstrap::ensure_admin(&db_pool, &settings).await {
        tracing::error!(error = %err, "Failed to ensure admin account");
    }

    let files = FileStore::from_settings(&settings).await?;
    let exam_page = core::bootstrap::load_exam_page(&settings).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut worker = None;
    let notification_queue = if settings.mail().enabled() {
        let notifier = MailRelayNotifier::from_settings(&settings, files.clone())?;
        let mail = settings.mail();
        let (queue, handle) = notifications::spawn(
            Arc::new(notifier),
            mail.queue_capacity,
            RetryPolicy::new(mail.timeout_seconds, mail.max_retries),
            shutdown_rx,
        );
        worker = Some(handle);
        Some(queue)
    } else {
        tracing::info!("MAIL_RELAY_URL not set; submission notifications disabled");
        None
    };

    let state = AppState::new(settings, db_pool, files, notification_queue, exam_page);
    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        policy = state.settings().access().policy.as_str(),
        "Exam links server listening"
    );

    let result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(core::shutdown::shutdown_signal(shutdown_tx))
        .await;

    if let Some(handle) = worker {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Notification worker join failed");
        }
    }

    state.db().close().await;
    tracing::info!("Database pool closed");

    result?;

    Ok(())
}
