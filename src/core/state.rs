use std::sync::Arc;

use sqlx::SqlitePool;

use crate::core::config::Settings;
use crate::services::file_store::FileStore;
use crate::services::submission_recorder::SubmissionRecorder;
use crate::services::token_registry::TokenRegistry;
use crate::tasks::notifications::NotificationQueue;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: SqlitePool,
    files: FileStore,
    notifications: Option<NotificationQueue>,
    exam_page: String,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        db: SqlitePool,
        files: FileStore,
        notifications: Option<NotificationQueue>,
        exam_page: String,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, db, files, notifications, exam_page }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    pub(crate) fn files(&self) -> &FileStore {
        &self.inner.files
    }

    pub(crate) fn exam_page(&self) -> &str {
        &self.inner.exam_page
    }

    pub(crate) fn token_registry(&self) -> TokenRegistry {
        let access = self.settings().access();
        TokenRegistry::new(self.db().clone(), access.policy, access.token_bytes)
    }

    pub(crate) fn submission_recorder(&self) -> SubmissionRecorder {
        let storage = self.settings().storage();
        SubmissionRecorder::new(
            self.token_registry(),
            self.db().clone(),
            self.files().clone(),
            storage.max_files_per_submission as usize,
            storage.max_upload_bytes(),
            self.inner.notifications.clone(),
        )
    }
}
