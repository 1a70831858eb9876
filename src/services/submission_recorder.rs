use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::core::time::now_utc;
use crate::db::models::{Submission, SubmissionFile};
use crate::db::types::SubmissionKind;
use crate::repositories;
use crate::repositories::submission_files::CreateSubmissionFile;
use crate::repositories::submissions::CreateSubmission;
use crate::services::file_store::FileStore;
use crate::services::token_registry::{RegistryError, TokenRegistry};
use crate::tasks::notifications::{NoticeAttachment, NotificationQueue, SubmissionNotice};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub(crate) enum RecorderError {
    #[error("unknown exam token")]
    NotFound,
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("submission storage unavailable: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("failed to store uploaded file: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RegistryError> for RecorderError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Storage(err) => Self::Storage(err),
        }
    }
}

/// Five free-text answers; absent fields are stored as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Answers {
    pub(crate) q1: String,
    pub(crate) q2: String,
    pub(crate) q3: String,
    pub(crate) q4: String,
    pub(crate) q5: String,
}

impl Answers {
    fn as_array(&self) -> [&str; 5] {
        [&self.q1, &self.q2, &self.q3, &self.q4, &self.q5]
    }

    pub(crate) fn from_submission(submission: &Submission) -> Self {
        Self {
            q1: submission.q1.clone(),
            q2: submission.q2.clone(),
            q3: submission.q3.clone(),
            q4: submission.q4.clone(),
            q5: submission.q5.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct IncomingFile {
    pub(crate) original_name: String,
    pub(crate) content_type: Option<String>,
    pub(crate) bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(crate) enum SubmissionPayload {
    Answers(Answers),
    Files(Vec<IncomingFile>),
}

impl SubmissionPayload {
    fn kind(&self) -> SubmissionKind {
        match self {
            Self::Answers(_) => SubmissionKind::Answers,
            Self::Files(_) => SubmissionKind::Files,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedSubmission {
    pub(crate) id: i64,
    pub(crate) files: Vec<SubmissionFile>,
}

#[derive(Debug, Clone)]
pub(crate) struct SubmissionRecord {
    pub(crate) submission: Submission,
    pub(crate) files: Vec<SubmissionFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TokenGroup {
    pub(crate) token: String,
    pub(crate) submission_count: i64,
    /// Distinct names, most recent first.
    pub(crate) student_names: Vec<String>,
    pub(crate) last_submitted_at: OffsetDateTime,
}

#[derive(Clone)]
pub(crate) struct SubmissionRecorder {
    tokens: TokenRegistry,
    db: SqlitePool,
    files: FileStore,
    max_files: usize,
    max_file_bytes: u64,
    notifications: Option<NotificationQueue>,
}

impl SubmissionRecorder {
    pub(crate) fn new(
        tokens: TokenRegistry,
        db: SqlitePool,
        files: FileStore,
        max_files: usize,
        max_file_bytes: u64,
        notifications: Option<NotificationQueue>,
    ) -> Self {
        Self { tokens, db, files, max_files, max_file_bytes, notifications }
    }

    pub(crate) async fn record(
        &self,
        token: &str,
        student_name: &str,
        payload: SubmissionPayload,
    ) -> Result<RecordedSubmission, RecorderError> {
        if let SubmissionPayload::Files(files) = &payload {
            self.check_limits(files)?;
        }

        if self.tokens.find(token).await?.is_none() {
            return Err(RecorderError::NotFound);
        }

        let student_name = student_name.trim();
        let kind = payload.kind();
        let submitted_at = now_utc();
        let batch = Uuid::new_v4();

        let (answers, incoming) = match payload {
            SubmissionPayload::Answers(answers) => (answers, Vec::new()),
            SubmissionPayload::Files(files) => (Answers::default(), files),
        };

        let mut written = Vec::with_capacity(incoming.len());
        for (index, file) in incoming.iter().enumerate() {
            let stored_name = FileStore::stored_name(
                student_name,
                token,
                submitted_at,
                batch,
                index,
                &file.original_name,
            );
            match self.files.write(&stored_name, &file.bytes).await {
                Ok((size, sha256)) => written.push(StagedFile { stored_name, size, sha256 }),
                Err(err) => {
                    self.discard(&written).await;
                    return Err(err.into());
                }
            }
        }

        let stored = self
            .insert_rows(token, student_name, kind, &answers, &incoming, &written, submitted_at)
            .await;

        let (id, files) = match stored {
            Ok(stored) => stored,
            Err(err) => {
                self.discard(&written).await;
                return Err(err.into());
            }
        };

        metrics::counter!("submissions_recorded_total", "kind" => kind.as_str()).increment(1);
        tracing::info!(submission_id = id, kind = kind.as_str(), files = files.len(), "Submission recorded");

        self.notify_external(SubmissionNotice {
            submission_id: id,
            token: token.to_string(),
            student_name: student_name.to_string(),
            kind,
            answers,
            submitted_at,
            attachments: files.iter().map(NoticeAttachment::from_file).collect(),
        });

        Ok(RecordedSubmission { id, files })
    }

    pub(crate) async fn list_by_token(
        &self,
        token: &str,
    ) -> Result<Vec<SubmissionRecord>, RecorderError> {
        let submissions = repositories::submissions::list_by_token(&self.db, token).await?;
        let ids: Vec<i64> = submissions.iter().map(|submission| submission.id).collect();
        let files = repositories::submission_files::list_by_submissions(&self.db, &ids).await?;

        let mut by_submission: HashMap<i64, Vec<SubmissionFile>> = HashMap::new();
        for file in files {
            by_submission.entry(file.submission_id).or_default().push(file);
        }

        Ok(submissions
            .into_iter()
            .map(|submission| {
                let files = by_submission.remove(&submission.id).unwrap_or_default();
                SubmissionRecord { submission, files }
            })
            .collect())
    }

    /// One entry per token, most recently active first. `kind` narrows both
    /// the counts and the names.
    pub(crate) async fn list_grouped_by_token(
        &self,
        kind: Option<SubmissionKind>,
    ) -> Result<Vec<TokenGroup>, RecorderError> {
        let summaries = repositories::submissions::summarize_by_token(&self.db, kind).await?;
        let names = repositories::submissions::list_student_names(&self.db, kind).await?;

        let mut names_by_token: HashMap<String, Vec<String>> = HashMap::new();
        for (token, name) in names {
            let entry = names_by_token.entry(token).or_default();
            if !entry.contains(&name) {
                entry.push(name);
            }
        }

        Ok(summaries
            .into_iter()
            .map(|summary| TokenGroup {
                student_names: names_by_token.remove(&summary.token).unwrap_or_default(),
                token: summary.token,
                submission_count: summary.submission_count,
                last_submitted_at: summary.last_submitted_at,
            })
            .collect())
    }

    /// Files of every submission under `token`, with the submitting student's name.
    pub(crate) async fn list_files_by_token(
        &self,
        token: &str,
    ) -> Result<Vec<(SubmissionFile, String)>, RecorderError> {
        Ok(repositories::submission_files::list_by_token(&self.db, token).await?)
    }

    pub(crate) async fn find_file(
        &self,
        stored_name: &str,
    ) -> Result<Option<(SubmissionFile, Vec<u8>)>, RecorderError> {
        let Some(file) =
            repositories::submission_files::find_by_stored_name(&self.db, stored_name).await?
        else {
            return Ok(None);
        };

        match self.files.read(&file.stored_name).await {
            Ok(bytes) => Ok(Some((file, bytes))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(stored_name, "Stored file row has no file on disk");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Queues the notice for delivery. Never fails the caller.
    pub(crate) fn notify_external(&self, notice: SubmissionNotice) {
        match &self.notifications {
            Some(queue) => queue.enqueue(notice),
            None => {
                tracing::debug!(submission_id = notice.submission_id, "Notifications disabled; skipping");
            }
        }
    }

    fn check_limits(&self, files: &[IncomingFile]) -> Result<(), RecorderError> {
        if files.len() > self.max_files {
            return Err(RecorderError::PayloadTooLarge(format!(
                "Too many files: {} (max {})",
                files.len(),
                self.max_files
            )));
        }

        if let Some(file) = files.iter().find(|file| file.bytes.len() as u64 > self.max_file_bytes) {
            return Err(RecorderError::PayloadTooLarge(format!(
                "File {:?} exceeds the {} byte limit",
                file.original_name, self.max_file_bytes
            )));
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_rows(
        &self,
        token: &str,
        student_name: &str,
        kind: SubmissionKind,
        answers: &Answers,
        incoming: &[IncomingFile],
        written: &[StagedFile],
        submitted_at: OffsetDateTime,
    ) -> Result<(i64, Vec<SubmissionFile>), sqlx::Error> {
        let mut tx = self.db.begin().await?;

        let id = repositories::submissions::create(
            &mut *tx,
            CreateSubmission {
                token,
                student_name,
                kind,
                answers: answers.as_array(),
                submitted_at,
            },
        )
        .await?;

        let mut files = Vec::with_capacity(written.len());
        for (file, staged) in incoming.iter().zip(written) {
            let mime_type = file
                .content_type
                .as_deref()
                .filter(|value| !value.is_empty())
                .unwrap_or(DEFAULT_MIME_TYPE);
            let row = repositories::submission_files::create(
                &mut *tx,
                CreateSubmissionFile {
                    submission_id: id,
                    original_name: &file.original_name,
                    stored_name: &staged.stored_name,
                    file_size: staged.size,
                    mime_type,
                    sha256: &staged.sha256,
                    created_at: submitted_at,
                },
            )
            .await?;
            files.push(row);
        }

        tx.commit().await?;
        Ok((id, files))
    }

    async fn discard(&self, written: &[StagedFile]) {
        for staged in written {
            self.files.remove(&staged.stored_name).await;
        }
    }
}

struct StagedFile {
    stored_name: String,
    size: i64,
    sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AccessPolicy;
    use crate::services::token_registry::TokenRegistry;
    use crate::test_support;

    async fn setup(max_files: usize, max_file_bytes: u64) -> (SubmissionRecorder, TokenRegistry, std::path::PathBuf) {
        let db = test_support::memory_pool().await;
        let root = test_support::temp_upload_dir();
        let registry = TokenRegistry::new(db.clone(), AccessPolicy::SingleUse, 16);
        let recorder = SubmissionRecorder::new(
            registry.clone(),
            db,
            FileStore::new(&root),
            max_files,
            max_file_bytes,
            None,
        );
        (recorder, registry, root)
    }

    fn answers(q1: &str, q2: &str) -> Answers {
        Answers { q1: q1.to_string(), q2: q2.to_string(), ..Answers::default() }
    }

    fn photo(name: &str, size: usize) -> IncomingFile {
        IncomingFile {
            original_name: name.to_string(),
            content_type: Some("image/jpeg".to_string()),
            bytes: vec![7u8; size],
        }
    }

    #[tokio::test]
    async fn answers_are_recorded_with_defaults_for_missing_fields() {
        let (recorder, registry, root) = setup(10, 1024).await;
        let token = registry.issue().await.expect("issue").value;

        let recorded = recorder
            .record(&token, "Ivanov", SubmissionPayload::Answers(answers("4", "x=2")))
            .await
            .expect("record");

        let records = recorder.list_by_token(&token).await.expect("list");
        assert_eq!(records.len(), 1);
        let stored = &records[0].submission;
        assert_eq!(stored.id, recorded.id);
        assert_eq!(stored.student_name, "Ivanov");
        assert_eq!(stored.kind, SubmissionKind::Answers);
        assert_eq!(Answers::from_submission(stored), answers("4", "x=2"));
        assert_eq!(stored.q5, "");
        assert!(records[0].files.is_empty());
        let _ = tokio::fs::remove_dir_all(root).await;
    }

    #[tokio::test]
    async fn recorded_answers_round_trip_verbatim() {
        let (recorder, registry, root) = setup(10, 1024).await;
        let token = registry.issue().await.expect("issue").value;
        let submitted = Answers {
            q1: "5".to_string(),
            q2: String::new(),
            q3: "x=2".to_string(),
            q4: "yes".to_string(),
            q5: String::new(),
        };

        recorder
            .record(&token, "Ivanov", SubmissionPayload::Answers(submitted.clone()))
            .await
            .expect("record");

        let records = recorder.list_by_token(&token).await.expect("list");
        assert_eq!(records.len(), 1);
        assert_eq!(Answers::from_submission(&records[0].submission), submitted);
        let _ = tokio::fs::remove_dir_all(root).await;
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let (recorder, _registry, root) = setup(10, 1024).await;
        let err = recorder
            .record("missing", "Ivanov", SubmissionPayload::Answers(Answers::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, RecorderError::NotFound));
        let _ = tokio::fs::remove_dir_all(root).await;
    }

    #[tokio::test]
    async fn list_by_token_is_newest_first() {
        let (recorder, registry, root) = setup(10, 1024).await;
        let token = registry.issue().await.expect("issue").value;

        let first = recorder
            .record(&token, "Ivanov", SubmissionPayload::Answers(answers("1", "")))
            .await
            .expect("first");
        let second = recorder
            .record(&token, "Ivanov", SubmissionPayload::Answers(answers("2", "")))
            .await
            .expect("second");

        let ids: Vec<i64> = recorder
            .list_by_token(&token)
            .await
            .expect("list")
            .iter()
            .map(|record| record.submission.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
        let _ = tokio::fs::remove_dir_all(root).await;
    }

    #[tokio::test]
    async fn files_are_stored_with_descriptors() {
        let (recorder, registry, root) = setup(10, 1024).await;
        let token = registry.issue().await.expect("issue").value;

        let recorded = recorder
            .record(
                &token,
                "Petrova Anna",
                SubmissionPayload::Files(vec![photo("page 1.jpg", 10), photo("page2.jpg", 20)]),
            )
            .await
            .expect("record");

        assert_eq!(recorded.files.len(), 2);
        let first = &recorded.files[0];
        assert_eq!(first.original_name, "page 1.jpg");
        assert_eq!(first.file_size, 10);
        assert_eq!(first.mime_type, "image/jpeg");
        assert!(first.stored_name.starts_with(&format!("PetrovaAnna_{token}_")));
        assert!(first.stored_name.ends_with("_0_page1.jpg"));
        assert!(root.join(&first.stored_name).exists());

        let (file, bytes) =
            recorder.find_file(&first.stored_name).await.expect("find").expect("file present");
        assert_eq!(file.id, first.id);
        assert_eq!(bytes, vec![7u8; 10]);

        let listed = recorder.list_files_by_token(&token).await.expect("files");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].1, "Petrova Anna");
        let _ = tokio::fs::remove_dir_all(root).await;
    }

    #[tokio::test]
    async fn oversize_upload_writes_nothing() {
        let (recorder, registry, root) = setup(2, 16).await;
        let token = registry.issue().await.expect("issue").value;

        let too_big = recorder
            .record(&token, "Ivanov", SubmissionPayload::Files(vec![photo("a.jpg", 17)]))
            .await
            .unwrap_err();
        assert!(matches!(too_big, RecorderError::PayloadTooLarge(_)));

        let too_many = recorder
            .record(
                &token,
                "Ivanov",
                SubmissionPayload::Files(vec![photo("a.jpg", 1), photo("b.jpg", 1), photo("c.jpg", 1)]),
            )
            .await
            .unwrap_err();
        assert!(matches!(too_many, RecorderError::PayloadTooLarge(_)));

        assert!(recorder.list_by_token(&token).await.expect("list").is_empty());
        let leftover = std::fs::read_dir(&root).map(|entries| entries.count()).unwrap_or(0);
        assert_eq!(leftover, 0);
        let _ = tokio::fs::remove_dir_all(root).await;
    }

    #[tokio::test]
    async fn grouped_view_counts_and_filters_by_kind() {
        let (recorder, registry, root) = setup(10, 1024).await;
        let alpha = registry.issue().await.expect("issue").value;
        let beta = registry.issue().await.expect("issue").value;

        recorder
            .record(&alpha, "Ivanov", SubmissionPayload::Answers(answers("1", "")))
            .await
            .expect("alpha answers");
        recorder
            .record(&beta, "Sidorov", SubmissionPayload::Files(vec![photo("a.jpg", 3)]))
            .await
            .expect("beta files");
        recorder
            .record(&alpha, "Ivanov I.", SubmissionPayload::Answers(answers("2", "")))
            .await
            .expect("alpha again");

        let all = recorder.list_grouped_by_token(None).await.expect("grouped");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].token, alpha);
        assert_eq!(all[0].submission_count, 2);
        assert_eq!(all[0].student_names, vec!["Ivanov I.".to_string(), "Ivanov".to_string()]);
        assert_eq!(all[1].token, beta);

        let uploads =
            recorder.list_grouped_by_token(Some(SubmissionKind::Files)).await.expect("uploads");
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].token, beta);
        assert_eq!(uploads[0].student_names, vec!["Sidorov".to_string()]);
        let _ = tokio::fs::remove_dir_all(root).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_uploads_from_one_student_keep_both_files() {
        let (db, db_path) = test_support::file_pool(4).await;
        let root = test_support::temp_upload_dir();
        let registry = TokenRegistry::new(db.clone(), AccessPolicy::SingleUse, 16);
        let recorder =
            SubmissionRecorder::new(registry.clone(), db.clone(), FileStore::new(&root), 10, 1024, None);
        let token = registry.issue().await.expect("issue").value;

        for _ in 0..20 {
            let first = recorder.record(
                &token,
                "Ivanov",
                SubmissionPayload::Files(vec![IncomingFile {
                    original_name: "p.jpg".to_string(),
                    content_type: Some("image/jpeg".to_string()),
                    bytes: b"first".to_vec(),
                }]),
            );
            let second = recorder.record(
                &token,
                "Ivanov",
                SubmissionPayload::Files(vec![IncomingFile {
                    original_name: "p.jpg".to_string(),
                    content_type: Some("image/jpeg".to_string()),
                    bytes: b"second".to_vec(),
                }]),
            );
            let (first, second) = tokio::join!(first, second);
            let first = first.expect("first upload");
            let second = second.expect("second upload");

            assert_ne!(first.files[0].stored_name, second.files[0].stored_name);
            let files = FileStore::new(&root);
            assert_eq!(files.read(&first.files[0].stored_name).await.expect("first on disk"), b"first");
            assert_eq!(files.read(&second.files[0].stored_name).await.expect("second on disk"), b"second");
        }

        let recorded = recorder.list_by_token(&token).await.expect("list");
        assert_eq!(recorded.len(), 40);
        db.close().await;
        test_support::remove_file_pool(db_path).await;
        let _ = tokio::fs::remove_dir_all(root).await;
    }

    #[tokio::test]
    async fn notification_is_queued_after_recording() {
        let db = test_support::memory_pool().await;
        let root = test_support::temp_upload_dir();
        let (queue, mut receiver) = NotificationQueue::channel(4);
        let registry = TokenRegistry::new(db.clone(), AccessPolicy::SingleUse, 16);
        let recorder =
            SubmissionRecorder::new(registry.clone(), db, FileStore::new(&root), 10, 1024, Some(queue));
        let token = registry
            .issue()
            .await
            .expect("issue")
            .value;

        let recorded = recorder
            .record(&token, "Ivanov", SubmissionPayload::Answers(answers("42", "")))
            .await
            .expect("record");

        let notice = receiver.try_recv().expect("notice queued");
        assert_eq!(notice.submission_id, recorded.id);
        assert_eq!(notice.student_name, "Ivanov");
        assert_eq!(notice.answers.q1, "42");
        let _ = tokio::fs::remove_dir_all(root).await;
    }

    struct UnreachableRelay {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait::async_trait]
    impl crate::services::mail_relay::SubmissionNotifier for UnreachableRelay {
        async fn notify(&self, _notice: &SubmissionNotice) -> anyhow::Result<()> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn failing_notification_does_not_fail_the_submission() {
        use std::sync::atomic::Ordering;
        use std::sync::Arc;
        use std::time::Duration;

        use crate::tasks::notifications::{self, RetryPolicy};

        let db = test_support::memory_pool().await;
        let root = test_support::temp_upload_dir();
        let relay = Arc::new(UnreachableRelay { calls: Default::default() });
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_millis(200),
            max_retries: 2,
            base_backoff: Duration::from_millis(1),
        };
        let (queue, worker) = notifications::spawn(relay.clone(), 4, policy, shutdown_rx);

        let registry = TokenRegistry::new(db.clone(), AccessPolicy::SingleUse, 16);
        let recorder =
            SubmissionRecorder::new(registry.clone(), db, FileStore::new(&root), 10, 1024, Some(queue));
        let token = registry.issue().await.expect("issue").value;

        let recorded = recorder
            .record(&token, "Ivanov", SubmissionPayload::Answers(answers("5", "")))
            .await
            .expect("submission survives notification failure");

        for _ in 0..200 {
            if relay.calls.load(Ordering::SeqCst) == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(relay.calls.load(Ordering::SeqCst), 3);

        let stored = recorder.list_by_token(&token).await.expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].submission.id, recorded.id);
        assert_eq!(stored[0].submission.q1, "5");

        shutdown_tx.send(true).expect("shutdown");
        tokio::time::timeout(Duration::from_secs(1), worker).await.expect("worker stops").expect("join");
        let _ = tokio::fs::remove_dir_all(root).await;
    }
}
