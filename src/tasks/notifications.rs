use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

use crate::db::models::SubmissionFile;
use crate::db::types::SubmissionKind;
use crate::services::mail_relay::SubmissionNotifier;
use crate::services::submission_recorder::Answers;

const BASE_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub(crate) struct NoticeAttachment {
    pub(crate) stored_name: String,
    pub(crate) original_name: String,
    pub(crate) mime_type: String,
}

impl NoticeAttachment {
    pub(crate) fn from_file(file: &SubmissionFile) -> Self {
        Self {
            stored_name: file.stored_name.clone(),
            original_name: file.original_name.clone(),
            mime_type: file.mime_type.clone(),
        }
    }
}

/// Everything the teacher's inbox needs to know about one recorded submission.
#[derive(Debug, Clone)]
pub(crate) struct SubmissionNotice {
    pub(crate) submission_id: i64,
    pub(crate) token: String,
    pub(crate) student_name: String,
    pub(crate) kind: SubmissionKind,
    pub(crate) answers: Answers,
    pub(crate) submitted_at: OffsetDateTime,
    pub(crate) attachments: Vec<NoticeAttachment>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub(crate) attempt_timeout: Duration,
    pub(crate) max_retries: u32,
    pub(crate) base_backoff: Duration,
}

impl RetryPolicy {
    pub(crate) fn new(timeout_seconds: u64, max_retries: u32) -> Self {
        Self {
            attempt_timeout: Duration::from_secs(timeout_seconds.max(1)),
            max_retries,
            base_backoff: BASE_BACKOFF,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Sending half handed to the recorder. Enqueueing never blocks a request.
#[derive(Debug, Clone)]
pub(crate) struct NotificationQueue {
    sender: mpsc::Sender<SubmissionNotice>,
}

impl NotificationQueue {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<SubmissionNotice>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub(crate) fn enqueue(&self, notice: SubmissionNotice) {
        let submission_id = notice.submission_id;
        match self.sender.try_send(notice) {
            Ok(()) => tracing::debug!(submission_id, "Notification queued"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::counter!("notifications_total", "outcome" => "dropped").increment(1);
                tracing::warn!(submission_id, "Notification queue full; notice dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                metrics::counter!("notifications_total", "outcome" => "dropped").increment(1);
                tracing::warn!(submission_id, "Notification worker stopped; notice dropped");
            }
        }
    }
}

/// Starts the delivery worker and returns the queue that feeds it.
pub(crate) fn spawn(
    notifier: Arc<dyn SubmissionNotifier>,
    capacity: usize,
    policy: RetryPolicy,
    shutdown: watch::Receiver<bool>,
) -> (NotificationQueue, JoinHandle<()>) {
    let (queue, receiver) = NotificationQueue::channel(capacity);
    let handle = tokio::spawn(run_worker(notifier, receiver, policy, shutdown));
    (queue, handle)
}

async fn run_worker(
    notifier: Arc<dyn SubmissionNotifier>,
    mut receiver: mpsc::Receiver<SubmissionNotice>,
    policy: RetryPolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(max_retries = policy.max_retries, "Notification worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            notice = receiver.recv() => {
                let Some(notice) = notice else {
                    break;
                };
                deliver(notifier.as_ref(), &notice, policy).await;
            }
            _ = shutdown.changed() => {}
        }
    }

    let dropped = discard_pending(&mut receiver);
    tracing::info!(dropped, "Notification worker stopped");
}

/// Closes the queue and drops whatever is still waiting in it.
fn discard_pending(receiver: &mut mpsc::Receiver<SubmissionNotice>) -> usize {
    receiver.close();
    let mut dropped = 0;
    while let Ok(notice) = receiver.try_recv() {
        dropped += 1;
        metrics::counter!("notifications_total", "outcome" => "dropped").increment(1);
        tracing::warn!(submission_id = notice.submission_id, "Shutting down; queued notice dropped");
    }
    dropped
}

/// Returns whether the notice was delivered. Failures are logged, never raised.
pub(crate) async fn deliver(
    notifier: &dyn SubmissionNotifier,
    notice: &SubmissionNotice,
    policy: RetryPolicy,
) -> bool {
    let submission_id = notice.submission_id;
    let attempts = policy.max_retries.saturating_add(1);

    for attempt in 1..=attempts {
        let error = match timeout(policy.attempt_timeout, notifier.notify(notice)).await {
            Ok(Ok(())) => {
                metrics::counter!("notifications_total", "outcome" => "sent").increment(1);
                tracing::info!(submission_id, attempt, "Submission notification delivered");
                return true;
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("timed out after {}s", policy.attempt_timeout.as_secs()),
        };

        if attempt < attempts {
            let backoff = policy.backoff(attempt);
            tracing::warn!(submission_id, attempt, error = %error, ?backoff, "Notification attempt failed; retrying");
            sleep(backoff).await;
        } else {
            tracing::error!(submission_id, attempts, error = %error, "NotificationFailed");
        }
    }

    metrics::counter!("notifications_total", "outcome" => "failed").increment(1);
    false
}
