use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;

use crate::core::config::Settings;
use crate::core::time::format_offset;
use crate::db::types::SubmissionKind;
use crate::services::file_store::FileStore;
use crate::tasks::notifications::SubmissionNotice;

/// Outbound delivery of recorded submissions.
#[async_trait]
pub(crate) trait SubmissionNotifier: Send + Sync {
    async fn notify(&self, notice: &SubmissionNotice) -> Result<()>;
}

/// Posts each notice as a multipart form to an HTTP mail relay.
#[derive(Debug, Clone)]
pub(crate) struct MailRelayNotifier {
    client: Client,
    relay_url: String,
    api_key: String,
    from: String,
    to: String,
    files: FileStore,
}

impl MailRelayNotifier {
    pub(crate) fn from_settings(settings: &Settings, files: FileStore) -> Result<Self> {
        let mail = settings.mail();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(mail.timeout_seconds.max(1)))
            .build()
            .context("Failed to build mail relay HTTP client")?;

        Ok(Self {
            client,
            relay_url: mail.relay_url.clone(),
            api_key: mail.api_key.clone(),
            from: mail.from.clone(),
            to: mail.to.clone(),
            files,
        })
    }

    async fn build_form(&self, notice: &SubmissionNotice) -> Result<Form> {
        let mut form = Form::new()
            .text("from", self.from.clone())
            .text("to", self.to.clone())
            .text("subject", subject(notice))
            .text("text", body(notice));

        for attachment in &notice.attachments {
            let bytes = self
                .files
                .read(&attachment.stored_name)
                .await
                .with_context(|| format!("Failed to read attachment {}", attachment.stored_name))?;
            let part = Part::bytes(bytes)
                .file_name(attachment.original_name.clone())
                .mime_str(&attachment.mime_type)
                .context("Invalid attachment MIME type")?;
            form = form.part("attachment", part);
        }

        Ok(form)
    }
}

#[async_trait]
impl SubmissionNotifier for MailRelayNotifier {
    async fn notify(&self, notice: &SubmissionNotice) -> Result<()> {
        let form = self.build_form(notice).await?;

        let mut request = self.client.post(&self.relay_url).multipart(form);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await.context("Mail relay request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Mail relay returned {status}: {body}");
        }
        Ok(())
    }
}

fn subject(notice: &SubmissionNotice) -> String {
    let student = display_name(&notice.student_name);
    match notice.kind {
        SubmissionKind::Answers => format!("Exam answers: {student}"),
        SubmissionKind::Files => format!("Exam work uploaded: {student}"),
    }
}

fn body(notice: &SubmissionNotice) -> String {
    let mut text = format!(
        "Student: {}\nToken: {}\nSubmission: #{}\nSubmitted at: {}\n",
        display_name(&notice.student_name),
        notice.token,
        notice.submission_id,
        format_offset(notice.submitted_at),
    );

    match notice.kind {
        SubmissionKind::Answers => {
            let answers = &notice.answers;
            for (index, answer) in
                [&answers.q1, &answers.q2, &answers.q3, &answers.q4, &answers.q5].iter().enumerate()
            {
                text.push_str(&format!("\nQuestion {}: {}", index + 1, answer));
            }
        }
        SubmissionKind::Files => {
            text.push_str(&format!("\nAttached files: {}", notice.attachments.len()));
            for attachment in &notice.attachments {
                text.push_str(&format!("\n- {}", attachment.original_name));
            }
        }
    }

    text
}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "(no name)"
    } else {
        name
    }
}
