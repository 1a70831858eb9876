use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_offset;
use crate::db::models::SubmissionFile;
use crate::db::types::SubmissionKind;
use crate::services::submission_recorder::{Answers, SubmissionRecord, TokenGroup};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SubmitWorkRequest {
    #[validate(length(min = 1, message = "token must not be empty"))]
    pub(crate) token: String,
    #[serde(default, rename = "studentName", alias = "student_name")]
    pub(crate) student_name: String,
    #[serde(default)]
    pub(crate) answers: Answers,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitWorkResponse {
    pub(crate) success: bool,
    pub(crate) submission_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadWorkResponse {
    pub(crate) success: bool,
    pub(crate) submission_id: i64,
    pub(crate) files: Vec<FileDescriptorResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ViolationRequest {
    pub(crate) token: String,
    pub(crate) reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ViolationResponse {
    pub(crate) logged: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct FileDescriptorResponse {
    pub(crate) id: i64,
    pub(crate) original_name: String,
    pub(crate) stored_name: String,
    pub(crate) file_size: i64,
    pub(crate) mime_type: String,
    pub(crate) sha256: String,
    pub(crate) url: String,
}

impl FileDescriptorResponse {
    pub(crate) fn from_db(file: SubmissionFile) -> Self {
        Self {
            url: format!("/admin/file/{}", file.stored_name),
            id: file.id,
            original_name: file.original_name,
            stored_name: file.stored_name,
            file_size: file.file_size,
            mime_type: file.mime_type,
            sha256: file.sha256,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmissionResponse {
    pub(crate) id: i64,
    pub(crate) token: String,
    pub(crate) student_name: String,
    pub(crate) kind: SubmissionKind,
    pub(crate) answers: Answers,
    pub(crate) submitted_at: String,
    pub(crate) files: Vec<FileDescriptorResponse>,
}

impl SubmissionResponse {
    pub(crate) fn from_record(record: SubmissionRecord) -> Self {
        let SubmissionRecord { submission, files } = record;
        Self {
            answers: Answers::from_submission(&submission),
            id: submission.id,
            token: submission.token,
            student_name: submission.student_name,
            kind: submission.kind,
            submitted_at: format_offset(submission.submitted_at),
            files: files.into_iter().map(FileDescriptorResponse::from_db).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct TokenSubmissionsResponse {
    pub(crate) token: String,
    pub(crate) submissions: Vec<SubmissionResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TokenGroupResponse {
    pub(crate) token: String,
    pub(crate) submission_count: i64,
    pub(crate) student_names: Vec<String>,
    pub(crate) last_submitted_at: String,
}

impl TokenGroupResponse {
    pub(crate) fn from_group(group: TokenGroup) -> Self {
        Self {
            token: group.token,
            submission_count: group.submission_count,
            student_names: group.student_names,
            last_submitted_at: format_offset(group.last_submitted_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct DownloadFileResponse {
    pub(crate) student_name: String,
    #[serde(flatten)]
    pub(crate) file: FileDescriptorResponse,
}

#[derive(Debug, Serialize)]
pub(crate) struct DownloadResponse {
    pub(crate) token: String,
    pub(crate) files: Vec<DownloadFileResponse>,
}
