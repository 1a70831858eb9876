use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::ClientId;
use crate::core::config::Settings;
use crate::core::state::AppState;
use crate::schemas::submission::{
    FileDescriptorResponse, SubmitWorkRequest, SubmitWorkResponse, UploadWorkResponse,
    ViolationRequest, ViolationResponse,
};
use crate::services::submission_recorder::{IncomingFile, SubmissionPayload};

/// Room for the text fields and multipart framing on top of the file bytes.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

pub(crate) fn router(settings: &Settings) -> Router<AppState> {
    Router::new()
        .route("/submit-work", post(submit_work))
        .route(
            "/upload-work",
            post(upload_work).layer(DefaultBodyLimit::max(upload_body_limit(settings))),
        )
        .route("/log-violation", post(log_violation))
        .route("/violation", post(log_violation))
}

fn upload_body_limit(settings: &Settings) -> usize {
    let storage = settings.storage();
    let limit = storage
        .max_upload_bytes()
        .saturating_mul(storage.max_files_per_submission)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    usize::try_from(limit).unwrap_or(usize::MAX)
}

async fn submit_work(
    State(state): State<AppState>,
    Json(payload): Json<SubmitWorkRequest>,
) -> Result<Json<SubmitWorkResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let recorded = state
        .submission_recorder()
        .record(&payload.token, &payload.student_name, SubmissionPayload::Answers(payload.answers))
        .await?;

    Ok(Json(SubmitWorkResponse { success: true, submission_id: recorded.id }))
}

async fn upload_work(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadWorkResponse>, ApiError> {
    let storage = state.settings().storage();
    let max_bytes = storage.max_upload_bytes();
    let max_files = storage.max_files_per_submission as usize;

    let mut token: Option<String> = None;
    let mut student_name = String::new();
    let mut files: Vec<IncomingFile> = Vec::new();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();

        if let Some(original_name) = field.file_name().map(str::to_string) {
            if original_name.is_empty() {
                continue;
            }
            if files.len() >= max_files {
                return Err(ApiError::PayloadTooLarge(format!(
                    "Too many files (max {max_files})"
                )));
            }

            let content_type = field.content_type().map(str::to_string);
            let mut bytes = Vec::new();
            while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                if bytes.len() as u64 + chunk.len() as u64 > max_bytes {
                    return Err(ApiError::PayloadTooLarge(format!(
                        "File size exceeds {}MB limit",
                        storage.max_upload_size_mb
                    )));
                }
                bytes.extend_from_slice(&chunk);
            }
            files.push(IncomingFile { original_name, content_type, bytes });
            continue;
        }

        match name.as_str() {
            "token" => token = Some(field.text().await.map_err(multipart_error)?.trim().to_string()),
            "studentName" | "student_name" => {
                student_name = field.text().await.map_err(multipart_error)?;
            }
            _ => tracing::debug!(field = %name, "Ignoring unknown multipart field"),
        }
    }

    let token = token
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::BadRequest("token is required".to_string()))?;
    if files.is_empty() {
        return Err(ApiError::BadRequest("At least one file is required".to_string()));
    }

    let recorded = state
        .submission_recorder()
        .record(&token, &student_name, SubmissionPayload::Files(files))
        .await?;

    Ok(Json(UploadWorkResponse {
        success: true,
        submission_id: recorded.id,
        files: recorded.files.into_iter().map(FileDescriptorResponse::from_db).collect(),
    }))
}

/// Audit write from the exam page. Always acknowledges.
async fn log_violation(
    ClientId(client_id): ClientId,
    State(state): State<AppState>,
    Json(payload): Json<ViolationRequest>,
) -> Json<ViolationResponse> {
    state
        .token_registry()
        .log_violation(&payload.token, Some(&client_id), payload.reason.as_deref())
        .await;
    Json(ViolationResponse { logged: true })
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge("Upload exceeds the request size limit".to_string())
    } else {
        ApiError::BadRequest(format!("Invalid multipart data: {}", err.body_text()))
    }
}
