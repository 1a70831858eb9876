use axum::{
    extract::{Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::api::guards::CurrentAdmin;
use crate::core::state::AppState;
use crate::db::types::SubmissionKind;
use crate::schemas::submission::{
    DownloadFileResponse, DownloadResponse, FileDescriptorResponse, SubmissionResponse,
    TokenGroupResponse, TokenSubmissionsResponse,
};
use crate::schemas::token::GeneratedTokenResponse;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/generate", get(generate))
        .route("/results", get(results))
        .route("/results/:token", get(results_for_token))
        .route("/uploads", get(uploads))
        .route("/download/:token", get(download))
        .route("/file/:filename", get(file))
}

async fn generate(
    CurrentAdmin(admin): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<GeneratedTokenResponse>, ApiError> {
    let issued = state.token_registry().issue().await?;
    tracing::info!(admin = %admin.username, "Exam link generated");

    Ok(Json(GeneratedTokenResponse::from_issued(
        issued,
        &state.settings().api().public_base_url,
    )))
}

async fn results(
    CurrentAdmin(_admin): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<Vec<TokenGroupResponse>>, ApiError> {
    let groups = state.submission_recorder().list_grouped_by_token(None).await?;
    Ok(Json(groups.into_iter().map(TokenGroupResponse::from_group).collect()))
}

async fn results_for_token(
    Path(token): Path<String>,
    CurrentAdmin(_admin): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<TokenSubmissionsResponse>, ApiError> {
    let records = state.submission_recorder().list_by_token(&token).await?;
    Ok(Json(TokenSubmissionsResponse {
        token,
        submissions: records.into_iter().map(SubmissionResponse::from_record).collect(),
    }))
}

async fn uploads(
    CurrentAdmin(_admin): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<Vec<TokenGroupResponse>>, ApiError> {
    let groups =
        state.submission_recorder().list_grouped_by_token(Some(SubmissionKind::Files)).await?;
    Ok(Json(groups.into_iter().map(TokenGroupResponse::from_group).collect()))
}

async fn download(
    Path(token): Path<String>,
    CurrentAdmin(_admin): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let files = state.submission_recorder().list_files_by_token(&token).await?;
    if files.is_empty() {
        return Err(ApiError::NotFound("No files uploaded for this token".to_string()));
    }

    Ok(Json(DownloadResponse {
        token,
        files: files
            .into_iter()
            .map(|(file, student_name)| DownloadFileResponse {
                student_name,
                file: FileDescriptorResponse::from_db(file),
            })
            .collect(),
    }))
}

async fn file(
    Path(filename): Path<String>,
    CurrentAdmin(admin): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    if state.files().path_for(&filename).is_none() {
        return Err(ApiError::BadRequest("Invalid file name".to_string()));
    }

    let (file, bytes) = state
        .submission_recorder()
        .find_file(&filename)
        .await?
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;

    tracing::info!(admin = %admin.username, file_id = file.id, "Stored file downloaded");

    let content_type = HeaderValue::from_str(&file.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file.stored_name))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    Ok(([(header::CONTENT_TYPE, content_type), (header::CONTENT_DISPOSITION, disposition)], bytes)
        .into_response())
}
