use axum::{
    extract::{Path, State},
    http::header,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};

use crate::api::errors::ApiError;
use crate::api::guards::ClientId;
use crate::core::state::AppState;
use crate::services::token_registry::Validation;

pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/:token", get(enter_exam))
}

/// Validates and consumes the link, then serves the exam page.
async fn enter_exam(
    Path(token): Path<String>,
    ClientId(client_id): ClientId,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    match state.token_registry().validate(&token, &client_id).await? {
        Validation::Granted(access) => {
            tracing::info!(client_id, usage_count = access.usage_count, "Exam page served");
            Ok((
                [(header::CACHE_CONTROL, "no-store")],
                Html(state.exam_page().to_string()),
            )
                .into_response())
        }
        Validation::Denied(reason) => Err(ApiError::AccessDenied(reason)),
    }
}
