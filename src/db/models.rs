use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::db::types::{SubmissionKind, TokenState};

#[derive(Debug, Clone, Serialize, FromRow)]
pub(crate) struct AccessToken {
    pub(crate) id: i64,
    pub(crate) value: String,
    pub(crate) state: TokenState,
    pub(crate) usage_count: i64,
    pub(crate) bound_client: Option<String>,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) used_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct Submission {
    pub(crate) id: i64,
    pub(crate) token: String,
    pub(crate) student_name: String,
    pub(crate) kind: SubmissionKind,
    pub(crate) q1: String,
    pub(crate) q2: String,
    pub(crate) q3: String,
    pub(crate) q4: String,
    pub(crate) q5: String,
    pub(crate) submitted_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct SubmissionFile {
    pub(crate) id: i64,
    pub(crate) submission_id: i64,
    pub(crate) original_name: String,
    pub(crate) stored_name: String,
    pub(crate) file_size: i64,
    pub(crate) mime_type: String,
    pub(crate) sha256: String,
    pub(crate) created_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct Violation {
    pub(crate) id: i64,
    pub(crate) token: String,
    pub(crate) client_id: Option<String>,
    pub(crate) reason: String,
    pub(crate) created_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct AdminAccount {
    pub(crate) id: String,
    pub(crate) username: String,
    pub(crate) hashed_password: String,
    pub(crate) is_active: bool,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
}
