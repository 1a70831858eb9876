use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::db::models::Submission;
use crate::db::types::SubmissionKind;

pub(crate) const COLUMNS: &str =
    "id, token, student_name, kind, q1, q2, q3, q4, q5, submitted_at";

pub(crate) struct CreateSubmission<'a> {
    pub(crate) token: &'a str,
    pub(crate) student_name: &'a str,
    pub(crate) kind: SubmissionKind,
    pub(crate) answers: [&'a str; 5],
    pub(crate) submitted_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TokenSummaryRow {
    pub(crate) token: String,
    pub(crate) submission_count: i64,
    pub(crate) last_submitted_at: OffsetDateTime,
}

pub(crate) async fn create(
    executor: impl sqlx::SqliteExecutor<'_>,
    submission: CreateSubmission<'_>,
) -> Result<i64, sqlx::Error> {
    let [q1, q2, q3, q4, q5] = submission.answers;
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO submissions (token, student_name, kind, q1, q2, q3, q4, q5, submitted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         RETURNING id",
    )
    .bind(submission.token)
    .bind(submission.student_name)
    .bind(submission.kind)
    .bind(q1)
    .bind(q2)
    .bind(q3)
    .bind(q4)
    .bind(q5)
    .bind(submission.submitted_at)
    .fetch_one(executor)
    .await
}

#[cfg(test)]
pub(crate) async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(&format!("SELECT {COLUMNS} FROM submissions WHERE id = ?1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Newest first; ids grow with insertion so they break timestamp ties.
pub(crate) async fn list_by_token(
    pool: &SqlitePool,
    token: &str,
) -> Result<Vec<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(&format!(
        "SELECT {COLUMNS} FROM submissions WHERE token = ?1 ORDER BY id DESC"
    ))
    .bind(token)
    .fetch_all(pool)
    .await
}

pub(crate) async fn summarize_by_token(
    pool: &SqlitePool,
    kind: Option<SubmissionKind>,
) -> Result<Vec<TokenSummaryRow>, sqlx::Error> {
    sqlx::query_as::<_, TokenSummaryRow>(
        "SELECT s.token AS token,
                grouped.submission_count AS submission_count,
                s.submitted_at AS last_submitted_at
         FROM (
             SELECT token, COUNT(*) AS submission_count, MAX(id) AS last_id
             FROM submissions
             WHERE ?1 IS NULL OR kind = ?1
             GROUP BY token
         ) AS grouped
         JOIN submissions s ON s.id = grouped.last_id
         ORDER BY grouped.last_id DESC",
    )
    .bind(kind)
    .fetch_all(pool)
    .await
}

/// `(token, student_name)` pairs, newest first.
pub(crate) async fn list_student_names(
    pool: &SqlitePool,
    kind: Option<SubmissionKind>,
) -> Result<Vec<(String, String)>, sqlx::Error> {
    sqlx::query_as::<_, (String, String)>(
        "SELECT token, student_name
         FROM submissions
         WHERE ?1 IS NULL OR kind = ?1
         ORDER BY id DESC",
    )
    .bind(kind)
    .fetch_all(pool)
    .await
}
