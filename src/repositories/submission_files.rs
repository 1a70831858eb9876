use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::db::models::SubmissionFile;

pub(crate) const COLUMNS: &str = "\
    id, submission_id, original_name, stored_name, file_size, mime_type, sha256, created_at";

pub(crate) struct CreateSubmissionFile<'a> {
    pub(crate) submission_id: i64,
    pub(crate) original_name: &'a str,
    pub(crate) stored_name: &'a str,
    pub(crate) file_size: i64,
    pub(crate) mime_type: &'a str,
    pub(crate) sha256: &'a str,
    pub(crate) created_at: OffsetDateTime,
}

pub(crate) async fn create(
    executor: impl sqlx::SqliteExecutor<'_>,
    file: CreateSubmissionFile<'_>,
) -> Result<SubmissionFile, sqlx::Error> {
    sqlx::query_as::<_, SubmissionFile>(&format!(
        "INSERT INTO submission_files (
            submission_id, original_name, stored_name, file_size, mime_type, sha256, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         RETURNING {COLUMNS}"
    ))
    .bind(file.submission_id)
    .bind(file.original_name)
    .bind(file.stored_name)
    .bind(file.file_size)
    .bind(file.mime_type)
    .bind(file.sha256)
    .bind(file.created_at)
    .fetch_one(executor)
    .await
}

pub(crate) async fn list_by_submissions(
    pool: &SqlitePool,
    submission_ids: &[i64],
) -> Result<Vec<SubmissionFile>, sqlx::Error> {
    if submission_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new(format!(
        "SELECT {COLUMNS} FROM submission_files WHERE submission_id IN ("
    ));
    let mut separated = builder.separated(", ");
    for id in submission_ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(") ORDER BY submission_id DESC, id");

    builder.build_query_as::<SubmissionFile>().fetch_all(pool).await
}

pub(crate) async fn list_by_token(
    pool: &SqlitePool,
    token: &str,
) -> Result<Vec<(SubmissionFile, String)>, sqlx::Error> {
    #[derive(sqlx::FromRow)]
    struct Row {
        #[sqlx(flatten)]
        file: SubmissionFile,
        student_name: String,
    }

    let rows = sqlx::query_as::<_, Row>(
        "SELECT f.id, f.submission_id, f.original_name, f.stored_name, f.file_size,
                f.mime_type, f.sha256, f.created_at, s.student_name
         FROM submission_files f
         JOIN submissions s ON s.id = f.submission_id
         WHERE s.token = ?1
         ORDER BY s.id DESC, f.id",
    )
    .bind(token)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|row| (row.file, row.student_name)).collect())
}

pub(crate) async fn find_by_stored_name(
    pool: &SqlitePool,
    stored_name: &str,
) -> Result<Option<SubmissionFile>, sqlx::Error> {
    sqlx::query_as::<_, SubmissionFile>(&format!(
        "SELECT {COLUMNS} FROM submission_files WHERE stored_name = ?1"
    ))
    .bind(stored_name)
    .fetch_optional(pool)
    .await
}
