use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::core::config::Settings;

/// Uploaded files on the local filesystem, addressed by their stored name.
#[derive(Debug, Clone)]
pub(crate) struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub(crate) async fn from_settings(settings: &Settings) -> std::io::Result<Self> {
        let store = Self::new(settings.storage().upload_dir.clone());
        tokio::fs::create_dir_all(&store.root).await?;
        Ok(store)
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    /// `{student}_{token}_{unix_millis}_{batch}_{index}_{original}`, every part
    /// sanitized. `batch` is unique per recorded submission.
    pub(crate) fn stored_name(
        student_name: &str,
        token: &str,
        at: OffsetDateTime,
        batch: Uuid,
        index: usize,
        original_name: &str,
    ) -> String {
        let millis = at.unix_timestamp_nanos() / 1_000_000;
        format!(
            "{}_{}_{millis}_{}_{index}_{}",
            sanitized_component(student_name, "student"),
            sanitized_component(token, "token"),
            batch.simple(),
            sanitized_filename(original_name),
        )
    }

    /// Resolves a stored name to a path inside the root, refusing anything that
    /// could step outside it.
    pub(crate) fn path_for(&self, stored_name: &str) -> Option<PathBuf> {
        let valid = !stored_name.is_empty()
            && stored_name != "."
            && stored_name != ".."
            && stored_name.chars().all(is_allowed_char);
        valid.then(|| self.root.join(stored_name))
    }

    /// Writes a new file and returns its size and SHA-256 hex digest. Never
    /// replaces an existing file.
    pub(crate) async fn write(&self, stored_name: &str, bytes: &[u8]) -> std::io::Result<(i64, String)> {
        let path = self.path_for(stored_name).ok_or_else(|| invalid_name(stored_name))?;
        tokio::fs::create_dir_all(&self.root).await?;

        let mut file = tokio::fs::OpenOptions::new().write(true).create_new(true).open(&path).await?;
        if let Err(err) = write_all_synced(&mut file, bytes).await {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(err);
        }

        let hash_hex = hex::encode(Sha256::digest(bytes));
        Ok((bytes.len() as i64, hash_hex))
    }

    pub(crate) async fn read(&self, stored_name: &str) -> std::io::Result<Vec<u8>> {
        let path = self.path_for(stored_name).ok_or_else(|| invalid_name(stored_name))?;
        tokio::fs::read(path).await
    }

    /// Best-effort removal used to roll back a failed submission.
    pub(crate) async fn remove(&self, stored_name: &str) {
        let Some(path) = self.path_for(stored_name) else {
            return;
        };
        if let Err(err) = tokio::fs::remove_file(&path).await {
            tracing::warn!(error = %err, path = %path.display(), "Failed to remove stored file");
        }
    }
}

async fn write_all_synced(file: &mut tokio::fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

pub(crate) fn sanitized_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    sanitized_component(base, "upload")
}

fn sanitized_component(value: &str, fallback: &str) -> String {
    let sanitized: String = value.chars().filter(|c| is_allowed_char(*c)).collect();
    let trimmed = sanitized.trim_matches('.');

    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'
}

fn invalid_name(stored_name: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("invalid stored file name: {stored_name:?}"),
    )
}
