use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use time::OffsetDateTime;

use crate::core::config::{AccessPolicy, MIN_TOKEN_BYTES};
use crate::core::time::now_utc;
use crate::db::models::AccessToken;
use crate::db::types::TokenState;
use crate::repositories;

const ISSUE_ATTEMPTS: usize = 3;
const DEFAULT_VIOLATION_REASON: &str = "unknown";

#[derive(Debug, Error)]
pub(crate) enum RegistryError {
    #[error("token storage unavailable: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum DenialReason {
    NotFound,
    AlreadyUsed,
    DeviceAlreadyUsed,
}

impl DenialReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyUsed => "already_used",
            Self::DeviceAlreadyUsed => "device_already_used",
        }
    }

    pub(crate) fn detail(self) -> &'static str {
        match self {
            Self::NotFound => "This exam link is not valid",
            Self::AlreadyUsed => "This exam link has already been used",
            Self::DeviceAlreadyUsed => "This device has already entered the exam",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GrantedAccess {
    pub(crate) token: String,
    pub(crate) usage_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Validation {
    Granted(GrantedAccess),
    Denied(DenialReason),
}

impl Validation {
    #[cfg(test)]
    pub(crate) fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct IssuedToken {
    pub(crate) value: String,
    pub(crate) created_at: OffsetDateTime,
}

impl IssuedToken {
    pub(crate) fn access_url(&self, public_base_url: &str) -> String {
        format!("{}/exam/{}", public_base_url.trim_end_matches('/'), self.value)
    }
}

/// Issues exam access tokens and enforces the deployment's consumption policy.
#[derive(Debug, Clone)]
pub(crate) struct TokenRegistry {
    db: SqlitePool,
    policy: AccessPolicy,
    token_bytes: usize,
}

impl TokenRegistry {
    pub(crate) fn new(db: SqlitePool, policy: AccessPolicy, token_bytes: usize) -> Self {
        Self { db, policy, token_bytes: token_bytes.max(MIN_TOKEN_BYTES) }
    }

    pub(crate) async fn issue(&self) -> Result<IssuedToken, RegistryError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let value = generate_token_value(self.token_bytes);

            match repositories::access_tokens::insert(&self.db, &value, now_utc()).await {
                Ok(row) => {
                    metrics::counter!("tokens_issued_total").increment(1);
                    tracing::info!(token_id = row.id, "Issued access token");
                    return Ok(IssuedToken { value: row.value, created_at: row.created_at });
                }
                Err(err) if attempt < ISSUE_ATTEMPTS && is_unique_violation(&err) => {
                    tracing::warn!(attempt, "Generated token collided; regenerating");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub(crate) async fn find(&self, value: &str) -> Result<Option<AccessToken>, RegistryError> {
        Ok(repositories::access_tokens::find_by_value(&self.db, value).await?)
    }

    /// Validates `value` for `client_id` and, when granted, consumes it in the
    /// same statement. Never retried: a repeat call is a new validation.
    pub(crate) async fn validate(
        &self,
        value: &str,
        client_id: &str,
    ) -> Result<Validation, RegistryError> {
        let now = now_utc();
        let validation = match self.policy {
            AccessPolicy::MultiUse => {
                match repositories::access_tokens::record_use(&self.db, value, client_id, now)
                    .await?
                {
                    Some(usage_count) => {
                        Validation::Granted(GrantedAccess { token: value.to_string(), usage_count })
                    }
                    None => Validation::Denied(DenialReason::NotFound),
                }
            }
            AccessPolicy::SingleUse | AccessPolicy::DeviceBound => {
                let consumed = if self.policy == AccessPolicy::DeviceBound {
                    repositories::access_tokens::consume_once_for_client(
                        &self.db, value, client_id, now,
                    )
                    .await?
                } else {
                    repositories::access_tokens::consume_once(&self.db, value, client_id, now)
                        .await?
                };

                if consumed {
                    Validation::Granted(GrantedAccess { token: value.to_string(), usage_count: 1 })
                } else {
                    Validation::Denied(self.classify_denial(value).await?)
                }
            }
        };

        let outcome = match &validation {
            Validation::Granted(_) => "granted",
            Validation::Denied(reason) => reason.as_str(),
        };
        metrics::counter!("token_validations_total", "outcome" => outcome).increment(1);
        tracing::info!(client_id, outcome, policy = self.policy.as_str(), "Token validation");

        Ok(validation)
    }

    /// Appends a violation record. Storage failures are logged and swallowed.
    pub(crate) async fn log_violation(
        &self,
        value: &str,
        client_id: Option<&str>,
        reason: Option<&str>,
    ) {
        let reason = reason
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .unwrap_or(DEFAULT_VIOLATION_REASON);

        if let Err(err) =
            repositories::violations::insert(&self.db, value, client_id, reason, now_utc()).await
        {
            tracing::error!(error = %err, reason, "Failed to record violation");
            return;
        }

        tracing::warn!(client_id = client_id.unwrap_or("-"), reason, "Violation recorded");
    }

    /// Explains why a conditional consume matched no row.
    async fn classify_denial(&self, value: &str) -> Result<DenialReason, RegistryError> {
        let row = repositories::access_tokens::find_by_value(&self.db, value).await?;
        Ok(match row {
            None => DenialReason::NotFound,
            Some(token) if token.state == TokenState::Used => DenialReason::AlreadyUsed,
            // Still unused, so only the cross-token client check can have refused it.
            Some(_) => DenialReason::DeviceAlreadyUsed,
        })
    }
}

pub(crate) fn generate_token_value(bytes: usize) -> String {
    let mut buffer = vec![0u8; bytes.max(MIN_TOKEN_BYTES)];
    OsRng.fill_bytes(&mut buffer);
    hex::encode(buffer)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error().is_some_and(|db_err| db_err.is_unique_violation())
}
